pub mod client;
pub mod types;

pub use client::NodeClient;
pub use types::{AuxBlock, BlockTemplate, TemplateTx};

use async_trait::async_trait;

use crate::error::Result;

/// Outcome of an upstream submission attempt that reached the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    Rejected(String),
}

/// Upstream chain client, one per configured chain.
///
/// Fetch errors are transient (`UpstreamUnavailable`); a node's rejection
/// of a specific submission is permanent (`SubmitOutcome::Rejected`).
/// Implemented by [`NodeClient`] in production and by stubs in tests.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Short chain tag for logs and error messages.
    fn chain_name(&self) -> &str;

    /// `getblocktemplate`, decoded into the relay's template type.
    async fn fetch_template(&self) -> Result<BlockTemplate>;

    /// `submitblock` with the full serialized block.
    async fn submit_block(&self, block_hex: &str) -> Result<SubmitOutcome>;

    /// `createauxblock` against the configured auxiliary payout address.
    async fn fetch_aux_block(&self, payout_address: &str) -> Result<AuxBlock>;

    /// `submitauxblock` with the committed hash and the serialized proof.
    async fn submit_aux_block(&self, aux_hash_hex: &str, auxpow_hex: &str)
        -> Result<SubmitOutcome>;
}
