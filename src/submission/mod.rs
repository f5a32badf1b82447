//! Upstream submission dispatch.
//!
//! Winning shares become full blocks (primary chain) or AuxPoW proofs
//! (auxiliary chain). Each submission runs as its own task with its own
//! deadline: one slow or unavailable daemon can never stall share
//! acceptance or the other chain's submission. Timed-out submissions are
//! abandoned, not retried, since the template has typically moved on.

pub mod log;

pub use log::SubmissionLog;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::consensus::auxpow::AuxPowProof;
use crate::consensus::encode::reverse32;
use crate::events::{Event, EventBus};
use crate::job::Job;
use crate::rpc::{ChainClient, SubmitOutcome};

/// Everything needed to submit one winning share upstream.
#[derive(Debug, Clone)]
pub struct BlockCandidate {
    pub job: Arc<Job>,
    pub header: [u8; 80],
    /// Full coinbase bytes with both extranonce halves in place.
    pub coinbase: Vec<u8>,
    /// Proof-of-work digest, wire order.
    pub pow_digest_le: [u8; 32],
    /// Block identification hash, wire order.
    pub block_hash_le: [u8; 32],
    pub worker: String,
    pub share_difficulty: f64,
}

impl BlockCandidate {
    pub fn block_hash_hex(&self) -> String {
        hex::encode(reverse32(&self.block_hash_le))
    }
}

#[derive(Clone)]
pub struct Submitter {
    primary: Arc<dyn ChainClient>,
    aux: Option<Arc<dyn ChainClient>>,
    events: EventBus,
    log: Arc<SubmissionLog>,
    /// Dedup of (chain, job id, block hash) already sent upstream.
    sent: Arc<DashMap<String, ()>>,
    timeout: Duration,
}

impl Submitter {
    pub fn new(
        primary: Arc<dyn ChainClient>,
        aux: Option<Arc<dyn ChainClient>>,
        events: EventBus,
        log: SubmissionLog,
        timeout: Duration,
    ) -> Self {
        Self {
            primary,
            aux,
            events,
            log: Arc::new(log),
            sent: Arc::new(DashMap::new()),
            timeout,
        }
    }

    /// Submit a full block to the primary chain. Non-blocking; returns the
    /// spawned task, or None when this (job, hash) was already sent.
    pub fn submit_primary(&self, candidate: BlockCandidate) -> Option<JoinHandle<()>> {
        let key = format!("primary:{}:{}", candidate.job.id, candidate.block_hash_hex());
        if self.sent.insert(key, ()).is_some() {
            warn!(
                "skipping duplicate primary submission for block {}",
                candidate.block_hash_hex()
            );
            return None;
        }

        let client = self.primary.clone();
        let events = self.events.clone();
        let log = self.log.clone();
        let timeout = self.timeout;

        Some(tokio::spawn(async move {
            let chain = client.chain_name().to_string();
            let height = candidate.job.height;
            let block = candidate.job.assemble_block(&candidate.header, &candidate.coinbase);
            let block_hex = hex::encode(&block);

            info!(
                "submitting {} block at height {} ({})",
                chain,
                height,
                candidate.block_hash_hex()
            );
            metrics::counter!("submission_block_total", "chain" => chain.clone()).increment(1);

            let outcome =
                tokio::time::timeout(timeout, client.submit_block(&block_hex)).await;
            let verdict = describe_outcome(&outcome);

            log.record(
                &chain,
                height,
                &candidate.job.id,
                primary_record(&candidate, &block_hex, &verdict),
            )
            .await;

            settle(&events, &chain, height, &candidate, outcome);
        }))
    }

    /// Submit an AuxPoW proof to the auxiliary chain. Independent of and
    /// unordered with respect to the primary submission.
    pub fn submit_aux(&self, candidate: BlockCandidate) -> Option<JoinHandle<()>> {
        let client = self.aux.clone()?;
        let Some(aux) = candidate.job.aux.clone() else {
            return None;
        };

        let key = format!("aux:{}:{}", candidate.job.id, candidate.block_hash_hex());
        if self.sent.insert(key, ()).is_some() {
            warn!(
                "skipping duplicate aux submission for block {}",
                candidate.block_hash_hex()
            );
            return None;
        }

        let events = self.events.clone();
        let log = self.log.clone();
        let timeout = self.timeout;

        Some(tokio::spawn(async move {
            let chain = client.chain_name().to_string();

            let proof = match AuxPowProof::build(
                candidate.coinbase.clone(),
                candidate.job.merkle_branch.clone(),
                candidate.header,
                candidate.block_hash_le,
            ) {
                Ok(proof) => proof,
                Err(e) => {
                    // Share-local invariant failure; shared state untouched.
                    error!("{} auxpow assembly failed: {}", chain, e);
                    return;
                }
            };

            let aux_hash_hex = hex::encode(aux.hash_be);
            let proof_hex = proof.to_hex();

            info!(
                "submitting {} auxpow for aux block {} at height {}",
                chain, aux_hash_hex, aux.height
            );
            metrics::counter!("submission_auxpow_total", "chain" => chain.clone()).increment(1);

            let outcome =
                tokio::time::timeout(timeout, client.submit_aux_block(&aux_hash_hex, &proof_hex))
                    .await;
            let verdict = describe_outcome(&outcome);

            log.record(
                &chain,
                aux.height,
                &candidate.job.id,
                aux_record(&candidate, &aux_hash_hex, &proof_hex, &verdict),
            )
            .await;

            settle(&events, &chain, aux.height, &candidate, outcome);
        }))
    }
}

type UpstreamCall = std::result::Result<crate::error::Result<SubmitOutcome>, tokio::time::error::Elapsed>;

fn describe_outcome(outcome: &UpstreamCall) -> String {
    match outcome {
        Ok(Ok(SubmitOutcome::Accepted)) => "accepted".to_string(),
        Ok(Ok(SubmitOutcome::Rejected(reason))) => format!("rejected: {reason}"),
        Ok(Err(e)) => format!("error: {e}"),
        Err(_) => "timed out".to_string(),
    }
}

fn settle(
    events: &EventBus,
    chain: &str,
    height: u64,
    candidate: &BlockCandidate,
    outcome: UpstreamCall,
) {
    match outcome {
        Ok(Ok(SubmitOutcome::Accepted)) => {
            info!(
                "{} BLOCK accepted at height {} by {} ({})",
                chain,
                height,
                candidate.worker,
                candidate.block_hash_hex()
            );
            metrics::counter!("submission_accepted_total", "chain" => chain.to_string())
                .increment(1);
            events.publish(Event::BlockFound {
                chain: chain.to_string(),
                height,
                block_hash: candidate.block_hash_hex(),
                worker: candidate.worker.clone(),
                share_difficulty: candidate.share_difficulty,
            });
        }
        Ok(Ok(SubmitOutcome::Rejected(reason))) => {
            error!("{} submission rejected at height {}: {}", chain, height, reason);
            metrics::counter!("submission_rejected_total", "chain" => chain.to_string())
                .increment(1);
            events.publish(Event::BlockRejected {
                chain: chain.to_string(),
                height,
                reason,
            });
        }
        Ok(Err(e)) => {
            // Transient upstream failure; the job has moved on, no retry.
            error!("{} submission failed at height {}: {}", chain, height, e);
            events.publish(Event::BlockRejected {
                chain: chain.to_string(),
                height,
                reason: e.to_string(),
            });
        }
        Err(_) => {
            error!("{} submission timed out at height {}", chain, height);
            events.publish(Event::BlockRejected {
                chain: chain.to_string(),
                height,
                reason: "submission timed out".to_string(),
            });
        }
    }
}

fn primary_record(candidate: &BlockCandidate, block_hex: &str, verdict: &str) -> String {
    format!(
        "=== BLOCK SUBMISSION ===\n\
         Time: {}\n\
         Worker: {}\n\
         Job ID: {}\n\
         Height: {}\n\
         Block Hash: {}\n\
         PoW Digest: {}\n\
         Share Difficulty: {:.8}\n\
         Header: {}\n\
         Coinbase: {}\n\
         Outcome: {}\n\n\
         Block Hex:\n{}\n",
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
        candidate.worker,
        candidate.job.id,
        candidate.job.height,
        candidate.block_hash_hex(),
        hex::encode(candidate.pow_digest_le),
        candidate.share_difficulty,
        hex::encode(candidate.header),
        hex::encode(&candidate.coinbase),
        verdict,
        block_hex,
    )
}

fn aux_record(
    candidate: &BlockCandidate,
    aux_hash_hex: &str,
    proof_hex: &str,
    verdict: &str,
) -> String {
    format!(
        "=== AUXPOW SUBMISSION ===\n\
         Time: {}\n\
         Worker: {}\n\
         Parent Job ID: {}\n\
         Aux Hash: {}\n\
         Parent Block Hash: {}\n\
         PoW Digest: {}\n\
         Outcome: {}\n\n\
         AuxPoW Hex:\n{}\n",
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
        candidate.worker,
        candidate.job.id,
        aux_hash_hex,
        candidate.block_hash_hex(),
        hex::encode(candidate.pow_digest_le),
        verdict,
        proof_hex,
    )
}
