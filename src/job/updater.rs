//! Template refresh and job derivation.
//!
//! One updater owns the latest primary template (and aux block when merged
//! mining). Refresh triggers (the poll timer, block notifications, a
//! forced kick) are serialized on an internal mutex; job readers only
//! ever see the atomic publication in [`JobManager`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{ChainMode, MiningConfig};
use crate::consensus::auxpow::MergedCommitment;
use crate::consensus::coinbase::{build_coinbase, CoinbaseParams};
use crate::consensus::encode::reverse32;
use crate::consensus::merkle::branch_for_index0;
use crate::error::Result;
use crate::job::job::{AuxJobInfo, Job};
use crate::job::manager::JobManager;
use crate::job::{unix_time, PayoutState};
use crate::rpc::types::{AuxBlock, BlockTemplate};
use crate::rpc::ChainClient;

/// Lifecycle of a chain's template within the updater.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplatePhase {
    Empty,
    Fetching,
    Ready,
    Stale,
}

/// Auxiliary upstream wiring for merged mining.
pub struct AuxUpstream {
    pub client: Arc<dyn ChainClient>,
    pub payout_address: String,
}

struct UpdaterState {
    template: Option<BlockTemplate>,
    aux_block: Option<AuxBlock>,
    phase: TemplatePhase,
    aux_phase: TemplatePhase,
    last_job_at: Option<Instant>,
}

pub struct TemplateUpdater {
    primary: Arc<dyn ChainClient>,
    aux: Option<AuxUpstream>,
    jobs: Arc<JobManager>,
    payout: Arc<PayoutState>,
    mining: MiningConfig,
    state: tokio::sync::Mutex<UpdaterState>,
}

impl TemplateUpdater {
    pub fn new(
        primary: Arc<dyn ChainClient>,
        aux: Option<AuxUpstream>,
        jobs: Arc<JobManager>,
        payout: Arc<PayoutState>,
        mining: MiningConfig,
    ) -> Self {
        Self {
            primary,
            aux,
            jobs,
            payout,
            mining,
            state: tokio::sync::Mutex::new(UpdaterState {
                template: None,
                aux_block: None,
                phase: TemplatePhase::Empty,
                aux_phase: TemplatePhase::Empty,
                last_job_at: None,
            }),
        }
    }

    pub fn mode(&self) -> ChainMode {
        if self.aux.is_some() {
            ChainMode::MergedMining
        } else {
            ChainMode::PrimaryOnly
        }
    }

    /// Current (primary, aux) template lifecycle phases.
    pub async fn phases(&self) -> (TemplatePhase, TemplatePhase) {
        let st = self.state.lock().await;
        (st.phase, st.aux_phase)
    }

    /// Fetch fresh upstream material and publish a job when warranted.
    ///
    /// Returns true when a new job was broadcast. Concurrent callers are
    /// serialized; a failure leaves the previous template and job intact.
    pub async fn refresh(&self, force: bool) -> Result<bool> {
        let mut st = self.state.lock().await;

        let prior_phase = st.phase;
        st.phase = TemplatePhase::Fetching;
        let template = match self.primary.fetch_template().await {
            Ok(template) => template,
            Err(e) => {
                // Keep serving the last known-good job while retrying.
                st.phase = prior_phase;
                return Err(e);
            }
        };

        let aux_block = match &self.aux {
            Some(aux) => {
                st.aux_phase = TemplatePhase::Fetching;
                match aux.client.fetch_aux_block(&aux.payout_address).await {
                    Ok(block) => {
                        st.aux_phase = TemplatePhase::Ready;
                        Some(block)
                    }
                    Err(e) => {
                        // Aux outage degrades to the previous aux block
                        // (or primary-only work), never stalls the primary.
                        warn!(
                            "{} aux block fetch failed, reusing previous: {}",
                            aux.client.chain_name(),
                            e
                        );
                        st.aux_phase = TemplatePhase::Stale;
                        st.aux_block.clone()
                    }
                }
            }
            None => None,
        };

        let new_block = match &st.template {
            Some(prior) => {
                prior.height != template.height || prior.prev_hash_be != template.prev_hash_be
            }
            None => true,
        };
        let aux_changed = match (&st.aux_block, &aux_block) {
            (Some(prior), Some(fresh)) => prior.hash_be != fresh.hash_be,
            (None, Some(_)) => true,
            _ => false,
        };
        let roll_due = st
            .last_job_at
            .map(|at| at.elapsed() >= self.mining.time_roll)
            .unwrap_or(true);

        if new_block || aux_changed {
            st.phase = TemplatePhase::Stale;
        }

        if !(new_block || aux_changed || roll_due || force) {
            st.template = Some(template);
            st.phase = TemplatePhase::Ready;
            return Ok(false);
        }

        let Some(payout) = self.payout.resolve() else {
            // No payout address yet: remember the template and wait for
            // the first miner to authorize.
            debug!("template ready at height {} but no payout address yet", template.height);
            st.template = Some(template);
            st.aux_block = aux_block;
            st.phase = TemplatePhase::Ready;
            return Ok(false);
        };

        let clean = new_block || aux_changed;
        let job = self.build_job(&template, aux_block.as_ref(), payout, clean)?;
        let id = job.id.clone();
        let height = job.height;

        st.template = Some(template);
        st.aux_block = aux_block;
        st.last_job_at = Some(Instant::now());
        st.phase = TemplatePhase::Ready;
        drop(st);

        self.jobs.publish(job);
        if clean {
            info!("new job {} at height {} (clean)", id, height);
        } else {
            debug!("time-rolled job {} at height {}", id, height);
        }
        Ok(true)
    }

    /// Derive an immutable job from the current upstream material.
    fn build_job(
        &self,
        template: &BlockTemplate,
        aux_block: Option<&AuxBlock>,
        payout_pub_h160: [u8; 20],
        clean: bool,
    ) -> Result<Job> {
        let merged_commitment = aux_block.map(|aux| MergedCommitment::single(aux.hash_le()));

        let coinbase = build_coinbase(&CoinbaseParams {
            height: template.height,
            signature: self.mining.proxy_signature.as_bytes(),
            payout_pub_h160,
            value: template.coinbase_value,
            extra_outputs: &template.extra_outputs,
            merged_commitment,
        })?;

        // Branch siblings on the index-0 path never include the coinbase
        // leaf, so a placeholder id yields the template's true branch.
        let mut txids: Vec<[u8; 32]> = Vec::with_capacity(template.transactions.len() + 1);
        txids.push([0u8; 32]);
        txids.extend(template.transactions.iter().map(|tx| tx.txid_le));
        let merkle_branch = branch_for_index0(&txids);

        let primary_difficulty = template.target.difficulty();
        let network_difficulty = match aux_block {
            Some(aux) if self.mining.use_easier_target => {
                primary_difficulty.min(aux.target.difficulty())
            }
            _ => primary_difficulty,
        };

        let time = (unix_time() as u32).max(template.min_time);

        Ok(Job {
            id: self.jobs.next_job_id(),
            height: template.height,
            version: template.version,
            prev_hash_le: reverse32(&template.prev_hash_be),
            coinbase,
            merkle_branch,
            bits: template.bits,
            time,
            clean,
            primary_target: template.target,
            aux: aux_block.map(|aux| AuxJobInfo {
                chain: self
                    .aux
                    .as_ref()
                    .map(|a| a.client.chain_name().to_string())
                    .unwrap_or_else(|| "AUX".to_string()),
                hash_be: aux.hash_be,
                target: aux.target,
                height: aux.height,
                chain_id: aux.chain_id,
            }),
            network_difficulty,
            external_txs: template.transactions.iter().map(|tx| tx.raw.clone()).collect(),
        })
    }

    /// Periodic refresh task; the polling fallback when notifications are
    /// absent and the time-roll driver otherwise.
    pub fn spawn_poll_loop(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut backoff = Duration::from_secs(1);
            loop {
                match self.refresh(false).await {
                    Ok(_) => {
                        backoff = Duration::from_secs(1);
                        tokio::time::sleep(interval).await;
                    }
                    Err(e) => {
                        error!("template refresh failed: {}", e);
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(Duration::from_secs(30));
                    }
                }
            }
        })
    }
}
