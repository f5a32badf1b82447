//! Share decoding and validation, the hot path.
//!
//! Pure CPU work against an immutable job snapshot: no network I/O and no
//! locks beyond the dedup map. Upstream submission is handed off to the
//! submitter as independent tasks, so the miner's accept response never
//! waits on a daemon.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::consensus::hash::{display_hash, sha256d, PowHash};
use crate::consensus::header::build_header;
use crate::consensus::merkle::fold_branch_index0;
use crate::consensus::target::Target;
use crate::error::{Result, StratumError};
use crate::events::{Event, EventBus};
use crate::job::{Job, JobManager};
use crate::session::extranonce::EXTRANONCE2_SIZE;
use crate::session::hashrate::HashrateTracker;
use crate::submission::{BlockCandidate, Submitter};
use crate::vardiff::VarDiff;

/// Shares within this fraction of the assigned difficulty still count;
/// absorbs float rounding between miner and relay.
const DIFFICULTY_TOLERANCE: f64 = 0.99;

/// A decoded `mining.submit`.
#[derive(Debug, Clone)]
pub struct ShareSubmit {
    pub worker: String,
    pub job_id: String,
    pub extranonce2: [u8; EXTRANONCE2_SIZE],
    pub ntime: u32,
    pub nonce: u32,
}

/// What a processed share produced.
#[derive(Debug)]
pub struct ShareOutcome {
    pub share_difficulty: f64,
    pub primary_block: bool,
    pub aux_block: bool,
    /// Difficulty retarget to push to the miner, when vardiff moved.
    pub vardiff_update: Option<f64>,
    /// Spawned upstream submissions (one per chain target met).
    pub submissions: Vec<JoinHandle<()>>,
}

/// Parse `mining.submit` parameters, positional or named.
///
/// Some mining software sends extras (`rigid`, `login`, `pass`); unknown
/// keys are ignored rather than rejected.
pub fn parse_submit(params: Option<&Value>) -> Result<ShareSubmit> {
    let malformed = |message: &str| StratumError::Protocol {
        message: message.to_string(),
        method: Some("mining.submit".to_string()),
    };

    let params = params.ok_or_else(|| malformed("missing parameters"))?;

    let (worker, job_id, extranonce2_hex, ntime_hex, nonce_hex) = if let Some(arr) =
        params.as_array()
    {
        let field = |i: usize| arr.get(i).and_then(Value::as_str);
        (
            field(0).map(str::to_string),
            field(1).map(str::to_string),
            field(2).map(str::to_string),
            field(3).map(str::to_string),
            field(4).map(str::to_string),
        )
    } else if let Some(obj) = params.as_object() {
        let field = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| obj.get(*k))
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        (
            field(&["worker", "login"]),
            field(&["job_id"]),
            field(&["extranonce2", "extranonce2_hex"]),
            field(&["ntime", "ntime_hex"]),
            field(&["nonce", "nonce_hex"]),
        )
    } else {
        return Err(malformed("parameters must be an array or object"));
    };

    let worker = worker.ok_or_else(|| malformed("missing worker"))?;
    let job_id = job_id.ok_or_else(|| malformed("missing job_id"))?;
    let extranonce2_hex = extranonce2_hex.ok_or_else(|| malformed("missing extranonce2"))?;
    let ntime_hex = ntime_hex.ok_or_else(|| malformed("missing ntime"))?;
    let nonce_hex = nonce_hex.ok_or_else(|| malformed("missing nonce"))?;

    let extranonce2: [u8; EXTRANONCE2_SIZE] = hex::decode(&extranonce2_hex)
        .map_err(|e| malformed(&format!("bad extranonce2 hex: {e}")))?
        .try_into()
        .map_err(|_| malformed("extranonce2 must be 4 bytes"))?;

    Ok(ShareSubmit {
        worker,
        job_id,
        extranonce2,
        ntime: crate::consensus::encode::u32_from_be_hex(&ntime_hex)?,
        nonce: crate::consensus::encode::u32_from_be_hex(&nonce_hex)?,
    })
}

pub struct ShareProcessor {
    jobs: Arc<JobManager>,
    submitter: Submitter,
    vardiff: Option<Arc<VarDiff>>,
    hashrate: Arc<HashrateTracker>,
    events: EventBus,
    pow: Arc<dyn PowHash>,
    seen: DashMap<String, ()>,
}

impl ShareProcessor {
    pub fn new(
        jobs: Arc<JobManager>,
        submitter: Submitter,
        vardiff: Option<Arc<VarDiff>>,
        hashrate: Arc<HashrateTracker>,
        events: EventBus,
        pow: Arc<dyn PowHash>,
    ) -> Self {
        Self {
            jobs,
            submitter,
            vardiff,
            hashrate,
            events,
            pow,
            seen: DashMap::new(),
        }
    }

    /// Invalidate dedup bookkeeping when outstanding work is discarded.
    pub fn on_new_job(&self, job: &Job) {
        if job.clean {
            self.seen.clear();
        }
    }

    /// Validate one share and dispatch any upstream submissions.
    pub fn process(
        &self,
        extranonce1: u32,
        assigned_difficulty: f64,
        share: &ShareSubmit,
    ) -> Result<ShareOutcome> {
        metrics::counter!("share_submitted_total").increment(1);

        // 1. The referenced job must still be in history.
        let job = self.jobs.get(&share.job_id).ok_or_else(|| {
            debug!("share for unknown/evicted job {}", share.job_id);
            StratumError::StaleJob {
                job_id: share.job_id.clone(),
            }
        })?;

        // 2. Exact resubmissions are rejected with no side effects.
        let dedup_key = format!(
            "{}:{:08x}:{}:{:08x}:{:08x}",
            share.job_id,
            extranonce1,
            hex::encode(share.extranonce2),
            share.ntime,
            share.nonce
        );
        if self.seen.insert(dedup_key, ()).is_some() {
            metrics::counter!("share_duplicate_total").increment(1);
            return Err(StratumError::DuplicateShare {
                job_id: share.job_id.clone(),
            });
        }

        // 3. Reassemble the coinbase and recompute the merkle root.
        let mut extranonce = [0u8; 8];
        extranonce[..4].copy_from_slice(&extranonce1.to_be_bytes());
        extranonce[4..].copy_from_slice(&share.extranonce2);
        let coinbase = job.coinbase.assemble(&extranonce)?;
        let coinbase_txid = sha256d(&coinbase);
        let merkle_root = fold_branch_index0(&coinbase_txid, &job.merkle_branch);

        // 4. Build the header and hash it.
        let header = build_header(
            job.version,
            &job.prev_hash_le,
            &merkle_root,
            share.ntime,
            job.bits,
            share.nonce,
        );
        let pow_digest = self.pow.pow_hash(&header);
        let share_difficulty = Target::digest_difficulty(&pow_digest);

        // 5/6. Dual-target evaluation: the share target gates acceptance,
        // each chain's network target is tested independently.
        let primary_block = job.primary_target.met_by(&pow_digest);
        let aux_block = job
            .aux
            .as_ref()
            .map(|aux| aux.target.met_by(&pow_digest))
            .unwrap_or(false);

        if !primary_block && !aux_block
            && share_difficulty < assigned_difficulty * DIFFICULTY_TOLERANCE
        {
            self.hashrate.add_share(&share.worker, assigned_difficulty, false);
            metrics::counter!("share_rejected_total").increment(1);
            return Err(StratumError::LowDifficulty {
                share_difficulty,
                required: assigned_difficulty,
            });
        }

        // Accepted: bookkeeping uses the assigned difficulty to avoid
        // conditional upward bias in the hashrate estimate.
        self.hashrate.add_share(&share.worker, assigned_difficulty, true);
        metrics::counter!("share_accepted_total").increment(1);
        metrics::histogram!("share_difficulty").record(share_difficulty);

        let vardiff_update = self
            .vardiff
            .as_ref()
            .and_then(|v| v.record_share(&share.worker, job.network_difficulty));

        self.events.publish(Event::ShareAccepted {
            worker: share.worker.clone(),
            share_difficulty,
            is_block: primary_block || aux_block,
        });

        info!(
            "share accepted from {} diff {:.4}{}{}",
            share.worker,
            share_difficulty,
            if primary_block { " (PRIMARY BLOCK!)" } else { "" },
            if aux_block { " (AUX BLOCK!)" } else { "" },
        );

        // 7. Submissions are unordered and non-blocking per chain; the
        // share is reported accepted regardless of upstream fate.
        let mut submissions = Vec::new();
        if primary_block || aux_block {
            let candidate = BlockCandidate {
                job: job.clone(),
                header,
                coinbase,
                pow_digest_le: pow_digest,
                block_hash_le: display_hash(&header),
                worker: share.worker.clone(),
                share_difficulty,
            };
            if primary_block {
                submissions.extend(self.submitter.submit_primary(candidate.clone()));
            }
            if aux_block {
                submissions.extend(self.submitter.submit_aux(candidate));
            }
        }

        Ok(ShareOutcome {
            share_difficulty,
            primary_block,
            aux_block,
            vardiff_update,
            submissions,
        })
    }
}
