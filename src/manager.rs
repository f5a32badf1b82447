//! Central coordinator wiring configuration, upstream clients, the job
//! layer, and the session-facing services together.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::config::validation::{MAX_SHARE_DIFFICULTY, MIN_SHARE_DIFFICULTY};
use crate::config::{ChainMode, Config};
use crate::error::Result;
use crate::events::EventBus;
use crate::job::updater::AuxUpstream;
use crate::job::{Job, JobManager, PayoutState, TemplateUpdater};
use crate::rpc::ChainClient;
use crate::session::address::decode_p2pkh_address;
use crate::session::extranonce::ExtranoncePool;
use crate::session::hashrate::HashrateTracker;
use crate::session::share::ShareProcessor;
use crate::submission::{SubmissionLog, Submitter};
use crate::vardiff::VarDiff;

pub struct Manager {
    config: Arc<Config>,
    jobs: Arc<JobManager>,
    updater: Arc<TemplateUpdater>,
    payout: Arc<PayoutState>,
    extranonces: Arc<ExtranoncePool>,
    shares: Arc<ShareProcessor>,
    hashrate: Arc<HashrateTracker>,
    vardiff: Option<Arc<VarDiff>>,
    events: EventBus,
    connections: AtomicUsize,
}

impl Manager {
    /// Wire up all subsystems for the configured mode. The aux client must
    /// be present exactly when the configuration carries an `[aux]` block.
    pub fn new(
        config: Arc<Config>,
        primary: Arc<dyn ChainClient>,
        aux: Option<Arc<dyn ChainClient>>,
    ) -> Result<Self> {
        let payout_h160 = match &config.primary.payout_address {
            Some(address) => Some(decode_p2pkh_address(address, config.primary.testnet)?),
            None => None,
        };
        let payout = Arc::new(PayoutState::new(payout_h160));

        let jobs = Arc::new(JobManager::new(config.mining.job_history_depth));
        let events = EventBus::default();

        let aux_upstream = match (&config.aux, &aux) {
            (Some(aux_config), Some(client)) => Some(AuxUpstream {
                client: client.clone(),
                payout_address: aux_config.payout_address.clone(),
            }),
            _ => None,
        };

        let updater = Arc::new(TemplateUpdater::new(
            primary.clone(),
            aux_upstream,
            jobs.clone(),
            payout.clone(),
            config.mining.clone(),
        ));

        let submitter = Submitter::new(
            primary,
            aux,
            events.clone(),
            SubmissionLog::new(config.mining.submit_history_dir.clone()),
            config.mining.submit_timeout,
        );

        let vardiff = config
            .vardiff
            .enabled
            .then(|| Arc::new(VarDiff::new(config.vardiff.clone())));
        let hashrate = Arc::new(HashrateTracker::new());

        let shares = Arc::new(ShareProcessor::new(
            jobs.clone(),
            submitter,
            vardiff.clone(),
            hashrate.clone(),
            events.clone(),
            Arc::new(config.mining.pow_algorithm),
        ));

        info!(
            "manager initialized in {} mode",
            if config.mode() == ChainMode::MergedMining {
                "merged-mining"
            } else {
                "primary-only"
            }
        );

        Ok(Self {
            config,
            jobs,
            updater,
            payout,
            extranonces: Arc::new(ExtranoncePool::new()),
            shares,
            hashrate,
            vardiff,
            events,
            connections: AtomicUsize::new(0),
        })
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn jobs(&self) -> &Arc<JobManager> {
        &self.jobs
    }

    pub fn updater(&self) -> &Arc<TemplateUpdater> {
        &self.updater
    }

    pub fn payout(&self) -> &Arc<PayoutState> {
        &self.payout
    }

    pub fn extranonces(&self) -> &Arc<ExtranoncePool> {
        &self.extranonces
    }

    pub fn shares(&self) -> &Arc<ShareProcessor> {
        &self.shares
    }

    pub fn hashrate(&self) -> &Arc<HashrateTracker> {
        &self.hashrate
    }

    pub fn vardiff(&self) -> Option<&Arc<VarDiff>> {
        self.vardiff.as_ref()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn connection_opened(&self) -> usize {
        self.connections.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Drop a connection; when the last miner leaves, the learned fallback
    /// payout address is released for the next miner to claim.
    pub fn connection_closed(&self) -> usize {
        let remaining = self
            .connections
            .fetch_sub(1, Ordering::Relaxed)
            .saturating_sub(1);
        if remaining == 0 {
            info!("all miners disconnected, releasing learned payout address");
            self.payout.reset_learned();
        }
        remaining
    }

    /// Difficulty to assign a session for a given job: vardiff when
    /// enabled, otherwise the static value or the divisor-scaled network
    /// difficulty, always clamped to sane bounds.
    pub fn assigned_difficulty(&self, worker: Option<&str>, job: &Job) -> f64 {
        let base = match (&self.vardiff, worker) {
            (Some(vardiff), Some(worker)) => vardiff.difficulty(worker),
            _ => match self.config.mining.static_share_difficulty {
                Some(fixed) => fixed,
                None => job.network_difficulty / self.config.mining.share_difficulty_divisor,
            },
        };
        base.clamp(MIN_SHARE_DIFFICULTY, MAX_SHARE_DIFFICULTY)
    }
}
