//! Job publication, history, and broadcast.
//!
//! Writers are exactly the template updater; readers are every session
//! broadcast and every share validation. Publication is an atomic swap of
//! a fully built job, never field-level mutation.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::debug;

use crate::job::job::Job;
use crate::job::unix_time;

#[derive(Debug)]
pub struct JobManager {
    current: RwLock<Option<Arc<Job>>>,
    history: DashMap<String, Arc<Job>>,
    order: Mutex<VecDeque<String>>,
    depth: usize,
    sender: broadcast::Sender<Arc<Job>>,
    last_id: AtomicU64,
}

impl JobManager {
    pub fn new(depth: usize) -> Self {
        let (sender, _) = broadcast::channel(64);
        Self {
            current: RwLock::new(None),
            history: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            depth: depth.max(1),
            sender,
            last_id: AtomicU64::new(0),
        }
    }

    /// The job currently being broadcast, if any.
    pub fn current(&self) -> Option<Arc<Job>> {
        self.current.read().clone()
    }

    /// Look up a job still retained for late shares.
    pub fn get(&self, id: &str) -> Option<Arc<Job>> {
        self.history.get(id).map(|entry| entry.clone())
    }

    /// New-job notifications for mining sessions.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Job>> {
        self.sender.subscribe()
    }

    /// Time-based job id, strictly increasing even within one second.
    pub fn next_job_id(&self) -> String {
        let now = unix_time();
        let id = self
            .last_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .expect("fetch_update closure always returns Some");
        format!("{:x}", now.max(id + 1))
    }

    /// Publish a fully built job: swap the current snapshot, retain it in
    /// history, prune beyond the retention depth, notify sessions.
    pub fn publish(&self, job: Job) -> Arc<Job> {
        let job = Arc::new(job);

        if job.clean {
            // Outstanding work on prior jobs is invalid; drop them now so
            // late shares classify as stale.
            self.history.clear();
            self.order.lock().clear();
        }

        self.history.insert(job.id.clone(), job.clone());
        {
            let mut order = self.order.lock();
            order.push_back(job.id.clone());
            while order.len() > self.depth {
                if let Some(evicted) = order.pop_front() {
                    self.history.remove(&evicted);
                }
            }
        }

        *self.current.write() = Some(job.clone());

        metrics::counter!("job_published_total").increment(1);
        debug!(
            "published job {} height={} clean={} (history: {})",
            job.id,
            job.height,
            job.clean,
            self.history.len()
        );

        let _ = self.sender.send(job.clone());
        job
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::coinbase::CoinbaseParts;
    use crate::consensus::target::Target;

    fn job(id: &str, clean: bool) -> Job {
        Job {
            id: id.into(),
            height: 1,
            version: 1,
            prev_hash_le: [0; 32],
            coinbase: CoinbaseParts {
                prefix: vec![],
                suffix: vec![],
            },
            merkle_branch: vec![],
            bits: 0x1d00ffff,
            time: 0,
            clean,
            primary_target: Target::from_compact(0x1d00ffff).unwrap(),
            aux: None,
            network_difficulty: 1.0,
            external_txs: vec![],
        }
    }

    #[test]
    fn history_prunes_beyond_depth() {
        let manager = JobManager::new(2);
        manager.publish(job("a", false));
        manager.publish(job("b", false));
        manager.publish(job("c", false));

        assert!(manager.get("a").is_none());
        assert!(manager.get("b").is_some());
        assert!(manager.get("c").is_some());
        assert_eq!(manager.current().unwrap().id, "c");
    }

    #[test]
    fn clean_job_clears_prior_history() {
        let manager = JobManager::new(8);
        manager.publish(job("a", false));
        manager.publish(job("b", false));
        manager.publish(job("c", true));

        assert!(manager.get("a").is_none());
        assert!(manager.get("b").is_none());
        assert!(manager.get("c").is_some());
    }

    #[test]
    fn job_ids_strictly_increase() {
        let manager = JobManager::new(2);
        let a = u64::from_str_radix(&manager.next_job_id(), 16).unwrap();
        let b = u64::from_str_radix(&manager.next_job_id(), 16).unwrap();
        let c = u64::from_str_radix(&manager.next_job_id(), 16).unwrap();
        assert!(a < b && b < c);
    }

    #[tokio::test]
    async fn publish_notifies_subscribers() {
        let manager = JobManager::new(2);
        let mut rx = manager.subscribe();
        manager.publish(job("a", true));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.id, "a");
    }

    #[test]
    fn issued_jobs_survive_replacement() {
        // A session holding an Arc<Job> must observe identical fields
        // after the manager moves on.
        let manager = JobManager::new(1);
        let issued = manager.publish(job("a", false));
        manager.publish(job("b", true));

        assert_eq!(issued.id, "a");
        assert_eq!(issued.height, 1);
        assert!(manager.get("a").is_none());
    }
}
