pub mod job;
pub mod manager;
pub mod updater;

pub use job::{AuxJobInfo, Job};
pub use manager::JobManager;
pub use updater::TemplateUpdater;

use parking_lot::RwLock;

/// Seconds since the Unix epoch.
pub(crate) fn unix_time() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// The resolved primary-chain payout script hash.
///
/// A preconfigured address wins; otherwise the first successfully
/// authorized miner address becomes the fallback, released again once the
/// last miner disconnects.
#[derive(Debug)]
pub struct PayoutState {
    configured: Option<[u8; 20]>,
    learned: RwLock<Option<[u8; 20]>>,
}

impl PayoutState {
    pub fn new(configured: Option<[u8; 20]>) -> Self {
        Self {
            configured,
            learned: RwLock::new(None),
        }
    }

    pub fn resolve(&self) -> Option<[u8; 20]> {
        self.configured.or(*self.learned.read())
    }

    /// Record an authorized miner address; returns true when it became the
    /// fallback payout.
    pub fn learn(&self, pub_h160: [u8; 20]) -> bool {
        if self.configured.is_some() {
            return false;
        }
        let mut learned = self.learned.write();
        if learned.is_none() {
            *learned = Some(pub_h160);
            true
        } else {
            false
        }
    }

    /// Forget the learned fallback (all miners disconnected).
    pub fn reset_learned(&self) {
        if self.configured.is_none() {
            *self.learned.write() = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_address_wins() {
        let payout = PayoutState::new(Some([1; 20]));
        assert!(!payout.learn([2; 20]));
        assert_eq!(payout.resolve(), Some([1; 20]));
        payout.reset_learned();
        assert_eq!(payout.resolve(), Some([1; 20]));
    }

    #[test]
    fn first_authorized_becomes_fallback() {
        let payout = PayoutState::new(None);
        assert_eq!(payout.resolve(), None);
        assert!(payout.learn([2; 20]));
        assert!(!payout.learn([3; 20]));
        assert_eq!(payout.resolve(), Some([2; 20]));
        payout.reset_learned();
        assert_eq!(payout.resolve(), None);
    }
}
