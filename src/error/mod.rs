//! Error taxonomy for the relay.
//!
//! Per-share and per-connection errors are local and non-propagating: one
//! miner's bad share or disconnect never affects others. Upstream errors
//! are process-wide but recoverable; the job layer keeps serving the last
//! known-good job while retrying.

use std::time::Duration;

use thiserror::Error;

/// Stratum wire error codes, per the de-facto protocol convention.
pub mod codes {
    pub const OTHER: i32 = 20;
    pub const JOB_NOT_FOUND: i32 = 21;
    pub const DUPLICATE_SHARE: i32 = 22;
    pub const LOW_DIFFICULTY: i32 = 23;
    pub const UNAUTHORIZED: i32 = 24;
    pub const NOT_SUBSCRIBED: i32 = 25;
}

#[derive(Error, Debug)]
pub enum StratumError {
    /// Malformed Stratum request; rejects the single request, not the
    /// connection, unless persistent.
    #[error("Protocol error: {message}")]
    Protocol {
        message: String,
        method: Option<String>,
    },

    /// Share references a job evicted from history.
    #[error("Stale job: {job_id}")]
    StaleJob { job_id: String },

    /// Identical (job id, extranonce, time, nonce) tuple was already seen.
    #[error("Duplicate share for job {job_id}")]
    DuplicateShare { job_id: String },

    /// Share hash is above the session's assigned share target.
    #[error("Low difficulty share: {share_difficulty:.8} < {required:.8}")]
    LowDifficulty {
        share_difficulty: f64,
        required: f64,
    },

    /// Session not in the state the request requires.
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    /// Transient upstream failure: node syncing or unreachable. Template
    /// refresh retries with backoff; submissions are abandoned.
    #[error("Upstream unavailable ({chain}): {message}")]
    UpstreamUnavailable { chain: String, message: String },

    /// Permanent rejection of one specific submission.
    #[error("Upstream rejected ({chain}): {reason}")]
    UpstreamRejected { chain: String, reason: String },

    /// Internal invariant violation while assembling a consensus object.
    /// Fatal to the share at hand only; shared job state is untouched.
    #[error("Consensus build error: {message}")]
    ConsensusBuild { message: String },

    #[error("Connection timeout after {timeout:?}")]
    ConnectionTimeout { timeout: Duration },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-specific errors.
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid configuration format: {message}")]
    InvalidFormat { message: String },
}

impl StratumError {
    /// Stratum error code reported to miners for share/request rejections.
    pub fn stratum_code(&self) -> i32 {
        match self {
            StratumError::StaleJob { .. } => codes::JOB_NOT_FOUND,
            StratumError::DuplicateShare { .. } => codes::DUPLICATE_SHARE,
            StratumError::LowDifficulty { .. } => codes::LOW_DIFFICULTY,
            StratumError::Unauthorized { .. } => codes::UNAUTHORIZED,
            _ => codes::OTHER,
        }
    }

    /// Whether a refresh/submission path may retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StratumError::UpstreamUnavailable { .. }
                | StratumError::ConnectionTimeout { .. }
                | StratumError::Io(_)
        )
    }

    /// Whether the error is local to a single share or request.
    pub fn is_share_local(&self) -> bool {
        matches!(
            self,
            StratumError::Protocol { .. }
                | StratumError::StaleJob { .. }
                | StratumError::DuplicateShare { .. }
                | StratumError::LowDifficulty { .. }
                | StratumError::Unauthorized { .. }
                | StratumError::ConsensusBuild { .. }
        )
    }
}

/// Result type alias for the relay.
pub type Result<T> = std::result::Result<T, StratumError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn share_errors_map_to_wire_codes() {
        let stale = StratumError::StaleJob {
            job_id: "689".into(),
        };
        assert_eq!(stale.stratum_code(), codes::JOB_NOT_FOUND);
        assert!(stale.is_share_local());

        let dup = StratumError::DuplicateShare {
            job_id: "689".into(),
        };
        assert_eq!(dup.stratum_code(), codes::DUPLICATE_SHARE);

        let low = StratumError::LowDifficulty {
            share_difficulty: 0.5,
            required: 1.0,
        };
        assert_eq!(low.stratum_code(), codes::LOW_DIFFICULTY);
    }

    #[test]
    fn upstream_classification() {
        let unavailable = StratumError::UpstreamUnavailable {
            chain: "RXD".into(),
            message: "connection refused".into(),
        };
        assert!(unavailable.is_transient());
        assert!(!unavailable.is_share_local());

        let rejected = StratumError::UpstreamRejected {
            chain: "RXD".into(),
            reason: "high-hash".into(),
        };
        assert!(!rejected.is_transient());
    }
}
