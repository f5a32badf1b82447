use crate::config::Config;
use crate::error::{ConfigError, Result};

/// Bounds applied to the configured or miner-facing share difficulty.
pub const MIN_SHARE_DIFFICULTY: f64 = 0.001;
pub const MAX_SHARE_DIFFICULTY: f64 = 10_000_000.0;

impl Config {
    /// Validate configuration before startup; every failure names the
    /// offending field.
    pub fn validate(&self) -> Result<()> {
        if self.server.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.max_connections".into(),
                message: "must be greater than zero".into(),
            }
            .into());
        }
        if self.server.idle_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "server.idle_timeout".into(),
                message: "must be greater than zero".into(),
            }
            .into());
        }

        if self.primary.rpc_user.is_empty() || self.primary.rpc_pass.is_empty() {
            return Err(ConfigError::MissingField {
                field: "primary.rpc_user / primary.rpc_pass".into(),
            }
            .into());
        }

        if let Some(aux) = &self.aux {
            if aux.payout_address.is_empty() {
                return Err(ConfigError::MissingField {
                    field: "aux.payout_address".into(),
                }
                .into());
            }
            if aux.rpc_url.is_empty() {
                return Err(ConfigError::MissingField {
                    field: "aux.rpc_url".into(),
                }
                .into());
            }
        }

        if self.mining.share_difficulty_divisor <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "mining.share_difficulty_divisor".into(),
                message: "must be positive".into(),
            }
            .into());
        }
        if let Some(diff) = self.mining.static_share_difficulty {
            if !(MIN_SHARE_DIFFICULTY..=MAX_SHARE_DIFFICULTY).contains(&diff) {
                return Err(ConfigError::InvalidValue {
                    field: "mining.static_share_difficulty".into(),
                    message: format!(
                        "must be within {MIN_SHARE_DIFFICULTY}..={MAX_SHARE_DIFFICULTY}"
                    ),
                }
                .into());
            }
        }
        if self.mining.time_roll.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "mining.time_roll".into(),
                message: "must be greater than zero".into(),
            }
            .into());
        }
        if self.mining.job_history_depth == 0 {
            return Err(ConfigError::InvalidValue {
                field: "mining.job_history_depth".into(),
                message: "must retain at least the current job".into(),
            }
            .into());
        }

        if self.vardiff.enabled {
            let v = &self.vardiff;
            if v.min_difficulty <= 0.0 || v.max_difficulty < v.min_difficulty {
                return Err(ConfigError::InvalidValue {
                    field: "vardiff.min_difficulty / vardiff.max_difficulty".into(),
                    message: "need 0 < min <= max".into(),
                }
                .into());
            }
            if v.target_share_time <= 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: "vardiff.target_share_time".into(),
                    message: "must be positive".into(),
                }
                .into());
            }
            if !(0.0..=1.0).contains(&v.chain_headroom) || v.chain_headroom == 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: "vardiff.chain_headroom".into(),
                    message: "must be within (0, 1]".into(),
                }
                .into());
            }
        }

        Ok(())
    }
}
