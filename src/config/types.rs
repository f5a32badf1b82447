use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::consensus::hash::PowAlgorithm;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub server: ServerConfig,
    /// Primary chain node (template source and block sink).
    pub primary: ChainConfig,
    /// Auxiliary chain for merged mining; absent means primary-only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aux: Option<AuxChainConfig>,
    pub mining: MiningConfig,
    pub vardiff: VardiffConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Miner-facing bind address.
    pub bind_address: SocketAddr,
    /// Maximum concurrent miner connections.
    pub max_connections: usize,
    /// Idle miner connections are dropped after this window.
    pub idle_timeout: Duration,
    /// Quiet sessions get a difficulty refresh after this long.
    pub keepalive_after: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Short chain tag used in logs, events, and artifact filenames.
    pub name: String,
    /// JSON-RPC endpoint, e.g. "http://127.0.0.1:7332".
    pub rpc_url: String,
    pub rpc_user: String,
    pub rpc_pass: String,
    /// ZMQ `hashblock` endpoint; absent falls back to polling only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zmq_endpoint: Option<String>,
    /// Preconfigured payout address; otherwise the first authorized
    /// miner's address is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payout_address: Option<String>,
    pub testnet: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuxChainConfig {
    pub name: String,
    pub rpc_url: String,
    pub rpc_user: String,
    pub rpc_pass: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zmq_endpoint: Option<String>,
    /// Auxiliary payout address handed to `createauxblock`; required.
    pub payout_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningConfig {
    /// Proof-of-work hash shared by both chains' difficulty comparison.
    pub pow_algorithm: PowAlgorithm,
    /// Advertised share difficulty = network difficulty / divisor.
    pub share_difficulty_divisor: f64,
    /// Fixed share difficulty overriding the divisor when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_share_difficulty: Option<f64>,
    /// Advertise the easier of the two chain targets as the share basis.
    pub use_easier_target: bool,
    /// Signature tag embedded in the coinbase scriptSig.
    pub proxy_signature: String,
    /// Re-issue a job with a fresh timestamp after this long.
    pub time_roll: Duration,
    /// Template poll cadence when block notifications are active.
    pub poll_interval: Duration,
    /// Jobs kept for late shares before being treated as stale.
    pub job_history_depth: usize,
    /// Per-chain upstream submission deadline.
    pub submit_timeout: Duration,
    /// Directory receiving one immutable record per submission attempt.
    pub submit_history_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VardiffConfig {
    pub enabled: bool,
    /// Desired seconds between shares per miner.
    pub target_share_time: f64,
    pub min_difficulty: f64,
    pub max_difficulty: f64,
    pub start_difficulty: f64,
    /// Retarget after this many shares or after `retarget_time`.
    pub retarget_shares: usize,
    pub retarget_time: f64,
    pub up_step: f64,
    pub down_step: f64,
    pub ema_alpha: f64,
    /// Idle seconds before difficulty decays toward the minimum.
    pub inactivity_lower: f64,
    pub inactivity_multiples: f64,
    pub inactivity_drop_factor: f64,
    /// Fraction of chain difficulty used as the per-miner cap.
    pub chain_headroom: f64,
}

/// Operating mode, resolved once at startup rather than branched
/// per-request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainMode {
    PrimaryOnly,
    MergedMining,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:54321".parse().expect("static address"),
            max_connections: 1000,
            idle_timeout: Duration::from_secs(300),
            keepalive_after: Duration::from_secs(45),
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            name: "RXD".to_string(),
            rpc_url: "http://127.0.0.1:7332".to_string(),
            rpc_user: String::new(),
            rpc_pass: String::new(),
            zmq_endpoint: None,
            payout_address: None,
            testnet: false,
        }
    }
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            pow_algorithm: PowAlgorithm::default(),
            share_difficulty_divisor: 16384.0,
            static_share_difficulty: None,
            use_easier_target: false,
            proxy_signature: "/rxd-stratum/".to_string(),
            time_roll: Duration::from_secs(30),
            poll_interval: Duration::from_secs(10),
            job_history_depth: 8,
            submit_timeout: Duration::from_secs(10),
            submit_history_dir: "./submit_history".to_string(),
        }
    }
}

impl Default for VardiffConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            target_share_time: 15.0,
            min_difficulty: 100.0,
            max_difficulty: 10_000_000.0,
            start_difficulty: 10_000.0,
            retarget_shares: 20,
            retarget_time: 300.0,
            up_step: 2.0,
            down_step: 0.5,
            ema_alpha: 0.3,
            inactivity_lower: 90.0,
            inactivity_multiples: 6.0,
            inactivity_drop_factor: 0.5,
            chain_headroom: 0.9,
        }
    }
}

impl Config {
    pub fn mode(&self) -> ChainMode {
        if self.aux.is_some() {
            ChainMode::MergedMining
        } else {
            ChainMode::PrimaryOnly
        }
    }

    /// Load configuration from a TOML file.
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> crate::Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|_| {
            crate::error::ConfigError::FileNotFound {
                path: path.as_ref().display().to_string(),
            }
        })?;
        let config: Config =
            toml::from_str(&content).map_err(|e| crate::error::ConfigError::InvalidFormat {
                message: e.to_string(),
            })?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mode_is_primary_only() {
        let config = Config::default();
        assert_eq!(config.mode(), ChainMode::PrimaryOnly);
    }

    #[test]
    fn aux_section_enables_merged_mining() {
        let mut config = Config::default();
        config.aux = Some(AuxChainConfig {
            name: "AUX".into(),
            rpc_url: "http://127.0.0.1:8332".into(),
            rpc_user: "u".into(),
            rpc_pass: "p".into(),
            zmq_endpoint: None,
            payout_address: "aux-address".into(),
        });
        assert_eq!(config.mode(), ChainMode::MergedMining);
    }

    #[test]
    fn round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.server.max_connections, config.server.max_connections);
        assert_eq!(parsed.mining.time_roll, config.mining.time_roll);
    }
}
