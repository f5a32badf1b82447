pub mod types;
pub mod validation;

pub use types::{
    AuxChainConfig, ChainConfig, ChainMode, Config, MiningConfig, ServerConfig, VardiffConfig,
};
