pub mod auxpow;
pub mod coinbase;
pub mod encode;
pub mod hash;
pub mod header;
pub mod merkle;
pub mod target;

pub use auxpow::{AuxPowProof, MergedCommitment, MERGED_MINING_MAGIC};
pub use coinbase::{CoinbaseParams, CoinbaseParts};
pub use hash::{sha256d, sha512d_256, PowAlgorithm, PowHash};
pub use target::Target;
