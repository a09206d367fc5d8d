//! Full-node assembly: configuration, mempool, and component wiring.

pub mod config;
pub mod mempool;
#[allow(clippy::module_inception)]
pub mod node;

pub use config::{ChainConfig, ConsensusSettings, NodeConfig, StorageConfig, SyncSettings, ValidatorConfig};
pub use mempool::Mempool;
pub use node::MeridianNode;
