//! Consensus: the epoch state machine, proposer selection, and
//! lightning-committee vote aggregation.

pub mod engine;
pub mod lightning;
pub mod proposer;

pub use engine::{ConsensusConfig, ConsensusEngine, ConsensusMessage, NoTxProvider, TxProvider};
pub use lightning::{LightningConfig, LightningEngine};
pub use proposer::{ProposerStrategy, ValidatorManager};
