//! Meridian Protocol Core Library
//!
//! A permissioned proof-of-stake blockchain node with three peer roles:
//! - Validators propose and finalize blocks via BFT-style voting
//! - Lightnings co-sign checkpoint blocks with aggregated votes
//! - Edge nodes receive bandwidth-weighted rewards
//!
//! The chain carries two native tokens (SCPT for stake, SPAY for gas
//! and fees) over a Merkle-committed ledger state.

pub mod chain;
pub mod consensus;
pub mod crypto;
pub mod errors;
pub mod ledger;
pub mod network;
pub mod node;
pub mod storage;
pub mod sync;
pub mod types;

// Re-export core types for convenience
pub use chain::Chain;
pub use consensus::{ConsensusEngine, LightningEngine, ProposerStrategy};
pub use errors::CoreError;
pub use ledger::{Ledger, LicenseGate};
pub use network::{Dispatcher, InProcessDispatcher, PeerId};
pub use node::{MeridianNode, NodeConfig};
pub use sync::RequestManager;
pub use types::{Address, Coins, Hash};
