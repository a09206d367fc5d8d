//! Pull-based block synchronization.

pub mod request;

pub use request::{RequestManager, SyncConfig};
