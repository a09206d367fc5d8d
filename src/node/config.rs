//! Node configuration.

use crate::consensus::{ConsensusConfig, LightningConfig, ProposerStrategy};
use crate::sync::SyncConfig;
use crate::types::Hash;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Full node configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    pub chain: ChainConfig,
    pub consensus: ConsensusSettings,
    pub sync: SyncSettings,
    pub storage: StorageConfig,

    /// Validator configuration (if running as validator).
    pub validator: Option<ValidatorConfig>,
}

/// Chain-specific configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Textual chain identifier.
    pub chain_id: String,

    /// Hex addresses seeding the genesis validator set.
    pub initial_validators: Vec<String>,

    /// Hex addresses seeding the genesis lightning set.
    pub initial_lightnings: Vec<String>,

    /// Hex address of the trusted license issuer.
    pub license_issuer: String,

    /// Signed license file admitted at startup.
    pub license_file: Option<PathBuf>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: "meridian-mainnet".to_string(),
            initial_validators: vec![],
            initial_lightnings: vec![],
            license_issuer: String::new(),
            license_file: None,
        }
    }
}

/// Consensus engine settings. `checkpoint_interval` is locked at
/// genesis; changing it on a live chain is a hard fork.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsensusSettings {
    pub checkpoint_interval: u64,
    pub message_queue_size: usize,
    pub epoch_timeout_secs: u64,
    pub proposer_strategy: ProposerStrategy,
    pub auto_propose: bool,
    pub max_txs_per_block: usize,
    pub lightning_queue_size: usize,
    pub pass_through_lightning_vote: bool,

    /// Minimum transaction fee in SPAY wei.
    pub min_tx_fee_spay_wei: u128,
}

impl Default for ConsensusSettings {
    fn default() -> Self {
        Self {
            checkpoint_interval: 100,
            message_queue_size: 1024,
            epoch_timeout_secs: 6,
            proposer_strategy: ProposerStrategy::Rotating,
            auto_propose: true,
            max_txs_per_block: 1024,
            lightning_queue_size: 512,
            pass_through_lightning_vote: true,
            min_tx_fee_spay_wei: 1_000_000_000_000,
        }
    }
}

impl ConsensusSettings {
    pub fn consensus_config(&self) -> ConsensusConfig {
        ConsensusConfig {
            checkpoint_interval: self.checkpoint_interval,
            message_queue_size: self.message_queue_size,
            epoch_timeout_secs: self.epoch_timeout_secs,
            auto_propose: self.auto_propose,
            max_txs_per_block: self.max_txs_per_block,
        }
    }

    pub fn lightning_config(&self) -> LightningConfig {
        LightningConfig {
            queue_size: self.lightning_queue_size,
            pass_through: self.pass_through_lightning_vote,
        }
    }
}

/// Block synchronization settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncSettings {
    pub fastsync_quota: u32,
    pub download_by_header: bool,
    pub download_by_hash: bool,
    pub block_gap_threshold: u64,

    /// Hex hash of a branch tip to force-download at boot.
    pub forced_download_hash: Option<String>,

    pub prioritize_seed_peers: bool,
    pub branch_download_gap_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            fastsync_quota: 8,
            download_by_header: true,
            download_by_hash: true,
            block_gap_threshold: 100,
            forced_download_hash: None,
            prioritize_seed_peers: false,
            branch_download_gap_ms: 300,
        }
    }
}

impl SyncSettings {
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            fastsync_quota: self.fastsync_quota,
            download_by_header: self.download_by_header,
            download_by_hash: self.download_by_hash,
            block_gap_threshold: self.block_gap_threshold,
            forced_download_hash: self
                .forced_download_hash
                .as_deref()
                .and_then(Hash::from_hex),
            prioritize_seed_peers: self.prioritize_seed_peers,
            branch_download_gap_ms: self.branch_download_gap_ms,
            request_timeout: Duration::from_secs(10),
            expiration: Duration::from_secs(300),
        }
    }
}

/// Storage configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,

    /// Genesis snapshot file to boot from.
    pub genesis_snapshot: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            genesis_snapshot: None,
        }
    }
}

/// Validator-specific configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Validator private key path (raw 32-byte scalar).
    pub key_path: PathBuf,
}

impl NodeConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: &PathBuf) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read config: {e}"))?;
        serde_json::from_str(&content).map_err(|e| format!("failed to parse config: {e}"))
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &PathBuf) -> Result<(), String> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| format!("failed to serialize config: {e}"))?;
        std::fs::write(path, content).map_err(|e| format!("failed to write config: {e}"))
    }

    pub fn is_validator(&self) -> bool {
        self.validator.is_some()
    }
}
