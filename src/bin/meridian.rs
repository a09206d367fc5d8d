//! Meridian Node Binary
//!
//! Main entry point for running a Meridian protocol node.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use meridian_core::crypto::PrivateKey;
use meridian_core::network::InProcessDispatcher;
use meridian_core::node::{MeridianNode, NodeConfig};

#[tokio::main]
async fn main() {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("failed to set tracing subscriber");

    info!("Meridian Protocol Node v0.1.0");
    info!("=============================");

    // Load or create configuration
    let config_path = PathBuf::from("config.json");
    let config = if config_path.exists() {
        match NodeConfig::load(&config_path) {
            Ok(cfg) => {
                info!("loaded configuration from {}", config_path.display());
                cfg
            }
            Err(e) => {
                error!("failed to load config: {e}");
                info!("using default configuration");
                NodeConfig::default()
            }
        }
    } else {
        info!("no config file found, using defaults");
        let config = NodeConfig::default();
        if let Err(e) = config.save(&config_path) {
            error!("failed to save default config: {e}");
        } else {
            info!("saved default configuration to {}", config_path.display());
        }
        config
    };

    info!("chain id: {}", config.chain.chain_id);
    info!("checkpoint interval: {}", config.consensus.checkpoint_interval);
    info!("proposer strategy: {:?}", config.consensus.proposer_strategy);
    info!("validator mode: {}", config.is_validator());

    // Load the validator key, or run with an ephemeral identity.
    let key = match &config.validator {
        Some(validator) => match std::fs::read(&validator.key_path) {
            Ok(raw) if raw.len() == 32 => {
                let mut bytes = [0u8; 32];
                bytes.copy_from_slice(&raw);
                match PrivateKey::from_bytes(&bytes) {
                    Ok(key) => key,
                    Err(e) => {
                        error!("invalid validator key: {e}");
                        std::process::exit(1);
                    }
                }
            }
            Ok(_) => {
                error!("validator key file must hold exactly 32 bytes");
                std::process::exit(1);
            }
            Err(e) => {
                error!("cannot read validator key: {e}");
                std::process::exit(1);
            }
        },
        None => PrivateKey::generate(),
    };

    // The wire transport plugs in through the dispatcher seam; the
    // in-process dispatcher keeps a transportless node functional.
    let dispatcher = Arc::new(InProcessDispatcher::new());

    let node = match MeridianNode::new(config, key, dispatcher) {
        Ok(node) => node,
        Err(e) => {
            error!("failed to build node: {e}");
            std::process::exit(1);
        }
    };

    info!("node id: {}", node.consensus().id());
    node.start();
    info!("node started");

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl+c");

    info!("received shutdown signal");
    node.stop();
    info!("goodbye");
}
