//! Meridian full-node wiring.
//!
//! Assembles storage, chain, ledger, consensus, lightning, and sync
//! over a supplied dispatcher and owns the shutdown signal all
//! background loops observe.

use crate::chain::Chain;
use crate::consensus::{
    ConsensusEngine, ConsensusMessage, LightningEngine, ValidatorManager,
};
use crate::crypto::PrivateKey;
use crate::errors::CoreError;
use crate::ledger::{build_genesis_state, Executor, Ledger, LicenseGate, NullVm, TxInfo};
use crate::network::{Dispatcher, Message, PeerId};
use crate::node::config::NodeConfig;
use crate::node::mempool::Mempool;
use crate::storage::db::Database;
use crate::storage::{snapshot, MemDatabase, StoreView};
use crate::sync::RequestManager;
use crate::types::address_set::AddressSet;
use crate::types::block::Block;
use crate::types::Address;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

fn parse_address(hex_addr: &str) -> Option<Address> {
    let stripped = hex_addr.trim_start_matches("0x");
    let bytes = hex::decode(stripped).ok()?;
    Address::from_slice(&bytes)
}

fn parse_address_set(hex_addrs: &[String]) -> AddressSet {
    AddressSet::from_addresses(hex_addrs.iter().filter_map(|s| parse_address(s)))
}

/// A Meridian full node.
pub struct MeridianNode {
    config: NodeConfig,
    chain: Arc<Chain>,
    ledger: Arc<Ledger>,
    license_gate: Arc<LicenseGate>,
    lightning: Arc<LightningEngine>,
    consensus: Arc<ConsensusEngine>,
    request_manager: Arc<RequestManager>,
    mempool: Arc<Mempool>,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl MeridianNode {
    /// Build a node over the given signing key and dispatcher.
    pub fn new(
        config: NodeConfig,
        key: PrivateKey,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Self, CoreError> {
        let chain_id = config.chain.chain_id.clone();
        let db: Arc<dyn Database> = Arc::new(MemDatabase::new());

        // Boot from a snapshot when configured, otherwise seed a fresh
        // genesis from the configured committee sets.
        let genesis = match &config.storage.genesis_snapshot {
            Some(path) => {
                let mut file = std::fs::File::open(path)
                    .map_err(|e| CoreError::TransientIo(format!("cannot open snapshot: {e}")))?;
                let (header, pairs) = snapshot::read_snapshot(&mut file)
                    .map_err(|e| CoreError::validation(format!("bad snapshot: {e}")))?;

                let mut view = StoreView::empty(header.height, Arc::clone(&db));
                for (k, v) in pairs {
                    view.set(k, v);
                }
                let root = view.save();
                if root != header.state_hash {
                    return Err(CoreError::validation(format!(
                        "snapshot state root mismatch: computed {root}, header {}",
                        header.state_hash
                    )));
                }
                info!(height = header.height, "booted from genesis snapshot");
                Block::new(header, vec![])
            }
            None => {
                let validators = parse_address_set(&config.chain.initial_validators);
                let lightnings = parse_address_set(&config.chain.initial_lightnings);
                let root = build_genesis_state(
                    Arc::clone(&db),
                    &chain_id,
                    &validators,
                    &lightnings,
                    &[],
                );
                let mut genesis = Block::genesis(&chain_id);
                genesis.header.state_hash = root;
                genesis
            }
        };

        let chain = Arc::new(Chain::new(&chain_id, genesis));

        let issuer = parse_address(&config.chain.license_issuer).unwrap_or_default();
        let license_gate = Arc::new(LicenseGate::new(&chain_id, issuer));
        if let Some(path) = &config.chain.license_file {
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            match license_gate.load_license_file(path, now) {
                Ok(count) => info!(count, "licenses admitted"),
                Err(e) => warn!(error = %e, "license file not loaded"),
            }
        }

        let executor = Executor::new(
            &chain_id,
            config.consensus.checkpoint_interval,
            config.consensus.min_tx_fee_spay_wei,
            Arc::clone(&license_gate),
            Arc::new(NullVm),
        );
        let ledger = Arc::new(Ledger::new(Arc::clone(&chain), Arc::clone(&db), executor)?);

        let lightning = Arc::new(LightningEngine::new(
            config.consensus.lightning_config(),
            key.clone(),
            Arc::clone(&ledger),
        ));

        let mempool = Arc::new(Mempool::new(10_000));

        let consensus = Arc::new(ConsensusEngine::new(
            config.consensus.consensus_config(),
            Arc::clone(&chain),
            Arc::clone(&ledger),
            Arc::clone(&lightning),
            Arc::clone(&dispatcher),
            ValidatorManager::new(config.consensus.proposer_strategy),
            Arc::clone(&mempool) as Arc<dyn crate::consensus::TxProvider>,
            key,
        ));

        let request_manager = Arc::new(RequestManager::new(
            config.sync.sync_config(),
            Arc::clone(&chain),
            Arc::clone(&consensus),
            dispatcher,
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config,
            chain,
            ledger,
            license_gate,
            lightning,
            consensus,
            request_manager,
            mempool,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Spawn all background loops.
    pub fn start(&self) {
        info!(chain_id = %self.config.chain.chain_id, id = %self.consensus.id(), "starting node");
        self.lightning.start(self.shutdown_rx.clone());
        self.consensus.start(self.shutdown_rx.clone());
        self.request_manager.start(self.shutdown_rx.clone());
    }

    /// Signal every background loop to stop.
    pub fn stop(&self) {
        info!("stopping node");
        let _ = self.shutdown_tx.send(true);
    }

    /// Route an inbound network message to its consumer.
    pub fn handle_message(&self, from: PeerId, message: Message) {
        match message {
            Message::Block(block) => {
                self.request_manager.add_active_peer(from);
                self.request_manager.add_block(block);
            }
            Message::BlockHeader(header) => {
                self.request_manager.add_header(&header, &[from]);
            }
            Message::InventoryResponse(response) => {
                self.request_manager.add_active_peer(from.clone());
                for hash in response.entries {
                    self.request_manager.add_hash(hash, &[from.clone()], false);
                }
            }
            Message::Vote(vote) => {
                self.consensus.add_message(ConsensusMessage::Vote(vote));
            }
            Message::Proposal(proposal) => {
                self.consensus
                    .add_message(ConsensusMessage::Proposal(proposal));
            }
            Message::AggregatedVote(agg) => {
                self.consensus
                    .add_message(ConsensusMessage::AggregatedVote(agg));
            }
        }
    }

    /// Screen a raw transaction and admit it to the mempool.
    pub fn submit_transaction(&self, raw: Vec<u8>) -> Result<TxInfo, CoreError> {
        let info = self.ledger.screen_tx(&raw)?;
        self.mempool.add(raw, info.clone())?;
        Ok(info)
    }

    pub fn chain(&self) -> Arc<Chain> {
        Arc::clone(&self.chain)
    }

    pub fn consensus(&self) -> Arc<ConsensusEngine> {
        Arc::clone(&self.consensus)
    }

    pub fn request_manager(&self) -> Arc<RequestManager> {
        Arc::clone(&self.request_manager)
    }

    pub fn ledger(&self) -> Arc<Ledger> {
        Arc::clone(&self.ledger)
    }

    pub fn license_gate(&self) -> Arc<LicenseGate> {
        Arc::clone(&self.license_gate)
    }

    pub fn mempool(&self) -> Arc<Mempool> {
        Arc::clone(&self.mempool)
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::InProcessDispatcher;

    fn make_node() -> MeridianNode {
        let key = PrivateKey::generate();
        let mut config = NodeConfig::default();
        config.chain.chain_id = "meridian-test".to_string();
        config.chain.initial_validators = vec![format!("{}", key.address())];
        config.consensus.auto_propose = false;

        MeridianNode::new(config, key, Arc::new(InProcessDispatcher::new())).unwrap()
    }

    #[test]
    fn test_node_boots_with_genesis() {
        let node = make_node();

        let genesis = node.chain().root();
        assert_eq!(genesis.height(), 1);
        assert!(genesis.status.is_finalized());

        // The configured validator landed in the genesis state.
        let validators = node
            .ledger()
            .get_finalized_validators(&genesis.hash())
            .unwrap();
        assert_eq!(validators.len(), 1);
    }

    #[test]
    fn test_genesis_snapshot_roundtrip() {
        let node = make_node();
        let genesis = node.chain().root();

        // Dump the genesis state into a snapshot file.
        let view = node.ledger().view_at(&genesis.hash()).unwrap();
        let mut pairs = Vec::new();
        view.traverse(b"", |k, v| pairs.push((k.to_vec(), v.to_vec())));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("genesis.snapshot");
        let mut file = std::fs::File::create(&path).unwrap();
        snapshot::write_snapshot(&mut file, &genesis.block.header, &pairs).unwrap();
        drop(file);

        // Boot a second node from it.
        let key = PrivateKey::generate();
        let mut config = NodeConfig::default();
        config.chain.chain_id = "meridian-test".to_string();
        config.storage.genesis_snapshot = Some(path);
        config.consensus.auto_propose = false;

        let restored =
            MeridianNode::new(config, key, Arc::new(InProcessDispatcher::new())).unwrap();
        assert_eq!(restored.chain().root().hash(), genesis.hash());
    }

    #[tokio::test]
    async fn test_start_stop() {
        let node = make_node();
        node.start();
        node.stop();
    }

    #[test]
    fn test_submit_rejects_garbage() {
        let node = make_node();
        assert!(node.submit_transaction(vec![0xFF; 8]).is_err());
        assert!(node.mempool().is_empty());
    }
}
