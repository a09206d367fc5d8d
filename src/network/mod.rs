//! Network boundary: the message dispatcher the core consumes.
//!
//! The wire-level transport lives outside this crate; the core only
//! depends on a dispatcher exposing peer listing, inventory probes,
//! data requests, and outbound send/broadcast. An in-process
//! implementation is provided for wiring nodes together in tests and
//! single-process simulations.

use crate::types::block::{Block, BlockHeader};
use crate::types::lightning::AggregatedVote;
use crate::types::vote::{Proposal, Vote};
use crate::types::Hash;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Peer identifier assigned by the transport.
pub type PeerId = String;

/// Logical wire channel of a request.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ChannelId {
    Block,
    Header,
    Vote,
    Lightning,
}

/// A compact probe of known block hashes. Peers respond with hashes
/// they know that the probe does not list.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InventoryRequest {
    pub channel_id: ChannelId,

    /// Exponential back-off locator, newest first, terminated by the
    /// last finalized block's hash.
    pub starts: Vec<Hash>,

    pub end: Option<Hash>,
}

/// A peer's answer to an inventory probe.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InventoryResponse {
    pub channel_id: ChannelId,
    pub entries: Vec<Hash>,
}

/// Request for full records by hash.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataRequest {
    pub channel_id: ChannelId,
    pub entries: Vec<Hash>,
}

/// Messages delivered between nodes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Message {
    Block(Block),
    BlockHeader(BlockHeader),
    Vote(Vote),
    AggregatedVote(AggregatedVote),
    Proposal(Proposal),
    InventoryResponse(InventoryResponse),
}

impl Message {
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bincode::deserialize(bytes).ok()
    }
}

/// What the core asks of the transport.
pub trait Dispatcher: Send + Sync {
    /// Currently connected peers (edge nodes excluded by the transport).
    fn peers(&self) -> Vec<PeerId>;

    fn peer_exists(&self, peer: &PeerId) -> bool;

    fn is_seed_peer(&self, peer: &PeerId) -> bool;

    /// Fire-and-forget inventory probe.
    fn get_inventory(&self, peers: &[PeerId], request: InventoryRequest);

    /// Fire-and-forget data request.
    fn get_data(&self, peers: &[PeerId], request: DataRequest);

    fn send(&self, peer: &PeerId, message: Message);

    fn broadcast(&self, message: Message);
}

/// Outbound traffic recorded by the in-process dispatcher.
#[derive(Clone, Debug)]
pub enum Outbound {
    Inventory(Vec<PeerId>, InventoryRequest),
    Data(Vec<PeerId>, DataRequest),
    Send(PeerId, Message),
    Broadcast(Message),
}

/// In-process dispatcher: records outbound traffic for a harness (or an
/// embedding transport) to drain and deliver.
#[derive(Default)]
pub struct InProcessDispatcher {
    peers: Mutex<Vec<PeerId>>,
    seed_peers: Mutex<Vec<PeerId>>,
    outbound: Mutex<VecDeque<Outbound>>,
}

impl InProcessDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_peers(&self, peers: Vec<PeerId>) {
        *self.peers.lock() = peers;
    }

    pub fn set_seed_peers(&self, peers: Vec<PeerId>) {
        *self.seed_peers.lock() = peers;
    }

    /// Drain everything queued since the last call.
    pub fn drain_outbound(&self) -> Vec<Outbound> {
        self.outbound.lock().drain(..).collect()
    }

    pub fn outbound_len(&self) -> usize {
        self.outbound.lock().len()
    }
}

impl Dispatcher for InProcessDispatcher {
    fn peers(&self) -> Vec<PeerId> {
        self.peers.lock().clone()
    }

    fn peer_exists(&self, peer: &PeerId) -> bool {
        self.peers.lock().contains(peer)
    }

    fn is_seed_peer(&self, peer: &PeerId) -> bool {
        self.seed_peers.lock().contains(peer)
    }

    fn get_inventory(&self, peers: &[PeerId], request: InventoryRequest) {
        self.outbound
            .lock()
            .push_back(Outbound::Inventory(peers.to_vec(), request));
    }

    fn get_data(&self, peers: &[PeerId], request: DataRequest) {
        self.outbound
            .lock()
            .push_back(Outbound::Data(peers.to_vec(), request));
    }

    fn send(&self, peer: &PeerId, message: Message) {
        self.outbound
            .lock()
            .push_back(Outbound::Send(peer.clone(), message));
    }

    fn broadcast(&self, message: Message) {
        self.outbound.lock().push_back(Outbound::Broadcast(message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_roundtrip() {
        let vote = Vote::new(Hash([0x12; 32]), 5, 3, crate::types::Address([0x01; 20]));
        let msg = Message::Vote(vote.clone());

        let recovered = Message::from_bytes(&msg.to_bytes()).unwrap();
        match recovered {
            Message::Vote(v) => assert_eq!(v, vote),
            other => panic!("wrong message variant: {other:?}"),
        }
    }

    #[test]
    fn test_in_process_dispatcher_records() {
        let dispatcher = InProcessDispatcher::new();
        dispatcher.set_peers(vec!["p1".to_string(), "p2".to_string()]);
        dispatcher.set_seed_peers(vec!["p1".to_string()]);

        assert!(dispatcher.peer_exists(&"p1".to_string()));
        assert!(dispatcher.is_seed_peer(&"p1".to_string()));
        assert!(!dispatcher.is_seed_peer(&"p2".to_string()));

        dispatcher.get_data(
            &["p1".to_string()],
            DataRequest {
                channel_id: ChannelId::Block,
                entries: vec![Hash([0xAB; 32])],
            },
        );

        let outbound = dispatcher.drain_outbound();
        assert_eq!(outbound.len(), 1);
        assert!(matches!(&outbound[0], Outbound::Data(peers, req)
            if peers == &["p1".to_string()] && req.entries.len() == 1));
        assert_eq!(dispatcher.outbound_len(), 0);
    }
}
