//! Pull-based block sync: inventory probing, per-hash and per-header
//! download queues, timeout retry, expiry, and fork recovery.
//!
//! The manager owns three background loops: a 1 Hz download tick, a 6 s
//! recovery check, and a pass-ready loop driven by a block-arrival
//! notification with a 1 s fallback timer.

use crate::chain::Chain;
use crate::consensus::{ConsensusEngine, ConsensusMessage};
use crate::network::{ChannelId, DataRequest, Dispatcher, InventoryRequest, PeerId};
use crate::storage::LruCache;
use crate::types::block::{Block, BlockHeader, ExtendedBlock};
use crate::types::Hash;
use parking_lot::{Mutex, RwLock};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::cmp::Reverse;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

const DUMP_BLOCK_CACHE_LIMIT: usize = 32;
const MIN_INVENTORY_REQUEST_INTERVAL: Duration = Duration::from_secs(6);
const MAX_INVENTORY_REQUEST_INTERVAL: Duration = Duration::from_secs(6);
const GOSSIP_REQUEST_QUOTA_PER_SECOND: u32 = 10;
const MAX_NUM_PEERS_TO_SEND_REQUESTS: usize = 4;
const REFRESH_COUNTER_LIMIT: u32 = 4;
const MAX_BLOCKS_PER_REQUEST: usize = 4;
const MAX_PEER_ACTIVE_SCORE: i32 = 16;

#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Tokens per tick for expensive body requests.
    pub fastsync_quota: u32,

    pub download_by_header: bool,
    pub download_by_hash: bool,

    /// Finalized-vs-voted height gap that triggers recovery mode.
    pub block_gap_threshold: u64,

    /// Operator-injected branch tip to recover at boot.
    pub forced_download_hash: Option<Hash>,

    pub prioritize_seed_peers: bool,

    /// Pause between ancestor fetches during branch download.
    pub branch_download_gap_ms: u64,

    /// Retry interval for a pending block without progress.
    pub request_timeout: Duration,

    /// Total lifetime cap of a pending block.
    pub expiration: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fastsync_quota: 8,
            download_by_header: true,
            download_by_hash: true,
            block_gap_threshold: 100,
            forced_download_hash: None,
            prioritize_seed_peers: false,
            branch_download_gap_ms: 300,
            request_timeout: Duration::from_secs(10),
            expiration: Duration::from_secs(300),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum RequestState {
    ToSendDataReq,
    WaitingDataResp,
    ToSendBodyReq,
    WaitingBodyResp,
}

struct PendingBlock {
    hash: Hash,
    header: Option<BlockHeader>,
    peers: Vec<PeerId>,
    last_update: Instant,
    created_at: Instant,
    status: RequestState,
    from_gossip: bool,
}

impl PendingBlock {
    fn new(hash: Hash, peers: Vec<PeerId>, from_gossip: bool) -> Self {
        Self {
            hash,
            header: None,
            peers,
            last_update: Instant::now(),
            created_at: Instant::now(),
            status: RequestState::ToSendDataReq,
            from_gossip,
        }
    }

    fn has_timed_out(&self, timeout: Duration) -> bool {
        self.last_update.elapsed() > timeout
    }

    fn has_expired(&self, expiration: Duration) -> bool {
        self.created_at.elapsed() > expiration
    }

    fn update_timestamp(&mut self) {
        self.last_update = Instant::now();
    }

    fn add_peers(&mut self, peers: &[PeerId]) {
        for peer in peers {
            if !self.peers.contains(peer) {
                self.peers.push(peer.clone());
            }
        }
    }
}

#[derive(Default)]
struct PendingState {
    /// FIFO by first discovery.
    order: VecDeque<Hash>,
    by_hash: HashMap<Hash, PendingBlock>,

    /// Min-heap keyed by header height; entries are validated against
    /// `by_hash` lazily.
    header_heap: BinaryHeap<Reverse<(u64, Hash)>>,
}

struct ActivePeers {
    scores: HashMap<PeerId, i32>,
    refresh_counter: u32,
}

/// The block-sync request manager.
pub struct RequestManager {
    config: SyncConfig,
    chain: Arc<Chain>,
    consensus: Arc<ConsensusEngine>,
    dispatcher: Arc<dyn Dispatcher>,

    pending: Mutex<PendingState>,
    active_peers: RwLock<ActivePeers>,
    last_inventory_request: Mutex<Instant>,

    /// Fast-sync tip estimate, updated as ready blocks pass upstream.
    tip: Mutex<Option<ExtendedBlock>>,

    /// Hashes already handed to the consensus engine.
    dump_block_cache: LruCache<Hash, ()>,

    block_notify_tx: mpsc::Sender<()>,
    block_notify_rx: Mutex<Option<mpsc::Receiver<()>>>,

    /// Serializes recovery-mode branch downloads.
    recovery_lock: tokio::sync::Mutex<()>,
}

impl RequestManager {
    pub fn new(
        config: SyncConfig,
        chain: Arc<Chain>,
        consensus: Arc<ConsensusEngine>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        let (block_notify_tx, block_notify_rx) = mpsc::channel(1);
        Self {
            config,
            chain,
            consensus,
            dispatcher,
            pending: Mutex::new(PendingState::default()),
            active_peers: RwLock::new(ActivePeers {
                scores: HashMap::new(),
                refresh_counter: 0,
            }),
            last_inventory_request: Mutex::new(Instant::now() - MAX_INVENTORY_REQUEST_INTERVAL),
            tip: Mutex::new(None),
            dump_block_cache: LruCache::new(DUMP_BLOCK_CACHE_LIMIT),
            block_notify_tx,
            block_notify_rx: Mutex::new(Some(block_notify_rx)),
            recovery_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Spawn the tick, recovery, pass-ready, and forced-download tasks.
    pub fn start(self: &Arc<Self>, shutdown: watch::Receiver<bool>) {
        if let Some(forced) = self.config.forced_download_hash {
            let rm = Arc::clone(self);
            let sd = shutdown.clone();
            tokio::spawn(async move {
                info!(block = %forced, "force downloading branch");
                rm.download_branch(forced, sd).await;
            });
        }

        let rm = Arc::clone(self);
        let mut sd = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = sd.changed() => {
                        if *sd.borrow() {
                            return;
                        }
                    }
                    _ = ticker.tick() => rm.tick(),
                }
            }
        });

        let rm = Arc::clone(self);
        let mut sd = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(6));
            loop {
                tokio::select! {
                    _ = sd.changed() => {
                        if *sd.borrow() {
                            return;
                        }
                    }
                    _ = ticker.tick() => rm.attempt_recovery(sd.clone()).await,
                }
            }
        });

        let rm = Arc::clone(self);
        let sd = shutdown.clone();
        tokio::spawn(async move {
            rm.pass_ready_blocks(sd).await;
        });
    }

    // ========================================================================
    // INGRESS
    // ========================================================================

    /// Record a block hash learned from a peer.
    pub fn add_hash(&self, hash: Hash, peers: &[PeerId], from_gossip: bool) {
        if self.chain.has_block(&hash) {
            return;
        }
        let mut pending = self.pending.lock();
        Self::add_hash_locked(&mut pending, hash, peers, from_gossip);
    }

    fn add_hash_locked(
        pending: &mut PendingState,
        hash: Hash,
        peers: &[PeerId],
        from_gossip: bool,
    ) {
        if !pending.by_hash.contains_key(&hash) {
            pending.order.push_back(hash);
            pending
                .by_hash
                .insert(hash, PendingBlock::new(hash, Vec::new(), from_gossip));
        }
        let entry = pending.by_hash.get_mut(&hash).expect("inserted above");
        entry.add_peers(peers);
    }

    /// Record a downloaded header; headers drive body requests in
    /// height order.
    pub fn add_header(&self, header: &BlockHeader, peers: &[PeerId]) {
        let hash = header.hash();
        if self.chain.has_block(&hash) {
            debug!(block = %hash, "skipping header: block already downloaded");
            return;
        }
        let mut pending = self.pending.lock();
        Self::add_hash_locked(&mut pending, hash, peers, true);
        let entry = pending.by_hash.get_mut(&hash).expect("inserted above");
        if entry.header.is_none() {
            entry.header = Some(header.clone());
            entry.status = RequestState::ToSendBodyReq;
            pending
                .header_heap
                .push(Reverse((header.height, hash)));
        }
    }

    /// Hand an arriving block to the chain and clear its pending entry.
    pub fn add_block(&self, block: Block) {
        let hash = block.hash();
        match self.chain.add_block(block) {
            Ok(_) => {}
            Err(e) => {
                debug!(block = %hash, error = %e, "failed to add block");
                return;
            }
        }

        {
            let mut pending = self.pending.lock();
            if pending.by_hash.remove(&hash).is_some() {
                pending.order.retain(|h| *h != hash);
            }
        }

        // Non-blocking nudge for the pass-ready loop.
        let _ = self.block_notify_tx.try_send(());
    }

    /// Whether a pending block was learned through gossip. Unknown
    /// hashes answer true, the conservative default.
    pub fn is_gossip_block(&self, hash: &Hash) -> bool {
        let pending = self.pending.lock();
        pending
            .by_hash
            .get(hash)
            .map(|p| p.from_gossip)
            .unwrap_or(true)
    }

    /// Boost a peer that delivered useful data.
    pub fn add_active_peer(&self, peer: PeerId) {
        let mut active = self.active_peers.write();
        if let Some(score) = active.scores.get_mut(&peer) {
            *score = MAX_PEER_ACTIVE_SCORE;
            debug!(%peer, "active peer boosted");
            return;
        }
        if active.scores.len() >= MAX_NUM_PEERS_TO_SEND_REQUESTS {
            if let Some(weakest) = active
                .scores
                .iter()
                .min_by_key(|(_, score)| **score)
                .map(|(pid, _)| pid.clone())
            {
                active.scores.remove(&weakest);
            }
        }
        active.scores.insert(peer.clone(), MAX_PEER_ACTIVE_SCORE);
        debug!(%peer, "active peer added");
    }

    /// Number of blocks currently pending download.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().by_hash.len()
    }

    // ========================================================================
    // DOWNLOAD TICK
    // ========================================================================

    /// One 1 Hz download round. Public so a harness can drive it
    /// without the background clock.
    pub fn tick(&self) {
        let mut gossip_quota = GOSSIP_REQUEST_QUOTA_PER_SECOND;
        let mut fastsync_quota = self.config.fastsync_quota;

        let has_undownloaded = {
            let pending = self.pending.lock();
            !pending.by_hash.is_empty() || !pending.header_heap.is_empty()
        };

        let since_last = self.last_inventory_request.lock().elapsed();
        let min_interval_passed = since_last >= MIN_INVENTORY_REQUEST_INTERVAL;
        let max_interval_passed = since_last >= MAX_INVENTORY_REQUEST_INTERVAL;

        if max_interval_passed || (has_undownloaded && min_interval_passed) {
            if has_undownloaded {
                let fast_sync_height = self.tip.lock().as_ref().map(|t| t.height()).unwrap_or(0);
                info!(
                    pending = self.pending_len(),
                    tip = %self.consensus.get_tip(true).hash(),
                    fast_sync_height,
                    "sync progress"
                );
            }
            *self.last_inventory_request.lock() = Instant::now();
            let request = self.build_inventory_request();
            self.send_inventory(request);
        }

        if self.config.download_by_header {
            self.download_block_from_header(&mut fastsync_quota);
        }
        if self.config.download_by_hash {
            self.download_block_from_hash(&mut gossip_quota, &mut fastsync_quota);
        }

        self.collect_garbage();
    }

    /// Build the exponential back-off locator: the tip's height down to
    /// the last finalized height with step sizes doubling every 10
    /// entries, terminated by the finalized block's hash.
    pub fn build_inventory_request(&self) -> InventoryRequest {
        let tip = self
            .tip
            .lock()
            .clone()
            .unwrap_or_else(|| self.consensus.get_tip(true));
        let lfb = self.consensus.get_last_finalized_block();

        let mut starts = Vec::new();
        let mut step: u64 = 1;
        let mut entries: u64 = 0;
        let mut index = tip.height();

        while index > 0 {
            for block in self.chain.find_blocks_by_height(index) {
                // Exclude orphan and pending blocks.
                if !block.status.is_pending() && !block.status.is_invalid() {
                    starts.push(block.hash());
                }
            }
            entries += 1;
            if entries % 10 == 0 {
                step *= 2;
            }
            if index <= lfb.height() || step >= index {
                break;
            }
            index -= step;
        }

        starts.push(lfb.hash());

        if let Some(forced) = self.config.forced_download_hash {
            starts.push(forced);
        }

        InventoryRequest {
            channel_id: ChannelId::Block,
            starts,
            end: None,
        }
    }

    fn send_inventory(&self, request: InventoryRequest) {
        let mut peers_to_request: Vec<PeerId> = Vec::new();

        {
            let mut active = self.active_peers.write();
            active.refresh_counter += 1;

            let disconnected: Vec<PeerId> = active
                .scores
                .keys()
                .filter(|pid| !self.dispatcher.peer_exists(pid))
                .cloned()
                .collect();
            for pid in disconnected {
                debug!(peer = %pid, "removing disconnected peer from active list");
                active.scores.remove(&pid);
            }
            for score in active.scores.values_mut() {
                *score -= 1;
            }
            if active.refresh_counter >= REFRESH_COUNTER_LIMIT {
                active.refresh_counter = 0;
            }

            if self.config.prioritize_seed_peers {
                peers_to_request = self
                    .dispatcher
                    .peers()
                    .into_iter()
                    .filter(|pid| self.dispatcher.is_seed_peer(pid))
                    .collect();
            } else if !active.scores.is_empty() {
                peers_to_request = active
                    .scores
                    .iter()
                    .filter(|(_, score)| **score > 0)
                    .map(|(pid, _)| pid.clone())
                    .collect();
            }

            let mut target_size = MAX_NUM_PEERS_TO_SEND_REQUESTS;
            if active.refresh_counter == 0 {
                // Occasionally query extra random peers.
                target_size += 2;
            }
            if peers_to_request.len() < target_size {
                let mut all_peers = self.dispatcher.peers();
                all_peers.shuffle(&mut rand::thread_rng());
                for sample in all_peers {
                    if !peers_to_request.contains(&sample) {
                        peers_to_request.push(sample);
                    }
                    if peers_to_request.len() >= target_size {
                        break;
                    }
                }
            }
        }

        debug!(peers = ?peers_to_request, starts = request.starts.len(), "sending inventory request");
        self.dispatcher.get_inventory(&peers_to_request, request);
    }

    /// Preferred path: pop headers in height order and batch body
    /// requests, up to 4 hashes per peer per round.
    fn download_block_from_header(&self, fastsync_quota: &mut u32) {
        let mut pending = self.pending.lock();
        let mut add_back: Vec<(u64, Hash)> = Vec::new();
        let mut to_remove: Vec<Hash> = Vec::new();
        let mut peer_batches: HashMap<PeerId, Vec<Hash>> = HashMap::new();

        while *fastsync_quota > 0 {
            let Some(Reverse((height, hash))) = pending.header_heap.pop() else {
                break;
            };
            let Some(entry) = pending.by_hash.get_mut(&hash) else {
                continue; // stale heap entry
            };

            if entry.has_expired(self.config.expiration) {
                to_remove.push(hash);
                continue;
            }
            if self.dump_block_cache.contains(&hash) || self.chain.has_block(&hash) {
                to_remove.push(hash);
                continue;
            }

            add_back.push((height, hash));
            if entry.peers.is_empty() {
                debug!(block = %hash, "skip block with no peer");
                continue;
            }
            if entry.status == RequestState::WaitingBodyResp
                && !entry.has_timed_out(self.config.request_timeout)
            {
                *fastsync_quota -= 1;
                continue;
            }
            if entry.status == RequestState::ToSendBodyReq
                || (entry.status == RequestState::WaitingBodyResp
                    && entry.has_timed_out(self.config.request_timeout))
            {
                let mut shuffled = entry.peers.clone();
                shuffled.shuffle(&mut rand::thread_rng());
                let Some(peer) = shuffled
                    .into_iter()
                    .find(|pid| self.dispatcher.peer_exists(pid))
                else {
                    debug!(block = %hash, "all peers for pending block purged");
                    continue;
                };

                let batch = peer_batches.entry(peer.clone()).or_default();
                batch.push(hash);
                if batch.len() >= MAX_BLOCKS_PER_REQUEST {
                    self.send_blocks_request(&peer, batch.split_off(0));
                }
                entry.update_timestamp();
                entry.status = RequestState::WaitingBodyResp;
                *fastsync_quota -= 1;
            }
        }

        for (peer, batch) in peer_batches {
            if !batch.is_empty() {
                self.send_blocks_request(&peer, batch);
            }
        }
        for entry in add_back {
            pending.header_heap.push(Reverse(entry));
        }
        for hash in to_remove {
            Self::remove_pending(&mut pending, &hash);
        }
    }

    /// Fallback path for peers that did not advertise headers: walk the
    /// FIFO list and send single-hash requests.
    fn download_block_from_hash(&self, gossip_quota: &mut u32, fastsync_quota: &mut u32) {
        let mut pending = self.pending.lock();
        let mut to_remove: Vec<Hash> = Vec::new();
        let order: Vec<Hash> = pending.order.iter().copied().collect();

        for hash in order {
            if *gossip_quota == 0 && *fastsync_quota == 0 {
                break;
            }
            let Some(entry) = pending.by_hash.get_mut(&hash) else {
                continue;
            };
            if entry.has_expired(self.config.expiration) {
                to_remove.push(hash);
                continue;
            }
            if entry.peers.is_empty() {
                continue;
            }
            if entry.from_gossip && *gossip_quota == 0 {
                continue;
            }
            if !entry.from_gossip && *fastsync_quota == 0 {
                continue;
            }

            // Timed-out in-flight requests fall back to the send state
            // so another peer gets a chance.
            if entry.status == RequestState::WaitingDataResp
                && entry.has_timed_out(self.config.request_timeout)
            {
                entry.status = RequestState::ToSendDataReq;
            }

            let eligible = entry.status == RequestState::ToSendDataReq
                || (!self.config.download_by_header
                    && entry.status == RequestState::ToSendBodyReq);
            if !eligible {
                continue;
            }

            let peer = entry.peers[rand::thread_rng().gen_range(0..entry.peers.len())].clone();
            debug!(block = %hash, %peer, "sending data request from hash");
            self.dispatcher.get_data(
                &[peer],
                DataRequest {
                    channel_id: ChannelId::Block,
                    entries: vec![hash],
                },
            );
            entry.update_timestamp();
            entry.status = RequestState::WaitingDataResp;
            if entry.from_gossip {
                *gossip_quota -= 1;
            } else {
                *fastsync_quota -= 1;
            }
        }

        for hash in to_remove {
            debug!(block = %hash, "removing outdated block");
            Self::remove_pending(&mut pending, &hash);
        }
    }

    fn send_blocks_request(&self, peer: &PeerId, entries: Vec<Hash>) {
        debug!(%peer, count = entries.len(), "sending data request from header");
        self.dispatcher.get_data(
            &[peer.clone()],
            DataRequest {
                channel_id: ChannelId::Block,
                entries,
            },
        );
    }

    fn remove_pending(pending: &mut PendingState, hash: &Hash) {
        pending.by_hash.remove(hash);
        pending.order.retain(|h| h != hash);
    }

    /// Drop expired pending blocks and heap entries for blocks that
    /// arrived through another path.
    fn collect_garbage(&self) {
        let mut pending = self.pending.lock();

        let expired: Vec<Hash> = pending
            .by_hash
            .values()
            .filter(|entry| entry.has_expired(self.config.expiration))
            .map(|entry| entry.hash)
            .collect();
        for hash in expired {
            debug!(block = %hash, "removing expired pending block");
            Self::remove_pending(&mut pending, &hash);
        }

        let drained: Vec<(u64, Hash)> = pending.header_heap.drain().map(|Reverse(entry)| entry).collect();
        let live: Vec<(u64, Hash)> = drained
            .into_iter()
            .filter(|(_, hash)| pending.by_hash.contains_key(hash))
            .collect();
        for entry in live {
            pending.header_heap.push(Reverse(entry));
        }
    }

    // ========================================================================
    // PASSING READY BLOCKS UPSTREAM
    // ========================================================================

    /// Walk the chain from the finalized height upward and hand every
    /// block whose parent is present and valid to the consensus engine.
    pub fn pass_ready_blocks_once(&self) {
        let lfb = self.consensus.get_last_finalized_block();
        let mut height = lfb.height() + 1;
        let mut parents = vec![lfb];

        loop {
            let blocks = self.chain.find_blocks_by_height(height);
            if blocks.is_empty() {
                break;
            }

            for block in &blocks {
                let hash = block.hash();
                if self.dump_block_cache.contains(&hash) {
                    continue;
                }
                let parent_ready = parents
                    .iter()
                    .any(|p| p.hash() == block.parent() && p.status.is_valid());
                if !parent_ready {
                    continue;
                }
                self.dump_block_cache.put(hash, ());
                if block.status.is_pending() {
                    self.consensus
                        .add_message(ConsensusMessage::Block(block.block.clone()));
                    *self.tip.lock() = Some(block.clone());
                }
            }

            height += 1;
            parents = blocks;
        }
    }

    async fn pass_ready_blocks(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut notify = self
            .block_notify_rx
            .lock()
            .take()
            .expect("pass-ready loop started twice");
        loop {
            self.pass_ready_blocks_once();
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
                _ = notify.recv() => {}
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            }
        }
    }

    // ========================================================================
    // RECOVERY MODE
    // ========================================================================

    fn highest_voted_block(&self) -> Option<(u64, Hash)> {
        let epoch_votes = self.consensus.get_epoch_votes();
        if epoch_votes.is_empty() {
            return None;
        }
        let lfb = self.consensus.get_last_finalized_block();
        let validators = self.consensus.get_validators(&lfb.hash());

        let mut best: Option<(u64, Hash)> = None;
        for vote in epoch_votes.votes() {
            if !validators.has(&vote.id) {
                debug!(voter = %vote.id, "recovery check: skipping non-validator vote");
                continue;
            }
            if best.map(|(h, _)| vote.height > h).unwrap_or(true) {
                best = Some((vote.height, vote.block));
            }
        }
        best
    }

    /// True when the highest voted height runs ahead of the local
    /// finalized height by more than the configured gap.
    pub fn is_in_recovery_mode(&self) -> bool {
        let Some((max_vote_height, _)) = self.highest_voted_block() else {
            return false;
        };
        let lfb_height = self.consensus.get_last_finalized_block().height();
        let in_recovery = lfb_height + self.config.block_gap_threshold <= max_vote_height;
        debug!(
            lfb_height,
            max_vote_height,
            gap_threshold = self.config.block_gap_threshold,
            in_recovery,
            "recovery mode check"
        );
        in_recovery
    }

    /// One recovery round: when stuck, download the branch between the
    /// highest voted block and the local finalized chain.
    pub async fn attempt_recovery(&self, shutdown: watch::Receiver<bool>) {
        let _guard = self.recovery_lock.lock().await;
        if !self.is_in_recovery_mode() {
            return;
        }
        let Some((_, branch_tip)) = self.highest_voted_block() else {
            return;
        };
        self.download_branch(branch_tip, shutdown).await;
    }

    /// Walk parents from a branch tip, fetching each missing ancestor
    /// from a random subset of peers, until a finalized ancestor is
    /// reached.
    pub async fn download_branch(&self, branch_tip: Hash, shutdown: watch::Receiver<bool>) {
        debug!(tip = %branch_tip, "branch download starting");
        let mut block_hash = branch_tip;
        let mut attempts_on_current = 0u32;

        loop {
            if *shutdown.borrow() {
                return;
            }
            if block_hash.is_empty() {
                debug!("branch download: reached an empty parent hash");
                return;
            }

            if let Some(block) = self.chain.find_block(&block_hash) {
                if block.status.is_finalized() {
                    debug!(block = %block_hash, "branch download: reached finalized ancestor");
                    return;
                }
                // Already present; move to the parent.
                block_hash = block.parent();
                attempts_on_current = 0;
                continue;
            }

            attempts_on_current += 1;
            if attempts_on_current > 100 {
                debug!(block = %block_hash, "branch download: giving up on unresponsive branch");
                return;
            }

            let mut peers = self.dispatcher.peers();
            peers.shuffle(&mut rand::thread_rng());
            peers.truncate(3);
            debug!(block = %block_hash, ?peers, "branch download: fetching ancestor");
            self.dispatcher.get_data(
                &peers,
                DataRequest {
                    channel_id: ChannelId::Block,
                    entries: vec![block_hash],
                },
            );
            tokio::time::sleep(Duration::from_millis(self.config.branch_download_gap_ms)).await;
        }
    }
}
