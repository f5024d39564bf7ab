//! Anti-entropy sync engine.
//!
//! A sync round compares trie snapshots with a peer, walks the prefixes where
//! the digests differ, lists the peer's ids under small divergent subtrees and
//! pulls the messages the local trie lacks. Pull-only: nothing is pushed.
//!
//! ```text
//! Idle -> SnapshotExchanged -> NoSyncNeeded -> Idle
//!                           -> Diffing -> Fetching -> Applying -> Idle
//! ```

use crate::peer::PeerClient;
use crate::updater::TrieUpdater;
use hubsync_core::{Fid, HubError, Message};
use hubsync_store::{Engine, MergeOutcome};
use hubsync_trie::{timestamp_to_prefix, SyncId, TrieSnapshot, TIMESTAMP_LENGTH};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Largest peer subtree resolved by listing its ids directly.
pub const HASHES_PER_FETCH: usize = 50;

/// Messages younger than this are left out of snapshots while they propagate.
pub const SYNC_THRESHOLD_SECS: u32 = 10;

/// Cap on messages parked for a missing dependency.
const MAX_PARKED: usize = 10_000;

/// Where a sync round is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// No round running
    Idle,
    /// Snapshots compared
    SnapshotExchanged,
    /// Snapshots matched
    NoSyncNeeded,
    /// Walking divergent prefixes
    Diffing,
    /// Fetching missing messages
    Fetching,
    /// Merging fetched messages
    Applying,
}

/// Published on the status channel after every transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    /// Current phase
    pub phase: SyncPhase,
    /// Peer of the current or last round
    pub peer_id: Option<String>,
    /// Outcome of the last finished round
    pub last_report: Option<SyncReport>,
}

/// Result of comparing snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShouldSyncReport {
    /// Whether a round should run
    pub should_sync: bool,
    /// A round is already running
    pub in_progress: bool,
    /// Excluded ids counted locally
    pub our_messages: u64,
    /// Excluded ids counted by the peer
    pub their_messages: u64,
    /// Whether every excluded digest matched
    pub hashes_match: bool,
}

/// Outcome of one sync round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Peer synced against
    pub peer_id: String,
    /// Prefix the walk started from
    pub divergence_prefix: Vec<u8>,
    /// Ids the local trie lacked
    pub missing_ids: usize,
    /// Messages fetched from the peer
    pub fetched: usize,
    /// Messages committed
    pub merged: usize,
    /// Messages already stored
    pub duplicates: usize,
    /// Messages rejected as invalid, conflicting or prunable
    pub rejected: usize,
    /// Messages parked for a missing dependency
    pub parked: usize,
    /// RPCs that failed; their subtrees were skipped
    pub rpc_failures: usize,
    /// The round was cut short by [`SyncEngine::stop`]
    pub stopped: bool,
}

/// Ten-digit timestamp prefix of the latest settled snapshot, at ten-second
/// resolution.
#[must_use]
pub fn snapshot_timestamp_prefix(now: u32) -> Vec<u8> {
    let settled = now - now % SYNC_THRESHOLD_SECS;
    let mut prefix = timestamp_to_prefix(settled);
    prefix.truncate(TIMESTAMP_LENGTH - 1);
    prefix
}

/// Pulls missing messages from peers into one engine.
pub struct SyncEngine {
    engine: Arc<Engine>,
    updater: Arc<TrieUpdater>,
    status: watch::Sender<SyncStatus>,
    syncing: AtomicBool,
    stopped: AtomicBool,
    parked: Mutex<Vec<Message>>,
}

impl fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("phase", &self.status.borrow().phase)
            .field("parked", &self.parked.lock().len())
            .finish_non_exhaustive()
    }
}

/// Clears the in-progress flag when a round ends, however it ends.
struct RoundGuard<'a> {
    engine: &'a SyncEngine,
    report: Option<SyncReport>,
}

impl Drop for RoundGuard<'_> {
    fn drop(&mut self) {
        self.engine.syncing.store(false, Ordering::SeqCst);
        let report = self.report.take();
        self.engine.status.send_modify(|status| {
            status.phase = SyncPhase::Idle;
            if report.is_some() {
                status.last_report = report;
            }
        });
    }
}

impl SyncEngine {
    /// Create a sync engine for `engine`, whose events feed `updater`.
    #[must_use]
    pub fn new(engine: Arc<Engine>, updater: Arc<TrieUpdater>) -> Self {
        let (status, _) = watch::channel(SyncStatus {
            phase: SyncPhase::Idle,
            peer_id: None,
            last_report: None,
        });
        Self {
            engine,
            updater,
            status,
            syncing: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            parked: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to status transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Whether a round is running.
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    /// Messages waiting for a missing fid or signer.
    #[must_use]
    pub fn parked_messages(&self) -> usize {
        self.parked.lock().len()
    }

    /// Apply queued store events to the trie.
    pub fn drain_events(&self) -> usize {
        self.updater.drain()
    }

    /// Local snapshot at the settled prefix for `now`.
    ///
    /// # Errors
    ///
    /// Returns a storage failure if a trie node cannot be loaded.
    pub fn snapshot(&self, now: u32) -> Result<TrieSnapshot, HubError> {
        self.drain_events();
        self.updater
            .trie()
            .read()
            .get_snapshot(&snapshot_timestamp_prefix(now))
    }

    /// Cut the running round short at its next RPC; later rounds still run.
    pub fn stop(&self) {
        if self.is_syncing() {
            tracing::info!("Stopping sync round");
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    fn set_phase(&self, phase: SyncPhase, peer_id: &str) {
        self.status.send_modify(|status| {
            status.phase = phase;
            status.peer_id = Some(peer_id.to_string());
        });
    }

    /// Compare the local snapshot at the peer's prefix with the peer's.
    ///
    /// # Errors
    ///
    /// Returns a storage failure if a trie node cannot be loaded.
    pub fn sync_status(
        &self,
        peer_id: &str,
        remote: &TrieSnapshot,
    ) -> Result<ShouldSyncReport, HubError> {
        if self.is_syncing() {
            tracing::debug!(peer_id, "Sync already in progress");
            return Ok(ShouldSyncReport {
                should_sync: false,
                in_progress: true,
                our_messages: 0,
                their_messages: remote.num_messages,
                hashes_match: false,
            });
        }

        self.drain_events();
        let ours = self.updater.trie().read().get_snapshot(&remote.prefix)?;
        let hashes_match = ours.excluded_hashes == remote.excluded_hashes;
        let should_sync = !hashes_match || ours.num_messages != remote.num_messages;

        self.set_phase(SyncPhase::SnapshotExchanged, peer_id);
        if !should_sync {
            self.set_phase(SyncPhase::NoSyncNeeded, peer_id);
            self.status.send_modify(|status| status.phase = SyncPhase::Idle);
        }
        tracing::debug!(
            peer_id,
            should_sync,
            ours = ours.num_messages,
            theirs = remote.num_messages,
            "Compared snapshots"
        );

        Ok(ShouldSyncReport {
            should_sync,
            in_progress: false,
            our_messages: ours.num_messages,
            their_messages: remote.num_messages,
            hashes_match,
        })
    }

    /// Pull from `client` everything under the prefixes where `remote`
    /// diverges from the local trie.
    ///
    /// Failing RPCs skip their subtree and are counted in the report.
    ///
    /// # Errors
    ///
    /// Returns a storage failure if the local trie cannot be read, or
    /// [`HubError::Conflict`] if another round is running.
    pub async fn perform_sync(
        &self,
        peer_id: &str,
        remote: &TrieSnapshot,
        client: &dyn PeerClient,
    ) -> Result<SyncReport, HubError> {
        if self.syncing.swap(true, Ordering::SeqCst) {
            return Err(HubError::Conflict("sync already in progress".to_string()));
        }
        self.stopped.store(false, Ordering::SeqCst);
        let mut guard = RoundGuard {
            engine: self,
            report: None,
        };

        self.drain_events();
        let divergence_prefix = self
            .updater
            .trie()
            .read()
            .get_divergence_prefix(&remote.prefix, &remote.excluded_hashes)?;
        tracing::info!(
            peer_id,
            divergence_prefix = %String::from_utf8_lossy(&divergence_prefix),
            "Starting sync"
        );

        let mut report = SyncReport {
            peer_id: peer_id.to_string(),
            divergence_prefix: divergence_prefix.clone(),
            ..SyncReport::default()
        };

        self.set_phase(SyncPhase::Diffing, peer_id);
        let missing = self
            .fetch_missing_ids(divergence_prefix, client, &mut report)
            .await?;
        report.missing_ids = missing.len();

        self.set_phase(SyncPhase::Fetching, peer_id);
        let mut messages = std::mem::take(&mut *self.parked.lock());
        for chunk in missing.chunks(HASHES_PER_FETCH) {
            if self.stopped.load(Ordering::SeqCst) {
                report.stopped = true;
                break;
            }
            match client.get_all_messages_by_sync_ids(chunk).await {
                Ok(fetched) => {
                    report.fetched += fetched.len();
                    messages.extend(fetched);
                }
                Err(err) => {
                    tracing::warn!(peer_id, error = %err, "Failed to fetch messages");
                    report.rpc_failures += 1;
                }
            }
        }

        self.set_phase(SyncPhase::Applying, peer_id);
        messages.sort_by_key(|message| (message.timestamp(), message.hash.clone()));
        messages.dedup_by(|a, b| a.hash == b.hash);
        self.merge_fetched(messages, client, &mut report).await;

        self.drain_events();
        tracing::info!(
            peer_id,
            missing = report.missing_ids,
            merged = report.merged,
            parked = report.parked,
            rpc_failures = report.rpc_failures,
            "Sync complete"
        );
        guard.report = Some(report.clone());
        Ok(report)
    }

    /// Fetch the peer snapshot at the settled prefix and sync if it differs.
    ///
    /// # Errors
    ///
    /// Returns error if the peer snapshot cannot be fetched or the local trie
    /// cannot be read.
    pub async fn diff_sync_if_required(
        &self,
        peer_id: &str,
        client: &dyn PeerClient,
    ) -> Result<Option<SyncReport>, HubError> {
        let prefix = snapshot_timestamp_prefix(self.engine.clock().now());
        let remote = client.get_sync_snapshot_by_prefix(&prefix).await?.snapshot;
        let status = self.sync_status(peer_id, &remote)?;
        if !status.should_sync {
            return Ok(None);
        }
        self.perform_sync(peer_id, &remote, client).await.map(Some)
    }

    async fn fetch_missing_ids(
        &self,
        start: Vec<u8>,
        client: &dyn PeerClient,
        report: &mut SyncReport,
    ) -> Result<Vec<SyncId>, HubError> {
        let mut missing = Vec::new();
        let mut stack = vec![start];

        while let Some(prefix) = stack.pop() {
            if self.stopped.load(Ordering::SeqCst) {
                report.stopped = true;
                break;
            }

            let theirs = match client.get_sync_metadata_by_prefix(&prefix).await {
                Ok(Some(node)) => node,
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(
                        prefix = %String::from_utf8_lossy(&prefix),
                        error = %err,
                        "Failed to fetch peer metadata"
                    );
                    report.rpc_failures += 1;
                    continue;
                }
            };
            let ours = self.updater.trie().read().get_node_metadata(&prefix)?;
            if ours.as_ref().is_some_and(|node| node.hash == theirs.hash) {
                continue;
            }

            if theirs.num_messages <= HASHES_PER_FETCH as u64 || theirs.is_leaf() {
                match client.get_all_sync_ids_by_prefix(&prefix).await {
                    Ok(ids) => {
                        let trie = self.updater.trie().read();
                        for id in ids {
                            if !trie.exists(&id)? {
                                missing.push(id);
                            }
                        }
                    }
                    Err(err) => {
                        tracing::warn!(
                            prefix = %String::from_utf8_lossy(&prefix),
                            error = %err,
                            "Failed to fetch peer sync ids"
                        );
                        report.rpc_failures += 1;
                    }
                }
                continue;
            }

            // Reverse so the lowest child is walked first.
            for (byte, child) in theirs.children.iter().rev() {
                let our_hash = ours
                    .as_ref()
                    .and_then(|node| node.children.get(byte))
                    .map(|child| child.hash);
                if our_hash != Some(child.hash) {
                    stack.push(child.prefix.clone());
                }
            }
        }

        missing.sort();
        missing.dedup();
        Ok(missing)
    }

    async fn merge_fetched(
        &self,
        messages: Vec<Message>,
        client: &dyn PeerClient,
        report: &mut SyncReport,
    ) {
        let mut blocked = Vec::new();
        for message in messages {
            if let Some(message) = self.merge_one(message, report).await {
                blocked.push(message);
            }
        }
        if blocked.is_empty() {
            return;
        }

        let fids: BTreeSet<Fid> = blocked.iter().map(Message::fid).collect();
        for fid in fids {
            if self.stopped.load(Ordering::SeqCst) {
                report.stopped = true;
                break;
            }
            self.sync_dependencies(fid, client, report).await;
        }

        let mut still_blocked = Vec::new();
        for message in blocked {
            if let Some(message) = self.merge_one(message, report).await {
                still_blocked.push(message);
            }
        }
        report.parked = still_blocked.len();
        if !still_blocked.is_empty() {
            tracing::info!(parked = still_blocked.len(), "Parking blocked messages");
            let mut parked = self.parked.lock();
            let known: HashSet<Vec<u8>> = parked.iter().map(|m| m.hash.clone()).collect();
            parked.extend(
                still_blocked
                    .into_iter()
                    .filter(|message| !known.contains(&message.hash)),
            );
            if parked.len() > MAX_PARKED {
                let excess = parked.len() - MAX_PARKED;
                parked.drain(..excess);
            }
        }
    }

    /// Merge one fetched message; hands it back if it is blocked.
    async fn merge_one(&self, message: Message, report: &mut SyncReport) -> Option<Message> {
        match self.engine.merge_message(&message).await {
            Ok(MergeOutcome::Committed { .. }) => report.merged += 1,
            Ok(MergeOutcome::Duplicate) => report.duplicates += 1,
            Err(HubError::Blocked(reason)) => {
                tracing::debug!(fid = message.fid(), %reason, "Message blocked");
                return Some(message);
            }
            Err(err) => {
                tracing::debug!(fid = message.fid(), error = %err, "Fetched message rejected");
                report.rejected += 1;
            }
        }
        None
    }

    /// Pull the custody record and signer messages of `fid` from the peer.
    async fn sync_dependencies(&self, fid: Fid, client: &dyn PeerClient, report: &mut SyncReport) {
        match client.get_id_registry_event(fid).await {
            Ok(Some(event)) => {
                if let Err(err) = self.engine.merge_id_registry_event(&event).await {
                    tracing::debug!(fid, error = %err, "Peer id registry event not merged");
                }
            }
            Ok(None) => tracing::debug!(fid, "Peer has no id registry event"),
            Err(err) => {
                tracing::warn!(fid, error = %err, "Failed to fetch id registry event");
                report.rpc_failures += 1;
                return;
            }
        }

        match client.get_all_signer_messages_by_fid(fid).await {
            Ok(mut signers) => {
                signers.sort_by_key(Message::timestamp);
                for message in signers {
                    match self.engine.merge_message(&message).await {
                        Ok(MergeOutcome::Committed { .. }) => report.merged += 1,
                        Ok(MergeOutcome::Duplicate) => {}
                        Err(err) => {
                            tracing::debug!(fid, error = %err, "Peer signer message not merged");
                        }
                    }
                }
            }
            Err(err) => {
                tracing::warn!(fid, error = %err, "Failed to fetch signer messages");
                report.rpc_failures += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::LocalPeerClient;
    use crate::service::SyncService;
    use ed25519_dalek::SigningKey;
    use hubsync_core::{
        sign_message, CastAddBody, IdRegistryEvent, ManualClock, MemoryKv, MessageBody,
        MessageData, Network, SignerBody,
    };
    use hubsync_store::EngineOptions;
    use hubsync_trie::MerkleTrie;
    use uuid::Uuid;

    const NOW: u32 = 2_000_000;
    const FID: Fid = 5;

    struct TestNode {
        engine: Arc<Engine>,
        sync: SyncEngine,
        service: SyncService,
    }

    impl TestNode {
        fn new() -> Self {
            let db = Arc::new(MemoryKv::new());
            let clock = Arc::new(ManualClock::new(NOW));
            let (engine, events) = Engine::new(db.clone(), clock, &EngineOptions::default());
            let engine = Arc::new(engine);
            let trie = MerkleTrie::open(db).unwrap().shared();
            let updater = Arc::new(TrieUpdater::new(trie, events));
            let sync = SyncEngine::new(Arc::clone(&engine), Arc::clone(&updater));
            let service = SyncService::new(Uuid::new_v4(), Arc::clone(&engine), updater)
                .with_status(sync.subscribe());
            Self {
                engine,
                sync,
                service,
            }
        }

        fn client(&self) -> LocalPeerClient {
            LocalPeerClient::new(self.service.clone())
        }

        fn hashes(&self) -> Vec<Vec<u8>> {
            let mut hashes: Vec<_> = self
                .engine
                .get_all_messages()
                .unwrap()
                .into_iter()
                .map(|m| m.hash)
                .collect();
            hashes.sort();
            hashes
        }
    }

    fn custody() -> SigningKey {
        SigningKey::from_bytes(&[1; 32])
    }

    fn signer() -> SigningKey {
        SigningKey::from_bytes(&[2; 32])
    }

    fn registry() -> IdRegistryEvent {
        IdRegistryEvent {
            fid: FID,
            custody_key: custody().verifying_key().to_bytes().to_vec(),
            block_number: 1,
        }
    }

    fn signer_add() -> Message {
        sign_message(
            MessageData {
                fid: FID,
                timestamp: NOW - 1_000,
                network: Network::Devnet,
                body: MessageBody::SignerAdd(SignerBody {
                    signer: signer().verifying_key().to_bytes().to_vec(),
                    name: None,
                }),
            },
            &custody(),
        )
        .unwrap()
    }

    fn cast(timestamp: u32, text: &str) -> Message {
        sign_message(
            MessageData {
                fid: FID,
                timestamp,
                network: Network::Devnet,
                body: MessageBody::CastAdd(CastAddBody {
                    text: text.to_string(),
                    embeds: vec![],
                    mentions: vec![],
                    parent: None,
                }),
            },
            &signer(),
        )
        .unwrap()
    }

    async fn seed(node: &TestNode) {
        node.engine.merge_id_registry_event(&registry()).await.unwrap();
        node.engine.merge_message(&signer_add()).await.unwrap();
    }

    #[test]
    fn snapshot_prefix_drops_last_digit() {
        assert_eq!(snapshot_timestamp_prefix(1_234_567_899), b"123456789".to_vec());
        assert_eq!(snapshot_timestamp_prefix(2_000_007), b"000200000".to_vec());
    }

    #[tokio::test]
    async fn identical_nodes_do_not_sync() {
        let a = TestNode::new();
        let b = TestNode::new();
        seed(&a).await;
        seed(&b).await;

        let remote = b.sync.snapshot(NOW).unwrap();
        let status = a.sync.sync_status("b", &remote).unwrap();
        assert!(!status.should_sync);
        assert!(status.hashes_match);
        assert!(a.sync.diff_sync_if_required("b", &b.client()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn current_window_is_left_out_of_the_snapshot() {
        let a = TestNode::new();
        let b = TestNode::new();
        seed(&a).await;
        seed(&b).await;
        b.engine.merge_message(&cast(NOW + 5, "fresh")).await.unwrap();

        let status = a.sync.sync_status("b", &b.sync.snapshot(NOW).unwrap()).unwrap();
        assert!(status.hashes_match);
        assert!(!status.should_sync);
        assert!(a.sync.diff_sync_if_required("b", &b.client()).await.unwrap().is_none());

        // Settled one window later.
        let later = b.sync.snapshot(NOW + SYNC_THRESHOLD_SECS).unwrap();
        assert!(a.sync.sync_status("b", &later).unwrap().should_sync);
        let report = a.sync.perform_sync("b", &later, &b.client()).await.unwrap();
        assert_eq!(report.merged, 1);
        assert_eq!(a.hashes(), b.hashes());
    }

    #[tokio::test]
    async fn pulls_missing_messages_and_dependencies() {
        let a = TestNode::new();
        let b = TestNode::new();
        seed(&b).await;
        for n in 0..60 {
            b.engine
                .merge_message(&cast(NOW - 500 + n, &format!("cast {n}")))
                .await
                .unwrap();
        }

        let report = a
            .sync
            .diff_sync_if_required("b", &b.client())
            .await
            .unwrap()
            .expect("nodes differ");
        assert_eq!(report.rpc_failures, 0);
        assert_eq!(report.parked, 0);
        assert_eq!(a.hashes(), b.hashes());
        assert_eq!(
            a.service.get_info().root_hash,
            b.service.get_info().root_hash
        );
        assert_eq!(a.engine.get_custody_key(FID).unwrap(), Some(registry().custody_key));

        let again = a.sync.diff_sync_if_required("b", &b.client()).await.unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn failed_rpc_skips_only_its_subtree() {
        struct FailingPrefixes {
            inner: LocalPeerClient,
            metadata: Vec<u8>,
            sync_ids: Vec<u8>,
        }

        #[async_trait::async_trait]
        impl PeerClient for FailingPrefixes {
            async fn get_info(&self) -> Result<hubsync_proto::HubInfo, HubError> {
                self.inner.get_info().await
            }
            async fn get_sync_snapshot_by_prefix(
                &self,
                prefix: &[u8],
            ) -> Result<hubsync_proto::SyncSnapshotResponse, HubError> {
                self.inner.get_sync_snapshot_by_prefix(prefix).await
            }
            async fn get_sync_metadata_by_prefix(
                &self,
                prefix: &[u8],
            ) -> Result<Option<hubsync_trie::NodeMetadata>, HubError> {
                if prefix == self.metadata.as_slice() {
                    return Err(HubError::Transport("metadata unavailable".to_string()));
                }
                self.inner.get_sync_metadata_by_prefix(prefix).await
            }
            async fn get_all_sync_ids_by_prefix(
                &self,
                prefix: &[u8],
            ) -> Result<Vec<SyncId>, HubError> {
                if prefix == self.sync_ids.as_slice() {
                    return Err(HubError::Transport("sync ids unavailable".to_string()));
                }
                self.inner.get_all_sync_ids_by_prefix(prefix).await
            }
            async fn get_all_messages_by_sync_ids(
                &self,
                sync_ids: &[SyncId],
            ) -> Result<Vec<Message>, HubError> {
                self.inner.get_all_messages_by_sync_ids(sync_ids).await
            }
            async fn get_id_registry_event(
                &self,
                fid: Fid,
            ) -> Result<Option<IdRegistryEvent>, HubError> {
                self.inner.get_id_registry_event(fid).await
            }
            async fn get_all_signer_messages_by_fid(
                &self,
                fid: Fid,
            ) -> Result<Vec<Message>, HubError> {
                self.inner.get_all_signer_messages_by_fid(fid).await
            }
        }

        let a = TestNode::new();
        let b = TestNode::new();
        seed(&a).await;
        seed(&b).await;
        // Ten casts under each of 000199950 ..= 000199955.
        for n in 0..60 {
            b.engine
                .merge_message(&cast(NOW - 500 + n, &format!("cast {n}")))
                .await
                .unwrap();
        }

        let client = FailingPrefixes {
            inner: b.client(),
            metadata: b"000199952".to_vec(),
            sync_ids: b"000199954".to_vec(),
        };
        let report = a.sync.diff_sync_if_required("b", &client).await.unwrap().unwrap();
        assert_eq!(report.rpc_failures, 2);
        assert_eq!(report.missing_ids, 40);
        assert_eq!(report.merged, 40);
        assert_eq!(a.hashes().len(), 41);

        // The skipped subtrees come over on the next round.
        let report = a.sync.diff_sync_if_required("b", &b.client()).await.unwrap().unwrap();
        assert_eq!(report.merged, 20);
        assert_eq!(a.hashes(), b.hashes());
    }

    #[tokio::test]
    async fn status_returns_to_idle_with_report() {
        let a = TestNode::new();
        let b = TestNode::new();
        seed(&b).await;
        b.engine.merge_message(&cast(NOW - 30, "hello")).await.unwrap();

        let status = a.sync.subscribe();
        tokio_test::assert_ok!(a.sync.diff_sync_if_required("b", &b.client()).await);

        let status = status.borrow();
        assert_eq!(status.phase, SyncPhase::Idle);
        assert_eq!(status.peer_id.as_deref(), Some("b"));
        let report = status.last_report.as_ref().unwrap();
        assert_eq!(report.missing_ids, 2);
        assert!(!a.sync.is_syncing());
    }

    #[tokio::test]
    async fn blocked_messages_are_parked() {
        struct NoDependencies(LocalPeerClient);

        #[async_trait::async_trait]
        impl PeerClient for NoDependencies {
            async fn get_info(&self) -> Result<hubsync_proto::HubInfo, HubError> {
                self.0.get_info().await
            }
            async fn get_sync_snapshot_by_prefix(
                &self,
                prefix: &[u8],
            ) -> Result<hubsync_proto::SyncSnapshotResponse, HubError> {
                self.0.get_sync_snapshot_by_prefix(prefix).await
            }
            async fn get_sync_metadata_by_prefix(
                &self,
                prefix: &[u8],
            ) -> Result<Option<hubsync_trie::NodeMetadata>, HubError> {
                self.0.get_sync_metadata_by_prefix(prefix).await
            }
            async fn get_all_sync_ids_by_prefix(
                &self,
                prefix: &[u8],
            ) -> Result<Vec<SyncId>, HubError> {
                self.0.get_all_sync_ids_by_prefix(prefix).await
            }
            async fn get_all_messages_by_sync_ids(
                &self,
                sync_ids: &[SyncId],
            ) -> Result<Vec<Message>, HubError> {
                self.0.get_all_messages_by_sync_ids(sync_ids).await
            }
            async fn get_id_registry_event(
                &self,
                _fid: Fid,
            ) -> Result<Option<IdRegistryEvent>, HubError> {
                Err(HubError::Transport("unreachable".to_string()))
            }
            async fn get_all_signer_messages_by_fid(
                &self,
                _fid: Fid,
            ) -> Result<Vec<Message>, HubError> {
                Err(HubError::Transport("unreachable".to_string()))
            }
        }

        let a = TestNode::new();
        let b = TestNode::new();
        seed(&b).await;
        b.engine.merge_message(&cast(NOW - 30, "hello")).await.unwrap();

        let client = NoDependencies(b.client());
        let report = a.sync.diff_sync_if_required("b", &client).await.unwrap().unwrap();
        assert_eq!(report.parked, 2);
        assert_eq!(report.rpc_failures, 1);
        assert_eq!(a.sync.parked_messages(), 2);

        // Parked messages merge once the dependency shows up.
        seed(&a).await;
        let report = a
            .sync
            .perform_sync("b", &b.sync.snapshot(NOW).unwrap(), &b.client())
            .await
            .unwrap();
        assert_eq!(report.parked, 0);
        assert_eq!(a.sync.parked_messages(), 0);
        assert_eq!(a.hashes(), b.hashes());
    }
}
