//! Node runtime orchestration.

use crate::config::NodeConfig;
use crate::persistence::SqliteKv;
use anyhow::{Context, Result};
use hubsync_core::{Clock, KvStore, MemoryKv, SystemClock};
use hubsync_store::Engine;
use hubsync_sync::{LocalPeerClient, PeerClient, SyncEngine, SyncReport, SyncService, TrieUpdater};
use hubsync_trie::MerkleTrie;
use parking_lot::RwLock;
use rand::seq::IteratorRandom;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

/// A replication node: engine, trie, sync engine and the peers it pulls from.
pub struct Node {
    config: NodeConfig,
    node_id: Uuid,
    engine: Arc<Engine>,
    updater: Arc<TrieUpdater>,
    sync: SyncEngine,
    service: SyncService,
    peers: RwLock<HashMap<String, Arc<dyn PeerClient>>>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("node_id", &self.node_id)
            .field("peers", &self.peer_ids())
            .finish_non_exhaustive()
    }
}

impl Node {
    /// Create a node with the configured store and the wall clock.
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened or the trie cannot be
    /// loaded.
    pub fn new(config: NodeConfig) -> Result<Self> {
        let db: Arc<dyn KvStore> = if config.persistence.store_type == "sqlite" {
            Arc::new(
                SqliteKv::open(&config.persistence.db_path)
                    .context("Failed to open SQLite database")?,
            )
        } else {
            Arc::new(MemoryKv::new())
        };
        Self::with_db(config, db, Arc::new(SystemClock))
    }

    /// Create a node over `db`, reading time from `clock`.
    ///
    /// # Errors
    ///
    /// Returns error if the trie cannot be loaded or rebuilt.
    pub fn with_db(config: NodeConfig, db: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Result<Self> {
        let node_id = config.node_id.unwrap_or_else(Uuid::new_v4);
        let (engine, events) = Engine::new(Arc::clone(&db), clock, &config.engine_options());
        let engine = Arc::new(engine);

        let trie = MerkleTrie::open(db).context("Failed to load merkle trie")?;
        let updater = Arc::new(TrieUpdater::new(trie.shared(), events));
        if config.persistence.rebuild_trie {
            updater
                .rebuild(&engine)
                .context("Failed to rebuild merkle trie")?;
        }

        let sync = SyncEngine::new(Arc::clone(&engine), Arc::clone(&updater));
        let service = SyncService::new(node_id, Arc::clone(&engine), Arc::clone(&updater))
            .with_status(sync.subscribe());

        {
            let trie = updater.trie().read();
            tracing::info!(
                %node_id,
                items = trie.items(),
                root_hash = %hex::encode(trie.root_hash()),
                "Node initialized"
            );
        }

        Ok(Self {
            config,
            node_id,
            engine,
            updater,
            sync,
            service,
            peers: RwLock::new(HashMap::new()),
        })
    }

    /// Node identifier.
    #[must_use]
    pub fn node_id(&self) -> Uuid {
        self.node_id
    }

    /// Merge engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Sync engine.
    #[must_use]
    pub fn sync_engine(&self) -> &SyncEngine {
        &self.sync
    }

    /// RPC service answering peers.
    #[must_use]
    pub fn service(&self) -> &SyncService {
        &self.service
    }

    /// In-process client other nodes can register as a peer.
    #[must_use]
    pub fn client(&self) -> LocalPeerClient {
        LocalPeerClient::new(self.service.clone())
    }

    /// Register or replace a peer.
    pub fn add_peer(&self, peer_id: impl Into<String>, client: Arc<dyn PeerClient>) {
        let peer_id = peer_id.into();
        tracing::info!(%peer_id, "Peer registered");
        self.peers.write().insert(peer_id, client);
    }

    /// Forget a peer; returns whether it was registered.
    pub fn remove_peer(&self, peer_id: &str) -> bool {
        self.peers.write().remove(peer_id).is_some()
    }

    /// Registered peer ids, sorted.
    #[must_use]
    pub fn peer_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.peers.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Sync with one registered peer if its snapshot differs.
    ///
    /// # Errors
    ///
    /// Returns error if the peer is unknown, its snapshot cannot be fetched, or
    /// another round is running.
    pub async fn sync_with_peer(&self, peer_id: &str) -> Result<Option<SyncReport>> {
        let client = self
            .peers
            .read()
            .get(peer_id)
            .cloned()
            .with_context(|| format!("Unknown peer {peer_id}"))?;
        self.sync
            .diff_sync_if_required(peer_id, client.as_ref())
            .await
            .with_context(|| format!("Sync with {peer_id} failed"))
    }

    /// Sync with a randomly chosen peer; `None` when no peer is registered or
    /// no sync was needed.
    ///
    /// # Errors
    ///
    /// Returns error if the chosen peer's sync fails.
    pub async fn sync_with_random_peer(&self) -> Result<Option<SyncReport>> {
        let chosen = self
            .peers
            .read()
            .keys()
            .choose(&mut rand::thread_rng())
            .cloned();
        match chosen {
            Some(peer_id) => self.sync_with_peer(&peer_id).await,
            None => {
                tracing::debug!("No peers registered, skipping sync");
                Ok(None)
            }
        }
    }

    /// Prune every fid; returns how many messages were pruned.
    ///
    /// # Errors
    ///
    /// Returns error if the fid list cannot be read.
    pub async fn prune(&self) -> Result<usize> {
        let pruned = self.engine.prune_all().await.context("Prune failed")?;
        self.updater.drain();
        Ok(pruned)
    }

    /// Flush the trie and drop its loaded nodes below the root.
    ///
    /// # Errors
    ///
    /// Returns error if the trie cannot be written.
    pub fn unload_trie(&self) -> Result<()> {
        self.updater.drain();
        self.updater
            .trie()
            .write()
            .unload_children_at_root()
            .context("Failed to unload merkle trie")
    }

    /// Stop any running round and flush the trie.
    ///
    /// # Errors
    ///
    /// Returns error if the trie cannot be written.
    pub fn shutdown(&self) -> Result<()> {
        self.sync.stop();
        self.updater.drain();
        self.updater
            .trie()
            .write()
            .commit_to_db()
            .context("Failed to flush merkle trie")?;
        tracing::info!(node_id = %self.node_id, "Node stopped");
        Ok(())
    }

    /// Run the periodic jobs until Ctrl+C.
    ///
    /// # Errors
    ///
    /// Returns error if the final trie flush fails.
    pub async fn run(&self) -> Result<()> {
        tracing::info!("Node running, press Ctrl+C to stop");
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
        })
        .await
    }

    /// Run the periodic jobs until `shutdown` completes.
    ///
    /// Every job runs once right away, then at its interval.
    ///
    /// # Errors
    ///
    /// Returns error if the final trie flush fails.
    pub async fn run_until(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let jobs = &self.config.jobs;
        let mut sync_tick = tokio::time::interval(jobs.sync_interval);
        let mut prune_tick = tokio::time::interval(jobs.prune_interval);
        let mut unload_tick = tokio::time::interval(jobs.trie_unload_interval);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = sync_tick.tick() => {
                    match self.sync_with_random_peer().await {
                        Ok(Some(report)) => {
                            tracing::info!(
                                peer_id = %report.peer_id,
                                merged = report.merged,
                                "Sync job finished"
                            );
                        }
                        Ok(None) => {}
                        Err(err) => tracing::warn!(error = %err, "Sync job failed"),
                    }
                }

                _ = prune_tick.tick() => {
                    match self.prune().await {
                        Ok(pruned) => tracing::debug!(pruned, "Prune job finished"),
                        Err(err) => tracing::warn!(error = %err, "Prune job failed"),
                    }
                }

                _ = unload_tick.tick() => {
                    if let Err(err) = self.unload_trie() {
                        tracing::warn!(error = %err, "Trie unload job failed");
                    }
                }

                // Handle shutdown
                () = &mut shutdown => break,
            }
        }

        self.shutdown()
    }
}
