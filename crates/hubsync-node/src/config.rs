//! Node configuration.

use anyhow::{anyhow, Context, Result};
use hubsync_core::FactType;
use hubsync_store::{EngineOptions, StoreOptions};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Node unique identifier
    pub node_id: Option<Uuid>,

    /// Persistence configuration
    pub persistence: PersistenceConfig,

    /// Periodic job configuration
    pub jobs: JobsConfig,

    /// Prune limit overrides per fact type
    pub prune_limits: HashMap<FactType, StoreOptions>,
}

/// Persistence configuration.
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// Persistence type: "sqlite" or "memory"
    pub store_type: String,

    /// Database path (for SQLite)
    pub db_path: PathBuf,

    /// Rebuild the trie from the stores on start
    pub rebuild_trie: bool,
}

/// Periodic job configuration.
#[derive(Debug, Clone)]
pub struct JobsConfig {
    /// Interval between sync rounds with a random peer
    pub sync_interval: Duration,

    /// Interval between prune passes over every fid
    pub prune_interval: Duration,

    /// Interval between trie unloads
    pub trie_unload_interval: Duration,
}

/// One entry of `HUBSYNC_PRUNE_LIMITS`.
#[derive(Debug, Clone, Copy, Deserialize)]
struct PruneLimit {
    size_limit: usize,
    #[serde(default)]
    time_limit: Option<u32>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            persistence: PersistenceConfig {
                store_type: "sqlite".to_string(),
                db_path: PathBuf::from("./hubsync.db"),
                rebuild_trie: false,
            },
            jobs: JobsConfig {
                sync_interval: Duration::from_secs(60),
                prune_interval: Duration::from_secs(3600),
                trie_unload_interval: Duration::from_secs(900),
            },
            prune_limits: HashMap::new(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `HUBSYNC_NODE_ID`: Node UUID
    /// - `HUBSYNC_STORE_TYPE`: "sqlite" or "memory"
    /// - `HUBSYNC_DB_PATH`: SQLite database path
    /// - `HUBSYNC_SYNC_INTERVAL_SECS`, `HUBSYNC_PRUNE_INTERVAL_SECS`,
    ///   `HUBSYNC_TRIE_UNLOAD_INTERVAL_SECS`: job intervals
    /// - `HUBSYNC_REBUILD_TRIE`: "true" or "1" to rebuild the trie on start
    /// - `HUBSYNC_PRUNE_LIMITS`: JSON map of fact type to
    ///   `{"size_limit": n, "time_limit": secs}`
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set to an unparsable value.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup` instead of the process environment.
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set to an unparsable value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(id) = lookup("HUBSYNC_NODE_ID") {
            config.node_id = Some(Uuid::parse_str(&id).context("Invalid HUBSYNC_NODE_ID")?);
        }

        if let Some(store_type) = lookup("HUBSYNC_STORE_TYPE") {
            if store_type != "sqlite" && store_type != "memory" {
                return Err(anyhow!("Invalid HUBSYNC_STORE_TYPE: {store_type}"));
            }
            config.persistence.store_type = store_type;
        }

        if let Some(db_path) = lookup("HUBSYNC_DB_PATH") {
            config.persistence.db_path = PathBuf::from(db_path);
        }

        if let Some(rebuild) = lookup("HUBSYNC_REBUILD_TRIE") {
            config.persistence.rebuild_trie = matches!(rebuild.as_str(), "1" | "true");
        }

        if let Some(secs) = lookup("HUBSYNC_SYNC_INTERVAL_SECS") {
            config.jobs.sync_interval = parse_secs(&secs, "HUBSYNC_SYNC_INTERVAL_SECS")?;
        }

        if let Some(secs) = lookup("HUBSYNC_PRUNE_INTERVAL_SECS") {
            config.jobs.prune_interval = parse_secs(&secs, "HUBSYNC_PRUNE_INTERVAL_SECS")?;
        }

        if let Some(secs) = lookup("HUBSYNC_TRIE_UNLOAD_INTERVAL_SECS") {
            config.jobs.trie_unload_interval =
                parse_secs(&secs, "HUBSYNC_TRIE_UNLOAD_INTERVAL_SECS")?;
        }

        // Parse prune limits from JSON env var
        if let Some(limits_json) = lookup("HUBSYNC_PRUNE_LIMITS") {
            let limits: HashMap<String, PruneLimit> = serde_json::from_str(&limits_json)
                .context("Invalid HUBSYNC_PRUNE_LIMITS JSON")?;
            for (name, limit) in limits {
                let fact = FactType::from_name(&name)
                    .ok_or_else(|| anyhow!("Unknown fact type in HUBSYNC_PRUNE_LIMITS: {name}"))?;
                config.prune_limits.insert(
                    fact,
                    StoreOptions {
                        prune_size_limit: limit.size_limit,
                        prune_time_limit: limit.time_limit,
                    },
                );
            }
        }

        Ok(config)
    }

    /// Engine options carrying the prune limit overrides.
    #[must_use]
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            store_options: self.prune_limits.clone(),
            ..EngineOptions::default()
        }
    }
}

fn parse_secs(value: &str, name: &str) -> Result<Duration> {
    let secs = u64::from_str(value).with_context(|| format!("Invalid {name}"))?;
    if secs == 0 {
        return Err(anyhow!("{name} must be positive"));
    }
    Ok(Duration::from_secs(secs))
}
