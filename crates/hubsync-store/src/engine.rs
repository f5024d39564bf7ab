//! Merge engine.
//!
//! The engine owns one store per fact type, all sharing a KV store, a per-fid
//! lock and an event channel. It validates incoming messages, checks their
//! dependencies against the id registry and the signer store, and routes them.
//!
//! Signer messages must be signed by the fid's custody key; every other
//! message needs an active `SignerAdd` for its signer. Removing a signer, or
//! moving custody away from the key that added it, revokes everything that
//! signer signed.

use crate::event::{HubEvent, StoreEventHandler};
use crate::lock::{KeyedMutex, DEFAULT_LOCK_TIMEOUT, DEFAULT_MAX_PENDING};
use crate::store::{
    CastStore, FactRules, LinkStore, MergeOutcome, ReactionStore, SignerStore, Store, StoreOptions,
    UserDataStore, VerificationStore,
};
use hubsync_core::keys::id_registry_key;
use hubsync_core::{
    validate_message, BlockedReason, Clock, FactType, Fid, HubError, IdRegistryEvent, KvStore,
    Message, MessageBody, MessageType, RootPrefix, TsHash, WriteBatch,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// How long a merge waits for its fid's lock
    pub lock_timeout: Duration,
    /// Cap on holders plus waiters of one fid's lock
    pub max_pending_per_fid: usize,
    /// Prune limit overrides; facts not listed use their defaults
    pub store_options: HashMap<FactType, StoreOptions>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            max_pending_per_fid: DEFAULT_MAX_PENDING,
            store_options: HashMap::new(),
        }
    }
}

impl EngineOptions {
    fn store_options<F: FactRules>(&self) -> StoreOptions {
        self.store_options
            .get(&F::FACT)
            .copied()
            .unwrap_or_else(StoreOptions::for_fact::<F>)
    }
}

/// Runs `$body` with `$store` bound to the store of `$fact`.
macro_rules! with_store {
    ($engine:expr, $fact:expr, $store:ident => $body:expr) => {
        match $fact {
            FactType::Cast => {
                let $store = &$engine.casts;
                $body
            }
            FactType::Reaction => {
                let $store = &$engine.reactions;
                $body
            }
            FactType::Link => {
                let $store = &$engine.links;
                $body
            }
            FactType::Verification => {
                let $store = &$engine.verifications;
                $body
            }
            FactType::Signer => {
                let $store = &$engine.signers;
                $body
            }
            FactType::UserData => {
                let $store = &$engine.user_data;
                $body
            }
        }
    };
}

/// Validates, routes and cascades message merges.
pub struct Engine {
    db: Arc<dyn KvStore>,
    events: StoreEventHandler,
    lock: KeyedMutex<Fid>,
    clock: Arc<dyn Clock>,
    casts: CastStore,
    reactions: ReactionStore,
    links: LinkStore,
    verifications: VerificationStore,
    signers: SignerStore,
    user_data: UserDataStore,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("lock", &self.lock)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Create an engine over `db` and the receiver of its events.
    #[must_use]
    pub fn new(
        db: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        options: &EngineOptions,
    ) -> (Self, UnboundedReceiver<HubEvent>) {
        fn store<F: FactRules>(
            events: &StoreEventHandler,
            lock: &KeyedMutex<Fid>,
            clock: &Arc<dyn Clock>,
            options: &EngineOptions,
        ) -> Store<F> {
            Store::new(
                events.clone(),
                lock.clone(),
                Arc::clone(clock),
                options.store_options::<F>(),
            )
        }

        let (events, receiver) = StoreEventHandler::new(Arc::clone(&db));
        let lock = KeyedMutex::new(options.lock_timeout, options.max_pending_per_fid);
        let engine = Self {
            casts: store(&events, &lock, &clock, options),
            reactions: store(&events, &lock, &clock, options),
            links: store(&events, &lock, &clock, options),
            verifications: store(&events, &lock, &clock, options),
            signers: store(&events, &lock, &clock, options),
            user_data: store(&events, &lock, &clock, options),
            db,
            events,
            lock,
            clock,
        };
        (engine, receiver)
    }

    /// Validate and merge one message.
    ///
    /// # Errors
    ///
    /// - [`HubError::Validation`] if the message is malformed, or a signer
    ///   message is not signed by the custody key
    /// - [`HubError::Blocked`] if the fid has no custody key or the signer is
    ///   not active
    /// - any error of [`Store::merge`]
    pub async fn merge_message(&self, message: &Message) -> Result<MergeOutcome, HubError> {
        validate_message(message, self.clock.now())?;
        let fid = message.fid();

        // Dependencies are read under the fid lock so a concurrent SignerRemove
        // either commits first and blocks this message, or revokes it after.
        let outcome = {
            let guard = self.lock.acquire(fid).await?;
            self.check_dependencies(message)?;
            with_store!(self, message.fact_type(), store => store.merge_locked(message, &guard))?
        };

        if let (MessageBody::SignerRemove(body), MergeOutcome::Committed { .. }) =
            (&message.data.body, &outcome)
        {
            self.revoke_signer(fid, &body.signer).await;
        }
        Ok(outcome)
    }

    /// Custody key present, and the right signer for the message's fact type.
    fn check_dependencies(&self, message: &Message) -> Result<(), HubError> {
        let fid = message.fid();
        let custody_key = self
            .get_custody_key(fid)?
            .ok_or(HubError::Blocked(BlockedReason::UnknownFid { fid }))?;

        if message.fact_type() == FactType::Signer {
            if message.signer != custody_key {
                return Err(HubError::validation(
                    "signer messages must be signed by the custody key",
                ));
            }
        } else if self.signers.get_add(fid, &message.signer)?.is_none() {
            return Err(HubError::Blocked(BlockedReason::UnknownSigner {
                fid,
                signer: message.signer.clone(),
            }));
        }
        Ok(())
    }

    /// Merge messages one by one, collecting each result.
    pub async fn merge_messages(&self, messages: &[Message]) -> Vec<Result<MergeOutcome, HubError>> {
        let mut results = Vec::with_capacity(messages.len());
        for message in messages {
            results.push(self.merge_message(message).await);
        }
        results
    }

    /// Record a custody assignment.
    ///
    /// Returns `false` if the identical event is already stored. When custody
    /// moves to a new key, the signer messages of the old key are revoked.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Conflict`] if a later block is already recorded.
    pub async fn merge_id_registry_event(&self, event: &IdRegistryEvent) -> Result<bool, HubError> {
        let fid = event.fid;
        let previous = {
            let _guard = self.lock.acquire(fid).await?;
            let previous = self.get_id_registry_event(fid)?;
            if let Some(existing) = &previous {
                if existing == event {
                    return Ok(false);
                }
                if existing.block_number >= event.block_number {
                    return Err(HubError::Conflict(format!(
                        "id registry event for fid {fid} at block {} is newer",
                        existing.block_number
                    )));
                }
            }

            let mut batch = WriteBatch::new();
            batch.put(id_registry_key(fid), event.to_bytes()?);
            self.events.commit_transaction(
                batch,
                HubEvent::MergeIdRegistryEvent {
                    event: event.clone(),
                },
            )?;
            previous
        };

        tracing::info!(fid, block = event.block_number, "Merged id registry event");

        if let Some(old) = previous {
            if old.custody_key != event.custody_key {
                let revoked = self.signers.revoke(fid, &old.custody_key).await?;
                for message in &revoked {
                    if let MessageBody::SignerAdd(body) = &message.data.body {
                        self.revoke_signer(fid, &body.signer).await;
                    }
                }
            }
        }
        Ok(true)
    }

    /// Stored custody assignment of `fid`.
    ///
    /// # Errors
    ///
    /// Returns a storage failure if the KV store fails.
    pub fn get_id_registry_event(&self, fid: Fid) -> Result<Option<IdRegistryEvent>, HubError> {
        self.db
            .get(&id_registry_key(fid))?
            .map(|bytes| IdRegistryEvent::from_bytes(&bytes))
            .transpose()
    }

    /// Custody key of `fid`, if registered.
    ///
    /// # Errors
    ///
    /// Returns a storage failure if the KV store fails.
    pub fn get_custody_key(&self, fid: Fid) -> Result<Option<Vec<u8>>, HubError> {
        Ok(self.get_id_registry_event(fid)?.map(|event| event.custody_key))
    }

    /// Every registered fid, ascending.
    ///
    /// # Errors
    ///
    /// Returns a storage failure if the KV store fails.
    pub fn get_fids(&self) -> Result<Vec<Fid>, HubError> {
        self.db
            .scan_prefix(&[RootPrefix::IdRegistry as u8])?
            .into_iter()
            .map(|(key, _)| {
                let bytes: [u8; 8] = key
                    .get(1..9)
                    .and_then(|bytes| bytes.try_into().ok())
                    .ok_or_else(|| HubError::storage("malformed id registry key"))?;
                Ok(Fid::from_be_bytes(bytes))
            })
            .collect()
    }

    /// Stored message by type and tsHash.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] if absent.
    pub fn get_message(
        &self,
        fid: Fid,
        message_type: MessageType,
        ts_hash: &TsHash,
    ) -> Result<Message, HubError> {
        with_store!(self, message_type.fact_type(), store => store.get_message(fid, ts_hash))
    }

    /// Every stored message of `fid` across all fact types.
    ///
    /// # Errors
    ///
    /// Returns a storage failure if the KV store fails.
    pub fn get_all_messages_by_fid(&self, fid: Fid) -> Result<Vec<Message>, HubError> {
        let mut messages = Vec::new();
        for fact in FactType::ALL {
            messages.extend(with_store!(self, fact, store => store.get_all_messages_by_fid(fid))?);
        }
        Ok(messages)
    }

    /// Signer adds and removes of `fid`.
    ///
    /// # Errors
    ///
    /// Returns a storage failure if the KV store fails.
    pub fn get_signer_messages_by_fid(&self, fid: Fid) -> Result<Vec<Message>, HubError> {
        self.signers.get_all_messages_by_fid(fid)
    }

    /// Every stored message of every fid.
    ///
    /// # Errors
    ///
    /// Returns a storage failure if the KV store fails.
    pub fn get_all_messages(&self) -> Result<Vec<Message>, HubError> {
        let mut messages = Vec::new();
        for fact in FactType::ALL {
            messages.extend(with_store!(self, fact, store => store.get_all_messages())?);
        }
        Ok(messages)
    }

    /// Prune every store of `fid`; returns the number of pruned messages.
    ///
    /// Failures of one store are logged and do not stop the others. Pruning a
    /// `SignerAdd` revokes what that signer signed.
    pub async fn prune_messages(&self, fid: Fid) -> usize {
        let mut total = 0;
        for fact in FactType::ALL {
            match with_store!(self, fact, store => store.prune_messages(fid).await) {
                Ok(pruned) => {
                    total += pruned.len();
                    for message in &pruned {
                        if let MessageBody::SignerAdd(body) = &message.data.body {
                            self.revoke_signer(fid, &body.signer).await;
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(fid, fact = fact.as_str(), error = %err, "Prune failed");
                }
            }
        }
        total
    }

    /// Prune every registered fid.
    ///
    /// # Errors
    ///
    /// Returns a storage failure if the fids cannot be listed.
    pub async fn prune_all(&self) -> Result<usize, HubError> {
        let mut total = 0;
        for fid in self.get_fids()? {
            total += self.prune_messages(fid).await;
        }
        if total > 0 {
            tracing::info!(pruned = total, "Prune job finished");
        }
        Ok(total)
    }

    /// Revoke everything `signer` signed for `fid` outside the signer store.
    pub async fn revoke_signer(&self, fid: Fid, signer: &[u8]) -> usize {
        let mut total = 0;
        for fact in FactType::ALL {
            if fact == FactType::Signer {
                continue;
            }
            match with_store!(self, fact, store => store.revoke(fid, signer).await) {
                Ok(revoked) => total += revoked.len(),
                Err(err) => {
                    tracing::warn!(fid, fact = fact.as_str(), error = %err, "Revoke failed");
                }
            }
        }
        total
    }

    /// Cast store.
    #[must_use]
    pub fn casts(&self) -> &CastStore {
        &self.casts
    }

    /// Reaction store.
    #[must_use]
    pub fn reactions(&self) -> &ReactionStore {
        &self.reactions
    }

    /// Link store.
    #[must_use]
    pub fn links(&self) -> &LinkStore {
        &self.links
    }

    /// Verification store.
    #[must_use]
    pub fn verifications(&self) -> &VerificationStore {
        &self.verifications
    }

    /// Signer store.
    #[must_use]
    pub fn signers(&self) -> &SignerStore {
        &self.signers
    }

    /// Profile field store.
    #[must_use]
    pub fn user_data(&self) -> &UserDataStore {
        &self.user_data
    }

    /// Shared KV store.
    #[must_use]
    pub fn db(&self) -> &Arc<dyn KvStore> {
        &self.db
    }

    /// Clock used for validation and pruning.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}
