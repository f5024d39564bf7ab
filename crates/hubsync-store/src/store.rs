//! Generic Add/Remove CRDT store.
//!
//! One [`Store`] per fact type keeps, for every `(fid, target)`, the single
//! message that wins under the comparator below. Rows live under the primary,
//! adds/removes, by-signer and by-target indices of [`hubsync_core::keys`], and
//! every mutation writes or deletes all of a message's rows in one batch.
//!
//! # Ordering
//!
//! Messages on one target are ordered by `(timestamp, kind, hash)`:
//! the later timestamp wins, a Remove beats an Add at equal timestamps, and
//! the larger hash breaks remaining ties. Equal in all three means the same
//! message. Cast removes beat cast adds regardless of timestamp.

use crate::event::{HubEvent, StoreEventHandler};
use crate::lock::{KeyedGuard, KeyedMutex};
use hubsync_core::keys::{
    by_signer_key, by_target_key, by_target_prefix, conflict_target, message_key,
    reverse_target, split_by_target_key, target_index_key, user_postfix_prefix,
};
use hubsync_core::{
    Clock, FactType, Fid, HubError, KvStore, Message, MessageKind, RootPrefix, TsHash,
    UserPostfix, WriteBatch, TS_HASH_LENGTH,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Per-fact behaviour plugged into [`Store`].
pub trait FactRules: Send + Sync + 'static {
    /// Fact type handled by the store.
    const FACT: FactType;
    /// Default cap on stored messages per fid.
    const PRUNE_SIZE_LIMIT: usize;
    /// Default maximum age in seconds, if any.
    const PRUNE_TIME_LIMIT: Option<u32> = None;
    /// Whether a Remove beats an Add regardless of timestamp.
    const REMOVE_ALWAYS_WINS: bool = false;
}

const DAY: u32 = 60 * 60 * 24;

/// Casts: 10 000 per fid for one year; a removed cast can never be re-added.
#[derive(Debug)]
pub struct CastFact;
impl FactRules for CastFact {
    const FACT: FactType = FactType::Cast;
    const PRUNE_SIZE_LIMIT: usize = 10_000;
    const PRUNE_TIME_LIMIT: Option<u32> = Some(365 * DAY);
    const REMOVE_ALWAYS_WINS: bool = true;
}

/// Reactions: 5 000 per fid for 90 days.
#[derive(Debug)]
pub struct ReactionFact;
impl FactRules for ReactionFact {
    const FACT: FactType = FactType::Reaction;
    const PRUNE_SIZE_LIMIT: usize = 5_000;
    const PRUNE_TIME_LIMIT: Option<u32> = Some(90 * DAY);
}

/// Links: 2 500 per fid.
#[derive(Debug)]
pub struct LinkFact;
impl FactRules for LinkFact {
    const FACT: FactType = FactType::Link;
    const PRUNE_SIZE_LIMIT: usize = 2_500;
}

/// Verifications: 50 per fid.
#[derive(Debug)]
pub struct VerificationFact;
impl FactRules for VerificationFact {
    const FACT: FactType = FactType::Verification;
    const PRUNE_SIZE_LIMIT: usize = 50;
}

/// Signers: 100 per fid.
#[derive(Debug)]
pub struct SignerFact;
impl FactRules for SignerFact {
    const FACT: FactType = FactType::Signer;
    const PRUNE_SIZE_LIMIT: usize = 100;
}

/// Profile fields: 100 per fid.
#[derive(Debug)]
pub struct UserDataFact;
impl FactRules for UserDataFact {
    const FACT: FactType = FactType::UserData;
    const PRUNE_SIZE_LIMIT: usize = 100;
}

/// Cast store.
pub type CastStore = Store<CastFact>;
/// Reaction store.
pub type ReactionStore = Store<ReactionFact>;
/// Link store.
pub type LinkStore = Store<LinkFact>;
/// Verification store.
pub type VerificationStore = Store<VerificationFact>;
/// Signer store.
pub type SignerStore = Store<SignerFact>;
/// Profile field store.
pub type UserDataStore = Store<UserDataFact>;

/// Prune limits of one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreOptions {
    /// Cap on stored messages per fid
    pub prune_size_limit: usize,
    /// Maximum age in seconds, if any
    pub prune_time_limit: Option<u32>,
}

impl StoreOptions {
    /// Defaults of the fact type `F`.
    #[must_use]
    pub fn for_fact<F: FactRules>() -> Self {
        Self {
            prune_size_limit: F::PRUNE_SIZE_LIMIT,
            prune_time_limit: F::PRUNE_TIME_LIMIT,
        }
    }
}

/// Result of a merge that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The message is now stored; `deleted` lost to it
    Committed {
        /// Losers removed in the same batch
        deleted: Vec<Message>,
    },
    /// The message was already stored
    Duplicate,
}

impl MergeOutcome {
    /// Whether the merge changed state.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        matches!(self, MergeOutcome::Committed { .. })
    }
}

/// Add/Remove CRDT store for one fact type.
pub struct Store<F: FactRules> {
    db: Arc<dyn KvStore>,
    events: StoreEventHandler,
    lock: KeyedMutex<Fid>,
    clock: Arc<dyn Clock>,
    options: StoreOptions,
    _fact: PhantomData<F>,
}

impl<F: FactRules> fmt::Debug for Store<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("fact", &F::FACT)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<F: FactRules> Store<F> {
    /// Create a store writing through `events` and serialized by `lock`.
    #[must_use]
    pub fn new(
        events: StoreEventHandler,
        lock: KeyedMutex<Fid>,
        clock: Arc<dyn Clock>,
        options: StoreOptions,
    ) -> Self {
        Self {
            db: Arc::clone(events.db()),
            events,
            lock,
            clock,
            options,
            _fact: PhantomData,
        }
    }

    /// Prune limits in force.
    #[must_use]
    pub fn options(&self) -> StoreOptions {
        self.options
    }

    /// Merge a message of this store's fact type.
    ///
    /// # Errors
    ///
    /// - [`HubError::Validation`] if the message belongs to another fact type
    /// - [`HubError::Prunable`] if it would be pruned right away
    /// - [`HubError::Conflict`] if a stored message on the same target wins
    /// - [`HubError::StorageFailure`] on lock timeout or KV failure
    pub async fn merge(&self, message: &Message) -> Result<MergeOutcome, HubError> {
        let guard = self.lock.acquire(message.fid()).await?;
        self.merge_locked(message, &guard)
    }

    /// Merge while the caller already holds the lock of the message's fid.
    ///
    /// # Errors
    ///
    /// Same as [`Store::merge`]; a guard for another fid is a storage failure.
    pub fn merge_locked(
        &self,
        message: &Message,
        guard: &KeyedGuard<Fid>,
    ) -> Result<MergeOutcome, HubError> {
        if message.fact_type() != F::FACT {
            return Err(HubError::validation(format!(
                "invalid message type {:?} for {} store",
                message.message_type(),
                F::FACT.as_str()
            )));
        }
        let ts_hash = message.ts_hash()?;
        let fid = message.fid();
        if *guard.key() != fid {
            return Err(HubError::storage("merge guard held for another fid"));
        }

        if self.is_prunable(message, &ts_hash)? {
            return Err(HubError::Prunable("message would be pruned".to_string()));
        }

        let target = conflict_target(&message.data.body, &message.hash)?;
        let deleted = match self.merge_conflicts(message, &ts_hash, &target) {
            Ok(deleted) => deleted,
            Err(HubError::Duplicate) => {
                tracing::debug!(fid, ts_hash = %ts_hash, "Duplicate message");
                return Ok(MergeOutcome::Duplicate);
            }
            Err(err) => return Err(err),
        };

        let mut batch = WriteBatch::new();
        for loser in &deleted {
            self.delete_rows(&mut batch, loser)?;
        }
        self.put_rows(&mut batch, message, &ts_hash, &target)?;

        self.events.commit_transaction(
            batch,
            HubEvent::MergeMessage {
                message: message.clone(),
                deleted_messages: deleted.clone(),
            },
        )?;

        tracing::debug!(
            fid,
            message_type = ?message.message_type(),
            deleted = deleted.len(),
            "Merged message"
        );
        Ok(MergeOutcome::Committed { deleted })
    }

    /// Delete every message of `fid` signed by `signer`.
    ///
    /// No comparator runs; each deletion is its own batch with a
    /// [`HubEvent::RevokeMessage`]. Per-message failures are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns a storage failure if the lock or the index scan fails.
    pub async fn revoke(&self, fid: Fid, signer: &[u8]) -> Result<Vec<Message>, HubError> {
        let _guard = self.lock.acquire(fid).await?;

        let postfix = F::FACT.message_postfix();
        let mut prefix = hubsync_core::keys::by_signer_prefix(fid, signer);
        prefix.push(postfix as u8);

        let mut revoked = Vec::new();
        for (key, _) in self.db.scan_prefix(&prefix)? {
            let result = TsHash::from_slice(&key[prefix.len()..])
                .and_then(|ts_hash| self.get_message(fid, &ts_hash))
                .and_then(|message| {
                    let mut batch = WriteBatch::new();
                    self.delete_rows(&mut batch, &message)?;
                    self.events.commit_transaction(
                        batch,
                        HubEvent::RevokeMessage {
                            message: message.clone(),
                        },
                    )?;
                    Ok(message)
                });
            match result {
                Ok(message) => revoked.push(message),
                Err(err) => {
                    tracing::warn!(fid, error = %err, "Failed to revoke message");
                }
            }
        }

        if !revoked.is_empty() {
            tracing::info!(
                fid,
                signer = %hex::encode(signer),
                fact = F::FACT.as_str(),
                revoked = revoked.len(),
                "Revoked messages"
            );
        }
        Ok(revoked)
    }

    /// Delete one stored message and its index rows.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] if the message is not stored.
    pub async fn revoke_message(&self, message: &Message) -> Result<(), HubError> {
        let fid = message.fid();
        let ts_hash = message.ts_hash()?;
        let _guard = self.lock.acquire(fid).await?;

        let stored = self.get_message(fid, &ts_hash)?;
        let mut batch = WriteBatch::new();
        self.delete_rows(&mut batch, &stored)?;
        self.events
            .commit_transaction(batch, HubEvent::RevokeMessage { message: stored })
    }

    /// Delete the oldest messages of `fid` until both prune limits hold.
    ///
    /// # Errors
    ///
    /// Returns a storage failure if the lock or the scan fails.
    pub async fn prune_messages(&self, fid: Fid) -> Result<Vec<Message>, HubError> {
        let _guard = self.lock.acquire(fid).await?;

        let rows = self
            .db
            .scan_prefix(&user_postfix_prefix(fid, F::FACT.message_postfix()))?;
        let mut remaining = rows.len();
        let cutoff = self
            .options
            .prune_time_limit
            .map(|limit| self.clock.now().saturating_sub(limit));

        let mut pruned = Vec::new();
        for (_, value) in rows {
            let message = match Message::from_bytes(&value) {
                Ok(message) => message,
                Err(err) => {
                    tracing::warn!(fid, error = %err, "Skipping undecodable message");
                    continue;
                }
            };

            let over_size = remaining > self.options.prune_size_limit;
            let expired = cutoff.is_some_and(|cutoff| message.timestamp() < cutoff);
            if !over_size && !expired {
                break;
            }

            let mut batch = WriteBatch::new();
            let result = self.delete_rows(&mut batch, &message).and_then(|()| {
                self.events.commit_transaction(
                    batch,
                    HubEvent::PruneMessage {
                        message: message.clone(),
                    },
                )
            });
            match result {
                Ok(()) => {
                    remaining -= 1;
                    pruned.push(message);
                }
                Err(err) => tracing::warn!(fid, error = %err, "Failed to prune message"),
            }
        }

        if !pruned.is_empty() {
            tracing::debug!(fid, fact = F::FACT.as_str(), pruned = pruned.len(), "Pruned messages");
        }
        Ok(pruned)
    }

    /// Stored message by tsHash.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] if absent.
    pub fn get_message(&self, fid: Fid, ts_hash: &TsHash) -> Result<Message, HubError> {
        let key = message_key(fid, F::FACT.message_postfix(), ts_hash);
        match self.db.get(&key)? {
            Some(bytes) => Message::from_bytes(&bytes),
            None => Err(HubError::NotFound(format!(
                "{} message {ts_hash} for fid {fid}",
                F::FACT.as_str()
            ))),
        }
    }

    /// Winning Add on `target`, if any.
    ///
    /// # Errors
    ///
    /// Returns a storage failure if the KV store fails.
    pub fn get_add(&self, fid: Fid, target: &[u8]) -> Result<Option<Message>, HubError> {
        self.get_by_index(fid, F::FACT.adds_postfix(), target)
    }

    /// Winning Remove on `target`, if any.
    ///
    /// # Errors
    ///
    /// Returns a storage failure if the KV store fails.
    pub fn get_remove(&self, fid: Fid, target: &[u8]) -> Result<Option<Message>, HubError> {
        match F::FACT.removes_postfix() {
            Some(postfix) => self.get_by_index(fid, postfix, target),
            None => Ok(None),
        }
    }

    /// Every stored Add of `fid`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a storage failure if the KV store fails.
    pub fn get_adds_by_fid(&self, fid: Fid) -> Result<Vec<Message>, HubError> {
        Ok(self
            .get_all_messages_by_fid(fid)?
            .into_iter()
            .filter(|message| message.kind() == MessageKind::Add)
            .collect())
    }

    /// Every stored Remove of `fid`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a storage failure if the KV store fails.
    pub fn get_removes_by_fid(&self, fid: Fid) -> Result<Vec<Message>, HubError> {
        Ok(self
            .get_all_messages_by_fid(fid)?
            .into_iter()
            .filter(|message| message.kind() == MessageKind::Remove)
            .collect())
    }

    /// Every stored message of `fid`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a storage failure if the KV store fails.
    pub fn get_all_messages_by_fid(&self, fid: Fid) -> Result<Vec<Message>, HubError> {
        self.db
            .scan_prefix(&user_postfix_prefix(fid, F::FACT.message_postfix()))?
            .into_iter()
            .map(|(_, value)| Message::from_bytes(&value))
            .collect()
    }

    /// Every stored message of `fid` signed by `signer`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a storage failure if the KV store fails.
    pub fn get_messages_by_signer(&self, fid: Fid, signer: &[u8]) -> Result<Vec<Message>, HubError> {
        let mut prefix = hubsync_core::keys::by_signer_prefix(fid, signer);
        prefix.push(F::FACT.message_postfix() as u8);
        self.db
            .scan_prefix(&prefix)?
            .into_iter()
            .map(|(key, _)| {
                let ts_hash = TsHash::from_slice(&key[prefix.len()..])?;
                self.get_message(fid, &ts_hash)
            })
            .collect()
    }

    /// Messages of any fid pointing at `reverse_target`: replies to a cast,
    /// reactions to a cast, or links to a fid.
    ///
    /// # Errors
    ///
    /// Returns a storage failure if the KV store fails.
    pub fn get_by_target(&self, reverse_target: &[u8]) -> Result<Vec<Message>, HubError> {
        let prefix = by_target_prefix(F::FACT.message_postfix(), reverse_target);
        let expected_len = prefix.len() + 8 + TS_HASH_LENGTH;
        self.db
            .scan_prefix(&prefix)?
            .into_iter()
            .filter(|(key, _)| key.len() == expected_len)
            .map(|(key, _)| {
                let (fid, ts_hash) = split_by_target_key(&key)?;
                self.get_message(fid, &ts_hash)
            })
            .collect()
    }

    /// Number of stored messages of `fid`.
    ///
    /// # Errors
    ///
    /// Returns a storage failure if the KV store fails.
    pub fn message_count(&self, fid: Fid) -> Result<usize, HubError> {
        Ok(self
            .db
            .scan_prefix(&user_postfix_prefix(fid, F::FACT.message_postfix()))?
            .len())
    }

    /// Every stored message of every fid, by fid then age.
    ///
    /// # Errors
    ///
    /// Returns a storage failure if the KV store fails.
    pub fn get_all_messages(&self) -> Result<Vec<Message>, HubError> {
        let postfix = F::FACT.message_postfix() as u8;
        let primary_len = 1 + 8 + 1 + TS_HASH_LENGTH;
        self.db
            .scan_prefix(&[RootPrefix::User as u8])?
            .into_iter()
            .filter(|(key, _)| key.len() == primary_len && key[9] == postfix)
            .map(|(_, value)| Message::from_bytes(&value))
            .collect()
    }

    fn get_by_index(
        &self,
        fid: Fid,
        postfix: UserPostfix,
        target: &[u8],
    ) -> Result<Option<Message>, HubError> {
        match self.db.get(&target_index_key(fid, postfix, target))? {
            Some(ts_hash) => {
                let ts_hash = TsHash::from_slice(&ts_hash)?;
                self.get_message(fid, &ts_hash).map(Some)
            }
            None => Ok(None),
        }
    }

    fn compare(
        a_kind: MessageKind,
        a_ts_hash: &TsHash,
        b_kind: MessageKind,
        b_ts_hash: &TsHash,
    ) -> Ordering {
        if F::REMOVE_ALWAYS_WINS && a_kind != b_kind {
            return a_kind.cmp(&b_kind);
        }
        a_ts_hash
            .timestamp()
            .cmp(&b_ts_hash.timestamp())
            .then(a_kind.cmp(&b_kind))
            .then_with(|| a_ts_hash.hash().cmp(b_ts_hash.hash()))
    }

    /// Stored messages on `target` that lose to `message`.
    ///
    /// Fails with `Conflict` if a stored one wins, or `Duplicate` if the
    /// message itself is stored.
    fn merge_conflicts(
        &self,
        message: &Message,
        ts_hash: &TsHash,
        target: &[u8],
    ) -> Result<Vec<Message>, HubError> {
        let fid = message.fid();
        let kind = message.kind();
        let mut conflicts = Vec::new();

        let indices = [
            F::FACT.removes_postfix().map(|postfix| (MessageKind::Remove, postfix)),
            Some((MessageKind::Add, F::FACT.adds_postfix())),
        ];
        for (existing_kind, postfix) in indices.into_iter().flatten() {
            let Some(existing) = self.db.get(&target_index_key(fid, postfix, target))? else {
                continue;
            };
            let existing_ts_hash = TsHash::from_slice(&existing)?;
            match Self::compare(existing_kind, &existing_ts_hash, kind, ts_hash) {
                Ordering::Greater => {
                    let winner = match existing_kind {
                        MessageKind::Add => "add",
                        MessageKind::Remove => "remove",
                    };
                    return Err(HubError::Conflict(format!(
                        "message conflicts with a more recent {winner}"
                    )));
                }
                Ordering::Equal => return Err(HubError::Duplicate),
                Ordering::Less => conflicts.push(self.get_message(fid, &existing_ts_hash)?),
            }
        }
        Ok(conflicts)
    }

    /// Whether merging `message` would be undone by the next prune.
    fn is_prunable(&self, message: &Message, ts_hash: &TsHash) -> Result<bool, HubError> {
        if let Some(limit) = self.options.prune_time_limit {
            if message.timestamp() < self.clock.now().saturating_sub(limit) {
                return Ok(true);
            }
        }

        let prefix = user_postfix_prefix(message.fid(), F::FACT.message_postfix());
        let rows = self.db.scan_prefix(&prefix)?;
        if rows.len() < self.options.prune_size_limit {
            return Ok(false);
        }
        match rows.first() {
            Some((key, _)) => {
                let earliest = TsHash::from_slice(&key[prefix.len()..])?;
                Ok(*ts_hash < earliest)
            }
            None => Ok(false),
        }
    }

    fn put_rows(
        &self,
        batch: &mut WriteBatch,
        message: &Message,
        ts_hash: &TsHash,
        target: &[u8],
    ) -> Result<(), HubError> {
        let fid = message.fid();
        let postfix = F::FACT.message_postfix();
        batch.put(message_key(fid, postfix, ts_hash), message.to_bytes()?);
        batch.put(
            target_index_key(fid, self.set_postfix(message.kind())?, target),
            ts_hash.as_bytes().to_vec(),
        );
        batch.put(by_signer_key(fid, &message.signer, postfix, ts_hash), Vec::new());
        if let Some(reverse) = reverse_target(&message.data.body) {
            batch.put(by_target_key(postfix, &reverse, fid, ts_hash), Vec::new());
        }
        Ok(())
    }

    fn delete_rows(&self, batch: &mut WriteBatch, message: &Message) -> Result<(), HubError> {
        let fid = message.fid();
        let ts_hash = message.ts_hash()?;
        let postfix = F::FACT.message_postfix();
        let target = conflict_target(&message.data.body, &message.hash)?;
        batch.delete(message_key(fid, postfix, &ts_hash));
        batch.delete(target_index_key(fid, self.set_postfix(message.kind())?, &target));
        batch.delete(by_signer_key(fid, &message.signer, postfix, &ts_hash));
        if let Some(reverse) = reverse_target(&message.data.body) {
            batch.delete(by_target_key(postfix, &reverse, fid, &ts_hash));
        }
        Ok(())
    }

    fn set_postfix(&self, kind: MessageKind) -> Result<UserPostfix, HubError> {
        match kind {
            MessageKind::Add => Ok(F::FACT.adds_postfix()),
            MessageKind::Remove => F::FACT.removes_postfix().ok_or_else(|| {
                HubError::validation(format!("{} store has no removes", F::FACT.as_str()))
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use hubsync_core::keys::cast_id_key;
    use hubsync_core::{
        sign_message, CastAddBody, CastId, CastRemoveBody, LinkBody, ManualClock, MemoryKv,
        MessageBody, MessageData, Network, ReactionBody, ReactionType,
    };
    use tokio::sync::mpsc::UnboundedReceiver;

    const NOW: u32 = 1_000_000;

    struct Harness<F: FactRules> {
        store: Store<F>,
        events: UnboundedReceiver<HubEvent>,
        db: Arc<MemoryKv>,
    }

    fn harness<F: FactRules>(options: StoreOptions) -> Harness<F> {
        let db = Arc::new(MemoryKv::new());
        let (handler, events) = StoreEventHandler::new(db.clone());
        let clock = Arc::new(ManualClock::new(NOW));
        let store = Store::new(handler, KeyedMutex::default(), clock, options);
        Harness { store, events, db }
    }

    fn default_harness<F: FactRules>() -> Harness<F> {
        harness(StoreOptions::for_fact::<F>())
    }

    fn key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    fn signed(fid: Fid, timestamp: u32, body: MessageBody, signer: u8) -> Message {
        sign_message(
            MessageData {
                fid,
                timestamp,
                network: Network::Devnet,
                body,
            },
            &key(signer),
        )
        .unwrap()
    }

    fn link(kind: MessageKind, timestamp: u32, target_fid: Fid) -> Message {
        let body = LinkBody {
            link_type: "follow".to_string(),
            target_fid,
        };
        let body = match kind {
            MessageKind::Add => MessageBody::LinkAdd(body),
            MessageKind::Remove => MessageBody::LinkRemove(body),
        };
        signed(1, timestamp, body, 1)
    }

    fn link_target(target_fid: Fid) -> Vec<u8> {
        let mut target = b"follow\0\0".to_vec();
        target.extend_from_slice(&target_fid.to_be_bytes());
        target
    }

    fn drain(events: &mut UnboundedReceiver<HubEvent>) -> Vec<HubEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    fn with_hash_byte(mut message: Message, byte: u8) -> Message {
        // Only the tie-break needs a chosen hash; merge does not re-check it.
        message.hash = vec![byte; 20];
        message
    }

    #[tokio::test]
    async fn later_add_replaces_earlier_add() {
        let mut h = default_harness::<LinkFact>();
        let early = link(MessageKind::Add, NOW - 10, 2);
        let late = link(MessageKind::Add, NOW - 5, 2);

        assert!(h.store.merge(&early).await.unwrap().is_committed());
        let outcome = h.store.merge(&late).await.unwrap();
        assert_eq!(
            outcome,
            MergeOutcome::Committed {
                deleted: vec![early.clone()]
            }
        );
        assert_eq!(h.store.get_add(1, &link_target(2)).unwrap(), Some(late.clone()));

        let err = h.store.merge(&early).await.unwrap_err();
        assert_eq!(err.code(), "bad_request.conflict");

        let events = drain(&mut h.events);
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1],
            HubEvent::MergeMessage {
                message: late,
                deleted_messages: vec![early],
            }
        );
    }

    #[tokio::test]
    async fn merge_order_does_not_matter() {
        let add = link(MessageKind::Add, NOW - 10, 3);
        let remove = link(MessageKind::Remove, NOW - 8, 3);

        let forward = default_harness::<LinkFact>();
        forward.store.merge(&add).await.unwrap();
        forward.store.merge(&remove).await.unwrap();

        let backward = default_harness::<LinkFact>();
        backward.store.merge(&remove).await.unwrap();
        assert!(backward.store.merge(&add).await.is_err());

        for h in [&forward, &backward] {
            assert_eq!(h.store.get_add(1, &link_target(3)).unwrap(), None);
            assert_eq!(h.store.get_remove(1, &link_target(3)).unwrap(), Some(remove.clone()));
            assert_eq!(h.store.message_count(1).unwrap(), 1);
        }
        assert_eq!(forward.db.scan_prefix(&[]).unwrap(), backward.db.scan_prefix(&[]).unwrap());
    }

    #[tokio::test]
    async fn remove_wins_timestamp_tie() {
        let h = default_harness::<LinkFact>();
        let add = link(MessageKind::Add, NOW - 10, 4);
        let remove = link(MessageKind::Remove, NOW - 10, 4);
        h.store.merge(&add).await.unwrap();
        let outcome = h.store.merge(&remove).await.unwrap();
        assert_eq!(outcome, MergeOutcome::Committed { deleted: vec![add.clone()] });

        let other = default_harness::<LinkFact>();
        other.store.merge(&remove).await.unwrap();
        assert!(matches!(
            other.store.merge(&add).await,
            Err(HubError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn higher_hash_breaks_full_tie() {
        let h = default_harness::<LinkFact>();
        let low = with_hash_byte(link(MessageKind::Add, NOW - 10, 5), 0x01);
        let high = with_hash_byte(link(MessageKind::Add, NOW - 10, 5), 0x02);
        h.store.merge(&high).await.unwrap();
        assert!(h.store.merge(&low).await.is_err());
        assert_eq!(h.store.get_add(1, &link_target(5)).unwrap(), Some(high.clone()));

        let h = default_harness::<LinkFact>();
        h.store.merge(&low).await.unwrap();
        assert_eq!(
            h.store.merge(&high).await.unwrap(),
            MergeOutcome::Committed {
                deleted: vec![low.clone()]
            }
        );
        assert_eq!(h.store.get_add(1, &link_target(5)).unwrap(), Some(high.clone()));
        assert_eq!(h.store.get_all_messages_by_fid(1).unwrap(), vec![high]);
    }

    #[tokio::test]
    async fn duplicate_merge_is_idempotent() {
        let mut h = default_harness::<LinkFact>();
        let add = link(MessageKind::Add, NOW - 10, 6);
        h.store.merge(&add).await.unwrap();
        let before = h.db.scan_prefix(&[]).unwrap();
        drain(&mut h.events);

        assert_eq!(h.store.merge(&add).await.unwrap(), MergeOutcome::Duplicate);
        assert_eq!(h.db.scan_prefix(&[]).unwrap(), before);
        assert!(drain(&mut h.events).is_empty());
    }

    #[tokio::test]
    async fn wrong_fact_type_rejected() {
        let h = default_harness::<CastFact>();
        let err = h.store.merge(&link(MessageKind::Add, NOW, 7)).await.unwrap_err();
        assert_eq!(err.code(), "bad_request.validation_failure");
    }

    #[tokio::test]
    async fn cast_remove_beats_later_add() {
        let h = default_harness::<CastFact>();
        let add = signed(
            1,
            NOW - 5,
            MessageBody::CastAdd(CastAddBody {
                text: "gm".to_string(),
                embeds: vec![],
                mentions: vec![],
                parent: None,
            }),
            1,
        );
        let remove = signed(
            1,
            NOW - 50,
            MessageBody::CastRemove(CastRemoveBody {
                target_hash: add.hash.clone(),
            }),
            1,
        );
        h.store.merge(&add).await.unwrap();
        let outcome = h.store.merge(&remove).await.unwrap();
        assert_eq!(outcome, MergeOutcome::Committed { deleted: vec![add.clone()] });
        assert!(h.store.merge(&add).await.is_err());
        assert_eq!(h.store.get_add(1, &add.hash).unwrap(), None);
    }

    #[tokio::test]
    async fn prune_keeps_newest_and_rejects_older() {
        let mut h = harness::<LinkFact>(StoreOptions {
            prune_size_limit: 3,
            prune_time_limit: None,
        });
        let adds: Vec<Message> = (1..=5)
            .map(|n| link(MessageKind::Add, NOW - 100 + n, n.into()))
            .collect();
        for add in &adds {
            h.store.merge(add).await.unwrap();
        }
        drain(&mut h.events);

        let pruned = h.store.prune_messages(1).await.unwrap();
        assert_eq!(pruned, adds[..2].to_vec());
        assert_eq!(h.store.get_adds_by_fid(1).unwrap(), adds[2..].to_vec());
        let events = drain(&mut h.events);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], HubEvent::PruneMessage { .. }));

        let older = link(MessageKind::Add, NOW - 100, 99);
        let err = h.store.merge(&older).await.unwrap_err();
        assert_eq!(err.code(), "bad_request.prunable");

        assert!(h.store.prune_messages(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn prune_by_age() {
        let h = harness::<ReactionFact>(StoreOptions {
            prune_size_limit: 100,
            prune_time_limit: Some(60),
        });
        let reaction = |timestamp: u32, byte: u8| {
            signed(
                1,
                timestamp,
                MessageBody::ReactionAdd(ReactionBody {
                    reaction_type: ReactionType::Like,
                    target: CastId {
                        fid: 2,
                        hash: vec![byte; 20],
                    },
                }),
                1,
            )
        };
        let old = reaction(NOW - 50, 1);
        let fresh = reaction(NOW - 10, 2);
        h.store.merge(&old).await.unwrap();
        h.store.merge(&fresh).await.unwrap();

        let too_old = reaction(NOW - 61, 3);
        assert!(matches!(
            h.store.merge(&too_old).await,
            Err(HubError::Prunable(_))
        ));
        assert!(h.store.prune_messages(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn revoke_removes_everything_by_signer() {
        let mut h = default_harness::<LinkFact>();
        let by_one = link(MessageKind::Add, NOW - 10, 8);
        let loser = link(MessageKind::Add, NOW - 20, 9);
        let winner = signed(
            1,
            NOW - 5,
            MessageBody::LinkRemove(LinkBody {
                link_type: "follow".to_string(),
                target_fid: 9,
            }),
            1,
        );
        let by_two = signed(
            1,
            NOW - 10,
            MessageBody::LinkAdd(LinkBody {
                link_type: "follow".to_string(),
                target_fid: 10,
            }),
            2,
        );
        for message in [&by_one, &loser, &winner, &by_two] {
            h.store.merge(message).await.unwrap();
        }
        drain(&mut h.events);

        let signer = key(1).verifying_key().to_bytes();
        let revoked = h.store.revoke(1, &signer).await.unwrap();
        assert_eq!(revoked.len(), 2);
        assert!(h.store.get_messages_by_signer(1, &signer).unwrap().is_empty());
        assert_eq!(h.store.get_all_messages_by_fid(1).unwrap(), vec![by_two]);
        assert_eq!(h.store.get_remove(1, &link_target(9)).unwrap(), None);

        let events = drain(&mut h.events);
        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|event| matches!(event, HubEvent::RevokeMessage { .. })));
    }

    #[tokio::test]
    async fn revoke_message_deletes_rows() {
        let h = default_harness::<LinkFact>();
        let add = link(MessageKind::Add, NOW - 10, 11);
        h.store.merge(&add).await.unwrap();
        h.store.revoke_message(&add).await.unwrap();
        assert!(h.db.is_empty());
        let err = h.store.revoke_message(&add).await.unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[tokio::test]
    async fn by_target_index_finds_reactions_across_fids() {
        let h = default_harness::<ReactionFact>();
        let cast = CastId {
            fid: 50,
            hash: vec![7; 20],
        };
        let like = |fid: Fid| {
            signed(
                fid,
                NOW - 1,
                MessageBody::ReactionAdd(ReactionBody {
                    reaction_type: ReactionType::Like,
                    target: cast.clone(),
                }),
                1,
            )
        };
        h.store.merge(&like(1)).await.unwrap();
        h.store.merge(&like(2)).await.unwrap();

        let found = h.store.get_by_target(&cast_id_key(50, &[7; 20])).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].fid(), 1);
        assert_eq!(found[1].fid(), 2);
        assert!(h.store.get_by_target(&cast_id_key(50, &[8; 20])).unwrap().is_empty());
        assert_eq!(h.store.get_all_messages().unwrap().len(), 2);
    }
}
