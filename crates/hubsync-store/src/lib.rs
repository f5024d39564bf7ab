//! # hubsync Store
//!
//! Add/Remove CRDT stores and the engine that routes messages into them.
//!
//! This crate provides:
//! - A keyed mutex that serializes writes per fid with a bounded wait
//! - The store event handler: commit a KV batch, then emit a [`HubEvent`]
//! - The generic [`Store`], instantiated once per fact type
//! - The [`Engine`]: validation, dependency checks, signer revocation cascade
//!   and the id registry

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;
pub mod event;
pub mod lock;
pub mod store;

pub use engine::{Engine, EngineOptions};
pub use event::{HubEvent, StoreEventHandler};
pub use lock::{KeyedGuard, KeyedMutex};
pub use store::{
    CastFact, CastStore, FactRules, LinkFact, LinkStore, MergeOutcome, ReactionFact,
    ReactionStore, SignerFact, SignerStore, Store, StoreOptions, UserDataFact, UserDataStore,
    VerificationFact, VerificationStore,
};
