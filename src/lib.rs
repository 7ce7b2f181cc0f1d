//! Identity mapping and Signal session core for a WhatsApp client.
//!
//! WhatsApp runs two identity namespaces side by side: legacy phone-number
//! JIDs (PN) and privacy-preserving linked-identity JIDs (LID). This crate
//! keeps the bidirectional user-level index between the two, resolves
//! unknown identities in bulk through an injected directory service, and
//! adapts a host-supplied transactional key-value store to the Signal
//! protocol's session, prekey and sender-key stores. When a peer's LID
//! becomes known, existing PN sessions migrate to the LID address space in
//! one transaction, so the ratchet survives the identity switch.
//!
//! The Signal primitives themselves (X3DH, double ratchet, group cipher)
//! are consumed through the [`signal::cipher::SignalCipher`] trait and are
//! not part of this crate.

pub mod config;
pub mod jid;
pub mod lid;
pub mod signal;
pub mod store;

pub use config::CacheConfig;
pub use jid::Jid;
pub use lid::{LidDirectory, LidMappingStore, LidPnPair, MappingError, ResolvedLid};
pub use signal::{SignalRepository, SignalStoreAdapter};
pub use store::{KeyValueStore, MemoryStore, StoreError, WriteBatch};
