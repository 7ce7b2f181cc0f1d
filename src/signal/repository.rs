//! Public façade over the Signal session layer.
//!
//! The repository routes 1:1 encryption through the preferred identity:
//! when a PN peer's LID is known, encryption targets the LID address,
//! migrating any existing PN sessions over first so the ratchet survives
//! the identity switch. Group traffic, session validation, injection and
//! deletion all go through here as well.

use std::sync::Arc;

use log::{debug, info, warn};
use moka::future::Cache;
use thiserror::Error;

use crate::config::CacheConfig;
use crate::jid::{Jid, JidError};
use crate::lid::{LidMappingStore, MappingError};
use crate::signal::address::{SenderKeyName, SignalAddress};
use crate::signal::adapter::SignalStoreAdapter;
use crate::signal::cipher::{CipherError, PreKeyBundle, SignalCipher, PREKEY_TYPE};
use crate::signal::store::{SignalProtocolStore, SignalStoreError};
use crate::store::error::StoreError;
use crate::store::traits::{
    KeyValueStore, WriteBatch, DEVICE_LIST_NAMESPACE, SESSION_NAMESPACE,
};

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("Invalid JID: {0}")]
    InvalidJid(#[from] JidError),
    #[error("No signal session for {0}")]
    NoSession(String),
    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),
    #[error("Missing group id")]
    MissingGroupId,
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),
    #[error("Signal store error: {0}")]
    Store(#[source] SignalStoreError),
    #[error("Cipher error: {0}")]
    Cipher(#[source] CipherError),
}

/// Wire-level message kind, as carried in the `type` attribute of an
/// `enc` node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// A prekey message that also establishes the session (`pkmsg`).
    PreKey,
    /// An ordinary ratchet message (`msg`).
    Whisper,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::PreKey => "pkmsg",
            MessageType::Whisper => "msg",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct EncryptedMessage {
    pub message_type: MessageType,
    pub ciphertext: Vec<u8>,
}

/// An encrypted payload together with the JID to address on the wire,
/// which may differ from the encryption identity.
#[derive(Debug, Clone)]
pub struct EncryptedMessageWithWire {
    pub message_type: MessageType,
    pub ciphertext: Vec<u8>,
    pub wire_jid: String,
}

#[derive(Debug, Clone)]
pub struct GroupEncryptedMessage {
    pub ciphertext: Vec<u8>,
    /// Serialized sender-key distribution message for recipients that do
    /// not hold our sender key yet.
    pub distribution: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionInvalidReason {
    InvalidJid,
    NoSession,
    NoOpenSession,
    ValidationError,
}

impl SessionInvalidReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionInvalidReason::InvalidJid => "invalid-jid",
            SessionInvalidReason::NoSession => "no-session",
            SessionInvalidReason::NoOpenSession => "no-open-session",
            SessionInvalidReason::ValidationError => "validation-error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionValidation {
    pub exists: bool,
    pub reason: Option<SessionInvalidReason>,
}

impl SessionValidation {
    fn ok() -> Self {
        Self {
            exists: true,
            reason: None,
        }
    }

    fn invalid(reason: SessionInvalidReason) -> Self {
        Self {
            exists: false,
            reason: Some(reason),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub migrated: usize,
    pub skipped: usize,
    pub total: usize,
}

fn validation_cache_key(jid: &Jid) -> String {
    format!("validation:{jid}")
}

fn migration_cache_key(pn_user: &str, device: u16) -> String {
    format!("{pn_user}.{device}")
}

pub struct SignalRepository {
    kv: Arc<dyn KeyValueStore>,
    mappings: Arc<LidMappingStore>,
    store: Arc<SignalStoreAdapter>,
    cipher: Arc<dyn SignalCipher>,
    /// PN devices already migrated within the TTL window, keyed
    /// `<pn_user>.<device>`.
    migration_cache: Cache<String, ()>,
    /// Memoized session validation results, keyed `validation:<jid>`.
    validation_cache: Cache<String, SessionValidation>,
}

impl SignalRepository {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        mappings: Arc<LidMappingStore>,
        store: Arc<SignalStoreAdapter>,
        cipher: Arc<dyn SignalCipher>,
        config: &CacheConfig,
    ) -> Self {
        Self {
            kv,
            mappings,
            store,
            cipher,
            migration_cache: Cache::builder()
                .time_to_live(config.migration_ttl)
                .build(),
            validation_cache: Cache::builder()
                .time_to_live(config.validation_ttl)
                .build(),
        }
    }

    /// Encrypts a 1:1 message for `jid`, routing through the peer's LID
    /// identity when one is known.
    pub async fn encrypt_message(
        &self,
        jid: &str,
        plaintext: &[u8],
    ) -> Result<EncryptedMessage, SignalError> {
        let jid: Jid = jid.parse()?;
        let encryption_jid = self.resolve_encryption_jid(&jid).await?;

        let validation = self.validate_session_at(&encryption_jid).await;
        if !validation.exists {
            return Err(SignalError::NoSession(encryption_jid.to_string()));
        }

        let message = self
            .cipher
            .encrypt(
                self.store.as_ref(),
                &encryption_jid.to_signal_address(),
                plaintext,
            )
            .await
            .map_err(SignalError::Cipher)?;
        let message_type = if message.type_tag == PREKEY_TYPE {
            MessageType::PreKey
        } else {
            MessageType::Whisper
        };
        Ok(EncryptedMessage {
            message_type,
            ciphertext: message.serialized,
        })
    }

    /// As [`Self::encrypt_message`] against `encryption_jid`, keeping the
    /// caller's wire JID attached to the result untouched.
    pub async fn encrypt_with_wire(
        &self,
        encryption_jid: &str,
        wire_jid: &str,
        plaintext: &[u8],
    ) -> Result<EncryptedMessageWithWire, SignalError> {
        let message = self.encrypt_message(encryption_jid, plaintext).await?;
        Ok(EncryptedMessageWithWire {
            message_type: message.message_type,
            ciphertext: message.ciphertext,
            wire_jid: wire_jid.to_string(),
        })
    }

    /// Decrypts a 1:1 message of the given wire type (`pkmsg` or `msg`).
    /// Cipher failures propagate unchanged.
    pub async fn decrypt_message(
        &self,
        jid: &str,
        message_type: &str,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, SignalError> {
        let jid: Jid = jid.parse()?;
        let address = jid.to_signal_address();
        match message_type {
            "pkmsg" => self
                .cipher
                .decrypt_prekey_message(self.store.as_ref(), &address, ciphertext)
                .await
                .map_err(SignalError::Cipher),
            "msg" => self
                .cipher
                .decrypt_message(self.store.as_ref(), &address, ciphertext)
                .await
                .map_err(SignalError::Cipher),
            other => Err(SignalError::UnknownMessageType(other.to_string())),
        }
    }

    /// Encrypts a group message as `me`, returning the ciphertext and a
    /// serialized distribution message for the sender key.
    pub async fn encrypt_group_message(
        &self,
        group: &str,
        me: &str,
        plaintext: &[u8],
    ) -> Result<GroupEncryptedMessage, SignalError> {
        if group.is_empty() {
            return Err(SignalError::MissingGroupId);
        }
        let me: Jid = me.parse()?;
        let name = SenderKeyName::new(group.to_string(), me.to_signal_address().to_string());
        self.ensure_sender_key_record(&name).await?;

        let distribution = self
            .cipher
            .create_distribution(self.store.as_ref(), &name)
            .await
            .map_err(SignalError::Cipher)?;
        let ciphertext = self
            .cipher
            .group_encrypt(self.store.as_ref(), &name, plaintext)
            .await
            .map_err(SignalError::Cipher)?;
        Ok(GroupEncryptedMessage {
            ciphertext,
            distribution,
        })
    }

    pub async fn decrypt_group_message(
        &self,
        group: &str,
        author: &str,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, SignalError> {
        if group.is_empty() {
            return Err(SignalError::MissingGroupId);
        }
        let author: Jid = author.parse()?;
        let name = SenderKeyName::new(group.to_string(), author.to_signal_address().to_string());
        self.cipher
            .group_decrypt(self.store.as_ref(), &name, ciphertext)
            .await
            .map_err(SignalError::Cipher)
    }

    /// Processes a peer's sender-key distribution message, creating the
    /// record first when none exists.
    pub async fn process_sender_key_distribution(
        &self,
        group_id: &str,
        author: &str,
        distribution: &[u8],
    ) -> Result<(), SignalError> {
        if group_id.is_empty() {
            return Err(SignalError::MissingGroupId);
        }
        let author: Jid = author.parse()?;
        let name = SenderKeyName::new(group_id.to_string(), author.to_signal_address().to_string());
        self.ensure_sender_key_record(&name).await?;
        self.cipher
            .process_distribution(self.store.as_ref(), &name, distribution)
            .await
            .map_err(SignalError::Cipher)
    }

    /// Installs an outgoing prekey bundle as a fresh session at `jid`.
    pub async fn inject_session(
        &self,
        jid: &str,
        bundle: &PreKeyBundle,
    ) -> Result<(), SignalError> {
        let jid: Jid = jid.parse()?;
        self.cipher
            .init_outgoing_session(self.store.as_ref(), &jid.to_signal_address(), bundle)
            .await
            .map_err(SignalError::Cipher)
    }

    /// Checks that a session record exists at `jid` and holds an open
    /// ratchet. Results are memoized per JID until the TTL expires or the
    /// session is deleted or migrated.
    pub async fn validate_session(&self, jid: &str) -> SessionValidation {
        match jid.parse::<Jid>() {
            Ok(jid) => self.validate_session_at(&jid).await,
            Err(e) => {
                warn!("Session validation for unparseable JID '{jid}': {e}");
                SessionValidation::invalid(SessionInvalidReason::InvalidJid)
            }
        }
    }

    async fn validate_session_at(&self, jid: &Jid) -> SessionValidation {
        let key = validation_cache_key(jid);
        if let Some(cached) = self.validation_cache.get(&key).await {
            return cached;
        }

        let validation = match self.store.load_session(&jid.to_signal_address()).await {
            Ok(Some(record)) => match self.cipher.has_open_session(&record) {
                Ok(true) => SessionValidation::ok(),
                Ok(false) => SessionValidation::invalid(SessionInvalidReason::NoOpenSession),
                Err(e) => {
                    warn!("Session record for {jid} failed to validate: {e}");
                    SessionValidation::invalid(SessionInvalidReason::ValidationError)
                }
            },
            Ok(None) => SessionValidation::invalid(SessionInvalidReason::NoSession),
            Err(e) => {
                warn!("Session load for {jid} failed during validation: {e}");
                SessionValidation::invalid(SessionInvalidReason::ValidationError)
            }
        };
        self.validation_cache.insert(key, validation.clone()).await;
        validation
    }

    /// Removes the session record at `jid` and drops its cached
    /// validation. Unparseable JIDs are a no-op.
    pub async fn delete_session(&self, jid: &str) -> Result<(), SignalError> {
        let jid: Jid = match jid.parse() {
            Ok(jid) => jid,
            Err(e) => {
                warn!("Ignoring session delete for invalid JID '{jid}': {e}");
                return Ok(());
            }
        };
        let mut batch = WriteBatch::new();
        batch.delete(SESSION_NAMESPACE, jid.to_signal_address().to_string());
        self.kv.commit(batch).await?;
        self.validation_cache
            .invalidate(&validation_cache_key(&jid))
            .await;
        Ok(())
    }

    /// Moves every open PN session of `source`'s user over to `target`'s
    /// LID user, across all known devices, in one transaction. Devices
    /// migrated within the TTL window are skipped via the migration cache.
    pub async fn migrate_session(
        &self,
        source: &str,
        target: &str,
    ) -> Result<MigrationReport, SignalError> {
        let source_jid = match source.parse::<Jid>() {
            Ok(jid) if jid.is_any_pn() => jid,
            _ => {
                warn!("Session migration with non-PN source '{source}'");
                return Ok(MigrationReport {
                    migrated: 0,
                    skipped: 0,
                    total: 1,
                });
            }
        };
        let target_jid = match target.parse::<Jid>() {
            Ok(jid) if jid.is_any_lid() => jid,
            _ => {
                warn!("Session migration with non-LID target '{target}'");
                return Ok(MigrationReport::default());
            }
        };
        self.migrate_session_jids(&source_jid, &target_jid).await
    }

    async fn migrate_session_jids(
        &self,
        source: &Jid,
        target: &Jid,
    ) -> Result<MigrationReport, SignalError> {
        let Some(mut devices) = self.load_device_list(&source.user).await? else {
            debug!("No device list for {}, nothing to migrate", source.user);
            return Ok(MigrationReport::default());
        };
        if !devices.contains(&source.device) {
            devices.push(source.device);
        }
        let total = devices.len();

        let mut candidates = Vec::with_capacity(devices.len());
        for device in devices {
            if self
                .migration_cache
                .get(&migration_cache_key(&source.user, device))
                .await
                .is_some()
            {
                continue;
            }
            candidates.push(device);
        }

        let session_keys: Vec<String> = candidates
            .iter()
            .map(|device| SignalAddress::new(source.user.clone(), *device as u32).to_string())
            .collect();
        let records = self.kv.get_many(SESSION_NAMESPACE, &session_keys).await?;

        let mut batch = WriteBatch::new();
        let mut migrated_devices = Vec::new();
        for device in candidates {
            let pn_key = SignalAddress::new(source.user.clone(), device as u32).to_string();
            let Some(record) = records.get(&pn_key) else {
                continue;
            };
            match self.cipher.has_open_session(record) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!("Skipping unreadable session record at {pn_key}: {e}");
                    continue;
                }
            }
            let lid_address = Jid::lid_device(&target.user, device).to_signal_address();
            batch.put(SESSION_NAMESPACE, lid_address.to_string(), record.clone());
            batch.delete(SESSION_NAMESPACE, pn_key);
            migrated_devices.push(device);
        }

        if !migrated_devices.is_empty() {
            // All moves land together; a failed commit leaves every PN
            // session in place and the migration cache unmarked.
            self.kv.commit(batch).await?;

            for device in &migrated_devices {
                self.migration_cache
                    .insert(migration_cache_key(&source.user, *device), ())
                    .await;
                let pn_jid = Jid::pn_device(&source.user, *device);
                let lid_jid = Jid::lid_device(&target.user, *device);
                self.validation_cache
                    .invalidate(&validation_cache_key(&pn_jid))
                    .await;
                self.validation_cache
                    .invalidate(&validation_cache_key(&lid_jid))
                    .await;
            }
            info!(
                "Migrated {} of {} sessions from {} to {}",
                migrated_devices.len(),
                total,
                source.user,
                target.user
            );
        }

        let migrated = migrated_devices.len();
        Ok(MigrationReport {
            migrated,
            skipped: total - migrated,
            total,
        })
    }

    /// Flushes every in-memory cache. Persistent state is untouched.
    pub fn destroy(&self) {
        self.validation_cache.invalidate_all();
        self.migration_cache.invalidate_all();
        self.mappings.clear_cache();
    }

    /// Picks the address to encrypt under: the LID equivalent when one is
    /// known and has (or can inherit) a session, the original JID
    /// otherwise. Only the mapping cache and the key-value store are
    /// consulted; unknown identities resolve lazily elsewhere.
    async fn resolve_encryption_jid(&self, jid: &Jid) -> Result<Jid, SignalError> {
        if !jid.is_any_pn() {
            return Ok(jid.clone());
        }
        let Some(lid_user) = self.mappings.lookup_lid_user(&jid.user).await? else {
            return Ok(jid.clone());
        };
        let lid_jid = Jid::lid_device(&lid_user, jid.device);

        let lid_key = lid_jid.to_signal_address().to_string();
        if self
            .kv
            .get_one(SESSION_NAMESPACE, &lid_key)
            .await
            .map_err(SignalError::Storage)?
            .is_some()
        {
            return Ok(lid_jid);
        }

        let pn_key = jid.to_signal_address().to_string();
        if self
            .kv
            .get_one(SESSION_NAMESPACE, &pn_key)
            .await
            .map_err(SignalError::Storage)?
            .is_some()
        {
            let report = self.migrate_session_jids(jid, &lid_jid).await?;
            debug!(
                "Encrypt to {} triggered migration: {} migrated, {} skipped",
                jid, report.migrated, report.skipped
            );
            return Ok(lid_jid);
        }

        // LID known but no session on either side; keep the wire identity
        // and let session establishment target it.
        Ok(jid.clone())
    }

    async fn ensure_sender_key_record(&self, name: &SenderKeyName) -> Result<(), SignalError> {
        let existing = self
            .store
            .load_sender_key(name)
            .await
            .map_err(SignalError::Store)?;
        if existing.is_none() {
            debug!("Creating empty sender key record for {name}");
            self.store
                .store_sender_key(name, &[])
                .await
                .map_err(SignalError::Store)?;
        }
        Ok(())
    }

    async fn load_device_list(&self, user: &str) -> Result<Option<Vec<u16>>, SignalError> {
        let Some(raw) = self
            .kv
            .get_one(DEVICE_LIST_NAMESPACE, user)
            .await
            .map_err(SignalError::Storage)?
        else {
            return Ok(None);
        };
        let entries: Vec<String> = serde_json::from_slice(&raw)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let mut devices = Vec::with_capacity(entries.len());
        for entry in entries {
            match entry.parse::<u16>() {
                Ok(device) => {
                    if !devices.contains(&device) {
                        devices.push(device);
                    }
                }
                Err(_) => warn!("Ignoring bad device entry '{entry}' for {user}"),
            }
        }
        Ok(Some(devices))
    }
}
