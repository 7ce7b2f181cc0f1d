#![allow(dead_code)]

//! Shared fixtures: an in-memory harness around the repository and a mock
//! cipher that models session records as tagged byte strings.
//!
//! A session record starting with `open` has an open ratchet, one starting
//! with `closed` does not, and anything else fails to parse. Ciphertexts
//! are the plaintext behind an `enc:` (or `genc:` for groups) prefix, which
//! is enough to drive every repository path without real crypto.

use std::sync::Arc;

use async_trait::async_trait;

use waident::config::CacheConfig;
use waident::lid::{LidDirectory, LidMappingStore};
use waident::signal::address::{SenderKeyName, SignalAddress};
use waident::signal::cipher::{
    CipherError, CiphertextMessage, PreKeyBundle, SignalCipher, WHISPER_TYPE,
};
use waident::signal::keys::IdentityKeyPair;
use waident::signal::store::SignalProtocolStore;
use waident::signal::{SignalRepository, SignalStoreAdapter};
use waident::store::MemoryStore;

pub const OPEN_SESSION: &[u8] = b"open-session";
pub const CLOSED_SESSION: &[u8] = b"closed-session";

pub struct MockCipher;

#[async_trait]
impl SignalCipher for MockCipher {
    async fn encrypt(
        &self,
        store: &dyn SignalProtocolStore,
        address: &SignalAddress,
        plaintext: &[u8],
    ) -> Result<CiphertextMessage, CipherError> {
        let record = store
            .load_session(address)
            .await?
            .ok_or_else(|| format!("no session at {address}"))?;
        if !record.starts_with(b"open") {
            return Err(format!("ratchet closed at {address}").into());
        }
        let mut serialized = b"enc:".to_vec();
        serialized.extend_from_slice(plaintext);
        Ok(CiphertextMessage {
            type_tag: WHISPER_TYPE,
            serialized,
        })
    }

    async fn decrypt_prekey_message(
        &self,
        store: &dyn SignalProtocolStore,
        address: &SignalAddress,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CipherError> {
        // A prekey message establishes the session as a side effect.
        store.store_session(address, OPEN_SESSION).await?;
        self.decrypt_message(store, address, ciphertext).await
    }

    async fn decrypt_message(
        &self,
        _store: &dyn SignalProtocolStore,
        _address: &SignalAddress,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CipherError> {
        ciphertext
            .strip_prefix(b"enc:")
            .map(|rest| rest.to_vec())
            .ok_or_else(|| "bad ciphertext".into())
    }

    async fn init_outgoing_session(
        &self,
        store: &dyn SignalProtocolStore,
        address: &SignalAddress,
        _bundle: &PreKeyBundle,
    ) -> Result<(), CipherError> {
        store.store_session(address, OPEN_SESSION).await
    }

    fn has_open_session(&self, record: &[u8]) -> Result<bool, CipherError> {
        if record.starts_with(b"open") {
            Ok(true)
        } else if record.starts_with(b"closed") {
            Ok(false)
        } else {
            Err("unreadable session record".into())
        }
    }

    async fn group_encrypt(
        &self,
        store: &dyn SignalProtocolStore,
        sender_key_name: &SenderKeyName,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CipherError> {
        store
            .load_sender_key(sender_key_name)
            .await?
            .ok_or_else(|| format!("no sender key for {sender_key_name}"))?;
        let mut ciphertext = b"genc:".to_vec();
        ciphertext.extend_from_slice(plaintext);
        Ok(ciphertext)
    }

    async fn group_decrypt(
        &self,
        store: &dyn SignalProtocolStore,
        sender_key_name: &SenderKeyName,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CipherError> {
        store
            .load_sender_key(sender_key_name)
            .await?
            .ok_or_else(|| format!("no sender key for {sender_key_name}"))?;
        ciphertext
            .strip_prefix(b"genc:")
            .map(|rest| rest.to_vec())
            .ok_or_else(|| "bad group ciphertext".into())
    }

    async fn create_distribution(
        &self,
        _store: &dyn SignalProtocolStore,
        sender_key_name: &SenderKeyName,
    ) -> Result<Vec<u8>, CipherError> {
        let mut distribution = b"skd:".to_vec();
        distribution.extend_from_slice(sender_key_name.to_string().as_bytes());
        Ok(distribution)
    }

    async fn process_distribution(
        &self,
        store: &dyn SignalProtocolStore,
        sender_key_name: &SenderKeyName,
        distribution: &[u8],
    ) -> Result<(), CipherError> {
        store.store_sender_key(sender_key_name, distribution).await
    }
}

pub struct TestHarness {
    pub kv: Arc<MemoryStore>,
    pub mappings: Arc<LidMappingStore>,
    pub repo: SignalRepository,
}

pub fn new_harness() -> TestHarness {
    new_harness_with_directory(None)
}

pub fn new_harness_with_directory(directory: Option<Arc<dyn LidDirectory>>) -> TestHarness {
    let kv = Arc::new(MemoryStore::new());
    let config = CacheConfig::default();
    let mappings = Arc::new(LidMappingStore::new(kv.clone(), directory, &config));
    let adapter = Arc::new(SignalStoreAdapter::new(
        kv.clone(),
        mappings.clone(),
        1234,
        IdentityKeyPair::new([1u8; 32], [2u8; 32]),
    ));
    let repo = SignalRepository::new(
        kv.clone(),
        mappings.clone(),
        adapter,
        Arc::new(MockCipher),
        &config,
    );
    TestHarness { kv, mappings, repo }
}

pub async fn seed_device_list(kv: &MemoryStore, user: &str, devices: &[&str]) {
    let entries: Vec<String> = devices.iter().map(|d| d.to_string()).collect();
    kv.seed(
        "device-list",
        user,
        &serde_json::to_vec(&entries).expect("device list serializes"),
    )
    .await;
}
