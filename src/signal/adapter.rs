//! Key-value backed implementation of the Signal store capability set.

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use crate::lid::LidMappingStore;
use crate::signal::address::{SenderKeyName, SignalAddress};
use crate::signal::keys::IdentityKeyPair;
use crate::signal::store::{SignalProtocolStore, SignalStoreError};
use crate::store::traits::{
    KeyValueStore, WriteBatch, PRE_KEY_NAMESPACE, SENDER_KEY_NAMESPACE, SESSION_NAMESPACE,
    SIGNED_PRE_KEY_NAMESPACE,
};

pub struct SignalStoreAdapter {
    kv: Arc<dyn KeyValueStore>,
    mappings: Arc<LidMappingStore>,
    registration_id: u32,
    identity: IdentityKeyPair,
}

impl SignalStoreAdapter {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        mappings: Arc<LidMappingStore>,
        registration_id: u32,
        identity: IdentityKeyPair,
    ) -> Self {
        Self {
            kv,
            mappings,
            registration_id,
            identity,
        }
    }

    async fn put_one(
        &self,
        namespace: &str,
        key: String,
        value: &[u8],
    ) -> Result<(), SignalStoreError> {
        let mut batch = WriteBatch::new();
        batch.put(namespace, key, value);
        self.kv.commit(batch).await?;
        Ok(())
    }
}

#[async_trait]
impl SignalProtocolStore for SignalStoreAdapter {
    /// Loads a session record, preferring the LID address space. A name
    /// with a known PN-to-LID mapping reads the LID-addressed record
    /// first; LID user names never appear as forward mapping keys, so
    /// they fall through to the direct read. Only the mapping cache and
    /// the key-value store are consulted, never the directory.
    async fn load_session(
        &self,
        address: &SignalAddress,
    ) -> Result<Option<Vec<u8>>, SignalStoreError> {
        if let Some(lid_user) = self.mappings.lookup_lid_user(address.name()).await? {
            let lid_address = SignalAddress::new(lid_user.to_string(), address.device_id());
            if let Some(record) = self
                .kv
                .get_one(SESSION_NAMESPACE, &lid_address.to_string())
                .await?
            {
                debug!("Session load for {address} routed to LID address {lid_address}");
                return Ok(Some(record));
            }
        }
        Ok(self
            .kv
            .get_one(SESSION_NAMESPACE, &address.to_string())
            .await?)
    }

    async fn store_session(
        &self,
        address: &SignalAddress,
        record: &[u8],
    ) -> Result<(), SignalStoreError> {
        self.put_one(SESSION_NAMESPACE, address.to_string(), record)
            .await
    }

    async fn load_prekey(&self, prekey_id: u32) -> Result<Option<Vec<u8>>, SignalStoreError> {
        Ok(self
            .kv
            .get_one(PRE_KEY_NAMESPACE, &prekey_id.to_string())
            .await?)
    }

    async fn remove_prekey(&self, prekey_id: u32) -> Result<(), SignalStoreError> {
        let mut batch = WriteBatch::new();
        batch.delete(PRE_KEY_NAMESPACE, prekey_id.to_string());
        self.kv.commit(batch).await?;
        Ok(())
    }

    async fn load_signed_prekey(
        &self,
        signed_prekey_id: u32,
    ) -> Result<Option<Vec<u8>>, SignalStoreError> {
        Ok(self
            .kv
            .get_one(SIGNED_PRE_KEY_NAMESPACE, &signed_prekey_id.to_string())
            .await?)
    }

    async fn load_sender_key(
        &self,
        sender_key_name: &SenderKeyName,
    ) -> Result<Option<Vec<u8>>, SignalStoreError> {
        Ok(self
            .kv
            .get_one(SENDER_KEY_NAMESPACE, &sender_key_name.to_string())
            .await?)
    }

    async fn store_sender_key(
        &self,
        sender_key_name: &SenderKeyName,
        record: &[u8],
    ) -> Result<(), SignalStoreError> {
        self.put_one(SENDER_KEY_NAMESPACE, sender_key_name.to_string(), record)
            .await
    }

    async fn is_trusted_identity(
        &self,
        _address: &SignalAddress,
        _identity_key: &[u8; 32],
    ) -> Result<bool, SignalStoreError> {
        // Trust-on-first-use is handled upstream; the session layer accepts
        // every identity.
        Ok(true)
    }

    fn registration_id(&self) -> u32 {
        self.registration_id
    }

    fn identity_key_pair(&self) -> &IdentityKeyPair {
        &self.identity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::store::MemoryStore;

    fn new_adapter(kv: Arc<MemoryStore>) -> SignalStoreAdapter {
        let mappings = Arc::new(LidMappingStore::new(
            kv.clone(),
            None,
            &CacheConfig::default(),
        ));
        SignalStoreAdapter::new(kv, mappings, 1234, IdentityKeyPair::new([1u8; 32], [2u8; 32]))
    }

    #[tokio::test]
    async fn test_load_session_prefers_lid_when_mapped() {
        let kv = Arc::new(MemoryStore::new());
        let adapter = new_adapter(kv.clone());
        adapter
            .mappings
            .store("abcd@lid", "15551234567@s.whatsapp.net")
            .await
            .unwrap();
        kv.seed(SESSION_NAMESPACE, "abcd.0", b"lid-record").await;
        kv.seed(SESSION_NAMESPACE, "15551234567.0", b"pn-record")
            .await;

        let record = adapter
            .load_session(&SignalAddress::new("15551234567".to_string(), 0))
            .await
            .unwrap();
        assert_eq!(record, Some(b"lid-record".to_vec()));
    }

    #[tokio::test]
    async fn test_load_session_falls_back_to_pn() {
        let kv = Arc::new(MemoryStore::new());
        let adapter = new_adapter(kv.clone());
        adapter
            .mappings
            .store("abcd@lid", "15551234567@s.whatsapp.net")
            .await
            .unwrap();
        kv.seed(SESSION_NAMESPACE, "15551234567.0", b"pn-record")
            .await;

        let record = adapter
            .load_session(&SignalAddress::new("15551234567".to_string(), 0))
            .await
            .unwrap();
        assert_eq!(record, Some(b"pn-record".to_vec()));
    }

    #[tokio::test]
    async fn test_load_session_direct_for_lid_name() {
        let kv = Arc::new(MemoryStore::new());
        let adapter = new_adapter(kv.clone());
        kv.seed(SESSION_NAMESPACE, "abcd.0", b"lid-record").await;

        let record = adapter
            .load_session(&SignalAddress::new("abcd".to_string(), 0))
            .await
            .unwrap();
        assert_eq!(record, Some(b"lid-record".to_vec()));
    }

    #[tokio::test]
    async fn test_prekey_passthrough() {
        let kv = Arc::new(MemoryStore::new());
        let adapter = new_adapter(kv.clone());
        kv.seed(PRE_KEY_NAMESPACE, "42", b"prekey").await;

        assert_eq!(adapter.load_prekey(42).await.unwrap(), Some(b"prekey".to_vec()));
        adapter.remove_prekey(42).await.unwrap();
        assert_eq!(adapter.load_prekey(42).await.unwrap(), None);
    }
}
