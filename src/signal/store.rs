//! The store capability set consumed by the Signal primitives.
//!
//! Session, prekey and sender-key records are opaque byte strings here;
//! only the cipher layer knows their wire format. Adapters implement this
//! trait over the persistent key-value store.

use async_trait::async_trait;

use crate::signal::address::{SenderKeyName, SignalAddress};
use crate::signal::keys::IdentityKeyPair;

pub type SignalStoreError = Box<dyn std::error::Error + Send + Sync>;

#[async_trait]
pub trait SignalProtocolStore: Send + Sync {
    async fn load_session(
        &self,
        address: &SignalAddress,
    ) -> Result<Option<Vec<u8>>, SignalStoreError>;

    async fn store_session(
        &self,
        address: &SignalAddress,
        record: &[u8],
    ) -> Result<(), SignalStoreError>;

    async fn load_prekey(&self, prekey_id: u32) -> Result<Option<Vec<u8>>, SignalStoreError>;

    async fn remove_prekey(&self, prekey_id: u32) -> Result<(), SignalStoreError>;

    async fn load_signed_prekey(
        &self,
        signed_prekey_id: u32,
    ) -> Result<Option<Vec<u8>>, SignalStoreError>;

    async fn load_sender_key(
        &self,
        sender_key_name: &SenderKeyName,
    ) -> Result<Option<Vec<u8>>, SignalStoreError>;

    async fn store_sender_key(
        &self,
        sender_key_name: &SenderKeyName,
        record: &[u8],
    ) -> Result<(), SignalStoreError>;

    async fn is_trusted_identity(
        &self,
        address: &SignalAddress,
        identity_key: &[u8; 32],
    ) -> Result<bool, SignalStoreError>;

    fn registration_id(&self) -> u32;

    fn identity_key_pair(&self) -> &IdentityKeyPair;
}
