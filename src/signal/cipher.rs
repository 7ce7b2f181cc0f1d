//! The Signal cipher contract consumed by the repository.
//!
//! X3DH, the double ratchet and the sender-key group cipher live behind
//! this seam; the repository never touches key material itself. An
//! implementation reads and writes its state through the
//! [`SignalProtocolStore`] it is handed on every call.

use async_trait::async_trait;

use crate::signal::address::{SenderKeyName, SignalAddress};
use crate::signal::store::SignalProtocolStore;

pub type CipherError = Box<dyn std::error::Error + Send + Sync>;

/// Ciphertext type tag for prekey messages. Anything else travels as an
/// ordinary whisper message.
pub const PREKEY_TYPE: u8 = 3;
pub const WHISPER_TYPE: u8 = 2;

/// A serialized ciphertext plus its Signal type tag.
#[derive(Debug, Clone)]
pub struct CiphertextMessage {
    pub type_tag: u8,
    pub serialized: Vec<u8>,
}

/// An outgoing X3DH prekey bundle fetched for a peer device. Key fields are
/// serialized public keys (type byte included).
#[derive(Debug, Clone)]
pub struct PreKeyBundle {
    pub registration_id: u32,
    pub device_id: u32,
    pub pre_key_id: Option<u32>,
    pub pre_key_public: Option<Vec<u8>>,
    pub signed_pre_key_id: u32,
    pub signed_pre_key_public: Vec<u8>,
    pub signed_pre_key_signature: Vec<u8>,
    pub identity_key: Vec<u8>,
}

#[async_trait]
pub trait SignalCipher: Send + Sync {
    /// Encrypts under the double-ratchet session at `address`.
    async fn encrypt(
        &self,
        store: &dyn SignalProtocolStore,
        address: &SignalAddress,
        plaintext: &[u8],
    ) -> Result<CiphertextMessage, CipherError>;

    /// Decrypts a prekey message, establishing the session if necessary.
    async fn decrypt_prekey_message(
        &self,
        store: &dyn SignalProtocolStore,
        address: &SignalAddress,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CipherError>;

    /// Decrypts an ordinary whisper message.
    async fn decrypt_message(
        &self,
        store: &dyn SignalProtocolStore,
        address: &SignalAddress,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CipherError>;

    /// Installs an outgoing prekey bundle as a fresh session at `address`.
    async fn init_outgoing_session(
        &self,
        store: &dyn SignalProtocolStore,
        address: &SignalAddress,
        bundle: &PreKeyBundle,
    ) -> Result<(), CipherError>;

    /// Whether a serialized session record contains an open ratchet.
    fn has_open_session(&self, record: &[u8]) -> Result<bool, CipherError>;

    async fn group_encrypt(
        &self,
        store: &dyn SignalProtocolStore,
        sender_key_name: &SenderKeyName,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CipherError>;

    async fn group_decrypt(
        &self,
        store: &dyn SignalProtocolStore,
        sender_key_name: &SenderKeyName,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CipherError>;

    /// Builds a serialized sender-key distribution message for the named
    /// sender key, creating the chain if this is the first use.
    async fn create_distribution(
        &self,
        store: &dyn SignalProtocolStore,
        sender_key_name: &SenderKeyName,
    ) -> Result<Vec<u8>, CipherError>;

    /// Processes a peer's serialized distribution message into the named
    /// sender-key record.
    async fn process_distribution(
        &self,
        store: &dyn SignalProtocolStore,
        sender_key_name: &SenderKeyName,
        distribution: &[u8],
    ) -> Result<(), CipherError>;
}
