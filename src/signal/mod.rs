pub mod adapter;
pub mod address;
pub mod cipher;
pub mod keys;
pub mod repository;
pub mod store;

pub use adapter::SignalStoreAdapter;
pub use address::{SenderKeyName, SignalAddress};
pub use cipher::{CiphertextMessage, PreKeyBundle, SignalCipher};
pub use keys::IdentityKeyPair;
pub use repository::{
    EncryptedMessage, EncryptedMessageWithWire, GroupEncryptedMessage, MessageType,
    MigrationReport, SessionInvalidReason, SessionValidation, SignalError, SignalRepository,
};
pub use store::SignalProtocolStore;
