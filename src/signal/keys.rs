//! Local identity key material handed to the Signal store adapter.

/// Curve25519 key type byte. Serialized public keys carry this prefix on
/// the wire and in prekey bundles.
pub const DJB_TYPE: u8 = 0x05;

#[derive(Debug, Clone)]
pub struct IdentityKeyPair {
    public_key: [u8; 32],
    private_key: [u8; 32],
}

impl IdentityKeyPair {
    pub fn new(public_key: [u8; 32], private_key: [u8; 32]) -> Self {
        Self {
            public_key,
            private_key,
        }
    }

    pub fn public_key(&self) -> &[u8; 32] {
        &self.public_key
    }

    pub fn private_key(&self) -> &[u8; 32] {
        &self.private_key
    }

    /// Public key in its serialized form: the type byte followed by the
    /// 32 raw key bytes.
    pub fn serialized_public_key(&self) -> [u8; 33] {
        let mut serialized = [0u8; 33];
        serialized[0] = DJB_TYPE;
        serialized[1..].copy_from_slice(&self.public_key);
        serialized
    }
}
