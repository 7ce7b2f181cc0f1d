use std::fmt;

/// A Signal protocol address: the identity's user part plus a device id.
/// The display form `user.device` is also the session record key in the
/// key-value store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignalAddress {
    name: String,
    device_id: u32,
}

impl SignalAddress {
    pub fn new(name: String, device_id: u32) -> Self {
        Self { name, device_id }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }
}

impl fmt::Display for SignalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.device_id)
    }
}

/// Names a sender key: one symmetric group-message key exists per
/// `(group, author address)` pair. The display form is the record key in
/// the sender-key namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SenderKeyName {
    group_id: String,
    sender_id: String,
}

impl SenderKeyName {
    pub fn new(group_id: String, sender_id: String) -> Self {
        Self {
            group_id,
            sender_id,
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }
}

impl fmt::Display for SenderKeyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group_id, self.sender_id)
    }
}
