//! JID parsing, formatting and classification.
//!
//! A JID has the shape `user[:device]@server`. The server partitions the
//! identifier space into phone-number (PN) and linked-identity (LID)
//! namespaces, each with a hosted variant. Classification is always by
//! server, never by the shape of the user part: LID users may contain
//! dots and digits just like phone numbers.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::signal::address::SignalAddress;

pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";
pub const HIDDEN_USER_SERVER: &str = "lid";
pub const HOSTED_SERVER: &str = "hosted";
pub const HOSTED_LID_SERVER: &str = "hosted.lid";
pub const GROUP_SERVER: &str = "g.us";

/// Device number reserved for hosted companions. JIDs projected onto this
/// device use the hosted servers instead of the plain ones.
pub const HOSTED_DEVICE: u16 = 99;

#[derive(Debug, Error)]
pub enum JidError {
    #[error("Invalid JID format: {0}")]
    InvalidFormat(String),
    #[error("Failed to parse component: {0}")]
    Parse(#[from] std::num::ParseIntError),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Jid {
    pub user: String,
    pub server: String,
    pub device: u16,
}

impl Jid {
    pub fn new(user: &str, server: &str) -> Self {
        Self {
            user: user.to_string(),
            server: server.to_string(),
            device: 0,
        }
    }

    pub fn pn(user: &str) -> Self {
        Jid::new(user, DEFAULT_USER_SERVER)
    }

    pub fn lid(user: &str) -> Self {
        Jid::new(user, HIDDEN_USER_SERVER)
    }

    /// Projects a PN user onto a concrete device. Device 99 lives in the
    /// hosted namespace.
    pub fn pn_device(user: &str, device: u16) -> Self {
        let server = if device == HOSTED_DEVICE {
            HOSTED_SERVER
        } else {
            DEFAULT_USER_SERVER
        };
        Self {
            user: user.to_string(),
            server: server.to_string(),
            device,
        }
    }

    /// Projects a LID user onto a concrete device. Device 99 lives in the
    /// hosted namespace.
    pub fn lid_device(user: &str, device: u16) -> Self {
        let server = if device == HOSTED_DEVICE {
            HOSTED_LID_SERVER
        } else {
            HIDDEN_USER_SERVER
        };
        Self {
            user: user.to_string(),
            server: server.to_string(),
            device,
        }
    }

    pub fn is_pn(&self) -> bool {
        self.server == DEFAULT_USER_SERVER
    }

    pub fn is_hosted_pn(&self) -> bool {
        self.server == HOSTED_SERVER
    }

    pub fn is_lid(&self) -> bool {
        self.server == HIDDEN_USER_SERVER
    }

    pub fn is_hosted_lid(&self) -> bool {
        self.server == HOSTED_LID_SERVER
    }

    /// Phone-number namespace, hosted or not.
    pub fn is_any_pn(&self) -> bool {
        self.is_pn() || self.is_hosted_pn()
    }

    /// Linked-identity namespace, hosted or not.
    pub fn is_any_lid(&self) -> bool {
        self.is_lid() || self.is_hosted_lid()
    }

    pub fn is_group(&self) -> bool {
        self.server == GROUP_SERVER
    }

    /// Strips the device component, yielding the user-level JID.
    pub fn to_non_ad(&self) -> Self {
        Self {
            user: self.user.clone(),
            server: self.server.clone(),
            device: 0,
        }
    }

    /// Same user and server with another device number.
    pub fn with_device(&self, device: u16) -> Self {
        Self {
            user: self.user.clone(),
            server: self.server.clone(),
            device,
        }
    }

    pub fn to_signal_address(&self) -> SignalAddress {
        SignalAddress::new(self.user.clone(), self.device as u32)
    }
}

impl FromStr for Jid {
    type Err = JidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (user_part, server) = s
            .split_once('@')
            .ok_or_else(|| JidError::InvalidFormat(format!("missing server: '{s}'")))?;

        if user_part.is_empty() {
            return Err(JidError::InvalidFormat(format!("empty user: '{s}'")));
        }
        if server.is_empty() {
            return Err(JidError::InvalidFormat(format!("empty server: '{s}'")));
        }

        let (user, device) = match user_part.rsplit_once(':') {
            Some((u, d_str)) => (u, d_str.parse()?),
            None => (user_part, 0),
        };

        if user.is_empty() {
            return Err(JidError::InvalidFormat(format!("empty user: '{s}'")));
        }

        Ok(Jid {
            user: user.to_string(),
            server: server.to_string(),
            device,
        })
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user)?;
        if self.device > 0 {
            write!(f, ":{}", self.device)?;
        }
        write!(f, "@{}", self.server)
    }
}

impl From<Jid> for String {
    fn from(jid: Jid) -> Self {
        jid.to_string()
    }
}

impl TryFrom<String> for Jid {
    type Error = JidError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Jid::from_str(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_jid_roundtrip(input: &str, user: &str, server: &str, device: u16) {
        let jid = Jid::from_str(input).unwrap_or_else(|_| panic!("Failed to parse JID: {input}"));
        assert_eq!(jid.user, user, "User part did not match for {input}");
        assert_eq!(jid.server, server, "Server part did not match for {input}");
        assert_eq!(jid.device, device, "Device part did not match for {input}");
        assert_eq!(jid.to_string(), input, "Display did not roundtrip {input}");
    }

    #[test]
    fn test_parse_and_display_roundtrip() {
        assert_jid_roundtrip("15551234567@s.whatsapp.net", "15551234567", "s.whatsapp.net", 0);
        assert_jid_roundtrip("15551234567:15@s.whatsapp.net", "15551234567", "s.whatsapp.net", 15);
        assert_jid_roundtrip("abcd@lid", "abcd", "lid", 0);
        assert_jid_roundtrip("abcd:7@lid", "abcd", "lid", 7);
        assert_jid_roundtrip("abcd:99@hosted.lid", "abcd", "hosted.lid", 99);
        assert_jid_roundtrip("15551234567:99@hosted", "15551234567", "hosted", 99);
        assert_jid_roundtrip("123-456@g.us", "123-456", "g.us", 0);
        // LID users may contain dots; they are part of the identity.
        assert_jid_roundtrip("12345.6789:25@lid", "12345.6789", "lid", 25);
    }

    #[test]
    fn test_device_zero_omitted_on_display() {
        let jid = Jid {
            user: "15551234567".to_string(),
            server: DEFAULT_USER_SERVER.to_string(),
            device: 0,
        };
        assert_eq!(jid.to_string(), "15551234567@s.whatsapp.net");
    }

    #[test]
    fn test_invalid_jids_fail_to_parse() {
        assert!(Jid::from_str("").is_err());
        assert!(Jid::from_str("thisisnotajid").is_err());
        assert!(Jid::from_str("@s.whatsapp.net").is_err());
        assert!(Jid::from_str(":5@s.whatsapp.net").is_err());
        assert!(Jid::from_str("user:x@s.whatsapp.net").is_err());
        assert!(Jid::from_str("user@").is_err());
    }

    #[test]
    fn test_unknown_server_parses_but_classifies_false() {
        let jid = Jid::from_str("someone@example.org").unwrap();
        assert!(!jid.is_pn());
        assert!(!jid.is_hosted_pn());
        assert!(!jid.is_lid());
        assert!(!jid.is_hosted_lid());
        assert!(!jid.is_group());
    }

    #[test]
    fn test_classification_by_server_not_user_shape() {
        // Digits under @lid are still a LID.
        let jid = Jid::from_str("15551234567@lid").unwrap();
        assert!(jid.is_lid());
        assert!(!jid.is_pn());
    }

    #[test]
    fn test_device_projection_hosted_rule() {
        assert_eq!(Jid::lid_device("abcd", 7).to_string(), "abcd:7@lid");
        assert_eq!(Jid::lid_device("abcd", 99).to_string(), "abcd:99@hosted.lid");
        assert_eq!(Jid::lid_device("abcd", 0).to_string(), "abcd@lid");
        assert_eq!(
            Jid::pn_device("15551234567", 99).to_string(),
            "15551234567:99@hosted"
        );
    }

    #[test]
    fn test_with_device_transfers_device() {
        let src = Jid::from_str("15551234567:7@s.whatsapp.net").unwrap();
        let target = Jid::lid("abcd");
        assert_eq!(target.with_device(src.device).to_string(), "abcd:7@lid");
    }

    #[test]
    fn test_to_signal_address() {
        let jid = Jid::from_str("abcd:7@lid").unwrap();
        let addr = jid.to_signal_address();
        assert_eq!(addr.to_string(), "abcd.7");
    }
}
