//! Contract for the external directory service that maps PN users to LID
//! users in bulk.

use async_trait::async_trait;

use crate::jid::Jid;

/// One learned user-level pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LidPnPair {
    pub lid_user: String,
    pub pn_user: String,
}

impl LidPnPair {
    pub fn new(lid_user: impl Into<String>, pn_user: impl Into<String>) -> Self {
        Self {
            lid_user: lid_user.into(),
            pn_user: pn_user.into(),
        }
    }
}

/// Bulk PN-to-LID lookup against the directory service.
///
/// Queries are normalized user-level PN JIDs. Unresolved entries are simply
/// absent from the result. The implementation owns rate limiting and
/// retries; the mapping store treats errors and empty results alike as
/// "nothing learned" and never retries.
#[async_trait]
pub trait LidDirectory: Send + Sync {
    async fn resolve(
        &self,
        pn_users: &[Jid],
    ) -> Result<Vec<LidPnPair>, Box<dyn std::error::Error + Send + Sync>>;
}
