//! Bidirectional user-level LID/PN mapping store.
//!
//! Mappings live in the `lid-mapping` namespace as two keys per pairing:
//! the forward key `<pn_user>` holding the LID user, and the reverse key
//! `<lid_user>_reverse` holding the PN user. Both sides are written in one
//! transaction so the index stays consistent. Device numbers never enter
//! the namespace: device-specific JIDs are projected from user-level
//! mappings at read time by transferring the query's device onto the
//! resolved user.
//!
//! Reads go through a TTL-bounded cache with one keyspace per direction
//! (`pn:<user>`, `lid:<user>`). The cache is recomputable from the
//! key-value store, so losing it is safe. Unknown users are resolved in
//! bulk through the injected directory service.

pub mod resolver;

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use moka::future::Cache;
use thiserror::Error;

use crate::config::CacheConfig;
use crate::jid::{Jid, JidError};
use crate::store::error::StoreError;
use crate::store::traits::{KeyValueStore, WriteBatch, LID_MAPPING_NAMESPACE};

pub use resolver::{LidDirectory, LidPnPair};

const REVERSE_SUFFIX: &str = "_reverse";

fn reverse_key(lid_user: &str) -> String {
    format!("{lid_user}{REVERSE_SUFFIX}")
}

fn pn_cache_key(pn_user: &str) -> String {
    format!("pn:{pn_user}")
}

fn lid_cache_key(lid_user: &str) -> String {
    format!("lid:{lid_user}")
}

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("Invalid mapping arguments: {0}")]
    InvalidArgs(String),
    #[error("Failed to decode JID: {0}")]
    Decode(#[from] JidError),
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

/// A device-specific resolution result: the queried PN JID together with
/// its LID equivalent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLid {
    pub pn: Jid,
    pub lid: Jid,
}

/// Inbound message addressing, as seen in a stanza header: the chat JID
/// and, in groups, the sender participant.
#[derive(Debug, Clone)]
pub struct MessageAddressing {
    pub jid: String,
    pub participant: Option<String>,
}

/// Outcome of a consistency scan over the mapping namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub validated: usize,
    pub repaired: usize,
    pub errors: usize,
}

pub struct LidMappingStore {
    kv: Arc<dyn KeyValueStore>,
    directory: Option<Arc<dyn LidDirectory>>,
    cache: Cache<String, Arc<str>>,
}

impl LidMappingStore {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        directory: Option<Arc<dyn LidDirectory>>,
        config: &CacheConfig,
    ) -> Self {
        Self {
            kv,
            directory,
            cache: Cache::builder().time_to_live(config.mapping_ttl).build(),
        }
    }

    /// Splits a pairing given in either argument order into `(lid, pn)`.
    fn classify_pair(a: &str, b: &str) -> Result<(Jid, Jid), MappingError> {
        if a.is_empty() || b.is_empty() {
            return Err(MappingError::InvalidArgs("empty JID".to_string()));
        }
        let a: Jid = a.parse()?;
        let b: Jid = b.parse()?;
        if a.is_any_lid() && b.is_any_pn() {
            Ok((a, b))
        } else if a.is_any_pn() && b.is_any_lid() {
            Ok((b, a))
        } else {
            Err(MappingError::InvalidArgs(format!(
                "expected one LID and one PN, got {a} and {b}"
            )))
        }
    }

    async fn warm_pair(&self, pn_user: &str, lid_user: &str) {
        let lid: Arc<str> = lid_user.into();
        let pn: Arc<str> = pn_user.into();
        self.cache.insert(pn_cache_key(pn_user), lid).await;
        self.cache.insert(lid_cache_key(lid_user), pn).await;
    }

    /// Stores one LID/PN pairing. Arguments may come in either order; both
    /// sides are written in a single transaction and the cache is updated
    /// write-through.
    pub async fn store(&self, a: &str, b: &str) -> Result<LidPnPair, MappingError> {
        let (lid, pn) = Self::classify_pair(a, b)?;

        let mut batch = WriteBatch::new();
        batch.put(LID_MAPPING_NAMESPACE, pn.user.clone(), lid.user.as_bytes());
        batch.put(
            LID_MAPPING_NAMESPACE,
            reverse_key(&lid.user),
            pn.user.as_bytes(),
        );
        self.kv.commit(batch).await?;

        self.warm_pair(&pn.user, &lid.user).await;
        debug!("Stored LID mapping {} -> {}", pn.user, lid.user);
        Ok(LidPnPair::new(lid.user, pn.user))
    }

    /// Stores many pairings in one transaction. Pairs equal to the current
    /// mapping are skipped; malformed pairs are logged and dropped without
    /// failing the batch. Returns the number of pairs written.
    pub async fn store_batch(&self, pairs: &[(&str, &str)]) -> Result<usize, MappingError> {
        let mut staged: Vec<(String, String)> = Vec::new();
        for (a, b) in pairs {
            let (lid, pn) = match Self::classify_pair(a, b) {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("Dropping malformed mapping pair ({a}, {b}): {e}");
                    continue;
                }
            };
            match self.lookup_lid_user(&pn.user).await? {
                Some(existing) if existing.as_ref() == lid.user => {}
                _ => staged.push((pn.user, lid.user)),
            }
        }

        if staged.is_empty() {
            return Ok(0);
        }

        let mut batch = WriteBatch::new();
        for (pn_user, lid_user) in &staged {
            batch.put(LID_MAPPING_NAMESPACE, pn_user.clone(), lid_user.as_bytes());
            batch.put(
                LID_MAPPING_NAMESPACE,
                reverse_key(lid_user),
                pn_user.as_bytes(),
            );
        }
        self.kv.commit(batch).await?;

        for (pn_user, lid_user) in &staged {
            self.warm_pair(pn_user, lid_user).await;
        }
        debug!("Stored {} LID mappings in one batch", staged.len());
        Ok(staged.len())
    }

    /// Store-only forward lookup: cache, then the key-value store. Never
    /// consults the directory. A hit warms both cache directions.
    pub async fn lookup_lid_user(
        &self,
        pn_user: &str,
    ) -> Result<Option<Arc<str>>, MappingError> {
        if let Some(lid) = self.cache.get(&pn_cache_key(pn_user)).await {
            return Ok(Some(lid));
        }
        match self.kv.get_one(LID_MAPPING_NAMESPACE, pn_user).await? {
            Some(raw) => {
                let lid_user = String::from_utf8(raw)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                self.warm_pair(pn_user, &lid_user).await;
                Ok(Some(lid_user.into()))
            }
            None => Ok(None),
        }
    }

    /// Store-only reverse lookup, mirroring [`Self::lookup_lid_user`].
    pub async fn lookup_pn_user(
        &self,
        lid_user: &str,
    ) -> Result<Option<Arc<str>>, MappingError> {
        if let Some(pn) = self.cache.get(&lid_cache_key(lid_user)).await {
            return Ok(Some(pn));
        }
        match self
            .kv
            .get_one(LID_MAPPING_NAMESPACE, &reverse_key(lid_user))
            .await?
        {
            Some(raw) => {
                let pn_user = String::from_utf8(raw)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                self.warm_pair(&pn_user, lid_user).await;
                Ok(Some(pn_user.into()))
            }
            None => Ok(None),
        }
    }

    pub async fn get_lid_for_pn(&self, pn: &str) -> Result<Option<Jid>, MappingError> {
        let mut resolved = self.get_lids_for_pns(&[pn]).await?;
        Ok(resolved.pop().map(|r| r.lid))
    }

    /// Resolves LID JIDs for a batch of PN JIDs: cache, then the key-value
    /// store, then one bulk directory query for the remaining unknowns.
    /// Non-PN and malformed entries are skipped; duplicates collapse.
    /// Results carry the query's device number, projected onto the
    /// resolved LID user.
    pub async fn get_lids_for_pns(&self, pns: &[&str]) -> Result<Vec<ResolvedLid>, MappingError> {
        let mut results = Vec::new();
        // Unknown users queued for the directory, with every device-specific
        // query JID that asked for them.
        let mut pending: HashMap<String, Vec<Jid>> = HashMap::new();
        let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();

        for raw in pns {
            let jid: Jid = match raw.parse() {
                Ok(jid) => jid,
                Err(e) => {
                    warn!("Skipping malformed PN query '{raw}': {e}");
                    continue;
                }
            };
            if !jid.is_any_pn() {
                continue;
            }
            // Hosted PN rebases to the canonical PN domain for lookup; the
            // mapping is user-level either way.
            if !seen.insert(format!("{}:{}", jid.user, jid.device)) {
                continue;
            }
            match self.lookup_lid_user(&jid.user).await? {
                Some(lid_user) => {
                    let lid = Jid::lid_device(&lid_user, jid.device);
                    results.push(ResolvedLid { pn: jid, lid });
                }
                None => {
                    pending.entry(jid.user.clone()).or_default().push(jid);
                }
            }
        }

        if !pending.is_empty() {
            if let Some(directory) = &self.directory {
                let queries: Vec<Jid> = pending.keys().map(|user| Jid::pn(user)).collect();
                debug!("Querying directory for {} unknown PN users", queries.len());
                match directory.resolve(&queries).await {
                    Ok(pairs) if !pairs.is_empty() => {
                        let owned: Vec<(String, String)> = pairs
                            .iter()
                            .map(|p| (Jid::lid(&p.lid_user).to_string(), Jid::pn(&p.pn_user).to_string()))
                            .collect();
                        let borrowed: Vec<(&str, &str)> = owned
                            .iter()
                            .map(|(l, p)| (l.as_str(), p.as_str()))
                            .collect();
                        self.store_batch(&borrowed).await?;

                        for pair in &pairs {
                            if let Some(queries) = pending.get(&pair.pn_user) {
                                for query in queries {
                                    let lid = Jid::lid_device(&pair.lid_user, query.device);
                                    results.push(ResolvedLid {
                                        pn: query.clone(),
                                        lid,
                                    });
                                }
                            }
                        }
                    }
                    Ok(_) => debug!("Directory returned no mappings"),
                    Err(e) => warn!("Directory resolve failed: {e}"),
                }
            }
        }

        Ok(results)
    }

    /// Reverse resolution: the PN JID for a LID JID, with the query's
    /// device transferred onto the PN user. Returns `None` when the
    /// reverse mapping is absent.
    pub async fn get_pn_for_lid(&self, lid: &str) -> Result<Option<Jid>, MappingError> {
        if lid.is_empty() {
            return Err(MappingError::InvalidArgs("empty JID".to_string()));
        }
        let jid: Jid = lid.parse()?;
        if !jid.is_any_lid() {
            return Err(MappingError::InvalidArgs(format!("not a LID: {jid}")));
        }
        match self.lookup_pn_user(&jid.user).await? {
            Some(pn_user) => Ok(Some(Jid::pn_device(&pn_user, jid.device))),
            None => Ok(None),
        }
    }

    /// Deletes both sides of the mapping the given user participates in.
    /// The user may be either the PN (forward) or the LID (reverse) side.
    /// Returns `false` when no mapping exists.
    pub async fn remove(&self, user_id: &str) -> Result<bool, MappingError> {
        // Read the authoritative store first to find the peer side.
        if let Some(raw) = self.kv.get_one(LID_MAPPING_NAMESPACE, user_id).await? {
            let lid_user =
                String::from_utf8(raw).map_err(|e| StoreError::Serialization(e.to_string()))?;
            let mut batch = WriteBatch::new();
            batch.delete(LID_MAPPING_NAMESPACE, user_id);
            batch.delete(LID_MAPPING_NAMESPACE, reverse_key(&lid_user));
            self.kv.commit(batch).await?;
            self.cache.invalidate(&pn_cache_key(user_id)).await;
            self.cache.invalidate(&lid_cache_key(&lid_user)).await;
            return Ok(true);
        }

        if let Some(raw) = self
            .kv
            .get_one(LID_MAPPING_NAMESPACE, &reverse_key(user_id))
            .await?
        {
            let pn_user =
                String::from_utf8(raw).map_err(|e| StoreError::Serialization(e.to_string()))?;
            let mut batch = WriteBatch::new();
            batch.delete(LID_MAPPING_NAMESPACE, reverse_key(user_id));
            batch.delete(LID_MAPPING_NAMESPACE, pn_user.clone());
            self.kv.commit(batch).await?;
            self.cache.invalidate(&lid_cache_key(user_id)).await;
            self.cache.invalidate(&pn_cache_key(&pn_user)).await;
            return Ok(true);
        }

        Ok(false)
    }

    /// Whether the user participates in any mapping, on either side.
    pub async fn has(&self, user_id: &str) -> Result<bool, MappingError> {
        if self.cache.contains_key(&pn_cache_key(user_id))
            || self.cache.contains_key(&lid_cache_key(user_id))
        {
            return Ok(true);
        }
        let keys = vec![user_id.to_string(), reverse_key(user_id)];
        let found = self.kv.get_many(LID_MAPPING_NAMESPACE, &keys).await?;
        Ok(!found.is_empty())
    }

    /// Derives the `(pn_user, lid_user)` pairing implied by one message's
    /// addressing, if any new information is present.
    fn pair_from_addressing(jid: &Jid, participant: Option<&Jid>) -> Option<(String, String)> {
        match participant {
            Some(p) if jid.is_any_lid() && p.is_any_pn() => {
                Some((p.user.clone(), jid.user.clone()))
            }
            Some(p) if jid.is_any_pn() && p.is_any_lid() => {
                Some((jid.user.clone(), p.user.clone()))
            }
            _ => None,
        }
    }

    /// Learns a mapping from an inbound message header. With a LID and a
    /// PN present the pairing is stored (skipped when unchanged); with no
    /// participant the existing mapping for the lone identity is returned,
    /// since it carries no new pairing. Any other combination, such as two
    /// identities from the same namespace, is ignored.
    pub async fn store_from_message(
        &self,
        jid: &str,
        participant: Option<&str>,
    ) -> Result<Option<LidPnPair>, MappingError> {
        let jid: Jid = jid.parse()?;
        let participant = match participant {
            Some(raw) => Some(raw.parse::<Jid>()?),
            None => None,
        };

        if let Some((pn_user, lid_user)) = Self::pair_from_addressing(&jid, participant.as_ref()) {
            match self.lookup_lid_user(&pn_user).await? {
                Some(existing) if existing.as_ref() == lid_user => {
                    return Ok(Some(LidPnPair::new(lid_user, pn_user)));
                }
                _ => {}
            }
            let pair = self
                .store(
                    &Jid::lid(&lid_user).to_string(),
                    &Jid::pn(&pn_user).to_string(),
                )
                .await?;
            return Ok(Some(pair));
        }

        if participant.is_none() {
            if jid.is_any_lid() {
                return Ok(self
                    .lookup_pn_user(&jid.user)
                    .await?
                    .map(|pn| LidPnPair::new(jid.user.clone(), pn.to_string())));
            }
            if jid.is_any_pn() {
                return Ok(self
                    .lookup_lid_user(&jid.user)
                    .await?
                    .map(|lid| LidPnPair::new(lid.to_string(), jid.user.clone())));
            }
        }
        Ok(None)
    }

    /// Batch form of [`Self::store_from_message`]. Conflicting pairings
    /// within the batch (one PN mapped to two LIDs) are logged; the last
    /// one wins. Returns the number of mappings written.
    pub async fn store_from_messages(
        &self,
        messages: &[MessageAddressing],
    ) -> Result<usize, MappingError> {
        let mut learned: HashMap<String, String> = HashMap::new();
        for message in messages {
            let jid: Jid = match message.jid.parse() {
                Ok(jid) => jid,
                Err(e) => {
                    warn!("Skipping message with malformed JID '{}': {e}", message.jid);
                    continue;
                }
            };
            let participant = match &message.participant {
                Some(raw) => match raw.parse::<Jid>() {
                    Ok(jid) => Some(jid),
                    Err(e) => {
                        warn!("Skipping message with malformed participant '{raw}': {e}");
                        continue;
                    }
                },
                None => None,
            };
            if let Some((pn_user, lid_user)) = Self::pair_from_addressing(&jid, participant.as_ref())
            {
                if let Some(previous) = learned.get(&pn_user) {
                    if previous != &lid_user {
                        warn!(
                            "Conflicting LID mappings for {pn_user} in one batch: {previous} vs {lid_user}, keeping the later one"
                        );
                    }
                }
                learned.insert(pn_user, lid_user);
            }
        }

        if learned.is_empty() {
            return Ok(0);
        }

        let owned: Vec<(String, String)> = learned
            .into_iter()
            .map(|(pn_user, lid_user)| {
                (
                    Jid::lid(&lid_user).to_string(),
                    Jid::pn(&pn_user).to_string(),
                )
            })
            .collect();
        let borrowed: Vec<(&str, &str)> = owned
            .iter()
            .map(|(l, p)| (l.as_str(), p.as_str()))
            .collect();
        self.store_batch(&borrowed).await
    }

    /// Scans every forward mapping and rewrites reverse entries that are
    /// missing or point at the wrong PN user. All repairs commit in one
    /// transaction. Forward values that are empty or not UTF-8 are counted
    /// as errors and left alone.
    pub async fn validate_and_repair(&self) -> Result<RepairReport, MappingError> {
        let all = self.kv.get_all(LID_MAPPING_NAMESPACE).await?;
        let mut report = RepairReport::default();
        let mut batch = WriteBatch::new();

        for (key, value) in &all {
            if key.ends_with(REVERSE_SUFFIX) {
                continue;
            }
            let lid_user = match std::str::from_utf8(value) {
                Ok(s) if !s.is_empty() => s,
                _ => {
                    warn!("Forward mapping for {key} holds an invalid value");
                    report.errors += 1;
                    continue;
                }
            };
            let expected = key.as_bytes();
            match all.get(&reverse_key(lid_user)) {
                Some(reverse) if reverse == expected => report.validated += 1,
                _ => {
                    batch.put(LID_MAPPING_NAMESPACE, reverse_key(lid_user), expected);
                    report.repaired += 1;
                }
            }
        }

        if !batch.is_empty() {
            self.kv.commit(batch).await?;
        }
        debug!(
            "Mapping scan: {} validated, {} repaired, {} errors",
            report.validated, report.repaired, report.errors
        );
        Ok(report)
    }

    /// Preloads the cache from already-known pairings, as done once at
    /// client start.
    pub async fn warm_up(&self, pairs: impl IntoIterator<Item = LidPnPair>) {
        let mut count = 0usize;
        for pair in pairs {
            self.warm_pair(&pair.pn_user, &pair.lid_user).await;
            count += 1;
        }
        debug!("LID mapping cache warmed up with {count} entries");
    }

    /// Drops every cached entry. Persistent state is untouched.
    pub fn clear_cache(&self) {
        self.cache.invalidate_all();
    }
}
