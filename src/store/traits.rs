//! Contract over the host-supplied transactional key-value store.
//!
//! The adapter performs no business logic. Reads are batched gets within a
//! namespace; writes are staged into a [`WriteBatch`] and committed as one
//! atomic unit. Nested operations join their caller's transaction by staging
//! into the caller's batch instead of committing their own.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::store::error::Result;

pub const LID_MAPPING_NAMESPACE: &str = "lid-mapping";
pub const SESSION_NAMESPACE: &str = "session";
pub const PRE_KEY_NAMESPACE: &str = "pre-key";
pub const SIGNED_PRE_KEY_NAMESPACE: &str = "signed-pre-key";
pub const SENDER_KEY_NAMESPACE: &str = "sender-key";
pub const DEVICE_LIST_NAMESPACE: &str = "device-list";

/// A staged mutation: write a value or remove the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueOp {
    Put(Vec<u8>),
    Delete,
}

/// A set of mutations, keyed by namespace then key, applied atomically by
/// [`KeyValueStore::commit`]. Staging the same key twice keeps the later
/// mutation, mirroring write order inside a transaction.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: HashMap<String, HashMap<String, ValueOp>>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, namespace: &str, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.ops
            .entry(namespace.to_string())
            .or_default()
            .insert(key.into(), ValueOp::Put(value.into()));
    }

    pub fn delete(&mut self, namespace: &str, key: impl Into<String>) {
        self.ops
            .entry(namespace.to_string())
            .or_default()
            .insert(key.into(), ValueOp::Delete);
    }

    pub fn is_empty(&self) -> bool {
        self.ops.values().all(|ns| ns.is_empty())
    }

    /// Number of staged mutations across all namespaces.
    pub fn len(&self) -> usize {
        self.ops.values().map(|ns| ns.len()).sum()
    }

    /// Folds another batch into this one. The other batch's mutations win on
    /// key collisions, as if staged later in the same transaction.
    pub fn merge(&mut self, other: WriteBatch) {
        for (namespace, entries) in other.ops {
            self.ops.entry(namespace).or_default().extend(entries);
        }
    }

    pub fn ops(&self) -> &HashMap<String, HashMap<String, ValueOp>> {
        &self.ops
    }

    pub fn into_ops(self) -> HashMap<String, HashMap<String, ValueOp>> {
        self.ops
    }
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Reads several keys from one namespace. Missing keys are absent from
    /// the result.
    async fn get_many(&self, namespace: &str, keys: &[String]) -> Result<HashMap<String, Vec<u8>>>;

    /// Reads an entire namespace.
    async fn get_all(&self, namespace: &str) -> Result<HashMap<String, Vec<u8>>>;

    /// Applies every staged mutation atomically: all of them commit, or none.
    async fn commit(&self, batch: WriteBatch) -> Result<()>;

    async fn get_one(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let mut found = self.get_many(namespace, &[key.to_string()]).await?;
        Ok(found.remove(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_batch_last_stage_wins() {
        let mut batch = WriteBatch::new();
        batch.put(SESSION_NAMESPACE, "a.0", b"one".to_vec());
        batch.delete(SESSION_NAMESPACE, "a.0");
        assert_eq!(batch.ops()[SESSION_NAMESPACE]["a.0"], ValueOp::Delete);
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_write_batch_merge_joins_transactions() {
        let mut outer = WriteBatch::new();
        outer.put(LID_MAPPING_NAMESPACE, "p", b"l".to_vec());

        let mut inner = WriteBatch::new();
        inner.put(LID_MAPPING_NAMESPACE, "l_reverse", b"p".to_vec());
        inner.put(LID_MAPPING_NAMESPACE, "p", b"l2".to_vec());

        outer.merge(inner);
        assert_eq!(outer.len(), 2);
        assert_eq!(
            outer.ops()[LID_MAPPING_NAMESPACE]["p"],
            ValueOp::Put(b"l2".to_vec())
        );
    }
}
