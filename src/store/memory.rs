//! A simple in-memory key-value backend for testing purposes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::store::error::{Result, StoreError};
use crate::store::traits::{KeyValueStore, ValueOp, WriteBatch};

/// Namespaced map behind a single lock. Commits apply under the write lock,
/// so a batch is observed either entirely or not at all.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, HashMap<String, Vec<u8>>>>,
    fail_next_commit: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `commit` fail without applying anything. Used by the
    /// migration atomicity tests.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Seeds a single key, outside of any transaction.
    pub async fn seed(&self, namespace: &str, key: &str, value: &[u8]) {
        let mut tables = self.tables.write().await;
        tables
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value.to_vec());
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get_many(&self, namespace: &str, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        let tables = self.tables.read().await;
        let mut found = HashMap::new();
        if let Some(table) = tables.get(namespace) {
            for key in keys {
                if let Some(value) = table.get(key) {
                    found.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(found)
    }

    async fn get_all(&self, namespace: &str) -> Result<HashMap<String, Vec<u8>>> {
        let tables = self.tables.read().await;
        Ok(tables.get(namespace).cloned().unwrap_or_default())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Aborted("injected commit failure".to_string()));
        }

        let mut tables = self.tables.write().await;
        for (namespace, entries) in batch.into_ops() {
            let table = tables.entry(namespace).or_default();
            for (key, op) in entries {
                match op {
                    ValueOp::Put(value) => {
                        table.insert(key, value);
                    }
                    ValueOp::Delete => {
                        table.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }
}
