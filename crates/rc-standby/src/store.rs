//! Instance Record Store
//!
//! The controller only needs three operations on the shared record. The
//! MongoDB implementation lives in [`crate::mongo`]; the in-memory one here
//! backs tests and single-host development.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::StoreError;
use crate::record::{InstanceKey, KeepAlive, ProcessInstance};

/// Result of an insert attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Another node created the record first; nothing was overwritten
    AlreadyExists,
}

#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn find(&self, key: &InstanceKey) -> Result<Option<ProcessInstance>, StoreError>;

    /// Insert a new record. Must never replace an existing record for the same key.
    async fn insert(&self, record: &ProcessInstance) -> Result<InsertOutcome, StoreError>;

    /// Set `activeNodeName`, `activeNodeKeepAliveTimeTag` and `softwareVersion`.
    async fn update_keep_alive(&self, key: &InstanceKey, keep_alive: &KeepAlive) -> Result<(), StoreError>;
}

// ============================================================================
// In-Memory Instance Store
// ============================================================================

pub struct InMemoryInstanceStore {
    records: RwLock<HashMap<InstanceKey, ProcessInstance>>,
    unavailable: AtomicBool,
}

impl InMemoryInstanceStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Create a store seeded with one record
    pub fn with_record(record: ProcessInstance) -> Self {
        let store = Self::new();
        store.put(record);
        store
    }

    /// Write a record unconditionally, as an operator editing the collection would.
    pub fn put(&self, record: ProcessInstance) {
        self.records.write().insert(record.key(), record);
    }

    pub fn get(&self, key: &InstanceKey) -> Option<ProcessInstance> {
        self.records.read().get(key).cloned()
    }

    /// Edit a record in place. Returns false if it does not exist.
    pub fn modify<F>(&self, key: &InstanceKey, f: F) -> bool
    where
        F: FnOnce(&mut ProcessInstance),
    {
        match self.records.write().get_mut(key) {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, key: &InstanceKey) -> Option<ProcessInstance> {
        self.records.write().remove(key)
    }

    /// Make every operation fail until cleared
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store marked unavailable".to_string()));
        }
        Ok(())
    }
}

impl Default for InMemoryInstanceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InstanceStore for InMemoryInstanceStore {
    async fn find(&self, key: &InstanceKey) -> Result<Option<ProcessInstance>, StoreError> {
        self.check_available()?;
        Ok(self.get(key))
    }

    async fn insert(&self, record: &ProcessInstance) -> Result<InsertOutcome, StoreError> {
        self.check_available()?;
        let mut records = self.records.write();
        let key = record.key();
        if records.contains_key(&key) {
            return Ok(InsertOutcome::AlreadyExists);
        }
        records.insert(key, record.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn update_keep_alive(&self, key: &InstanceKey, keep_alive: &KeepAlive) -> Result<(), StoreError> {
        self.check_available()?;
        let mut records = self.records.write();
        let record = records
            .get_mut(key)
            .ok_or_else(|| StoreError::Missing(key.to_string()))?;
        record.apply_keep_alive(keep_alive);
        Ok(())
    }
}
