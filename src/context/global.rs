//! Process-wide context store.
//!
//! # Design Decisions
//! - Backed by `DashMap`: keys are spread over a fixed number of shards by
//!   hash, each shard behind its own lock
//! - Every operation on one key is linearizable; `apply` holds the shard
//!   write lock for the whole read-modify-write
//! - Operations on keys in different shards never contend

use std::any::Any;
use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::context::value::{ContextError, ContextValue, Value};

/// Thread-safe key/value store shared by every task for the lifetime of the
/// process.
#[derive(Debug, Default)]
pub struct GlobalContext {
    inner: DashMap<String, Value>,
}

impl GlobalContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with at least `shards` shards. The count is rounded
    /// up to a power of two, minimum 2.
    pub fn with_shards(shards: usize) -> Self {
        let shards = shards.max(2).checked_next_power_of_two().unwrap_or(1 << 16).min(1 << 16);
        Self {
            inner: DashMap::with_shard_amount(shards),
        }
    }

    /// Read the value under `key` as `T`.
    pub fn get<T: ContextValue>(&self, key: &str) -> Result<T, ContextError> {
        match self.inner.get(key) {
            Some(v) => v.value().read(key),
            None => Err(ContextError::NotFound(key.to_string())),
        }
    }

    /// Clone the raw value under `key`.
    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.inner.get(key).map(|v| v.value().clone())
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner.insert(key.into(), value.into());
    }

    /// Remove `key`, returning whether it was present.
    pub fn remove(&self, key: &str) -> bool {
        self.inner.remove(key).is_some()
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    /// Atomically mutate the value under `key` in place.
    ///
    /// Returns `Ok(false)` without calling `f` when the key is absent. The
    /// mutator runs under the shard lock and must not touch this store.
    pub fn apply<T, F>(&self, key: &str, f: F) -> Result<bool, ContextError>
    where
        T: ContextValue,
        F: FnOnce(&mut T),
    {
        match self.inner.get_mut(key) {
            Some(mut entry) => {
                let slot = entry.value_mut().read_mut::<T>(key)?;
                f(slot);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Like [`apply`](Self::apply) but hands the untyped value to `f`.
    pub fn apply_value<F>(&self, key: &str, f: F) -> bool
    where
        F: FnOnce(&mut Value),
    {
        match self.inner.get_mut(key) {
            Some(mut entry) => {
                f(entry.value_mut());
                true
            }
            None => false,
        }
    }

    pub fn set_record<T: Serialize>(&self, key: impl Into<String>, record: &T) -> Result<(), ContextError> {
        let key = key.into();
        let value = Value::record(record).map_err(|e| ContextError::Record {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        self.inner.insert(key, value);
        Ok(())
    }

    pub fn get_record<T: DeserializeOwned>(&self, key: &str) -> Result<T, ContextError> {
        match self.inner.get(key) {
            Some(v) => v.value().read_record(key),
            None => Err(ContextError::NotFound(key.to_string())),
        }
    }

    pub fn set_handle<T: Any + Send + Sync>(&self, key: impl Into<String>, handle: Arc<T>) {
        self.inner.insert(key.into(), Value::handle(handle));
    }

    pub fn get_handle<T: Any + Send + Sync>(&self, key: &str) -> Result<Arc<T>, ContextError> {
        let entry = self
            .inner
            .get(key)
            .ok_or_else(|| ContextError::NotFound(key.to_string()))?;
        entry
            .value()
            .downcast_handle::<T>()
            .ok_or_else(|| ContextError::TypeMismatch {
                key: key.to_string(),
                expected: std::any::type_name::<T>(),
                found: entry.value().kind(),
            })
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
