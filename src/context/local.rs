//! Per-task context store.
//!
//! Same key/value semantics as the global store, without locking: a task's
//! stages never run concurrently, so the owning task is the only accessor.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::context::value::{ContextError, ContextValue, Value};

#[derive(Debug, Default)]
pub struct LocalContext {
    inner: HashMap<String, Value>,
}

impl LocalContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<T: ContextValue>(&self, key: &str) -> Result<T, ContextError> {
        match self.inner.get(key) {
            Some(v) => v.read(key),
            None => Err(ContextError::NotFound(key.to_string())),
        }
    }

    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.inner.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.inner.remove(key).is_some()
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    /// Mutate the value under `key` in place; `Ok(false)` if absent.
    pub fn apply<T, F>(&mut self, key: &str, f: F) -> Result<bool, ContextError>
    where
        T: ContextValue,
        F: FnOnce(&mut T),
    {
        match self.inner.get_mut(key) {
            Some(v) => {
                f(v.read_mut::<T>(key)?);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn set_record<T: Serialize>(&mut self, key: impl Into<String>, record: &T) -> Result<(), ContextError> {
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
            Some(v) => v.read_record(key),
            None => Err(ContextError::NotFound(key.to_string())),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_apply_and_remove() {
        let mut l = LocalContext::new();
        l.set("hits", 0u64);
        for _ in 0..3 {
            l.apply::<u64, _>("hits", |v| *v += 1).unwrap();
        }
        assert_eq!(l.get::<u64>("hits").unwrap(), 3);
        assert!(l.remove("hits"));
        assert_eq!(
            l.get::<u64>("hits").unwrap_err(),
            ContextError::NotFound("hits".into())
        );
    }

    #[test]
    fn two_locals_do_not_share_keys() {
        let mut a = LocalContext::new();
        let b = LocalContext::new();
        a.set("same", "a-only");
        assert!(a.has_key("same"));
        assert!(!b.has_key("same"));
    }
}
