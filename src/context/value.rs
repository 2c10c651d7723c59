//! Dynamically-typed context values.
//!
//! Every value stored in a [`GlobalContext`](super::GlobalContext) or
//! [`LocalContext`](super::LocalContext) is a [`Value`]. Callers fix the
//! concrete type when reading through the [`ContextValue`] trait; a read with
//! the wrong type is reported as [`ContextError::TypeMismatch`] instead of
//! reinterpreting the stored data.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Errors raised by context reads and writes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContextError {
    /// No value is stored under the key.
    #[error("context key '{0}' not found")]
    NotFound(String),

    /// The stored value has a different type than the caller expected.
    #[error("context key '{key}' holds {found}, expected {expected}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    /// A structured record could not be converted to or from JSON.
    #[error("context key '{key}' record conversion failed: {reason}")]
    Record { key: String, reason: String },
}

/// A tagged context value.
#[derive(Clone)]
pub enum Value {
    Int(i64),
    UInt(u64),
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
    /// Arbitrary structured record.
    Record(serde_json::Value),
    /// Opaque shared handle, read back with [`Value::downcast_handle`].
    Handle(Arc<dyn Any + Send + Sync>),
}

impl Value {
    /// Name of the variant, used in mismatch diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Record(_) => "record",
            Value::Handle(_) => "handle",
        }
    }

    /// Wrap an arbitrary shared object.
    pub fn handle<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Value::Handle(value)
    }

    /// Serialize `value` into a record.
    pub fn record<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(value).map(Value::Record)
    }

    pub fn downcast_handle<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            Value::Handle(h) => h.clone().downcast::<T>().ok(),
            _ => None,
        }
    }

    /// Read this value as `T`, naming `key` in the error.
    pub fn read<T: ContextValue>(&self, key: &str) -> Result<T, ContextError> {
        T::from_value(self).ok_or_else(|| mismatch::<T>(key, self))
    }

    /// Borrow this value mutably as `T`, naming `key` in the error.
    pub fn read_mut<T: ContextValue>(&mut self, key: &str) -> Result<&mut T, ContextError> {
        let found = self.kind();
        T::from_value_mut(self).ok_or_else(|| {
            tracing::error!(key, expected = T::KIND, found, "context type mismatch");
            ContextError::TypeMismatch {
                key: key.to_string(),
                expected: T::KIND,
                found,
            }
        })
    }

    /// Deserialize a record into `T`.
    pub fn read_record<T: DeserializeOwned>(&self, key: &str) -> Result<T, ContextError> {
        match self {
            Value::Record(v) => serde_json::from_value(v.clone()).map_err(|e| ContextError::Record {
                key: key.to_string(),
                reason: e.to_string(),
            }),
            other => Err(mismatch::<serde_json::Value>(key, other)),
        }
    }
}

fn mismatch<T: ContextValue>(key: &str, found: &Value) -> ContextError {
    tracing::error!(key, expected = T::KIND, found = found.kind(), "context type mismatch");
    ContextError::TypeMismatch {
        key: key.to_string(),
        expected: T::KIND,
        found: found.kind(),
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => f.debug_tuple("Int").field(v).finish(),
            Value::UInt(v) => f.debug_tuple("UInt").field(v).finish(),
            Value::Bool(v) => f.debug_tuple("Bool").field(v).finish(),
            Value::Str(v) => f.debug_tuple("Str").field(v).finish(),
            Value::Bytes(v) => f.debug_tuple("Bytes").field(&v.len()).finish(),
            Value::Record(v) => f.debug_tuple("Record").field(v).finish(),
            Value::Handle(_) => f.write_str("Handle(..)"),
        }
    }
}

/// Types that can be stored in and read back from a [`Value`].
pub trait ContextValue: Sized {
    /// Variant name reported on mismatch.
    const KIND: &'static str;

    fn into_value(self) -> Value;
    fn from_value(value: &Value) -> Option<Self>;
    fn from_value_mut(value: &mut Value) -> Option<&mut Self>;
}

macro_rules! context_value {
    ($ty:ty, $variant:ident, $kind:literal) => {
        impl ContextValue for $ty {
            const KIND: &'static str = $kind;

            fn into_value(self) -> Value {
                Value::$variant(self)
            }

            fn from_value(value: &Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(v.clone()),
                    _ => None,
                }
            }

            fn from_value_mut(value: &mut Value) -> Option<&mut Self> {
                match value {
                    Value::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }

        impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v)
            }
        }
    };
}

context_value!(i64, Int, "int");
context_value!(u64, UInt, "uint");
context_value!(bool, Bool, "bool");
context_value!(String, Str, "string");
context_value!(Vec<u8>, Bytes, "bytes");
context_value!(serde_json::Value, Record, "record");

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_matching_type() {
        let v = Value::from("abc");
        assert_eq!(v.read::<String>("k").unwrap(), "abc");
    }

    #[test]
    fn read_mismatched_type_fails_loudly() {
        let v = Value::from(5i64);
        let err = v.read::<String>("k").unwrap_err();
        assert_eq!(
            err,
            ContextError::TypeMismatch {
                key: "k".into(),
                expected: "string",
                found: "int",
            }
        );
    }

    #[test]
    fn signed_and_unsigned_are_distinct() {
        let v = Value::from(1u64);
        assert!(v.read::<i64>("n").is_err());
        assert_eq!(v.read::<u64>("n").unwrap(), 1);
    }

    #[test]
    fn handles_downcast_to_their_own_type() {
        let v = Value::handle(Arc::new(42u32));
        assert_eq!(*v.downcast_handle::<u32>().unwrap(), 42);
        assert!(v.downcast_handle::<String>().is_none());
    }

    #[test]
    fn records_round_through_json() {
        #[derive(Serialize, serde::Deserialize, Debug, PartialEq)]
        struct Payment {
            amount: u64,
            payment_id: String,
        }
        let p = Payment {
            amount: 10,
            payment_id: "abc".into(),
        };
        let v = Value::record(&p).unwrap();
        assert_eq!(v.read_record::<Payment>("p").unwrap(), p);
    }
}
