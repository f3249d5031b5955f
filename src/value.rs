//! Opaque task payloads.
//!
//! Params and outputs flow through the engine untouched; the engine only
//! promises that a dump of them is JSON-safe. Live resource handles (a page,
//! a browser session) declare themselves via [`LiveResource`] and are
//! replaced with a placeholder string whenever a payload is serialized.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::Value;

/// Declared capability for live, non-serializable resource handles.
///
/// Implementors name their kind (e.g. `"Page"`); dumps render the handle as
/// `"[Page object]"` instead of attempting to serialize it.
pub trait LiveResource: Send + Sync {
    /// Short kind name used in the dump placeholder.
    fn resource_kind(&self) -> &str;
}

/// Payload attached to a task: plain JSON data, a live resource handle, or a
/// container mixing both.
#[derive(Clone)]
pub enum TaskValue {
    /// Plain JSON data, serialized as-is.
    Data(Value),
    /// Live resource handle, redacted to a placeholder in dumps.
    Resource(Arc<dyn LiveResource>),
    /// Keyed container; entries may mix data and handles.
    Object(BTreeMap<String, TaskValue>),
    /// Ordered container; items may mix data and handles.
    List(Vec<TaskValue>),
}

impl TaskValue {
    /// Wrap a live resource handle.
    pub fn resource(handle: Arc<dyn LiveResource>) -> Self {
        TaskValue::Resource(handle)
    }

    /// Build a keyed container from `(key, value)` pairs.
    pub fn object<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, TaskValue)>,
        K: Into<String>,
    {
        TaskValue::Object(
            entries
                .into_iter()
                .map(|(key, value)| (key.into(), value))
                .collect(),
        )
    }

    /// Look up a key one level deep, on either container form.
    pub fn get(&self, key: &str) -> Option<TaskValue> {
        match self {
            TaskValue::Object(map) => map.get(key).cloned(),
            TaskValue::Data(Value::Object(map)) => map.get(key).cloned().map(TaskValue::Data),
            _ => None,
        }
    }

    /// Plain JSON data, if this is the `Data` form.
    pub fn as_data(&self) -> Option<&Value> {
        match self {
            TaskValue::Data(value) => Some(value),
            _ => None,
        }
    }

    /// Redacted JSON rendering, as embedded in run dumps.
    pub fn to_dump(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    fn placeholder(kind: &str) -> String {
        format!("[{kind} object]")
    }
}

impl From<Value> for TaskValue {
    fn from(value: Value) -> Self {
        TaskValue::Data(value)
    }
}

impl Serialize for TaskValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TaskValue::Data(value) => value.serialize(serializer),
            TaskValue::Resource(handle) => {
                serializer.serialize_str(&Self::placeholder(handle.resource_kind()))
            }
            TaskValue::Object(map) => {
                let mut state = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map {
                    state.serialize_entry(key, value)?;
                }
                state.end()
            }
            TaskValue::List(items) => {
                let mut state = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    state.serialize_element(item)?;
                }
                state.end()
            }
        }
    }
}

impl fmt::Debug for TaskValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskValue::Data(value) => f.debug_tuple("Data").field(value).finish(),
            TaskValue::Resource(handle) => write!(f, "Resource({})", handle.resource_kind()),
            TaskValue::Object(map) => f.debug_tuple("Object").field(map).finish(),
            TaskValue::List(items) => f.debug_tuple("List").field(items).finish(),
        }
    }
}

impl PartialEq for TaskValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TaskValue::Data(a), TaskValue::Data(b)) => a == b,
            // handles have no structural identity; compare the data pointer
            (TaskValue::Resource(a), TaskValue::Resource(b)) => {
                std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
            }
            (TaskValue::Object(a), TaskValue::Object(b)) => a == b,
            (TaskValue::List(a), TaskValue::List(b)) => a == b,
            _ => false,
        }
    }
}
