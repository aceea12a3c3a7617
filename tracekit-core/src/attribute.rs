//! Attribute bags for consumer-defined state
//!
//! Each [`Trace`](crate::Trace) and [`Traceset`](crate::Traceset) carries an
//! [`AttributeBag`]. Serialisable values are stored as JSON so drivers can
//! dump them; arbitrary objects (an analysis' accumulator, say) are stored
//! behind an `Arc` and retrieved by type.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

#[derive(Clone, Default)]
pub struct AttributeBag {
    values: BTreeMap<String, Value>,
    objects: BTreeMap<String, Arc<dyn Any + Send + Sync>>,
}

impl AttributeBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a serialisable value under `key`, replacing any previous one
    pub fn set<V: Serialize>(&mut self, key: impl Into<String>, value: V) -> Result<()> {
        self.values.insert(key.into(), serde_json::to_value(value)?);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Deserialize the value under `key`
    pub fn get_as<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>> {
        self.values
            .get(key)
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .map_err(Into::into)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key) || self.objects.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().chain(self.objects.keys()).map(String::as_str)
    }

    /// Store an object; it is shared, not copied, when the bag is cloned
    pub fn insert_object<O: Any + Send + Sync>(&mut self, key: impl Into<String>, object: O) {
        self.objects.insert(key.into(), Arc::new(object));
    }

    /// The object under `key` if it has type `O`
    pub fn object<O: Any + Send + Sync>(&self, key: &str) -> Option<Arc<O>> {
        self.objects
            .get(key)
            .and_then(|o| Arc::clone(o).downcast::<O>().ok())
    }

    pub fn remove_object(&mut self, key: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.objects.remove(key)
    }

    /// Serialisable values as one JSON object
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.values.len() + self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.objects.is_empty()
    }
}

impl fmt::Debug for AttributeBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeBag")
            .field("values", &self.values)
            .field("objects", &self.objects.keys().collect::<Vec<_>>())
            .finish()
    }
}
