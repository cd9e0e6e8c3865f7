//! The item capability consumed by the record model.
//!
//! An [`Item`] is an opaque value holder: the core never inspects or
//! mutates its internal representation, it only reads the held value,
//! checks the sharing flag and asks an existing item to mint a same-typed
//! sibling via [`Item::make_new`]. Serialization of payloads is owned by
//! the item implementation, not by the pipeline core.
//!
//! The [`ItemRegistry`] maps codec names to item constructors so that
//! operators taking an item type by name (`enumerate`, the cache pipe,
//! `from_list` specs) can resolve it without hard-coding a concrete type.

use crate::error::{Error, Result};
use crate::sample::Sample;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;

/// Opaque value holder stored under each key of a
/// [`Sample`](crate::sample::Sample).
pub trait Item: Send + Sync {
    /// The held value. May be arbitrarily expensive to produce.
    fn value(&self) -> Value;

    /// Whether this item is shared across the samples of a sequence.
    fn is_shared(&self) -> bool;

    /// Create a same-typed sibling holding `value`.
    fn make_new(&self, value: Value, shared: bool) -> Arc<dyn Item>;

    /// Registered codec name, used when an item must be named in a spec or
    /// a cache entry.
    fn type_name(&self) -> &'static str;
}

/// A generic item holding any JSON-like value.
pub struct JsonItem {
    value: Value,
    shared: bool,
}

impl JsonItem {
    pub fn new(value: Value, shared: bool) -> Arc<dyn Item> {
        Arc::new(Self { value, shared })
    }
}

impl Item for JsonItem {
    fn value(&self) -> Value {
        self.value.clone()
    }

    fn is_shared(&self) -> bool {
        self.shared
    }

    fn make_new(&self, value: Value, shared: bool) -> Arc<dyn Item> {
        JsonItem::new(value, shared)
    }

    fn type_name(&self) -> &'static str {
        "json"
    }
}

/// An item holding plain text. Non-string values are stored as their JSON
/// rendering.
pub struct TxtItem {
    text: String,
    shared: bool,
}

impl TxtItem {
    pub fn new(value: Value, shared: bool) -> Arc<dyn Item> {
        let text = match value {
            Value::String(s) => s,
            other => other.to_string(),
        };
        Arc::new(Self { text, shared })
    }
}

impl Item for TxtItem {
    fn value(&self) -> Value {
        Value::String(self.text.clone())
    }

    fn is_shared(&self) -> bool {
        self.shared
    }

    fn make_new(&self, value: Value, shared: bool) -> Arc<dyn Item> {
        TxtItem::new(value, shared)
    }

    fn type_name(&self) -> &'static str {
        "txt"
    }
}

/// Constructor for a named item codec.
pub type ItemCtor = Arc<dyn Fn(Value, bool) -> Arc<dyn Item> + Send + Sync>;

/// Name-to-constructor registry for item codecs.
///
/// Built once and injected wherever a codec has to be resolved by name;
/// there is no process-wide registry.
#[derive(Clone)]
pub struct ItemRegistry {
    ctors: HashMap<String, ItemCtor>,
}

impl ItemRegistry {
    /// An empty registry with no codecs.
    pub fn new() -> Self {
        Self { ctors: HashMap::new() }
    }

    /// A registry holding the built-in `json` and `txt` codecs.
    pub fn with_defaults() -> Self {
        let mut reg = Self::new();
        reg.register("json", Arc::new(JsonItem::new));
        reg.register("txt", Arc::new(TxtItem::new));
        reg
    }

    /// Register a codec under `name`. Re-registering replaces the previous
    /// constructor.
    pub fn register(&mut self, name: &str, ctor: ItemCtor) {
        if self.ctors.insert(name.to_string(), ctor).is_some() {
            tracing::warn!(name, "item codec has been already registered");
        }
    }

    /// Resolve a codec by name.
    pub fn get(&self, name: &str) -> Result<ItemCtor> {
        self.ctors
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownItemType(name.to_string()))
    }

    /// Rebuild a sample from its [`encode_sample`] form.
    pub fn decode_sample(&self, value: &Value) -> Result<Sample> {
        let map = value.as_object().ok_or_else(|| {
            Error::MalformedSpec("a serialized sample must be a mapping".into())
        })?;
        let mut sample = Sample::default();
        for (key, entry) in map {
            let entry = entry.as_object().ok_or_else(|| {
                Error::MalformedSpec(format!("serialized item `{key}` must be a mapping"))
            })?;
            let type_name = entry
                .get("item")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    Error::MalformedSpec(format!("serialized item `{key}` has no `item` type"))
                })?;
            let shared = entry.get("shared").and_then(Value::as_bool).unwrap_or(false);
            let value = entry.get("value").cloned().unwrap_or(Value::Null);
            let ctor = self.get(type_name)?;
            sample = sample.set_item(key, ctor(value, shared));
        }
        Ok(sample)
    }
}

impl Default for ItemRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Serialize a sample to a plain JSON mapping of
/// `{key: {item, shared, value}}` records. Forces every item's value.
pub fn encode_sample(sample: &Sample) -> Value {
    let mut map = Map::new();
    for (key, item) in sample.iter() {
        map.insert(
            key.to_string(),
            json!({
                "item": item.type_name(),
                "shared": item.is_shared(),
                "value": item.value(),
            }),
        );
    }
    Value::Object(map)
}
