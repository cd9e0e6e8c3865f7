//! The immutable record model.
//!
//! A [`Sample`] is a mapping from string keys to [`Item`]s. Any
//! modification creates a new instance which is a shallow copy of the
//! original: item handles are shared between old and new samples, only the
//! key-to-item map itself is copied.
//!
//! Nested values inside an item can be addressed with a key path: `.`
//! separates nested mapping keys, `[N]` indexes sequences and `\.` escapes
//! a literal dot. The path splits into a top-level sample key and a
//! residual path applied to the *value* held by that key's item.

use crate::error::{Error, Result};
use crate::item::Item;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// One segment of a parsed key path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PathSeg {
    Key(String),
    Index(usize),
}

/// Split a key path into the top-level sample key and the residual path.
///
/// The key ends at the first unescaped `.` or `[`; escapes are resolved in
/// the returned key, while the residual is returned verbatim.
pub(crate) fn split_key_path(key_path: &str) -> (String, &str) {
    let mut key = String::new();
    let mut chars = key_path.char_indices();
    while let Some((pos, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, escaped)) => key.push(escaped),
                None => key.push('\\'),
            },
            '.' | '[' => return (key, &key_path[pos..]),
            _ => key.push(c),
        }
    }
    (key, "")
}

/// Parse a residual path into segments. Returns `None` on a malformed
/// path, e.g. a non-numeric index.
pub(crate) fn parse_path(mut path: &str) -> Option<Vec<PathSeg>> {
    let mut segs = Vec::new();
    while !path.is_empty() {
        if let Some(rest) = path.strip_prefix('[') {
            let end = rest.find(']')?;
            segs.push(PathSeg::Index(rest[..end].parse().ok()?));
            path = &rest[end + 1..];
        } else if let Some(rest) = path.strip_prefix('.') {
            let (key, tail) = split_key_path(rest);
            segs.push(PathSeg::Key(key));
            path = tail;
        } else {
            return None;
        }
    }
    Some(segs)
}

fn value_deep_get<'a>(mut value: &'a Value, segs: &[PathSeg]) -> Option<&'a Value> {
    for seg in segs {
        value = match seg {
            PathSeg::Key(k) => value.get(k.as_str())?,
            PathSeg::Index(i) => value.get(*i)?,
        };
    }
    Some(value)
}

/// Set `new` at `segs` inside `target`, creating intermediate containers
/// where the path runs through missing or mismatched values.
fn value_deep_set(target: &mut Value, segs: &[PathSeg], new: Value) {
    let Some((seg, rest)) = segs.split_first() else {
        *target = new;
        return;
    };
    match seg {
        PathSeg::Key(k) => {
            if !target.is_object() {
                *target = Value::Object(Map::new());
            }
            if let Value::Object(map) = target {
                let slot = map.entry(k.clone()).or_insert(Value::Null);
                value_deep_set(slot, rest, new);
            }
        }
        PathSeg::Index(i) => {
            if !target.is_array() {
                *target = Value::Array(Vec::new());
            }
            if let Value::Array(arr) = target {
                if arr.len() <= *i {
                    arr.resize(*i + 1, Value::Null);
                }
                value_deep_set(&mut arr[*i], rest, new);
            }
        }
    }
}

/// An immutable mapping from string keys to [`Item`]s.
///
/// Keys are unique and keep their insertion order when iterating; the
/// order carries no meaning. Every mutating operation returns a new
/// `Sample` and leaves the receiver untouched.
#[derive(Clone, Default)]
pub struct Sample {
    data: IndexMap<String, Arc<dyn Item>>,
}

impl Sample {
    pub fn new(data: IndexMap<String, Arc<dyn Item>>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn Item>)> {
        self.data.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The item stored under `key`.
    pub fn get(&self, key: &str) -> Result<&Arc<dyn Item>> {
        self.data
            .get(key)
            .ok_or_else(|| Error::MissingKey(key.to_string()))
    }

    /// The item stored under `key`, if present.
    pub fn opt_get(&self, key: &str) -> Option<&Arc<dyn Item>> {
        self.data.get(key)
    }

    /// A copy sharing every item with the receiver; only the key map is
    /// duplicated. Equivalent to `clone`.
    pub fn shallow_copy(&self) -> Sample {
        self.clone()
    }

    /// A copy where every item is rebuilt from its forced value through
    /// `make_new`. O(n) eager materialization.
    pub fn deep_copy(&self) -> Sample {
        let data = self
            .data
            .iter()
            .map(|(k, v)| (k.clone(), v.make_new(v.value(), v.is_shared())))
            .collect();
        Sample { data }
    }

    /// A new sample with `item` stored under `key`, replacing any previous
    /// binding.
    pub fn set_item(&self, key: &str, item: Arc<dyn Item>) -> Sample {
        let mut data = self.data.clone();
        data.insert(key.to_string(), item);
        Sample { data }
    }

    /// A new sample where `target_key` holds a new item built through
    /// `reference_key`'s item type. The sharing flag is inherited from the
    /// reference item unless overridden.
    pub fn set_value_as(
        &self,
        target_key: &str,
        reference_key: &str,
        value: Value,
        shared: Option<bool>,
    ) -> Result<Sample> {
        let reference = self.get(reference_key)?;
        let item = reference.make_new(value, shared.unwrap_or_else(|| reference.is_shared()));
        Ok(self.set_item(target_key, item))
    }

    /// A new sample where `key` holds `value` through its current item
    /// type.
    pub fn set_value(&self, key: &str, value: Value) -> Result<Sample> {
        self.set_value_as(key, key, value, None)
    }

    /// Set a value through a key path.
    ///
    /// With no residual path this is [`set_value`](Self::set_value);
    /// otherwise the key's current value is deep-copied, mutated at the
    /// residual path and stored back. Fails if `key` is absent.
    pub fn deep_set(&self, key_path: &str, value: Value) -> Result<Sample> {
        let (key, path) = split_key_path(key_path);
        if path.is_empty() {
            return self.set_value(&key, value);
        }
        let segs = parse_path(path)
            .ok_or_else(|| Error::MalformedSpec(format!("invalid key path `{key_path}`")))?;
        let mut current = self.get(&key)?.value();
        value_deep_set(&mut current, &segs, value);
        self.set_value(&key, current)
    }

    /// Get a value through a key path, falling back to `default` when the
    /// key or the residual path is missing.
    pub fn deep_get(&self, key_path: &str, default: Value) -> Value {
        let (key, path) = split_key_path(key_path);
        let Some(item) = self.data.get(&key) else {
            return default;
        };
        let value = item.value();
        if path.is_empty() {
            return value;
        }
        let Some(segs) = parse_path(path) else {
            return default;
        };
        value_deep_get(&value, &segs).cloned().unwrap_or(default)
    }

    /// A new sample where `old_key` is also (or instead) reachable as
    /// `new_key`. No-op if `old_key` is missing or `new_key` already
    /// exists; an existing target is never overwritten.
    pub fn change_key(&self, old_key: &str, new_key: &str, delete_old_key: bool) -> Sample {
        if !self.data.contains_key(old_key) || self.data.contains_key(new_key) {
            return self.clone();
        }
        let mut data = self.data.clone();
        if let Some(item) = data.get(old_key).cloned() {
            data.insert(new_key.to_string(), item);
            if delete_old_key {
                data.shift_remove(old_key);
            }
        }
        Sample { data }
    }

    pub fn duplicate_key(&self, reference_key: &str, new_key: &str) -> Sample {
        self.change_key(reference_key, new_key, false)
    }

    pub fn rename_key(&self, old_key: &str, new_key: &str) -> Sample {
        self.change_key(old_key, new_key, true)
    }

    /// A new sample without the given keys. Missing keys are skipped.
    pub fn remove_keys(&self, keys_to_remove: &[&str]) -> Sample {
        let data = self
            .data
            .iter()
            .filter(|(k, _)| !keys_to_remove.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Sample { data }
    }

    /// A new sample with only the given keys. Missing keys are skipped.
    pub fn extract_keys(&self, keys_to_keep: &[&str]) -> Sample {
        let data = self
            .data
            .iter()
            .filter(|(k, _)| keys_to_keep.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Sample { data }
    }

    /// Key union of the two samples; on collision `other`'s item wins.
    pub fn merge(&self, other: &Sample) -> Sample {
        let mut data = self.data.clone();
        for (k, v) in &other.data {
            data.insert(k.clone(), v.clone());
        }
        Sample { data }
    }

    pub fn update(&self, other: &Sample) -> Sample {
        self.merge(other)
    }

    /// Force every item's value. O(n) eager materialization; expensive for
    /// large payloads.
    pub fn to_dict(&self) -> IndexMap<String, Value> {
        self.data.iter().map(|(k, v)| (k.clone(), v.value())).collect()
    }

    /// Key-to-codec-name mapping of this sample.
    pub fn to_schema(&self) -> IndexMap<String, &'static str> {
        self.data.iter().map(|(k, v)| (k.clone(), v.type_name())).collect()
    }
}

impl FromIterator<(String, Arc<dyn Item>)> for Sample {
    fn from_iter<T: IntoIterator<Item = (String, Arc<dyn Item>)>>(iter: T) -> Self {
        Sample { data: iter.into_iter().collect() }
    }
}

impl fmt::Debug for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (k, v) in &self.data {
            map.entry(&k, &v.value());
        }
        map.finish()
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (k, v) in &self.data {
            writeln!(f, "[{k}] {}", v.value())?;
        }
        Ok(())
    }
}
