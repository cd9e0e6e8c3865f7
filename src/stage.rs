//! Sample stages: the transform interface consumed by `map` and `map_if`.
//!
//! Value-level transforms (augmentation, format conversion, ...) live
//! outside the core; the pipeline only requires a stage to be a
//! `Sample -> Sample` function. A few structural stages that operate on
//! keys alone ship with the crate so that `map` pipelines remain fully
//! expressible as declarative specs.

use crate::sample::Sample;
use serde_json::{Map, Value, json};
use std::sync::Arc;

/// The name and arguments a stage serializes to inside a `map` entry.
#[derive(Clone, Debug)]
pub struct StageCall {
    pub name: String,
    pub args: Value,
}

impl StageCall {
    pub fn new(name: &str, args: Value) -> Self {
        Self { name: name.to_string(), args }
    }

    /// The single-entry-map form used in pipe specs.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert(self.name.clone(), self.args.clone());
        Value::Object(map)
    }
}

/// A transform applied to every sample flowing through a `map` pipe.
///
/// Errors propagate verbatim to the caller of `get_sample`; the core never
/// retries or masks a failing stage.
pub trait SampleStage: Send + Sync {
    fn apply(&self, sample: Sample) -> anyhow::Result<Sample>;

    /// Serialized form for pipe specs. Stages wrapping opaque closures
    /// collapse to a placeholder string.
    fn call(&self) -> StageCall;
}

/// A stage wrapping a plain closure. Fluent-only: its spec form is a
/// placeholder string that cannot be built back.
pub struct StageFn {
    f: Arc<dyn Fn(Sample) -> anyhow::Result<Sample> + Send + Sync>,
}

impl StageFn {
    pub fn new(f: impl Fn(Sample) -> anyhow::Result<Sample> + Send + Sync + 'static) -> Self {
        Self { f: Arc::new(f) }
    }
}

impl SampleStage for StageFn {
    fn apply(&self, sample: Sample) -> anyhow::Result<Sample> {
        (self.f)(sample)
    }

    fn call(&self) -> StageCall {
        StageCall::new("<stage-fn>", Value::Null)
    }
}

/// The do-nothing stage.
#[derive(Default, Clone, Copy)]
pub struct StageIdentity;

impl SampleStage for StageIdentity {
    fn apply(&self, sample: Sample) -> anyhow::Result<Sample> {
        Ok(sample)
    }

    fn call(&self) -> StageCall {
        StageCall::new("identity", json!({}))
    }
}

/// Keep (or drop, when negated) the listed keys of every sample.
#[derive(Clone)]
pub struct StageKeysFilter {
    pub key_list: Vec<String>,
    pub negate: bool,
}

impl StageKeysFilter {
    pub fn new(key_list: Vec<String>, negate: bool) -> Self {
        Self { key_list, negate }
    }
}

impl SampleStage for StageKeysFilter {
    fn apply(&self, sample: Sample) -> anyhow::Result<Sample> {
        let keys: Vec<&str> = self.key_list.iter().map(String::as_str).collect();
        Ok(if self.negate {
            sample.remove_keys(&keys)
        } else {
            sample.extract_keys(&keys)
        })
    }

    fn call(&self) -> StageCall {
        StageCall::new(
            "filter_keys",
            json!({ "key_list": self.key_list, "negate": self.negate }),
        )
    }
}

/// Rename every key through a format string, where `*` stands for the
/// original key; a format without `*` is used as a prefix.
#[derive(Clone)]
pub struct StageKeyFormat {
    pub key_format: String,
}

impl StageKeyFormat {
    pub fn new(key_format: &str) -> Self {
        Self { key_format: key_format.to_string() }
    }

    pub(crate) fn format_key(key_format: &str, key: &str) -> String {
        if key_format.contains('*') {
            key_format.replace('*', key)
        } else {
            format!("{key_format}{key}")
        }
    }
}

impl SampleStage for StageKeyFormat {
    fn apply(&self, sample: Sample) -> anyhow::Result<Sample> {
        let mut out = sample.clone();
        for key in sample.keys() {
            out = out.rename_key(key, &Self::format_key(&self.key_format, key));
        }
        Ok(out)
    }

    fn call(&self) -> StageCall {
        StageCall::new("format_key", json!({ "key_format": self.key_format }))
    }
}
