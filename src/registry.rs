//! Operator registry and declarative pipe builder.
//!
//! A [`Registry`] maps operator names to typed constructors, split into
//! two independent namespaces: *sources* (no upstream input) and *pipes*
//! (exactly one upstream sequence, enforced by the constructor
//! signature). It is an explicitly constructed object — build it once at
//! startup and pass it where pipelines are built; there is no process-wide
//! mutable state.
//!
//! [`Registry::build_pipe`] turns a declarative spec — a single operator
//! name, a `{name: args}` mapping, or an ordered list of either — into a
//! live pipeline, and
//! [`SamplesSequence::to_pipe`](crate::sequence::SamplesSequence::to_pipe)
//! is its inverse. For any pipeline built purely from registered
//! operators, `build_pipe(seq.to_pipe())` reconstructs a pipeline whose
//! own `to_pipe()` output is identical to the original's.
//!
//! # Example
//!
//! ```
//! use samplepipe::{Pipeline, Registry};
//! use serde_json::json;
//!
//! # fn main() -> samplepipe::Result<()> {
//! let p = Pipeline::default();
//! let registry = Registry::with_defaults();
//! let seq = registry.build_pipe(
//!     &p,
//!     &json!([
//!         { "toy_dataset": { "length": 10, "seed": 42 } },
//!         { "shuffle": { "seed": 7 } },
//!         { "slice": { "stop": 5 } },
//!     ]),
//!     None,
//! )?;
//! assert_eq!(seq.size()?, 5);
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use crate::item::ItemRegistry;
use crate::ops::mapping::MapCondition;
use crate::ops::sources::{from_list, toy_dataset};
use crate::pipeline::Pipeline;
use crate::sequence::SamplesSequence;
use crate::stage::{SampleStage, StageIdentity, StageKeyFormat, StageKeysFilter};
use serde::de::{self, Deserialize, Deserializer, MapAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// One record of a declarative pipe spec: `{operator_name: args}`.
///
/// Serializes to (and deserializes from) a single-entry JSON mapping.
#[derive(Clone, Debug, PartialEq)]
pub struct PipeEntry {
    pub name: String,
    pub args: Value,
}

impl PipeEntry {
    pub fn new(name: &str, args: Value) -> Self {
        Self { name: name.to_string(), args }
    }
}

impl Serialize for PipeEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.name, &self.args)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for PipeEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct EntryVisitor;

        impl<'de> Visitor<'de> for EntryVisitor {
            type Value = PipeEntry;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a single-entry map of operator name to args")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<PipeEntry, A::Error> {
                let Some((name, args)) = access.next_entry::<String, Value>()? else {
                    return Err(de::Error::invalid_length(0, &self));
                };
                if access.next_entry::<String, Value>()?.is_some() {
                    return Err(de::Error::invalid_length(2, &self));
                }
                Ok(PipeEntry { name, args })
            }
        }

        deserializer.deserialize_map(EntryVisitor)
    }
}

/// Operator arguments normalized from their declarative form: a keyword
/// mapping, a positional list, or a bare scalar wrapped as a single
/// positional argument.
#[derive(Clone, Debug, Default)]
pub struct OpArgs {
    pos: Vec<Value>,
    kw: Map<String, Value>,
}

impl OpArgs {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_value(v: &Value) -> Self {
        match v {
            Value::Null => Self::default(),
            Value::Object(m) => Self { pos: Vec::new(), kw: m.clone() },
            Value::Array(a) => Self { pos: a.clone(), kw: Map::new() },
            scalar => Self { pos: vec![scalar.clone()], kw: Map::new() },
        }
    }

    /// Look up an argument by keyword name, falling back to its positional
    /// slot. An explicit `null` counts as absent.
    pub fn get(&self, name: &str, pos_idx: usize) -> Option<&Value> {
        self.kw
            .get(name)
            .or_else(|| self.pos.get(pos_idx))
            .filter(|v| !v.is_null())
    }

    pub fn required(&self, name: &str, pos_idx: usize) -> Result<&Value> {
        self.get(name, pos_idx)
            .ok_or_else(|| Error::MalformedSpec(format!("missing argument `{name}`")))
    }

    pub fn opt_str(&self, name: &str, pos_idx: usize) -> Result<Option<String>> {
        self.get(name, pos_idx)
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| Error::MalformedSpec(format!("argument `{name}` must be a string")))
            })
            .transpose()
    }

    pub fn opt_bool(&self, name: &str, pos_idx: usize) -> Result<Option<bool>> {
        self.get(name, pos_idx)
            .map(|v| {
                v.as_bool()
                    .ok_or_else(|| Error::MalformedSpec(format!("argument `{name}` must be a boolean")))
            })
            .transpose()
    }

    pub fn opt_i64(&self, name: &str, pos_idx: usize) -> Result<Option<i64>> {
        self.get(name, pos_idx)
            .map(|v| {
                v.as_i64()
                    .ok_or_else(|| Error::MalformedSpec(format!("argument `{name}` must be an integer")))
            })
            .transpose()
    }

    pub fn opt_u64(&self, name: &str, pos_idx: usize) -> Result<Option<u64>> {
        self.get(name, pos_idx)
            .map(|v| {
                v.as_u64().ok_or_else(|| {
                    Error::MalformedSpec(format!("argument `{name}` must be a non-negative integer"))
                })
            })
            .transpose()
    }

    pub fn opt_f64(&self, name: &str, pos_idx: usize) -> Result<Option<f64>> {
        self.get(name, pos_idx)
            .map(|v| {
                v.as_f64()
                    .ok_or_else(|| Error::MalformedSpec(format!("argument `{name}` must be a number")))
            })
            .transpose()
    }

    pub fn opt_str_list(&self, name: &str, pos_idx: usize) -> Result<Option<Vec<String>>> {
        self.get(name, pos_idx)
            .map(|v| {
                v.as_array()
                    .and_then(|a| {
                        a.iter().map(|x| x.as_str().map(str::to_string)).collect::<Option<Vec<_>>>()
                    })
                    .ok_or_else(|| {
                        Error::MalformedSpec(format!("argument `{name}` must be a list of strings"))
                    })
            })
            .transpose()
    }

    pub fn opt_i64_list(&self, name: &str, pos_idx: usize) -> Result<Option<Vec<i64>>> {
        self.get(name, pos_idx)
            .map(|v| {
                v.as_array()
                    .and_then(|a| a.iter().map(Value::as_i64).collect::<Option<Vec<_>>>())
                    .ok_or_else(|| {
                        Error::MalformedSpec(format!("argument `{name}` must be a list of integers"))
                    })
            })
            .transpose()
    }
}

/// Constructor for a registered source operator.
pub type SourceCtor =
    Arc<dyn Fn(&Pipeline, &OpArgs, &Registry) -> Result<SamplesSequence> + Send + Sync>;

/// Constructor for a registered pipe operator: exactly one upstream
/// sequence, by signature.
pub type PipeCtor =
    Arc<dyn Fn(SamplesSequence, &OpArgs, &Registry) -> Result<SamplesSequence> + Send + Sync>;

/// Constructor for a registered stage.
pub type StageCtor = Arc<dyn Fn(&OpArgs) -> Result<Arc<dyn SampleStage>> + Send + Sync>;

/// Sorted operator names per namespace, as exposed to command layers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorListing {
    pub sources: Vec<String>,
    pub pipes: Vec<String>,
    pub stages: Vec<String>,
}

/// Name-to-constructor registry for sequence operators and stages.
pub struct Registry {
    sources: HashMap<String, SourceCtor>,
    pipes: HashMap<String, PipeCtor>,
    stages: HashMap<String, StageCtor>,
    items: Arc<ItemRegistry>,
}

impl Registry {
    /// An empty registry with the default item codecs.
    pub fn new() -> Self {
        Self::with_items(ItemRegistry::with_defaults())
    }

    /// An empty registry resolving item codecs in `items`.
    pub fn with_items(items: ItemRegistry) -> Self {
        Self {
            sources: HashMap::new(),
            pipes: HashMap::new(),
            stages: HashMap::new(),
            items: Arc::new(items),
        }
    }

    /// The item codec registry used by `enumerate`, `cache` and
    /// `from_list` specs.
    pub fn items(&self) -> &Arc<ItemRegistry> {
        &self.items
    }

    /// Register a source operator. Re-registering a name known to either
    /// namespace is non-fatal; the new registration wins.
    pub fn register_source(&mut self, name: &str, ctor: SourceCtor) {
        if self.sources.contains_key(name) || self.pipes.contains_key(name) {
            tracing::warn!(name, "operator has been already registered");
        }
        self.sources.insert(name.to_string(), ctor);
    }

    /// Register a pipe operator. Re-registering a name known to either
    /// namespace is non-fatal; the new registration wins.
    pub fn register_pipe(&mut self, name: &str, ctor: PipeCtor) {
        if self.sources.contains_key(name) || self.pipes.contains_key(name) {
            tracing::warn!(name, "operator has been already registered");
        }
        self.pipes.insert(name.to_string(), ctor);
    }

    /// Register a stage usable inside `map`/`map_if` specs.
    pub fn register_stage(&mut self, name: &str, ctor: StageCtor) {
        if self.stages.contains_key(name) {
            tracing::warn!(name, "stage has been already registered");
        }
        self.stages.insert(name.to_string(), ctor);
    }

    /// All registered operator names, sorted per namespace.
    pub fn list_operators(&self) -> OperatorListing {
        let mut sources: Vec<String> = self.sources.keys().cloned().collect();
        let mut pipes: Vec<String> = self.pipes.keys().cloned().collect();
        let mut stages: Vec<String> = self.stages.keys().cloned().collect();
        sources.sort();
        pipes.sort();
        stages.sort();
        OperatorListing { sources, pipes, stages }
    }

    /// Build a pipeline from a declarative spec: a bare operator name, a
    /// `{name: args}` mapping, or an ordered list of either.
    ///
    /// Each entry is resolved against the accumulated node, starting from
    /// `start`. A source operator starts a new chain, discarding anything
    /// accumulated so far; a pipe with no accumulated node fails. If no
    /// entry produces a concrete sequence, the builder falls back to an
    /// empty sequence (see DESIGN notes).
    pub fn build_pipe(
        &self,
        pipeline: &Pipeline,
        spec: &Value,
        start: Option<SamplesSequence>,
    ) -> Result<SamplesSequence> {
        let entries = normalize_spec(spec)?;
        self.build_pipe_entries(pipeline, &entries, start)
    }

    /// Build a pipeline from already-parsed spec entries, e.g. the output
    /// of [`SamplesSequence::to_pipe`](crate::sequence::SamplesSequence::to_pipe).
    pub fn build_pipe_entries(
        &self,
        pipeline: &Pipeline,
        entries: &[PipeEntry],
        start: Option<SamplesSequence>,
    ) -> Result<SamplesSequence> {
        let mut current = start;
        for entry in entries {
            let args = OpArgs::from_value(&entry.args);
            if let Some(ctor) = self.sources.get(&entry.name) {
                current = Some(ctor(pipeline, &args, self)?);
            } else if let Some(ctor) = self.pipes.get(&entry.name) {
                let seq = current
                    .take()
                    .ok_or_else(|| Error::PipeWithoutSource(entry.name.clone()))?;
                current = Some(ctor(seq, &args, self)?);
            } else {
                return Err(Error::UnknownOperator(entry.name.clone()));
            }
        }
        Ok(current.unwrap_or_else(|| {
            tracing::warn!("pipe spec produced no sequence, falling back to an empty one");
            from_list(pipeline, Vec::new())
        }))
    }

    /// Resolve a stage spec: a bare stage name or a `{name: args}`
    /// mapping.
    pub fn resolve_stage(&self, spec: &Value) -> Result<Arc<dyn SampleStage>> {
        let (name, args) = match spec {
            Value::String(name) => (name.clone(), OpArgs::none()),
            Value::Object(m) => match m.iter().next() {
                Some((name, raw)) if m.len() == 1 => (name.clone(), OpArgs::from_value(raw)),
                _ => {
                    return Err(Error::MalformedSpec(
                        "a stage spec must be a single-entry mapping".into(),
                    ));
                }
            },
            _ => {
                return Err(Error::MalformedSpec(
                    "a stage spec must be a name or a single-entry mapping".into(),
                ));
            }
        };
        let ctor = self
            .stages
            .get(&name)
            .ok_or_else(|| Error::UnknownStage(name.clone()))?;
        ctor(&args)
    }

    fn resolve_condition(&self, spec: &Value) -> Result<MapCondition> {
        match spec {
            Value::String(s) if s == "always" => Ok(MapCondition::Always),
            Value::Object(m) => {
                let Some((name, raw)) = m.iter().next().filter(|_| m.len() == 1) else {
                    return Err(Error::MalformedSpec(
                        "a map condition must be a single-entry mapping".into(),
                    ));
                };
                let args = OpArgs::from_value(raw);
                match name.as_str() {
                    "index_range" => Ok(MapCondition::index_range(
                        args.opt_i64("start", 0)?.unwrap_or(0),
                        args.opt_i64("stop", 1)?,
                        args.opt_i64("step", 2)?.unwrap_or(1),
                    )),
                    "probability" => {
                        let p = args
                            .opt_f64("p", 0)?
                            .ok_or_else(|| Error::MalformedSpec("missing argument `p`".into()))?;
                        Ok(MapCondition::probability(p, args.opt_u64("seed", 1)?))
                    }
                    other => Err(Error::MalformedSpec(format!("unknown map condition `{other}`"))),
                }
            }
            _ => Err(Error::MalformedSpec(
                "a map condition must be `always` or a single-entry mapping".into(),
            )),
        }
    }

    /// Build a nested sequence argument: either one pipe spec, or a list
    /// of pipe specs when every element is itself a list.
    fn build_nested_list(&self, pipeline: &Pipeline, v: &Value) -> Result<Vec<SamplesSequence>> {
        match v {
            Value::Array(elems) if !elems.is_empty() && elems.iter().all(Value::is_array) => {
                elems.iter().map(|e| self.build_pipe(pipeline, e, None)).collect()
            }
            other => Ok(vec![self.build_pipe(pipeline, other, None)?]),
        }
    }

    /// A registry with every built-in operator and stage registered.
    pub fn with_defaults() -> Self {
        let mut reg = Self::new();

        // ---- stages ----
        reg.register_stage(
            "identity",
            Arc::new(|_| Ok(Arc::new(StageIdentity) as Arc<dyn SampleStage>)),
        );
        reg.register_stage(
            "filter_keys",
            Arc::new(|args| {
                let key_list = args.opt_str_list("key_list", 0)?.ok_or_else(|| {
                    Error::MalformedSpec("missing argument `key_list`".into())
                })?;
                let negate = args.opt_bool("negate", 1)?.unwrap_or(false);
                Ok(Arc::new(StageKeysFilter::new(key_list, negate)) as Arc<dyn SampleStage>)
            }),
        );
        reg.register_stage(
            "format_key",
            Arc::new(|args| {
                let key_format = args.opt_str("key_format", 0)?.ok_or_else(|| {
                    Error::MalformedSpec("missing argument `key_format`".into())
                })?;
                Ok(Arc::new(StageKeyFormat::new(&key_format)) as Arc<dyn SampleStage>)
            }),
        );

        // ---- sources ----
        reg.register_source(
            "from_list",
            Arc::new(|p, args, reg| {
                let raw = args.required("samples", 0)?;
                let list = raw.as_array().ok_or_else(|| {
                    Error::MalformedSpec("argument `samples` must be a list".into())
                })?;
                let samples = list
                    .iter()
                    .map(|v| reg.items.decode_sample(v))
                    .collect::<Result<Vec<_>>>()?;
                Ok(from_list(p, samples))
            }),
        );
        reg.register_source(
            "toy_dataset",
            Arc::new(|p, args, _| {
                let length = args.opt_u64("length", 0)?.ok_or_else(|| {
                    Error::MalformedSpec("missing argument `length`".into())
                })?;
                let seed = args.opt_u64("seed", 1)?;
                let key_format = args.opt_str("key_format", 2)?.unwrap_or_else(|| "*".into());
                Ok(toy_dataset(p, length as usize, seed, &key_format))
            }),
        );
        reg.register_source(
            "from_callable",
            Arc::new(|_, _, _| {
                Err(Error::MalformedSpec(
                    "from_callable takes a generator callable; build it fluently".into(),
                ))
            }),
        );

        // ---- pipes ----
        reg.register_pipe(
            "map",
            Arc::new(|seq, args, reg| {
                let stage = reg.resolve_stage(args.required("stage", 0)?)?;
                Ok(seq.map_stage(stage))
            }),
        );
        reg.register_pipe(
            "map_if",
            Arc::new(|seq, args, reg| {
                let stage = reg.resolve_stage(args.required("stage", 0)?)?;
                let condition = reg.resolve_condition(args.required("condition", 1)?)?;
                Ok(seq.map_if_stage(stage, condition))
            }),
        );
        reg.register_pipe(
            "filter",
            Arc::new(|_, _, _| {
                Err(Error::MalformedSpec(
                    "filter takes a predicate callable; build it fluently".into(),
                ))
            }),
        );
        reg.register_pipe(
            "sort",
            Arc::new(|_, _, _| {
                Err(Error::MalformedSpec(
                    "sort takes a key callable; build it fluently".into(),
                ))
            }),
        );
        reg.register_pipe(
            "slice",
            Arc::new(|seq, args, _| {
                seq.slice(
                    args.opt_i64("start", 0)?,
                    args.opt_i64("stop", 1)?,
                    args.opt_i64("step", 2)?,
                )
            }),
        );
        reg.register_pipe(
            "shuffle",
            Arc::new(|seq, args, _| Ok(seq.shuffle(args.opt_u64("seed", 0)?))),
        );
        reg.register_pipe(
            "select",
            Arc::new(|seq, args, _| {
                let indexes = args.opt_i64_list("indexes", 0)?.ok_or_else(|| {
                    Error::MalformedSpec("missing argument `indexes`".into())
                })?;
                let negate = args.opt_bool("negate", 1)?.unwrap_or(false);
                seq.select(indexes, negate)
            }),
        );
        reg.register_pipe(
            "repeat",
            Arc::new(|seq, args, _| {
                let count = args.opt_f64("count", 0)?.ok_or_else(|| {
                    Error::MalformedSpec("missing argument `count`".into())
                })?;
                let interleave = args.opt_bool("interleave", 1)?.unwrap_or(false);
                seq.repeat(count, interleave)
            }),
        );
        reg.register_pipe(
            "enumerate",
            Arc::new(|seq, args, reg| {
                let idx_key = args.opt_str("idx_key", 0)?.unwrap_or_else(|| "~idx".into());
                let item_type = args.opt_str("item_type", 1)?.unwrap_or_else(|| "json".into());
                seq.enumerate_with(&idx_key, &item_type, &reg.items)
            }),
        );
        reg.register_pipe(
            "cache",
            Arc::new(|seq, args, reg| {
                let folder = args.opt_str("cache_folder", 0)?.map(PathBuf::from);
                let reuse_cache = args.opt_bool("reuse_cache", 1)?.unwrap_or(false);
                seq.cache_with(folder, reuse_cache, reg.items.clone())
            }),
        );
        reg.register_pipe(
            "cat",
            Arc::new(|seq, args, reg| {
                let others = reg.build_nested_list(seq.pipeline(), args.required("to_cat", 0)?)?;
                seq.cat(&others.iter().collect::<Vec<_>>())
            }),
        );
        reg.register_pipe(
            "zip",
            Arc::new(|seq, args, reg| {
                let other = reg.build_pipe(seq.pipeline(), args.required("to_zip", 0)?, None)?;
                let key_format = args.opt_str("key_format", 1)?.unwrap_or_else(|| "*".into());
                seq.zip(&other, &key_format)
            }),
        );

        reg
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Flatten a declarative spec into its ordered entries.
fn normalize_spec(spec: &Value) -> Result<Vec<PipeEntry>> {
    match spec {
        Value::String(name) => Ok(vec![PipeEntry::new(name, Value::Null)]),
        Value::Object(m) => Ok(m.iter().map(|(k, v)| PipeEntry::new(k, v.clone())).collect()),
        Value::Array(items) => {
            let mut entries = Vec::new();
            for item in items {
                entries.extend(normalize_spec(item)?);
            }
            Ok(entries)
        }
        other => Err(Error::MalformedSpec(format!(
            "a pipe spec must be a name, a mapping or a list, got {other}"
        ))),
    }
}
