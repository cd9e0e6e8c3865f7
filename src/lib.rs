//! # Samplepipe
//!
//! A **dataset-processing pipeline engine** for Rust: describe, compose
//! and execute transformations over large collections of structured
//! records ("samples"), with parallel execution and a first-access
//! caching layer.
//!
//! ## Key Features
//!
//! - **Immutable record model** - samples are copy-on-write mappings from
//!   keys to opaque item values
//! - **Lazy, randomly-indexable sequences** - pipelines are multi-pass
//!   views, never one-shot streams
//! - **Composable pipe operators** - map, filter, slice, select, shuffle,
//!   sort, cat, zip, repeat, enumerate, cache
//! - **Declarative specs** - pipelines round-trip to and from ordered
//!   `{operator: args}` lists through an injectable [`Registry`]
//! - **Parallel grabbing** - a bounded worker pool with prefetch control
//!   and ordered or completion-order delivery
//! - **First-access caching** - memoize computed samples in memory or on
//!   disk, honoring pre-populated cache folders
//!
//! ## Quick Start
//!
//! ```
//! use samplepipe::{Grabber, Pipeline, toy_dataset};
//! use serde_json::json;
//!
//! # fn main() -> samplepipe::Result<()> {
//! let p = Pipeline::default();
//!
//! // Build a pipeline: 100 generated samples, shuffled, first 10 kept.
//! let seq = toy_dataset(&p, 100, Some(42), "*")
//!     .shuffle(Some(7))
//!     .slice(None, Some(10), None)?;
//!
//! // Pull every sample through a pool of 4 workers.
//! seq.run(&Grabber { num_workers: 4, ..Grabber::default() }, Default::default())?;
//!
//! // Random access never mutates anything and can be repeated freely.
//! let first = seq.get_sample(0)?;
//! assert_eq!(first.deep_get("label", json!(-1)), first.deep_get("label", json!(-1)));
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### Sample
//!
//! A [`Sample`] is an immutable, insertion-ordered mapping from string
//! keys to [`Item`]s. Every mutating operation returns a new sample
//! sharing the unaffected items with the old one. Nested values are
//! addressed with key paths: `"meta.names[1]"` walks the value held by
//! the `meta` item.
//!
//! ### Item
//!
//! An [`Item`] is an externally defined, opaque value holder. The core
//! only reads its value, checks its sharing flag and asks it to mint
//! same-typed siblings; codecs are resolved by name through an
//! [`ItemRegistry`].
//!
//! ### SamplesSequence
//!
//! A [`SamplesSequence`] is a lazy, finite, randomly-indexable view
//! producing samples, defined solely by `size()` and `get_sample(idx)`.
//! Sequences are:
//! - **Immutable once built** - pipe methods return new sequences
//! - **Lazy** - building performs no I/O and no computation
//! - **Multi-pass** - iteration always restarts at index 0
//!
//! Sequences live as cheap handles into a [`Pipeline`] arena; operators
//! reference their upstream nodes by [`NodeId`], never by direct object
//! reference.
//!
//! ### Registry and declarative specs
//!
//! A [`Registry`] maps operator names to constructors, split into source
//! and pipe namespaces, and builds live pipelines from declarative specs
//! ([`Registry::build_pipe`]). The inverse, [`SamplesSequence::to_pipe`],
//! reduces a pipeline back to its spec; for pipelines built purely from
//! registered operators the round trip is exact.
//!
//! ### Grabber
//!
//! A [`Grabber`] pulls every sample of a sequence through zero or more
//! worker threads: `num_workers` (0 = inline, <0 = one per core),
//! `prefetch` and `keep_order` control the pool. Delivery shape is chosen
//! explicitly with [`SampleFn`]; failures propagate verbatim and abort
//! the grab, and the pool is released on every exit path.
//!
//! ### Cache pipe
//!
//! `seq.cache(folder, reuse_cache)` memoizes each sample on first access,
//! in memory or as one serialized entry per index under `folder`.
//! Constructing against a pre-populated folder without `reuse_cache`
//! fails before any sample is touched.
//!
//! ## Module Overview
//!
//! - [`sample`] - the immutable record model and key-path addressing
//! - [`item`] - the item capability and codec registry
//! - [`sequence`] - the `SamplesSequence` handle and fluent operators
//! - [`pipeline`] - the operator arena sequences live in
//! - [`ops`] - the built-in source and pipe operator family
//! - [`stage`] - the transform interface consumed by `map`
//! - [`registry`] - operator registration and the declarative builder
//! - [`grabber`] - the bounded worker-pool execution engine
//! - [`error`] - the error taxonomy

pub mod error;
pub mod grabber;
pub mod item;
pub mod node;
pub mod node_id;
pub mod ops;
pub mod pipeline;
pub mod registry;
pub mod sample;
pub mod sequence;
pub mod stage;

// General re-exports
pub use error::{Error, Result};
pub use grabber::{GrabAll, Grabber, SampleFn, WorkerInit};
pub use item::{Item, ItemRegistry, JsonItem, TxtItem, encode_sample};
pub use node::{OperatorCall, SequenceOp};
pub use node_id::NodeId;
pub use ops::MapCondition;
pub use ops::sources::{from_callable, from_list, toy_dataset};
pub use pipeline::Pipeline;
pub use registry::{OpArgs, OperatorListing, PipeEntry, Registry};
pub use sample::Sample;
pub use sequence::{Batches, Samples, SamplesSequence};
pub use stage::{SampleStage, StageCall, StageFn, StageIdentity, StageKeyFormat, StageKeysFilter};
