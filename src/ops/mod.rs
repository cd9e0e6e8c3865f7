//! The built-in operator family.
//!
//! Sources construct sequences with no upstream dependency; pipes wrap
//! exactly one upstream sequence and transform its samples or indices.
//! All operators are plain value structs implementing
//! [`SequenceOp`](crate::node::SequenceOp); the fluent methods on
//! [`SamplesSequence`](crate::sequence::SamplesSequence) and the
//! [`Registry`](crate::registry::Registry) builder are the two ways to
//! construct them.

pub mod cache;
pub mod mapping;
pub mod operations;
pub mod sources;

pub use cache::CachedSequence;
pub use mapping::{ConditionallyMappedSequence, MapCondition, MappedSequence};
pub use operations::{
    ConcatSequences, EnumeratedSequence, FilteredSequence, RepeatedSequence, SelectedSequence,
    ShuffledSequence, SlicedSequence, SortedSequence, ZippedSequence,
};
pub use sources::{SamplesList, SequenceFromCallable, ToyDataset};

use serde_json::{Value, json};

/// Emit a float argument, collapsing whole numbers to integers so a value
/// read from a spec round-trips to the exact same JSON number.
pub(crate) fn num_value(v: f64) -> Value {
    if v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
        json!(v as i64)
    } else {
        json!(v)
    }
}
