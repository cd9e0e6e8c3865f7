//! Index-level pipe operators: filter, sort, slice, shuffle, select,
//! repeat, enumerate, cat and zip.
//!
//! These never touch item payloads; they remap indices or recombine
//! samples from their upstream sequences. Operators that need an index
//! table (filter, sort, shuffle) build it lazily on first access and
//! memoize it, so constructing a node stays computation-free.

use crate::error::{Error, Result};
use crate::item::ItemCtor;
use crate::node::{OperatorCall, SequenceOp};
use crate::node_id::NodeId;
use crate::pipeline::Pipeline;
use crate::sample::Sample;
use crate::sequence::SamplesSequence;
use crate::stage::StageKeyFormat;
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

use super::num_value;

/// Compute the effective `(start, step, count)` triple of a slice over a
/// sequence of `len` samples, with Python `slice.indices` semantics:
/// negative bounds count from the end, out-of-range bounds clamp, and a
/// negative step walks backwards.
pub(crate) fn slice_indices(
    start: Option<i64>,
    stop: Option<i64>,
    step: i64,
    len: usize,
) -> (i64, i64, usize) {
    let len = len as i64;
    let norm = |v: i64, lo: i64, hi: i64| {
        let v = if v < 0 { v + len } else { v };
        v.clamp(lo, hi)
    };
    if step > 0 {
        let start = start.map(|v| norm(v, 0, len)).unwrap_or(0);
        let stop = stop.map(|v| norm(v, 0, len)).unwrap_or(len);
        let count = if start < stop { ((stop - start - 1) / step + 1) as usize } else { 0 };
        (start, step, count)
    } else {
        let start = start.map(|v| norm(v, -1, len - 1)).unwrap_or(len - 1);
        let stop = stop.map(|v| norm(v, -1, len - 1)).unwrap_or(-1);
        let count = if start > stop { ((start - stop - 1) / (-step) + 1) as usize } else { 0 };
        (start, step, count)
    }
}

/// Shared shape of the lazily computed index tables.
type IndexTable = Mutex<Option<Arc<Vec<usize>>>>;

fn memoized<F>(table: &IndexTable, compute: F) -> Result<Arc<Vec<usize>>>
where
    F: FnOnce() -> Result<Vec<usize>>,
{
    let mut guard = table.lock().unwrap();
    if let Some(idxs) = guard.as_ref() {
        return Ok(Arc::clone(idxs));
    }
    let idxs = Arc::new(compute()?);
    *guard = Some(Arc::clone(&idxs));
    Ok(idxs)
}

/// A filtered view of the upstream sequence.
pub struct FilteredSequence {
    source: NodeId,
    predicate: Arc<dyn Fn(&Sample) -> bool + Send + Sync>,
    insert_empty_samples: bool,
    valid: IndexTable,
}

impl FilteredSequence {
    pub fn new(
        source: NodeId,
        predicate: Arc<dyn Fn(&Sample) -> bool + Send + Sync>,
        insert_empty_samples: bool,
    ) -> Self {
        Self { source, predicate, insert_empty_samples, valid: Mutex::new(None) }
    }

    fn valid_idxs(&self, p: &Pipeline) -> Result<Arc<Vec<usize>>> {
        memoized(&self.valid, || {
            let src = SamplesSequence::attach(p.clone(), self.source);
            let mut idxs = Vec::new();
            for (i, sample) in src.iter().enumerate() {
                if (self.predicate)(&sample?) {
                    idxs.push(i);
                }
            }
            Ok(idxs)
        })
    }
}

impl SequenceOp for FilteredSequence {
    fn size(&self, p: &Pipeline) -> Result<usize> {
        if self.insert_empty_samples {
            SamplesSequence::attach(p.clone(), self.source).size()
        } else {
            Ok(self.valid_idxs(p)?.len())
        }
    }

    fn get_sample(&self, p: &Pipeline, idx: usize) -> Result<Sample> {
        let src = SamplesSequence::attach(p.clone(), self.source);
        let valid = self.valid_idxs(p)?;
        if self.insert_empty_samples {
            if valid.binary_search(&idx).is_ok() {
                src.get_sample(idx as isize)
            } else {
                Ok(Sample::default())
            }
        } else {
            src.get_sample(valid[idx] as isize)
        }
    }

    fn source(&self) -> Option<NodeId> {
        Some(self.source)
    }

    fn call(&self, _p: &Pipeline, _recursive: bool) -> OperatorCall {
        OperatorCall::new("filter")
            .arg("filter_fn", json!("<callable>"))
            .arg("insert_empty_samples", json!(self.insert_empty_samples))
    }
}

/// A sorted view of the upstream sequence. The sort is stable: ties keep
/// their source order.
pub struct SortedSequence<K> {
    source: NodeId,
    key_fn: Arc<dyn Fn(&Sample) -> K + Send + Sync>,
    order: IndexTable,
}

impl<K: Ord> SortedSequence<K> {
    pub fn new(source: NodeId, key_fn: Arc<dyn Fn(&Sample) -> K + Send + Sync>) -> Self {
        Self { source, key_fn, order: Mutex::new(None) }
    }

    fn sorted_idxs(&self, p: &Pipeline) -> Result<Arc<Vec<usize>>> {
        memoized(&self.order, || {
            let src = SamplesSequence::attach(p.clone(), self.source);
            let mut keys = Vec::with_capacity(src.size()?);
            for sample in src.iter() {
                keys.push((self.key_fn)(&sample?));
            }
            let mut idxs: Vec<usize> = (0..keys.len()).collect();
            idxs.sort_by(|a, b| keys[*a].cmp(&keys[*b]));
            Ok(idxs)
        })
    }
}

impl<K: Ord + 'static> SequenceOp for SortedSequence<K>
where
    K: Send + Sync,
{
    fn size(&self, p: &Pipeline) -> Result<usize> {
        SamplesSequence::attach(p.clone(), self.source).size()
    }

    fn get_sample(&self, p: &Pipeline, idx: usize) -> Result<Sample> {
        let order = self.sorted_idxs(p)?;
        SamplesSequence::attach(p.clone(), self.source).get_sample(order[idx] as isize)
    }

    fn source(&self) -> Option<NodeId> {
        Some(self.source)
    }

    fn call(&self, _p: &Pipeline, _recursive: bool) -> OperatorCall {
        OperatorCall::new("sort").arg("key_fn", json!("<callable>"))
    }
}

/// A `[start:stop:step]` view of the upstream sequence.
pub struct SlicedSequence {
    source: NodeId,
    start: Option<i64>,
    stop: Option<i64>,
    step: Option<i64>,
}

impl SlicedSequence {
    /// Fails on a zero step, before any sample is touched.
    pub fn new(
        source: NodeId,
        start: Option<i64>,
        stop: Option<i64>,
        step: Option<i64>,
    ) -> Result<Self> {
        if step == Some(0) {
            return Err(Error::MalformedSpec("slice step cannot be zero".into()));
        }
        Ok(Self { source, start, stop, step })
    }

    fn indices(&self, p: &Pipeline) -> Result<(i64, i64, usize)> {
        let len = SamplesSequence::attach(p.clone(), self.source).size()?;
        Ok(slice_indices(self.start, self.stop, self.step.unwrap_or(1), len))
    }
}

impl SequenceOp for SlicedSequence {
    fn size(&self, p: &Pipeline) -> Result<usize> {
        Ok(self.indices(p)?.2)
    }

    fn get_sample(&self, p: &Pipeline, idx: usize) -> Result<Sample> {
        let (start, step, _) = self.indices(p)?;
        let src_idx = start + idx as i64 * step;
        SamplesSequence::attach(p.clone(), self.source).get_sample(src_idx as isize)
    }

    fn source(&self) -> Option<NodeId> {
        Some(self.source)
    }

    fn call(&self, _p: &Pipeline, _recursive: bool) -> OperatorCall {
        OperatorCall::new("slice")
            .arg("start", json!(self.start))
            .arg("stop", json!(self.stop))
            .arg("step", json!(self.step))
    }
}

/// A shuffled view of the upstream sequence.
///
/// A fixed seed yields the same permutation on every independent instance
/// and in every process; with no seed the permutation is process-local and
/// non-reproducible.
pub struct ShuffledSequence {
    source: NodeId,
    seed: Option<u64>,
    perm: IndexTable,
}

impl ShuffledSequence {
    pub fn new(source: NodeId, seed: Option<u64>) -> Self {
        Self { source, seed, perm: Mutex::new(None) }
    }

    fn shuffled_idxs(&self, p: &Pipeline) -> Result<Arc<Vec<usize>>> {
        memoized(&self.perm, || {
            let len = SamplesSequence::attach(p.clone(), self.source).size()?;
            let mut rng = ChaCha8Rng::seed_from_u64(self.seed.unwrap_or_else(rand::random));
            let mut idxs: Vec<usize> = (0..len).collect();
            idxs.shuffle(&mut rng);
            Ok(idxs)
        })
    }
}

impl SequenceOp for ShuffledSequence {
    fn size(&self, p: &Pipeline) -> Result<usize> {
        SamplesSequence::attach(p.clone(), self.source).size()
    }

    fn get_sample(&self, p: &Pipeline, idx: usize) -> Result<Sample> {
        let perm = self.shuffled_idxs(p)?;
        SamplesSequence::attach(p.clone(), self.source).get_sample(perm[idx] as isize)
    }

    fn source(&self) -> Option<NodeId> {
        Some(self.source)
    }

    fn call(&self, _p: &Pipeline, _recursive: bool) -> OperatorCall {
        OperatorCall::new("shuffle").arg("seed", json!(self.seed))
    }
}

/// Extracts the given indexes from the upstream sequence, in the given
/// order; repeats are allowed. With `negate` the ascending complement of
/// the index set is taken instead.
pub struct SelectedSequence {
    source: NodeId,
    indexes: Vec<i64>,
    negate: bool,
    effective: Vec<usize>,
}

impl SelectedSequence {
    /// Fails eagerly on any out-of-range index.
    pub fn new(source: &SamplesSequence, indexes: Vec<i64>, negate: bool) -> Result<Self> {
        let len = source.size()?;
        for &idx in &indexes {
            if idx < 0 || idx as usize >= len {
                return Err(Error::InvalidIndexes { idx, len });
            }
        }
        let effective = if negate {
            let picked: std::collections::HashSet<usize> =
                indexes.iter().map(|&i| i as usize).collect();
            (0..len).filter(|i| !picked.contains(i)).collect()
        } else {
            indexes.iter().map(|&i| i as usize).collect()
        };
        Ok(Self { source: source.node_id(), indexes, negate, effective })
    }
}

impl SequenceOp for SelectedSequence {
    fn size(&self, _p: &Pipeline) -> Result<usize> {
        Ok(self.effective.len())
    }

    fn get_sample(&self, p: &Pipeline, idx: usize) -> Result<Sample> {
        SamplesSequence::attach(p.clone(), self.source).get_sample(self.effective[idx] as isize)
    }

    fn source(&self) -> Option<NodeId> {
        Some(self.source)
    }

    fn call(&self, _p: &Pipeline, _recursive: bool) -> OperatorCall {
        OperatorCall::new("select")
            .arg("indexes", json!(self.indexes))
            .arg("negate", json!(self.negate))
    }
}

/// Repeats the upstream sequence so each sample is seen multiple times.
///
/// The count may be fractional: the total size is `round(count * len)`.
/// Interleaved, the fractional remainder goes to the front elements, each
/// emitted one extra consecutive time; otherwise full passes are emitted
/// contiguously, followed by a partial pass over the leading elements.
pub struct RepeatedSequence {
    source: NodeId,
    count: f64,
    interleave: bool,
}

impl RepeatedSequence {
    pub fn new(source: NodeId, count: f64, interleave: bool) -> Result<Self> {
        if !count.is_finite() || count < 0.0 {
            return Err(Error::MalformedSpec(format!(
                "repeat count must be a non-negative number, got {count}"
            )));
        }
        Ok(Self { source, count, interleave })
    }

    fn src_len(&self, p: &Pipeline) -> Result<usize> {
        SamplesSequence::attach(p.clone(), self.source).size()
    }
}

impl SequenceOp for RepeatedSequence {
    fn size(&self, p: &Pipeline) -> Result<usize> {
        Ok((self.count * self.src_len(p)? as f64).round() as usize)
    }

    fn get_sample(&self, p: &Pipeline, idx: usize) -> Result<Sample> {
        let len = self.src_len(p)?;
        let total = (self.count * len as f64).round() as usize;
        let full = total / len;
        let extra = total % len;
        let src_idx = if self.interleave {
            let boundary = extra * (full + 1);
            if idx < boundary { idx / (full + 1) } else { extra + (idx - boundary) / full }
        } else if idx < full * len {
            idx % len
        } else {
            idx - full * len
        };
        SamplesSequence::attach(p.clone(), self.source).get_sample(src_idx as isize)
    }

    fn source(&self) -> Option<NodeId> {
        Some(self.source)
    }

    fn call(&self, _p: &Pipeline, _recursive: bool) -> OperatorCall {
        OperatorCall::new("repeat")
            .arg("count", num_value(self.count))
            .arg("interleave", json!(self.interleave))
    }
}

/// Adds the positional index to each sample, through an item codec
/// resolved by name.
pub struct EnumeratedSequence {
    source: NodeId,
    idx_key: String,
    item_type: String,
    ctor: ItemCtor,
}

impl EnumeratedSequence {
    pub fn new(source: NodeId, idx_key: &str, item_type: &str, ctor: ItemCtor) -> Self {
        Self {
            source,
            idx_key: idx_key.to_string(),
            item_type: item_type.to_string(),
            ctor,
        }
    }
}

impl SequenceOp for EnumeratedSequence {
    fn size(&self, p: &Pipeline) -> Result<usize> {
        SamplesSequence::attach(p.clone(), self.source).size()
    }

    fn get_sample(&self, p: &Pipeline, idx: usize) -> Result<Sample> {
        let sample = SamplesSequence::attach(p.clone(), self.source).get_sample(idx as isize)?;
        Ok(sample.set_item(&self.idx_key, (self.ctor)(json!(idx), false)))
    }

    fn source(&self) -> Option<NodeId> {
        Some(self.source)
    }

    fn call(&self, _p: &Pipeline, _recursive: bool) -> OperatorCall {
        OperatorCall::new("enumerate")
            .arg("idx_key", json!(self.idx_key))
            .arg("item_type", json!(self.item_type))
    }
}

/// Concatenates the upstream sequence with one or more others.
pub struct ConcatSequences {
    source: NodeId,
    others: Vec<NodeId>,
}

impl ConcatSequences {
    pub fn new(source: NodeId, others: Vec<NodeId>) -> Self {
        Self { source, others }
    }
}

impl SequenceOp for ConcatSequences {
    fn size(&self, p: &Pipeline) -> Result<usize> {
        let mut total = SamplesSequence::attach(p.clone(), self.source).size()?;
        for &other in &self.others {
            total += SamplesSequence::attach(p.clone(), other).size()?;
        }
        Ok(total)
    }

    fn get_sample(&self, p: &Pipeline, idx: usize) -> Result<Sample> {
        let mut idx = idx;
        let mut operands = vec![self.source];
        operands.extend(&self.others);
        for id in operands {
            let seq = SamplesSequence::attach(p.clone(), id);
            let len = seq.size()?;
            if idx < len {
                return seq.get_sample(idx as isize);
            }
            idx -= len;
        }
        // unreachable through a bounds-checked handle
        Err(Error::IndexOutOfRange { idx: idx as i64, len: 0 })
    }

    fn source(&self) -> Option<NodeId> {
        Some(self.source)
    }

    fn call(&self, p: &Pipeline, recursive: bool) -> OperatorCall {
        let to_cat: Vec<Value> = self
            .others
            .iter()
            .map(|&id| {
                if recursive {
                    serde_json::to_value(SamplesSequence::attach(p.clone(), id).to_pipe(true))
                        .unwrap_or(Value::Null)
                } else {
                    json!("<sequence>")
                }
            })
            .collect();
        OperatorCall::new("cat").arg("to_cat", Value::Array(to_cat))
    }
}

/// Zips two sequences by merging each pair of samples.
///
/// The other operand's keys are renamed through `key_format` (`*` stands
/// for the original key, a format without `*` is a prefix). On a key
/// collision the later operand silently wins. The zipped size is the
/// smaller of the two operands.
pub struct ZippedSequence {
    source: NodeId,
    to_zip: NodeId,
    key_format: String,
}

impl ZippedSequence {
    pub fn new(source: NodeId, to_zip: NodeId, key_format: &str) -> Self {
        Self { source, to_zip, key_format: key_format.to_string() }
    }
}

impl SequenceOp for ZippedSequence {
    fn size(&self, p: &Pipeline) -> Result<usize> {
        let a = SamplesSequence::attach(p.clone(), self.source).size()?;
        let b = SamplesSequence::attach(p.clone(), self.to_zip).size()?;
        Ok(a.min(b))
    }

    fn get_sample(&self, p: &Pipeline, idx: usize) -> Result<Sample> {
        let sample = SamplesSequence::attach(p.clone(), self.source).get_sample(idx as isize)?;
        let other = SamplesSequence::attach(p.clone(), self.to_zip).get_sample(idx as isize)?;
        let mut renamed = other.clone();
        for key in other.keys() {
            renamed = renamed.rename_key(key, &StageKeyFormat::format_key(&self.key_format, key));
        }
        Ok(sample.merge(&renamed))
    }

    fn source(&self) -> Option<NodeId> {
        Some(self.source)
    }

    fn call(&self, p: &Pipeline, recursive: bool) -> OperatorCall {
        let to_zip = if recursive {
            serde_json::to_value(SamplesSequence::attach(p.clone(), self.to_zip).to_pipe(true))
                .unwrap_or(Value::Null)
        } else {
            json!("<sequence>")
        };
        OperatorCall::new("zip")
            .arg("to_zip", to_zip)
            .arg("key_format", json!(self.key_format))
    }
}
