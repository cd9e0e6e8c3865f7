//! The sequence abstraction: a lazy, randomly-indexable, multi-pass view
//! producing [`Sample`]s.
//!
//! A [`SamplesSequence`] is a cheap handle onto an operator node inside a
//! [`Pipeline`] arena. Building a sequence (through the fluent methods
//! here, or through [`Registry::build_pipe`](crate::registry::Registry))
//! performs no I/O and no computation; `get_sample` does the actual work
//! on demand and may recompute on every call, unless a cache pipe
//! intervenes.
//!
//! Iterating a sequence always restarts at index 0 — it is not a one-shot
//! stream.

use crate::error::{Error, Result};
use crate::grabber::{GrabAll, Grabber, SampleFn};
use crate::item::ItemRegistry;
use crate::node::SequenceOp;
use crate::node_id::NodeId;
use crate::ops::cache::CachedSequence;
use crate::ops::mapping::{ConditionallyMappedSequence, MapCondition, MappedSequence};
use crate::ops::operations::{
    ConcatSequences, EnumeratedSequence, FilteredSequence, RepeatedSequence, SelectedSequence,
    ShuffledSequence, SlicedSequence, SortedSequence, ZippedSequence,
};
use crate::ops::sources::from_list;
use crate::pipeline::Pipeline;
use crate::registry::PipeEntry;
use crate::sample::Sample;
use crate::stage::{SampleStage, StageFn};
use std::collections::HashSet;
use std::ops::Add;
use std::path::PathBuf;
use std::sync::Arc;

/// A handle onto an operator node of a [`Pipeline`].
///
/// Cloning is cheap; two clones view the same node. All the fluent pipe
/// methods return a new sequence and leave the receiver untouched.
#[derive(Clone)]
pub struct SamplesSequence {
    pipeline: Pipeline,
    id: NodeId,
}

impl std::fmt::Debug for SamplesSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamplesSequence").field("id", &self.id).finish()
    }
}

impl SamplesSequence {
    pub(crate) fn attach(pipeline: Pipeline, id: NodeId) -> Self {
        Self { pipeline, id }
    }

    /// The pipeline arena this sequence lives in.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// The node this handle points at.
    pub fn node_id(&self) -> NodeId {
        self.id
    }

    fn op(&self) -> Arc<dyn SequenceOp> {
        self.pipeline.node(self.id)
    }

    fn push(&self, op: Arc<dyn SequenceOp>) -> SamplesSequence {
        let id = self.pipeline.insert_node(op);
        SamplesSequence::attach(self.pipeline.clone(), id)
    }

    fn check_same_graph(&self, other: &SamplesSequence) -> Result<()> {
        if self.pipeline.same_graph(&other.pipeline) {
            Ok(())
        } else {
            Err(Error::GraphMismatch)
        }
    }

    /// Number of samples in the sequence.
    pub fn size(&self) -> Result<usize> {
        self.op().size(&self.pipeline)
    }

    /// The sample at `idx`. A negative index counts from the end; an index
    /// outside `[-size, size)` fails with [`Error::IndexOutOfRange`].
    pub fn get_sample(&self, idx: isize) -> Result<Sample> {
        let len = self.size()? as isize;
        let norm = if idx < 0 { idx + len } else { idx };
        if norm < 0 || norm >= len {
            return Err(Error::IndexOutOfRange { idx: idx as i64, len: len as usize });
        }
        self.op().get_sample(&self.pipeline, norm as usize)
    }

    /// Iterate the samples from index 0. Each call starts a fresh pass.
    pub fn iter(&self) -> Samples {
        Samples { seq: self.clone(), idx: 0, len: None, failed: false }
    }

    /// Checks if all samples have the same keys, limited to the first
    /// `max_items` when non-negative.
    pub fn is_normalized(&self, max_items: i64) -> Result<bool> {
        let len = self.size()?;
        let limit = if max_items < 0 { len } else { len.min(max_items as usize) };
        if limit < 2 {
            return Ok(true);
        }
        let mut key_ref: Option<HashSet<String>> = None;
        for sample in self.iter().take(limit) {
            let keys: HashSet<String> = sample?.keys().map(str::to_string).collect();
            match &key_ref {
                None => key_ref = Some(keys),
                Some(reference) if *reference != keys => return Ok(false),
                Some(_) => {}
            }
        }
        Ok(true)
    }

    /// The number of digits needed to zero-pad the largest index.
    pub fn best_zfill(&self) -> Result<usize> {
        Ok(self.size()?.saturating_sub(1).to_string().len())
    }

    /// Iterate fixed-size batches of samples. An incomplete final batch is
    /// padded with `fill`, or dropped when `drop_last` is set.
    pub fn batch(&self, batch_size: usize, drop_last: bool, fill: Sample) -> Batches {
        Batches { inner: self.iter(), batch_size: batch_size.max(1), drop_last, fill, done: false }
    }

    // ---- pipe operators ----

    /// Applies a stage on all samples.
    pub fn map(&self, stage: impl SampleStage + 'static) -> SamplesSequence {
        self.map_stage(Arc::new(stage))
    }

    /// Applies an already shared stage on all samples.
    pub fn map_stage(&self, stage: Arc<dyn SampleStage>) -> SamplesSequence {
        self.push(Arc::new(MappedSequence::new(self.id, stage)))
    }

    /// Applies a closure on all samples.
    pub fn map_fn(
        &self,
        f: impl Fn(Sample) -> anyhow::Result<Sample> + Send + Sync + 'static,
    ) -> SamplesSequence {
        self.map(StageFn::new(f))
    }

    /// Applies a stage on the samples matching `condition`.
    pub fn map_if(
        &self,
        stage: impl SampleStage + 'static,
        condition: MapCondition,
    ) -> SamplesSequence {
        self.map_if_stage(Arc::new(stage), condition)
    }

    /// Applies an already shared stage on the samples matching `condition`.
    pub fn map_if_stage(
        &self,
        stage: Arc<dyn SampleStage>,
        condition: MapCondition,
    ) -> SamplesSequence {
        self.push(Arc::new(ConditionallyMappedSequence::new(self.id, stage, condition)))
    }

    /// A filtered view. With `insert_empty_samples` the size is unchanged
    /// and rejected positions yield an empty sample, keeping positional
    /// alignment with the source; otherwise indices compact.
    pub fn filter(
        &self,
        filter_fn: impl Fn(&Sample) -> bool + Send + Sync + 'static,
        insert_empty_samples: bool,
    ) -> SamplesSequence {
        self.push(Arc::new(FilteredSequence::new(
            self.id,
            Arc::new(filter_fn),
            insert_empty_samples,
        )))
    }

    /// A stably sorted view by a derived key.
    pub fn sort<K: Ord + Send + Sync + 'static>(
        &self,
        key_fn: impl Fn(&Sample) -> K + Send + Sync + 'static,
    ) -> SamplesSequence {
        self.push(Arc::new(SortedSequence::new(self.id, Arc::new(key_fn))))
    }

    /// A `[start:stop:step]` view. Fails on a zero step.
    pub fn slice(
        &self,
        start: Option<i64>,
        stop: Option<i64>,
        step: Option<i64>,
    ) -> Result<SamplesSequence> {
        Ok(self.push(Arc::new(SlicedSequence::new(self.id, start, stop, step)?)))
    }

    /// A shuffled view; a fixed seed makes the permutation reproducible
    /// across instances and processes.
    pub fn shuffle(&self, seed: Option<u64>) -> SamplesSequence {
        self.push(Arc::new(ShuffledSequence::new(self.id, seed)))
    }

    /// Extract the given indexes (or, negated, their ascending
    /// complement). Fails eagerly on any out-of-range index.
    pub fn select(&self, indexes: Vec<i64>, negate: bool) -> Result<SamplesSequence> {
        Ok(self.push(Arc::new(SelectedSequence::new(self, indexes, negate)?)))
    }

    /// Repeat the sequence `count` times; `count` may be fractional.
    pub fn repeat(&self, count: f64, interleave: bool) -> Result<SamplesSequence> {
        Ok(self.push(Arc::new(RepeatedSequence::new(self.id, count, interleave)?)))
    }

    /// Add the positional index to each sample through the item codec
    /// named `item_type`.
    pub fn enumerate(&self, idx_key: &str, item_type: &str) -> Result<SamplesSequence> {
        self.enumerate_with(idx_key, item_type, &ItemRegistry::with_defaults())
    }

    /// Like [`enumerate`](Self::enumerate), resolving the codec in the
    /// given registry.
    pub fn enumerate_with(
        &self,
        idx_key: &str,
        item_type: &str,
        items: &ItemRegistry,
    ) -> Result<SamplesSequence> {
        let ctor = items.get(item_type)?;
        Ok(self.push(Arc::new(EnumeratedSequence::new(self.id, idx_key, item_type, ctor))))
    }

    /// Concatenate this sequence with one or more others from the same
    /// pipeline.
    pub fn cat(&self, others: &[&SamplesSequence]) -> Result<SamplesSequence> {
        let mut ids = Vec::with_capacity(others.len());
        for other in others {
            self.check_same_graph(other)?;
            ids.push(other.id);
        }
        Ok(self.push(Arc::new(ConcatSequences::new(self.id, ids))))
    }

    /// Zip with another sequence by merging each pair of samples, renaming
    /// the other's keys through `key_format`.
    pub fn zip(&self, other: &SamplesSequence, key_format: &str) -> Result<SamplesSequence> {
        self.check_same_graph(other)?;
        Ok(self.push(Arc::new(ZippedSequence::new(self.id, other.id, key_format))))
    }

    /// Cache upstream samples the first time they are accessed, in memory
    /// or under `folder`.
    pub fn cache(&self, folder: Option<PathBuf>, reuse_cache: bool) -> Result<SamplesSequence> {
        self.cache_with(folder, reuse_cache, Arc::new(ItemRegistry::with_defaults()))
    }

    /// Like [`cache`](Self::cache), decoding reused entries through the
    /// given item registry.
    pub fn cache_with(
        &self,
        folder: Option<PathBuf>,
        reuse_cache: bool,
        items: Arc<ItemRegistry>,
    ) -> Result<SamplesSequence> {
        Ok(self.push(Arc::new(CachedSequence::new(self.id, folder, reuse_cache, items)?)))
    }

    // ---- serialization ----

    /// Serialize this sequence to a pipe list, one entry per operator in
    /// source-to-sink order. Pass the result to
    /// [`Registry::build_pipe_entries`](crate::registry::Registry::build_pipe_entries)
    /// to reconstruct the pipeline. Nested sequence arguments are
    /// serialized only when `recursive` is set.
    pub fn to_pipe(&self, recursive: bool) -> Vec<PipeEntry> {
        let mut chain = Vec::new();
        let mut cursor = Some(self.id);
        while let Some(id) = cursor {
            let op = self.pipeline.node(id);
            cursor = op.source();
            chain.push(op);
        }
        chain.reverse();
        chain
            .into_iter()
            .map(|op| {
                let call = op.call(&self.pipeline, recursive);
                PipeEntry { name: call.name.to_string(), args: call.args.into() }
            })
            .collect()
    }

    // ---- execution ----

    /// Go through all the samples, optionally with a worker pool, calling
    /// `sample_fn` on each.
    pub fn run(&self, grabber: &Grabber, sample_fn: SampleFn<'_>) -> Result<()> {
        grabber.grab_all(self, GrabAll { sample_fn, ..GrabAll::default() })
    }

    /// Go through all the samples and return a new sequence holding the
    /// processed results.
    pub fn apply(&self, grabber: &Grabber) -> Result<SamplesSequence> {
        let total = self.size()?;
        let mut collected: Vec<Option<Sample>> = vec![None; total];
        grabber.grab_all(
            self,
            GrabAll {
                sample_fn: SampleFn::indexed(|idx, sample| {
                    collected[idx] = Some(sample);
                    Ok(())
                }),
                ..GrabAll::default()
            },
        )?;
        Ok(from_list(
            &self.pipeline,
            collected.into_iter().map(Option::unwrap_or_default).collect(),
        ))
    }
}

impl Add for SamplesSequence {
    type Output = SamplesSequence;

    fn add(self, rhs: SamplesSequence) -> SamplesSequence {
        self.cat(&[&rhs]).expect("cat across different pipelines")
    }
}

/// One pass over a sequence. Yields `Err` once and stops on the first
/// failing sample.
pub struct Samples {
    seq: SamplesSequence,
    idx: usize,
    len: Option<usize>,
    failed: bool,
}

impl Iterator for Samples {
    type Item = Result<Sample>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let len = match self.len {
            Some(len) => len,
            None => match self.seq.size() {
                Ok(len) => {
                    self.len = Some(len);
                    len
                }
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            },
        };
        if self.idx >= len {
            return None;
        }
        let idx = self.idx;
        self.idx += 1;
        match self.seq.get_sample(idx as isize) {
            Ok(sample) => Some(Ok(sample)),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

impl IntoIterator for &SamplesSequence {
    type Item = Result<Sample>;
    type IntoIter = Samples;

    fn into_iter(self) -> Samples {
        self.iter()
    }
}

/// Fixed-size batches over a sequence.
pub struct Batches {
    inner: Samples,
    batch_size: usize,
    drop_last: bool,
    fill: Sample,
    done: bool,
}

impl Iterator for Batches {
    type Item = Result<Vec<Sample>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut batch = Vec::with_capacity(self.batch_size);
        while batch.len() < self.batch_size {
            match self.inner.next() {
                Some(Ok(sample)) => batch.push(sample),
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => break,
            }
        }
        if batch.is_empty() {
            return None;
        }
        if batch.len() < self.batch_size {
            self.done = true;
            if self.drop_last {
                return None;
            }
            batch.resize(self.batch_size, self.fill.clone());
        }
        Some(Ok(batch))
    }
}
