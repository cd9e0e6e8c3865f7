//! Sample-level pipe operators: `map` and `map_if`.

use crate::error::Result;
use crate::node::{OperatorCall, SequenceOp};
use crate::node_id::NodeId;
use crate::pipeline::Pipeline;
use crate::sample::Sample;
use crate::sequence::SamplesSequence;
use crate::stage::SampleStage;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::{Value, json};
use std::sync::Arc;

use super::num_value;

/// Applies a stage on all samples, lazily on every access. Nothing is
/// memoized; put a cache pipe downstream when recomputation matters.
pub struct MappedSequence {
    source: NodeId,
    stage: Arc<dyn SampleStage>,
}

impl MappedSequence {
    pub fn new(source: NodeId, stage: Arc<dyn SampleStage>) -> Self {
        Self { source, stage }
    }
}

impl SequenceOp for MappedSequence {
    fn size(&self, p: &Pipeline) -> Result<usize> {
        SamplesSequence::attach(p.clone(), self.source).size()
    }

    fn get_sample(&self, p: &Pipeline, idx: usize) -> Result<Sample> {
        let sample = SamplesSequence::attach(p.clone(), self.source).get_sample(idx as isize)?;
        Ok(self.stage.apply(sample)?)
    }

    fn source(&self) -> Option<NodeId> {
        Some(self.source)
    }

    fn call(&self, _p: &Pipeline, _recursive: bool) -> OperatorCall {
        OperatorCall::new("map").arg("stage", self.stage.call().to_value())
    }
}

/// When a conditionally mapped sample is passed through its stage.
///
/// The variant is chosen explicitly by the caller; there is no signature
/// sniffing on a callback.
#[derive(Clone)]
pub enum MapCondition {
    /// Map every sample.
    Always,
    /// Map samples whose position falls in `[start, stop)` with the given
    /// step; negative bounds count from the end of the sequence.
    IndexRange { start: i64, stop: Option<i64>, step: i64 },
    /// Map each sample with the given probability. The draw depends only
    /// on the instance seed and the position, so it is stable across
    /// passes and workers.
    Probability { p: f64, seed: Option<u64>, instance_seed: u64 },
    /// An arbitrary predicate over position and sample.
    Custom(Arc<dyn Fn(usize, &Sample) -> bool + Send + Sync>),
}

impl MapCondition {
    pub fn probability(p: f64, seed: Option<u64>) -> Self {
        Self::Probability { p, seed, instance_seed: seed.unwrap_or_else(rand::random) }
    }

    pub fn index_range(start: i64, stop: Option<i64>, step: i64) -> Self {
        Self::IndexRange { start, stop, step }
    }

    fn matches(&self, idx: usize, sample: &Sample, len: usize) -> bool {
        match self {
            Self::Always => true,
            Self::IndexRange { start, stop, step } => {
                let len = len as i64;
                let start = if *start < 0 { len + start } else { *start };
                let stop = match stop {
                    None => len,
                    Some(s) if *s < 0 => len + s,
                    Some(s) => *s,
                };
                let idx = idx as i64;
                *step > 0 && idx >= start && idx < stop && (idx - start) % step == 0
            }
            Self::Probability { p, instance_seed, .. } => {
                let mut rng = ChaCha8Rng::seed_from_u64(
                    instance_seed ^ (idx as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15),
                );
                rng.random::<f64>() < *p
            }
            Self::Custom(f) => f(idx, sample),
        }
    }

    pub(crate) fn to_value(&self) -> Value {
        match self {
            Self::Always => json!("always"),
            Self::IndexRange { start, stop, step } => {
                json!({ "index_range": { "start": start, "stop": stop, "step": step } })
            }
            Self::Probability { p, seed, .. } => {
                json!({ "probability": { "p": num_value(*p), "seed": seed } })
            }
            Self::Custom(_) => json!("<callable>"),
        }
    }
}

/// Applies a stage on the samples matching a condition; the others pass
/// through untouched.
pub struct ConditionallyMappedSequence {
    source: NodeId,
    stage: Arc<dyn SampleStage>,
    condition: MapCondition,
}

impl ConditionallyMappedSequence {
    pub fn new(source: NodeId, stage: Arc<dyn SampleStage>, condition: MapCondition) -> Self {
        Self { source, stage, condition }
    }
}

impl SequenceOp for ConditionallyMappedSequence {
    fn size(&self, p: &Pipeline) -> Result<usize> {
        SamplesSequence::attach(p.clone(), self.source).size()
    }

    fn get_sample(&self, p: &Pipeline, idx: usize) -> Result<Sample> {
        let src = SamplesSequence::attach(p.clone(), self.source);
        let len = src.size()?;
        let sample = src.get_sample(idx as isize)?;
        if self.condition.matches(idx, &sample, len) {
            Ok(self.stage.apply(sample)?)
        } else {
            Ok(sample)
        }
    }

    fn source(&self) -> Option<NodeId> {
        Some(self.source)
    }

    fn call(&self, _p: &Pipeline, _recursive: bool) -> OperatorCall {
        OperatorCall::new("map_if")
            .arg("stage", self.stage.call().to_value())
            .arg("condition", self.condition.to_value())
    }
}
