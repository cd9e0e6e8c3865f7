//! Source operators: sequences with no upstream dependency.

use crate::error::Result;
use crate::item::{JsonItem, TxtItem, encode_sample};
use crate::node::{OperatorCall, SequenceOp};
use crate::node_id::NodeId;
use crate::pipeline::Pipeline;
use crate::sample::Sample;
use crate::sequence::SamplesSequence;
use crate::stage::StageKeyFormat;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::{Value, json};
use std::sync::Arc;

/// A sequence over a materialized list of samples.
pub struct SamplesList {
    samples: Vec<Sample>,
}

impl SamplesList {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self { samples }
    }
}

impl SequenceOp for SamplesList {
    fn size(&self, _p: &Pipeline) -> Result<usize> {
        Ok(self.samples.len())
    }

    fn get_sample(&self, _p: &Pipeline, idx: usize) -> Result<Sample> {
        Ok(self.samples[idx].clone())
    }

    fn source(&self) -> Option<NodeId> {
        None
    }

    fn call(&self, _p: &Pipeline, _recursive: bool) -> OperatorCall {
        let samples: Vec<Value> = self.samples.iter().map(encode_sample).collect();
        OperatorCall::new("from_list").arg("samples", Value::Array(samples))
    }
}

/// A sequence over a materialized list of samples.
pub fn from_list(p: &Pipeline, samples: Vec<Sample>) -> SamplesSequence {
    let id = p.insert_node(Arc::new(SamplesList::new(samples)));
    SamplesSequence::attach(p.clone(), id)
}

/// A sequence calling a user-defined generator to get the samples.
pub struct SequenceFromCallable {
    generator_fn: Arc<dyn Fn(usize) -> Result<Sample> + Send + Sync>,
    length: usize,
}

impl SequenceFromCallable {
    pub fn new(
        generator_fn: Arc<dyn Fn(usize) -> Result<Sample> + Send + Sync>,
        length: usize,
    ) -> Self {
        Self { generator_fn, length }
    }
}

impl SequenceOp for SequenceFromCallable {
    fn size(&self, _p: &Pipeline) -> Result<usize> {
        Ok(self.length)
    }

    fn get_sample(&self, _p: &Pipeline, idx: usize) -> Result<Sample> {
        (self.generator_fn)(idx)
    }

    fn source(&self) -> Option<NodeId> {
        None
    }

    fn call(&self, _p: &Pipeline, _recursive: bool) -> OperatorCall {
        OperatorCall::new("from_callable")
            .arg("generator_fn", json!("<callable>"))
            .arg("length", json!(self.length))
    }
}

/// A sequence calling a user-defined generator to get the samples.
pub fn from_callable(
    p: &Pipeline,
    generator_fn: impl Fn(usize) -> Result<Sample> + Send + Sync + 'static,
    length: usize,
) -> SamplesSequence {
    let id = p.insert_node(Arc::new(SequenceFromCallable::new(Arc::new(generator_fn), length)));
    SamplesSequence::attach(p.clone(), id)
}

/// A fake sequence of generated samples, for tests and demos.
///
/// Each sample holds an `id` text item, a `label` class index and a small
/// `values` float vector, all derived deterministically from the seed and
/// the position. Keys are renamed through `key_format` (`*` stands for the
/// base key).
pub struct ToyDataset {
    length: usize,
    seed: Option<u64>,
    key_format: String,
    resolved_seed: u64,
}

impl ToyDataset {
    pub fn new(length: usize, seed: Option<u64>, key_format: &str) -> Self {
        Self {
            length,
            seed,
            key_format: key_format.to_string(),
            resolved_seed: seed.unwrap_or_else(rand::random),
        }
    }

    fn key(&self, base: &str) -> String {
        StageKeyFormat::format_key(&self.key_format, base)
    }
}

impl SequenceOp for ToyDataset {
    fn size(&self, _p: &Pipeline) -> Result<usize> {
        Ok(self.length)
    }

    fn get_sample(&self, _p: &Pipeline, idx: usize) -> Result<Sample> {
        let mut rng = ChaCha8Rng::seed_from_u64(
            self.resolved_seed ^ (idx as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15),
        );
        let label: u64 = rng.random_range(0..5);
        let values: Vec<f64> = (0..3).map(|_| rng.random()).collect();
        Ok(Sample::default()
            .set_item(&self.key("id"), TxtItem::new(json!(format!("sample_{idx}")), false))
            .set_item(&self.key("label"), JsonItem::new(json!(label), false))
            .set_item(&self.key("values"), JsonItem::new(json!(values), false)))
    }

    fn source(&self) -> Option<NodeId> {
        None
    }

    fn call(&self, _p: &Pipeline, _recursive: bool) -> OperatorCall {
        OperatorCall::new("toy_dataset")
            .arg("length", json!(self.length))
            .arg("seed", json!(self.seed))
            .arg("key_format", json!(self.key_format))
    }
}

/// A fake sequence of generated samples, for tests and demos.
pub fn toy_dataset(
    p: &Pipeline,
    length: usize,
    seed: Option<u64>,
    key_format: &str,
) -> SamplesSequence {
    let id = p.insert_node(Arc::new(ToyDataset::new(length, seed, key_format)));
    SamplesSequence::attach(p.clone(), id)
}
