#![allow(dead_code)]

use samplepipe::{JsonItem, Pipeline, Sample, SamplesSequence, from_callable, from_list};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A sample holding a single numeric `n` item.
pub fn numbered_sample(n: i64) -> Sample {
    Sample::default().set_item("n", JsonItem::new(json!(n), false))
}

/// A materialized sequence of samples `{n: 0}, {n: 1}, ...`.
pub fn numbered(p: &Pipeline, len: usize) -> SamplesSequence {
    from_list(p, (0..len as i64).map(numbered_sample).collect())
}

/// Read back the `n` item of a sample.
pub fn n_of(sample: &Sample) -> i64 {
    sample.deep_get("n", json!(-1)).as_i64().unwrap()
}

/// A generated sequence that counts how many times samples are computed.
pub fn counting(p: &Pipeline, len: usize) -> (SamplesSequence, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let seq = from_callable(
        p,
        move |idx| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(numbered_sample(idx as i64))
        },
        len,
    );
    (seq, calls)
}

/// Collect the `n` values of a sequence in iteration order.
pub fn collect_ns(seq: &SamplesSequence) -> anyhow::Result<Vec<i64>> {
    let mut out = Vec::new();
    for sample in seq.iter() {
        out.push(n_of(&sample?));
    }
    Ok(out)
}
