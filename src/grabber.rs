//! The parallel execution engine.
//!
//! A [`Grabber`] drives `get_sample` over `[0, N)` for a sequence, either
//! inline in the caller or through a bounded pool of worker threads, and
//! hands the results to an explicitly chosen delivery callback
//! ([`SampleFn`]). Delivery is in strictly ascending index order when
//! `keep_order` is set (buffering early out-of-order completions), or in
//! completion order otherwise.
//!
//! The pool is a scoped resource: workers and channels are torn down on
//! every exit path — normal completion, a failing sample, a failing
//! callback, or a panic inside a worker. Errors propagate verbatim and
//! abort all remaining work; there is no retry and no partial-result
//! suppression.
//!
//! # Example
//!
//! ```
//! use samplepipe::{Grabber, GrabAll, Pipeline, SampleFn, toy_dataset};
//!
//! # fn main() -> samplepipe::Result<()> {
//! let p = Pipeline::default();
//! let seq = toy_dataset(&p, 100, Some(42), "*");
//!
//! let grabber = Grabber { num_workers: 4, keep_order: true, ..Grabber::default() };
//! let mut seen = 0usize;
//! grabber.grab_all(
//!     &seq,
//!     GrabAll {
//!         sample_fn: SampleFn::each(|_sample| {
//!             seen += 1;
//!             Ok(())
//!         }),
//!         ..GrabAll::default()
//!     },
//! )?;
//! assert_eq!(seen, 100);
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use crate::sample::Sample;
use crate::sequence::SamplesSequence;
use crossbeam_channel::{Receiver, Sender, bounded};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::Arc;
use std::thread;

/// Initialization callback run exactly once per worker before any grab
/// work; a failure aborts the whole execution.
pub type WorkerInit = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// How grabbed samples are delivered to the caller.
///
/// The shape is chosen explicitly here instead of being sniffed from a
/// callback signature.
#[derive(Default)]
pub enum SampleFn<'a> {
    /// Samples are computed for their side effects only and dropped.
    #[default]
    Ignore,
    /// Called with each sample.
    Each(Box<dyn FnMut(Sample) -> anyhow::Result<()> + 'a>),
    /// Called with each `(index, sample)` pair.
    Indexed(Box<dyn FnMut(usize, Sample) -> anyhow::Result<()> + 'a>),
}

impl<'a> SampleFn<'a> {
    pub fn each(f: impl FnMut(Sample) -> anyhow::Result<()> + 'a) -> Self {
        Self::Each(Box::new(f))
    }

    pub fn indexed(f: impl FnMut(usize, Sample) -> anyhow::Result<()> + 'a) -> Self {
        Self::Indexed(Box::new(f))
    }

    fn wants_sample(&self) -> bool {
        !matches!(self, Self::Ignore)
    }

    fn dispatch(&mut self, idx: usize, sample: Option<Sample>) -> Result<()> {
        match (self, sample) {
            (Self::Each(f), Some(sample)) => f(sample).map_err(Error::Stage),
            (Self::Indexed(f), Some(sample)) => f(idx, sample).map_err(Error::Stage),
            _ => Ok(()),
        }
    }
}

/// Options for one [`Grabber::grab_all`] execution.
pub struct GrabAll<'a> {
    /// Per-sample delivery callback.
    pub sample_fn: SampleFn<'a>,
    /// Progress callback, called with `(delivered, total)` after each
    /// delivery.
    pub track_fn: Option<Box<dyn FnMut(usize, usize) + 'a>>,
    /// Grab only the first `size` indexes instead of the whole sequence.
    pub size: Option<usize>,
    /// An arbitrary caller-owned resource held for the whole grab and
    /// dropped on exit, e.g. a serialization-mode override.
    pub scoped_resource: Option<Box<dyn Any>>,
    /// Run exactly once per worker before any grab work.
    pub worker_init: Option<WorkerInit>,
}

impl Default for GrabAll<'_> {
    fn default() -> Self {
        Self {
            sample_fn: SampleFn::Ignore,
            track_fn: None,
            size: None,
            scoped_resource: None,
            worker_init: None,
        }
    }
}

/// One worker-to-consumer message.
enum Grabbed {
    Done(usize, Option<Sample>),
    Failed(Error),
    Panicked(Box<dyn Any + Send>),
}

/// Bounded worker-pool executor for a [`SamplesSequence`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Grabber {
    /// Number of worker threads to spawn. `0` runs inline in the caller;
    /// a negative value spawns one worker per logical core.
    #[serde(default)]
    pub num_workers: i64,
    /// Per-worker fetch-ahead budget, trading memory for throughput.
    #[serde(default = "default_prefetch")]
    pub prefetch: usize,
    /// Deliver results in strictly ascending index order instead of
    /// completion order.
    #[serde(default)]
    pub keep_order: bool,
}

fn default_prefetch() -> usize {
    2
}

impl Default for Grabber {
    fn default() -> Self {
        Self { num_workers: 0, prefetch: default_prefetch(), keep_order: false }
    }
}

impl Grabber {
    fn resolved_workers(&self) -> usize {
        if self.num_workers < 0 {
            num_cpus::get()
        } else {
            self.num_workers as usize
        }
    }

    /// Drive `get_sample` over the whole sequence (or its first `size`
    /// indexes) and deliver results as configured.
    pub fn grab_all(&self, sequence: &SamplesSequence, opts: GrabAll<'_>) -> Result<()> {
        let GrabAll { mut sample_fn, mut track_fn, size, scoped_resource, worker_init } = opts;
        // Held for the whole grab, released on every exit path.
        let _scoped = scoped_resource;

        let total = match size {
            Some(n) => n,
            None => sequence.size()?,
        };
        let workers = self.resolved_workers();
        tracing::debug!(total, workers, keep_order = self.keep_order, "grabbing samples");

        if workers == 0 {
            if let Some(init) = &worker_init {
                init().map_err(Error::WorkerInit)?;
            }
            for idx in 0..total {
                let sample = sequence.get_sample(idx as isize)?;
                let sample = sample_fn.wants_sample().then_some(sample);
                sample_fn.dispatch(idx, sample)?;
                if let Some(track) = &mut track_fn {
                    track(idx + 1, total);
                }
            }
            return Ok(());
        }

        let capacity = self.prefetch.max(1) * workers;
        let wants_sample = sample_fn.wants_sample();
        thread::scope(|scope| {
            let (task_tx, task_rx) = bounded::<usize>(capacity);
            let (result_tx, result_rx) = bounded::<Grabbed>(capacity);

            for _ in 0..workers {
                let task_rx = task_rx.clone();
                let result_tx = result_tx.clone();
                let seq = sequence.clone();
                let init = worker_init.clone();
                scope.spawn(move || worker_loop(seq, task_rx, result_tx, init, wants_sample));
            }
            // The consumer holds no producer ends: once it drops
            // `result_rx`, worker sends fail and the pool drains itself.
            drop(task_rx);
            drop(result_tx);

            scope.spawn(move || {
                for idx in 0..total {
                    if task_tx.send(idx).is_err() {
                        break;
                    }
                }
            });

            consume(result_rx, total, self.keep_order, &mut sample_fn, &mut track_fn)
        })
    }
}

fn worker_loop(
    seq: SamplesSequence,
    task_rx: Receiver<usize>,
    result_tx: Sender<Grabbed>,
    init: Option<WorkerInit>,
    wants_sample: bool,
) {
    if let Some(init) = init {
        if let Err(e) = init() {
            let _ = result_tx.send(Grabbed::Failed(Error::WorkerInit(e)));
            return;
        }
    }
    for idx in task_rx {
        let outcome = catch_unwind(AssertUnwindSafe(|| seq.get_sample(idx as isize)));
        let msg = match outcome {
            Ok(Ok(sample)) => Grabbed::Done(idx, wants_sample.then_some(sample)),
            Ok(Err(e)) => Grabbed::Failed(e),
            Err(payload) => Grabbed::Panicked(payload),
        };
        let stop = !matches!(msg, Grabbed::Done(..));
        if result_tx.send(msg).is_err() || stop {
            break;
        }
    }
}

fn consume(
    result_rx: Receiver<Grabbed>,
    total: usize,
    keep_order: bool,
    sample_fn: &mut SampleFn<'_>,
    track_fn: &mut Option<Box<dyn FnMut(usize, usize) + '_>>,
) -> Result<()> {
    let mut delivered = 0usize;
    let mut next_in_order = 0usize;
    let mut pending: BTreeMap<usize, Option<Sample>> = BTreeMap::new();
    while delivered < total {
        if keep_order {
            if let Some(sample) = pending.remove(&next_in_order) {
                sample_fn.dispatch(next_in_order, sample)?;
                next_in_order += 1;
                delivered += 1;
                if let Some(track) = track_fn {
                    track(delivered, total);
                }
                continue;
            }
        }
        match result_rx.recv() {
            Err(_) => return Err(Error::PoolTerminated),
            Ok(Grabbed::Failed(e)) => return Err(e),
            Ok(Grabbed::Panicked(payload)) => resume_unwind(payload),
            Ok(Grabbed::Done(idx, sample)) => {
                if keep_order {
                    pending.insert(idx, sample);
                } else {
                    sample_fn.dispatch(idx, sample)?;
                    delivered += 1;
                    if let Some(track) = track_fn {
                        track(delivered, total);
                    }
                }
            }
        }
    }
    Ok(())
}
