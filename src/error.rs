//! Error types for pipeline construction and execution.
//!
//! Failures split into three families: *build-time* errors (unknown
//! operators, malformed specs, pre-existing cache folders) raised before any
//! sample is computed, *access-time* errors (out-of-range indexes, missing
//! sample keys) raised at the point of access, and *execution* errors
//! (failures inside user-supplied stages or workers) which propagate
//! verbatim and abort the run.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for pipeline operations.
#[derive(Error, Debug)]
pub enum Error {
    /// No operator with this name is registered in either namespace.
    #[error("unknown operator `{0}`")]
    UnknownOperator(String),

    /// No stage with this name is registered.
    #[error("unknown stage `{0}`")]
    UnknownStage(String),

    /// No item codec with this name is registered.
    #[error("unknown item type `{0}`")]
    UnknownItemType(String),

    /// The declarative pipe spec could not be interpreted.
    #[error("malformed pipe spec: {0}")]
    MalformedSpec(String),

    /// A pipe operator was invoked without an upstream sequence.
    #[error("pipe operator `{0}` requires a source sequence")]
    PipeWithoutSource(String),

    /// Sequences from different pipeline graphs were combined.
    #[error("sequences belong to different pipelines")]
    GraphMismatch,

    /// The cache folder is already populated and `reuse_cache` is off.
    #[error("cache folder `{0}` already exists; pass reuse_cache to read it back")]
    CacheExists(PathBuf),

    /// A select index falls outside the source range.
    #[error("index {idx} out of range for select over {len} samples")]
    InvalidIndexes { idx: i64, len: usize },

    /// Sample index out of bounds.
    #[error("index {idx} out of range for a sequence of {len} samples")]
    IndexOutOfRange { idx: i64, len: usize },

    /// Sample key lookup failed.
    #[error("missing key `{0}`")]
    MissingKey(String),

    /// A worker initialization callback failed; the whole grab is aborted.
    #[error("worker init failed: {0}")]
    WorkerInit(#[source] anyhow::Error),

    /// The worker pool terminated before delivering every result.
    #[error("worker pool terminated unexpectedly")]
    PoolTerminated,

    /// A user-supplied stage or callback failed. The original error is
    /// carried unmodified.
    #[error(transparent)]
    Stage(#[from] anyhow::Error),

    /// IO error while reading or writing a cache entry.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// (De)serialization error for cache entries or pipe specs.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
