//! The first-access caching pipe.
//!
//! On the first access to an index the upstream sample is computed,
//! stored, and returned; later accesses read the stored form without
//! recomputation. The store is an in-memory map, or — when a folder is
//! given — one serialized entry per index plus a generation marker.
//!
//! Concurrent writers of the same on-disk key are not synchronized beyond
//! per-entry atomicity: every write lands through a temp file renamed into
//! place, and the last writer wins. Callers needing a stronger guarantee
//! must serialize cache population per key themselves.

use crate::error::{Error, Result};
use crate::item::{ItemRegistry, encode_sample};
use crate::node::{OperatorCall, SequenceOp};
use crate::node_id::NodeId;
use crate::pipeline::Pipeline;
use crate::sample::Sample;
use crate::sequence::SamplesSequence;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Marker file distinguishing a freshly created cache generation from a
/// reused one.
pub const CACHE_MARKER: &str = "cache.marker";

enum CacheStore {
    Memory(RwLock<HashMap<usize, Sample>>),
    Disk { folder: PathBuf, items: Arc<ItemRegistry> },
}

/// Memoizes upstream samples on first access.
pub struct CachedSequence {
    source: NodeId,
    reuse_cache: bool,
    store: CacheStore,
}

impl CachedSequence {
    /// Build the cache pipe and prepare its store.
    ///
    /// With a folder that already holds cache entries, `reuse_cache` must
    /// be set or construction fails with [`Error::CacheExists`] before any
    /// sample is touched; when set, existing entries are read back and
    /// never recomputed.
    pub fn new(
        source: NodeId,
        folder: Option<PathBuf>,
        reuse_cache: bool,
        items: Arc<ItemRegistry>,
    ) -> Result<Self> {
        let store = match folder {
            None => CacheStore::Memory(RwLock::new(HashMap::new())),
            Some(folder) => {
                if folder.exists() {
                    if Self::is_populated(&folder)? && !reuse_cache {
                        return Err(Error::CacheExists(folder));
                    }
                } else {
                    fs::create_dir_all(&folder)?;
                }
                let marker = folder.join(CACHE_MARKER);
                if !marker.exists() {
                    fs::write(&marker, serde_json::to_vec(&json!({ "version": 1 }))?)?;
                }
                CacheStore::Disk { folder, items }
            }
        };
        Ok(Self { source, reuse_cache, store })
    }

    fn is_populated(folder: &Path) -> Result<bool> {
        if folder.join(CACHE_MARKER).exists() {
            return Ok(true);
        }
        for entry in fs::read_dir(folder)? {
            if entry?.path().extension().is_some_and(|ext| ext == "json") {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn compute_upstream(&self, p: &Pipeline, idx: usize) -> Result<Sample> {
        SamplesSequence::attach(p.clone(), self.source).get_sample(idx as isize)
    }
}

impl SequenceOp for CachedSequence {
    fn size(&self, p: &Pipeline) -> Result<usize> {
        SamplesSequence::attach(p.clone(), self.source).size()
    }

    fn get_sample(&self, p: &Pipeline, idx: usize) -> Result<Sample> {
        match &self.store {
            CacheStore::Memory(map) => {
                if let Some(sample) = map.read().unwrap().get(&idx) {
                    return Ok(sample.clone());
                }
                let sample = self.compute_upstream(p, idx)?;
                map.write().unwrap().insert(idx, sample.clone());
                Ok(sample)
            }
            CacheStore::Disk { folder, items } => {
                let entry = folder.join(format!("{idx}.json"));
                if entry.exists() {
                    let value: Value = serde_json::from_slice(&fs::read(&entry)?)?;
                    return items.decode_sample(&value);
                }
                let sample = self.compute_upstream(p, idx)?;
                let mut tmp = tempfile::NamedTempFile::new_in(folder)?;
                serde_json::to_writer(&mut tmp, &encode_sample(&sample))?;
                tmp.persist(&entry).map_err(|e| Error::Io(e.error))?;
                tracing::debug!(idx, entry = %entry.display(), "cached sample");
                Ok(sample)
            }
        }
    }

    fn source(&self) -> Option<NodeId> {
        Some(self.source)
    }

    fn call(&self, _p: &Pipeline, _recursive: bool) -> OperatorCall {
        let folder = match &self.store {
            CacheStore::Memory(_) => Value::Null,
            CacheStore::Disk { folder, .. } => json!(folder.display().to_string()),
        };
        OperatorCall::new("cache")
            .arg("cache_folder", folder)
            .arg("reuse_cache", json!(self.reuse_cache))
    }
}
