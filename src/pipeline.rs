//! The pipeline graph: an append-only arena of sequence operators.
//!
//! A [`Pipeline`] owns every operator node built against it. Sequences are
//! cheap `(pipeline, id)` handles into this arena; operators refer to
//! their upstream nodes by [`NodeId`]. Building nodes performs no I/O and
//! no sample computation.

use crate::node::SequenceOp;
use crate::node_id::NodeId;
use std::sync::{Arc, RwLock};

/// Container for a graph of sequence operators.
///
/// Cloning a `Pipeline` is cheap and yields another handle onto the same
/// arena.
pub struct Pipeline {
    inner: Arc<RwLock<Vec<Arc<dyn SequenceOp>>>>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self { inner: Arc::new(RwLock::new(Vec::new())) }
    }
}

impl Clone for Pipeline {
    fn clone(&self) -> Self {
        Pipeline { inner: Arc::clone(&self.inner) }
    }
}

impl Pipeline {
    /// Insert an operator node and return its handle.
    pub(crate) fn insert_node(&self, op: Arc<dyn SequenceOp>) -> NodeId {
        let mut g = self.inner.write().unwrap();
        let id = NodeId::new(g.len());
        g.push(op);
        id
    }

    /// Look up a node by id. Ids are only minted by `insert_node`, so a
    /// lookup through a handle of this pipeline always succeeds.
    pub(crate) fn node(&self, id: NodeId) -> Arc<dyn SequenceOp> {
        let g = self.inner.read().unwrap();
        Arc::clone(&g[id.raw()])
    }

    /// Number of operator nodes in the arena.
    pub fn node_count(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    /// Whether two handles refer to the same arena.
    pub fn same_graph(&self, other: &Pipeline) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
