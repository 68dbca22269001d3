//! In-process implementations of persisted ops.
//!
//! A persisted op record carries only the op's identity: name, code text,
//! closure values and the `takes_self` flag. Loading one yields a detached
//! op unless this process registered an implementation with the same
//! identity digest.

use std::collections::HashMap;
use std::sync::RwLock;

use weave_types::{ContentHasher, Op};

use crate::error::SerializeResult;
use crate::json::op_record;

/// Identity digest of an op, computed from its persisted record.
pub fn op_digest(op: &Op) -> SerializeResult<String> {
    Ok(ContentHasher::OBJECT.hash_json(&op_record(op))?)
}

/// Ops known to this process, keyed by identity digest.
#[derive(Debug, Default)]
pub struct OpCatalog {
    ops: RwLock<HashMap<String, Op>>,
}

impl OpCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `op` and return its identity digest.
    pub fn register(&self, op: &Op) -> SerializeResult<String> {
        let digest = op_digest(op)?;
        self.ops
            .write()
            .expect("lock poisoned")
            .entry(digest.clone())
            .or_insert_with(|| op.clone());
        Ok(digest)
    }

    pub fn get(&self, digest: &str) -> Option<Op> {
        self.ops.read().expect("lock poisoned").get(digest).cloned()
    }

    pub fn contains(&self, digest: &str) -> bool {
        self.ops.read().expect("lock poisoned").contains_key(digest)
    }

    pub fn len(&self) -> usize {
        self.ops.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
