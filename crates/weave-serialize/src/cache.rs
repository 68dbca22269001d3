//! Per-project caches for custom-object encode and decode.
//!
//! Uploads are keyed by `(project, local content digest)`, decoded values by
//! `(project, envelope digest)`. Saving the same value twice uploads its
//! files once; using the same envelope twice reads its files once.

use std::collections::HashMap;
use std::sync::RwLock;

use weave_types::CustomValue;

type Key = (String, String);

fn key(project_id: &str, digest: &str) -> Key {
    (project_id.to_string(), digest.to_string())
}

/// Process-wide cache shared by every serialize call of a client.
#[derive(Debug, Default)]
pub struct CustomObjectCache {
    uploads: RwLock<HashMap<Key, String>>,
    load_ops: RwLock<HashMap<Key, String>>,
    decoded: RwLock<HashMap<Key, CustomValue>>,
}

impl CustomObjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Server digest of a file already uploaded with this local digest.
    pub fn uploaded(&self, project_id: &str, local_digest: &str) -> Option<String> {
        self.uploads
            .read()
            .expect("lock poisoned")
            .get(&key(project_id, local_digest))
            .cloned()
    }

    pub fn record_upload(&self, project_id: &str, local_digest: &str, server_digest: String) {
        self.uploads
            .write()
            .expect("lock poisoned")
            .insert(key(project_id, local_digest), server_digest);
    }

    /// Ref URI of the published load op for a serializer.
    pub fn load_op(&self, project_id: &str, serializer_id: &str) -> Option<String> {
        self.load_ops
            .read()
            .expect("lock poisoned")
            .get(&key(project_id, serializer_id))
            .cloned()
    }

    pub fn record_load_op(&self, project_id: &str, serializer_id: &str, uri: String) {
        self.load_ops
            .write()
            .expect("lock poisoned")
            .insert(key(project_id, serializer_id), uri);
    }

    pub fn decoded(&self, project_id: &str, envelope_digest: &str) -> Option<CustomValue> {
        self.decoded
            .read()
            .expect("lock poisoned")
            .get(&key(project_id, envelope_digest))
            .cloned()
    }

    pub fn record_decoded(&self, project_id: &str, envelope_digest: &str, value: CustomValue) {
        self.decoded
            .write()
            .expect("lock poisoned")
            .insert(key(project_id, envelope_digest), value);
    }

    /// Drop everything cached for one project.
    pub fn reset_project(&self, project_id: &str) {
        self.uploads
            .write()
            .expect("lock poisoned")
            .retain(|(p, _), _| p != project_id);
        self.load_ops
            .write()
            .expect("lock poisoned")
            .retain(|(p, _), _| p != project_id);
        self.decoded
            .write()
            .expect("lock poisoned")
            .retain(|(p, _), _| p != project_id);
    }

    /// Drop everything.
    pub fn reset(&self) {
        self.uploads.write().expect("lock poisoned").clear();
        self.load_ops.write().expect("lock poisoned").clear();
        self.decoded.write().expect("lock poisoned").clear();
        tracing::debug!("custom object cache reset");
    }

    /// Number of cached entries across all maps.
    pub fn len(&self) -> usize {
        self.uploads.read().expect("lock poisoned").len()
            + self.load_ops.read().expect("lock poisoned").len()
            + self.decoded.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
