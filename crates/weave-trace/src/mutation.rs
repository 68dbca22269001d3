//! Local mutations recorded against a proxy tree.
//!
//! Writes through a proxy are applied to the proxy at once and logged on the
//! tree's [`TraceRoot`]. Nothing is sent to the server; publishing the
//! mutated root value as a new version is the caller's job.

use std::fmt;
use std::sync::{Arc, Mutex};

use weave_types::{EdgeType, Ref, RefSegment, Value};

/// One pending local change. `path` is the extra path from the root to the
/// container that changed.
#[derive(Clone, Debug, PartialEq)]
pub enum Mutation {
    SetItem {
        path: Vec<RefSegment>,
        key: String,
        value: Value,
    },
    SetAttr {
        path: Vec<RefSegment>,
        name: String,
        value: Value,
    },
    Append {
        path: Vec<RefSegment>,
        value: Value,
    },
}

impl Mutation {
    pub fn path(&self) -> &[RefSegment] {
        match self {
            Self::SetItem { path, .. } | Self::SetAttr { path, .. } | Self::Append { path, .. } => {
                path
            }
        }
    }
}

struct RootState {
    reference: Option<Ref>,
    value: Mutex<Value>,
    mutations: Mutex<Vec<Mutation>>,
}

/// Top of a dereference chain.
///
/// Every proxy reached from the same fetched object shares one root. The
/// root keeps its own copy of the raw value with all recorded mutations
/// applied, so the whole mutated object can be published again.
#[derive(Clone)]
pub struct TraceRoot(Arc<RootState>);

impl TraceRoot {
    pub fn new(reference: Option<Ref>, value: Value) -> Self {
        Self(Arc::new(RootState {
            reference,
            value: Mutex::new(value),
            mutations: Mutex::new(Vec::new()),
        }))
    }

    pub fn reference(&self) -> Option<&Ref> {
        self.0.reference.as_ref()
    }

    /// The root value with every recorded mutation applied.
    pub fn value(&self) -> Value {
        self.0.value.lock().expect("lock poisoned").clone()
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.0.mutations.lock().expect("lock poisoned").clone()
    }

    pub fn is_dirty(&self) -> bool {
        !self.0.mutations.lock().expect("lock poisoned").is_empty()
    }

    pub fn same_root(&self, other: &TraceRoot) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Extra path of `reference` relative to this root, if it lies below it.
    pub fn relative_path(&self, reference: &Ref) -> Option<Vec<RefSegment>> {
        let own = self.0.reference.as_ref().map_or(&[][..], Ref::extra);
        reference.extra().strip_prefix(own).map(<[RefSegment]>::to_vec)
    }

    /// The part of the root value at `path`, mutations applied.
    pub(crate) fn value_at(&self, path: &[RefSegment]) -> Option<Value> {
        let value = self.0.value.lock().expect("lock poisoned");
        let mut target = &*value;
        for segment in path {
            target = lookup(target, segment)?;
        }
        Some(target.clone())
    }

    pub(crate) fn record(&self, mutation: Mutation) {
        {
            let mut value = self.0.value.lock().expect("lock poisoned");
            if !apply(&mut value, &mutation) {
                tracing::debug!(
                    path = ?mutation.path(),
                    "mutation target is not held by the root value; recorded only"
                );
            }
        }
        self.0.mutations.lock().expect("lock poisoned").push(mutation);
    }
}

impl fmt::Debug for TraceRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceRoot")
            .field("reference", &self.0.reference)
            .field("mutations", &self.0.mutations.lock().expect("lock poisoned").len())
            .finish()
    }
}

fn lookup<'a>(value: &'a Value, segment: &RefSegment) -> Option<&'a Value> {
    match (segment.edge, value) {
        (EdgeType::Key, Value::Dict(map)) => map.get(&segment.arg),
        (EdgeType::Attr, Value::Object(rec)) => rec.get(&segment.arg),
        (EdgeType::Index, Value::List(items)) => items.get(segment.as_index()?),
        _ => None,
    }
}

fn descend<'a>(value: &'a mut Value, segment: &RefSegment) -> Option<&'a mut Value> {
    match (segment.edge, value) {
        (EdgeType::Key, Value::Dict(map)) => map.get_mut(&segment.arg),
        (EdgeType::Attr, Value::Object(rec)) => rec.field_mut(&segment.arg),
        (EdgeType::Index, Value::List(items)) => items.get_mut(segment.as_index()?),
        _ => None,
    }
}

/// Apply `mutation` to `root`. Returns `false` if the path does not lead to
/// a matching in-memory container.
pub(crate) fn apply(root: &mut Value, mutation: &Mutation) -> bool {
    let mut target = root;
    for segment in mutation.path() {
        match descend(target, segment) {
            Some(next) => target = next,
            None => return false,
        }
    }
    match (mutation, target) {
        (Mutation::SetAttr { name, value, .. }, Value::Object(rec)) => {
            rec.set_field(name.clone(), value.clone());
            true
        }
        (Mutation::SetItem { key, value, .. }, Value::Dict(map)) => {
            map.insert(key.clone(), value.clone());
            true
        }
        (Mutation::SetItem { key, value, .. }, Value::List(items)) => {
            match key.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                Some(slot) => {
                    *slot = value.clone();
                    true
                }
                None => false,
            }
        }
        (Mutation::Append { value, .. }, Value::List(items)) => {
            items.push(value.clone());
            true
        }
        _ => false,
    }
}
