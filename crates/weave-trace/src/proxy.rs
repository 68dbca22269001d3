//! Ref-carrying proxies around dereferenced values.
//!
//! [`make_trace_obj`] turns a raw value and the ref it was reached through
//! into a [`TraceValue`]. Accessing a field, key, index or row of a proxy
//! yields another proxy whose ref is the parent's ref extended by one path
//! segment, so every value reached through a proxy stays addressable.
//! Object refs met along the way are fetched lazily, one at a time.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use weave_serialize::SerializeContext;
use weave_server::{ObjReadReq, RefsReadBatchReq, TraceServer};
use weave_types::{
    CallRef, EdgeType, ObjectRecord, ObjectRef, Op, Receiver, Ref, RefSegment, Value,
};

use crate::error::{TraceError, TraceResult};
use crate::mutation::{Mutation, TraceRoot};
use crate::table::{TableStates, TraceTable, DEFAULT_TABLE_STATES};

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Rows fetched per table query.
pub const DEFAULT_TABLE_PAGE_SIZE: usize = 1000;

/// Pages a table proxy keeps cached.
pub const DEFAULT_TABLE_CACHE_PAGES: usize = 16;

/// Server, serializers and paging settings shared by a proxy tree.
/// Clones share one table page cache.
#[derive(Clone)]
pub struct TraceBackend {
    server: Arc<dyn TraceServer>,
    serializer: SerializeContext,
    page_size: usize,
    cache_pages: usize,
    tables: Arc<TableStates>,
}

impl TraceBackend {
    pub fn new(server: Arc<dyn TraceServer>, serializer: SerializeContext) -> Self {
        Self {
            server,
            serializer,
            page_size: DEFAULT_TABLE_PAGE_SIZE,
            cache_pages: DEFAULT_TABLE_CACHE_PAGES,
            tables: Arc::new(TableStates::new(DEFAULT_TABLE_STATES)),
        }
    }

    /// Override table paging. Zero values are raised to one. Pages cached
    /// under the old settings are not reused.
    pub fn with_table_paging(mut self, page_size: usize, cache_pages: usize) -> Self {
        self.page_size = page_size.max(1);
        self.cache_pages = cache_pages.max(1);
        self.tables = Arc::new(TableStates::new(DEFAULT_TABLE_STATES));
        self
    }

    pub fn server(&self) -> &dyn TraceServer {
        self.server.as_ref()
    }

    pub fn serializer(&self) -> &SerializeContext {
        &self.serializer
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn cache_pages(&self) -> usize {
        self.cache_pages
    }

    pub(crate) fn tables(&self) -> &TableStates {
        &self.tables
    }
}

impl std::fmt::Debug for TraceBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceBackend")
            .field("page_size", &self.page_size)
            .field("cache_pages", &self.cache_pages)
            .finish()
    }
}

/// Fields every proxy carries.
#[derive(Clone, Debug)]
pub(crate) struct Node {
    pub(crate) reference: Option<Ref>,
    pub(crate) backend: TraceBackend,
    pub(crate) root: TraceRoot,
}

impl Node {
    fn extended(&self, segment: RefSegment) -> Option<Ref> {
        self.reference.as_ref().map(|r| r.with_segment(segment))
    }

    /// This proxy's value as currently held by the root, once writes have
    /// been recorded anywhere in the tree.
    fn synced(&self) -> Option<Value> {
        if !self.root.is_dirty() {
            return None;
        }
        let path = self.root.relative_path(self.reference.as_ref()?)?;
        self.root.value_at(&path)
    }

    pub(crate) fn child(&self, raw: Value, reference: Option<Ref>) -> BoxFuture<'_, TraceResult<TraceValue>> {
        make_trace_obj(TraceInput::Raw(raw), reference, &self.backend, Some(self.root.clone()))
    }

    /// Path for a write through this proxy. Only object-addressed proxies
    /// accept writes.
    fn mutation_path(&self, action: &str) -> TraceResult<Vec<RefSegment>> {
        let reference = match &self.reference {
            Some(r @ Ref::Object(_)) => r,
            Some(other) => {
                return Err(TraceError::InvalidMutation(format!(
                    "cannot {action} through {other}: not an object ref"
                )))
            }
            None => {
                return Err(TraceError::InvalidMutation(format!(
                    "cannot {action} on a value without a ref"
                )))
            }
        };
        self.root.relative_path(reference).ok_or_else(|| {
            TraceError::InvalidMutation(format!("{reference} does not lie below its root"))
        })
    }
}

/// What [`make_trace_obj`] wraps.
#[derive(Clone, Debug)]
pub enum TraceInput {
    Raw(Value),
    Traced(TraceValue),
}

impl From<Value> for TraceInput {
    fn from(value: Value) -> Self {
        Self::Raw(value)
    }
}

impl From<TraceValue> for TraceInput {
    fn from(value: TraceValue) -> Self {
        Self::Traced(value)
    }
}

/// A dereferenced value.
#[derive(Clone, Debug)]
pub enum TraceValue {
    Object(TraceObject),
    List(TraceList),
    Dict(TraceDict),
    Table(TraceTable),
    /// An op. Methods read off an object come back bound to it.
    Op(Op),
    Scalar(TraceScalar),
}

impl TraceValue {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Object(_) => "object",
            Self::List(_) => "list",
            Self::Dict(_) => "dict",
            Self::Table(_) => "table",
            Self::Op(_) => "op",
            Self::Scalar(_) => "scalar",
        }
    }

    /// The ref this value was reached through.
    pub fn reference(&self) -> Option<&Ref> {
        match self {
            Self::Object(v) => v.node.reference.as_ref(),
            Self::List(v) => v.node.reference.as_ref(),
            Self::Dict(v) => v.node.reference.as_ref(),
            Self::Table(v) => v.reference(),
            Self::Op(op) => op.saved_ref(),
            Self::Scalar(v) => v.node.reference.as_ref(),
        }
    }

    pub fn root(&self) -> Option<&TraceRoot> {
        match self {
            Self::Object(v) => Some(&v.node.root),
            Self::List(v) => Some(&v.node.root),
            Self::Dict(v) => Some(&v.node.root),
            Self::Table(v) => Some(v.root()),
            Self::Op(_) => None,
            Self::Scalar(v) => Some(&v.node.root),
        }
    }

    /// The wrapped value. Tables come back as their table ref.
    pub fn raw(&self) -> Value {
        match self {
            Self::Object(v) => Value::Object(v.record().into_owned()),
            Self::List(v) => Value::List(v.view().into_owned()),
            Self::Dict(v) => Value::Dict(v.view().into_owned()),
            Self::Table(v) => Value::Ref(Ref::Table(v.table_ref().clone())),
            Self::Op(op) => Value::Op(op.clone()),
            Self::Scalar(v) => v.value.clone(),
        }
    }

    pub fn as_object(&self) -> Option<&TraceObject> {
        match self {
            Self::Object(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut TraceObject> {
        match self {
            Self::Object(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&TraceList> {
        match self {
            Self::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut TraceList> {
        match self {
            Self::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&TraceDict> {
        match self {
            Self::Dict(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_dict_mut(&mut self) -> Option<&mut TraceDict> {
        match self {
            Self::Dict(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&TraceTable> {
        match self {
            Self::Table(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_op(&self) -> Option<&Op> {
        match self {
            Self::Op(op) => Some(op),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            Self::Scalar(v) => Some(&v.value),
            _ => None,
        }
    }

    /// Follow one path segment.
    pub fn get<'a>(&'a self, segment: &'a RefSegment) -> BoxFuture<'a, TraceResult<TraceValue>> {
        Box::pin(async move {
            match (segment.edge, self) {
                (EdgeType::Attr, Self::Object(v)) => v.attr(&segment.arg).await,
                (EdgeType::Key, Self::Dict(v)) => v.key(&segment.arg).await,
                (EdgeType::Index, Self::List(v)) => v.index(parse_index(segment)?).await,
                (EdgeType::Index, Self::Table(v)) => v.row(parse_index(segment)?).await,
                (EdgeType::Id, Self::Table(v)) => v.row_by_id(&segment.arg).await,
                (edge, other) => Err(TraceError::NotAContainer {
                    kind: other.kind(),
                    edge: edge.to_string(),
                    arg: segment.arg.clone(),
                }),
            }
        })
    }

    /// Follow a whole extra path.
    pub async fn get_path(&self, path: &[RefSegment]) -> TraceResult<TraceValue> {
        walk(self.clone(), path).await
    }
}

fn parse_index(segment: &RefSegment) -> TraceResult<usize> {
    segment.as_index().ok_or_else(|| TraceError::KeyNotFound {
        key: segment.arg.clone(),
    })
}

async fn walk(start: TraceValue, path: &[RefSegment]) -> TraceResult<TraceValue> {
    let mut current = start;
    for segment in path {
        current = current.get(segment).await?;
    }
    Ok(current)
}

/// Proxy for an [`ObjectRecord`].
///
/// Reads see writes made through any proxy of the same root.
#[derive(Clone, Debug)]
pub struct TraceObject {
    record: ObjectRecord,
    node: Node,
}

impl TraceObject {
    pub fn record(&self) -> Cow<'_, ObjectRecord> {
        match self.node.synced() {
            Some(Value::Object(rec)) => Cow::Owned(rec),
            _ => Cow::Borrowed(&self.record),
        }
    }

    pub fn class_name(&self) -> &str {
        self.record.class_name()
    }

    pub fn reference(&self) -> Option<&Ref> {
        self.node.reference.as_ref()
    }

    pub fn root(&self) -> &TraceRoot {
        &self.node.root
    }

    pub fn field_names(&self) -> Vec<String> {
        self.record().fields().keys().cloned().collect()
    }

    fn receiver(&self) -> Receiver {
        Receiver {
            value: Value::Object(self.record().into_owned()),
            reference: self.node.reference.clone(),
        }
    }

    /// Read a field.
    ///
    /// Data fields come back as proxies addressed by `ref/attr/<name>`.
    /// Ops that take a receiver come back bound to this object; other ops
    /// come back as they are.
    pub async fn attr(&self, name: &str) -> TraceResult<TraceValue> {
        let value = self
            .record()
            .get(name)
            .cloned()
            .ok_or_else(|| TraceError::AttributeNotFound {
                class: self.record.class_name().to_string(),
                name: name.to_string(),
            })?;
        let child = match value {
            Value::Op(op) => TraceValue::Op(op),
            other => {
                self.node
                    .child(other, self.node.extended(RefSegment::attr(name)))
                    .await?
            }
        };
        Ok(match child {
            TraceValue::Op(op) if op.takes_self() && !op.is_bound() => {
                TraceValue::Op(op.bind(self.receiver()))
            }
            other => other,
        })
    }

    /// Write a field, recording a `SetAttr` mutation on the root.
    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<Value>) -> TraceResult<()> {
        let path = self.node.mutation_path("set an attribute")?;
        let (name, value) = (name.into(), value.into());
        self.node.root.record(Mutation::SetAttr {
            path,
            name: name.clone(),
            value: value.clone(),
        });
        self.record.set_field(name, value);
        Ok(())
    }
}

/// Proxy for a list.
#[derive(Clone, Debug)]
pub struct TraceList {
    items: Vec<Value>,
    node: Node,
}

impl TraceList {
    /// The current elements, including writes made through other proxies.
    pub fn view(&self) -> Cow<'_, Vec<Value>> {
        match self.node.synced() {
            Some(Value::List(items)) => Cow::Owned(items),
            _ => Cow::Borrowed(&self.items),
        }
    }

    pub fn len(&self) -> usize {
        self.view().len()
    }

    pub fn is_empty(&self) -> bool {
        self.view().is_empty()
    }

    pub fn reference(&self) -> Option<&Ref> {
        self.node.reference.as_ref()
    }

    pub fn root(&self) -> &TraceRoot {
        &self.node.root
    }

    pub async fn index(&self, index: usize) -> TraceResult<TraceValue> {
        let item = {
            let items = self.view();
            items.get(index).cloned().ok_or(TraceError::IndexOutOfRange {
                index,
                len: items.len(),
            })?
        };
        self.node
            .child(item, self.node.extended(RefSegment::index(index)))
            .await
    }

    /// Every element, each wrapped through [`index`](Self::index).
    pub async fn items(&self) -> TraceResult<Vec<TraceValue>> {
        let len = self.len();
        let mut out = Vec::with_capacity(len);
        for i in 0..len {
            out.push(self.index(i).await?);
        }
        Ok(out)
    }

    pub fn set_index(&mut self, index: usize, value: impl Into<Value>) -> TraceResult<()> {
        self.refresh();
        let len = self.items.len();
        if index >= len {
            return Err(TraceError::IndexOutOfRange { index, len });
        }
        let path = self.node.mutation_path("set an item")?;
        let value = value.into();
        self.node.root.record(Mutation::SetItem {
            path,
            key: index.to_string(),
            value: value.clone(),
        });
        self.items[index] = value;
        Ok(())
    }

    pub fn append(&mut self, value: impl Into<Value>) -> TraceResult<()> {
        let path = self.node.mutation_path("append")?;
        self.refresh();
        let value = value.into();
        self.node.root.record(Mutation::Append {
            path,
            value: value.clone(),
        });
        self.items.push(value);
        Ok(())
    }

    fn refresh(&mut self) {
        if let Some(Value::List(items)) = self.node.synced() {
            self.items = items;
        }
    }
}

/// Proxy for a dict.
#[derive(Clone, Debug)]
pub struct TraceDict {
    map: BTreeMap<String, Value>,
    node: Node,
}

impl TraceDict {
    /// The current entries, including writes made through other proxies.
    pub fn view(&self) -> Cow<'_, BTreeMap<String, Value>> {
        match self.node.synced() {
            Some(Value::Dict(map)) => Cow::Owned(map),
            _ => Cow::Borrowed(&self.map),
        }
    }

    pub fn len(&self) -> usize {
        self.view().len()
    }

    pub fn is_empty(&self) -> bool {
        self.view().is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.view().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.view().keys().cloned().collect()
    }

    pub fn reference(&self) -> Option<&Ref> {
        self.node.reference.as_ref()
    }

    pub fn root(&self) -> &TraceRoot {
        &self.node.root
    }

    pub async fn key(&self, key: &str) -> TraceResult<TraceValue> {
        let value = self
            .view()
            .get(key)
            .cloned()
            .ok_or_else(|| TraceError::KeyNotFound {
                key: key.to_string(),
            })?;
        self.node
            .child(value, self.node.extended(RefSegment::key(key)))
            .await
    }

    /// Every entry, each value wrapped through [`key`](Self::key).
    pub async fn entries(&self) -> TraceResult<Vec<(String, TraceValue)>> {
        let keys = self.keys();
        let mut out = Vec::with_capacity(keys.len());
        for k in keys {
            let value = self.key(&k).await?;
            out.push((k, value));
        }
        Ok(out)
    }

    pub fn set_item(&mut self, key: impl Into<String>, value: impl Into<Value>) -> TraceResult<()> {
        let path = self.node.mutation_path("set an item")?;
        let (key, value) = (key.into(), value.into());
        self.node.root.record(Mutation::SetItem {
            path,
            key: key.clone(),
            value: value.clone(),
        });
        self.map.insert(key, value);
        Ok(())
    }
}

/// A primitive or opaque value that still knows its ref.
#[derive(Clone, Debug)]
pub struct TraceScalar {
    value: Value,
    node: Node,
}

impl TraceScalar {
    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn reference(&self) -> Option<&Ref> {
        self.node.reference.as_ref()
    }
}

fn wrap(value: Value, reference: Option<Ref>, backend: &TraceBackend, root: Option<TraceRoot>) -> TraceValue {
    let root = root.unwrap_or_else(|| TraceRoot::new(reference.clone(), value.clone()));
    let node = Node {
        reference,
        backend: backend.clone(),
        root,
    };
    match value {
        Value::Object(record) => TraceValue::Object(TraceObject { record, node }),
        Value::List(items) => TraceValue::List(TraceList { items, node }),
        Value::Table(table) => TraceValue::List(TraceList {
            items: table.rows().to_vec(),
            node,
        }),
        Value::Dict(map) => TraceValue::Dict(TraceDict { map, node }),
        Value::Op(op) => TraceValue::Op(op),
        other => TraceValue::Scalar(TraceScalar { value: other, node }),
    }
}

fn attach_ref(value: &Value, reference: &ObjectRef) {
    let slot = match value {
        Value::Object(rec) => rec.saved_slot(),
        Value::Table(table) => table.saved_slot(),
        Value::Op(op) => op.saved_slot(),
        _ => return,
    };
    slot.set(Ref::Object(reference.clone()));
}

/// Fetch an object ref and walk its extra path.
///
/// The fetched object becomes a new root addressed by the ref with its
/// digest resolved, so `latest` and `v<N>` never survive a fetch.
pub async fn deref_object(reference: &ObjectRef, backend: &TraceBackend) -> TraceResult<TraceValue> {
    let project_id = reference.project_id();
    let res = backend
        .server()
        .obj_read(ObjReadReq {
            project_id: project_id.clone(),
            object_id: reference.name().to_string(),
            digest: reference.digest().to_string(),
        })
        .await?;
    let resolved = reference.without_extra().with_digest(res.obj.digest);
    tracing::debug!(reference = %resolved, "fetched object");
    let value = backend
        .serializer()
        .from_json(&res.obj.val, &project_id, backend.server())
        .await?;
    attach_ref(&value, &resolved);
    let root = TraceRoot::new(Some(Ref::Object(resolved.clone())), value.clone());
    let top = make_trace_obj(
        TraceInput::Raw(value),
        Some(Ref::Object(resolved)),
        backend,
        Some(root),
    )
    .await?;
    walk(top, reference.extra()).await
}

async fn deref_call(reference: &CallRef, backend: &TraceBackend) -> TraceResult<TraceValue> {
    let base = reference.without_extra();
    let mut res = backend
        .server()
        .refs_read_batch(RefsReadBatchReq {
            refs: vec![base.uri()],
        })
        .await?;
    let json = res.vals.pop().unwrap_or_default();
    let value = backend
        .serializer()
        .from_json(&json, &base.project_id(), backend.server())
        .await?;
    let top = wrap(value, Some(Ref::Call(base)), backend, None);
    walk(top, reference.extra()).await
}

/// Wrap `input`, reached through `reference`, as a trace value.
///
/// - An existing table proxy is re-pointed at `reference`; other proxies and
///   bound ops are returned as they are.
/// - An object ref is fetched and its extra path walked; the fetched object
///   starts a new root.
/// - A table ref becomes a lazily paged [`TraceTable`].
/// - Records, lists and dicts become [`TraceObject`], [`TraceList`] and
///   [`TraceDict`]; anything else becomes a [`TraceScalar`].
///
/// Without a `root`, the result is its own root.
pub fn make_trace_obj<'a>(
    input: TraceInput,
    reference: Option<Ref>,
    backend: &'a TraceBackend,
    root: Option<TraceRoot>,
) -> BoxFuture<'a, TraceResult<TraceValue>> {
    Box::pin(async move {
        let value = match input {
            TraceInput::Traced(TraceValue::Table(mut table)) => {
                if let Some(r) = reference {
                    table.set_reference(r);
                }
                return Ok(TraceValue::Table(table));
            }
            TraceInput::Traced(traced) => return Ok(traced),
            TraceInput::Raw(value) => value,
        };
        match value {
            Value::Op(op) if op.is_bound() => Ok(TraceValue::Op(op)),
            Value::Ref(Ref::Object(obj_ref)) => deref_object(&obj_ref, backend).await,
            Value::Ref(Ref::Table(table_ref)) => {
                let base = table_ref.without_extra();
                let addressed = reference.unwrap_or_else(|| Ref::Table(base.clone()));
                let root = root.unwrap_or_else(|| {
                    TraceRoot::new(Some(addressed.clone()), Value::Ref(Ref::Table(base.clone())))
                });
                let table = TraceTable::new(base, addressed, backend.clone(), root);
                walk(TraceValue::Table(table), table_ref.extra()).await
            }
            Value::Ref(Ref::Call(call_ref)) => deref_call(&call_ref, backend).await,
            other => Ok(wrap(other, reference, backend, root)),
        }
    })
}
