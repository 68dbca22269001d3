//! Publishing objects and recording calls.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Map, Value as JsonValue};
use weave_serialize::{op_record, SerializeContext};
use weave_server::{
    CallEndReq, CallSchema, CallStartReq, CallUpdateReq, CallsDeleteReq, CallsFilter,
    CallsQueryReq, EndedCallSchema, ObjCreateReq, ObjDeleteReq, ObjReadReq, ServerError,
    StartedCallSchema, TableCreateReq, TraceServer,
};
use weave_trace::{
    current_call, current_stack, generate_id, make_trace_obj, pop_call, push_call, scoped, Call,
    CallData, TraceBackend, TraceInput, TraceValue,
};
use weave_types::{
    parse_uri, sanitize_object_name, split_project_id, ObjectRef, Op, Ref, Table, TableRef, Value,
};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::summary::{llm_usage_summary, merge_into, sum_summaries, Summary};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a call records as its op.
#[derive(Clone, Debug)]
pub enum CallTarget {
    /// A traceable op; it is published first and the call records its URI.
    Op(Op),
    /// A literal name for an anonymous op.
    Name(String),
}

impl From<Op> for CallTarget {
    fn from(op: Op) -> Self {
        Self::Op(op)
    }
}

impl From<&Op> for CallTarget {
    fn from(op: &Op) -> Self {
        Self::Op(op.clone())
    }
}

impl From<&str> for CallTarget {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for CallTarget {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

/// Options for [`WeaveClient::create_call`].
#[derive(Clone, Debug)]
pub struct CallOptions {
    /// Explicit parent. Takes precedence over the call stack.
    pub parent: Option<Call>,
    pub attributes: BTreeMap<String, Value>,
    pub display_name: Option<String>,
    /// Take the parent from the call stack and push the new call onto it.
    pub use_stack: bool,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            parent: None,
            attributes: BTreeMap::new(),
            display_name: None,
            use_stack: true,
        }
    }
}

impl CallOptions {
    pub fn with_parent(mut self, parent: &Call) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn without_stack(mut self) -> Self {
        self.use_stack = false;
        self
    }
}

/// Pops a call off the stack when dropped, so a failed or cancelled finish
/// never leaves it behind.
struct StackGuard<'a> {
    call: &'a Call,
}

impl Drop for StackGuard<'_> {
    fn drop(&mut self) {
        let on_stack = current_stack()
            .calls()
            .iter()
            .any(|c| c.same_call(self.call));
        if on_stack {
            pop_call(Some(&self.call.id()));
        }
    }
}

/// Client for one `<entity>/<project>`.
///
/// Cheap to clone; clones share the server handle, serializers and caches.
#[derive(Clone)]
pub struct WeaveClient {
    entity: String,
    project: String,
    server: Arc<dyn TraceServer>,
    serializer: SerializeContext,
    backend: TraceBackend,
}

impl WeaveClient {
    pub fn new(
        entity: impl Into<String>,
        project: impl Into<String>,
        server: Arc<dyn TraceServer>,
    ) -> ClientResult<Self> {
        Self::with_serializer(entity, project, server, SerializeContext::default())
    }

    /// Create a client with caller-supplied serializers, caches and op catalog.
    pub fn with_serializer(
        entity: impl Into<String>,
        project: impl Into<String>,
        server: Arc<dyn TraceServer>,
        serializer: SerializeContext,
    ) -> ClientResult<Self> {
        let (entity, project) = (entity.into(), project.into());
        split_project_id(&format!("{entity}/{project}"))?;
        let backend = TraceBackend::new(server.clone(), serializer.clone());
        Ok(Self {
            entity,
            project,
            server,
            serializer,
            backend,
        })
    }

    pub fn from_config(config: &ClientConfig, server: Arc<dyn TraceServer>) -> ClientResult<Self> {
        config.project_id()?;
        let mut client = Self::new(config.entity.clone(), config.project.clone(), server)?;
        client.backend = client
            .backend
            .with_table_paging(config.table.page_size, config.table.cache_pages);
        Ok(client)
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn project_id(&self) -> String {
        format!("{}/{}", self.entity, self.project)
    }

    pub fn server(&self) -> &dyn TraceServer {
        self.server.as_ref()
    }

    pub fn serializer(&self) -> &SerializeContext {
        &self.serializer
    }

    pub fn backend(&self) -> &TraceBackend {
        &self.backend
    }

    // ---- Objects ----

    /// Publish `value` as a new version of the object `name`.
    ///
    /// Nested records, tables and ops without a ref are saved first and
    /// replaced by their refs. The new ref is attached to `value`, so saving
    /// the same in-memory value again elsewhere reuses it. Publishing content
    /// identical to an existing version returns that version's digest.
    pub async fn publish(&self, value: &Value, name: &str) -> ClientResult<ObjectRef> {
        self.save_object(value, name).await
    }

    /// Publish an op under its own name and make its implementation
    /// resolvable when the record is loaded back in this process.
    pub async fn save_op(&self, op: &Op) -> ClientResult<ObjectRef> {
        if let Some(Ref::Object(r)) = op.saved_ref() {
            return Ok(r.clone());
        }
        self.save_op_as(op, op.name()).await
    }

    async fn save_op_as(&self, op: &Op, name: &str) -> ClientResult<ObjectRef> {
        self.serializer.catalog().register(op)?;
        let reference = self.create_object(name, op_record(op)).await?;
        op.saved_slot().set(Ref::Object(reference.clone()));
        Ok(reference)
    }

    /// Save a table's rows. Rows keep their shape; only values nested
    /// inside them are replaced by refs.
    pub async fn save_table(&self, table: &Table) -> ClientResult<TableRef> {
        if let Some(Ref::Table(r)) = table.saved_ref() {
            return Ok(r.clone());
        }
        let project_id = self.project_id();
        let mut rows = Vec::with_capacity(table.len());
        for row in table.rows() {
            let mapped = self.map_children(row).await?;
            rows.push(self.serializer.to_json(&mapped, &project_id, self.server()).await?);
        }
        let res = self
            .server
            .table_create(TableCreateReq {
                project_id,
                rows,
            })
            .await?;
        let reference = TableRef::new(self.entity.clone(), self.project.clone(), res.digest)?;
        tracing::debug!(table = %reference, rows = table.len(), "saved table");
        table.saved_slot().set(Ref::Table(reference.clone()));
        Ok(reference)
    }

    async fn save_object(&self, value: &Value, name: &str) -> ClientResult<ObjectRef> {
        let mapped = match value {
            Value::Custom(custom) if !self.serializer.is_persistable(custom) => {
                return Err(ClientError::NotPersistable {
                    type_name: custom.type_name().to_string(),
                });
            }
            Value::Op(op) => return self.save_op_as(op, name).await,
            other => self.map_children(other).await?,
        };
        let val = self
            .serializer
            .to_json(&mapped, &self.project_id(), self.server())
            .await?;
        let reference = self.create_object(name, val).await?;
        if let Some(slot) = saved_slot(value) {
            slot.set(Ref::Object(reference.clone()));
        }
        Ok(reference)
    }

    async fn create_object(&self, name: &str, val: JsonValue) -> ClientResult<ObjectRef> {
        let object_id = sanitize_object_name(name)?;
        let res = self
            .server
            .obj_create(ObjCreateReq {
                project_id: self.project_id(),
                object_id: object_id.clone(),
                val,
            })
            .await?;
        let reference = ObjectRef::new(self.entity.clone(), self.project.clone(), object_id, res.digest)?;
        tracing::debug!(object = %reference, "published object");
        Ok(reference)
    }

    /// `value` with every nested record, table and op replaced by its ref,
    /// saving the ones that have none yet. Each in-memory value is saved at
    /// most once.
    pub fn map_to_refs<'a>(&'a self, value: &'a Value) -> BoxFuture<'a, ClientResult<Value>> {
        Box::pin(async move {
            Ok(match value {
                Value::Object(rec) => match rec.saved_ref() {
                    Some(r) => Value::Ref(r.clone()),
                    None => Value::Ref(Ref::Object(self.save_object(value, rec.class_name()).await?)),
                },
                Value::Table(table) => match table.saved_ref() {
                    Some(r) => Value::Ref(r.clone()),
                    None => Value::Ref(Ref::Table(self.save_table(table).await?)),
                },
                Value::Op(op) => Value::Ref(Ref::Object(self.save_op(op).await?)),
                Value::List(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.map_to_refs(item).await?);
                    }
                    Value::List(out)
                }
                Value::Dict(map) => Value::Dict(self.map_entries(map).await?),
                other => other.clone(),
            })
        })
    }

    /// Like [`map_to_refs`](Self::map_to_refs), but a top-level record keeps
    /// its shape.
    async fn map_children(&self, value: &Value) -> ClientResult<Value> {
        match value {
            Value::Object(rec) => Ok(Value::Object(rec.map_fields(self.map_entries(rec.fields()).await?))),
            other => self.map_to_refs(other).await,
        }
    }

    async fn map_entries(&self, map: &BTreeMap<String, Value>) -> ClientResult<BTreeMap<String, Value>> {
        let mut out = BTreeMap::new();
        for (k, v) in map {
            out.insert(k.clone(), self.map_to_refs(v).await?);
        }
        Ok(out)
    }

    /// Fetch the value behind `reference` as a trace proxy.
    pub async fn get(&self, reference: impl Into<Ref>) -> ClientResult<TraceValue> {
        let value = Value::Ref(reference.into());
        Ok(make_trace_obj(TraceInput::Raw(value), None, &self.backend, None).await?)
    }

    pub async fn get_uri(&self, uri: &str) -> ClientResult<TraceValue> {
        self.get(parse_uri(uri)?).await
    }

    /// Delete one object version. `latest` and `v<N>` are resolved first.
    pub async fn delete(&self, reference: &ObjectRef) -> ClientResult<usize> {
        let digest = if reference.has_placeholder_digest() {
            self.server
                .obj_read(ObjReadReq {
                    project_id: reference.project_id(),
                    object_id: reference.name().to_string(),
                    digest: reference.digest().to_string(),
                })
                .await?
                .obj
                .digest
        } else {
            reference.digest().to_string()
        };
        let res = self
            .server
            .obj_delete(ObjDeleteReq {
                project_id: reference.project_id(),
                object_id: reference.name().to_string(),
                digests: Some(vec![digest]),
            })
            .await?;
        tracing::debug!(object = %reference, deleted = res.num_deleted, "deleted object version");
        Ok(res.num_deleted)
    }

    /// Delete every version of the object `name`.
    pub async fn delete_all_versions(&self, name: &str) -> ClientResult<usize> {
        let res = self
            .server
            .obj_delete(ObjDeleteReq {
                project_id: self.project_id(),
                object_id: sanitize_object_name(name)?,
                digests: None,
            })
            .await?;
        Ok(res.num_deleted)
    }

    /// Publish the root of `value` again with its local mutations applied.
    ///
    /// Returns the root's current ref unchanged when nothing was mutated.
    pub async fn save_mutated(&self, value: &TraceValue) -> ClientResult<ObjectRef> {
        let root = value
            .root()
            .ok_or_else(|| ClientError::InvalidArgument(format!("a {} has no root to save", value.kind())))?;
        let Some(Ref::Object(root_ref)) = root.reference() else {
            return Err(ClientError::InvalidArgument(
                "only values fetched through an object ref can be saved".into(),
            ));
        };
        if !root.is_dirty() {
            return Ok(root_ref.clone());
        }
        tracing::debug!(object = %root_ref, mutations = root.mutations().len(), "saving mutated object");
        self.publish(&root.value(), root_ref.name()).await
    }

    // ---- Calls ----

    /// Run `fut` as a trace scope.
    ///
    /// Calls created inside `fut` nest through a call stack private to this
    /// scope, seeded with the caller's open calls. Concurrent scopes never
    /// see each other's calls.
    pub async fn trace<F: Future>(&self, fut: F) -> F::Output {
        scoped(fut).await
    }

    /// Start a call and, with `use_stack`, push it onto the call stack.
    ///
    /// The stack only exists inside a scope such as [`WeaveClient::trace`];
    /// elsewhere the call has no stack parent and is not pushed.
    pub async fn create_call(
        &self,
        target: impl Into<CallTarget>,
        inputs: BTreeMap<String, Value>,
        options: CallOptions,
    ) -> ClientResult<Call> {
        let op_name = match target.into() {
            CallTarget::Op(op) => self.save_op(&op).await?.uri(),
            CallTarget::Name(name) => name,
        };
        let inputs = self.map_entries(&inputs).await?;

        let parent = options
            .parent
            .or_else(|| options.use_stack.then(current_call).flatten());
        let (trace_id, parent_id) = match &parent {
            Some(p) => (p.trace_id(), Some(p.id())),
            None => (generate_id(), None),
        };
        let mut data = CallData::new(self.project_id(), op_name, trace_id, parent_id);
        data.display_name = options.display_name;
        let start = StartedCallSchema {
            project_id: data.project_id.clone(),
            id: data.id.clone(),
            op_name: data.op_name.clone(),
            display_name: data.display_name.clone(),
            trace_id: data.trace_id.clone(),
            parent_id: data.parent_id.clone(),
            started_at: data.started_at,
            attributes: self.json_map(&options.attributes).await?,
            inputs: self.json_map(&inputs).await?,
        };
        data.inputs = inputs;
        data.attributes = options.attributes;

        self.server.call_start(CallStartReq { start }).await?;
        let call = Call::new(data);
        if let Some(parent) = &parent {
            parent.add_child(call.clone());
        }
        if options.use_stack {
            push_call(call.clone());
        }
        tracing::debug!(call_id = %call.id(), op = %call.op_name(), "call started");
        Ok(call)
    }

    /// Finish a call with its output or exception summary.
    ///
    /// The summary is the merge of the children's summaries, or an LLM
    /// usage summary taken from the output, merged with whatever the call
    /// already carries. The call is popped off the stack by id even if
    /// recording the end fails.
    pub async fn finish_call(
        &self,
        call: &Call,
        output: Option<Value>,
        exception: Option<String>,
    ) -> ClientResult<()> {
        let _guard = StackGuard { call };
        let children = call.children();
        let mut summary = if children.is_empty() {
            output.as_ref().and_then(llm_usage_summary).unwrap_or_default()
        } else {
            let child_summaries: Vec<Summary> = children.iter().map(Call::summary).collect();
            sum_summaries(&child_summaries)
        };
        merge_into(&mut summary, &call.summary());

        let output = match output {
            Some(value) => Some(self.map_to_refs(&value).await?),
            None => None,
        };
        call.set_output(output.clone());
        call.set_exception(exception.clone());
        call.set_summary(summary.clone());
        let ended_at = call.mark_ended();

        let output = match &output {
            Some(value) => Some(
                self.serializer
                    .to_json(value, &self.project_id(), self.server())
                    .await?,
            ),
            None => None,
        };
        let end = EndedCallSchema {
            project_id: self.project_id(),
            id: call.id(),
            ended_at,
            exception,
            output,
            summary,
        };
        self.server.call_end(CallEndReq { end }).await?;
        tracing::debug!(call_id = %call.id(), "call finished");
        Ok(())
    }

    /// Run `op` as a traced call in its own scope, parented by the caller's
    /// innermost open call.
    ///
    /// A bound op records its receiver as the `self` input. An op failure is
    /// recorded on the call and returned as [`ClientError::OpFailed`].
    pub async fn invoke(
        &self,
        op: &Op,
        inputs: BTreeMap<String, Value>,
        options: CallOptions,
    ) -> ClientResult<Value> {
        let mut recorded = inputs.clone();
        if let Some(receiver) = op.receiver() {
            let this = match &receiver.reference {
                Some(r) => Value::Ref(r.clone()),
                None => receiver.value.clone(),
            };
            recorded.insert("self".into(), this);
        }
        scoped(async {
            let call = self.create_call(op, recorded, options).await?;
            match op.call(inputs) {
                Ok(output) => {
                    self.finish_call(&call, Some(output.clone()), None).await?;
                    Ok(output)
                }
                Err(failure) => {
                    self.finish_call(&call, None, Some(failure.to_string())).await?;
                    Err(failure.into())
                }
            }
        })
        .await
    }

    async fn json_map(&self, map: &BTreeMap<String, Value>) -> ClientResult<Map<String, JsonValue>> {
        let project_id = self.project_id();
        let mut out = Map::new();
        for (k, v) in map {
            out.insert(k.clone(), self.serializer.to_json(v, &project_id, self.server()).await?);
        }
        Ok(out)
    }

    /// Stored calls matching `filter`, oldest first.
    pub async fn calls(&self, filter: CallsFilter) -> ClientResult<Vec<CallSchema>> {
        let res = self
            .server
            .calls_query(CallsQueryReq {
                project_id: self.project_id(),
                filter,
                limit: None,
            })
            .await?;
        Ok(res.calls)
    }

    pub async fn get_call(&self, call_id: &str) -> ClientResult<CallSchema> {
        let filter = CallsFilter {
            call_ids: Some(vec![call_id.to_string()]),
            ..CallsFilter::default()
        };
        self.calls(filter).await?.into_iter().next().ok_or_else(|| {
            ServerError::CallNotFound {
                project_id: self.project_id(),
                call_id: call_id.to_string(),
            }
            .into()
        })
    }

    /// Delete calls and their descendants.
    pub async fn delete_calls(&self, call_ids: &[String]) -> ClientResult<usize> {
        let res = self
            .server
            .calls_delete(CallsDeleteReq {
                project_id: self.project_id(),
                call_ids: call_ids.to_vec(),
            })
            .await?;
        Ok(res.num_deleted)
    }

    pub async fn set_call_display_name(&self, call: &Call, name: Option<String>) -> ClientResult<()> {
        self.server
            .call_update(CallUpdateReq {
                project_id: self.project_id(),
                call_id: call.id(),
                display_name: name.clone(),
            })
            .await?;
        call.set_display_name(name);
        Ok(())
    }
}

impl std::fmt::Debug for WeaveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeaveClient")
            .field("project_id", &self.project_id())
            .field("serializer", &self.serializer)
            .finish()
    }
}

fn saved_slot(value: &Value) -> Option<&weave_types::SavedRef> {
    match value {
        Value::Object(rec) => Some(rec.saved_slot()),
        Value::Table(table) => Some(table.saved_slot()),
        Value::Op(op) => Some(op.saved_slot()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_server::InMemoryTraceServer;
    use weave_trace::{with_run_stack, CallStack};
    use weave_types::{CustomValue, ObjectRecord, OpFailure};

    fn client() -> (Arc<InMemoryTraceServer>, WeaveClient) {
        let server = Arc::new(InMemoryTraceServer::new());
        let client = WeaveClient::new("team", "proj", server.clone()).unwrap();
        (server, client)
    }

    #[test]
    fn project_id_is_validated() {
        let server = Arc::new(InMemoryTraceServer::new());
        assert!(WeaveClient::new("", "p", server.clone()).is_err());
        assert!(WeaveClient::new("e", "a/b", server).is_err());
    }

    #[tokio::test]
    async fn nested_records_are_saved_once_bottom_up() {
        let (server, client) = client();
        let shared = ObjectRecord::new("Tokenizer").with_field("vocab", 100);
        let model = ObjectRecord::new("Model")
            .with_field("enc", shared.clone())
            .with_field("dec", shared.clone());
        let value = Value::from(model);
        let r = client.publish(&value, "model").await.unwrap();

        assert_eq!(server.version_count("team/proj", "Tokenizer"), 1);
        assert_eq!(server.stats().obj_create, 2);
        assert!(shared.saved_ref().is_some());
        assert_eq!(value.saved_ref(), Some(&Ref::Object(r.clone())));

        let fetched = client.get(r).await.unwrap();
        let enc = fetched.as_object().unwrap().attr("enc").await.unwrap();
        assert_eq!(enc.reference(), shared.saved_ref());
    }

    #[tokio::test]
    async fn republishing_identical_content_dedupes() {
        let (server, client) = client();
        let value = Value::dict([("a", Value::dict([("b", 1)]))]);
        let first = client.publish(&value, "cfg").await.unwrap();
        let second = client.publish(&value.clone(), "cfg").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(server.version_count("team/proj", "cfg"), 1);
    }

    #[tokio::test]
    async fn unregistered_custom_values_are_rejected() {
        #[derive(Debug)]
        struct Opaque;
        let (_, client) = client();
        let err = client
            .publish(&CustomValue::new(Opaque).into(), "x")
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NotPersistable { .. }));
    }

    #[tokio::test]
    async fn identical_ops_share_a_version() {
        let (server, client) = client();
        let make = |step: i64| Op::new("add", "return x + step", |_| Ok(Value::Null)).with_closure("step", step);
        let a = client.save_op(&make(1)).await.unwrap();
        let b = client.save_op(&make(1)).await.unwrap();
        let c = client.save_op(&make(2)).await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a.digest(), c.digest());
        assert_eq!(server.version_count("team/proj", "add"), 2);
    }

    #[tokio::test]
    async fn calls_nest_through_the_stack() {
        let (server, client) = client();
        with_run_stack(CallStack::new(), async {
            let root = client
                .create_call("root", BTreeMap::new(), CallOptions::default())
                .await
                .unwrap();
            let child = client
                .create_call("child", BTreeMap::new(), CallOptions::default())
                .await
                .unwrap();
            assert_eq!(child.parent_id(), Some(root.id()));
            assert_eq!(child.trace_id(), root.trace_id());
            assert_eq!(current_stack().len(), 2);

            client.finish_call(&child, Some(Value::Int(1)), None).await.unwrap();
            client.finish_call(&root, None, None).await.unwrap();
            assert!(current_stack().is_empty());
        })
        .await;
        assert_eq!(server.call_count(), 2);
    }

    #[tokio::test]
    async fn explicit_parent_and_no_stack() {
        let (_, client) = client();
        with_run_stack(CallStack::new(), async {
            let parent = client
                .create_call("p", BTreeMap::new(), CallOptions::default().without_stack())
                .await
                .unwrap();
            assert!(current_stack().is_empty());
            let child = client
                .create_call("c", BTreeMap::new(), CallOptions::default().with_parent(&parent))
                .await
                .unwrap();
            assert_eq!(child.parent_id(), Some(parent.id()));
            assert_eq!(parent.children().len(), 1);
            client.finish_call(&child, None, None).await.unwrap();
            client.finish_call(&parent, None, None).await.unwrap();
            assert!(current_stack().is_empty());
        })
        .await;
    }

    #[tokio::test]
    async fn invoke_records_failures() {
        let (_, client) = client();
        let boom = Op::new("boom", "raise", |_| Err(OpFailure::new("ValueError", "bad input")));
        let err = with_run_stack(CallStack::new(), client.invoke(&boom, BTreeMap::new(), CallOptions::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::OpFailed(ref f) if f.kind == "ValueError"));

        let calls = client.calls(CallsFilter::default()).await.unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].exception.as_deref(), Some("ValueError: bad input"));
        assert!(calls[0].op_name.starts_with("weave://team/proj/object/boom:"));
    }

    #[tokio::test]
    async fn finish_pops_even_when_the_server_fails() {
        let (_, client) = client();
        with_run_stack(CallStack::new(), async {
            let call = client
                .create_call("c", BTreeMap::new(), CallOptions::default())
                .await
                .unwrap();
            // A record whose class name cannot become an object id.
            let bad = ObjectRecord::new("///");
            let err = client.finish_call(&call, Some(bad.into()), None).await;
            assert!(err.is_err());
            assert!(current_stack().is_empty());
        })
        .await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn plain_tasks_build_separate_traces() {
        let (_, client) = client();
        let run = |name: &'static str, in_trace: bool| {
            let client = client.clone();
            tokio::spawn(async move {
                let body = async {
                    let root = client.create_call(name, BTreeMap::new(), CallOptions::default()).await.unwrap();
                    tokio::task::yield_now().await;
                    let step = client.create_call("step", BTreeMap::new(), CallOptions::default()).await.unwrap();
                    tokio::task::yield_now().await;
                    client.finish_call(&step, None, None).await.unwrap();
                    client.finish_call(&root, None, None).await.unwrap();
                    (root, step)
                };
                if in_trace {
                    client.trace(body).await
                } else {
                    body.await
                }
            })
        };

        let (left, right) = (run("left", true), run("right", true));
        let (left_root, left_step) = left.await.unwrap();
        let (right_root, right_step) = right.await.unwrap();
        assert_eq!(left_root.parent_id(), None);
        assert_eq!(right_root.parent_id(), None);
        assert_eq!(left_step.parent_id(), Some(left_root.id()));
        assert_eq!(right_step.parent_id(), Some(right_root.id()));

        // Unscoped tasks get no stack at all, so nothing is cross-linked.
        let (left, right) = (run("left", false), run("right", false));
        for (root, step) in [left.await.unwrap(), right.await.unwrap()] {
            assert_eq!(root.parent_id(), None);
            assert_eq!(step.parent_id(), None);
            assert_ne!(step.trace_id(), root.trace_id());
        }
    }

    #[tokio::test]
    async fn invoke_nests_under_the_open_call_and_leaves_the_stack() {
        let (_, client) = client();
        let double = Op::new("double", "return x * 2", |args| {
            Ok(Value::Int(args.input("x").and_then(Value::as_i64).unwrap_or(0) * 2))
        });
        client
            .trace(async {
                let root = client.create_call("root", BTreeMap::new(), CallOptions::default()).await.unwrap();
                let out = client
                    .invoke(&double, BTreeMap::from([("x".to_string(), Value::Int(4))]), CallOptions::default())
                    .await
                    .unwrap();
                assert_eq!(out, Value::Int(8));
                assert_eq!(root.children().len(), 1);
                assert_eq!(current_stack().len(), 1);
                client.finish_call(&root, None, None).await.unwrap();
            })
            .await;
        assert!(current_stack().is_empty());
        let unscoped = client.invoke(&double, BTreeMap::new(), CallOptions::default()).await.unwrap();
        assert_eq!(unscoped, Value::Int(0));
    }

    #[tokio::test]
    async fn display_name_updates_server_and_call() {
        let (_, client) = client();
        let call = client
            .create_call("c", BTreeMap::new(), CallOptions::default().without_stack())
            .await
            .unwrap();
        client
            .set_call_display_name(&call, Some("renamed".into()))
            .await
            .unwrap();
        assert_eq!(call.display_name().as_deref(), Some("renamed"));
        let stored = client.get_call(&call.id()).await.unwrap();
        assert_eq!(stored.display_name.as_deref(), Some("renamed"));
        assert!(client.get_call("missing").await.unwrap_err().is_not_found());
    }
}
