//! In-process call records.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value as JsonValue};
use weave_types::{split_project_id, CallRef, TypeResult, Value};

/// Generate a new call or trace id.
pub fn generate_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// Fields of one op invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct CallData {
    pub id: String,
    pub trace_id: String,
    pub project_id: String,
    /// Ref URI of the persisted op, or a literal name for anonymous ops.
    pub op_name: String,
    pub display_name: Option<String>,
    pub parent_id: Option<String>,
    pub inputs: BTreeMap<String, Value>,
    pub attributes: BTreeMap<String, Value>,
    pub output: Option<Value>,
    pub exception: Option<String>,
    pub summary: Map<String, JsonValue>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl CallData {
    pub fn new(
        project_id: impl Into<String>,
        op_name: impl Into<String>,
        trace_id: impl Into<String>,
        parent_id: Option<String>,
    ) -> Self {
        Self {
            id: generate_id(),
            trace_id: trace_id.into(),
            project_id: project_id.into(),
            op_name: op_name.into(),
            display_name: None,
            parent_id,
            inputs: BTreeMap::new(),
            attributes: BTreeMap::new(),
            output: None,
            exception: None,
            summary: Map::new(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }
}

struct CallState {
    data: CallData,
    children: Vec<Call>,
}

/// Shared handle to a live call.
///
/// Clones refer to the same call: output, summary and children written
/// through one clone are visible through all of them.
#[derive(Clone)]
pub struct Call(Arc<RwLock<CallState>>);

impl Call {
    pub fn new(data: CallData) -> Self {
        Self(Arc::new(RwLock::new(CallState {
            data,
            children: Vec::new(),
        })))
    }

    fn read<R>(&self, f: impl FnOnce(&CallState) -> R) -> R {
        f(&self.0.read().expect("lock poisoned"))
    }

    fn write<R>(&self, f: impl FnOnce(&mut CallState) -> R) -> R {
        f(&mut self.0.write().expect("lock poisoned"))
    }

    pub fn id(&self) -> String {
        self.read(|s| s.data.id.clone())
    }

    pub fn trace_id(&self) -> String {
        self.read(|s| s.data.trace_id.clone())
    }

    pub fn project_id(&self) -> String {
        self.read(|s| s.data.project_id.clone())
    }

    pub fn op_name(&self) -> String {
        self.read(|s| s.data.op_name.clone())
    }

    pub fn parent_id(&self) -> Option<String> {
        self.read(|s| s.data.parent_id.clone())
    }

    pub fn display_name(&self) -> Option<String> {
        self.read(|s| s.data.display_name.clone())
    }

    pub fn set_display_name(&self, name: Option<String>) {
        self.write(|s| s.data.display_name = name);
    }

    pub fn inputs(&self) -> BTreeMap<String, Value> {
        self.read(|s| s.data.inputs.clone())
    }

    pub fn output(&self) -> Option<Value> {
        self.read(|s| s.data.output.clone())
    }

    pub fn set_output(&self, output: Option<Value>) {
        self.write(|s| s.data.output = output);
    }

    pub fn exception(&self) -> Option<String> {
        self.read(|s| s.data.exception.clone())
    }

    pub fn set_exception(&self, exception: Option<String>) {
        self.write(|s| s.data.exception = exception);
    }

    pub fn summary(&self) -> Map<String, JsonValue> {
        self.read(|s| s.data.summary.clone())
    }

    pub fn set_summary(&self, summary: Map<String, JsonValue>) {
        self.write(|s| s.data.summary = summary);
    }

    pub fn attributes(&self) -> BTreeMap<String, Value> {
        self.read(|s| s.data.attributes.clone())
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.read(|s| s.data.started_at)
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.read(|s| s.data.ended_at)
    }

    pub fn is_finished(&self) -> bool {
        self.ended_at().is_some()
    }

    /// Stamp the end time. Returns it.
    pub fn mark_ended(&self) -> DateTime<Utc> {
        let now = Utc::now();
        self.write(|s| s.data.ended_at = Some(now));
        now
    }

    /// Children recorded while this call was open, in start order.
    pub fn children(&self) -> Vec<Call> {
        self.read(|s| s.children.clone())
    }

    pub fn add_child(&self, child: Call) {
        self.write(|s| s.children.push(child));
    }

    pub fn data(&self) -> CallData {
        self.read(|s| s.data.clone())
    }

    /// `true` if both handles refer to the same live call.
    pub fn same_call(&self, other: &Call) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn reference(&self) -> TypeResult<CallRef> {
        self.read(|s| {
            let (entity, project) = split_project_id(&s.data.project_id)?;
            CallRef::new(entity, project, s.data.id.clone())
        })
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.read(|s| {
            f.debug_struct("Call")
                .field("id", &s.data.id)
                .field("op_name", &s.data.op_name)
                .field("parent_id", &s.data.parent_id)
                .field("finished", &s.data.ended_at.is_some())
                .field("children", &s.children.len())
                .finish()
        })
    }
}
