//! Request and response records exchanged with a trace server.
//!
//! Values travel as JSON produced by the serialize pipeline. Timestamps are
//! UTC. Every request is scoped by a `project_id` of the form
//! `"<entity>/<project>"`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

// ---------------------------------------------------------------------------
// Objects
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjCreateReq {
    pub project_id: String,
    pub object_id: String,
    pub val: JsonValue,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjCreateRes {
    pub digest: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjReadReq {
    pub project_id: String,
    pub object_id: String,
    /// Content digest, `latest`, or `v<N>`.
    pub digest: String,
}

/// One stored object version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjSchema {
    pub project_id: String,
    pub object_id: String,
    pub digest: String,
    pub version_index: u64,
    pub is_latest: bool,
    pub val: JsonValue,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjReadRes {
    pub obj: ObjSchema,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjDeleteReq {
    pub project_id: String,
    pub object_id: String,
    /// Versions to delete; `None` deletes every live version.
    pub digests: Option<Vec<String>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjDeleteRes {
    pub num_deleted: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefsReadBatchReq {
    pub refs: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefsReadBatchRes {
    pub vals: Vec<JsonValue>,
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableCreateReq {
    pub project_id: String,
    pub rows: Vec<JsonValue>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCreateRes {
    pub digest: String,
    pub row_digests: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableQueryReq {
    pub project_id: String,
    pub digest: String,
    pub offset: usize,
    pub limit: Option<usize>,
}

/// A table row with the digest usable as an `id` edge argument.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableRowSchema {
    pub digest: String,
    pub val: JsonValue,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableQueryRes {
    pub rows: Vec<TableRowSchema>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableQueryStatsReq {
    pub project_id: String,
    pub digest: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableQueryStatsRes {
    pub count: usize,
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCreateReq {
    pub project_id: String,
    pub name: String,
    pub content: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCreateRes {
    pub digest: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContentReadReq {
    pub project_id: String,
    pub digest: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContentReadRes {
    pub content: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Calls
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StartedCallSchema {
    pub project_id: String,
    pub id: String,
    pub op_name: String,
    pub display_name: Option<String>,
    pub trace_id: String,
    pub parent_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub attributes: Map<String, JsonValue>,
    pub inputs: Map<String, JsonValue>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EndedCallSchema {
    pub project_id: String,
    pub id: String,
    pub ended_at: DateTime<Utc>,
    pub exception: Option<String>,
    pub output: Option<JsonValue>,
    pub summary: Map<String, JsonValue>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallStartReq {
    pub start: StartedCallSchema,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallStartRes {
    pub id: String,
    pub trace_id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallEndReq {
    pub end: EndedCallSchema,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEndRes {}

/// A call as stored by the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallSchema {
    pub project_id: String,
    pub id: String,
    pub op_name: String,
    pub display_name: Option<String>,
    pub trace_id: String,
    pub parent_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub attributes: Map<String, JsonValue>,
    pub inputs: Map<String, JsonValue>,
    pub output: Option<JsonValue>,
    pub exception: Option<String>,
    pub summary: Option<Map<String, JsonValue>>,
}

impl From<StartedCallSchema> for CallSchema {
    fn from(start: StartedCallSchema) -> Self {
        Self {
            project_id: start.project_id,
            id: start.id,
            op_name: start.op_name,
            display_name: start.display_name,
            trace_id: start.trace_id,
            parent_id: start.parent_id,
            started_at: start.started_at,
            ended_at: None,
            attributes: start.attributes,
            inputs: start.inputs,
            output: None,
            exception: None,
            summary: None,
        }
    }
}

/// Filter for [`CallsQueryReq`]. Empty lists and `None` match everything.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallsFilter {
    pub op_names: Option<Vec<String>>,
    pub trace_ids: Option<Vec<String>>,
    pub parent_ids: Option<Vec<String>>,
    pub call_ids: Option<Vec<String>>,
    #[serde(default)]
    pub trace_roots_only: bool,
}

impl CallsFilter {
    pub fn matches(&self, call: &CallSchema) -> bool {
        fn allowed(list: &Option<Vec<String>>, value: &str) -> bool {
            list.as_ref().map_or(true, |l| l.iter().any(|v| v == value))
        }
        allowed(&self.op_names, &call.op_name)
            && allowed(&self.trace_ids, &call.trace_id)
            && allowed(&self.call_ids, &call.id)
            && self
                .parent_ids
                .as_ref()
                .map_or(true, |l| call.parent_id.as_ref().is_some_and(|p| l.contains(p)))
            && (!self.trace_roots_only || call.parent_id.is_none())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallsQueryReq {
    pub project_id: String,
    #[serde(default)]
    pub filter: CallsFilter,
    pub limit: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallsQueryRes {
    pub calls: Vec<CallSchema>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallsDeleteReq {
    pub project_id: String,
    pub call_ids: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallsDeleteRes {
    pub num_deleted: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallUpdateReq {
    pub project_id: String,
    pub call_id: String,
    pub display_name: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallUpdateRes {}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str, parent: Option<&str>) -> CallSchema {
        CallSchema {
            project_id: "e/p".into(),
            id: id.into(),
            op_name: "op".into(),
            display_name: None,
            trace_id: "t".into(),
            parent_id: parent.map(str::to_string),
            started_at: Utc::now(),
            ended_at: None,
            attributes: Map::new(),
            inputs: Map::new(),
            output: None,
            exception: None,
            summary: None,
        }
    }

    #[test]
    fn empty_filter_matches_all() {
        assert!(CallsFilter::default().matches(&call("a", None)));
        assert!(CallsFilter::default().matches(&call("b", Some("a"))));
    }

    #[test]
    fn parent_and_root_filters() {
        let by_parent = CallsFilter {
            parent_ids: Some(vec!["a".into()]),
            ..Default::default()
        };
        assert!(by_parent.matches(&call("b", Some("a"))));
        assert!(!by_parent.matches(&call("a", None)));

        let roots = CallsFilter {
            trace_roots_only: true,
            ..Default::default()
        };
        assert!(roots.matches(&call("a", None)));
        assert!(!roots.matches(&call("b", Some("a"))));
    }

    #[test]
    fn query_request_defaults_filter() {
        let req: CallsQueryReq =
            serde_json::from_str(r#"{"project_id": "e/p", "limit": null}"#).unwrap();
        assert_eq!(req.filter, CallsFilter::default());
    }
}
