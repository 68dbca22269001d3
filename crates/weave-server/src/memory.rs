//! In-memory trace server for tests and embedding.
//!
//! [`InMemoryTraceServer`] keeps every object version, table, file and call
//! in maps behind a `RwLock`. It implements the full [`TraceServer`]
//! contract, including digest resolution, soft deletes and ref-path walking,
//! and counts requests per method so tests can observe I/O.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use weave_types::{parse_uri, ContentHasher, DigestKind, EdgeType, Ref, RefSegment};

use crate::error::{ServerError, ServerResult};
use crate::traits::TraceServer;
use crate::types::*;

#[derive(Clone, Debug)]
struct ObjVersion {
    digest: String,
    val: JsonValue,
    created_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

type ProjectKey = (String, String);

#[derive(Default)]
struct State {
    objects: HashMap<ProjectKey, Vec<ObjVersion>>,
    rows: HashMap<ProjectKey, JsonValue>,
    tables: HashMap<ProjectKey, Vec<String>>,
    files: HashMap<ProjectKey, Vec<u8>>,
    calls: Vec<CallSchema>,
}

fn key(project_id: &str, id: &str) -> ProjectKey {
    (project_id.to_string(), id.to_string())
}

fn resolve_version<'a>(
    versions: &'a [ObjVersion],
    digest: &str,
) -> Option<(usize, &'a ObjVersion)> {
    match DigestKind::of(digest) {
        DigestKind::Latest => versions
            .iter()
            .enumerate()
            .rev()
            .find(|(_, v)| v.deleted_at.is_none())
            .or_else(|| versions.iter().enumerate().last()),
        DigestKind::Version(n) => {
            let idx = usize::try_from(n).ok()?;
            versions.get(idx).map(|v| (idx, v))
        }
        DigestKind::Content => versions.iter().enumerate().find(|(_, v)| v.digest == digest),
    }
}

impl State {
    fn read_object(&self, req: &ObjReadReq) -> ServerResult<ObjSchema> {
        let not_found = || ServerError::ObjectNotFound {
            project_id: req.project_id.clone(),
            object_id: req.object_id.clone(),
            digest: req.digest.clone(),
        };
        let versions = self
            .objects
            .get(&key(&req.project_id, &req.object_id))
            .ok_or_else(not_found)?;
        let (index, version) = resolve_version(versions, &req.digest).ok_or_else(not_found)?;
        if let Some(deleted_at) = version.deleted_at {
            return Err(ServerError::ObjectDeleted {
                project_id: req.project_id.clone(),
                object_id: req.object_id.clone(),
                digest: version.digest.clone(),
                deleted_at,
            });
        }
        let latest = versions
            .iter()
            .rposition(|v| v.deleted_at.is_none())
            .is_some_and(|i| i == index);
        Ok(ObjSchema {
            project_id: req.project_id.clone(),
            object_id: req.object_id.clone(),
            digest: version.digest.clone(),
            version_index: index as u64,
            is_latest: latest,
            val: version.val.clone(),
            created_at: version.created_at,
            deleted_at: None,
        })
    }

    fn table_rows(&self, project_id: &str, digest: &str) -> ServerResult<Vec<TableRowSchema>> {
        let row_digests = self
            .tables
            .get(&key(project_id, digest))
            .ok_or_else(|| ServerError::TableNotFound {
                project_id: project_id.to_string(),
                digest: digest.to_string(),
            })?;
        row_digests
            .iter()
            .map(|d| {
                let val = self.rows.get(&key(project_id, d)).cloned().ok_or_else(|| {
                    ServerError::Serialization(format!("table {digest} references missing row {d}"))
                })?;
                Ok(TableRowSchema {
                    digest: d.clone(),
                    val,
                })
            })
            .collect()
    }

    /// Follow a ref URI string held inside a value, if it is one.
    fn deref_object_uri(&self, val: JsonValue) -> ServerResult<JsonValue> {
        if let JsonValue::String(s) = &val {
            if let Ok(Ref::Object(r)) = parse_uri(s) {
                let obj = self.read_object(&ObjReadReq {
                    project_id: r.project_id(),
                    object_id: r.name().to_string(),
                    digest: r.digest().to_string(),
                })?;
                return self.walk(&r.uri(), &r.project_id(), obj.val, r.extra());
            }
        }
        Ok(val)
    }

    fn walk(
        &self,
        uri: &str,
        project_id: &str,
        mut val: JsonValue,
        extra: &[RefSegment],
    ) -> ServerResult<JsonValue> {
        let unresolvable = |reason: String| ServerError::RefNotResolvable {
            uri: uri.to_string(),
            reason,
        };
        for segment in extra {
            if segment.edge != EdgeType::Id {
                val = self.deref_object_uri(val)?;
            }
            val = match segment.edge {
                EdgeType::Key | EdgeType::Attr => match val {
                    JsonValue::Object(mut map) => map
                        .remove(&segment.arg)
                        .ok_or_else(|| unresolvable(format!("no {} {:?}", segment.edge, segment.arg)))?,
                    other => {
                        return Err(unresolvable(format!(
                            "{} {:?} applied to non-object {other}",
                            segment.edge, segment.arg
                        )))
                    }
                },
                EdgeType::Index => {
                    let idx = segment
                        .as_index()
                        .ok_or_else(|| unresolvable(format!("bad index {:?}", segment.arg)))?;
                    match val {
                        JsonValue::Array(mut items) if idx < items.len() => items.swap_remove(idx),
                        _ => return Err(unresolvable(format!("index {idx} out of range"))),
                    }
                }
                EdgeType::Id => {
                    let table_digest = match &val {
                        JsonValue::String(s) => match parse_uri(s) {
                            Ok(Ref::Table(t)) => t.digest().to_string(),
                            _ => return Err(unresolvable(format!("{s:?} is not a table ref"))),
                        },
                        other => return Err(unresolvable(format!("id lookup on {other}"))),
                    };
                    self.table_rows(project_id, &table_digest)?
                        .into_iter()
                        .find(|row| row.digest == segment.arg)
                        .map(|row| row.val)
                        .ok_or_else(|| unresolvable(format!("no row {:?}", segment.arg)))?
                }
            };
        }
        Ok(val)
    }
}

/// Per-method request counters.
#[derive(Debug, Default)]
pub struct ServerStats {
    obj_create: AtomicU64,
    obj_read: AtomicU64,
    obj_delete: AtomicU64,
    refs_read_batch: AtomicU64,
    table_create: AtomicU64,
    table_query: AtomicU64,
    table_query_stats: AtomicU64,
    file_create: AtomicU64,
    file_content_read: AtomicU64,
    call_start: AtomicU64,
    call_end: AtomicU64,
}

/// Point-in-time copy of [`ServerStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub obj_create: u64,
    pub obj_read: u64,
    pub obj_delete: u64,
    pub refs_read_batch: u64,
    pub table_create: u64,
    pub table_query: u64,
    pub table_query_stats: u64,
    pub file_create: u64,
    pub file_content_read: u64,
    pub call_start: u64,
    pub call_end: u64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl ServerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            obj_create: get(&self.obj_create),
            obj_read: get(&self.obj_read),
            obj_delete: get(&self.obj_delete),
            refs_read_batch: get(&self.refs_read_batch),
            table_create: get(&self.table_create),
            table_query: get(&self.table_query),
            table_query_stats: get(&self.table_query_stats),
            file_create: get(&self.file_create),
            file_content_read: get(&self.file_content_read),
            call_start: get(&self.call_start),
            call_end: get(&self.call_end),
        }
    }
}

/// In-memory, HashMap-based trace server.
pub struct InMemoryTraceServer {
    state: RwLock<State>,
    stats: ServerStats,
}

impl InMemoryTraceServer {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            stats: ServerStats::default(),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Number of versions ever created for an object, deleted ones included.
    pub fn version_count(&self, project_id: &str, object_id: &str) -> usize {
        self.state
            .read()
            .expect("lock poisoned")
            .objects
            .get(&key(project_id, object_id))
            .map_or(0, Vec::len)
    }

    /// Number of stored files across all projects.
    pub fn file_count(&self) -> usize {
        self.state.read().expect("lock poisoned").files.len()
    }

    pub fn call_count(&self) -> usize {
        self.state.read().expect("lock poisoned").calls.len()
    }
}

impl Default for InMemoryTraceServer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryTraceServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read().expect("lock poisoned");
        f.debug_struct("InMemoryTraceServer")
            .field("objects", &state.objects.len())
            .field("tables", &state.tables.len())
            .field("files", &state.files.len())
            .field("calls", &state.calls.len())
            .finish()
    }
}

#[async_trait]
impl TraceServer for InMemoryTraceServer {
    async fn obj_create(&self, req: ObjCreateReq) -> ServerResult<ObjCreateRes> {
        bump(&self.stats.obj_create);
        if req.object_id.is_empty() {
            return Err(ServerError::InvalidRequest("object_id must not be empty".into()));
        }
        let digest = ContentHasher::OBJECT.hash_json(&req.val)?;
        let mut state = self.state.write().expect("lock poisoned");
        let versions = state
            .objects
            .entry(key(&req.project_id, &req.object_id))
            .or_default();
        match versions.iter_mut().find(|v| v.digest == digest) {
            Some(existing) => {
                // Identical content maps to the stored version; a deleted one is revived.
                existing.deleted_at = None;
            }
            None => {
                tracing::debug!(
                    project = %req.project_id,
                    object_id = %req.object_id,
                    version = versions.len(),
                    "object version created"
                );
                versions.push(ObjVersion {
                    digest: digest.clone(),
                    val: req.val,
                    created_at: Utc::now(),
                    deleted_at: None,
                });
            }
        }
        Ok(ObjCreateRes { digest })
    }

    async fn obj_read(&self, req: ObjReadReq) -> ServerResult<ObjReadRes> {
        bump(&self.stats.obj_read);
        let state = self.state.read().expect("lock poisoned");
        Ok(ObjReadRes {
            obj: state.read_object(&req)?,
        })
    }

    async fn obj_delete(&self, req: ObjDeleteReq) -> ServerResult<ObjDeleteRes> {
        bump(&self.stats.obj_delete);
        let mut state = self.state.write().expect("lock poisoned");
        let not_found = |digest: &str| ServerError::ObjectNotFound {
            project_id: req.project_id.clone(),
            object_id: req.object_id.clone(),
            digest: digest.to_string(),
        };
        let versions = state
            .objects
            .get_mut(&key(&req.project_id, &req.object_id))
            .ok_or_else(|| not_found("*"))?;

        let targets: Vec<usize> = match &req.digests {
            None => (0..versions.len()).collect(),
            Some(digests) => {
                let mut idx = Vec::with_capacity(digests.len());
                for d in digests {
                    let (i, _) = resolve_version(versions, d).ok_or_else(|| not_found(d))?;
                    idx.push(i);
                }
                idx
            }
        };

        let now = Utc::now();
        let mut num_deleted = 0;
        for i in targets {
            if versions[i].deleted_at.is_none() {
                versions[i].deleted_at = Some(now);
                num_deleted += 1;
            }
        }
        Ok(ObjDeleteRes { num_deleted })
    }

    async fn refs_read_batch(&self, req: RefsReadBatchReq) -> ServerResult<RefsReadBatchRes> {
        bump(&self.stats.refs_read_batch);
        let state = self.state.read().expect("lock poisoned");
        let mut vals = Vec::with_capacity(req.refs.len());
        for uri in &req.refs {
            let parsed = parse_uri(uri)?;
            let project_id = parsed.project_id();
            let root = match &parsed {
                Ref::Object(r) => {
                    state
                        .read_object(&ObjReadReq {
                            project_id: project_id.clone(),
                            object_id: r.name().to_string(),
                            digest: r.digest().to_string(),
                        })?
                        .val
                }
                Ref::Table(r) => JsonValue::String(r.without_extra().uri()),
                Ref::Call(r) => {
                    let call = state
                        .calls
                        .iter()
                        .find(|c| c.project_id == project_id && c.id == r.call_id())
                        .ok_or_else(|| ServerError::CallNotFound {
                            project_id: project_id.clone(),
                            call_id: r.call_id().to_string(),
                        })?;
                    serde_json::to_value(call)
                        .map_err(|e| ServerError::Serialization(e.to_string()))?
                }
            };
            vals.push(state.walk(uri, &project_id, root, parsed.extra())?);
        }
        Ok(RefsReadBatchRes { vals })
    }

    async fn table_create(&self, req: TableCreateReq) -> ServerResult<TableCreateRes> {
        bump(&self.stats.table_create);
        let mut row_digests = Vec::with_capacity(req.rows.len());
        let mut state = self.state.write().expect("lock poisoned");
        for row in req.rows {
            let digest = ContentHasher::ROW.hash_json(&row)?;
            state.rows.entry(key(&req.project_id, &digest)).or_insert(row);
            row_digests.push(digest);
        }
        let digest = ContentHasher::TABLE.hash_json(&row_digests)?;
        state
            .tables
            .entry(key(&req.project_id, &digest))
            .or_insert_with(|| row_digests.clone());
        Ok(TableCreateRes {
            digest,
            row_digests,
        })
    }

    async fn table_query(&self, req: TableQueryReq) -> ServerResult<TableQueryRes> {
        bump(&self.stats.table_query);
        let state = self.state.read().expect("lock poisoned");
        let rows = state.table_rows(&req.project_id, &req.digest)?;
        let limit = req.limit.unwrap_or(usize::MAX);
        let rows = rows.into_iter().skip(req.offset).take(limit).collect();
        Ok(TableQueryRes { rows })
    }

    async fn table_query_stats(&self, req: TableQueryStatsReq) -> ServerResult<TableQueryStatsRes> {
        bump(&self.stats.table_query_stats);
        let state = self.state.read().expect("lock poisoned");
        let count = state
            .tables
            .get(&key(&req.project_id, &req.digest))
            .map(Vec::len)
            .ok_or_else(|| ServerError::TableNotFound {
                project_id: req.project_id.clone(),
                digest: req.digest.clone(),
            })?;
        Ok(TableQueryStatsRes { count })
    }

    async fn file_create(&self, req: FileCreateReq) -> ServerResult<FileCreateRes> {
        bump(&self.stats.file_create);
        let digest = ContentHasher::FILE.hash(&req.content);
        let mut state = self.state.write().expect("lock poisoned");
        state
            .files
            .entry(key(&req.project_id, &digest))
            .or_insert(req.content);
        Ok(FileCreateRes { digest })
    }

    async fn file_content_read(
        &self,
        req: FileContentReadReq,
    ) -> ServerResult<FileContentReadRes> {
        bump(&self.stats.file_content_read);
        let state = self.state.read().expect("lock poisoned");
        let content = state
            .files
            .get(&key(&req.project_id, &req.digest))
            .cloned()
            .ok_or_else(|| ServerError::FileNotFound {
                project_id: req.project_id.clone(),
                digest: req.digest.clone(),
            })?;
        Ok(FileContentReadRes { content })
    }

    async fn call_start(&self, req: CallStartReq) -> ServerResult<CallStartRes> {
        bump(&self.stats.call_start);
        let start = req.start;
        let res = CallStartRes {
            id: start.id.clone(),
            trace_id: start.trace_id.clone(),
        };
        let mut state = self.state.write().expect("lock poisoned");
        let schema = CallSchema::from(start);
        match state
            .calls
            .iter_mut()
            .find(|c| c.project_id == schema.project_id && c.id == schema.id)
        {
            Some(existing) => *existing = schema,
            None => state.calls.push(schema),
        }
        Ok(res)
    }

    async fn call_end(&self, req: CallEndReq) -> ServerResult<CallEndRes> {
        bump(&self.stats.call_end);
        let end = req.end;
        let mut state = self.state.write().expect("lock poisoned");
        let call = state
            .calls
            .iter_mut()
            .find(|c| c.project_id == end.project_id && c.id == end.id)
            .ok_or_else(|| ServerError::CallNotFound {
                project_id: end.project_id.clone(),
                call_id: end.id.clone(),
            })?;
        call.ended_at = Some(end.ended_at);
        call.exception = end.exception;
        call.output = end.output;
        call.summary = Some(end.summary);
        Ok(CallEndRes::default())
    }

    async fn calls_query(&self, req: CallsQueryReq) -> ServerResult<CallsQueryRes> {
        let state = self.state.read().expect("lock poisoned");
        let mut calls: Vec<CallSchema> = state
            .calls
            .iter()
            .filter(|c| c.project_id == req.project_id && req.filter.matches(c))
            .cloned()
            .collect();
        calls.sort_by_key(|c| c.started_at);
        if let Some(limit) = req.limit {
            calls.truncate(limit);
        }
        Ok(CallsQueryRes { calls })
    }

    async fn calls_delete(&self, req: CallsDeleteReq) -> ServerResult<CallsDeleteRes> {
        let mut state = self.state.write().expect("lock poisoned");
        let mut doomed: HashSet<String> = req.call_ids.iter().cloned().collect();
        loop {
            let before = doomed.len();
            for call in &state.calls {
                if call.project_id == req.project_id
                    && call.parent_id.as_ref().is_some_and(|p| doomed.contains(p))
                {
                    doomed.insert(call.id.clone());
                }
            }
            if doomed.len() == before {
                break;
            }
        }
        let before = state.calls.len();
        state
            .calls
            .retain(|c| !(c.project_id == req.project_id && doomed.contains(&c.id)));
        Ok(CallsDeleteRes {
            num_deleted: before - state.calls.len(),
        })
    }

    async fn call_update(&self, req: CallUpdateReq) -> ServerResult<CallUpdateRes> {
        let mut state = self.state.write().expect("lock poisoned");
        let call = state
            .calls
            .iter_mut()
            .find(|c| c.project_id == req.project_id && c.id == req.call_id)
            .ok_or_else(|| ServerError::CallNotFound {
                project_id: req.project_id.clone(),
                call_id: req.call_id.clone(),
            })?;
        call.display_name = req.display_name;
        Ok(CallUpdateRes::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PROJECT: &str = "team/proj";

    async fn create(server: &InMemoryTraceServer, name: &str, val: JsonValue) -> String {
        server
            .obj_create(ObjCreateReq {
                project_id: PROJECT.into(),
                object_id: name.into(),
                val,
            })
            .await
            .unwrap()
            .digest
    }

    async fn read(server: &InMemoryTraceServer, name: &str, digest: &str) -> ServerResult<ObjSchema> {
        server
            .obj_read(ObjReadReq {
                project_id: PROJECT.into(),
                object_id: name.into(),
                digest: digest.into(),
            })
            .await
            .map(|r| r.obj)
    }

    async fn delete(server: &InMemoryTraceServer, name: &str, digest: &str) -> usize {
        server
            .obj_delete(ObjDeleteReq {
                project_id: PROJECT.into(),
                object_id: name.into(),
                digests: Some(vec![digest.into()]),
            })
            .await
            .unwrap()
            .num_deleted
    }

    // -----------------------------------------------------------------------
    // Objects
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn identical_content_dedupes() {
        let server = InMemoryTraceServer::new();
        let d1 = create(&server, "obj", json!({"a": 1})).await;
        let d2 = create(&server, "obj", json!({"a": 1})).await;
        assert_eq!(d1, d2);
        assert_eq!(server.version_count(PROJECT, "obj"), 1);
    }

    #[tokio::test]
    async fn latest_and_version_ordinals_resolve() {
        let server = InMemoryTraceServer::new();
        let d0 = create(&server, "obj", json!({"v": 0})).await;
        let d1 = create(&server, "obj", json!({"v": 1})).await;

        let latest = read(&server, "obj", "latest").await.unwrap();
        assert_eq!(latest.digest, d1);
        assert_eq!(latest.version_index, 1);
        assert!(latest.is_latest);

        let first = read(&server, "obj", "v0").await.unwrap();
        assert_eq!(first.digest, d0);
        assert!(!first.is_latest);

        let by_digest = read(&server, "obj", &d0).await.unwrap();
        assert_eq!(by_digest.val, json!({"v": 0}));
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let server = InMemoryTraceServer::new();
        let err = read(&server, "nope", "latest").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!err.is_deleted());
    }

    #[tokio::test]
    async fn deleted_versions_report_deletion() {
        let server = InMemoryTraceServer::new();
        let v0 = create(&server, "obj", json!({"i": 0})).await;
        let v1 = create(&server, "obj", json!({"i": 1})).await;
        let v2 = create(&server, "obj", json!({"i": 2})).await;
        let v3 = create(&server, "obj", json!({"i": 3})).await;

        assert_eq!(delete(&server, "obj", &v1).await, 1);
        assert_eq!(delete(&server, "obj", &v3).await, 1);
        assert_eq!(delete(&server, "obj", &v3).await, 0);

        let err = read(&server, "obj", &v1).await.unwrap_err();
        assert!(err.is_deleted());
        assert!(err.deleted_at().is_some());

        assert_eq!(read(&server, "obj", &v0).await.unwrap().val, json!({"i": 0}));
        assert_eq!(read(&server, "obj", &v2).await.unwrap().val, json!({"i": 2}));
        assert_eq!(read(&server, "obj", "latest").await.unwrap().digest, v2);
    }

    #[tokio::test]
    async fn latest_of_fully_deleted_object_is_deleted() {
        let server = InMemoryTraceServer::new();
        let d = create(&server, "obj", json!(1)).await;
        delete(&server, "obj", &d).await;
        assert!(read(&server, "obj", "latest").await.unwrap_err().is_deleted());
    }

    #[tokio::test]
    async fn recreating_deleted_content_revives_it() {
        let server = InMemoryTraceServer::new();
        let d = create(&server, "obj", json!(1)).await;
        delete(&server, "obj", &d).await;
        assert_eq!(create(&server, "obj", json!(1)).await, d);
        assert!(read(&server, "obj", &d).await.is_ok());
    }

    // -----------------------------------------------------------------------
    // Tables and files
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn tables_are_content_addressed_and_paged() {
        let server = InMemoryTraceServer::new();
        let rows: Vec<JsonValue> = (0..5).map(|i| json!({"i": i})).collect();
        let created = server
            .table_create(TableCreateReq {
                project_id: PROJECT.into(),
                rows: rows.clone(),
            })
            .await
            .unwrap();
        let again = server
            .table_create(TableCreateReq {
                project_id: PROJECT.into(),
                rows,
            })
            .await
            .unwrap();
        assert_eq!(created, again);
        assert_eq!(created.row_digests.len(), 5);

        let page = server
            .table_query(TableQueryReq {
                project_id: PROJECT.into(),
                digest: created.digest.clone(),
                offset: 3,
                limit: Some(10),
            })
            .await
            .unwrap();
        assert_eq!(page.rows.len(), 2);
        assert_eq!(page.rows[0].val, json!({"i": 3}));
        assert_eq!(page.rows[0].digest, created.row_digests[3]);

        let stats = server
            .table_query_stats(TableQueryStatsReq {
                project_id: PROJECT.into(),
                digest: created.digest,
            })
            .await
            .unwrap();
        assert_eq!(stats.count, 5);
    }

    #[tokio::test]
    async fn files_round_trip() {
        let server = InMemoryTraceServer::new();
        let digest = server
            .file_create(FileCreateReq {
                project_id: PROJECT.into(),
                name: "obj.json".into(),
                content: b"payload".to_vec(),
            })
            .await
            .unwrap()
            .digest;
        let read = server
            .file_content_read(FileContentReadReq {
                project_id: PROJECT.into(),
                digest,
            })
            .await
            .unwrap();
        assert_eq!(read.content, b"payload");
        assert_eq!(server.stats().file_create, 1);
        assert_eq!(server.stats().file_content_read, 1);
    }

    // -----------------------------------------------------------------------
    // Ref resolution
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn refs_read_batch_walks_paths() {
        let server = InMemoryTraceServer::new();
        let table = server
            .table_create(TableCreateReq {
                project_id: PROJECT.into(),
                rows: vec![json!({"a": {"b": 1}}), json!({"a": {"b": 2}})],
            })
            .await
            .unwrap();
        let table_uri = format!("weave://team/proj/table/{}", table.digest);
        let digest = create(&server, "dataset", json!({"_type": "Dataset", "rows": table_uri})).await;

        let uri = format!(
            "weave://team/proj/object/dataset:{digest}/attr/rows/id/{}/key/a/key/b",
            table.row_digests[1]
        );
        let res = server
            .refs_read_batch(RefsReadBatchReq {
                refs: vec![uri, "weave://team/proj/object/dataset:latest/attr/_type".into()],
            })
            .await
            .unwrap();
        assert_eq!(res.vals, vec![json!(2), json!("Dataset")]);
    }

    #[tokio::test]
    async fn refs_read_batch_reports_bad_paths() {
        let server = InMemoryTraceServer::new();
        create(&server, "obj", json!({"a": [1]})).await;
        let err = server
            .refs_read_batch(RefsReadBatchReq {
                refs: vec!["weave://team/proj/object/obj:latest/key/a/idx/5".into()],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::RefNotResolvable { .. }));
    }

    // -----------------------------------------------------------------------
    // Calls
    // -----------------------------------------------------------------------

    fn start(id: &str, parent: Option<&str>) -> CallStartReq {
        CallStartReq {
            start: StartedCallSchema {
                project_id: PROJECT.into(),
                id: id.into(),
                op_name: "op".into(),
                display_name: None,
                trace_id: "trace".into(),
                parent_id: parent.map(str::to_string),
                started_at: Utc::now(),
                attributes: Default::default(),
                inputs: Default::default(),
            },
        }
    }

    #[tokio::test]
    async fn call_lifecycle_and_queries() {
        let server = InMemoryTraceServer::new();
        server.call_start(start("root", None)).await.unwrap();
        server.call_start(start("child", Some("root"))).await.unwrap();
        server
            .call_end(CallEndReq {
                end: EndedCallSchema {
                    project_id: PROJECT.into(),
                    id: "child".into(),
                    ended_at: Utc::now(),
                    exception: None,
                    output: Some(json!(3)),
                    summary: Default::default(),
                },
            })
            .await
            .unwrap();
        server
            .call_update(CallUpdateReq {
                project_id: PROJECT.into(),
                call_id: "root".into(),
                display_name: Some("Root".into()),
            })
            .await
            .unwrap();

        let children = server
            .calls_query(CallsQueryReq {
                project_id: PROJECT.into(),
                filter: CallsFilter {
                    parent_ids: Some(vec!["root".into()]),
                    ..Default::default()
                },
                limit: None,
            })
            .await
            .unwrap()
            .calls;
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].output, Some(json!(3)));
        assert!(children[0].ended_at.is_some());

        let roots = server
            .calls_query(CallsQueryReq {
                project_id: PROJECT.into(),
                filter: CallsFilter {
                    trace_roots_only: true,
                    ..Default::default()
                },
                limit: None,
            })
            .await
            .unwrap()
            .calls;
        assert_eq!(roots[0].display_name.as_deref(), Some("Root"));
    }

    #[tokio::test]
    async fn call_end_for_unknown_call_fails() {
        let server = InMemoryTraceServer::new();
        let err = server
            .call_end(CallEndReq {
                end: EndedCallSchema {
                    project_id: PROJECT.into(),
                    id: "ghost".into(),
                    ended_at: Utc::now(),
                    exception: None,
                    output: None,
                    summary: Default::default(),
                },
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::CallNotFound { .. }));
    }

    #[tokio::test]
    async fn deleting_a_call_removes_descendants() {
        let server = InMemoryTraceServer::new();
        server.call_start(start("a", None)).await.unwrap();
        server.call_start(start("b", Some("a"))).await.unwrap();
        server.call_start(start("c", Some("b"))).await.unwrap();
        server.call_start(start("d", None)).await.unwrap();
        let res = server
            .calls_delete(CallsDeleteReq {
                project_id: PROJECT.into(),
                call_ids: vec!["a".into()],
            })
            .await
            .unwrap();
        assert_eq!(res.num_deleted, 3);
        assert_eq!(server.call_count(), 1);
    }
}
