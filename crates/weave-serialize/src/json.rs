//! Conversion between [`Value`] and its persisted JSON form.
//!
//! | value                 | JSON                                               |
//! |-----------------------|----------------------------------------------------|
//! | null, bool, number, string | itself                                        |
//! | list                  | array, element-wise                                |
//! | dict                  | object, value-wise                                 |
//! | ref                   | its URI string                                     |
//! | object record         | `{"_type": class, "_class_name", "_bases", ...fields}` |
//! | table                 | its ref URI once saved, otherwise an array of rows |
//! | op                    | `{"_type": "Op", name, code, closure, takes_self}`  |
//! | custom, registered    | a custom-object envelope (see [`codec`](crate::codec)) |
//! | custom, unregistered  | [`fallback_encode`] text                           |
//!
//! Decoding is the inverse walk. Any string that starts with `weave://` and
//! parses as a ref decodes to [`Value::Ref`]; a string that only looks like
//! one stays a string. Objects without a string `_type` decode to dicts.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Map, Value as JsonValue};
use weave_server::{FileContentReadReq, FileCreateReq, ObjCreateReq, ObjReadReq, TraceServer};
use weave_types::{
    is_ref_uri, parse_uri, sanitize_object_name, split_project_id, ContentHasher, CustomValue,
    ObjectRecord, ObjectRef, Op, Ref, Value, BASES_KEY, CLASS_NAME_KEY, TYPE_KEY,
};

use crate::artifact::MemTraceFilesArtifact;
use crate::cache::CustomObjectCache;
use crate::catalog::OpCatalog;
use crate::codec::{self, CustomEnvelope, CUSTOM_TYPE_TAG};
use crate::error::{SerializeError, SerializeResult};
use crate::fallback::fallback_encode;
use crate::registry::{load_op_inputs, SerializerRegistry, DEFAULT_FILE_NAME};

/// `_type` tag of a persisted op.
pub const OP_TYPE_TAG: &str = "Op";

/// Legacy `_type` tag for records that carry their class in `_class_name`.
pub const OBJECT_RECORD_TAG: &str = "ObjectRecord";

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// JSON for an op's identity.
///
/// Closure values are encoded without I/O: nested structures are expected to
/// be saved and replaced by refs beforehand, and custom values fall back to
/// text.
pub fn op_record(op: &Op) -> JsonValue {
    let closure: Map<String, JsonValue> = op
        .closure()
        .iter()
        .map(|(k, v)| (k.clone(), plain_json(v)))
        .collect();
    let mut out = Map::new();
    out.insert(TYPE_KEY.into(), OP_TYPE_TAG.into());
    out.insert("name".into(), op.name().into());
    out.insert("code".into(), op.code().into());
    out.insert("closure".into(), JsonValue::Object(closure));
    out.insert("takes_self".into(), op.takes_self().into());
    JsonValue::Object(out)
}

/// Encode without touching the server. Custom values become fallback text.
pub fn plain_json(value: &Value) -> JsonValue {
    match value {
        Value::List(items) => JsonValue::Array(items.iter().map(plain_json).collect()),
        Value::Dict(map) => JsonValue::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), plain_json(v)))
                .collect(),
        ),
        Value::Object(rec) => record_json(
            rec,
            rec.fields()
                .iter()
                .map(|(k, v)| (k.clone(), plain_json(v)))
                .collect(),
        ),
        Value::Table(table) => match table.saved_ref() {
            Some(r) => JsonValue::String(r.uri()),
            None => JsonValue::Array(table.rows().iter().map(plain_json).collect()),
        },
        Value::Op(op) => op_record(op),
        Value::Custom(custom) => JsonValue::String(fallback_encode(custom)),
        scalar => scalar_json(scalar),
    }
}

fn scalar_json(value: &Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::Int(i) => JsonValue::from(*i),
        // Non-finite floats have no JSON form and encode as null.
        Value::Float(f) => JsonValue::from(*f),
        Value::Str(s) => JsonValue::String(s.clone()),
        Value::Ref(r) => JsonValue::String(r.uri()),
        other => JsonValue::String(format!("<{}>", other.kind())),
    }
}

fn record_json(rec: &ObjectRecord, mut fields: Map<String, JsonValue>) -> JsonValue {
    fields.insert(TYPE_KEY.into(), rec.class_name().into());
    fields.insert(CLASS_NAME_KEY.into(), rec.class_name().into());
    fields.insert(
        BASES_KEY.into(),
        JsonValue::Array(rec.bases().iter().map(|b| b.as_str().into()).collect()),
    );
    JsonValue::Object(fields)
}

/// Serializers, caches and op implementations shared by one client.
#[derive(Clone)]
pub struct SerializeContext {
    registry: Arc<SerializerRegistry>,
    cache: Arc<CustomObjectCache>,
    catalog: Arc<OpCatalog>,
}

impl Default for SerializeContext {
    fn default() -> Self {
        Self::new(Arc::new(SerializerRegistry::with_builtins()))
    }
}

impl std::fmt::Debug for SerializeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerializeContext")
            .field("registry", &self.registry)
            .field("cached", &self.cache.len())
            .field("ops", &self.catalog.len())
            .finish()
    }
}

impl SerializeContext {
    pub fn new(registry: Arc<SerializerRegistry>) -> Self {
        Self {
            registry,
            cache: Arc::new(CustomObjectCache::new()),
            catalog: Arc::new(OpCatalog::new()),
        }
    }

    pub fn with_cache(mut self, cache: Arc<CustomObjectCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<OpCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn registry(&self) -> &SerializerRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &CustomObjectCache {
        &self.cache
    }

    pub fn catalog(&self) -> &OpCatalog {
        &self.catalog
    }

    /// `true` if some serializer accepts `value`.
    pub fn is_persistable(&self, value: &CustomValue) -> bool {
        self.registry.find(value).is_some()
    }

    /// Encode `value` for persistence in `project_id`.
    ///
    /// Custom values with a file-backed serializer upload their files
    /// through `server`; uploads are cached per project by content digest.
    pub async fn to_json(
        &self,
        value: &Value,
        project_id: &str,
        server: &dyn TraceServer,
    ) -> SerializeResult<JsonValue> {
        self.to_json_inner(value, project_id, server).await
    }

    fn to_json_inner<'a>(
        &'a self,
        value: &'a Value,
        project_id: &'a str,
        server: &'a dyn TraceServer,
    ) -> BoxFuture<'a, SerializeResult<JsonValue>> {
        Box::pin(async move {
            Ok(match value {
                Value::List(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.to_json_inner(item, project_id, server).await?);
                    }
                    JsonValue::Array(out)
                }
                Value::Dict(map) => {
                    JsonValue::Object(self.map_to_json(map, project_id, server).await?)
                }
                Value::Object(rec) => {
                    let fields = self.map_to_json(rec.fields(), project_id, server).await?;
                    record_json(rec, fields)
                }
                Value::Table(table) => match table.saved_ref() {
                    Some(r) => JsonValue::String(r.uri()),
                    None => {
                        let mut rows = Vec::with_capacity(table.len());
                        for row in table.rows() {
                            rows.push(self.to_json_inner(row, project_id, server).await?);
                        }
                        JsonValue::Array(rows)
                    }
                },
                Value::Op(op) => op_record(op),
                Value::Custom(custom) => {
                    match self.encode_custom(custom, project_id, server).await? {
                        Some(envelope) => serde_json::to_value(&envelope)
                            .map_err(|e| SerializeError::invalid("custom", e.to_string()))?,
                        None => JsonValue::String(fallback_encode(custom)),
                    }
                }
                scalar => scalar_json(scalar),
            })
        })
    }

    async fn map_to_json(
        &self,
        map: &BTreeMap<String, Value>,
        project_id: &str,
        server: &dyn TraceServer,
    ) -> SerializeResult<Map<String, JsonValue>> {
        let mut out = Map::new();
        for (k, v) in map {
            out.insert(k.clone(), self.to_json_inner(v, project_id, server).await?);
        }
        Ok(out)
    }

    /// Build the envelope for a custom value, uploading its files.
    ///
    /// Returns `None` when no serializer matches.
    pub async fn encode_custom(
        &self,
        value: &CustomValue,
        project_id: &str,
        server: &dyn TraceServer,
    ) -> SerializeResult<Option<CustomEnvelope>> {
        let Some(encoded) = codec::encode(&self.registry, value)? else {
            return Ok(None);
        };
        if encoded.inline_data.is_some() {
            return Ok(Some(CustomEnvelope {
                tag: CUSTOM_TYPE_TAG.into(),
                weave_type: encoded.weave_type,
                files: None,
                load_op: None,
                inline_data: encoded.inline_data,
            }));
        }

        let mut files = BTreeMap::new();
        for (name, content) in encoded.files {
            let digest = self.upload_file(project_id, &name, content, server).await?;
            files.insert(name, digest);
        }
        let load_op = match encoded.load_op {
            Some(op) => Some(
                self.publish_load_op(&encoded.weave_type.type_id, &op, project_id, server)
                    .await?,
            ),
            None => None,
        };
        Ok(Some(CustomEnvelope {
            tag: CUSTOM_TYPE_TAG.into(),
            weave_type: encoded.weave_type,
            files: Some(files),
            load_op,
            inline_data: None,
        }))
    }

    async fn upload_file(
        &self,
        project_id: &str,
        name: &str,
        content: Vec<u8>,
        server: &dyn TraceServer,
    ) -> SerializeResult<String> {
        let local = ContentHasher::FILE.hash(&content);
        if let Some(digest) = self.cache.uploaded(project_id, &local) {
            tracing::debug!(project = %project_id, file = name, "file upload cache hit");
            return Ok(digest);
        }
        let res = server
            .file_create(FileCreateReq {
                project_id: project_id.to_string(),
                name: name.to_string(),
                content,
            })
            .await?;
        tracing::debug!(project = %project_id, file = name, digest = %res.digest, "uploaded file");
        self.cache.record_upload(project_id, &local, res.digest.clone());
        Ok(res.digest)
    }

    async fn publish_load_op(
        &self,
        serializer_id: &str,
        op: &Op,
        project_id: &str,
        server: &dyn TraceServer,
    ) -> SerializeResult<String> {
        if let Some(uri) = self.cache.load_op(project_id, serializer_id) {
            return Ok(uri);
        }
        self.catalog.register(op)?;
        let object_id = sanitize_object_name(op.name())?;
        let res = server
            .obj_create(ObjCreateReq {
                project_id: project_id.to_string(),
                object_id: object_id.clone(),
                val: op_record(op),
            })
            .await?;
        let (entity, project) = split_project_id(project_id)?;
        let uri = ObjectRef::new(entity, project, object_id, res.digest)?.uri();
        self.cache.record_load_op(project_id, serializer_id, uri.clone());
        Ok(uri)
    }

    /// Decode an envelope, fetching its files when needed.
    ///
    /// Decoded values are cached per project by envelope digest. When the
    /// envelope's serializer is not registered here, the value is loaded by
    /// running the envelope's load op.
    pub async fn decode_custom(
        &self,
        envelope: &CustomEnvelope,
        project_id: &str,
        server: &dyn TraceServer,
    ) -> SerializeResult<CustomValue> {
        if envelope.tag != CUSTOM_TYPE_TAG {
            return Err(SerializeError::invalid(
                "custom",
                format!("unexpected _type {:?}", envelope.tag),
            ));
        }
        let digest = ContentHasher::ENVELOPE.hash_json(envelope)?;
        if let Some(value) = self.cache.decoded(project_id, &digest) {
            tracing::debug!(project = %project_id, weave_type = %envelope.weave_type.type_id, "decode cache hit");
            return Ok(value);
        }

        let mut artifact = MemTraceFilesArtifact::new();
        for (name, file_digest) in envelope.files.iter().flatten() {
            let res = server
                .file_content_read(FileContentReadReq {
                    project_id: project_id.to_string(),
                    digest: file_digest.clone(),
                })
                .await?;
            artifact.write(name.clone(), res.content);
        }

        let value = match codec::decode(
            &self.registry,
            &envelope.weave_type,
            &artifact,
            envelope.inline_data.as_ref(),
        )? {
            Some(value) => value,
            None => self.decode_with_load_op(envelope, artifact, server).await?,
        };
        self.cache.record_decoded(project_id, &digest, value.clone());
        Ok(value)
    }

    async fn decode_with_load_op(
        &self,
        envelope: &CustomEnvelope,
        artifact: MemTraceFilesArtifact,
        server: &dyn TraceServer,
    ) -> SerializeResult<CustomValue> {
        let unknown = || SerializeError::UnknownType {
            weave_type: envelope.weave_type.type_id.clone(),
        };
        let Some(uri) = envelope.load_op.as_deref() else {
            return Err(unknown());
        };
        let Ref::Object(op_ref) = parse_uri(uri)? else {
            return Err(SerializeError::invalid("custom", format!("load_op {uri:?} is not an object ref")));
        };
        let project_id = op_ref.project_id();
        let res = server
            .obj_read(ObjReadReq {
                project_id: project_id.clone(),
                object_id: op_ref.name().to_string(),
                digest: op_ref.digest().to_string(),
            })
            .await?;
        let Value::Op(op) = self.from_json(&res.obj.val, &project_id, server).await? else {
            return Err(SerializeError::invalid("custom", format!("load_op {uri:?} is not an op")));
        };
        tracing::debug!(op = op.name(), "decoding custom value through load op");
        match op.call(load_op_inputs(artifact, DEFAULT_FILE_NAME)) {
            Ok(Value::Custom(value)) => Ok(value),
            Ok(other) => Err(SerializeError::codec(
                op.name(),
                format!("load op returned {}", other.kind()),
            )),
            Err(failure) if failure.kind == "OpUnavailable" => Err(unknown()),
            Err(failure) => Err(SerializeError::codec(op.name(), failure)),
        }
    }

    /// Decode persisted JSON from `project_id`.
    pub async fn from_json(
        &self,
        json: &JsonValue,
        project_id: &str,
        server: &dyn TraceServer,
    ) -> SerializeResult<Value> {
        self.from_json_inner(json, project_id, server).await
    }

    fn from_json_inner<'a>(
        &'a self,
        json: &'a JsonValue,
        project_id: &'a str,
        server: &'a dyn TraceServer,
    ) -> BoxFuture<'a, SerializeResult<Value>> {
        Box::pin(async move {
            Ok(match json {
                JsonValue::String(s) if is_ref_uri(s) => match parse_uri(s) {
                    Ok(r) => Value::Ref(r),
                    Err(_) => Value::Str(s.clone()),
                },
                JsonValue::Array(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.from_json_inner(item, project_id, server).await?);
                    }
                    Value::List(out)
                }
                JsonValue::Object(map) => match map.get(TYPE_KEY).and_then(JsonValue::as_str) {
                    Some(CUSTOM_TYPE_TAG) => {
                        let envelope: CustomEnvelope = serde_json::from_value(json.clone())
                            .map_err(|e| SerializeError::invalid("custom", e.to_string()))?;
                        Value::Custom(self.decode_custom(&envelope, project_id, server).await?)
                    }
                    Some(OP_TYPE_TAG) => Value::Op(self.op_from_json(map, project_id, server).await?),
                    Some(type_name) => {
                        Value::Object(self.record_from_json(type_name, map, project_id, server).await?)
                    }
                    None => {
                        let mut out = BTreeMap::new();
                        for (k, v) in map {
                            out.insert(k.clone(), self.from_json_inner(v, project_id, server).await?);
                        }
                        Value::Dict(out)
                    }
                },
                plain => Value::from_plain_json(plain),
            })
        })
    }

    async fn record_from_json(
        &self,
        type_name: &str,
        map: &Map<String, JsonValue>,
        project_id: &str,
        server: &dyn TraceServer,
    ) -> SerializeResult<ObjectRecord> {
        let class_name = map
            .get(CLASS_NAME_KEY)
            .and_then(JsonValue::as_str)
            .unwrap_or(type_name);
        let bases: Vec<String> = map
            .get(BASES_KEY)
            .and_then(JsonValue::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(JsonValue::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let mut rec = ObjectRecord::new(class_name).with_bases(bases);
        for (k, v) in map {
            if k == TYPE_KEY || k == CLASS_NAME_KEY || k == BASES_KEY {
                continue;
            }
            let value = self.from_json_inner(v, project_id, server).await?;
            rec.set_field(k.clone(), value);
        }
        Ok(rec)
    }

    async fn op_from_json(
        &self,
        map: &Map<String, JsonValue>,
        project_id: &str,
        server: &dyn TraceServer,
    ) -> SerializeResult<Op> {
        let digest = ContentHasher::OBJECT.hash_json(map)?;
        if let Some(op) = self.catalog.get(&digest) {
            return Ok(op);
        }
        let field = |name: &'static str| {
            map.get(name)
                .and_then(JsonValue::as_str)
                .ok_or_else(|| SerializeError::invalid("op", format!("missing string field {name:?}")))
        };
        let name = field("name")?;
        let code = field("code")?;
        let takes_self = map
            .get("takes_self")
            .and_then(JsonValue::as_bool)
            .unwrap_or(false);
        let mut closure = BTreeMap::new();
        if let Some(JsonValue::Object(entries)) = map.get("closure") {
            for (k, v) in entries {
                closure.insert(k.clone(), self.from_json_inner(v, project_id, server).await?);
            }
        }
        tracing::debug!(op = name, "loaded op without a local implementation");
        Ok(Op::detached(name, code, closure, takes_self))
    }
}
