//! Immutable addresses of persisted data.
//!
//! A ref names an object version, a table, or a call, plus an optional
//! "extra" path of edge-typed segments into the nested value. Refs are value
//! objects: extending the path returns a new ref and never touches the
//! receiver.
//!
//! The URI form is
//! `weave://<entity>/<project>/object/<name>:<digest>[/<edge>/<arg>]*`, with
//! `table/<digest>` and `call/<id>` for the other kinds. Every component is
//! percent-encoded, so `parse_uri(r.uri()) == r` holds for any component text.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::digest::DigestKind;
use crate::error::{TypeError, TypeResult};

/// URI scheme prefix shared by every ref.
pub const URI_PREFIX: &str = "weave://";

/// The kind of step an extra-path segment takes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EdgeType {
    /// Dictionary key lookup.
    Key,
    /// Field access on an object record.
    Attr,
    /// List element by position.
    Index,
    /// Table row by row digest.
    Id,
}

impl EdgeType {
    /// Wire spelling of this edge type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Key => "key",
            Self::Attr => "attr",
            Self::Index => "idx",
            Self::Id => "id",
        }
    }

    /// Parse the wire spelling of an edge type.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "key" => Some(Self::Key),
            "attr" => Some(Self::Attr),
            "idx" => Some(Self::Index),
            "id" => Some(Self::Id),
            _ => None,
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of an extra path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefSegment {
    pub edge: EdgeType,
    pub arg: String,
}

impl RefSegment {
    pub fn new(edge: EdgeType, arg: impl Into<String>) -> Self {
        Self {
            edge,
            arg: arg.into(),
        }
    }

    pub fn key(key: impl Into<String>) -> Self {
        Self::new(EdgeType::Key, key)
    }

    pub fn attr(name: impl Into<String>) -> Self {
        Self::new(EdgeType::Attr, name)
    }

    pub fn index(index: usize) -> Self {
        Self::new(EdgeType::Index, index.to_string())
    }

    pub fn id(row_digest: impl Into<String>) -> Self {
        Self::new(EdgeType::Id, row_digest)
    }

    /// The argument as a list position, for `idx` segments.
    pub fn as_index(&self) -> Option<usize> {
        match self.edge {
            EdgeType::Index => self.arg.parse().ok(),
            _ => None,
        }
    }
}

fn extended(extra: &[RefSegment], segment: RefSegment) -> Vec<RefSegment> {
    let mut next = Vec::with_capacity(extra.len() + 1);
    next.extend_from_slice(extra);
    next.push(segment);
    next
}

fn encode(component: &str) -> String {
    urlencoding::encode(component).into_owned()
}

fn decode(uri: &str, component: &str) -> TypeResult<String> {
    urlencoding::decode(component)
        .map(|c| c.into_owned())
        .map_err(|e| TypeError::malformed(uri, format!("bad percent-encoding: {e}")))
}

fn require_non_empty(component: &'static str, value: &str) -> TypeResult<()> {
    if value.is_empty() {
        return Err(TypeError::InvalidComponent {
            component,
            reason: "must not be empty".into(),
        });
    }
    Ok(())
}

fn write_extra(out: &mut String, extra: &[RefSegment]) {
    for segment in extra {
        out.push('/');
        out.push_str(segment.edge.as_str());
        out.push('/');
        out.push_str(&encode(&segment.arg));
    }
}

/// Address of one version of a named object.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    entity: String,
    project: String,
    name: String,
    digest: String,
    extra: Vec<RefSegment>,
}

impl ObjectRef {
    /// Create an object ref with an empty extra path.
    pub fn new(
        entity: impl Into<String>,
        project: impl Into<String>,
        name: impl Into<String>,
        digest: impl Into<String>,
    ) -> TypeResult<Self> {
        let r = Self {
            entity: entity.into(),
            project: project.into(),
            name: name.into(),
            digest: digest.into(),
            extra: Vec::new(),
        };
        require_non_empty("entity", &r.entity)?;
        require_non_empty("project", &r.project)?;
        require_non_empty("name", &r.name)?;
        require_non_empty("digest", &r.digest)?;
        Ok(r)
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    /// `"<entity>/<project>"`, the project id the server keys on.
    pub fn project_id(&self) -> String {
        format!("{}/{}", self.entity, self.project)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn extra(&self) -> &[RefSegment] {
        &self.extra
    }

    /// Returns `true` if the digest is `latest` or a version ordinal.
    pub fn has_placeholder_digest(&self) -> bool {
        DigestKind::of(&self.digest).is_placeholder()
    }

    /// A copy of this ref pointing at a concrete content digest.
    pub fn with_digest(&self, digest: impl Into<String>) -> Self {
        Self {
            digest: digest.into(),
            ..self.clone()
        }
    }

    /// A copy of this ref without any extra path.
    pub fn without_extra(&self) -> Self {
        Self {
            extra: Vec::new(),
            ..self.clone()
        }
    }

    pub fn with_segment(&self, segment: RefSegment) -> Self {
        Self {
            extra: extended(&self.extra, segment),
            ..self.clone()
        }
    }

    pub fn with_attr(&self, name: impl Into<String>) -> Self {
        self.with_segment(RefSegment::attr(name))
    }

    pub fn with_key(&self, key: impl Into<String>) -> Self {
        self.with_segment(RefSegment::key(key))
    }

    pub fn with_index(&self, index: usize) -> Self {
        self.with_segment(RefSegment::index(index))
    }

    pub fn with_item(&self, row_digest: impl Into<String>) -> Self {
        self.with_segment(RefSegment::id(row_digest))
    }

    pub fn uri(&self) -> String {
        let mut out = format!(
            "{URI_PREFIX}{}/{}/object/{}:{}",
            encode(&self.entity),
            encode(&self.project),
            encode(&self.name),
            encode(&self.digest)
        );
        write_extra(&mut out, &self.extra);
        out
    }
}

/// Address of a content-addressed row collection.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TableRef {
    entity: String,
    project: String,
    digest: String,
    extra: Vec<RefSegment>,
}

impl TableRef {
    pub fn new(
        entity: impl Into<String>,
        project: impl Into<String>,
        digest: impl Into<String>,
    ) -> TypeResult<Self> {
        let r = Self {
            entity: entity.into(),
            project: project.into(),
            digest: digest.into(),
            extra: Vec::new(),
        };
        require_non_empty("entity", &r.entity)?;
        require_non_empty("project", &r.project)?;
        require_non_empty("digest", &r.digest)?;
        Ok(r)
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

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn extra(&self) -> &[RefSegment] {
        &self.extra
    }

    pub fn without_extra(&self) -> Self {
        Self {
            extra: Vec::new(),
            ..self.clone()
        }
    }

    pub fn with_segment(&self, segment: RefSegment) -> Self {
        Self {
            extra: extended(&self.extra, segment),
            ..self.clone()
        }
    }

    pub fn with_item(&self, row_digest: impl Into<String>) -> Self {
        self.with_segment(RefSegment::id(row_digest))
    }

    pub fn uri(&self) -> String {
        let mut out = format!(
            "{URI_PREFIX}{}/{}/table/{}",
            encode(&self.entity),
            encode(&self.project),
            encode(&self.digest)
        );
        write_extra(&mut out, &self.extra);
        out
    }
}

/// Address of a recorded call.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CallRef {
    entity: String,
    project: String,
    call_id: String,
    extra: Vec<RefSegment>,
}

impl CallRef {
    pub fn new(
        entity: impl Into<String>,
        project: impl Into<String>,
        call_id: impl Into<String>,
    ) -> TypeResult<Self> {
        let r = Self {
            entity: entity.into(),
            project: project.into(),
            call_id: call_id.into(),
            extra: Vec::new(),
        };
        require_non_empty("entity", &r.entity)?;
        require_non_empty("project", &r.project)?;
        require_non_empty("call_id", &r.call_id)?;
        Ok(r)
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

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn extra(&self) -> &[RefSegment] {
        &self.extra
    }

    pub fn without_extra(&self) -> Self {
        Self {
            extra: Vec::new(),
            ..self.clone()
        }
    }

    pub fn with_segment(&self, segment: RefSegment) -> Self {
        Self {
            extra: extended(&self.extra, segment),
            ..self.clone()
        }
    }

    pub fn uri(&self) -> String {
        let mut out = format!(
            "{URI_PREFIX}{}/{}/call/{}",
            encode(&self.entity),
            encode(&self.project),
            encode(&self.call_id)
        );
        write_extra(&mut out, &self.extra);
        out
    }
}

/// Any addressable pointer.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Ref {
    Object(ObjectRef),
    Table(TableRef),
    Call(CallRef),
}

impl Ref {
    pub fn uri(&self) -> String {
        match self {
            Self::Object(r) => r.uri(),
            Self::Table(r) => r.uri(),
            Self::Call(r) => r.uri(),
        }
    }

    pub fn entity(&self) -> &str {
        match self {
            Self::Object(r) => r.entity(),
            Self::Table(r) => r.entity(),
            Self::Call(r) => r.entity(),
        }
    }

    pub fn project(&self) -> &str {
        match self {
            Self::Object(r) => r.project(),
            Self::Table(r) => r.project(),
            Self::Call(r) => r.project(),
        }
    }

    pub fn project_id(&self) -> String {
        format!("{}/{}", self.entity(), self.project())
    }

    pub fn extra(&self) -> &[RefSegment] {
        match self {
            Self::Object(r) => r.extra(),
            Self::Table(r) => r.extra(),
            Self::Call(r) => r.extra(),
        }
    }

    pub fn with_segment(&self, segment: RefSegment) -> Self {
        match self {
            Self::Object(r) => Self::Object(r.with_segment(segment)),
            Self::Table(r) => Self::Table(r.with_segment(segment)),
            Self::Call(r) => Self::Call(r.with_segment(segment)),
        }
    }

    pub fn with_attr(&self, name: impl Into<String>) -> Self {
        self.with_segment(RefSegment::attr(name))
    }

    pub fn with_key(&self, key: impl Into<String>) -> Self {
        self.with_segment(RefSegment::key(key))
    }

    pub fn with_index(&self, index: usize) -> Self {
        self.with_segment(RefSegment::index(index))
    }

    pub fn with_item(&self, row_digest: impl Into<String>) -> Self {
        self.with_segment(RefSegment::id(row_digest))
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&TableRef> {
        match self {
            Self::Table(r) => Some(r),
            _ => None,
        }
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Self::Object(_))
    }
}

impl From<ObjectRef> for Ref {
    fn from(r: ObjectRef) -> Self {
        Self::Object(r)
    }
}

impl From<TableRef> for Ref {
    fn from(r: TableRef) -> Self {
        Self::Table(r)
    }
}

impl From<CallRef> for Ref {
    fn from(r: CallRef) -> Self {
        Self::Call(r)
    }
}

/// Returns `true` if `s` uses the ref URI scheme.
pub fn is_ref_uri(s: &str) -> bool {
    s.starts_with(URI_PREFIX)
}

/// Parse a ref URI.
///
/// # Examples
///
/// ```
/// use weave_types::refs::parse_uri;
///
/// let r = parse_uri("weave://team/proj/object/dataset:latest/attr/rows").unwrap();
/// assert_eq!(r.uri(), "weave://team/proj/object/dataset:latest/attr/rows");
/// assert!(parse_uri("weave://team/proj/object").is_err());
/// ```
pub fn parse_uri(uri: &str) -> TypeResult<Ref> {
    let body = uri
        .strip_prefix(URI_PREFIX)
        .ok_or_else(|| TypeError::malformed(uri, "missing weave:// scheme"))?;
    let parts: Vec<&str> = body.split('/').collect();
    if parts.len() < 4 {
        return Err(TypeError::malformed(
            uri,
            "expected <entity>/<project>/<kind>/<identifier>",
        ));
    }
    // Extra-path args may be empty (a dict's "" key); the base may not.
    if parts[..4].iter().any(|p| p.is_empty()) {
        return Err(TypeError::malformed(uri, "empty path component"));
    }

    let entity = decode(uri, parts[0])?;
    let project = decode(uri, parts[1])?;
    let kind = parts[2];
    let ident = parts[3];

    let rest = &parts[4..];
    if rest.len() % 2 != 0 {
        return Err(TypeError::malformed(uri, "dangling extra path segment"));
    }
    let mut extra = Vec::with_capacity(rest.len() / 2);
    for pair in rest.chunks(2) {
        let edge = EdgeType::parse(pair[0])
            .ok_or_else(|| TypeError::malformed(uri, format!("unknown edge type {:?}", pair[0])))?;
        extra.push(RefSegment::new(edge, decode(uri, pair[1])?));
    }

    let parsed = match kind {
        "object" => {
            let (name, digest) = ident
                .split_once(':')
                .ok_or_else(|| TypeError::malformed(uri, "object ref needs <name>:<digest>"))?;
            if name.is_empty() || digest.is_empty() {
                return Err(TypeError::malformed(uri, "object name and digest must be non-empty"));
            }
            let mut r = ObjectRef::new(entity, project, decode(uri, name)?, decode(uri, digest)?)
                .map_err(|e| TypeError::malformed(uri, e.to_string()))?;
            r.extra = extra;
            Ref::Object(r)
        }
        "table" => {
            let mut r = TableRef::new(entity, project, decode(uri, ident)?)
                .map_err(|e| TypeError::malformed(uri, e.to_string()))?;
            r.extra = extra;
            Ref::Table(r)
        }
        "call" => {
            let mut r = CallRef::new(entity, project, decode(uri, ident)?)
                .map_err(|e| TypeError::malformed(uri, e.to_string()))?;
            r.extra = extra;
            Ref::Call(r)
        }
        other => {
            return Err(TypeError::malformed(uri, format!("unknown ref kind {other:?}")));
        }
    };
    Ok(parsed)
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri())
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri())
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri())
    }
}

impl fmt::Display for CallRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri())
    }
}

impl FromStr for Ref {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_uri(s)
    }
}

impl Serialize for Ref {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.uri())
    }
}

impl<'de> Deserialize<'de> for Ref {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_uri(&s).map_err(serde::de::Error::custom)
    }
}
