//! Pluggable save/load functions for custom values.
//!
//! A [`Serializer`] targets either one concrete Rust type or any value a
//! predicate accepts. The [`SerializerRegistry`] keeps serializers in
//! registration order and [`find`](SerializerRegistry::find) returns the first
//! match, so when two serializers overlap the one registered first wins.
//!
//! Registration is expected at startup. Lookups take a read lock only.

use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde_json::Value as JsonValue;
use weave_types::{CustomValue, Op, OpArgs, OpFailure, Value};

use crate::artifact::MemTraceFilesArtifact;

pub type SaveFn =
    Arc<dyn Fn(&CustomValue, &mut MemTraceFilesArtifact, &str) -> anyhow::Result<()> + Send + Sync>;
pub type LoadFn = Arc<dyn Fn(&MemTraceFilesArtifact, &str) -> anyhow::Result<CustomValue> + Send + Sync>;
pub type InlineSaveFn = Arc<dyn Fn(&CustomValue) -> anyhow::Result<JsonValue> + Send + Sync>;
pub type InlineLoadFn = Arc<dyn Fn(&JsonValue) -> anyhow::Result<CustomValue> + Send + Sync>;
pub type Predicate = Arc<dyn Fn(&CustomValue) -> bool + Send + Sync>;

/// Name a serializer's `save` and `load` use for their main file.
pub const DEFAULT_FILE_NAME: &str = "obj";

/// Input names of a serializer's load op.
pub const LOAD_OP_ARTIFACT_INPUT: &str = "artifact";
pub const LOAD_OP_NAME_INPUT: &str = "name";

/// What a serializer matches.
#[derive(Clone)]
pub enum SerializerTarget {
    /// Exactly one Rust type.
    Type(TypeId),
    /// Any value the capability check accepts.
    Predicate(Predicate),
}

impl SerializerTarget {
    pub fn matches(&self, value: &CustomValue) -> bool {
        match self {
            Self::Type(id) => value.type_id() == *id,
            Self::Predicate(check) => check(value),
        }
    }
}

impl fmt::Debug for SerializerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Type(id) => f.debug_tuple("Type").field(id).finish(),
            Self::Predicate(_) => f.write_str("Predicate"),
        }
    }
}

/// Optional codec that embeds the payload directly in the envelope.
#[derive(Clone)]
pub struct InlineCodec {
    pub serialize: InlineSaveFn,
    pub deserialize: InlineLoadFn,
}

/// Save and load functions for one family of custom values.
#[derive(Clone)]
pub struct Serializer {
    id: String,
    target: SerializerTarget,
    save: SaveFn,
    load: LoadFn,
    inline: Option<InlineCodec>,
}

impl Serializer {
    /// A serializer for values of type `T`, identified by its type name.
    pub fn for_type<T, S, L>(save: S, load: L) -> Self
    where
        T: Any,
        S: Fn(&CustomValue, &mut MemTraceFilesArtifact, &str) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
        L: Fn(&MemTraceFilesArtifact, &str) -> anyhow::Result<CustomValue> + Send + Sync + 'static,
    {
        Self {
            id: std::any::type_name::<T>().to_string(),
            target: SerializerTarget::Type(TypeId::of::<T>()),
            save: Arc::new(save),
            load: Arc::new(load),
            inline: None,
        }
    }

    /// A serializer for any value `check` accepts.
    pub fn with_predicate<P, S, L>(id: impl Into<String>, check: P, save: S, load: L) -> Self
    where
        P: Fn(&CustomValue) -> bool + Send + Sync + 'static,
        S: Fn(&CustomValue, &mut MemTraceFilesArtifact, &str) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
        L: Fn(&MemTraceFilesArtifact, &str) -> anyhow::Result<CustomValue> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            target: SerializerTarget::Predicate(Arc::new(check)),
            save: Arc::new(save),
            load: Arc::new(load),
            inline: None,
        }
    }

    /// Override the id written into envelopes.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_inline<S, L>(mut self, serialize: S, deserialize: L) -> Self
    where
        S: Fn(&CustomValue) -> anyhow::Result<JsonValue> + Send + Sync + 'static,
        L: Fn(&JsonValue) -> anyhow::Result<CustomValue> + Send + Sync + 'static,
    {
        self.inline = Some(InlineCodec {
            serialize: Arc::new(serialize),
            deserialize: Arc::new(deserialize),
        });
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn target(&self) -> &SerializerTarget {
        &self.target
    }

    pub fn matches(&self, value: &CustomValue) -> bool {
        self.target.matches(value)
    }

    pub fn inline(&self) -> Option<&InlineCodec> {
        self.inline.as_ref()
    }

    pub fn save(
        &self,
        value: &CustomValue,
        artifact: &mut MemTraceFilesArtifact,
        name: &str,
    ) -> anyhow::Result<()> {
        (self.save)(value, artifact, name)
    }

    pub fn load(&self, artifact: &MemTraceFilesArtifact, name: &str) -> anyhow::Result<CustomValue> {
        (self.load)(artifact, name)
    }

    /// The serializer's `load` as a persistable op.
    ///
    /// The op takes the staged files as an opaque `artifact` input and the
    /// file name as `name`. Its identity is the serializer id, so every
    /// process that registers the same serializer derives the same op.
    pub fn load_op(&self) -> Op {
        let load = Arc::clone(&self.load);
        Op::new(format!("load_{}", self.id), self.id.clone(), move |args: OpArgs| {
            let artifact = args
                .input(LOAD_OP_ARTIFACT_INPUT)
                .and_then(Value::as_custom)
                .and_then(CustomValue::downcast_ref::<MemTraceFilesArtifact>)
                .ok_or_else(|| OpFailure::new("TypeError", "load op needs an artifact input"))?;
            let name = args
                .input(LOAD_OP_NAME_INPUT)
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_FILE_NAME);
            load(artifact, name).map(Value::Custom).map_err(OpFailure::from)
        })
    }
}

impl fmt::Debug for Serializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Serializer")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("inline", &self.inline.is_some())
            .finish()
    }
}

/// Inputs for invoking a load op directly.
pub fn load_op_inputs(artifact: MemTraceFilesArtifact, name: &str) -> BTreeMap<String, Value> {
    BTreeMap::from([
        (
            LOAD_OP_ARTIFACT_INPUT.to_string(),
            Value::Custom(CustomValue::opaque(artifact)),
        ),
        (LOAD_OP_NAME_INPUT.to_string(), Value::from(name)),
    ])
}

/// Ordered collection of serializers.
#[derive(Default)]
pub struct SerializerRegistry {
    serializers: RwLock<Vec<Arc<Serializer>>>,
}

impl SerializerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the built-in serializers.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        crate::datetime::register(&registry);
        registry
    }

    /// Append a serializer. Earlier registrations take precedence.
    pub fn register(&self, serializer: Serializer) {
        tracing::debug!(id = serializer.id(), "registered serializer");
        self.serializers
            .write()
            .expect("lock poisoned")
            .push(Arc::new(serializer));
    }

    /// First serializer whose target matches `value`.
    pub fn find(&self, value: &CustomValue) -> Option<Arc<Serializer>> {
        self.serializers
            .read()
            .expect("lock poisoned")
            .iter()
            .find(|s| s.matches(value))
            .cloned()
    }

    /// First serializer registered under `id`.
    pub fn by_id(&self, id: &str) -> Option<Arc<Serializer>> {
        self.serializers
            .read()
            .expect("lock poisoned")
            .iter()
            .find(|s| s.id() == id)
            .cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        self.serializers
            .read()
            .expect("lock poisoned")
            .iter()
            .map(|s| s.id().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.serializers.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for SerializerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializerRegistry")
            .field("ids", &self.ids())
            .finish()
    }
}
