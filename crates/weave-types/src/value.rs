//! The in-process value model.
//!
//! [`Value`] is what client code builds, publishes, and passes to calls.
//! Structured values ([`ObjectRecord`], [`Table`], [`Op`]) carry a shared
//! [`SavedRef`] slot: once the value is persisted its ref is attached there,
//! and every clone of the value sees it. Mutating a structured value through
//! `&mut` gives it a fresh slot, so an edited value is saved again instead of
//! reusing the ref of its previous content.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::custom::CustomValue;
use crate::op::Op;
use crate::refs::Ref;

/// Key holding the class name in a serialized record.
pub const TYPE_KEY: &str = "_type";
/// Metadata key for the most-derived class name.
pub const CLASS_NAME_KEY: &str = "_class_name";
/// Metadata key for the ancestor class names.
pub const BASES_KEY: &str = "_bases";

/// Identity marker holding the ref a value was persisted under.
#[derive(Clone, Default)]
pub struct SavedRef(Arc<OnceLock<Ref>>);

impl SavedRef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<&Ref> {
        self.0.get()
    }

    /// Attach a ref. Returns `false` if one was already attached.
    pub fn set(&self, reference: Ref) -> bool {
        self.0.set(reference).is_ok()
    }

    /// Returns `true` if both slots belong to the same in-memory value.
    pub fn same_identity(&self, other: &SavedRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Address of the slot, usable as an identity key for graph walks.
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

impl fmt::Debug for SavedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(r) => write!(f, "SavedRef({r})"),
            None => f.write_str("SavedRef(unsaved)"),
        }
    }
}

/// A flattened instance of a user-defined type.
#[derive(Clone, Debug)]
pub struct ObjectRecord {
    class_name: String,
    bases: Vec<String>,
    fields: BTreeMap<String, Value>,
    saved: SavedRef,
}

impl ObjectRecord {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            bases: Vec::new(),
            fields: BTreeMap::new(),
            saved: SavedRef::new(),
        }
    }

    /// Set the ancestor chain, most-derived first, without the root type.
    pub fn with_bases<I, S>(mut self, bases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bases = bases.into_iter().map(Into::into).collect();
        self.saved = SavedRef::new();
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_field(name, value);
        self
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn bases(&self) -> &[String] {
        &self.bases
    }

    /// `true` if this record is of `class` or derives from it.
    pub fn is_instance_of(&self, class: &str) -> bool {
        self.class_name == class || self.bases.iter().any(|b| b == class)
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.saved = SavedRef::new();
        self.fields.insert(name.into(), value.into())
    }

    /// Mutable access to a field. Detaches the record from its saved ref.
    pub fn field_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.saved = SavedRef::new();
        self.fields.get_mut(name)
    }

    pub fn remove_field(&mut self, name: &str) -> Option<Value> {
        self.saved = SavedRef::new();
        self.fields.remove(name)
    }

    pub fn saved_ref(&self) -> Option<&Ref> {
        self.saved.get()
    }

    pub fn saved_slot(&self) -> &SavedRef {
        &self.saved
    }

    /// Rebuild the record with `fields` replaced, keeping class and bases.
    pub fn map_fields(&self, fields: BTreeMap<String, Value>) -> Self {
        Self {
            class_name: self.class_name.clone(),
            bases: self.bases.clone(),
            fields,
            saved: SavedRef::new(),
        }
    }
}

impl PartialEq for ObjectRecord {
    fn eq(&self, other: &Self) -> bool {
        self.class_name == other.class_name && self.fields == other.fields
    }
}

/// An in-memory row collection, persisted as a table.
#[derive(Clone, Debug, Default)]
pub struct Table {
    rows: Vec<Value>,
    saved: SavedRef,
}

impl Table {
    pub fn new(rows: Vec<Value>) -> Self {
        Self {
            rows,
            saved: SavedRef::new(),
        }
    }

    pub fn rows(&self) -> &[Value] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push(&mut self, row: impl Into<Value>) {
        self.saved = SavedRef::new();
        self.rows.push(row.into());
    }

    pub fn saved_ref(&self) -> Option<&Ref> {
        self.saved.get()
    }

    pub fn saved_slot(&self) -> &SavedRef {
        &self.saved
    }
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        self.rows == other.rows
    }
}

/// Any value the client can persist or rehydrate.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Dict(BTreeMap<String, Value>),
    Object(ObjectRecord),
    Table(Table),
    Ref(Ref),
    Custom(CustomValue),
    Op(Op),
}

impl Value {
    /// Build a dict from key/value pairs.
    pub fn dict<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self::Dict(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Convert plain JSON into a value without any ref or record detection.
    pub fn from_plain_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => number_to_value(n),
            serde_json::Value::String(s) => Self::Str(s.clone()),
            serde_json::Value::Array(items) => {
                Self::List(items.iter().map(Self::from_plain_json).collect())
            }
            serde_json::Value::Object(map) => Self::Dict(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_plain_json(v)))
                    .collect(),
            ),
        }
    }

    /// Short label of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::List(_) => "list",
            Self::Dict(_) => "dict",
            Self::Object(_) => "object",
            Self::Table(_) => "table",
            Self::Ref(_) => "ref",
            Self::Custom(_) => "custom",
            Self::Op(_) => "op",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Self::Null | Self::Bool(_) | Self::Int(_) | Self::Float(_) | Self::Str(_)
        )
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Dict(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRecord> {
        match self {
            Self::Object(rec) => Some(rec),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&Ref> {
        match self {
            Self::Ref(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_custom(&self) -> Option<&CustomValue> {
        match self {
            Self::Custom(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_op(&self) -> Option<&Op> {
        match self {
            Self::Op(op) => Some(op),
            _ => None,
        }
    }

    /// The ref attached to a structured value once it has been saved.
    pub fn saved_ref(&self) -> Option<&Ref> {
        match self {
            Self::Object(rec) => rec.saved_ref(),
            Self::Table(table) => table.saved_ref(),
            Self::Op(op) => op.saved_ref(),
            _ => None,
        }
    }
}

fn number_to_value(n: &serde_json::Number) -> Value {
    if let Some(i) = n.as_i64() {
        Value::Int(i)
    } else {
        Value::Float(n.as_f64().unwrap_or(f64::NAN))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self::Dict(map)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Self::Null, Into::into)
    }
}

impl From<ObjectRecord> for Value {
    fn from(rec: ObjectRecord) -> Self {
        Self::Object(rec)
    }
}

impl From<Table> for Value {
    fn from(table: Table) -> Self {
        Self::Table(table)
    }
}

impl From<Ref> for Value {
    fn from(r: Ref) -> Self {
        Self::Ref(r)
    }
}

impl From<CustomValue> for Value {
    fn from(c: CustomValue) -> Self {
        Self::Custom(c)
    }
}

impl From<Op> for Value {
    fn from(op: Op) -> Self {
        Self::Op(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refs::ObjectRef;

    fn some_ref() -> Ref {
        ObjectRef::new("e", "p", "thing", "d1").unwrap().into()
    }

    #[test]
    fn record_equality_ignores_saved_ref_and_bases() {
        let a = ObjectRecord::new("Model").with_field("x", 1);
        let b = ObjectRecord::new("Model")
            .with_bases(["Object"])
            .with_field("x", 1);
        assert!(a.saved_slot().set(some_ref()));
        assert_eq!(a, b);
        assert_ne!(a, ObjectRecord::new("Other").with_field("x", 1));
    }

    #[test]
    fn clones_share_saved_ref() {
        let rec = ObjectRecord::new("Model").with_field("x", 1);
        let clone = rec.clone();
        assert!(rec.saved_slot().set(some_ref()));
        assert_eq!(clone.saved_ref(), Some(&some_ref()));
        assert!(clone.saved_slot().same_identity(rec.saved_slot()));
        assert!(!rec.saved_slot().set(some_ref()));
    }

    #[test]
    fn mutation_detaches_identity() {
        let rec = ObjectRecord::new("Model").with_field("x", 1);
        rec.saved_slot().set(some_ref());
        let mut edited = rec.clone();
        edited.set_field("x", 2);
        assert!(edited.saved_ref().is_none());
        assert!(rec.saved_ref().is_some());
    }

    #[test]
    fn table_push_detaches() {
        let mut table = Table::new(vec![Value::from(1)]);
        table.saved_slot().set(some_ref());
        table.push(2);
        assert!(table.saved_ref().is_none());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn instance_check_uses_bases() {
        let rec = ObjectRecord::new("Dataset").with_bases(["Object"]);
        assert!(rec.is_instance_of("Dataset"));
        assert!(rec.is_instance_of("Object"));
        assert!(!rec.is_instance_of("Model"));
    }

    #[test]
    fn plain_json_conversion() {
        let json = serde_json::json!({"a": [1, 2.5, "weave://x"], "b": null});
        let value = Value::from_plain_json(&json);
        let dict = value.as_dict().unwrap();
        let list = dict["a"].as_list().unwrap();
        assert_eq!(list[0], Value::Int(1));
        assert_eq!(list[1], Value::Float(2.5));
        assert_eq!(list[2], Value::Str("weave://x".into()));
        assert!(dict["b"].is_null());
    }
}
