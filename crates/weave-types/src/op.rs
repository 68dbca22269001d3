//! Traceable operations.
//!
//! An [`Op`] pairs a function body with the data that identifies it when
//! persisted: its name, its code text, and the values it closes over. Two
//! ops with the same identity content get the same digest, so redefining an
//! op with an identical body does not create a new version.
//!
//! Methods are ops with `takes_self` set. They carry an explicit receiver
//! slot that the proxy layer fills when the op is read off an object.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::refs::Ref;
use crate::value::{SavedRef, Value};

/// Failure raised by an op body.
///
/// `Display` gives the exception summary recorded on the call.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct OpFailure {
    pub kind: String,
    pub message: String,
}

impl OpFailure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for OpFailure {
    fn from(err: anyhow::Error) -> Self {
        Self::new("Error", format!("{err:#}"))
    }
}

/// The object an op method is bound to.
#[derive(Clone, Debug, PartialEq)]
pub struct Receiver {
    pub value: Value,
    pub reference: Option<Ref>,
}

/// Arguments handed to an op body.
#[derive(Clone, Debug, Default)]
pub struct OpArgs {
    pub receiver: Option<Receiver>,
    pub inputs: BTreeMap<String, Value>,
}

impl OpArgs {
    pub fn input(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name)
    }
}

pub type OpBody = Arc<dyn Fn(OpArgs) -> Result<Value, OpFailure> + Send + Sync>;

/// A named, persistable function.
#[derive(Clone)]
pub struct Op {
    name: String,
    code: String,
    closure: BTreeMap<String, Value>,
    takes_self: bool,
    body: OpBody,
    receiver: Option<Box<Receiver>>,
    saved: SavedRef,
}

impl Op {
    pub fn new<F>(name: impl Into<String>, code: impl Into<String>, body: F) -> Self
    where
        F: Fn(OpArgs) -> Result<Value, OpFailure> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            code: code.into(),
            closure: BTreeMap::new(),
            takes_self: false,
            body: Arc::new(body),
            receiver: None,
            saved: SavedRef::new(),
        }
    }

    /// An op whose body expects a bound receiver.
    pub fn method<F>(name: impl Into<String>, code: impl Into<String>, body: F) -> Self
    where
        F: Fn(OpArgs) -> Result<Value, OpFailure> + Send + Sync + 'static,
    {
        Self {
            takes_self: true,
            ..Self::new(name, code, body)
        }
    }

    /// An op known only by its persisted identity.
    ///
    /// Invoking it fails until a body is supplied with [`Op::with_body`].
    pub fn detached(
        name: impl Into<String>,
        code: impl Into<String>,
        closure: BTreeMap<String, Value>,
        takes_self: bool,
    ) -> Self {
        let name = name.into();
        let missing = name.clone();
        Self {
            closure,
            takes_self,
            ..Self::new(name, code, move |_| {
                Err(OpFailure::new(
                    "OpUnavailable",
                    format!("op {missing:?} has no implementation in this process"),
                ))
            })
        }
    }

    /// Record a captured value as part of the op's identity.
    pub fn with_closure(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.closure.insert(name.into(), value.into());
        self.saved = SavedRef::new();
        self
    }

    /// Replace the body, keeping identity and any attached ref.
    pub fn with_body(mut self, body: OpBody) -> Self {
        self.body = body;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn closure(&self) -> &BTreeMap<String, Value> {
        &self.closure
    }

    pub fn takes_self(&self) -> bool {
        self.takes_self
    }

    pub fn body(&self) -> &OpBody {
        &self.body
    }

    pub fn receiver(&self) -> Option<&Receiver> {
        self.receiver.as_deref()
    }

    pub fn is_bound(&self) -> bool {
        self.receiver.is_some()
    }

    /// A copy of this op bound to `receiver`. The copy shares the op's ref.
    pub fn bind(&self, receiver: Receiver) -> Self {
        Self {
            receiver: Some(Box::new(receiver)),
            ..self.clone()
        }
    }

    /// Run the body directly, without recording a call.
    pub fn call(&self, inputs: BTreeMap<String, Value>) -> Result<Value, OpFailure> {
        (self.body)(OpArgs {
            receiver: self.receiver.as_deref().cloned(),
            inputs,
        })
    }

    pub fn saved_ref(&self) -> Option<&Ref> {
        self.saved.get()
    }

    pub fn saved_slot(&self) -> &SavedRef {
        &self.saved
    }
}

impl PartialEq for Op {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.code == other.code
            && self.closure == other.closure
            && self.takes_self == other.takes_self
    }
}

impl fmt::Debug for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Op")
            .field("name", &self.name)
            .field("takes_self", &self.takes_self)
            .field("bound", &self.is_bound())
            .field("saved", &self.saved)
            .finish()
    }
}
