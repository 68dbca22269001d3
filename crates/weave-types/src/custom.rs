//! Opaque host values persisted through a registered serializer.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

type ReprFn = fn(&(dyn Any + Send + Sync)) -> Option<String>;

fn debug_repr<T: Any + fmt::Debug>(value: &(dyn Any + Send + Sync)) -> Option<String> {
    value.downcast_ref::<T>().map(|v| format!("{v:?}"))
}

fn display_repr<T: Any + fmt::Display>(value: &(dyn Any + Send + Sync)) -> Option<String> {
    value.downcast_ref::<T>().map(|v| v.to_string())
}

fn no_repr(_: &(dyn Any + Send + Sync)) -> Option<String> {
    None
}

/// A value of an arbitrary Rust type.
///
/// The serializer registry matches custom values by [`TypeId`] or by a
/// predicate over the value. Values with no matching serializer are encoded
/// with a best-effort string.
#[derive(Clone)]
pub struct CustomValue {
    type_name: &'static str,
    type_id: TypeId,
    inner: Arc<dyn Any + Send + Sync>,
    repr: ReprFn,
    display: ReprFn,
}

impl CustomValue {
    /// Wrap a value whose `Debug` output serves as its fallback encoding.
    pub fn new<T: Any + Send + Sync + fmt::Debug>(value: T) -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            type_id: TypeId::of::<T>(),
            inner: Arc::new(value),
            repr: debug_repr::<T>,
            display: no_repr,
        }
    }

    /// Wrap a value that only has `Display` text.
    pub fn displayed<T: Any + Send + Sync + fmt::Display>(value: T) -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            type_id: TypeId::of::<T>(),
            inner: Arc::new(value),
            repr: no_repr,
            display: display_repr::<T>,
        }
    }

    /// Wrap a value with no textual representation.
    pub fn opaque<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            type_id: TypeId::of::<T>(),
            inner: Arc::new(value),
            repr: no_repr,
            display: no_repr,
        }
    }

    /// Fully qualified Rust type name.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn is<T: Any>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// `Debug` text of the wrapped value, when it has one.
    pub fn repr(&self) -> Option<String> {
        (self.repr)(self.inner.as_ref())
    }

    /// `Display` text of the wrapped value, when it was wrapped with one.
    pub fn display(&self) -> Option<String> {
        (self.display)(self.inner.as_ref())
    }

    fn text(&self) -> Option<String> {
        self.repr().or_else(|| self.display())
    }

    /// Stable per-allocation id, used in placeholder encodings.
    pub fn address(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }
}

impl PartialEq for CustomValue {
    fn eq(&self, other: &Self) -> bool {
        if self.type_id != other.type_id {
            return false;
        }
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return true;
        }
        match (self.text(), other.text()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for CustomValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.text() {
            Some(repr) => write!(f, "CustomValue<{}>({repr})", self.type_name),
            None => write!(f, "CustomValue<{}>", self.type_name),
        }
    }
}
