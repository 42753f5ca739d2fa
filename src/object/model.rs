//! Invocation capability for exposed objects.
//!
//! The broker never reflects over host objects. Each kind of exposed object
//! implements [`RemoteObject`] and is addressed by implementation index; the
//! [`ApiMap`](super::ApiMap) translates wire indices into those.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::protocol::{TypeDesc, Variant};
use crate::types::Result;

/// Result of a property write.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyWrite {
    /// The stored value changed; listeners must be told the new value.
    Changed(Variant),
    /// The write was accepted but the value is the same as before.
    Unchanged,
}

/// A local object that can be exposed to remote peers.
///
/// Implementations use interior mutability: the broker holds shared handles
/// and the host keeps its own.
pub trait RemoteObject: Send + Sync + fmt::Debug {
    /// Call method `method` with `args`. Void methods return `Variant::Invalid`.
    fn call(&self, method: usize, args: &[Variant]) -> Result<Variant>;

    fn read_property(&self, property: usize) -> Result<Variant>;

    fn write_property(&self, property: usize, value: Variant) -> Result<PropertyWrite>;

    /// Self-description used for name-only registration.
    fn describe(&self) -> Option<ObjectDescription> {
        None
    }
}

/// A method as the object itself describes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    pub name: String,
    pub params: Vec<TypeDesc>,
    pub returns: TypeDesc,
}

/// A property as the object itself describes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    pub ty: TypeDesc,
}

/// Members in implementation-index order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDescription {
    pub methods: Vec<MethodDescriptor>,
    pub properties: Vec<PropertyDescriptor>,
}

/// Shared handle to an exposed object.
pub type ObjectHandle = Arc<dyn RemoteObject>;

/// Identity of an exposed object, independent of the handle used to reach it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectKey(usize);

impl ObjectKey {
    pub fn of(object: &ObjectHandle) -> Self {
        Self(Arc::as_ptr(object) as *const () as usize)
    }
}
