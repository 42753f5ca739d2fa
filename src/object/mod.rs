//! Exposed objects: API maps and the invocation capability.

pub mod api_map;
pub mod model;

pub use api_map::{ApiMap, ApiMapBuilder, ApiMember, MemberKind, MemberTarget};
pub use model::{
    MethodDescriptor, ObjectDescription, ObjectHandle, ObjectKey, PropertyDescriptor,
    PropertyWrite, RemoteObject,
};
