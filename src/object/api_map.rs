//! API maps — the wire-visible surface of an exposed object.
//!
//! Methods and properties each have their own wire index space: the position
//! of the member in the map. Wire indices are fixed when the map is built and
//! are independent of the implementation indices the object itself uses.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::protocol::TypeDesc;
use crate::types::{Error, ObjectName, Result};

use super::model::ObjectDescription;

/// Whether a member is a method or a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberKind {
    Method,
    Property,
}

/// Which object implements a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberTarget {
    Primary,
    Adapter,
}

/// One exposed method or property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiMember {
    pub name: String,
    pub kind: MemberKind,
    pub target: MemberTarget,
    /// Index the implementing object understands.
    pub impl_index: usize,
    /// Return type for methods, value type for properties.
    pub ty: TypeDesc,
    /// Parameter types (methods only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<TypeDesc>,
}

impl ApiMember {
    /// Signature as shown in logs, e.g. `server_slot(bool) -> void`.
    pub fn signature(&self) -> String {
        match self.kind {
            MemberKind::Method => {
                let params: Vec<String> = self.params.iter().map(|p| p.to_string()).collect();
                format!("{}({}) -> {}", self.name, params.join(", "), self.ty)
            }
            MemberKind::Property => format!("{}: {}", self.name, self.ty),
        }
    }
}

/// Ordered method/property table for one exposed object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiMap {
    name: ObjectName,
    dynamic: bool,
    methods: Vec<ApiMember>,
    properties: Vec<ApiMember>,
}

impl ApiMap {
    pub fn builder(name: impl Into<String>) -> ApiMapBuilder {
        ApiMapBuilder {
            name: name.into(),
            dynamic: false,
            methods: Vec::new(),
            properties: Vec::new(),
        }
    }

    /// Build a dynamic map straight from an object's self-description.
    ///
    /// Wire indices equal implementation indices and every member targets the
    /// primary object.
    pub fn from_description(name: impl Into<String>, description: &ObjectDescription) -> Result<Self> {
        let mut builder = Self::builder(name).dynamic(true);
        for (impl_index, method) in description.methods.iter().enumerate() {
            builder = builder.method(&method.name, &method.params, method.returns, impl_index);
        }
        for (impl_index, property) in description.properties.iter().enumerate() {
            builder = builder.property(&property.name, property.ty, impl_index);
        }
        builder.build()
    }

    pub fn name(&self) -> &ObjectName {
        &self.name
    }

    /// Dynamic maps may replace an existing registration of the same name.
    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    pub fn method(&self, wire_index: i32) -> Option<&ApiMember> {
        usize::try_from(wire_index).ok().and_then(|i| self.methods.get(i))
    }

    pub fn property(&self, wire_index: i32) -> Option<&ApiMember> {
        usize::try_from(wire_index).ok().and_then(|i| self.properties.get(i))
    }

    /// Map a method wire index to the implementing object's index.
    pub fn source_method_index(&self, wire_index: i32) -> Option<usize> {
        self.method(wire_index).map(|m| m.impl_index)
    }

    /// Map a property wire index to the implementing object's index.
    pub fn source_property_index(&self, wire_index: i32) -> Option<usize> {
        self.property(wire_index).map(|p| p.impl_index)
    }

    pub fn is_adapter_method(&self, wire_index: i32) -> bool {
        self.method(wire_index)
            .is_some_and(|m| m.target == MemberTarget::Adapter)
    }

    pub fn is_adapter_property(&self, wire_index: i32) -> bool {
        self.property(wire_index)
            .is_some_and(|p| p.target == MemberTarget::Adapter)
    }

    /// Declared return type of a method.
    pub fn method_return_type(&self, wire_index: i32) -> Option<TypeDesc> {
        self.method(wire_index).map(|m| m.ty)
    }

    pub fn property_type(&self, wire_index: i32) -> Option<TypeDesc> {
        self.property(wire_index).map(|p| p.ty)
    }

    pub fn property_wire_index(&self, name: &str) -> Option<i32> {
        self.properties
            .iter()
            .position(|p| p.name == name)
            .and_then(|i| i32::try_from(i).ok())
    }

    pub fn method_wire_index(&self, name: &str) -> Option<i32> {
        self.methods
            .iter()
            .position(|m| m.name == name)
            .and_then(|i| i32::try_from(i).ok())
    }

    pub fn has_adapter_members(&self) -> bool {
        self.methods
            .iter()
            .chain(self.properties.iter())
            .any(|m| m.target == MemberTarget::Adapter)
    }
}

/// Builder for [`ApiMap`]. Members get wire indices in insertion order.
#[derive(Debug)]
pub struct ApiMapBuilder {
    name: String,
    dynamic: bool,
    methods: Vec<ApiMember>,
    properties: Vec<ApiMember>,
}

impl ApiMapBuilder {
    pub fn dynamic(mut self, dynamic: bool) -> Self {
        self.dynamic = dynamic;
        self
    }

    pub fn method(self, name: &str, params: &[TypeDesc], returns: TypeDesc, impl_index: usize) -> Self {
        self.push_method(name, params, returns, impl_index, MemberTarget::Primary)
    }

    pub fn adapter_method(
        self,
        name: &str,
        params: &[TypeDesc],
        returns: TypeDesc,
        impl_index: usize,
    ) -> Self {
        self.push_method(name, params, returns, impl_index, MemberTarget::Adapter)
    }

    pub fn property(self, name: &str, ty: TypeDesc, impl_index: usize) -> Self {
        self.push_property(name, ty, impl_index, MemberTarget::Primary)
    }

    pub fn adapter_property(self, name: &str, ty: TypeDesc, impl_index: usize) -> Self {
        self.push_property(name, ty, impl_index, MemberTarget::Adapter)
    }

    fn push_method(
        mut self,
        name: &str,
        params: &[TypeDesc],
        returns: TypeDesc,
        impl_index: usize,
        target: MemberTarget,
    ) -> Self {
        self.methods.push(ApiMember {
            name: name.to_string(),
            kind: MemberKind::Method,
            target,
            impl_index,
            ty: returns,
            params: params.to_vec(),
        });
        self
    }

    fn push_property(mut self, name: &str, ty: TypeDesc, impl_index: usize, target: MemberTarget) -> Self {
        self.properties.push(ApiMember {
            name: name.to_string(),
            kind: MemberKind::Property,
            target,
            impl_index,
            ty,
            params: Vec::new(),
        });
        self
    }

    pub fn build(self) -> Result<ApiMap> {
        let name = ObjectName::from_string(self.name).map_err(Error::validation)?;

        for (kind, members) in [("method", &self.methods), ("property", &self.properties)] {
            if i32::try_from(members.len()).is_err() {
                return Err(Error::validation(format!(
                    "{}: too many {} members for wire indices",
                    name, kind
                )));
            }
            let mut seen = HashSet::new();
            for member in members {
                if member.name.is_empty() {
                    return Err(Error::validation(format!("{}: unnamed {}", name, kind)));
                }
                if !seen.insert(member.name.as_str()) {
                    return Err(Error::validation(format!(
                        "{}: duplicate {} '{}'",
                        name, kind, member.name
                    )));
                }
            }
        }
        for property in &self.properties {
            if property.ty.is_void() {
                return Err(Error::validation(format!(
                    "{}: property '{}' cannot be void",
                    name, property.name
                )));
            }
        }

        Ok(ApiMap {
            name,
            dynamic: self.dynamic,
            methods: self.methods,
            properties: self.properties,
        })
    }
}
