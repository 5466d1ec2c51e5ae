use serde::Serialize;
use serde_json::Value as Json;

use crate::{DescriptorError, ObjectRef};

/// Metadata keys owned by the API server; never part of a desired payload.
const SERVER_METADATA: &[&str] = &["resourceVersion", "uid", "creationTimestamp", "managedFields", "generation", "selfLink"];

/// A fully formed desired object together with its identity.
///
/// The identity is read out of the payload once, on construction, and is
/// guaranteed to match it for the lifetime of the descriptor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceDescriptor {
    target: ObjectRef,
    payload: Json,
}

impl ResourceDescriptor {
    /// Build a descriptor from a JSON object carrying `apiVersion`, `kind` and
    /// `metadata.name`. Server-owned metadata and `status` are dropped.
    pub fn from_value(mut payload: Json) -> Result<Self, DescriptorError> {
        strip_server_owned(&mut payload);
        let target = identity_of(&payload)?;
        Ok(Self { target, payload })
    }

    /// Serialize any typed object (e.g. a `k8s-openapi` struct) into a descriptor.
    pub fn from_serialize<T: Serialize>(obj: &T) -> Result<Self, DescriptorError> {
        Self::from_value(serde_json::to_value(obj)?)
    }

    pub fn target(&self) -> &ObjectRef { &self.target }

    pub fn payload(&self) -> &Json { &self.payload }

    pub fn into_payload(self) -> Json { self.payload }

    /// Rewrite the payload in place. Unlike [`from_value`](Self::from_value),
    /// server-owned fields written by `f` are kept; the identity must not move.
    pub fn map_payload(mut self, f: impl FnOnce(&mut Json)) -> Result<Self, DescriptorError> {
        f(&mut self.payload);
        let after = identity_of(&self.payload)?;
        if after != self.target {
            return Err(DescriptorError::IdentityChanged(self.target));
        }
        Ok(self)
    }
}

fn strip_server_owned(v: &mut Json) {
    let Some(obj) = v.as_object_mut() else { return };
    obj.remove("status");
    if let Some(meta) = obj.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        for key in SERVER_METADATA {
            meta.remove(*key);
        }
    }
}

fn identity_of(v: &Json) -> Result<ObjectRef, DescriptorError> {
    let obj = v.as_object().ok_or(DescriptorError::NotAnObject)?;
    let api_version = required_str(obj.get("apiVersion"), "apiVersion")?;
    let kind = required_str(obj.get("kind"), "kind")?;
    let meta = obj.get("metadata");
    let name = required_str(meta.and_then(|m| m.get("name")), "metadata.name")?;
    let namespace = match meta.and_then(|m| m.get("namespace")) {
        None | Some(Json::Null) => None,
        Some(Json::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(_) => return Err(DescriptorError::Invalid("metadata.namespace")),
    };
    Ok(ObjectRef { api_version, kind, namespace, name })
}

fn required_str(v: Option<&Json>, field: &'static str) -> Result<String, DescriptorError> {
    match v {
        None | Some(Json::Null) => Err(DescriptorError::Missing(field)),
        Some(Json::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(_) => Err(DescriptorError::Invalid(field)),
    }
}

/// Ordered descriptors, in the order they must be applied.
///
/// Order is whatever the caller pushes; it encodes dependencies (roles before
/// bindings, config before workloads) and is never rearranged.
#[derive(Debug, Clone, Default)]
pub struct DesiredSet {
    items: Vec<ResourceDescriptor>,
}

impl DesiredSet {
    pub fn new() -> Self { Self::default() }

    /// Append a descriptor, refusing an identity that is already present.
    pub fn push(&mut self, desc: ResourceDescriptor) -> Result<(), DescriptorError> {
        if self.items.iter().any(|d| d.target == desc.target) {
            return Err(DescriptorError::Duplicate(desc.target));
        }
        self.items.push(desc);
        Ok(())
    }

    pub fn try_from_iter<I>(iter: I) -> Result<Self, DescriptorError>
    where
        I: IntoIterator<Item = ResourceDescriptor>,
    {
        let mut set = Self::new();
        for d in iter {
            set.push(d)?;
        }
        Ok(set)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ResourceDescriptor> { self.items.iter() }

    pub fn targets(&self) -> impl Iterator<Item = &ObjectRef> + '_ { self.items.iter().map(|d| &d.target) }

    pub fn len(&self) -> usize { self.items.len() }

    pub fn is_empty(&self) -> bool { self.items.is_empty() }
}

impl<'a> IntoIterator for &'a DesiredSet {
    type Item = &'a ResourceDescriptor;
    type IntoIter = std::slice::Iter<'a, ResourceDescriptor>;

    fn into_iter(self) -> Self::IntoIter { self.items.iter() }
}
