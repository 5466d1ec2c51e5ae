//! Netaddon kubehub – cluster access behind a kind-agnostic trait.
//!
//! [`ClusterAccessor`] is the only thing the apply path talks to. Two
//! implementations live here: [`KubeCluster`] for a real API server and
//! [`MemoryCluster`] for running the same code without one.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use netaddon_core::{ObjectRef, ResourceDescriptor};
use serde_json::Value as Json;

mod kinds;
mod live;
mod memory;

pub use kinds::{KindCache, KindEntry};
pub use live::{KubeCluster, DEFAULT_FIELD_MANAGER};
pub use memory::{Call, MemoryCluster, Op};

/// Errors surfaced by an accessor. "Not found" on `get` is not one of them.
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("kube api: {0}")]
    Kube(#[from] kube::Error),
    #[error("kind {0} is not served by the cluster")]
    UnknownKind(String),
    #[error("namespace required for namespaced kind {0}")]
    NamespaceRequired(String),
    #[error("object encoding: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("{0} does not exist")]
    NotFound(String),
    #[error("conflict on {0}")]
    Conflict(String),
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Generic get/create/update access to cluster objects.
///
/// Objects are exchanged as self-describing JSON (`apiVersion` + `kind` +
/// `metadata`), so one apply routine serves every resource kind.
#[async_trait]
pub trait ClusterAccessor: Send + Sync {
    /// Fetch live state; `Ok(None)` when the object does not exist.
    async fn get(&self, target: &ObjectRef) -> Result<Option<Json>, AccessError>;

    /// Create the object; returns what the server stored.
    async fn create(&self, desc: &ResourceDescriptor) -> Result<Json, AccessError>;

    /// Replace the object; returns what the server stored.
    async fn update(&self, desc: &ResourceDescriptor) -> Result<Json, AccessError>;

    /// Drop and rebuild any cached kind-to-endpoint mapping.
    async fn invalidate(&self) -> Result<(), AccessError>;
}

#[async_trait]
impl<T: ClusterAccessor + ?Sized> ClusterAccessor for std::sync::Arc<T> {
    async fn get(&self, target: &ObjectRef) -> Result<Option<Json>, AccessError> { (**self).get(target).await }
    async fn create(&self, desc: &ResourceDescriptor) -> Result<Json, AccessError> { (**self).create(desc).await }
    async fn update(&self, desc: &ResourceDescriptor) -> Result<Json, AccessError> { (**self).update(desc).await }
    async fn invalidate(&self) -> Result<(), AccessError> { (**self).invalidate().await }
}

/// Read `metadata.resourceVersion` off a stored object.
pub fn resource_version(obj: &Json) -> Option<&str> {
    obj.pointer("/metadata/resourceVersion").and_then(|v| v.as_str())
}
