//! Netaddon core types: object identity, resource descriptors and desired sets.
//!
//! Nothing in here knows about a particular cluster client. Descriptors carry
//! plain JSON so the apply path can be exercised against any accessor.

#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

mod descriptor;

pub use descriptor::{DesiredSet, ResourceDescriptor};

/// Identity of a cluster object: `(apiVersion, kind, namespace, name)`.
///
/// `namespace` is `None` for cluster-scoped kinds (ClusterRole, CRDs, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectRef {
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self { api_version: api_version.into(), kind: kind.into(), namespace: None, name: name.into() }
    }

    /// Same identity placed in `namespace`.
    pub fn within(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Split `apiVersion` into `(group, version)`; the core group is `""`.
    pub fn group_version(&self) -> (&str, &str) {
        match self.api_version.split_once('/') {
            Some((g, v)) => (g, v),
            None => ("", self.api_version.as_str()),
        }
    }

    pub fn is_cluster_scoped(&self) -> bool { self.namespace.is_none() }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// Errors raised while building descriptors or desired sets.
#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("descriptor payload must be a JSON object")]
    NotAnObject,
    #[error("descriptor missing {0}")]
    Missing(&'static str),
    #[error("descriptor field {0} must be a non-empty string")]
    Invalid(&'static str),
    #[error("duplicate descriptor for {0}")]
    Duplicate(ObjectRef),
    #[error("payload rewrite changed the identity of {0}")]
    IdentityChanged(ObjectRef),
    #[error("encoding descriptor: {0}")]
    Encode(#[from] serde_json::Error),
}
