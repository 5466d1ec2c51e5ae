use async_trait::async_trait;
use kube::{
    api::{Api, PostParams},
    core::DynamicObject,
    discovery::Discovery,
    Client,
};
use netaddon_core::{ObjectRef, ResourceDescriptor};
use serde_json::Value as Json;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{AccessError, ClusterAccessor, KindCache, KindEntry};

pub const DEFAULT_FIELD_MANAGER: &str = "netaddon";

#[derive(Default)]
struct KindState {
    cache: Option<KindCache>,
    generation: u64,
}

/// [`ClusterAccessor`] over a live API server using the dynamic client.
///
/// Kinds are resolved through a [`KindCache`] filled by API discovery on first
/// use. The cache is only rebuilt by [`ClusterAccessor::invalidate`].
pub struct KubeCluster {
    client: Client,
    field_manager: String,
    kinds: RwLock<KindState>,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client, field_manager: DEFAULT_FIELD_MANAGER.to_string(), kinds: RwLock::new(KindState::default()) }
    }

    /// Client from the ambient environment (in-cluster or `$KUBECONFIG`).
    pub async fn try_default() -> Result<Self, AccessError> {
        Ok(Self::new(Client::try_default().await?))
    }

    pub fn with_field_manager(mut self, name: impl Into<String>) -> Self {
        self.field_manager = name.into();
        self
    }

    /// Generation of the kind cache currently in use; 0 before first discovery.
    pub async fn kind_generation(&self) -> u64 {
        self.kinds.read().await.cache.as_ref().map(|c| c.generation()).unwrap_or(0)
    }

    fn post_params(&self) -> PostParams {
        PostParams { field_manager: Some(self.field_manager.clone()), ..Default::default() }
    }

    async fn discover(&self, state: &mut KindState) -> Result<(), AccessError> {
        let discovery = Discovery::new(self.client.clone()).run().await?;
        state.generation += 1;
        let cache = KindCache::from_discovery(&discovery, state.generation);
        info!(generation = state.generation, kinds = cache.len(), "kind cache built");
        state.cache = Some(cache);
        Ok(())
    }

    async fn lookup(&self, target: &ObjectRef) -> Result<KindEntry, AccessError> {
        {
            let state = self.kinds.read().await;
            if let Some(cache) = state.cache.as_ref() {
                return cache.resolve(target).cloned().ok_or_else(|| unknown_kind(target));
            }
        }
        let mut state = self.kinds.write().await;
        // Another caller may have filled the cache while we waited for the lock.
        if state.cache.is_none() {
            self.discover(&mut state).await?;
        }
        state.cache.as_ref().and_then(|c| c.resolve(target)).cloned().ok_or_else(|| unknown_kind(target))
    }

    async fn api_for(&self, target: &ObjectRef) -> Result<Api<DynamicObject>, AccessError> {
        let entry = self.lookup(target).await?;
        if !entry.namespaced {
            return Ok(Api::all_with(self.client.clone(), &entry.resource));
        }
        match target.namespace.as_deref() {
            Some(ns) => Ok(Api::namespaced_with(self.client.clone(), ns, &entry.resource)),
            None => Err(AccessError::NamespaceRequired(target.kind.clone())),
        }
    }
}

fn unknown_kind(target: &ObjectRef) -> AccessError {
    AccessError::UnknownKind(format!("{}/{}", target.api_version, target.kind))
}

fn map_write_err(e: kube::Error, target: &ObjectRef, on_conflict: fn(String) -> AccessError) -> AccessError {
    match e {
        kube::Error::Api(ae) if ae.code == 409 => on_conflict(format!("{}: {}", target, ae.message)),
        other => AccessError::Kube(other),
    }
}

#[async_trait]
impl ClusterAccessor for KubeCluster {
    async fn get(&self, target: &ObjectRef) -> Result<Option<Json>, AccessError> {
        let api = self.api_for(target).await?;
        match api.get_opt(&target.name).await? {
            Some(obj) => Ok(Some(serde_json::to_value(&obj)?)),
            None => Ok(None),
        }
    }

    async fn create(&self, desc: &ResourceDescriptor) -> Result<Json, AccessError> {
        let target = desc.target();
        let api = self.api_for(target).await?;
        let obj: DynamicObject = serde_json::from_value(desc.payload().clone())?;
        debug!(object = %target, "POST");
        let created = api.create(&self.post_params(), &obj).await.map_err(|e| map_write_err(e, target, AccessError::AlreadyExists))?;
        Ok(serde_json::to_value(&created)?)
    }

    async fn update(&self, desc: &ResourceDescriptor) -> Result<Json, AccessError> {
        let target = desc.target();
        let api = self.api_for(target).await?;
        let obj: DynamicObject = serde_json::from_value(desc.payload().clone())?;
        debug!(object = %target, "PUT");
        let replaced = api
            .replace(&target.name, &self.post_params(), &obj)
            .await
            .map_err(|e| map_write_err(e, target, AccessError::Conflict))?;
        Ok(serde_json::to_value(&replaced)?)
    }

    async fn invalidate(&self) -> Result<(), AccessError> {
        let mut state = self.kinds.write().await;
        // Drop first: if rediscovery fails the next lookup retries it lazily.
        state.cache = None;
        self.discover(&mut state).await
    }
}
