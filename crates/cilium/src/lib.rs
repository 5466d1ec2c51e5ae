//! Netaddon Cilium: the objects that make up a Cilium CNI install, in the
//! order they must be applied, and a `deploy` entry point that pushes them
//! through the apply core.

#![forbid(unsafe_code)]
#![recursion_limit = "512"]

use std::collections::BTreeMap;

use netaddon_apply::{install, ApplyReport, DeployError};
use netaddon_core::{DescriptorError, DesiredSet};
use netaddon_kubehub::ClusterAccessor;
use tracing::info;

mod config;
mod configmap;
mod rbac;
mod workloads;

pub use config::{CiliumConfig, ImageConfig, ImageRef, DEFAULT_NAMESPACE, DEFAULT_REGISTRY};

pub(crate) const AGENT: &str = "cilium";
pub(crate) const OPERATOR: &str = "cilium-operator";
pub(crate) const CONFIG_MAP: &str = "cilium-config";

pub const MANAGED_BY: &str = "netaddon";

/// Object labels: `extra` plus the managed-by marker.
pub(crate) fn labels(extra: &[(&str, &str)]) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = extra.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    out.insert("app.kubernetes.io/managed-by".to_string(), MANAGED_BY.to_string());
    out
}

/// The Cilium objects in dependency order: accounts, config, roles, bindings,
/// then the workloads that use them.
pub fn desired_set(cfg: &CiliumConfig) -> Result<DesiredSet, DescriptorError> {
    let ns = cfg.namespace.as_str();
    DesiredSet::try_from_iter([
        rbac::service_account(ns, AGENT)?,
        rbac::service_account(ns, OPERATOR)?,
        configmap::config_map(cfg)?,
        rbac::agent_role()?,
        rbac::operator_role()?,
        rbac::binding(ns, AGENT)?,
        rbac::binding(ns, OPERATOR)?,
        workloads::agent_daemonset(cfg)?,
        workloads::operator_deployment(cfg)?,
    ])
}

/// Apply the Cilium set against `accessor`, then refresh its kind cache.
pub async fn deploy<A>(accessor: &A, cfg: &CiliumConfig) -> Result<ApplyReport, DeployError>
where
    A: ClusterAccessor + ?Sized,
{
    let set = desired_set(cfg)?;
    info!(
        namespace = %cfg.namespace,
        agent = %cfg.images.agent_image(),
        operator = %cfg.images.operator_image(),
        objects = set.len(),
        "deploying cilium"
    );
    install(accessor, &set).await
}
