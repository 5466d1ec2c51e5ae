//! Netaddon apply: ordered create-or-replace of a desired set, followed by a
//! refresh of the accessor's kind cache.

#![forbid(unsafe_code)]

use std::fmt;
use std::time::Instant;

use metrics::{counter, histogram};
use netaddon_core::{DescriptorError, DesiredSet, ObjectRef, ResourceDescriptor};
use netaddon_kubehub::{resource_version, AccessError, ClusterAccessor};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

mod preserve;

pub use preserve::preserve_server_fields;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Get,
    Create,
    Update,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Get => "get",
            Phase::Create => "create",
            Phase::Update => "update",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyAction {
    Created,
    Updated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedObject {
    pub target: ObjectRef,
    pub action: ApplyAction,
    /// Resource version reported by the server after the write.
    pub resource_version: Option<String>,
}

/// Outcome of a successful pass, in application order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyReport {
    pub applied: Vec<AppliedObject>,
}

impl ApplyReport {
    pub fn len(&self) -> usize { self.applied.len() }
    pub fn is_empty(&self) -> bool { self.applied.is_empty() }
    pub fn created(&self) -> usize { self.count(ApplyAction::Created) }
    pub fn updated(&self) -> usize { self.count(ApplyAction::Updated) }
    pub fn iter(&self) -> std::slice::Iter<'_, AppliedObject> { self.applied.iter() }

    fn count(&self, action: ApplyAction) -> usize {
        self.applied.iter().filter(|a| a.action == action).count()
    }
}

/// A pass stopped at `target`; everything before it stays applied.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("{phase} {target} failed: {source}")]
    Access {
        target: ObjectRef,
        phase: Phase,
        #[source]
        source: AccessError,
    },
    #[error("merging live state into {target}: {source}")]
    Merge {
        target: ObjectRef,
        #[source]
        source: DescriptorError,
    },
}

impl ApplyError {
    pub fn target(&self) -> &ObjectRef {
        match self {
            ApplyError::Access { target, .. } | ApplyError::Merge { target, .. } => target,
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            ApplyError::Access { phase, .. } => Some(*phase),
            ApplyError::Merge { .. } => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("building desired set: {0}")]
    Build(#[from] DescriptorError),
    #[error(transparent)]
    Apply(#[from] ApplyError),
    /// Cluster state is complete; only the kind cache may be stale.
    #[error("{count} objects applied but kind cache refresh failed: {source}", count = .report.len())]
    Degraded {
        report: ApplyReport,
        #[source]
        source: AccessError,
    },
}

impl DeployError {
    pub fn is_degraded(&self) -> bool { matches!(self, DeployError::Degraded { .. }) }

    /// The report of a degraded success; `None` for hard failures.
    pub fn report(&self) -> Option<&ApplyReport> {
        match self {
            DeployError::Degraded { report, .. } => Some(report),
            _ => None,
        }
    }
}

fn access_err(target: &ObjectRef, phase: Phase) -> impl FnOnce(AccessError) -> ApplyError + '_ {
    move |source| {
        counter!("netaddon_apply_failed_total", 1u64, "phase" => phase.to_string());
        ApplyError::Access { target: target.clone(), phase, source }
    }
}

/// Get, then create when absent or replace when present.
pub async fn apply_one<A>(accessor: &A, desc: &ResourceDescriptor) -> Result<AppliedObject, ApplyError>
where
    A: ClusterAccessor + ?Sized,
{
    let t0 = Instant::now();
    let target = desc.target();
    let live = accessor.get(target).await.map_err(access_err(target, Phase::Get))?;
    let (action, stored) = match live {
        None => {
            let stored = accessor.create(desc).await.map_err(access_err(target, Phase::Create))?;
            (ApplyAction::Created, stored)
        }
        Some(live) => {
            let merged = desc
                .clone()
                .map_payload(|p| preserve_server_fields(p, &live))
                .map_err(|source| ApplyError::Merge { target: target.clone(), source })?;
            debug!(object = %target, rv = ?resource_version(&live), "replacing live object");
            let stored = accessor.update(&merged).await.map_err(access_err(target, Phase::Update))?;
            (ApplyAction::Updated, stored)
        }
    };
    histogram!("netaddon_apply_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
    match action {
        ApplyAction::Created => { counter!("netaddon_apply_created_total", 1u64, "kind" => target.kind.clone()); }
        ApplyAction::Updated => { counter!("netaddon_apply_updated_total", 1u64, "kind" => target.kind.clone()); }
    }
    let rv = resource_version(&stored).map(str::to_string);
    info!(object = %target, action = ?action, rv = ?rv, "applied");
    Ok(AppliedObject { target: target.clone(), action, resource_version: rv })
}

/// Apply every descriptor strictly in order, stopping at the first failure.
///
/// Not transactional: on error, earlier objects remain applied and later ones
/// are never touched. Re-running converges.
pub async fn apply_all<A>(accessor: &A, set: &DesiredSet) -> Result<ApplyReport, ApplyError>
where
    A: ClusterAccessor + ?Sized,
{
    let mut report = ApplyReport::default();
    for desc in set {
        match apply_one(accessor, desc).await {
            Ok(applied) => report.applied.push(applied),
            Err(e) => {
                warn!(object = %e.target(), done = report.len(), remaining = set.len() - report.len(), error = %e, "apply stopped");
                return Err(e);
            }
        }
    }
    info!(objects = report.len(), created = report.created(), updated = report.updated(), "desired set applied");
    Ok(report)
}

/// Ask the accessor to rebuild its kind cache so newly registered kinds resolve.
pub async fn refresh_kinds<A>(accessor: &A) -> Result<(), AccessError>
where
    A: ClusterAccessor + ?Sized,
{
    match accessor.invalidate().await {
        Ok(()) => {
            debug!("kind cache refreshed");
            Ok(())
        }
        Err(e) => {
            counter!("netaddon_kind_refresh_failed_total", 1u64);
            warn!(error = %e, "kind cache refresh failed; lookups may be stale until the next discovery");
            Err(e)
        }
    }
}

/// [`apply_all`], then [`refresh_kinds`] once if and only if every object applied.
pub async fn install<A>(accessor: &A, set: &DesiredSet) -> Result<ApplyReport, DeployError>
where
    A: ClusterAccessor + ?Sized,
{
    let report = apply_all(accessor, set).await?;
    match refresh_kinds(accessor).await {
        Ok(()) => Ok(report),
        Err(source) => Err(DeployError::Degraded { report, source }),
    }
}
