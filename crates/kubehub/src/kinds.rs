use std::collections::HashMap;

use kube::{
    core::ApiResource,
    discovery::{Discovery, Scope},
};
use netaddon_core::ObjectRef;

/// Routing info for one served group/version/kind.
#[derive(Debug, Clone)]
pub struct KindEntry {
    pub resource: ApiResource,
    pub namespaced: bool,
}

/// Snapshot of API discovery: which kinds the server serves and where.
///
/// A cache is immutable once built. Invalidation replaces it wholesale with a
/// newer generation rather than patching entries.
#[derive(Debug, Clone, Default)]
pub struct KindCache {
    entries: HashMap<(String, String, String), KindEntry>,
    generation: u64,
}

impl KindCache {
    /// Index every served version of every group, not only the preferred one.
    pub fn from_discovery(discovery: &Discovery, generation: u64) -> Self {
        let mut entries = Vec::new();
        for group in discovery.groups() {
            for version in group.versions() {
                for (ar, caps) in group.versioned_resources(version) {
                    let namespaced = matches!(caps.scope, Scope::Namespaced);
                    entries.push((ar, namespaced));
                }
            }
        }
        Self::from_entries(entries, generation)
    }

    pub fn from_entries<I>(entries: I, generation: u64) -> Self
    where
        I: IntoIterator<Item = (ApiResource, bool)>,
    {
        let entries = entries
            .into_iter()
            .map(|(resource, namespaced)| {
                let key = (resource.group.clone(), resource.version.clone(), resource.kind.clone());
                (key, KindEntry { resource, namespaced })
            })
            .collect();
        Self { entries, generation }
    }

    pub fn resolve(&self, target: &ObjectRef) -> Option<&KindEntry> {
        let (group, version) = target.group_version();
        self.entries.get(&(group.to_string(), version.to_string(), target.kind.clone()))
    }

    pub fn generation(&self) -> u64 { self.generation }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::GroupVersionKind;

    fn ar(group: &str, version: &str, kind: &str) -> ApiResource {
        ApiResource::from_gvk(&GroupVersionKind::gvk(group, version, kind))
    }

    #[test]
    fn resolves_core_and_named_groups() {
        let cache = KindCache::from_entries(
            vec![
                (ar("", "v1", "ConfigMap"), true),
                (ar("apps", "v1", "DaemonSet"), true),
                (ar("rbac.authorization.k8s.io", "v1", "ClusterRole"), false),
            ],
            1,
        );
        let cm = cache.resolve(&ObjectRef::new("v1", "ConfigMap", "cilium-config").within("kube-system")).expect("cm");
        assert!(cm.namespaced);
        assert_eq!(cm.resource.plural, "configmaps");

        let cr = cache.resolve(&ObjectRef::new("rbac.authorization.k8s.io/v1", "ClusterRole", "cilium")).expect("cr");
        assert!(!cr.namespaced);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.generation(), 1);
    }

    #[test]
    fn unknown_version_or_kind_misses() {
        let cache = KindCache::from_entries(vec![(ar("apps", "v1", "Deployment"), true)], 1);
        assert!(cache.resolve(&ObjectRef::new("apps/v1beta1", "Deployment", "x")).is_none());
        assert!(cache.resolve(&ObjectRef::new("cilium.io/v2", "CiliumNetworkPolicy", "x")).is_none());
    }
}
