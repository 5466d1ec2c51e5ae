//! Service accounts, cluster roles and their bindings.

use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use netaddon_core::{DescriptorError, ResourceDescriptor};

use crate::{labels, AGENT, OPERATOR};

const READ: &[&str] = &["get", "list", "watch"];

fn rule(group: &str, resources: &[&str], verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(vec![group.to_string()]),
        resources: Some(resources.iter().map(|s| s.to_string()).collect()),
        verbs: verbs.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

/// `cilium.io` resources both components manage; `with_identity_status` adds
/// `ciliumidentities/status`, which only the operator writes.
fn cilium_io(with_identity_status: bool) -> PolicyRule {
    let mut resources = Vec::new();
    for kind in [
        "ciliumnetworkpolicies",
        "ciliumclusterwidenetworkpolicies",
        "ciliumendpoints",
        "ciliumnodes",
        "ciliumidentities",
        "ciliumlocalredirectpolicies",
    ] {
        resources.push(kind.to_string());
        if kind != "ciliumidentities" || with_identity_status {
            resources.push(format!("{kind}/status"));
        }
        resources.push(format!("{kind}/finalizers"));
    }
    PolicyRule {
        api_groups: Some(vec!["cilium.io".to_string()]),
        resources: Some(resources),
        verbs: vec!["*".to_string()],
        ..Default::default()
    }
}

pub(crate) fn service_account(namespace: &str, name: &str) -> Result<ResourceDescriptor, DescriptorError> {
    ResourceDescriptor::from_serialize(&ServiceAccount {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels(&[])),
            ..Default::default()
        },
        ..Default::default()
    })
}

pub(crate) fn agent_role() -> Result<ResourceDescriptor, DescriptorError> {
    let rules = vec![
        rule("networking.k8s.io", &["networkpolicies"], READ),
        rule("discovery.k8s.io", &["endpointslices"], READ),
        rule("", &["namespaces", "services", "nodes", "endpoints"], READ),
        rule("", &["pods", "pods/finalizers"], &["get", "list", "watch", "update", "delete"]),
        rule("", &["nodes"], &["get", "list", "watch", "update"]),
        rule("", &["nodes", "nodes/status"], &["patch"]),
        rule("apiextensions.k8s.io", &["customresourcedefinitions"], &["create", "list", "watch", "update", "get"]),
        cilium_io(false),
    ];
    cluster_role(AGENT, rules)
}

pub(crate) fn operator_role() -> Result<ResourceDescriptor, DescriptorError> {
    let rules = vec![
        rule("", &["pods"], &["get", "list", "watch", "delete"]),
        rule("discovery.k8s.io", &["endpointslices"], READ),
        rule("", &["services", "endpoints", "namespaces"], READ),
        cilium_io(true),
        rule("apiextensions.k8s.io", &["customresourcedefinitions"], &["create", "get", "list", "update", "watch"]),
        // Leader election between operator replicas.
        rule("coordination.k8s.io", &["leases"], &["create", "get", "update"]),
    ];
    cluster_role(OPERATOR, rules)
}

fn cluster_role(name: &str, rules: Vec<PolicyRule>) -> Result<ResourceDescriptor, DescriptorError> {
    ResourceDescriptor::from_serialize(&ClusterRole {
        metadata: ObjectMeta { name: Some(name.to_string()), labels: Some(labels(&[])), ..Default::default() },
        rules: Some(rules),
        ..Default::default()
    })
}

/// Bind the cluster role `name` to the service account of the same name.
pub(crate) fn binding(namespace: &str, name: &str) -> Result<ResourceDescriptor, DescriptorError> {
    ResourceDescriptor::from_serialize(&ClusterRoleBinding {
        metadata: ObjectMeta { name: Some(name.to_string()), labels: Some(labels(&[])), ..Default::default() },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: name.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: name.to_string(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules_of(desc: &ResourceDescriptor) -> Vec<PolicyRule> {
        let role: ClusterRole = serde_json::from_value(desc.payload().clone()).unwrap();
        role.rules.unwrap_or_default()
    }

    #[test]
    fn agent_manages_crds_and_cilium_resources() {
        let rules = rules_of(&agent_role().unwrap());
        let crd = rules
            .iter()
            .find(|r| r.api_groups.as_deref() == Some(&["apiextensions.k8s.io".to_string()][..]))
            .unwrap();
        assert_eq!(crd.resources.as_deref(), Some(&["customresourcedefinitions".to_string()][..]));

        let cilium = rules.iter().find(|r| r.verbs == ["*"]).unwrap();
        let res = cilium.resources.as_ref().unwrap();
        assert_eq!(res.len(), 17);
        assert!(!res.iter().any(|r| r == "ciliumidentities/status"));
    }

    #[test]
    fn operator_has_one_endpointslice_rule_and_leases() {
        let rules = rules_of(&operator_role().unwrap());
        let slices = rules
            .iter()
            .filter(|r| r.resources.as_ref().is_some_and(|v| v.iter().any(|x| x == "endpointslices")))
            .count();
        assert_eq!(slices, 1);
        assert!(rules.iter().any(|r| r.resources.as_ref().is_some_and(|v| v == &["leases".to_string()])));
        let cilium = rules.iter().find(|r| r.verbs == ["*"]).unwrap();
        assert_eq!(cilium.resources.as_ref().map(Vec::len), Some(18));
    }

    #[test]
    fn binding_points_at_namespaced_account() {
        let desc = binding("cni", "cilium-operator").unwrap();
        assert!(desc.target().is_cluster_scoped());
        let crb: ClusterRoleBinding = serde_json::from_value(desc.payload().clone()).unwrap();
        assert_eq!(crb.role_ref.name, "cilium-operator");
        let subject = &crb.subjects.unwrap()[0];
        assert_eq!(subject.namespace.as_deref(), Some("cni"));
        assert_eq!(subject.name, "cilium-operator");
    }
}
