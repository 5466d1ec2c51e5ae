#![forbid(unsafe_code)]

use netaddon_apply::{install, ApplyAction};
use netaddon_core::{DesiredSet, ResourceDescriptor};
use netaddon_kubehub::{MemoryCluster, Op};
use serde_json::json;

fn desc(v: serde_json::Value) -> ResourceDescriptor { ResourceDescriptor::from_value(v).unwrap() }

fn six_objects() -> DesiredSet {
    let labels = json!({ "app": "agent" });
    DesiredSet::try_from_iter([
        desc(json!({ "apiVersion": "v1", "kind": "ServiceAccount", "metadata": { "name": "agent", "namespace": "kube-system" } })),
        desc(json!({ "apiVersion": "v1", "kind": "ConfigMap", "metadata": { "name": "cfg", "namespace": "kube-system" }, "data": { "mode": "vxlan" } })),
        desc(json!({
            "apiVersion": "rbac.authorization.k8s.io/v1", "kind": "ClusterRole", "metadata": { "name": "role" },
            "rules": [{ "apiGroups": [""], "resources": ["pods"], "verbs": ["get", "list", "watch"] }]
        })),
        desc(json!({
            "apiVersion": "rbac.authorization.k8s.io/v1", "kind": "ClusterRoleBinding", "metadata": { "name": "binding" },
            "roleRef": { "apiGroup": "rbac.authorization.k8s.io", "kind": "ClusterRole", "name": "role" },
            "subjects": [{ "kind": "ServiceAccount", "name": "agent", "namespace": "kube-system" }]
        })),
        desc(json!({
            "apiVersion": "apps/v1", "kind": "DaemonSet", "metadata": { "name": "agent-ds", "namespace": "kube-system" },
            "spec": {
                "selector": { "matchLabels": labels },
                "template": { "metadata": { "labels": labels }, "spec": { "containers": [{ "name": "agent", "image": "agent:1" }] } }
            }
        })),
        desc(json!({
            "apiVersion": "apps/v1", "kind": "Deployment", "metadata": { "name": "controller", "namespace": "kube-system" },
            "spec": {
                "replicas": 1,
                "selector": { "matchLabels": { "app": "controller" } },
                "template": { "metadata": { "labels": { "app": "controller" } }, "spec": { "containers": [{ "name": "c", "image": "controller:1" }] } }
            }
        })),
    ])
    .unwrap()
}

#[tokio::test]
async fn fresh_cluster_then_rerun_converges() {
    let mc = MemoryCluster::new();
    let set = six_objects();

    let first = install(&mc, &set).await.unwrap();
    assert_eq!(first.created(), 6);
    let names: Vec<&str> = first.iter().map(|a| a.target.name.as_str()).collect();
    assert_eq!(names, ["agent", "cfg", "role", "binding", "agent-ds", "controller"]);
    let writes: Vec<Op> = mc.take_journal().into_iter().map(|c| c.op).filter(|op| *op == Op::Create).collect();
    assert_eq!(writes.len(), 6);
    let after_first = mc.objects();

    let second = install(&mc, &set).await.unwrap();
    assert!(second.iter().all(|a| a.action == ApplyAction::Updated));
    assert_eq!(second.updated(), 6);
    assert!(!mc.journal().iter().any(|c| c.op == Op::Create));
    assert_eq!(mc.invalidations(), 2);

    // Same desired input, same cluster state.
    assert_eq!(mc.objects(), after_first);
}

#[tokio::test]
async fn server_assigned_fields_survive_replace() {
    let mc = MemoryCluster::new();
    let sa = desc(json!({ "apiVersion": "v1", "kind": "ServiceAccount", "metadata": { "name": "agent", "namespace": "kube-system" } }));
    let svc = desc(json!({
        "apiVersion": "v1", "kind": "Service", "metadata": { "name": "peer", "namespace": "kube-system" },
        "spec": { "ports": [{ "port": 443 }] }
    }));
    let seeded_sa = mc.seed(&sa.clone().map_payload(|p| p["secrets"] = json!([{ "name": "agent-token-x" }])).unwrap()).unwrap();
    let seeded_svc = mc.seed(&svc).unwrap();

    let set = DesiredSet::try_from_iter([sa.clone(), svc.clone()]).unwrap();
    let report = install(&mc, &set).await.unwrap();
    assert_eq!(report.updated(), 2);

    let live_sa = mc.object(sa.target()).unwrap();
    assert_eq!(live_sa["metadata"]["uid"], seeded_sa["metadata"]["uid"]);
    assert_eq!(live_sa["secrets"], json!([{ "name": "agent-token-x" }]));

    let live_svc = mc.object(svc.target()).unwrap();
    assert_eq!(live_svc["spec"]["clusterIP"], seeded_svc["spec"]["clusterIP"]);
    assert_eq!(live_svc["metadata"]["resourceVersion"], seeded_svc["metadata"]["resourceVersion"]);
}
