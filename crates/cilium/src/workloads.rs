//! The node agent DaemonSet and the operator Deployment.
//!
//! Pod specs are large and mostly literal, so they are written as JSON and
//! checked against the typed `k8s-openapi` structs in tests.

use netaddon_core::{DescriptorError, ResourceDescriptor};
use serde_json::{json, Value as Json};

use crate::{labels, CiliumConfig, AGENT, CONFIG_MAP, OPERATOR};

const CONFIG_DIR: &str = "/tmp/cilium/config-map";

/// Env var read from an optional key of the agent config map.
fn from_config(env: &str, key: &str) -> Json {
    json!({
        "name": env,
        "valueFrom": { "configMapKeyRef": { "name": CONFIG_MAP, "key": key, "optional": true } }
    })
}

fn from_field(env: &str, path: &str) -> Json {
    json!({ "name": env, "valueFrom": { "fieldRef": { "apiVersion": "v1", "fieldPath": path } } })
}

fn host_path(name: &str, path: &str) -> Json {
    json!({ "name": name, "hostPath": { "path": path, "type": "DirectoryOrCreate" } })
}

fn config_volume() -> Json {
    json!({ "name": "cilium-config-path", "configMap": { "name": CONFIG_MAP } })
}

fn healthz(port: u16) -> Json {
    json!({ "host": "127.0.0.1", "path": "/healthz", "port": port, "scheme": "HTTP" })
}

/// Require scheduling on a different host than any pod matching `key in [value]`.
fn spread_by_host(key: &str, value: &str) -> Json {
    json!({
        "requiredDuringSchedulingIgnoredDuringExecution": [{
            "topologyKey": "kubernetes.io/hostname",
            "labelSelector": { "matchExpressions": [{ "key": key, "operator": "In", "values": [value] }] }
        }]
    })
}

pub(crate) fn agent_daemonset(cfg: &CiliumConfig) -> Result<ResourceDescriptor, DescriptorError> {
    let image = cfg.images.agent_image();
    let selector = labels(&[("k8s-app", AGENT)]);
    let pod_labels = json!({ "k8s-app": AGENT });
    let linux = |key: &str| json!({ "matchExpressions": [{ "key": key, "operator": "In", "values": ["linux"] }] });
    let brief_healthz = {
        let mut probe = healthz(9876);
        probe["httpHeaders"] = json!([{ "name": "brief", "value": "true" }]);
        probe
    };

    ResourceDescriptor::from_value(json!({
        "apiVersion": "apps/v1",
        "kind": "DaemonSet",
        "metadata": { "name": AGENT, "namespace": cfg.namespace, "labels": selector },
        "spec": {
            "selector": { "matchLabels": pod_labels },
            "updateStrategy": { "type": "RollingUpdate", "rollingUpdate": { "maxUnavailable": 1 } },
            "template": {
                "metadata": {
                    "labels": pod_labels,
                    "annotations": { "scheduler.alpha.kubernetes.io/critical-pod": "" }
                },
                "spec": {
                    "serviceAccountName": AGENT,
                    "priorityClassName": "system-node-critical",
                    "hostNetwork": true,
                    "restartPolicy": "Always",
                    "terminationGracePeriodSeconds": 1,
                    "affinity": {
                        "nodeAffinity": {
                            "requiredDuringSchedulingIgnoredDuringExecution": {
                                "nodeSelectorTerms": [linux("kubernetes.io/os"), linux("beta.kubernetes.io/os")]
                            }
                        },
                        "podAntiAffinity": spread_by_host("k8s-app", AGENT)
                    },
                    "tolerations": [{ "operator": "Exists" }],
                    "initContainers": [{
                        "name": "clean-cilium-state",
                        "image": image,
                        "imagePullPolicy": "Always",
                        "command": ["/init-container.sh"],
                        "env": [
                            from_config("CILIUM_ALL_STATE", "clean-cilium-state"),
                            from_config("CILIUM_BPF_STATE", "clean-cilium-bpf-state"),
                            from_config("CILIUM_WAIT_BPF_MOUNT", "wait-bpf-mount")
                        ],
                        "securityContext": { "privileged": true, "capabilities": { "add": ["NET_ADMIN"] } },
                        "resources": { "requests": { "cpu": "100m", "memory": "100Mi" } },
                        "volumeMounts": [
                            { "name": "bpf-maps", "mountPath": "/sys/fs/bpf", "mountPropagation": "HostToContainer" },
                            { "name": "cilium-run", "mountPath": "/var/run/cilium" }
                        ]
                    }],
                    "containers": [{
                        "name": "cilium-agent",
                        "image": image,
                        "imagePullPolicy": "Always",
                        "command": ["cilium-agent"],
                        "args": [format!("--config-dir={CONFIG_DIR}")],
                        "env": [
                            from_field("K8S_NODE_NAME", "spec.nodeName"),
                            from_field("CILIUM_K8S_NAMESPACE", "metadata.namespace"),
                            from_config("CILIUM_FLANNEL_MASTER_DEVICE", "flannel-master-device"),
                            from_config("CILIUM_FLANNEL_UNINSTALL_ON_EXIT", "flannel-uninstall-on-exit"),
                            { "name": "CILIUM_CLUSTERMESH_CONFIG", "value": "/var/lib/cilium/clustermesh/" },
                            from_config("CILIUM_CNI_CHAINING_MODE", "cni-chaining-mode"),
                            from_config("CILIUM_CUSTOM_CNI_CONF", "custom-cni-conf")
                        ],
                        "securityContext": {
                            "privileged": true,
                            "capabilities": { "add": ["NET_ADMIN", "SYS_MODULE"] }
                        },
                        "lifecycle": {
                            "postStart": { "exec": { "command": [
                                "/cni-install.sh",
                                format!("--enable-debug={}", cfg.debug),
                                "--cni-exclusive=true"
                            ] } },
                            "preStop": { "exec": { "command": ["/cni-uninstall.sh"] } }
                        },
                        "livenessProbe": {
                            "httpGet": brief_healthz,
                            "failureThreshold": 10,
                            "initialDelaySeconds": 120,
                            "periodSeconds": 30,
                            "successThreshold": 1,
                            "timeoutSeconds": 5
                        },
                        "readinessProbe": {
                            "httpGet": brief_healthz,
                            "failureThreshold": 3,
                            "initialDelaySeconds": 5,
                            "periodSeconds": 30,
                            "successThreshold": 1,
                            "timeoutSeconds": 5
                        },
                        "volumeMounts": [
                            { "name": "bpf-maps", "mountPath": "/sys/fs/bpf" },
                            { "name": "cilium-run", "mountPath": "/var/run/cilium" },
                            { "name": "cni-path", "mountPath": "/host/opt/cni/bin" },
                            { "name": "etc-cni-netd", "mountPath": "/host/etc/cni/net.d" },
                            { "name": "clustermesh-secrets", "mountPath": "/var/lib/cilium/clustermesh", "readOnly": true },
                            { "name": "cilium-config-path", "mountPath": CONFIG_DIR, "readOnly": true },
                            { "name": "lib-modules", "mountPath": "/lib/modules", "readOnly": true },
                            { "name": "xtables-lock", "mountPath": "/run/xtables.lock" },
                            { "name": "hubble-tls", "mountPath": "/var/lib/cilium/tls/hubble", "readOnly": true }
                        ]
                    }],
                    "volumes": [
                        host_path("cilium-run", "/var/run/cilium"),
                        host_path("bpf-maps", "/sys/fs/bpf"),
                        host_path("cni-path", "/opt/cni/bin"),
                        host_path("etc-cni-netd", "/etc/cni/net.d"),
                        host_path("lib-modules", "/lib/modules"),
                        host_path("xtables-lock", "/run/xtables.lock"),
                        {
                            "name": "clustermesh-secrets",
                            "secret": { "secretName": "cilium-clustermesh", "defaultMode": 420, "optional": true }
                        },
                        config_volume(),
                        {
                            "name": "hubble-tls",
                            "projected": { "sources": [
                                { "secret": {
                                    "name": "hubble-server-certs",
                                    "optional": true,
                                    "items": [
                                        { "key": "tls.crt", "path": "server.crt" },
                                        { "key": "tls.key", "path": "server.key" }
                                    ]
                                } },
                                // One source per projection entry.
                                { "configMap": {
                                    "name": "hubble-ca-cert",
                                    "optional": true,
                                    "items": [{ "key": "ca.crt", "path": "client-ca.crt" }]
                                } }
                            ] }
                        }
                    ]
                }
            }
        }
    }))
}

pub(crate) fn operator_deployment(cfg: &CiliumConfig) -> Result<ResourceDescriptor, DescriptorError> {
    let pod_labels = json!({ "io.cilium/app": "operator", "name": OPERATOR });
    let meta_labels = labels(&[("io.cilium/app", "operator"), ("name", OPERATOR)]);

    ResourceDescriptor::from_value(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": OPERATOR, "namespace": cfg.namespace, "labels": meta_labels },
        "spec": {
            "replicas": 1,
            "selector": { "matchLabels": pod_labels },
            "strategy": { "type": "RollingUpdate", "rollingUpdate": { "maxUnavailable": 1, "maxSurge": 1 } },
            "template": {
                "metadata": { "labels": pod_labels },
                "spec": {
                    "serviceAccountName": OPERATOR,
                    "priorityClassName": "system-cluster-critical",
                    "hostNetwork": true,
                    "restartPolicy": "Always",
                    "affinity": { "podAntiAffinity": spread_by_host("io.cilium/app", "operator") },
                    "tolerations": [{ "operator": "Exists" }],
                    "containers": [{
                        "name": OPERATOR,
                        "image": cfg.images.operator_image(),
                        "imagePullPolicy": "Always",
                        "command": ["cilium-operator-generic"],
                        "args": [format!("--config-dir={CONFIG_DIR}"), "--debug=$(CILIUM_DEBUG)"],
                        "env": [
                            from_field("K8S_NODE_NAME", "spec.nodeName"),
                            from_field("CILIUM_K8S_NAMESPACE", "metadata.namespace"),
                            from_config("CILIUM_DEBUG", "debug")
                        ],
                        "livenessProbe": {
                            "httpGet": healthz(9234),
                            "initialDelaySeconds": 60,
                            "periodSeconds": 10,
                            "timeoutSeconds": 3
                        },
                        "volumeMounts": [{ "name": "cilium-config-path", "mountPath": CONFIG_DIR, "readOnly": true }]
                    }],
                    "volumes": [config_volume()]
                }
            }
        }
    }))
}
