use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use netaddon_core::{DescriptorError, ResourceDescriptor};

use crate::{labels, CiliumConfig, CONFIG_MAP};

/// Agent settings that do not depend on [`CiliumConfig`].
const AGENT_SETTINGS: &[(&str, &str)] = &[
    ("identity-allocation-mode", "crd"),
    ("cilium-endpoint-gc-interval", "5m0s"),
    ("enable-policy", "default"),
    ("enable-ipv4", "true"),
    ("enable-ipv6", "false"),
    ("custom-cni-conf", "false"),
    ("enable-bpf-clock-probe", "true"),
    ("monitor-aggregation", "medium"),
    ("monitor-aggregation-interval", "5s"),
    ("monitor-aggregation-flags", "all"),
    ("bpf-map-dynamic-size-ratio", "0.0025"),
    ("bpf-policy-map-max", "16384"),
    ("bpf-lb-map-max", "65536"),
    ("preallocate-bpf-maps", "false"),
    ("sidecar-istio-proxy-image", "cilium/istio_proxy"),
    ("cluster-name", "default"),
    ("cluster-id", ""),
    ("tunnel", "vxlan"),
    ("enable-l7-proxy", "true"),
    ("wait-bpf-mount", "false"),
    ("enable-ipv4-masquerade", "true"),
    ("enable-ipv6-masquerade", "true"),
    ("enable-bpf-masquerade", "true"),
    ("enable-xt-socket-fallback", "true"),
    ("install-iptables-rules", "true"),
    ("auto-direct-node-routes", "false"),
    ("enable-bandwidth-manager", "true"),
    ("enable-local-redirect-policy", "false"),
    ("kube-proxy-replacement", "probe"),
    ("kube-proxy-replacement-healthz-bind-address", ""),
    ("enable-health-check-nodeport", "true"),
    ("node-port-bind-protection", "true"),
    ("enable-auto-protect-node-port-range", "true"),
    ("enable-session-affinity", "true"),
    ("enable-endpoint-health-checking", "true"),
    ("enable-health-checking", "true"),
    ("enable-well-known-identities", "false"),
    ("enable-remote-node-identity", "true"),
    ("operator-api-serve-addr", "127.0.0.1:9234"),
    ("enable-hubble", "true"),
    ("hubble-socket-path", "/var/run/cilium/hubble.sock"),
    ("hubble-listen-address", ":4244"),
    ("hubble-disable-tls", "false"),
    ("hubble-tls-cert-file", "/var/lib/cilium/tls/hubble/server.crt"),
    ("hubble-tls-key-file", "/var/lib/cilium/tls/hubble/server.key"),
    ("hubble-tls-client-ca-files", "/var/lib/cilium/tls/hubble/client-ca.crt"),
    ("ipam", "cluster-pool"),
    ("cluster-pool-ipv4-cidr", "10.0.0.0/8"),
    ("cluster-pool-ipv4-mask-size", "24"),
    ("disable-cnp-status-updates", "true"),
];

pub(crate) fn config_map(cfg: &CiliumConfig) -> Result<ResourceDescriptor, DescriptorError> {
    let mut data: BTreeMap<String, String> =
        AGENT_SETTINGS.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    data.insert("debug".to_string(), cfg.debug.to_string());

    ResourceDescriptor::from_serialize(&ConfigMap {
        metadata: ObjectMeta {
            name: Some(CONFIG_MAP.to_string()),
            namespace: Some(cfg.namespace.clone()),
            labels: Some(labels(&[])),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(cfg: &CiliumConfig) -> BTreeMap<String, String> {
        let cm: ConfigMap = serde_json::from_value(config_map(cfg).unwrap().into_payload()).unwrap();
        cm.data.unwrap()
    }

    #[test]
    fn debug_follows_config() {
        assert_eq!(data(&CiliumConfig::default())["debug"], "false");
        let cfg = CiliumConfig { debug: true, ..Default::default() };
        assert_eq!(data(&cfg)["debug"], "true");
    }

    #[test]
    fn networking_defaults() {
        let d = data(&CiliumConfig::default());
        assert_eq!(d["tunnel"], "vxlan");
        assert_eq!(d["ipam"], "cluster-pool");
        assert_eq!(d["cluster-pool-ipv4-cidr"], "10.0.0.0/8");
        assert_eq!(d["cluster-pool-ipv4-mask-size"], "24");
        assert_eq!(d["hubble-listen-address"], ":4244");
        assert_eq!(d["kube-proxy-replacement"], "probe");
        assert_eq!(d.len(), AGENT_SETTINGS.len() + 1);
    }
}
