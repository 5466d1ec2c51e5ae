//! Carry server-assigned fields from live state into a desired payload.

use serde_json::{Map, Value as Json};

/// Copied from live state on every update.
const ALWAYS: &[&str] = &["/metadata/resourceVersion", "/metadata/uid"];

/// Fields the server fills in for a kind; copied only when desired leaves them unset.
fn server_allocated(kind: &str) -> &'static [&'static str] {
    match kind {
        "Service" => &[
            "/spec/clusterIP",
            "/spec/clusterIPs",
            "/spec/ipFamilies",
            "/spec/ipFamilyPolicy",
            "/spec/healthCheckNodePort",
        ],
        "ServiceAccount" => &["/secrets"],
        "Job" => &["/spec/selector"],
        _ => &[],
    }
}

/// Merge `live` server state into `desired` ahead of a replace.
pub fn preserve_server_fields(desired: &mut Json, live: &Json) {
    let kind = desired.get("kind").and_then(|k| k.as_str()).unwrap_or_default().to_string();
    for ptr in ALWAYS {
        if let Some(v) = live.pointer(ptr) {
            set_pointer(desired, ptr, v.clone());
        }
    }
    for ptr in server_allocated(&kind) {
        if desired.pointer(ptr).is_some() {
            continue;
        }
        if let Some(v) = live.pointer(ptr) {
            set_pointer(desired, ptr, v.clone());
        }
    }
}

/// Write `value` at a plain (unescaped) JSON pointer, creating parent objects.
fn set_pointer(root: &mut Json, ptr: &str, value: Json) -> Option<()> {
    let segs: Vec<&str> = ptr.trim_start_matches('/').split('/').collect();
    let (last, parents) = segs.split_last()?;
    let mut cur = root;
    for seg in parents {
        cur = cur.as_object_mut()?.entry(*seg).or_insert_with(|| Json::Object(Map::new()));
    }
    cur.as_object_mut()?.insert((*last).to_string(), value);
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn copies_resource_version_and_uid() {
        let mut desired = json!({ "kind": "ConfigMap", "metadata": { "name": "cilium-config" }, "data": { "debug": "true" } });
        let live = json!({
            "kind": "ConfigMap",
            "metadata": { "name": "cilium-config", "resourceVersion": "812", "uid": "u-1", "creationTimestamp": "x" },
            "data": { "debug": "false" }
        });
        preserve_server_fields(&mut desired, &live);
        assert_eq!(desired["metadata"]["resourceVersion"], "812");
        assert_eq!(desired["metadata"]["uid"], "u-1");
        // Desired content wins; unrelated live metadata is not copied.
        assert_eq!(desired["data"]["debug"], "true");
        assert!(desired["metadata"].get("creationTimestamp").is_none());
    }

    #[test]
    fn service_keeps_allocated_ip_unless_desired_sets_one() {
        let live = json!({
            "kind": "Service",
            "metadata": { "name": "hubble-peer", "resourceVersion": "3" },
            "spec": { "clusterIP": "10.96.0.7", "clusterIPs": ["10.96.0.7"], "ipFamilies": ["IPv4"] }
        });

        let mut unset = json!({ "kind": "Service", "metadata": { "name": "hubble-peer" }, "spec": { "ports": [] } });
        preserve_server_fields(&mut unset, &live);
        assert_eq!(unset["spec"]["clusterIP"], "10.96.0.7");
        assert_eq!(unset["spec"]["ipFamilies"], json!(["IPv4"]));
        assert!(unset["spec"].get("healthCheckNodePort").is_none());

        let mut headless = json!({ "kind": "Service", "metadata": { "name": "hubble-peer" }, "spec": { "clusterIP": "None" } });
        preserve_server_fields(&mut headless, &live);
        assert_eq!(headless["spec"]["clusterIP"], "None");
    }

    #[test]
    fn creates_missing_parents() {
        let mut desired = json!({ "kind": "Job" });
        let live = json!({ "kind": "Job", "metadata": { "uid": "u-2" }, "spec": { "selector": { "matchLabels": { "a": "b" } } } });
        preserve_server_fields(&mut desired, &live);
        assert_eq!(desired["metadata"]["uid"], "u-2");
        assert_eq!(desired["spec"]["selector"]["matchLabels"]["a"], "b");
    }
}
