use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use netaddon_core::{ObjectRef, ResourceDescriptor};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::debug;
use uuid::Uuid;

use crate::{resource_version, AccessError, ClusterAccessor};

/// Usable host addresses in a /12, excluding network and broadcast.
const SERVICE_RANGE_HOSTS: u32 = (1 << 20) - 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Op {
    Get,
    Create,
    Update,
    Invalidate,
}

/// One accessor call as seen by [`MemoryCluster`]. `target` is `None` for
/// `Invalidate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    pub op: Op,
    pub target: Option<ObjectRef>,
}

impl Call {
    pub fn on(op: Op, target: &ObjectRef) -> Self { Self { op, target: Some(target.clone()) } }
}

#[derive(Debug, Clone)]
struct Fault {
    op: Op,
    name: Option<String>,
    message: String,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<ObjectRef, Json>,
    journal: Vec<Call>,
    faults: Vec<Fault>,
    last_rv: u64,
    last_ip: u32,
    invalidations: usize,
}

impl State {
    fn record(&mut self, op: Op, target: Option<&ObjectRef>) -> Result<(), AccessError> {
        self.journal.push(Call { op, target: target.cloned() });
        let hit = self.faults.iter().find(|f| {
            f.op == op && match (&f.name, target) {
                (None, _) => true,
                (Some(n), Some(t)) => *n == t.name,
                (Some(_), None) => false,
            }
        });
        match hit {
            Some(f) => Err(AccessError::Rejected(f.message.clone())),
            None => Ok(()),
        }
    }

    fn next_rv(&mut self) -> String {
        self.last_rv += 1;
        self.last_rv.to_string()
    }

    /// Next free address in the 10.96.0.0/12 service range.
    fn next_cluster_ip(&mut self) -> Result<String, AccessError> {
        if self.last_ip >= SERVICE_RANGE_HOSTS {
            return Err(AccessError::Rejected("service cluster IP range 10.96.0.0/12 is exhausted".into()));
        }
        self.last_ip += 1;
        let n = self.last_ip;
        Ok(format!("10.{}.{}.{}", 96 + (n >> 16), (n >> 8) & 0xff, n & 0xff))
    }
}

/// In-process stand-in for an API server.
///
/// Behaves like the real thing where the apply path cares: UIDs and resource
/// versions are server-assigned, updates with a stale resource version
/// conflict, creating an existing object fails, Services get a cluster IP that
/// cannot be changed afterwards, and a no-op update leaves the resource version
/// alone. Every call is journaled and faults can be injected per operation.
#[derive(Debug, Default)]
pub struct MemoryCluster {
    state: Mutex<State>,
}

impl MemoryCluster {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, State> {
        // Poisoning is ignored; state stays readable after a panic.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store an object as if some earlier actor had created it. Not journaled.
    pub fn seed(&self, desc: &ResourceDescriptor) -> Result<Json, AccessError> {
        let mut st = self.lock();
        let stored = admit(&mut st, desc.payload().clone())?;
        st.objects.insert(desc.target().clone(), stored.clone());
        Ok(stored)
    }

    /// Fail every `op` on objects named `name` with `message`.
    pub fn fail_on(&self, op: Op, name: impl Into<String>, message: impl Into<String>) {
        self.lock().faults.push(Fault { op, name: Some(name.into()), message: message.into() });
    }

    /// Fail every `op` regardless of target.
    pub fn fail_all(&self, op: Op, message: impl Into<String>) {
        self.lock().faults.push(Fault { op, name: None, message: message.into() });
    }

    pub fn clear_faults(&self) { self.lock().faults.clear(); }

    pub fn journal(&self) -> Vec<Call> { self.lock().journal.clone() }

    pub fn take_journal(&self) -> Vec<Call> { std::mem::take(&mut self.lock().journal) }

    pub fn object(&self, target: &ObjectRef) -> Option<Json> { self.lock().objects.get(target).cloned() }

    /// Every stored object, ordered by identity.
    pub fn objects(&self) -> Vec<(ObjectRef, Json)> {
        self.lock().objects.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    pub fn len(&self) -> usize { self.lock().objects.len() }

    pub fn is_empty(&self) -> bool { self.lock().objects.is_empty() }

    pub fn invalidations(&self) -> usize { self.lock().invalidations }
}

/// Fill in what the server assigns on create.
fn admit(st: &mut State, mut obj: Json) -> Result<Json, AccessError> {
    let is_service = obj.get("kind").and_then(|k| k.as_str()) == Some("Service");
    if is_service && obj.pointer("/spec/clusterIP").is_none() {
        let ip = st.next_cluster_ip()?;
        if let Some(spec) = obj.get_mut("spec").and_then(|s| s.as_object_mut()) {
            spec.insert("clusterIP".into(), Json::String(ip.clone()));
            spec.insert("clusterIPs".into(), serde_json::json!([ip]));
        }
    }
    let rv = st.next_rv();
    if let Some(meta) = obj.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        meta.insert("uid".into(), Json::String(Uuid::new_v4().to_string()));
        meta.insert("resourceVersion".into(), Json::String(rv));
    }
    Ok(obj)
}

fn without_rv(obj: &Json) -> Json {
    let mut v = obj.clone();
    if let Some(meta) = v.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        meta.remove("resourceVersion");
    }
    v
}

#[async_trait]
impl ClusterAccessor for MemoryCluster {
    async fn get(&self, target: &ObjectRef) -> Result<Option<Json>, AccessError> {
        let mut st = self.lock();
        st.record(Op::Get, Some(target))?;
        Ok(st.objects.get(target).cloned())
    }

    async fn create(&self, desc: &ResourceDescriptor) -> Result<Json, AccessError> {
        let target = desc.target();
        let mut st = self.lock();
        st.record(Op::Create, Some(target))?;
        if st.objects.contains_key(target) {
            return Err(AccessError::AlreadyExists(target.to_string()));
        }
        let stored = admit(&mut st, desc.payload().clone())?;
        debug!(object = %target, rv = ?resource_version(&stored), "memory create");
        st.objects.insert(target.clone(), stored.clone());
        Ok(stored)
    }

    async fn update(&self, desc: &ResourceDescriptor) -> Result<Json, AccessError> {
        let target = desc.target();
        let mut st = self.lock();
        st.record(Op::Update, Some(target))?;
        let live = st.objects.get(target).cloned().ok_or_else(|| AccessError::NotFound(target.to_string()))?;
        let mut incoming = desc.payload().clone();

        // Unset resourceVersion means an unconditional write, as on a real server.
        if let Some(rv) = resource_version(&incoming) {
            if Some(rv) != resource_version(&live) {
                return Err(AccessError::Conflict(format!("{}: resourceVersion {} is stale", target, rv)));
            }
        }
        let live_uid = live.pointer("/metadata/uid").cloned();
        match incoming.pointer("/metadata/uid") {
            Some(uid) if Some(uid) != live_uid.as_ref() => {
                return Err(AccessError::Conflict(format!("{}: uid precondition failed", target)));
            }
            _ => {}
        }
        if target.kind == "Service" && incoming.pointer("/spec/clusterIP") != live.pointer("/spec/clusterIP") {
            return Err(AccessError::Rejected(format!("{}: spec.clusterIP: field is immutable", target)));
        }

        if let Some(meta) = incoming.get_mut("metadata").and_then(|m| m.as_object_mut()) {
            if let Some(uid) = live_uid {
                meta.insert("uid".into(), uid);
            }
            meta.remove("resourceVersion");
        }
        let rv = if without_rv(&live) == incoming {
            resource_version(&live).unwrap_or_default().to_string()
        } else {
            st.next_rv()
        };
        if let Some(meta) = incoming.get_mut("metadata").and_then(|m| m.as_object_mut()) {
            meta.insert("resourceVersion".into(), Json::String(rv));
        }
        debug!(object = %target, rv = ?resource_version(&incoming), "memory update");
        st.objects.insert(target.clone(), incoming.clone());
        Ok(incoming)
    }

    async fn invalidate(&self) -> Result<(), AccessError> {
        let mut st = self.lock();
        st.record(Op::Invalidate, None)?;
        st.invalidations += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn svc() -> ResourceDescriptor {
        ResourceDescriptor::from_value(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": "hubble-peer", "namespace": "kube-system" },
            "spec": { "ports": [{ "port": 443 }] }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn create_assigns_server_fields() {
        let mc = MemoryCluster::new();
        let stored = mc.create(&svc()).await.unwrap();
        assert!(stored.pointer("/metadata/uid").is_some());
        assert_eq!(resource_version(&stored), Some("1"));
        assert_eq!(stored.pointer("/spec/clusterIP"), Some(&json!("10.96.0.1")));
        assert!(matches!(mc.create(&svc()).await, Err(AccessError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn update_enforces_resource_version_and_immutable_cluster_ip() {
        let mc = MemoryCluster::new();
        let stored = mc.create(&svc()).await.unwrap();

        // Desired payload without the allocated IP is refused.
        assert!(matches!(mc.update(&svc()).await, Err(AccessError::Rejected(_))));

        let stale = svc()
            .map_payload(|p| {
                p["metadata"]["resourceVersion"] = json!("999");
                p["spec"]["clusterIP"] = stored["spec"]["clusterIP"].clone();
            })
            .unwrap();
        assert!(matches!(mc.update(&stale).await, Err(AccessError::Conflict(_))));

        let fresh = svc()
            .map_payload(|p| {
                p["metadata"]["resourceVersion"] = stored["metadata"]["resourceVersion"].clone();
                p["spec"]["clusterIP"] = stored["spec"]["clusterIP"].clone();
                p["spec"]["clusterIPs"] = stored["spec"]["clusterIPs"].clone();
            })
            .unwrap();
        let after = mc.update(&fresh).await.unwrap();
        // Same content: resource version does not move.
        assert_eq!(resource_version(&after), Some("1"));
        assert_eq!(after.pointer("/metadata/uid"), stored.pointer("/metadata/uid"));
    }

    #[tokio::test]
    async fn faults_and_journal() {
        let mc = MemoryCluster::new();
        let d = svc();
        mc.fail_on(Op::Create, "hubble-peer", "quota exceeded");
        assert_eq!(mc.get(d.target()).await.unwrap(), None);
        let err = mc.create(&d).await.unwrap_err();
        assert!(err.to_string().contains("quota exceeded"), "err={}", err);
        assert!(mc.is_empty());

        mc.clear_faults();
        mc.fail_all(Op::Invalidate, "discovery unavailable");
        assert!(mc.invalidate().await.is_err());
        assert_eq!(mc.invalidations(), 0);

        let ops: Vec<Op> = mc.journal().iter().map(|c| c.op).collect();
        assert_eq!(ops, vec![Op::Get, Op::Create, Op::Invalidate]);
        assert_eq!(mc.take_journal().len(), 3);
        assert!(mc.journal().is_empty());
    }

    #[tokio::test]
    async fn cluster_ips_stay_unique_past_one_octet() {
        let mc = MemoryCluster::new();
        let mut seen = std::collections::HashSet::new();
        for i in 0..300 {
            let mut payload = svc().into_payload();
            payload["metadata"]["name"] = json!(format!("svc-{i}"));
            let stored = mc.create(&ResourceDescriptor::from_value(payload).unwrap()).await.unwrap();
            let ip = stored["spec"]["clusterIP"].as_str().unwrap().to_string();
            assert_ne!(ip, "10.96.0.0");
            assert!(seen.insert(ip.clone()), "duplicate cluster IP {ip}");
        }
        assert!(seen.contains("10.96.1.44"));
    }

    #[tokio::test]
    async fn exhausted_service_range_is_an_error() {
        let mc = MemoryCluster::new();
        mc.lock().last_ip = SERVICE_RANGE_HOSTS - 1;
        let last = mc.create(&svc()).await.unwrap();
        assert_eq!(last["spec"]["clusterIP"], "10.111.255.254");

        let next = ResourceDescriptor::from_value(json!({
            "apiVersion": "v1", "kind": "Service",
            "metadata": { "name": "one-too-many", "namespace": "kube-system" },
            "spec": { "ports": [{ "port": 80 }] }
        }))
        .unwrap();
        assert!(matches!(mc.create(&next).await, Err(AccessError::Rejected(_))));
        assert!(mc.object(next.target()).is_none());
    }
}
