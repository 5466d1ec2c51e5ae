use serde::{Deserialize, Serialize};

pub const DEFAULT_NAMESPACE: &str = "kube-system";
pub const DEFAULT_REGISTRY: &str = "quay.io";

/// A container image split into registry host and repository path with tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub registry: String,
    pub name: String,
}

impl ImageRef {
    pub fn new(registry: impl Into<String>, name: impl Into<String>) -> Self {
        Self { registry: registry.into(), name: name.into() }
    }
}

/// Images used by the agent and the operator, with an optional registry
/// override applied to both (air-gapped mirrors).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub registry_override: Option<String>,
    pub agent: ImageRef,
    pub operator: ImageRef,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            registry_override: None,
            agent: ImageRef::new(DEFAULT_REGISTRY, "cilium/cilium:latest"),
            operator: ImageRef::new(DEFAULT_REGISTRY, "cilium/operator-generic:latest"),
        }
    }
}

impl ImageConfig {
    /// `<override or default_registry>/<name>`.
    pub fn resolve(&self, default_registry: &str, name: &str) -> String {
        let registry = match self.registry_override.as_deref() {
            Some(r) if !r.trim_end_matches('/').is_empty() => r,
            _ => default_registry,
        };
        format!("{}/{}", registry.trim_end_matches('/'), name)
    }

    pub fn agent_image(&self) -> String { self.resolve(&self.agent.registry, &self.agent.name) }

    pub fn operator_image(&self) -> String { self.resolve(&self.operator.registry, &self.operator.name) }
}

/// Everything the Cilium builders read. Passed in explicitly; nothing is
/// taken from process globals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CiliumConfig {
    /// Namespace of the service accounts, config map and workloads.
    pub namespace: String,
    pub images: ImageConfig,
    /// Agent debug logging and CNI install debug output.
    pub debug: bool,
}

impl Default for CiliumConfig {
    fn default() -> Self {
        Self { namespace: DEFAULT_NAMESPACE.to_string(), images: ImageConfig::default(), debug: false }
    }
}

impl CiliumConfig {
    pub fn with_registry(mut self, registry: impl Into<String>) -> Self {
        self.images.registry_override = Some(registry.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_images_come_from_quay() {
        let images = ImageConfig::default();
        assert_eq!(images.agent_image(), "quay.io/cilium/cilium:latest");
        assert_eq!(images.operator_image(), "quay.io/cilium/operator-generic:latest");
    }

    #[test]
    fn override_replaces_registry_for_both_images() {
        let cfg = CiliumConfig::default().with_registry("registry.internal:5000/");
        assert_eq!(cfg.images.agent_image(), "registry.internal:5000/cilium/cilium:latest");
        assert_eq!(cfg.images.operator_image(), "registry.internal:5000/cilium/operator-generic:latest");
    }

    #[test]
    fn empty_override_falls_back_to_default() {
        let cfg = CiliumConfig::default().with_registry("");
        assert_eq!(cfg.images.resolve("quay.io", "x/y:1"), "quay.io/x/y:1");
    }

    #[test]
    fn partial_json_config_fills_defaults() {
        let cfg: CiliumConfig = serde_json::from_str(r#"{ "debug": true }"#).unwrap();
        assert!(cfg.debug);
        assert_eq!(cfg.namespace, "kube-system");
        assert_eq!(cfg.images, ImageConfig::default());
    }
}
