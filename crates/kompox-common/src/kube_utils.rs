//! Shared Kubernetes object helpers
//!
//! Generated objects are plain serde structs rather than k8s-openapi types so
//! their serialized form stays minimal and deterministic. This module holds
//! the pieces every generated object shares: metadata and the
//! apiVersion/kind bookkeeping used to address them through kube's
//! `ApiResource`.

use std::collections::BTreeMap;

pub use kube::core::discovery::ApiResource;
use serde::{Deserialize, Serialize};

// =============================================================================
// ObjectMeta - Canonical metadata for all generated resources
// =============================================================================

/// Kubernetes ObjectMeta for generated resources.
///
/// `namespace` is `None` for cluster-scoped objects (Namespace,
/// PersistentVolume). Construction adds the name and managed-by labels.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Resource name
    pub name: String,
    /// Resource namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl ObjectMeta {
    /// Create namespaced metadata with the standard kompox labels
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        let mut meta = Self::cluster_scoped(name);
        meta.namespace = Some(namespace.into());
        meta
    }

    /// Create metadata for a cluster-scoped object
    pub fn cluster_scoped(name: impl Into<String>) -> Self {
        let name = name.into();
        let mut labels = BTreeMap::new();
        labels.insert(crate::LABEL_NAME.to_string(), name.clone());
        labels.insert(
            crate::LABEL_MANAGED_BY.to_string(),
            crate::LABEL_MANAGED_BY_KOMPOX.to_string(),
        );
        Self {
            name,
            namespace: None,
            labels,
            annotations: BTreeMap::new(),
        }
    }

    /// Add a label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Merge a label set, overwriting existing keys
    pub fn with_labels(mut self, labels: &BTreeMap<String, String>) -> Self {
        self.labels
            .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Add an annotation
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Value of an annotation, if present
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

/// Label selector shared by Services, NetworkPolicies and user peer rules
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    /// Exact label matches
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
    /// Set-based requirements
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

/// One set-based selector requirement
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelectorRequirement {
    /// Label key
    pub key: String,
    /// `In`, `NotIn`, `Exists` or `DoesNotExist`
    pub operator: String,
    /// Values for `In`/`NotIn`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

impl LabelSelector {
    /// Selector matching every object (`{}`)
    pub fn everything() -> Self {
        Self::default()
    }

    /// Selector with exact label matches
    pub fn matching(labels: BTreeMap<String, String>) -> Self {
        Self {
            match_labels: labels,
            match_expressions: Vec::new(),
        }
    }
}

// =============================================================================
// HasApiResource Trait
// =============================================================================

/// Trait for types that have a known API group, version, and kind.
///
/// The external apply step addresses each generated object through the
/// `ApiResource` derived here, so serialization and API calls always agree.
///
/// # Example
/// ```ignore
/// impl HasApiResource for Ingress {
///     const API_VERSION: &'static str = "networking.k8s.io/v1";
///     const KIND: &'static str = "Ingress";
/// }
///
/// let ar = Ingress::api_resource();
/// ```
pub trait HasApiResource {
    /// Full API version (e.g., "networking.k8s.io/v1", "v1")
    const API_VERSION: &'static str;
    /// Resource kind (e.g., "Ingress")
    const KIND: &'static str;

    /// Build an ApiResource from the type's constants.
    fn api_resource() -> ApiResource {
        build_api_resource(Self::API_VERSION, Self::KIND)
    }
}

/// Generate `default_api_version()` / `default_kind()` for a type that
/// implements [`HasApiResource`], for use in `#[serde(default = "...")]`.
#[macro_export]
macro_rules! impl_api_defaults {
    ($type:ty) => {
        impl $type {
            fn default_api_version() -> String {
                <Self as $crate::kube_utils::HasApiResource>::API_VERSION.to_string()
            }
            fn default_kind() -> String {
                <Self as $crate::kube_utils::HasApiResource>::KIND.to_string()
            }
        }
    };
}

/// Build an ApiResource from a known apiVersion and kind.
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Parse apiVersion into (group, version)
///
/// # Examples
/// ```
/// use kompox_common::kube_utils::parse_api_version;
///
/// let (group, version) = parse_api_version("apps/v1");
/// assert_eq!(group, "apps");
/// assert_eq!(version, "v1");
///
/// let (group, version) = parse_api_version("v1");
/// assert_eq!(group, "");
/// assert_eq!(version, "v1");
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

const KIND_PLURALS: &[(&str, &str)] = &[
    ("ingress", "ingresses"),
    ("networkpolicy", "networkpolicies"),
    ("persistentvolume", "persistentvolumes"),
    ("persistentvolumeclaim", "persistentvolumeclaims"),
    ("endpoints", "endpoints"),
];

/// Lowercase plural resource name for a kind
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    for (singular, plural) in KIND_PLURALS {
        if *singular == lower {
            return (*plural).to_string();
        }
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_meta_adds_standard_labels() {
        let meta = ObjectMeta::new("shop-app", "k4x-abc-shop-def");
        assert_eq!(meta.namespace.as_deref(), Some("k4x-abc-shop-def"));
        assert_eq!(meta.labels[crate::LABEL_NAME], "shop-app");
        assert_eq!(meta.labels[crate::LABEL_MANAGED_BY], "kompox");
    }

    #[test]
    fn cluster_scoped_meta_omits_namespace() {
        let meta = ObjectMeta::cluster_scoped("k4x-abc-data-def-ghi");
        let json = serde_json::to_value(&meta).unwrap();
        assert!(json.get("namespace").is_none());
        assert_eq!(json["name"], "k4x-abc-data-def-ghi");
    }

    #[test]
    fn with_labels_overwrites_name_label() {
        let mut extra = BTreeMap::new();
        extra.insert(crate::LABEL_NAME.to_string(), "shop".to_string());
        let meta = ObjectMeta::new("shop-app", "ns").with_labels(&extra);
        assert_eq!(meta.labels[crate::LABEL_NAME], "shop");
    }

    #[test]
    fn annotations_are_skipped_when_empty() {
        let meta = ObjectMeta::new("a", "ns");
        let json = serde_json::to_value(&meta).unwrap();
        assert!(json.get("annotations").is_none());

        let meta = meta.with_annotation(crate::ANNOTATION_CONTENT_HASH, "abc123");
        assert_eq!(meta.annotation(crate::ANNOTATION_CONTENT_HASH), Some("abc123"));
    }

    #[test]
    fn api_resource_from_constants() {
        struct Policy;
        impl HasApiResource for Policy {
            const API_VERSION: &'static str = "networking.k8s.io/v1";
            const KIND: &'static str = "NetworkPolicy";
        }
        let ar = Policy::api_resource();
        assert_eq!(ar.group, "networking.k8s.io");
        assert_eq!(ar.version, "v1");
        assert_eq!(ar.plural, "networkpolicies");
    }

    #[test]
    fn pluralize_common_kinds() {
        assert_eq!(pluralize_kind("Deployment"), "deployments");
        assert_eq!(pluralize_kind("Ingress"), "ingresses");
        assert_eq!(pluralize_kind("PersistentVolumeClaim"), "persistentvolumeclaims");
        assert_eq!(pluralize_kind("Namespace"), "namespaces");
    }
}
