//! Kubernetes pod-level resource types
//!
//! Hand-rolled serde structs for the objects a compose service turns into.
//! Only the fields the engine sets are modelled, so serialized output holds
//! exactly what was generated and nothing the API server would default.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use kompox_common::kube_utils::{HasApiResource, ObjectMeta};
use kompox_common::{impl_api_defaults, ANNOTATION_CONTENT_HASH};
use serde::{Deserialize, Serialize};

/// Secret type for plain key/value data
pub const SECRET_TYPE_OPAQUE: &str = "Opaque";

/// Secret type for registry credentials
pub const SECRET_TYPE_DOCKER_CONFIG_JSON: &str = "kubernetes.io/dockerconfigjson";

// =============================================================================
// ConfigMap and Secret
// =============================================================================

/// Kubernetes ConfigMap for non-sensitive configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMap {
    /// API version
    #[serde(default = "ConfigMap::default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "ConfigMap::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// String data
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
}

impl HasApiResource for ConfigMap {
    const API_VERSION: &'static str = "v1";
    const KIND: &'static str = "ConfigMap";
}

impl_api_defaults!(ConfigMap);

impl ConfigMap {
    /// Create a new ConfigMap
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata: ObjectMeta::new(name, namespace),
            data: BTreeMap::new(),
        }
    }

    /// Add a data entry
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Content digest recorded on this ConfigMap, if any
    pub fn content_hash(&self) -> Option<&str> {
        self.metadata.annotation(ANNOTATION_CONTENT_HASH)
    }
}

/// Kubernetes Secret
///
/// Values are held base64-encoded in `data` so binary file content survives
/// unchanged.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Secret {
    /// API version
    #[serde(default = "Secret::default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "Secret::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Base64-encoded data
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
    /// Secret type
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
}

impl HasApiResource for Secret {
    const API_VERSION: &'static str = "v1";
    const KIND: &'static str = "Secret";
}

impl_api_defaults!(Secret);

impl Secret {
    /// Create a new Opaque Secret
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata: ObjectMeta::new(name, namespace),
            data: BTreeMap::new(),
            type_: Some(SECRET_TYPE_OPAQUE.to_string()),
        }
    }

    /// Set the Secret type
    pub fn with_type(mut self, type_: impl Into<String>) -> Self {
        self.type_ = Some(type_.into());
        self
    }

    /// Add a data entry, encoding the raw bytes
    pub fn with_data(mut self, key: impl Into<String>, value: impl AsRef<[u8]>) -> Self {
        self.data.insert(key.into(), BASE64.encode(value.as_ref()));
        self
    }

    /// Decoded value of a data entry
    pub fn decoded(&self, key: &str) -> Option<Vec<u8>> {
        self.data.get(key).and_then(|v| BASE64.decode(v).ok())
    }

    /// Content digest recorded on this Secret, if any
    pub fn content_hash(&self) -> Option<&str> {
        self.metadata.annotation(ANNOTATION_CONTENT_HASH)
    }
}

// =============================================================================
// EnvFrom sources for referencing ConfigMap/Secret in containers
// =============================================================================

/// Reference to a ConfigMap or Secret for loading env vars
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvFromSource {
    /// ConfigMap reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_ref: Option<EnvSourceRef>,
    /// Secret reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<EnvSourceRef>,
}

impl EnvFromSource {
    /// Reference a Secret that may not exist yet
    pub fn optional_secret(name: impl Into<String>) -> Self {
        Self {
            config_map_ref: None,
            secret_ref: Some(EnvSourceRef {
                name: name.into(),
                optional: Some(true),
            }),
        }
    }
}

/// Named env source reference
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EnvSourceRef {
    /// ConfigMap or Secret name
    pub name: String,
    /// Whether the pod starts when the object is missing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
}

// =============================================================================
// Container
// =============================================================================

/// Container spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    /// Container name
    pub name: String,
    /// Image
    pub image: String,
    /// Command (compose `entrypoint`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    /// Args (compose `command`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    /// Environment variables, sorted by name
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    /// Environment from ConfigMap/Secret references
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_from: Vec<EnvFromSource>,
    /// Ports
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ContainerPort>,
    /// Resource requirements
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    /// Volume mounts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
}

/// Environment variable with a literal value
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EnvVar {
    /// Variable name
    pub name: String,
    /// Literal value
    pub value: String,
}

impl EnvVar {
    /// Create an env var with a literal value
    pub fn literal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Reference to a local object by name (e.g., for imagePullSecrets)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LocalObjectReference {
    /// Object name
    pub name: String,
}

/// Container port
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    /// Port number
    pub container_port: u16,
}

// =============================================================================
// Resource requirements
// =============================================================================

/// Resource requirements
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    /// Requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<ResourceQuantity>,
    /// Limits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceQuantity>,
}

/// CPU and memory quantities
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceQuantity {
    /// CPU quantity (e.g. `500m`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    /// Memory quantity (e.g. `256Mi`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

impl ResourceQuantity {
    /// True when neither cpu nor memory is set
    pub fn is_empty(&self) -> bool {
        self.cpu.is_none() && self.memory.is_none()
    }
}

// =============================================================================
// Volumes
// =============================================================================

/// PVC volume source
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PvcVolumeSource {
    /// PVC claim name
    pub claim_name: String,
}

/// One projected key of a ConfigMap/Secret volume
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct KeyToPath {
    /// Data key
    pub key: String,
    /// File name inside the volume
    pub path: String,
    /// File mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<i32>,
}

/// Pod volume
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// Volume name
    pub name: String,
    /// ConfigMap source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map: Option<ConfigMapVolumeSource>,
    /// Secret source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretVolumeSource>,
    /// PVC source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<PvcVolumeSource>,
}

impl Volume {
    /// Create a Volume backed by a ConfigMap projecting one key
    pub fn from_config_map(name: impl Into<String>, cm_name: impl Into<String>, item: KeyToPath) -> Self {
        Self {
            name: name.into(),
            config_map: Some(ConfigMapVolumeSource {
                name: cm_name.into(),
                items: vec![item],
            }),
            secret: None,
            persistent_volume_claim: None,
        }
    }

    /// Create a Volume backed by a Secret projecting one key
    pub fn from_secret(name: impl Into<String>, secret_name: impl Into<String>, item: KeyToPath) -> Self {
        Self {
            name: name.into(),
            config_map: None,
            secret: Some(SecretVolumeSource {
                secret_name: secret_name.into(),
                items: vec![item],
            }),
            persistent_volume_claim: None,
        }
    }

    /// Create a Volume backed by a PVC
    pub fn from_pvc(name: impl Into<String>, claim_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config_map: None,
            secret: None,
            persistent_volume_claim: Some(PvcVolumeSource {
                claim_name: claim_name.into(),
            }),
        }
    }
}

/// ConfigMap volume source
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ConfigMapVolumeSource {
    /// ConfigMap name
    pub name: String,
    /// Projected keys
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<KeyToPath>,
}

/// Secret volume source
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretVolumeSource {
    /// Secret name
    pub secret_name: String,
    /// Projected keys
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<KeyToPath>,
}

/// Volume mount
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    /// Volume name
    pub name: String,
    /// Mount path
    pub mount_path: String,
    /// Sub path within the volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,
    /// Read only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
}

impl VolumeMount {
    /// Mount a volume, optionally at a sub-path
    pub fn new(name: impl Into<String>, mount_path: impl Into<String>, sub_path: Option<String>) -> Self {
        Self {
            name: name.into(),
            mount_path: mount_path.into(),
            sub_path,
            read_only: None,
        }
    }

    /// Create a readonly file mount with a sub_path key
    pub fn readonly_file(
        name: impl Into<String>,
        mount_path: impl Into<String>,
        sub_path: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            mount_path: mount_path.into(),
            sub_path: Some(sub_path.into()),
            read_only: Some(true),
        }
    }
}

// =============================================================================
// Pod spec
// =============================================================================

/// Pod spec of the generated workload
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    /// Registry credentials
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<LocalObjectReference>,
    /// Init containers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub init_containers: Vec<Container>,
    /// Containers, one per compose service
    pub containers: Vec<Container>,
    /// Volumes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    /// Node selector
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
}
