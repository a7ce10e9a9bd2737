//! Domain inputs to a conversion
//!
//! These are the records an operator tool already holds about where an app
//! runs: workspace, provider, cluster and the app itself with its logical
//! volumes and ingress rules. They are plain data, deserializable from the
//! operator's own storage, and never mutated by the engine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::kube_utils::LabelSelector;

/// Default compose base directory when an app does not set one
pub const DEFAULT_BASE_DIR: &str = ".";

/// Top-level tenant grouping providers
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Workspace {
    /// Workspace name
    pub name: String,
}

/// Infrastructure provider within a workspace
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Provider {
    /// Provider name
    pub name: String,
    /// Provider driver name (e.g. `aks`, `k3s`)
    pub driver: String,
}

/// Ingress controller settings of a cluster
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ClusterIngress {
    /// Namespace the ingress controller runs in
    pub namespace: Option<String>,
    /// Wildcard domain for generated default hosts
    pub domain: Option<String>,
    /// Default certificate resolver
    pub cert_resolver: Option<String>,
}

/// Target cluster
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Cluster {
    /// Cluster name
    pub name: String,
    /// Ingress controller settings
    pub ingress: ClusterIngress,
}

impl Cluster {
    /// Namespace of the ingress controller, `default` when unset
    pub fn ingress_namespace(&self) -> &str {
        match self.ingress.namespace.as_deref().map(str::trim) {
            Some(ns) if !ns.is_empty() => ns,
            _ => "default",
        }
    }

    /// Trimmed ingress domain, if any
    pub fn ingress_domain(&self) -> Option<&str> {
        self.ingress
            .domain
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
    }
}

/// Logical volume declared by the app
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AppVolume {
    /// DNS-1123 label of at most 16 characters
    pub name: String,
    /// Declared size in bytes
    pub size: i64,
}

/// External exposure of one published port
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppIngressRule {
    /// Rule name, also the Service port name
    pub name: String,
    /// Published (host) port from the compose file
    pub port: u16,
    /// Custom host names
    pub hosts: Vec<String>,
}

/// App ingress settings
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct AppIngress {
    /// Overrides the cluster certificate resolver when set
    pub cert_resolver: Option<String>,
    /// Ordered rules
    pub rules: Vec<AppIngressRule>,
}

/// Placement of the app's pods
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppDeployment {
    /// Node pool, the configured default when unset
    pub pool: Option<String>,
    /// Availability zone, no zone selector when unset
    pub zone: Option<String>,
}

/// Source peer of a user network policy rule
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct NetworkPolicyPeerRule {
    /// Namespaces allowed by this peer
    pub namespace_selector: Option<LabelSelector>,
}

/// Port allowed by a user network policy rule
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkPolicyPortRule {
    /// TCP, UDP or SCTP. Empty means TCP.
    pub protocol: String,
    /// Port number
    pub port: u16,
}

/// Extra ingress rule appended to the app NetworkPolicy
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkPolicyIngressRule {
    /// Allowed sources
    pub from: Vec<NetworkPolicyPeerRule>,
    /// Allowed ports
    pub ports: Vec<NetworkPolicyPortRule>,
}

/// App network policy settings
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct AppNetworkPolicy {
    /// Additional ingress rules
    pub ingress_rules: Vec<NetworkPolicyIngressRule>,
}

/// A deployable application
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct App {
    /// App name, used in resource names
    pub name: String,
    /// Compose document text
    pub compose: String,
    /// Directory env/config/secret files are resolved against
    pub base_dir: Option<String>,
    /// Logical volumes in declaration order
    pub volumes: Vec<AppVolume>,
    /// Ingress settings
    pub ingress: AppIngress,
    /// Placement
    pub deployment: AppDeployment,
    /// Additional network policy rules
    pub network_policy: AppNetworkPolicy,
}

impl App {
    /// Base directory for relative source files
    pub fn base_dir(&self) -> &str {
        self.base_dir.as_deref().unwrap_or(DEFAULT_BASE_DIR)
    }

    /// Declared volume by name
    pub fn volume(&self, name: &str) -> Option<&AppVolume> {
        self.volumes.iter().find(|v| v.name == name)
    }
}

// =============================================================================
// Storage
// =============================================================================

/// Provider-specific parameters for persistent volumes.
///
/// Empty fields mean no opinion and are omitted from generated objects.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct VolumeClass {
    /// StorageClass name (e.g. `managed-csi`)
    pub storage_class_name: String,
    /// CSI driver name, required for binding
    pub csi_driver: String,
    /// Filesystem type (e.g. `ext4`)
    pub fs_type: String,
    /// CSI volume attributes
    pub attributes: BTreeMap<String, String>,
    /// Access modes, `ReadWriteOnce` when empty
    pub access_modes: Vec<String>,
    /// `Retain` or `Delete`
    pub reclaim_policy: String,
    /// `Filesystem` or `Block`
    pub volume_mode: String,
}

/// Physical disk assigned to a logical volume
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VolumeDisk {
    /// Provider-specific identifier used as the CSI volume handle
    pub handle: String,
    /// Disk size in bytes; the app volume size is used when not positive
    pub size: i64,
}

/// One resolved disk per declared app volume
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct VolumeBinding {
    /// Logical volume name from the app
    pub name: String,
    /// Assigned disk
    pub disk: VolumeDisk,
    /// PV/PVC name; derived from hashes and the disk handle when unset
    pub resource_name: Option<String>,
}

impl VolumeBinding {
    /// Binding for a volume to a disk handle and size
    pub fn new(name: impl Into<String>, handle: impl Into<String>, size: i64) -> Self {
        Self {
            name: name.into(),
            disk: VolumeDisk {
                handle: handle.into(),
                size,
            },
            resource_name: None,
        }
    }
}
