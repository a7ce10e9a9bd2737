//! Volume binding and storage synthesis
//!
//! Each logical app volume is bound to exactly one disk. A binding becomes a
//! cluster-scoped PersistentVolume with a CSI source and a claim that names
//! the volume directly, so the pair can never be re-bound elsewhere.

use std::collections::BTreeMap;

use kompox_common::kube_utils::{HasApiResource, ObjectMeta};
use kompox_common::model::{AppVolume, VolumeBinding, VolumeClass};
use kompox_common::naming::NamingContext;
use kompox_common::impl_api_defaults;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::compose::SubPathPlan;
use crate::error::CompilationError;
use crate::k8s::{Container, Volume, VolumeMount};

/// Name of the sub-path preparation init container
pub const INIT_CONTAINER_NAME: &str = "init-volume-subpaths";

/// Mount root of volumes inside the init container
pub const INIT_WORK_DIR: &str = "/work";

const ACCESS_MODES: [&str; 4] = ["ReadWriteOnce", "ReadOnlyMany", "ReadWriteMany", "ReadWriteOncePod"];
const DEFAULT_ACCESS_MODE: &str = "ReadWriteOnce";
const MIB: i64 = 1 << 20;

// =============================================================================
// Kubernetes PV/PVC Types
// =============================================================================

/// Kubernetes PersistentVolume
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolume {
    /// API version (v1)
    #[serde(default = "PersistentVolume::default_api_version")]
    pub api_version: String,
    /// Resource kind (PersistentVolume)
    #[serde(default = "PersistentVolume::default_kind")]
    pub kind: String,
    /// Metadata, without namespace
    pub metadata: ObjectMeta,
    /// PV spec
    pub spec: PvSpec,
}

impl HasApiResource for PersistentVolume {
    const API_VERSION: &'static str = "v1";
    const KIND: &'static str = "PersistentVolume";
}

impl_api_defaults!(PersistentVolume);

/// PV spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PvSpec {
    /// Capacity (`storage`)
    pub capacity: BTreeMap<String, String>,
    /// Access modes
    pub access_modes: Vec<String>,
    /// `Retain` or `Delete`
    pub persistent_volume_reclaim_policy: String,
    /// `Filesystem` or `Block`
    pub volume_mode: String,
    /// Storage class name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
    /// CSI source
    pub csi: CsiSource,
}

/// CSI persistent volume source
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CsiSource {
    /// CSI driver name
    pub driver: String,
    /// Disk handle
    pub volume_handle: String,
    /// Driver attributes, including `fsType` when set
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volume_attributes: BTreeMap<String, String>,
}

/// Kubernetes PersistentVolumeClaim
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeClaim {
    /// API version (v1)
    #[serde(default = "PersistentVolumeClaim::default_api_version")]
    pub api_version: String,
    /// Resource kind (PersistentVolumeClaim)
    #[serde(default = "PersistentVolumeClaim::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// PVC spec
    pub spec: PvcSpec,
}

impl HasApiResource for PersistentVolumeClaim {
    const API_VERSION: &'static str = "v1";
    const KIND: &'static str = "PersistentVolumeClaim";
}

impl_api_defaults!(PersistentVolumeClaim);

/// PVC spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PvcSpec {
    /// Access modes
    pub access_modes: Vec<String>,
    /// Resource requirements
    pub resources: PvcResources,
    /// Bound PersistentVolume
    pub volume_name: String,
    /// `Filesystem` or `Block`
    pub volume_mode: String,
    /// Storage class name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
}

/// PVC resource requirements
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PvcResources {
    /// Storage requests
    pub requests: BTreeMap<String, String>,
}

// =============================================================================
// Binding
// =============================================================================

/// Where bound objects live and how they are labelled
#[derive(Clone, Copy, Debug)]
pub struct StorageScope<'a> {
    /// Hashes of the app instance
    pub naming: &'a NamingContext,
    /// Namespace of the claims
    pub namespace: &'a str,
    /// Labels of PVs and PVCs
    pub labels: &'a BTreeMap<String, String>,
}

/// One logical volume bound to a disk
#[derive(Clone, Debug, PartialEq)]
pub struct BoundVolume {
    /// The input binding with its resource name filled in
    pub binding: VolumeBinding,
    /// Cluster-scoped volume
    pub persistent_volume: PersistentVolume,
    /// Claim pinned to the volume by name
    pub claim: PersistentVolumeClaim,
}

impl BoundVolume {
    /// PV/PVC name
    pub fn resource_name(&self) -> &str {
        &self.claim.metadata.name
    }
}

/// Round a byte size up to whole mebibytes; non-positive sizes become `0`
pub fn bytes_to_quantity(bytes: i64) -> String {
    if bytes <= 0 {
        return "0".to_string();
    }
    let mib = bytes / MIB + i64::from(bytes % MIB != 0);
    format!("{}Mi", mib)
}

/// Require exactly one binding per app volume, in declaration order
pub fn check_bindings(app_volumes: &[AppVolume], bindings: &[VolumeBinding]) -> Result<(), CompilationError> {
    if bindings.len() != app_volumes.len() {
        return Err(CompilationError::VolumeBindingCount {
            bindings: bindings.len(),
            volumes: app_volumes.len(),
        });
    }
    for (index, (binding, volume)) in bindings.iter().zip(app_volumes).enumerate() {
        if binding.name != volume.name {
            return Err(CompilationError::VolumeBindingOrder {
                index,
                found: binding.name.clone(),
                expected: volume.name.clone(),
            });
        }
    }
    Ok(())
}

/// Check one binding against the app before a volume class is resolved for it
pub fn validate_binding<'a>(
    app_volumes: &'a [AppVolume],
    binding: &VolumeBinding,
) -> Result<&'a AppVolume, CompilationError> {
    let volume = app_volumes
        .iter()
        .find(|v| v.name == binding.name)
        .ok_or_else(|| CompilationError::UndefinedBindingVolume {
            name: binding.name.clone(),
        })?;
    if binding.disk.handle.trim().is_empty() {
        return Err(CompilationError::MissingDiskHandle {
            volume: volume.name.clone(),
        });
    }
    Ok(volume)
}

/// Build the PV and PVC for one binding
pub fn bind_volume(
    scope: &StorageScope<'_>,
    app_volumes: &[AppVolume],
    binding: &VolumeBinding,
    class: &VolumeClass,
) -> Result<BoundVolume, CompilationError> {
    let volume = validate_binding(app_volumes, binding)?;
    let handle = binding.disk.handle.trim();

    let csi_driver = class.csi_driver.trim();
    if csi_driver.is_empty() {
        return Err(CompilationError::MissingCsiDriver {
            volume: volume.name.clone(),
        });
    }

    let size = if binding.disk.size > 0 {
        binding.disk.size
    } else {
        volume.size
    };
    let quantity = bytes_to_quantity(size);
    let resource_name = binding
        .resource_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| scope.naming.volume_resource_name(&volume.name, handle));

    let mut access_modes: Vec<String> = class
        .access_modes
        .iter()
        .filter(|m| ACCESS_MODES.contains(&m.as_str()))
        .cloned()
        .collect();
    if access_modes.is_empty() {
        access_modes.push(DEFAULT_ACCESS_MODE.to_string());
    }
    let reclaim_policy = if class.reclaim_policy == "Delete" {
        "Delete"
    } else {
        "Retain"
    };
    let volume_mode = if class.volume_mode == "Block" {
        "Block"
    } else {
        "Filesystem"
    };
    let storage_class_name = Some(class.storage_class_name.clone()).filter(|s| !s.is_empty());

    let mut attributes: BTreeMap<String, String> = class
        .attributes
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if !class.fs_type.is_empty() {
        attributes.insert("fsType".to_string(), class.fs_type.clone());
    }

    let storage = BTreeMap::from([("storage".to_string(), quantity)]);

    let persistent_volume = PersistentVolume {
        api_version: PersistentVolume::default_api_version(),
        kind: PersistentVolume::default_kind(),
        metadata: ObjectMeta::cluster_scoped(&resource_name).with_labels(scope.labels),
        spec: PvSpec {
            capacity: storage.clone(),
            access_modes: access_modes.clone(),
            persistent_volume_reclaim_policy: reclaim_policy.to_string(),
            volume_mode: volume_mode.to_string(),
            storage_class_name: storage_class_name.clone(),
            csi: CsiSource {
                driver: csi_driver.to_string(),
                volume_handle: handle.to_string(),
                volume_attributes: attributes,
            },
        },
    };

    let claim = PersistentVolumeClaim {
        api_version: PersistentVolumeClaim::default_api_version(),
        kind: PersistentVolumeClaim::default_kind(),
        metadata: ObjectMeta::new(&resource_name, scope.namespace).with_labels(scope.labels),
        spec: PvcSpec {
            access_modes,
            resources: PvcResources { requests: storage },
            volume_name: resource_name.clone(),
            volume_mode: volume_mode.to_string(),
            storage_class_name,
        },
    };

    debug!(
        volume = %volume.name,
        resource = %resource_name,
        driver = %csi_driver,
        "bound volume to disk"
    );

    Ok(BoundVolume {
        binding: VolumeBinding {
            resource_name: Some(resource_name),
            ..binding.clone()
        },
        persistent_volume,
        claim,
    })
}

// =============================================================================
// Pod wiring
// =============================================================================

/// Claim volumes of the pod, one per logical volume, named after it
pub fn claim_volumes(bound: &[BoundVolume]) -> Vec<Volume> {
    bound
        .iter()
        .map(|b| Volume::from_pvc(&b.binding.name, b.resource_name()))
        .collect()
}

/// Init container creating every sub-path before the services start.
///
/// Each directory is its own `mkdir` argument, no shell is involved.
/// Volumes and sub-paths are visited in sorted order so the command is
/// reproducible. Returns `None` when no mount uses a sub-path.
pub fn init_container(plan: &SubPathPlan, image: &str) -> Option<Container> {
    let plan: Vec<_> = plan.iter().filter(|(_, subs)| !subs.is_empty()).collect();
    if plan.is_empty() {
        return None;
    }

    let mut command: Vec<String> = ["mkdir", "-m", "1777", "-p"].map(String::from).to_vec();
    command.extend(plan.iter().flat_map(|(volume, subs)| {
        subs.iter()
            .map(move |sub| format!("{}/{}/{}", INIT_WORK_DIR, volume, sub))
    }));
    let volume_mounts = plan
        .iter()
        .map(|(volume, _)| {
            VolumeMount::new(volume.as_str(), format!("{}/{}", INIT_WORK_DIR, volume), None)
        })
        .collect();

    Some(Container {
        name: INIT_CONTAINER_NAME.to_string(),
        image: image.to_string(),
        command: Some(command),
        volume_mounts,
        ..Default::default()
    })
}
