//! The ordered object set produced by a conversion
//!
//! Objects come out in apply order: the Namespace before anything namespaced,
//! volumes before claims, claims and configuration before the Deployment that
//! mounts them, and the Service before the Ingresses routing to it.

use kompox_common::kube_utils::{ApiResource, HasApiResource};
use kompox_common::yaml::emit_yaml_documents;
use kompox_common::Result;
use kompox_workload::k8s::{ConfigMap, Secret};
use kompox_workload::{PersistentVolume, PersistentVolumeClaim};
use serde::Serialize;
use serde_json::Value;

use crate::ingress::{GeneratedIngresses, Ingress};
use crate::policy::{GeneratedPolicies, NetworkPolicy, Role, RoleBinding, ServiceAccount};
use crate::workload::{Deployment, Namespace, Service};

/// Every object generated for one app component
#[derive(Clone, Debug, PartialEq)]
pub struct GeneratedManifestSet {
    /// App namespace
    pub namespace: Namespace,
    /// NetworkPolicy and RBAC objects, when enabled
    pub policies: Option<GeneratedPolicies>,
    /// One per declared volume, in declaration order
    pub persistent_volumes: Vec<PersistentVolume>,
    /// One per declared volume, in declaration order
    pub persistent_volume_claims: Vec<PersistentVolumeClaim>,
    /// Registry credentials
    pub pull_secret: Option<Secret>,
    /// Top-level compose configs
    pub config_maps: Vec<ConfigMap>,
    /// Top-level compose secrets
    pub config_secrets: Vec<Secret>,
    /// Env-file Secrets, one per service with env files
    pub env_secrets: Vec<Secret>,
    /// The workload
    pub deployment: Deployment,
    /// Service for published ports
    pub service: Option<Service>,
    /// Per compose service DNS names
    pub headless_services: Vec<Service>,
    /// Default and custom Ingresses
    pub ingresses: GeneratedIngresses,
}

/// Borrowed view of one generated object
#[derive(Clone, Copy, Debug)]
pub enum ManifestObject<'a> {
    /// Namespace
    Namespace(&'a Namespace),
    /// NetworkPolicy
    NetworkPolicy(&'a NetworkPolicy),
    /// ServiceAccount
    ServiceAccount(&'a ServiceAccount),
    /// Role
    Role(&'a Role),
    /// RoleBinding
    RoleBinding(&'a RoleBinding),
    /// PersistentVolume
    PersistentVolume(&'a PersistentVolume),
    /// PersistentVolumeClaim
    PersistentVolumeClaim(&'a PersistentVolumeClaim),
    /// Secret
    Secret(&'a Secret),
    /// ConfigMap
    ConfigMap(&'a ConfigMap),
    /// Deployment
    Deployment(&'a Deployment),
    /// Service
    Service(&'a Service),
    /// Ingress
    Ingress(&'a Ingress),
}

impl ManifestObject<'_> {
    /// Object kind
    pub fn kind(&self) -> &str {
        match self {
            Self::Namespace(o) => &o.kind,
            Self::NetworkPolicy(o) => &o.kind,
            Self::ServiceAccount(o) => &o.kind,
            Self::Role(o) => &o.kind,
            Self::RoleBinding(o) => &o.kind,
            Self::PersistentVolume(o) => &o.kind,
            Self::PersistentVolumeClaim(o) => &o.kind,
            Self::Secret(o) => &o.kind,
            Self::ConfigMap(o) => &o.kind,
            Self::Deployment(o) => &o.kind,
            Self::Service(o) => &o.kind,
            Self::Ingress(o) => &o.kind,
        }
    }

    /// Object name
    pub fn name(&self) -> &str {
        match self {
            Self::Namespace(o) => &o.metadata.name,
            Self::NetworkPolicy(o) => &o.metadata.name,
            Self::ServiceAccount(o) => &o.metadata.name,
            Self::Role(o) => &o.metadata.name,
            Self::RoleBinding(o) => &o.metadata.name,
            Self::PersistentVolume(o) => &o.metadata.name,
            Self::PersistentVolumeClaim(o) => &o.metadata.name,
            Self::Secret(o) => &o.metadata.name,
            Self::ConfigMap(o) => &o.metadata.name,
            Self::Deployment(o) => &o.metadata.name,
            Self::Service(o) => &o.metadata.name,
            Self::Ingress(o) => &o.metadata.name,
        }
    }

    /// Resource the apply step addresses this object through
    pub fn api_resource(&self) -> ApiResource {
        match self {
            Self::Namespace(_) => Namespace::api_resource(),
            Self::NetworkPolicy(_) => NetworkPolicy::api_resource(),
            Self::ServiceAccount(_) => ServiceAccount::api_resource(),
            Self::Role(_) => Role::api_resource(),
            Self::RoleBinding(_) => RoleBinding::api_resource(),
            Self::PersistentVolume(_) => PersistentVolume::api_resource(),
            Self::PersistentVolumeClaim(_) => PersistentVolumeClaim::api_resource(),
            Self::Secret(_) => Secret::api_resource(),
            Self::ConfigMap(_) => ConfigMap::api_resource(),
            Self::Deployment(_) => Deployment::api_resource(),
            Self::Service(_) => Service::api_resource(),
            Self::Ingress(_) => Ingress::api_resource(),
        }
    }

    /// Namespace of the object, `None` when cluster-scoped
    pub fn namespace(&self) -> Option<&str> {
        let namespace = match self {
            Self::Namespace(o) => &o.metadata.namespace,
            Self::NetworkPolicy(o) => &o.metadata.namespace,
            Self::ServiceAccount(o) => &o.metadata.namespace,
            Self::Role(o) => &o.metadata.namespace,
            Self::RoleBinding(o) => &o.metadata.namespace,
            Self::PersistentVolume(o) => &o.metadata.namespace,
            Self::PersistentVolumeClaim(o) => &o.metadata.namespace,
            Self::Secret(o) => &o.metadata.namespace,
            Self::ConfigMap(o) => &o.metadata.namespace,
            Self::Deployment(o) => &o.metadata.namespace,
            Self::Service(o) => &o.metadata.namespace,
            Self::Ingress(o) => &o.metadata.namespace,
        };
        namespace.as_deref()
    }

    /// Serialize to a JSON value ready for apply
    pub fn to_value(&self) -> serde_json::Result<Value> {
        fn value<T: Serialize>(object: &T) -> serde_json::Result<Value> {
            serde_json::to_value(object)
        }
        match self {
            Self::Namespace(o) => value(o),
            Self::NetworkPolicy(o) => value(o),
            Self::ServiceAccount(o) => value(o),
            Self::Role(o) => value(o),
            Self::RoleBinding(o) => value(o),
            Self::PersistentVolume(o) => value(o),
            Self::PersistentVolumeClaim(o) => value(o),
            Self::Secret(o) => value(o),
            Self::ConfigMap(o) => value(o),
            Self::Deployment(o) => value(o),
            Self::Service(o) => value(o),
            Self::Ingress(o) => value(o),
        }
    }
}

impl GeneratedManifestSet {
    /// All objects in apply order
    pub fn objects(&self) -> Vec<ManifestObject<'_>> {
        let mut objects = vec![ManifestObject::Namespace(&self.namespace)];
        if let Some(policies) = &self.policies {
            objects.extend([
                ManifestObject::ServiceAccount(&policies.service_account),
                ManifestObject::Role(&policies.role),
                ManifestObject::RoleBinding(&policies.role_binding),
                ManifestObject::NetworkPolicy(&policies.network_policy),
            ]);
        }
        objects.extend(self.persistent_volumes.iter().map(ManifestObject::PersistentVolume));
        objects.extend(
            self.persistent_volume_claims
                .iter()
                .map(ManifestObject::PersistentVolumeClaim),
        );
        objects.extend(self.pull_secret.iter().map(ManifestObject::Secret));
        objects.extend(self.config_maps.iter().map(ManifestObject::ConfigMap));
        objects.extend(self.config_secrets.iter().map(ManifestObject::Secret));
        objects.extend(self.env_secrets.iter().map(ManifestObject::Secret));
        objects.push(ManifestObject::Deployment(&self.deployment));
        objects.extend(self.service.iter().map(ManifestObject::Service));
        objects.extend(self.headless_services.iter().map(ManifestObject::Service));
        objects.extend(self.ingresses.iter().map(ManifestObject::Ingress));
        objects
    }

    /// Number of objects of `kind`
    pub fn count(&self, kind: &str) -> usize {
        self.objects().iter().filter(|o| o.kind() == kind).count()
    }

    /// All objects as JSON values, in apply order
    pub fn to_values(&self) -> serde_json::Result<Vec<Value>> {
        self.objects().iter().map(ManifestObject::to_value).collect()
    }

    /// All objects as a multi-document YAML stream
    pub fn to_yaml(&self) -> Result<String> {
        let values = self
            .to_values()
            .map_err(|e| kompox_common::Error::serialization(e.to_string()))?;
        emit_yaml_documents(&values)
    }
}
