//! Workload types for kompox apps
//!
//! This module defines the app-level Kubernetes resource types:
//! - Namespace: one per app instance, annotated with its origin
//! - Deployment: a single pod running every compose service
//! - Service: network exposure of published ports
//! - headless Services: one DNS name per compose service
//!
//! Pod-level types (Container, Volume, Secret ...) come from `kompox_workload::k8s`.

use std::collections::BTreeMap;

use kompox_common::kube_utils::{HasApiResource, LabelSelector, ObjectMeta};
use kompox_common::labels::AppLabels;
use kompox_common::naming::NamingContext;
use kompox_common::{
    impl_api_defaults, ANNOTATION_APP, ANNOTATION_CONTENT_HASH, ANNOTATION_PROVIDER_DRIVER,
    LABEL_NODE_POOL, LABEL_NODE_ZONE,
};
use kompox_workload::compose::PortTable;
use kompox_workload::k8s::PodSpec;
use kompox_workload::{CompilationError, CompiledPod};
use serde::{Deserialize, Serialize};

use crate::ingress::ResolvedRule;

/// Deployment strategy of every app
pub const STRATEGY_RECREATE: &str = "Recreate";

/// `clusterIP` of headless Services
pub const CLUSTER_IP_NONE: &str = "None";

// =============================================================================
// Namespace
// =============================================================================

/// Kubernetes Namespace
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Namespace {
    /// API version
    #[serde(default = "Namespace::default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "Namespace::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
}

impl HasApiResource for Namespace {
    const API_VERSION: &'static str = "v1";
    const KIND: &'static str = "Namespace";
}

impl_api_defaults!(Namespace);

// =============================================================================
// Deployment
// =============================================================================

/// Kubernetes Deployment
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    /// API version
    #[serde(default = "Deployment::default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "Deployment::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: DeploymentSpec,
}

impl HasApiResource for Deployment {
    const API_VERSION: &'static str = "apps/v1";
    const KIND: &'static str = "Deployment";
}

impl_api_defaults!(Deployment);

/// Deployment spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    /// Number of replicas
    pub replicas: u32,
    /// Deployment strategy
    pub strategy: DeploymentStrategy,
    /// Label selector
    pub selector: LabelSelector,
    /// Pod template
    pub template: PodTemplateSpec,
}

/// Deployment strategy
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DeploymentStrategy {
    /// Strategy type
    #[serde(rename = "type")]
    pub type_: String,
}

/// Pod template spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PodTemplateSpec {
    /// Pod metadata
    pub metadata: PodMeta,
    /// Pod spec
    pub spec: PodSpec,
}

/// Pod metadata (subset of ObjectMeta)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PodMeta {
    /// Labels
    pub labels: BTreeMap<String, String>,
    /// Annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Deployment {
    /// Pod content hash stored on the template
    pub fn content_hash(&self) -> Option<&str> {
        self.spec
            .template
            .metadata
            .annotations
            .get(ANNOTATION_CONTENT_HASH)
            .map(String::as_str)
    }
}

// =============================================================================
// Service
// =============================================================================

/// Kubernetes Service
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    /// API version
    #[serde(default = "Service::default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "Service::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: ServiceSpec,
}

impl HasApiResource for Service {
    const API_VERSION: &'static str = "v1";
    const KIND: &'static str = "Service";
}

impl_api_defaults!(Service);

/// Service spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    /// `None` for headless Services
    #[serde(rename = "clusterIP", default, skip_serializing_if = "Option::is_none")]
    pub cluster_ip: Option<String>,
    /// Selector
    pub selector: BTreeMap<String, String>,
    /// Ports
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ServicePort>,
}

/// Service port
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    /// Port name, referenced by Ingress backends
    pub name: String,
    /// Service (host) port
    pub port: u16,
    /// Container port
    pub target_port: u16,
}

// =============================================================================
// Workload Compiler
// =============================================================================

/// Names and labels shared by the objects of one app component
#[derive(Clone, Copy, Debug)]
pub struct WorkloadScope<'a> {
    /// Namespace of the app
    pub namespace: &'a str,
    /// Label sets of the component
    pub labels: &'a AppLabels,
}

/// Compiler for the app-level workload objects.
///
/// Takes a compiled pod from `kompox_workload::PodCompiler` and wraps it in
/// a Deployment, and exposes published ports through Services.
pub struct WorkloadCompiler;

impl WorkloadCompiler {
    /// Namespace annotated with `workspace/provider/cluster/app` and the
    /// provider driver
    pub fn compile_namespace(
        naming: &NamingContext,
        labels: &AppLabels,
        origin: [&str; 4],
        provider_driver: &str,
    ) -> Namespace {
        Namespace {
            api_version: Namespace::default_api_version(),
            kind: Namespace::default_kind(),
            metadata: ObjectMeta::cluster_scoped(&naming.namespace)
                .with_labels(labels.base())
                .with_annotation(ANNOTATION_APP, origin.join("/"))
                .with_annotation(ANNOTATION_PROVIDER_DRIVER, provider_driver),
        }
    }

    /// Node selector for a pool and optional zone
    pub fn node_selector(pool: &str, zone: Option<&str>) -> BTreeMap<String, String> {
        let mut selector = BTreeMap::from([(LABEL_NODE_POOL.to_string(), pool.to_string())]);
        if let Some(zone) = zone.map(str::trim).filter(|z| !z.is_empty()) {
            selector.insert(LABEL_NODE_ZONE.to_string(), zone.to_string());
        }
        selector
    }

    /// Single-replica Deployment recreated on every rollout
    pub fn compile_deployment(scope: &WorkloadScope<'_>, pod: CompiledPod) -> Deployment {
        let mut annotations = BTreeMap::new();
        if let Some(hash) = pod.content_hash {
            annotations.insert(ANNOTATION_CONTENT_HASH.to_string(), hash);
        }
        let labels = scope.labels.component();

        Deployment {
            api_version: Deployment::default_api_version(),
            kind: Deployment::default_kind(),
            metadata: ObjectMeta::new(scope.labels.resource_name(), scope.namespace)
                .with_labels(&labels),
            spec: DeploymentSpec {
                replicas: 1,
                strategy: DeploymentStrategy {
                    type_: STRATEGY_RECREATE.to_string(),
                },
                selector: LabelSelector::matching(scope.labels.selector()),
                template: PodTemplateSpec {
                    metadata: PodMeta {
                        labels,
                        annotations,
                    },
                    spec: pod.spec,
                },
            },
        }
    }

    /// Service exposing ingress rule ports, or every published port as
    /// `p<hostPort>` when the app has no ingress rules
    pub fn compile_service(
        scope: &WorkloadScope<'_>,
        rules: &[ResolvedRule],
        ports: &PortTable,
    ) -> Option<Service> {
        let service_ports: Vec<ServicePort> = if !rules.is_empty() {
            rules
                .iter()
                .map(|rule| ServicePort {
                    name: rule.name.clone(),
                    port: rule.port,
                    target_port: rule.target_port,
                })
                .collect()
        } else {
            ports
                .mappings()
                .map(|(host, container)| ServicePort {
                    name: format!("p{}", host),
                    port: host,
                    target_port: container,
                })
                .collect()
        };
        if service_ports.is_empty() {
            return None;
        }

        Some(Service {
            api_version: Service::default_api_version(),
            kind: Service::default_kind(),
            metadata: ObjectMeta::new(scope.labels.resource_name(), scope.namespace)
                .with_labels(&scope.labels.component()),
            spec: ServiceSpec {
                cluster_ip: None,
                selector: scope.labels.selector(),
                ports: service_ports,
            },
        })
    }

    /// Reject compose services whose names collide with generated Services
    pub fn check_service_names<'s>(
        app: &str,
        services: impl IntoIterator<Item = &'s str>,
    ) -> Result<(), CompilationError> {
        let reserved = [format!("{}-app", app), format!("{}-box", app)];
        for service in services {
            if reserved.iter().any(|prefix| service.starts_with(prefix.as_str())) {
                return Err(CompilationError::ReservedServiceName {
                    service: service.to_string(),
                });
            }
        }
        Ok(())
    }

    /// One headless Service per compose service, named after it
    pub fn compile_headless_services<'s>(
        scope: &WorkloadScope<'_>,
        services: impl IntoIterator<Item = &'s str>,
    ) -> Vec<Service> {
        let labels = scope.labels.headless();
        services
            .into_iter()
            .map(|name| Service {
                api_version: Service::default_api_version(),
                kind: Service::default_kind(),
                metadata: ObjectMeta::new(name, scope.namespace).with_labels(&labels),
                spec: ServiceSpec {
                    cluster_ip: Some(CLUSTER_IP_NONE.to_string()),
                    selector: scope.labels.selector(),
                    ports: Vec::new(),
                },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kompox_common::{LABEL_APP_SELECTOR, LABEL_COMPOSE_SERVICE_HEADLESS, LABEL_NAME};
    use kompox_workload::compose::project::PortMapping;

    fn naming() -> NamingContext {
        NamingContext::derive("ws", "prv", "cls", "shop", 6)
    }

    fn labels() -> AppLabels {
        AppLabels::new("shop", "app", &naming())
    }

    fn ports(mappings: &[(u16, u16)]) -> PortTable {
        let mut table = PortTable::new();
        for (host, container) in mappings {
            table
                .register(
                    "web",
                    &PortMapping {
                        published: Some(host.to_string()),
                        target: Some(*container),
                    },
                )
                .unwrap();
        }
        table
    }

    // =========================================================================
    // Story: The namespace records where the app came from
    // =========================================================================

    #[test]
    fn story_namespace_annotations() {
        let naming = naming();
        let ns = WorkloadCompiler::compile_namespace(&naming, &labels(), ["ws", "prv", "cls", "shop"], "aks");
        assert_eq!(ns.metadata.name, naming.namespace);
        assert_eq!(ns.metadata.namespace, None);
        assert_eq!(ns.metadata.annotation(ANNOTATION_APP), Some("ws/prv/cls/shop"));
        assert_eq!(ns.metadata.annotation(ANNOTATION_PROVIDER_DRIVER), Some("aks"));
        assert_eq!(ns.metadata.labels[LABEL_NAME], "shop");
    }

    // =========================================================================
    // Story: One pod, one replica, recreated on rollout
    // =========================================================================

    #[test]
    fn story_deployment_shape() {
        let labels = labels();
        let scope = WorkloadScope {
            namespace: "ns",
            labels: &labels,
        };
        let pod = CompiledPod {
            spec: PodSpec {
                node_selector: WorkloadCompiler::node_selector("user", Some(" 1 ")),
                ..Default::default()
            },
            content_hash: Some("abc123".into()),
        };
        let deployment = WorkloadCompiler::compile_deployment(&scope, pod);
        assert_eq!(deployment.metadata.name, "shop-app");
        assert_eq!(deployment.spec.replicas, 1);
        assert_eq!(deployment.spec.strategy.type_, "Recreate");
        assert_eq!(
            deployment.spec.selector.match_labels[LABEL_APP_SELECTOR],
            "shop-app"
        );
        assert_eq!(deployment.content_hash(), Some("abc123"));
        assert_eq!(deployment.spec.template.spec.node_selector[LABEL_NODE_ZONE], "1");

        let value = serde_json::to_value(&deployment).unwrap();
        assert_eq!(value["apiVersion"], "apps/v1");
        assert_eq!(value["spec"]["strategy"]["type"], "Recreate");
    }

    #[test]
    fn node_selector_without_zone() {
        let selector = WorkloadCompiler::node_selector("system", None);
        assert_eq!(selector.len(), 1);
        assert_eq!(selector[LABEL_NODE_POOL], "system");
    }

    // =========================================================================
    // Story: Services expose what compose publishes
    // =========================================================================

    #[test]
    fn story_service_from_rules() {
        let labels = labels();
        let scope = WorkloadScope {
            namespace: "ns",
            labels: &labels,
        };
        let rules = vec![ResolvedRule {
            name: "main".into(),
            port: 8080,
            target_port: 80,
            hosts: vec![],
        }];
        let service = WorkloadCompiler::compile_service(&scope, &rules, &ports(&[(8080, 80), (9090, 90)])).unwrap();
        assert_eq!(service.spec.ports.len(), 1);
        assert_eq!(service.spec.ports[0].name, "main");
        assert_eq!(service.spec.ports[0].target_port, 80);
    }

    #[test]
    fn story_service_from_ports() {
        let labels = labels();
        let scope = WorkloadScope {
            namespace: "ns",
            labels: &labels,
        };
        let service = WorkloadCompiler::compile_service(&scope, &[], &ports(&[(9090, 90), (8080, 80)])).unwrap();
        let names: Vec<_> = service.spec.ports.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["p8080", "p9090"]);
        assert!(WorkloadCompiler::compile_service(&scope, &[], &PortTable::new()).is_none());
    }

    #[test]
    fn story_headless_services() {
        let labels = labels();
        let scope = WorkloadScope {
            namespace: "ns",
            labels: &labels,
        };
        let services = WorkloadCompiler::compile_headless_services(&scope, ["db", "web"]);
        assert_eq!(services.len(), 2);
        assert_eq!(services[0].metadata.name, "db");
        assert_eq!(services[0].spec.cluster_ip.as_deref(), Some("None"));
        assert!(services[0].spec.ports.is_empty());
        assert_eq!(services[0].metadata.labels[LABEL_COMPOSE_SERVICE_HEADLESS], "true");

        let value = serde_json::to_value(&services[0]).unwrap();
        assert_eq!(value["spec"]["clusterIP"], "None");
    }

    #[test]
    fn story_reserved_service_names() {
        assert!(WorkloadCompiler::check_service_names("shop", ["web", "db"]).is_ok());
        let err = WorkloadCompiler::check_service_names("shop", ["shop-app-web"]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "compose service name 'shop-app-web' conflicts with reserved ingress service name prefixes"
        );
        assert!(WorkloadCompiler::check_service_names("shop", ["shop-box"]).is_err());
    }
}
