//! Ingress module for Traefik-routed Kubernetes Ingresses
//!
//! Each app can emit up to two Ingresses backed by its Service:
//! - **custom** (`<res>-custom`): the hosts listed on the app's ingress rules,
//!   TLS through the configured certificate resolver
//! - **default** (`<res>-default`): one generated host per rule under the
//!   cluster's ingress domain
//!
//! Rules are resolved against the compose port table before either Ingress
//! or the Service is built, so every backend port name exists on the Service.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use kompox_common::impl_api_defaults;
use kompox_common::kube_utils::{HasApiResource, ObjectMeta};
use kompox_common::labels::AppLabels;
use kompox_common::model::AppIngressRule;
use kompox_workload::compose::PortTable;
use kompox_workload::CompilationError;

/// Longest ingress rule name (Service port names are limited to 15)
pub const INGRESS_NAME_MAX_LENGTH: usize = 15;

/// Traefik entrypoints annotation
pub const ANNOTATION_ROUTER_ENTRYPOINTS: &str = "traefik.ingress.kubernetes.io/router.entrypoints";

/// Traefik TLS annotation
pub const ANNOTATION_ROUTER_TLS: &str = "traefik.ingress.kubernetes.io/router.tls";

/// Traefik certificate resolver annotation
pub const ANNOTATION_ROUTER_CERT_RESOLVER: &str =
    "traefik.ingress.kubernetes.io/router.tls.certresolver";

/// Entrypoint every generated router listens on
pub const ENTRYPOINT_WEBSECURE: &str = "websecure";

// =============================================================================
// Ingress Types
// =============================================================================

/// Kubernetes networking/v1 Ingress
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Ingress {
    /// API version (networking.k8s.io/v1)
    #[serde(default = "Ingress::default_api_version")]
    pub api_version: String,
    /// Resource kind (Ingress)
    #[serde(default = "Ingress::default_kind")]
    pub kind: String,
    /// Resource metadata
    pub metadata: ObjectMeta,
    /// Ingress specification
    pub spec: IngressSpec,
}

impl HasApiResource for Ingress {
    const API_VERSION: &'static str = "networking.k8s.io/v1";
    const KIND: &'static str = "Ingress";
}

impl_api_defaults!(Ingress);

impl Ingress {
    /// Create a new Ingress
    pub fn new(metadata: ObjectMeta, spec: IngressSpec) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata,
            spec,
        }
    }

    /// Hosts routed by this Ingress, in rule order
    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.spec.rules.iter().map(|r| r.host.as_str())
    }
}

/// Ingress spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngressSpec {
    /// Ingress class (e.g., "traefik")
    pub ingress_class_name: String,
    /// One rule per host
    pub rules: Vec<IngressRule>,
}

/// Host rule
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct IngressRule {
    /// Hostname
    pub host: String,
    /// HTTP paths
    pub http: HttpIngressRuleValue,
}

/// HTTP paths of a rule
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HttpIngressRuleValue {
    /// Paths
    pub paths: Vec<HttpIngressPath>,
}

/// One routed path
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpIngressPath {
    /// Path
    pub path: String,
    /// Path match type
    pub path_type: String,
    /// Backend
    pub backend: IngressBackend,
}

/// Ingress backend
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct IngressBackend {
    /// Backing Service
    pub service: IngressServiceBackend,
}

/// Service backend referenced by port name
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct IngressServiceBackend {
    /// Service name
    pub name: String,
    /// Service port
    pub port: ServiceBackendPort,
}

/// Named Service port
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ServiceBackendPort {
    /// Port name
    pub name: String,
}

impl HttpIngressPath {
    fn root(service: &str, port_name: &str) -> Self {
        Self {
            path: "/".to_string(),
            path_type: "Prefix".to_string(),
            backend: IngressBackend {
                service: IngressServiceBackend {
                    name: service.to_string(),
                    port: ServiceBackendPort {
                        name: port_name.to_string(),
                    },
                },
            },
        }
    }
}

// =============================================================================
// Rule Resolution
// =============================================================================

/// Ingress rule checked against the compose port table
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedRule {
    /// Rule name, the Service port name
    pub name: String,
    /// Service (host) port
    pub port: u16,
    /// Container port the host port maps to
    pub target_port: u16,
    /// Trimmed custom hosts
    pub hosts: Vec<String>,
}

/// Rule names become Service port names: lowercase, starting with a letter.
pub fn validate_rule_name(name: &str) -> Result<(), CompilationError> {
    let valid = !name.is_empty()
        && name.len() <= INGRESS_NAME_MAX_LENGTH
        && name.starts_with(|c: char| c.is_ascii_lowercase())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(CompilationError::InvalidIngressName {
            name: name.to_string(),
        })
    }
}

fn under_domain(host: &str, domain: &str) -> bool {
    let host = host.to_ascii_lowercase();
    let domain = domain.to_ascii_lowercase();
    host == domain || host.ends_with(&format!(".{}", domain))
}

/// Validate app ingress rules and map each port to its container port.
///
/// Custom hosts may not live under the cluster domain, which is reserved
/// for generated default hosts.
pub fn resolve_rules(
    rules: &[AppIngressRule],
    ports: &PortTable,
    cluster_domain: Option<&str>,
) -> Result<Vec<ResolvedRule>, CompilationError> {
    let mut seen_ports = BTreeSet::new();
    let mut port_names: BTreeMap<u16, &str> = BTreeMap::new();
    let mut host_owners: BTreeMap<String, &str> = BTreeMap::new();
    let mut resolved = Vec::with_capacity(rules.len());

    for rule in rules {
        validate_rule_name(&rule.name)?;
        if !seen_ports.insert(rule.port) {
            return Err(CompilationError::DuplicateIngressPort { port: rule.port });
        }
        let target_port = ports
            .container_port(rule.port)
            .ok_or(CompilationError::UndefinedIngressPort { port: rule.port })?;
        match port_names.get(&target_port) {
            Some(existing) if *existing != rule.name => {
                return Err(CompilationError::IngressPortNameConflict {
                    container_port: target_port,
                    first: existing.to_string(),
                    second: rule.name.clone(),
                });
            }
            Some(_) => {}
            None => {
                port_names.insert(target_port, &rule.name);
            }
        }

        let mut hosts = Vec::new();
        for host in rule.hosts.iter().map(|h| h.trim()).filter(|h| !h.is_empty()) {
            if let Some(domain) = cluster_domain {
                if under_domain(host, domain) {
                    return Err(CompilationError::IngressHostUnderClusterDomain {
                        host: host.to_string(),
                        domain: domain.to_string(),
                    });
                }
            }
            if let Some(previous) = host_owners.insert(host.to_string(), &rule.name) {
                return Err(CompilationError::DuplicateIngressHost {
                    host: host.to_string(),
                    first: previous.to_string(),
                    second: rule.name.clone(),
                });
            }
            hosts.push(host.to_string());
        }

        resolved.push(ResolvedRule {
            name: rule.name.clone(),
            port: rule.port,
            target_port,
            hosts,
        });
    }
    Ok(resolved)
}

// =============================================================================
// Ingress Compiler
// =============================================================================

/// Where the Ingresses live and what they route to
#[derive(Clone, Copy, Debug)]
pub struct IngressScope<'a> {
    /// Namespace of the app
    pub namespace: &'a str,
    /// Label sets of the component; the resource name is the Service name
    pub labels: &'a AppLabels,
    /// `ingressClassName`
    pub ingress_class: &'a str,
    /// Prefix of default hosts (`<app>-<appId>`)
    pub host_prefix: &'a str,
    /// Cluster ingress domain; no default Ingress without one
    pub domain: Option<&'a str>,
    /// App resolver, else cluster resolver
    pub cert_resolver: Option<&'a str>,
}

/// Ingresses generated for one app component
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GeneratedIngresses {
    /// Generated hosts under the cluster domain
    pub default: Option<Ingress>,
    /// User-supplied hosts
    pub custom: Option<Ingress>,
}

impl GeneratedIngresses {
    /// Default first, then custom
    pub fn iter(&self) -> impl Iterator<Item = &Ingress> {
        self.default.iter().chain(self.custom.iter())
    }
}

/// Compiler for app Ingresses
pub struct IngressCompiler;

impl IngressCompiler {
    /// Default host of a rule: `<app>-<appId>-<port>.<domain>`
    pub fn default_host(host_prefix: &str, port: u16, domain: &str) -> String {
        format!("{}-{}.{}", host_prefix, port, domain)
    }

    /// Compile the default and custom Ingresses for resolved rules
    pub fn compile(
        scope: &IngressScope<'_>,
        rules: &[ResolvedRule],
    ) -> Result<GeneratedIngresses, CompilationError> {
        if rules.is_empty() {
            return Ok(GeneratedIngresses::default());
        }
        let custom = Self::compile_custom(scope, rules);
        let default = match scope.domain {
            Some(domain) => Some(Self::compile_default(scope, rules, domain, custom.as_ref())?),
            None => None,
        };
        debug!(
            service = %scope.labels.resource_name(),
            custom_hosts = custom.as_ref().map_or(0, |i| i.spec.rules.len()),
            default = default.is_some(),
            "compiled ingresses"
        );
        Ok(GeneratedIngresses { default, custom })
    }

    fn metadata(scope: &IngressScope<'_>, suffix: &str) -> ObjectMeta {
        ObjectMeta::new(
            format!("{}-{}", scope.labels.resource_name(), suffix),
            scope.namespace,
        )
        .with_labels(&scope.labels.component())
        .with_annotation(ANNOTATION_ROUTER_ENTRYPOINTS, ENTRYPOINT_WEBSECURE)
        .with_annotation(ANNOTATION_ROUTER_TLS, "true")
    }

    fn spec(scope: &IngressScope<'_>, rules: Vec<IngressRule>) -> IngressSpec {
        IngressSpec {
            ingress_class_name: scope.ingress_class.to_string(),
            rules,
        }
    }

    fn compile_custom(scope: &IngressScope<'_>, rules: &[ResolvedRule]) -> Option<Ingress> {
        let service = scope.labels.resource_name();
        let host_rules: Vec<IngressRule> = rules
            .iter()
            .flat_map(|rule| {
                rule.hosts.iter().map(move |host| IngressRule {
                    host: host.clone(),
                    http: HttpIngressRuleValue {
                        paths: vec![HttpIngressPath::root(service, &rule.name)],
                    },
                })
            })
            .collect();
        if host_rules.is_empty() {
            return None;
        }

        let mut metadata = Self::metadata(scope, "custom");
        if let Some(resolver) = scope.cert_resolver {
            metadata = metadata.with_annotation(ANNOTATION_ROUTER_CERT_RESOLVER, resolver);
        }
        Some(Ingress::new(metadata, Self::spec(scope, host_rules)))
    }

    fn compile_default(
        scope: &IngressScope<'_>,
        rules: &[ResolvedRule],
        domain: &str,
        custom: Option<&Ingress>,
    ) -> Result<Ingress, CompilationError> {
        let service = scope.labels.resource_name();
        let custom_hosts: BTreeSet<&str> = custom.map(|i| i.hosts().collect()).unwrap_or_default();
        let mut generated = BTreeSet::new();
        let mut host_rules = Vec::with_capacity(rules.len());

        for rule in rules {
            let host = Self::default_host(scope.host_prefix, rule.port, domain);
            if !generated.insert(host.clone()) {
                return Err(CompilationError::IngressHostCollision {
                    host,
                    message: "duplicated".to_string(),
                });
            }
            if custom_hosts.contains(host.as_str()) {
                return Err(CompilationError::IngressHostCollision {
                    host,
                    message: "collides with custom hosts".to_string(),
                });
            }
            host_rules.push(IngressRule {
                host,
                http: HttpIngressRuleValue {
                    paths: vec![HttpIngressPath::root(service, &rule.name)],
                },
            });
        }

        Ok(Ingress::new(
            Self::metadata(scope, "default"),
            Self::spec(scope, host_rules),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kompox_common::naming::NamingContext;
    use kompox_workload::compose::project::PortMapping;

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

    fn rule(name: &str, port: u16, hosts: &[&str]) -> AppIngressRule {
        AppIngressRule {
            name: name.into(),
            port,
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
        }
    }

    fn labels() -> AppLabels {
        AppLabels::new("shop", "app", &NamingContext::derive("ws", "prv", "cls", "shop", 6))
    }

    // =========================================================================
    // Story: Rules are checked against what compose publishes
    // =========================================================================

    #[test]
    fn story_rules_resolve_to_container_ports() {
        let resolved = resolve_rules(
            &[rule("main", 8080, &[" www.example.com ", ""]), rule("admin", 9090, &[])],
            &ports(&[(8080, 80), (9090, 90)]),
            Some("cluster.example.net"),
        )
        .unwrap();
        assert_eq!(resolved[0].target_port, 80);
        assert_eq!(resolved[0].hosts, vec!["www.example.com"]);
        assert_eq!(resolved[1].target_port, 90);
    }

    #[test]
    fn story_rule_errors() {
        let table = ports(&[(8080, 80), (8081, 80)]);
        let err = |rules: &[AppIngressRule]| {
            resolve_rules(rules, &table, Some("ops.example.net"))
                .unwrap_err()
                .to_string()
        };

        assert_eq!(err(&[rule("Main", 8080, &[])]), "invalid ingress name: Main");
        assert!(err(&[rule("a-very-long-rule-name", 8080, &[])]).starts_with("invalid ingress name"));
        assert!(err(&[rule("1st", 8080, &[])]).starts_with("invalid ingress name"));
        assert_eq!(
            err(&[rule("a", 8080, &[]), rule("b", 8080, &[])]),
            "duplicate ingress port 8080"
        );
        assert_eq!(
            err(&[rule("a", 7000, &[])]),
            "ingress port 7000 not defined in compose ports"
        );
        assert_eq!(
            err(&[rule("a", 8080, &[]), rule("b", 8081, &[])]),
            "containerPort 80 referenced by multiple ingress entries with different names (a,b)"
        );
        assert_eq!(
            err(&[rule("a", 8080, &["x.example.com"]), rule("a", 8081, &["x.example.com"])]),
            "host x.example.com duplicated across ingress entries (a,a)"
        );
        assert_eq!(
            err(&[rule("a", 8080, &["App.OPS.example.net"])]),
            "ingress host App.OPS.example.net must not be under cluster ingress domain ops.example.net"
        );
        assert!(err(&[rule("a", 8080, &["ops.example.net"])]).contains("must not be under"));
    }

    #[test]
    fn same_name_may_share_a_container_port() {
        let resolved = resolve_rules(
            &[rule("web", 8080, &[]), rule("web", 8081, &[])],
            &ports(&[(8080, 80), (8081, 80)]),
            None,
        )
        .unwrap();
        assert_eq!(resolved.len(), 2);
    }

    // =========================================================================
    // Story: Custom and default Ingresses
    // =========================================================================

    #[test]
    fn story_custom_and_default_ingresses() {
        let labels = labels();
        let scope = IngressScope {
            namespace: "ns",
            labels: &labels,
            ingress_class: "traefik",
            host_prefix: "shop-abc123",
            domain: Some("ops.example.net"),
            cert_resolver: Some("staging"),
        };
        let rules = resolve_rules(
            &[rule("main", 8080, &["www.example.com", "example.com"]), rule("admin", 9090, &[])],
            &ports(&[(8080, 80), (9090, 90)]),
            scope.domain,
        )
        .unwrap();
        let ingresses = IngressCompiler::compile(&scope, &rules).unwrap();

        let custom = ingresses.custom.as_ref().unwrap();
        assert_eq!(custom.metadata.name, "shop-app-custom");
        assert_eq!(custom.hosts().collect::<Vec<_>>(), vec!["www.example.com", "example.com"]);
        assert_eq!(custom.metadata.annotation(ANNOTATION_ROUTER_CERT_RESOLVER), Some("staging"));
        let backend = &custom.spec.rules[0].http.paths[0].backend.service;
        assert_eq!(backend.name, "shop-app");
        assert_eq!(backend.port.name, "main");

        let default = ingresses.default.as_ref().unwrap();
        assert_eq!(default.metadata.name, "shop-app-default");
        assert_eq!(
            default.hosts().collect::<Vec<_>>(),
            vec!["shop-abc123-8080.ops.example.net", "shop-abc123-9090.ops.example.net"]
        );
        assert_eq!(default.metadata.annotation(ANNOTATION_ROUTER_CERT_RESOLVER), None);
        assert_eq!(default.metadata.annotation(ANNOTATION_ROUTER_TLS), Some("true"));
        assert_eq!(default.spec.ingress_class_name, "traefik");

        let names: Vec<_> = ingresses.iter().map(|i| i.metadata.name.as_str()).collect();
        assert_eq!(names, vec!["shop-app-default", "shop-app-custom"]);

        let value = serde_json::to_value(custom).unwrap();
        assert_eq!(value["apiVersion"], "networking.k8s.io/v1");
        assert_eq!(value["spec"]["ingressClassName"], "traefik");
        assert_eq!(value["spec"]["rules"][0]["http"]["paths"][0]["pathType"], "Prefix");
    }

    #[test]
    fn story_no_domain_no_hosts_no_ingress() {
        let labels = labels();
        let scope = IngressScope {
            namespace: "ns",
            labels: &labels,
            ingress_class: "traefik",
            host_prefix: "shop-abc123",
            domain: None,
            cert_resolver: None,
        };
        let rules = resolve_rules(&[rule("main", 8080, &[])], &ports(&[(8080, 80)]), None).unwrap();
        assert_eq!(
            IngressCompiler::compile(&scope, &rules).unwrap(),
            GeneratedIngresses::default()
        );
        assert_eq!(
            IngressCompiler::compile(&scope, &[]).unwrap(),
            GeneratedIngresses::default()
        );
    }

    #[test]
    fn story_default_host_collides_with_custom() {
        let labels = labels();
        let scope = IngressScope {
            namespace: "ns",
            labels: &labels,
            ingress_class: "traefik",
            host_prefix: "shop-abc123",
            domain: Some("ops.example.net"),
            cert_resolver: None,
        };
        // resolve_rules would reject this host; build the rule directly
        let rules = vec![ResolvedRule {
            name: "main".into(),
            port: 8080,
            target_port: 80,
            hosts: vec!["shop-abc123-8080.ops.example.net".into()],
        }];
        let err = IngressCompiler::compile(&scope, &rules).unwrap_err();
        assert_eq!(
            err.to_string(),
            "generated default host shop-abc123-8080.ops.example.net collides with custom hosts"
        );
    }

    // =========================================================================
    // Story: Ingresses read back without type metadata
    // =========================================================================

    #[test]
    fn story_missing_type_metadata_defaults_to_ingress() {
        let ingress: Ingress = serde_json::from_value(serde_json::json!({
            "metadata": { "name": "shop-app-custom", "namespace": "ns" },
            "spec": { "ingressClassName": "traefik", "rules": [] }
        }))
        .unwrap();
        assert_eq!(ingress.api_version, Ingress::API_VERSION);
        assert_eq!(ingress.kind, Ingress::KIND);
        assert_eq!(Ingress::api_resource().plural, "ingresses");
    }
}
