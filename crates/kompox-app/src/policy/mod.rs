//! Network isolation and access objects for kompox apps
//!
//! Every app namespace gets:
//! - a NetworkPolicy admitting traffic from the namespace itself, from
//!   `kube-system` and from the ingress controller's namespace, plus any
//!   rules the app adds
//! - a ServiceAccount with a Role allowing operators to inspect, exec into
//!   and port-forward to the app's pods, and a RoleBinding tying them
//!
//! For policy generation, use [`PolicyCompiler`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use kompox_common::kube_utils::{
    HasApiResource, LabelSelector, LabelSelectorRequirement, ObjectMeta,
};
use kompox_common::impl_api_defaults;
use kompox_common::model::NetworkPolicyIngressRule as AppIngressRule;

/// Label Kubernetes sets on every namespace with its own name
pub const LABEL_NAMESPACE_NAME: &str = "kubernetes.io/metadata.name";

/// Namespace always allowed to reach the app
pub const KUBE_SYSTEM_NAMESPACE: &str = "kube-system";

/// RBAC API group
pub const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

// =============================================================================
// NetworkPolicy
// =============================================================================

/// Kubernetes networking/v1 NetworkPolicy
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPolicy {
    /// API version
    #[serde(default = "NetworkPolicy::default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "NetworkPolicy::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: NetworkPolicySpec,
}

impl HasApiResource for NetworkPolicy {
    const API_VERSION: &'static str = "networking.k8s.io/v1";
    const KIND: &'static str = "NetworkPolicy";
}

impl_api_defaults!(NetworkPolicy);

/// NetworkPolicy spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPolicySpec {
    /// Pods the policy applies to
    pub pod_selector: LabelSelector,
    /// Policy directions
    pub policy_types: Vec<String>,
    /// Allowed ingress
    pub ingress: Vec<NetworkPolicyIngress>,
}

/// One allowed ingress rule
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NetworkPolicyIngress {
    /// Allowed peers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub from: Vec<NetworkPolicyPeer>,
    /// Allowed ports
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<NetworkPolicyPort>,
}

/// Traffic source
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPolicyPeer {
    /// Pods in the policy's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_selector: Option<LabelSelector>,
    /// Namespaces
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<LabelSelector>,
}

/// Allowed port
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NetworkPolicyPort {
    /// Protocol
    pub protocol: String,
    /// Port number
    pub port: u16,
}

// =============================================================================
// RBAC
// =============================================================================

/// Kubernetes ServiceAccount
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccount {
    /// API version
    #[serde(default = "ServiceAccount::default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "ServiceAccount::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
}

impl HasApiResource for ServiceAccount {
    const API_VERSION: &'static str = "v1";
    const KIND: &'static str = "ServiceAccount";
}

impl_api_defaults!(ServiceAccount);

/// Kubernetes Role
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    /// API version
    #[serde(default = "Role::default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "Role::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Rules
    pub rules: Vec<PolicyRule>,
}

impl HasApiResource for Role {
    const API_VERSION: &'static str = "rbac.authorization.k8s.io/v1";
    const KIND: &'static str = "Role";
}

impl_api_defaults!(Role);

/// One RBAC rule
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    /// API groups (`""` is core)
    pub api_groups: Vec<String>,
    /// Resources
    pub resources: Vec<String>,
    /// Verbs
    pub verbs: Vec<String>,
}

impl PolicyRule {
    fn new(group: &str, resources: &[&str], verbs: &[&str]) -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            api_groups: vec![group.to_string()],
            resources: owned(resources),
            verbs: owned(verbs),
        }
    }
}

/// Kubernetes RoleBinding
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoleBinding {
    /// API version
    #[serde(default = "RoleBinding::default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "RoleBinding::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Bound subjects
    pub subjects: Vec<Subject>,
    /// Bound role
    pub role_ref: RoleRef,
}

impl HasApiResource for RoleBinding {
    const API_VERSION: &'static str = "rbac.authorization.k8s.io/v1";
    const KIND: &'static str = "RoleBinding";
}

impl_api_defaults!(RoleBinding);

/// RoleBinding subject
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Subject {
    /// Subject kind
    pub kind: String,
    /// Subject name
    pub name: String,
    /// Subject namespace
    pub namespace: String,
}

/// RoleBinding role reference
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoleRef {
    /// API group
    pub api_group: String,
    /// Kind
    pub kind: String,
    /// Role name
    pub name: String,
}

// =============================================================================
// Generated Policies Container
// =============================================================================

/// Isolation and access objects of one app
#[derive(Clone, Debug, PartialEq)]
pub struct GeneratedPolicies {
    /// Namespace isolation
    pub network_policy: NetworkPolicy,
    /// Operator identity
    pub service_account: ServiceAccount,
    /// Operator permissions
    pub role: Role,
    /// Binding of the Role to the ServiceAccount
    pub role_binding: RoleBinding,
}

/// Where the policies live
#[derive(Clone, Copy, Debug)]
pub struct PolicyScope<'a> {
    /// App name, the NetworkPolicy and ServiceAccount name
    pub app: &'a str,
    /// Namespace of the app
    pub namespace: &'a str,
    /// Ingress controller namespace
    pub ingress_namespace: &'a str,
    /// Base labels of the app
    pub labels: &'a BTreeMap<String, String>,
}

// =============================================================================
// Policy Compiler
// =============================================================================

/// Compiler for app isolation and access objects
pub struct PolicyCompiler;

impl PolicyCompiler {
    /// Compile the NetworkPolicy and RBAC objects of an app
    pub fn compile(scope: &PolicyScope<'_>, extra_rules: &[AppIngressRule]) -> GeneratedPolicies {
        let service_account = Self::compile_service_account(scope);
        let role = Self::compile_role(scope);
        let role_binding = Self::compile_role_binding(scope, &service_account, &role);
        GeneratedPolicies {
            network_policy: Self::compile_network_policy(scope, extra_rules),
            service_account,
            role,
            role_binding,
        }
    }

    /// NetworkPolicy admitting same-namespace, system and ingress traffic
    pub fn compile_network_policy(
        scope: &PolicyScope<'_>,
        extra_rules: &[AppIngressRule],
    ) -> NetworkPolicy {
        let mut namespaces: Vec<String> = Vec::new();
        for ns in [KUBE_SYSTEM_NAMESPACE, scope.ingress_namespace] {
            let ns = ns.trim();
            if !ns.is_empty() && !namespaces.iter().any(|n| n == ns) {
                namespaces.push(ns.to_string());
            }
        }

        let mut ingress = vec![NetworkPolicyIngress {
            from: vec![
                NetworkPolicyPeer {
                    pod_selector: Some(LabelSelector::everything()),
                    namespace_selector: None,
                },
                NetworkPolicyPeer {
                    pod_selector: None,
                    namespace_selector: Some(LabelSelector {
                        match_labels: BTreeMap::new(),
                        match_expressions: vec![LabelSelectorRequirement {
                            key: LABEL_NAMESPACE_NAME.to_string(),
                            operator: "In".to_string(),
                            values: namespaces,
                        }],
                    }),
                },
            ],
            ports: Vec::new(),
        }];
        ingress.extend(extra_rules.iter().map(Self::user_rule));

        NetworkPolicy {
            api_version: NetworkPolicy::default_api_version(),
            kind: NetworkPolicy::default_kind(),
            metadata: ObjectMeta::new(scope.app, scope.namespace).with_labels(scope.labels),
            spec: NetworkPolicySpec {
                pod_selector: LabelSelector::everything(),
                policy_types: vec!["Ingress".to_string()],
                ingress,
            },
        }
    }

    fn user_rule(rule: &AppIngressRule) -> NetworkPolicyIngress {
        NetworkPolicyIngress {
            from: rule
                .from
                .iter()
                .map(|peer| NetworkPolicyPeer {
                    pod_selector: None,
                    namespace_selector: peer.namespace_selector.clone(),
                })
                .collect(),
            ports: rule
                .ports
                .iter()
                .map(|p| NetworkPolicyPort {
                    protocol: match p.protocol.trim() {
                        "" => "TCP".to_string(),
                        protocol => protocol.to_string(),
                    },
                    port: p.port,
                })
                .collect(),
        }
    }

    fn compile_service_account(scope: &PolicyScope<'_>) -> ServiceAccount {
        ServiceAccount {
            api_version: ServiceAccount::default_api_version(),
            kind: ServiceAccount::default_kind(),
            metadata: ObjectMeta::new(scope.app, scope.namespace).with_labels(scope.labels),
        }
    }

    fn compile_role(scope: &PolicyScope<'_>) -> Role {
        Role {
            api_version: Role::default_api_version(),
            kind: Role::default_kind(),
            metadata: ObjectMeta::new(format!("{}-access", scope.app), scope.namespace)
                .with_labels(scope.labels),
            rules: vec![
                PolicyRule::new("", &["pods"], &["get", "list", "watch"]),
                PolicyRule::new("", &["pods/log"], &["get", "watch"]),
                PolicyRule::new(
                    "",
                    &["pods/exec", "pods/portforward", "pods/attach"],
                    &["create"],
                ),
                PolicyRule::new(
                    "",
                    &["events", "services", "endpoints"],
                    &["get", "list", "watch"],
                ),
                PolicyRule::new(
                    "apps",
                    &["deployments", "replicasets"],
                    &["get", "list", "watch"],
                ),
                PolicyRule::new("", &["pods/ephemeralcontainers"], &["update"]),
            ],
        }
    }

    fn compile_role_binding(
        scope: &PolicyScope<'_>,
        service_account: &ServiceAccount,
        role: &Role,
    ) -> RoleBinding {
        RoleBinding {
            api_version: RoleBinding::default_api_version(),
            kind: RoleBinding::default_kind(),
            metadata: ObjectMeta::new(role.metadata.name.clone(), scope.namespace)
                .with_labels(scope.labels),
            subjects: vec![Subject {
                kind: ServiceAccount::KIND.to_string(),
                name: service_account.metadata.name.clone(),
                namespace: scope.namespace.to_string(),
            }],
            role_ref: RoleRef {
                api_group: RBAC_API_GROUP.to_string(),
                kind: Role::KIND.to_string(),
                name: role.metadata.name.clone(),
            },
        }
    }
}
