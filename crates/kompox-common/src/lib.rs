//! Common types for kompox: naming, hashing, domain model, errors and utilities
//!
//! Everything here is pure and synchronous. The workload and app crates build
//! on these primitives to turn a compose document into cluster objects.

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod kube_utils;
pub mod labels;
pub mod model;
pub mod naming;
pub mod telemetry;
pub mod yaml;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Label and Annotation Keys
// =============================================================================
// These keys are written onto live cluster objects and read back later by
// teardown, status and patch logic. Their values must never change.

/// Domain prefix for all kompox labels and annotations
pub const KOMPOX_DOMAIN: &str = "kompox.dev";

/// Standard Kubernetes name label
pub const LABEL_NAME: &str = "app.kubernetes.io/name";

/// Standard Kubernetes instance label
pub const LABEL_INSTANCE: &str = "app.kubernetes.io/instance";

/// Standard Kubernetes managed-by label
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Standard Kubernetes component label
pub const LABEL_COMPONENT: &str = "app.kubernetes.io/component";

/// Value of the managed-by label on every generated object
pub const LABEL_MANAGED_BY_KOMPOX: &str = "kompox";

/// Pod selector label (`<app>-<component>`)
pub const LABEL_APP_SELECTOR: &str = "app";

/// Cluster-dependent app instance hash label
pub const LABEL_APP_INSTANCE_HASH: &str = "kompox.dev/app-instance-hash";

/// Cluster-independent app id hash label
pub const LABEL_APP_ID_HASH: &str = "kompox.dev/app-id-hash";

/// Marker label for per-compose-service headless Services
pub const LABEL_COMPOSE_SERVICE_HEADLESS: &str = "kompox.dev/compose-service-headless";

/// Node selector key for the node pool
pub const LABEL_NODE_POOL: &str = "kompox.dev/node-pool";

/// Node selector key for the availability zone
pub const LABEL_NODE_ZONE: &str = "kompox.dev/node-zone";

/// Namespace annotation holding `workspace/provider/cluster/app`
pub const ANNOTATION_APP: &str = "kompox.dev/app";

/// Namespace annotation holding the provider driver name
pub const ANNOTATION_PROVIDER_DRIVER: &str = "kompox.dev/provider-driver";

/// Content digest of a Secret/ConfigMap, and the aggregate pod content hash
/// on the pod template
pub const ANNOTATION_CONTENT_HASH: &str = "kompox.dev/compose-content-hash";

/// Digest of merged env-file data on env Secrets
pub const ANNOTATION_SECRET_HASH: &str = "kompox.dev/compose-secret-hash";
