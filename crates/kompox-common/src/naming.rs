//! Deterministic naming and short hashes
//!
//! Every generated name that must be unique across workspaces, providers,
//! clusters or disks is derived here. Hashes are lowercase base-36 strings
//! computed from a SHA-256 digest of the canonical `:`-joined tuple, so the
//! same inputs always produce the same names on every machine.
//!
//! Hierarchy (scope -> field):
//!
//! ```text
//! workspace                          -> workspace
//! workspace:provider                 -> provider
//! workspace:provider:cluster         -> cluster
//! workspace:provider:app             -> app_id        (cluster independent)
//! workspace:provider:cluster:app     -> app_instance  (cluster dependent)
//! ```

use aws_lc_rs::digest::{digest, SHA256};

use crate::{Error, Result};

/// Default length of every short hash
pub const DEFAULT_HASH_LENGTH: usize = 6;

/// Longest short hash a SHA-256 digest can back (36^50 > 2^256)
pub const MAX_HASH_LENGTH: usize = 50;

/// Prefix of namespaces and volume resource names
pub const RESOURCE_PREFIX: &str = "k4x";

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Maximum length of an app volume name
pub const VOLUME_NAME_MAX_LENGTH: usize = 16;

/// Maximum length of a DNS-1123 label
pub const DNS1123_LABEL_MAX_LENGTH: usize = 63;

// =============================================================================
// Short Hash
// =============================================================================

/// Return a lowercase base-36 hash of `s` with exactly `n` characters.
///
/// `n` is clamped to `1..=MAX_HASH_LENGTH`. The digits are taken from the low
/// end of the digest so every position is uniformly distributed.
pub fn short_hash(s: &str, n: usize) -> String {
    short_hash_bytes(s.as_bytes(), n)
}

/// [`short_hash`] over raw bytes, for binary secret content
pub fn short_hash_bytes(bytes: &[u8], n: usize) -> String {
    let n = n.clamp(1, MAX_HASH_LENGTH);
    let mut value: Vec<u8> = digest(&SHA256, bytes).as_ref().to_vec();

    let mut out = String::with_capacity(n);
    for _ in 0..n {
        // Long division of the big-endian digest by 36
        let mut remainder: u32 = 0;
        for byte in value.iter_mut() {
            let acc = (remainder << 8) | u32::from(*byte);
            *byte = (acc / 36) as u8;
            remainder = acc % 36;
        }
        out.push(BASE36[remainder as usize] as char);
    }
    out
}

// =============================================================================
// Naming Context
// =============================================================================

/// Hierarchical short hashes for one (workspace, provider, cluster, app) tuple
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamingContext {
    /// Hash of the workspace name
    pub workspace: String,
    /// Hash of workspace:provider
    pub provider: String,
    /// Hash of workspace:provider:cluster
    pub cluster: String,
    /// Hash of workspace:provider:app, stable when only the cluster changes
    pub app_id: String,
    /// Hash of workspace:provider:cluster:app
    pub app_instance: String,
    /// Namespace for the app: `k4x-<provider>-<app>-<app_id>`
    pub namespace: String,
    hash_length: usize,
}

impl NamingContext {
    /// Derive all hashes for the tuple using the given hash length
    pub fn derive(
        workspace: &str,
        provider: &str,
        cluster: &str,
        app: &str,
        hash_length: usize,
    ) -> Self {
        let provider_hash = short_hash(&format!("{}:{}", workspace, provider), hash_length);
        let app_id = short_hash(&format!("{}:{}:{}", workspace, provider, app), hash_length);
        Self {
            workspace: short_hash(workspace, hash_length),
            cluster: short_hash(
                &format!("{}:{}:{}", workspace, provider, cluster),
                hash_length,
            ),
            app_instance: short_hash(
                &format!("{}:{}:{}:{}", workspace, provider, cluster, app),
                hash_length,
            ),
            namespace: format!("{}-{}-{}-{}", RESOURCE_PREFIX, provider_hash, app, app_id),
            provider: provider_hash,
            app_id,
            hash_length,
        }
    }

    /// Hash length this context was derived with
    pub fn hash_length(&self) -> usize {
        self.hash_length
    }

    /// Short hash of an arbitrary string at this context's hash length
    pub fn hash(&self, s: &str) -> String {
        short_hash(s, self.hash_length)
    }

    /// Resource name shared by the PV and PVC of one bound disk.
    ///
    /// `k4x-<provider>-<volume>-<app_id>-<hash(handle)>`: unique across apps
    /// and across disk replacement for the same logical volume.
    pub fn volume_resource_name(&self, volume_name: &str, disk_handle: &str) -> String {
        format!(
            "{}-{}-{}-{}-{}",
            RESOURCE_PREFIX,
            self.provider,
            volume_name,
            self.app_id,
            self.hash(disk_handle)
        )
    }
}

// =============================================================================
// Resource Names
// =============================================================================

/// `<app>-<component>`: Deployment, Service and Ingress base name
pub fn resource_name(app: &str, component: &str) -> String {
    format!("{}-{}", app, component)
}

/// `<app>-<component>-<service>-base`: merged env_file Secret
pub fn env_base_secret_name(app: &str, component: &str, service: &str) -> String {
    format!("{}-{}-{}-base", app, component, service)
}

/// `<app>-<component>-<service>-override`: administrator override Secret
pub fn env_override_secret_name(app: &str, component: &str, service: &str) -> String {
    format!("{}-{}-{}-override", app, component, service)
}

/// `<app>-<component>--pull`: registry credentials Secret
pub fn pull_secret_name(app: &str, component: &str) -> String {
    format!("{}-{}--pull", app, component)
}

/// `<app>-<component>--cfg-<config>`: ConfigMap for a top-level config
pub fn config_map_name(app: &str, component: &str, config: &str) -> String {
    format!("{}-{}--cfg-{}", app, component, config)
}

/// `<app>-<component>--sec-<secret>`: Secret for a top-level secret
pub fn config_secret_name(app: &str, component: &str, secret: &str) -> String {
    format!("{}-{}--sec-{}", app, component, secret)
}

/// `cfg-<config>`: pod volume mounting a ConfigMap
pub fn config_map_volume_name(config: &str) -> String {
    format!("cfg-{}", config)
}

/// `sec-<secret>`: pod volume mounting a Secret
pub fn config_secret_volume_name(secret: &str) -> String {
    format!("sec-{}", secret)
}

// =============================================================================
// Name Validation
// =============================================================================

/// Check `name` is a DNS-1123 label no longer than `max` characters
pub fn validate_dns1123_label(name: &str, max: usize, kind: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::validation_for(kind, format!("{} name must not be empty", kind)));
    }
    if name.len() > max {
        return Err(Error::validation_for(
            kind,
            format!("{} name {:?} exceeds {} characters", kind, name, max),
        ));
    }
    let bytes = name.as_bytes();
    let valid_inner = bytes
        .iter()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-');
    let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !valid_inner || !alnum(bytes[0]) || !alnum(bytes[bytes.len() - 1]) {
        return Err(Error::validation_for(
            kind,
            format!(
                "invalid {} name {:?}: must consist of lower case alphanumeric characters or '-', and start and end with an alphanumeric character",
                kind, name
            ),
        ));
    }
    Ok(())
}

/// Validate an app volume name (DNS-1123 label, at most 16 characters)
pub fn validate_volume_name(name: &str) -> Result<()> {
    validate_dns1123_label(name, VOLUME_NAME_MAX_LENGTH, "volume")
}

/// Validate a compose config/secret name (DNS-1123 label)
pub fn validate_config_secret_name(name: &str) -> Result<()> {
    validate_dns1123_label(name, DNS1123_LABEL_MAX_LENGTH, "config/secret")
}
