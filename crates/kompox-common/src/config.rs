//! Synthesis configuration
//!
//! Settings that shape generated objects without being part of an app's own
//! description. Loaded from YAML and validated once; conversions take it by
//! reference.

use serde::{Deserialize, Serialize};

use crate::naming::DEFAULT_HASH_LENGTH;
use crate::{Error, Result};

/// Longest configurable short hash
pub const MAX_CONFIGURED_HASH_LENGTH: usize = 32;

/// Engine-wide synthesis settings
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Length of every short hash
    pub hash_length: usize,
    /// Image of the sub-path preparation init container
    pub init_image: String,
    /// `ingressClassName` of generated Ingresses
    pub ingress_class: String,
    /// Node pool used when the app does not choose one
    pub default_node_pool: String,
    /// Emit one headless Service per compose service
    pub headless_services: bool,
    /// Emit NetworkPolicy, ServiceAccount, Role and RoleBinding
    pub access_resources: bool,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            hash_length: DEFAULT_HASH_LENGTH,
            init_image: "busybox:1.36".to_string(),
            ingress_class: "traefik".to_string(),
            default_node_pool: "user".to_string(),
            headless_services: true,
            access_resources: true,
        }
    }
}

impl SynthesisConfig {
    /// Parse and validate a YAML config document. Missing keys take defaults.
    pub fn from_yaml(input: &str) -> Result<Self> {
        let value = crate::yaml::parse_yaml(input)?;
        let config: Self = if value.is_null() {
            Self::default()
        } else {
            serde_json::from_value(value)
                .map_err(|e| Error::serialization_for_kind("SynthesisConfig", e.to_string()))?
        };
        config.validate()?;
        tracing::debug!(
            hash_length = config.hash_length,
            ingress_class = %config.ingress_class,
            "loaded synthesis config"
        );
        Ok(config)
    }

    /// Check invariants the engine relies on
    pub fn validate(&self) -> Result<()> {
        if self.hash_length == 0 || self.hash_length > MAX_CONFIGURED_HASH_LENGTH {
            return Err(Error::config(format!(
                "hash_length must be between 1 and {}, got {}",
                MAX_CONFIGURED_HASH_LENGTH, self.hash_length
            )));
        }
        if self.init_image.trim().is_empty() {
            return Err(Error::config("init_image must not be empty"));
        }
        if self.ingress_class.trim().is_empty() {
            return Err(Error::config("ingress_class must not be empty"));
        }
        if self.default_node_pool.trim().is_empty() {
            return Err(Error::config("default_node_pool must not be empty"));
        }
        Ok(())
    }

    /// Config without headless Services and access objects, producing only
    /// the core storage/workload/network objects
    pub fn minimal() -> Self {
        Self {
            headless_services: false,
            access_resources: false,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SynthesisConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.hash_length, 6);
        assert_eq!(config.init_image, "busybox:1.36");
        assert!(config.headless_services);
    }

    #[test]
    fn from_yaml_fills_missing_keys() {
        let config = SynthesisConfig::from_yaml("hash_length: 8\naccess_resources: false").unwrap();
        assert_eq!(config.hash_length, 8);
        assert!(!config.access_resources);
        assert_eq!(config.ingress_class, "traefik");
    }

    #[test]
    fn from_yaml_empty_is_default() {
        assert_eq!(SynthesisConfig::from_yaml("").unwrap(), SynthesisConfig::default());
    }

    #[test]
    fn hash_length_out_of_range_is_rejected() {
        let err = SynthesisConfig::from_yaml("hash_length: 0").unwrap_err();
        assert!(err.to_string().contains("hash_length"));
        assert!(SynthesisConfig::from_yaml("hash_length: 33").is_err());
    }

    #[test]
    fn unknown_types_are_serialization_errors() {
        let err = SynthesisConfig::from_yaml("hash_length: many").unwrap_err();
        assert!(matches!(err, Error::Serialization { .. }));
    }

    #[test]
    fn minimal_disables_extras() {
        let config = SynthesisConfig::minimal();
        assert!(!config.headless_services);
        assert!(!config.access_resources);
        assert_eq!(config.hash_length, 6);
    }
}
