//! Provider driver seam
//!
//! Provider drivers own disks and storage classes; the converter only asks
//! them for the [`VolumeClass`] of each declared volume. Drivers are
//! injected at construction, either directly or through a
//! [`DriverRegistry`] keyed by `Provider::driver`.

use std::collections::BTreeMap;
use std::sync::Arc;

use kompox_common::model::{App, AppVolume, Cluster, VolumeClass};
use thiserror::Error;

/// Failure reported by a provider driver
#[derive(Debug, Error)]
pub enum ProviderError {
    /// No driver registered under the provider's driver name
    #[error("unknown provider driver: {0}")]
    UnknownDriver(String),

    /// The driver could not resolve a class for the volume
    #[error("{0}")]
    VolumeClass(String),
}

/// Resolves storage parameters for a declared volume
#[cfg_attr(test, mockall::automock)]
pub trait VolumeClassResolver: Send + Sync {
    /// Volume class of `volume` for `app` on `cluster`; called once per
    /// declared volume during binding
    fn volume_class(
        &self,
        cluster: &Cluster,
        app: &App,
        volume: &AppVolume,
    ) -> Result<VolumeClass, ProviderError>;
}

/// Resolver returning a fixed class, with optional per-volume overrides
#[derive(Clone, Debug, Default)]
pub struct StaticVolumeClassResolver {
    default: VolumeClass,
    overrides: BTreeMap<String, VolumeClass>,
}

impl StaticVolumeClassResolver {
    /// Resolver returning `class` for every volume
    pub fn new(class: VolumeClass) -> Self {
        Self {
            default: class,
            overrides: BTreeMap::new(),
        }
    }

    /// Use `class` for the volume named `volume`
    pub fn with_override(mut self, volume: impl Into<String>, class: VolumeClass) -> Self {
        self.overrides.insert(volume.into(), class);
        self
    }
}

impl VolumeClassResolver for StaticVolumeClassResolver {
    fn volume_class(
        &self,
        _cluster: &Cluster,
        _app: &App,
        volume: &AppVolume,
    ) -> Result<VolumeClass, ProviderError> {
        Ok(self
            .overrides
            .get(&volume.name)
            .unwrap_or(&self.default)
            .clone())
    }
}

/// Drivers by name, built once by the caller and passed around explicitly
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: BTreeMap<String, Arc<dyn VolumeClassResolver>>,
}

impl DriverRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `resolver` under `driver`, replacing any previous one
    pub fn register(mut self, driver: impl Into<String>, resolver: Arc<dyn VolumeClassResolver>) -> Self {
        self.drivers.insert(driver.into(), resolver);
        self
    }

    /// Driver registered under `driver`
    pub fn get(&self, driver: &str) -> Result<Arc<dyn VolumeClassResolver>, ProviderError> {
        self.drivers
            .get(driver)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownDriver(driver.to_string()))
    }

    /// Registered driver names, sorted
    pub fn drivers(&self) -> impl Iterator<Item = &str> {
        self.drivers.keys().map(String::as_str)
    }
}
