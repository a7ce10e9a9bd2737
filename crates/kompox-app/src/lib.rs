//! App-level synthesis for kompox
//!
//! Wraps the pod compiled by `kompox-workload` in the objects an app needs on
//! a cluster (Namespace, Deployment, Service, Ingress, NetworkPolicy and
//! RBAC) and drives the whole conversion through the phased [`Converter`].
//!
//! # Usage
//!
//! ```rust,ignore
//! let resolver = registry.get(&provider.driver)?;
//! let mut converter = Converter::new(target, &config, resolver);
//! converter.convert()?;
//! converter.bind_volumes(&bindings)?;
//! let output = converter.build()?;
//! for object in output.manifests.objects() {
//!     apply(object.to_value()?)?;
//! }
//! ```

#![deny(missing_docs)]

pub mod converter;
pub mod error;
pub mod ingress;
pub mod manifest;
pub mod policy;
pub mod provider;
pub mod workload;

pub use converter::{BuildOutput, ConversionTarget, Converter, ConverterPhase, COMPONENT_APP};
pub use error::ConverterError;
pub use manifest::{GeneratedManifestSet, ManifestObject};
pub use provider::{DriverRegistry, ProviderError, StaticVolumeClassResolver, VolumeClassResolver};
