//! Kompox - compose-to-cluster manifest synthesis
//!
//! Turns a compose document plus an app's logical volumes and ingress rules
//! into the ordered set of Kubernetes objects that run it, with content
//! hashes that roll pods when referenced configuration changes.
//!
//! # Architecture
//!
//! - [`common`] - naming and hashing, domain model, configuration, telemetry
//! - [`workload`] - compose normalization, pod compilation, Secrets and
//!   ConfigMaps, volume binding, pod patch plans
//! - [`app`] - app-level objects and the phased [`Converter`]
//!
//! # Example
//!
//! ```rust,ignore
//! let output = kompox::synthesize(target, &config, resolver, &bindings)?;
//! print!("{}", output.manifests.to_yaml()?);
//! ```

#![deny(missing_docs)]

use std::sync::Arc;

pub use kompox_app as app;
pub use kompox_common as common;
pub use kompox_workload as workload;

pub use kompox_app::{
    BuildOutput, ConversionTarget, Converter, ConverterError, ConverterPhase, DriverRegistry,
    GeneratedManifestSet, StaticVolumeClassResolver, VolumeClassResolver,
};
pub use kompox_common::config::SynthesisConfig;
pub use kompox_common::model::{App, Cluster, Provider, VolumeBinding, VolumeClass, Workspace};
pub use kompox_common::naming::NamingContext;
pub use kompox_workload::{content_digest, PodPatchPlan};

/// Run all three phases for one app
pub fn synthesize(
    target: ConversionTarget<'_>,
    config: &SynthesisConfig,
    resolver: Arc<dyn VolumeClassResolver>,
    bindings: &[VolumeBinding],
) -> Result<BuildOutput, ConverterError> {
    let mut converter = Converter::new(target, config, resolver);
    converter.convert()?;
    converter.bind_volumes(bindings)?;
    converter.build()
}
