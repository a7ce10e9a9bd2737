//! Pod-level compilation for kompox
//!
//! Normalizes a compose document against an app's logical volumes, then
//! compiles it into Kubernetes primitives: containers, env/config Secrets and
//! ConfigMaps, PersistentVolumes and claims, and the pod spec with its content
//! hash. The app crate wraps the output in Deployment, Service and Ingress
//! objects.
//!
//! # Usage
//!
//! ```rust,ignore
//! let project = ComposeProject::load(&app.compose)?;
//! let normalized = compose::normalize(&project, &input)?;
//! let files = secrets::compile(&scope, &normalized, docker_config)?;
//! let pod = PodCompiler::new(&normalized, &files)
//!     .with_bound_volumes(&bound)
//!     .compile();
//! ```

#![deny(missing_docs)]

mod compiler;
pub mod compose;
pub mod content_hash;
pub mod error;
pub mod k8s;
pub mod secrets;
pub mod storage;

pub use compiler::{CompiledPod, PodCompiler, DEFAULT_INIT_IMAGE};
pub use compose::{normalize, ComposeProject, NormalizeInput, NormalizedProject};
pub use content_hash::{content_digest, pod_content_hash, PodPatchPlan, PodReferences};
pub use error::CompilationError;
pub use secrets::{CompiledFiles, ObjectScope};
pub use storage::{BoundVolume, PersistentVolume, PersistentVolumeClaim, StorageScope};
