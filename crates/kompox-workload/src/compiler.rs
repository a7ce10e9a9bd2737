//! PodCompiler assembles the pod template of an app component
//!
//! Inputs are the normalized project, the materialized configuration objects
//! and the bound volumes. The output is the pod spec plus its content hash.

use std::collections::BTreeMap;

use tracing::debug;

use crate::compose::NormalizedProject;
use crate::content_hash::pod_content_hash;
use crate::k8s::{LocalObjectReference, PodSpec};
use crate::secrets::CompiledFiles;
use crate::storage::{claim_volumes, init_container, BoundVolume};

/// Default image of the sub-path init container
pub const DEFAULT_INIT_IMAGE: &str = "busybox:1.36";

/// Pod spec and the hash of everything it references
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledPod {
    /// Pod spec
    pub spec: PodSpec,
    /// Pod content hash, `None` when nothing is referenced
    pub content_hash: Option<String>,
}

/// Builds a [`CompiledPod`].
///
/// ```rust,ignore
/// let pod = PodCompiler::new(&project, &files)
///     .with_bound_volumes(&bound)
///     .with_init_image(&config.init_image)
///     .with_node_selector(selector)
///     .compile();
/// ```
pub struct PodCompiler<'a> {
    project: &'a NormalizedProject,
    files: &'a CompiledFiles,
    bound: &'a [BoundVolume],
    init_image: &'a str,
    node_selector: BTreeMap<String, String>,
}

impl<'a> PodCompiler<'a> {
    /// Compiler over a normalized project and its configuration objects
    pub fn new(project: &'a NormalizedProject, files: &'a CompiledFiles) -> Self {
        Self {
            project,
            files,
            bound: &[],
            init_image: DEFAULT_INIT_IMAGE,
            node_selector: BTreeMap::new(),
        }
    }

    /// Mount the claims of bound volumes
    pub fn with_bound_volumes(mut self, bound: &'a [BoundVolume]) -> Self {
        self.bound = bound;
        self
    }

    /// Image of the sub-path init container
    pub fn with_init_image(mut self, image: &'a str) -> Self {
        self.init_image = image;
        self
    }

    /// Node selector of the pod
    pub fn with_node_selector(mut self, selector: BTreeMap<String, String>) -> Self {
        self.node_selector = selector;
        self
    }

    /// Assemble the pod spec and hash it
    pub fn compile(self) -> CompiledPod {
        let mut volumes = claim_volumes(self.bound);
        volumes.extend(self.files.volumes.iter().cloned());

        let spec = PodSpec {
            image_pull_secrets: self
                .files
                .pull_secret
                .iter()
                .map(|s| LocalObjectReference {
                    name: s.metadata.name.clone(),
                })
                .collect(),
            init_containers: init_container(&self.project.sub_paths, self.init_image)
                .into_iter()
                .collect(),
            containers: self.project.containers.clone(),
            volumes,
            node_selector: self.node_selector,
        };

        let secrets: Vec<_> = self.files.secrets().cloned().collect();
        let content_hash = pod_content_hash(&spec, &secrets, &self.files.config_maps);
        debug!(
            containers = spec.containers.len(),
            volumes = spec.volumes.len(),
            content_hash = content_hash.as_deref().unwrap_or(""),
            "compiled pod spec"
        );

        CompiledPod { spec, content_hash }
    }
}
