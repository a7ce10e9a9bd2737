//! Compose normalization
//!
//! Turns a loaded [`ComposeProject`] into one container per service plus
//! everything the later phases need: the port table, sub-paths to create,
//! env-file data, config/secret payloads and their pod mounts. Nothing here
//! knows about volume bindings or the cluster; the result only refers to
//! logical volume names.

pub mod env_file;
pub mod files;
pub mod ports;
pub mod project;
pub mod volumes;

use std::collections::BTreeMap;
use std::path::Path;

use kompox_common::model::AppVolume;
use kompox_common::naming::{
    config_map_name, config_map_volume_name, config_secret_name, config_secret_volume_name,
    env_base_secret_name, env_override_secret_name, validate_config_secret_name,
    validate_volume_name,
};
use tracing::{debug, warn};

use crate::error::CompilationError;
use crate::k8s::{Container, EnvFromSource, EnvVar, VolumeMount};

pub use env_file::{merge_env_files, EnvMap, MergedEnv};
pub use files::{FileKind, FileSource};
pub use ports::PortTable;
pub use project::{ComposeProject, ComposeService, FileObject, FileReference};
pub use volumes::{MountSource, ResolvedMount, SubPathPlan};

/// Default mount directory of compose secrets
pub const SECRETS_MOUNT_DIR: &str = "/run/secrets";

/// What the normalizer needs to know about the app
#[derive(Clone, Copy, Debug)]
pub struct NormalizeInput<'a> {
    /// App name
    pub app: &'a str,
    /// Component name (`app`)
    pub component: &'a str,
    /// Directory env/config/secret files are resolved against
    pub base_dir: &'a Path,
    /// Logical volumes in declaration order
    pub volumes: &'a [AppVolume],
}

/// Env-file data of one service
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnvSource {
    /// Compose service name
    pub service: String,
    /// Merged key/value data
    pub data: EnvMap,
}

/// Payload of one top-level config
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigFile {
    /// Definition name
    pub name: String,
    /// Data key
    pub key: String,
    /// UTF-8 content
    pub text: String,
}

/// Payload of one top-level secret
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecretFile {
    /// Definition name
    pub name: String,
    /// Data key
    pub key: String,
    /// Raw content
    pub content: Vec<u8>,
}

/// Pod volume projecting one config/secret key
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileMount {
    /// ConfigMap or Secret name
    pub object_name: String,
    /// Data key
    pub key: String,
    /// File mode of the first service reference
    pub mode: Option<i32>,
}

/// Normalized compose project
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NormalizedProject {
    /// One container per service, in service order
    pub containers: Vec<Container>,
    /// Published ports
    pub ports: PortTable,
    /// Sub-paths to create per logical volume
    pub sub_paths: SubPathPlan,
    /// Env-file data of services that declare env files
    pub env_sources: Vec<EnvSource>,
    /// ConfigMap payloads, by definition name
    pub config_files: Vec<ConfigFile>,
    /// Secret payloads, by definition name
    pub secret_files: Vec<SecretFile>,
    /// ConfigMap pod volumes by definition name
    pub config_mounts: BTreeMap<String, FileMount>,
    /// Secret pod volumes by definition name
    pub secret_mounts: BTreeMap<String, FileMount>,
    /// Non-fatal findings
    pub warnings: Vec<String>,
}

impl NormalizedProject {
    /// Compose service names in container order
    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.containers.iter().map(|c| c.name.as_str())
    }
}

/// Validate and resolve a compose project for one app
pub fn normalize(
    project: &ComposeProject,
    input: &NormalizeInput<'_>,
) -> Result<NormalizedProject, CompilationError> {
    for volume in input.volumes {
        validate_volume_name(&volume.name)?;
    }

    let mut out = NormalizedProject {
        warnings: project.warnings.clone(),
        ..Default::default()
    };

    for service in &project.services {
        if service.env_files.is_empty() {
            continue;
        }
        let merged = merge_env_files(input.base_dir, &service.name, &service.env_files)?;
        for key in merged.overrides.keys() {
            let message = format!(
                "service {}: env key {} overridden by a later env_file",
                service.name, key
            );
            warn!(service = %service.name, key = %key, "env_file key overridden");
            out.warnings.push(message);
        }
        out.env_sources.push(EnvSource {
            service: service.name.clone(),
            data: merged.data,
        });
    }

    for (name, def) in &project.configs {
        validate_config_secret_name(name)?;
        let Some(source) = resolve(input.base_dir, name, def, FileKind::Config)? else {
            continue;
        };
        let text = String::from_utf8(source.content)
            .map_err(|e| CompilationError::config_source("config", name, e.to_string()))?;
        out.config_files.push(ConfigFile {
            name: name.clone(),
            key: source.key,
            text,
        });
    }

    for (name, def) in &project.secrets {
        validate_config_secret_name(name)?;
        let Some(source) = resolve(input.base_dir, name, def, FileKind::Secret)? else {
            continue;
        };
        out.secret_files.push(SecretFile {
            name: name.clone(),
            key: source.key,
            content: source.content,
        });
    }

    for service in &project.services {
        let container = build_container(project, service, input, &mut out)?;
        debug!(
            service = %service.name,
            mounts = container.volume_mounts.len(),
            ports = container.ports.len(),
            "normalized compose service"
        );
        out.containers.push(container);
    }

    Ok(out)
}

fn resolve(
    base_dir: &Path,
    name: &str,
    def: &FileObject,
    kind: FileKind,
) -> Result<Option<FileSource>, CompilationError> {
    files::resolve_file_object(base_dir, name, def, kind)
        .map_err(|message| CompilationError::config_source(kind.as_str(), name, message))
}

fn build_container(
    project: &ComposeProject,
    service: &ComposeService,
    input: &NormalizeInput<'_>,
    out: &mut NormalizedProject,
) -> Result<Container, CompilationError> {
    let name = service.name.as_str();
    let mut container = Container {
        name: name.to_string(),
        image: service.image.clone(),
        command: (!service.entrypoint.is_empty()).then(|| service.entrypoint.clone()),
        args: (!service.command.is_empty()).then(|| service.command.clone()),
        env: service
            .environment
            .iter()
            .map(|(k, v)| EnvVar::literal(k, v))
            .collect(),
        env_from: vec![
            EnvFromSource::optional_secret(env_base_secret_name(input.app, input.component, name)),
            EnvFromSource::optional_secret(env_override_secret_name(input.app, input.component, name)),
        ],
        resources: service.resources.clone(),
        ..Default::default()
    };

    for mapping in &service.ports {
        let port = out.ports.register(name, mapping)?;
        ports::push_container_port(&mut container.ports, port);
    }

    let mut targets: Vec<(MountSource, String)> = Vec::new();

    let mut resolved = Vec::with_capacity(service.volumes.len());
    for spec in &service.volumes {
        let mount = volumes::resolve_volume(name, spec, input.volumes, input.base_dir)?;
        targets.push((MountSource::Volume(spec.source.clone()), mount.target.clone()));
        resolved.push(mount);
    }

    let mut file_mounts = Vec::new();
    for (kind, refs) in [(FileKind::Config, &service.configs), (FileKind::Secret, &service.secrets)] {
        for reference in refs {
            if let Some((source, mount)) = file_mount(project, name, kind, reference, input, out)? {
                targets.push((source, mount.mount_path.clone()));
                file_mounts.push(mount);
            }
        }
    }

    let check = volumes::check_target_conflicts(name, &targets)?;
    for warning in check.warnings {
        warn!(service = %name, "{}", warning);
        out.warnings.push(warning);
    }

    for mount in resolved {
        if check.shadowed_targets.contains(&mount.target) {
            continue;
        }
        if let Some(sub) = &mount.sub_path {
            out.sub_paths
                .entry(mount.volume.clone())
                .or_default()
                .insert(sub.clone());
        }
        container
            .volume_mounts
            .push(VolumeMount::new(mount.volume, mount.target, mount.sub_path));
    }
    container.volume_mounts.extend(file_mounts);

    Ok(container)
}

/// Mount of one config/secret reference, `None` for pre-existing objects
fn file_mount(
    project: &ComposeProject,
    service: &str,
    kind: FileKind,
    reference: &FileReference,
    input: &NormalizeInput<'_>,
    out: &mut NormalizedProject,
) -> Result<Option<(MountSource, VolumeMount)>, CompilationError> {
    let definitions = match kind {
        FileKind::Config => &project.configs,
        FileKind::Secret => &project.secrets,
    };
    let def = definitions
        .get(&reference.source)
        .ok_or_else(|| CompilationError::UndefinedConfig {
            kind: kind.as_str(),
            service: service.to_string(),
            name: reference.source.clone(),
        })?;
    if def.is_passthrough() {
        return Ok(None);
    }

    let key = files::source_key(&reference.source, def);
    let (source, target, volume_name, object_name, mounts) = match kind {
        FileKind::Config => (
            MountSource::Config(reference.source.clone()),
            reference
                .target
                .clone()
                .unwrap_or_else(|| format!("/{}", reference.source)),
            config_map_volume_name(&reference.source),
            config_map_name(input.app, input.component, &reference.source),
            &mut out.config_mounts,
        ),
        FileKind::Secret => (
            MountSource::Secret(reference.source.clone()),
            reference
                .target
                .clone()
                .unwrap_or_else(|| format!("{}/{}", SECRETS_MOUNT_DIR, reference.source)),
            config_secret_volume_name(&reference.source),
            config_secret_name(input.app, input.component, &reference.source),
            &mut out.secret_mounts,
        ),
    };

    mounts
        .entry(reference.source.clone())
        .or_insert_with(|| FileMount {
            object_name,
            key: key.clone(),
            mode: reference.mode,
        });

    Ok(Some((source, VolumeMount::readonly_file(volume_name, target, key))))
}
