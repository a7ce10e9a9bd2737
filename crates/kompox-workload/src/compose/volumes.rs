//! Service volume resolution
//!
//! Every compose volume mount lands on one of the app's logical volumes:
//!
//! ```text
//! ./rel/path:/mnt        -> first app volume, sub-path rel/path
//! data:/mnt              -> volume data, volume root
//! data/sub/path:/mnt     -> volume data, sub-path sub/path
//! /abs/path:/mnt         -> rejected
//! ```
//!
//! Configs and secrets mounted on the same target as a volume win over the
//! volume; two configs/secrets on one target are fatal.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use kompox_common::model::AppVolume;

use crate::compose::project::{VolumeSpec, VolumeType};
use crate::error::CompilationError;

/// A compose volume resolved against the app's logical volumes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedMount {
    /// Logical volume name (also the pod volume name)
    pub volume: String,
    /// Normalized sub-path, `None` for the volume root
    pub sub_path: Option<String>,
    /// Mount path in the container
    pub target: String,
}

/// Resolve one service volume.
///
/// `base_dir` is only used to reject bind sources that are existing files.
pub fn resolve_volume(
    service: &str,
    spec: &VolumeSpec,
    app_volumes: &[AppVolume],
    base_dir: &Path,
) -> Result<ResolvedMount, CompilationError> {
    if spec.source.is_empty() || spec.target.is_empty() {
        return Err(CompilationError::invalid_volume(
            service,
            "volume with empty source/target not supported",
        ));
    }
    if spec.source.contains(':') {
        return Err(CompilationError::invalid_volume(
            service,
            format!("unexpected ':' in volume source: {}", spec.source),
        ));
    }

    let (volume, sub_path) = match &spec.kind {
        VolumeType::Bind => {
            if spec.source.starts_with('/') || spec.source.starts_with('~') {
                return Err(CompilationError::AbsoluteBindVolume {
                    source: spec.source.clone(),
                });
            }
            // Missing paths are fine: the init container creates them
            if let Ok(meta) = std::fs::metadata(base_dir.join(&spec.source)) {
                if !meta.is_dir() {
                    return Err(CompilationError::BindVolumeIsFile {
                        source: spec.source.clone(),
                    });
                }
            }
            let first = app_volumes
                .first()
                .ok_or_else(|| CompilationError::NoAppVolumes {
                    source: spec.source.clone(),
                })?;
            let sub = normalize_sub_path(&spec.source)
                .map_err(|reason| CompilationError::invalid_sub_path(service, &spec.source, reason))?;
            if sub.is_empty() {
                return Err(CompilationError::invalid_sub_path(
                    service,
                    &spec.source,
                    "bind source resolves to the volume root",
                ));
            }
            (first.name.clone(), Some(sub))
        }
        VolumeType::Volume => {
            let (name, rest) = match spec.source.split_once('/') {
                Some((name, rest)) => (name, rest),
                None => (spec.source.as_str(), ""),
            };
            if !app_volumes.iter().any(|v| v.name == name) {
                return Err(CompilationError::UndefinedVolume {
                    name: name.to_string(),
                    reference: spec.source.clone(),
                });
            }
            let sub = if rest.is_empty() {
                None
            } else {
                let sub = normalize_sub_path(rest).map_err(|reason| {
                    CompilationError::invalid_sub_path(service, &spec.source, reason)
                })?;
                if sub.is_empty() {
                    return Err(CompilationError::invalid_sub_path(
                        service,
                        &spec.source,
                        "sub-path is empty after normalization",
                    ));
                }
                Some(sub)
            };
            (name.to_string(), sub)
        }
        VolumeType::Other(kind) => {
            return Err(CompilationError::invalid_volume(
                service,
                format!(
                    "unsupported volume type: {} (source={} target={})",
                    kind, spec.source, spec.target
                ),
            ))
        }
    };

    Ok(ResolvedMount {
        volume,
        sub_path,
        target: spec.target.clone(),
    })
}

/// Collapse empty and `.` segments. `..` anywhere is an error.
pub fn normalize_sub_path(path: &str) -> Result<String, &'static str> {
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err("sub-path must not contain '..'"),
            s => segments.push(s),
        }
    }
    Ok(segments.join("/"))
}

/// Distinct sub-paths per logical volume, sorted for reproducible output
pub type SubPathPlan = BTreeMap<String, BTreeSet<String>>;

// =============================================================================
// Target conflicts
// =============================================================================

/// Source of a mount on a target path
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MountSource {
    /// Compose volume, by source as written
    Volume(String),
    /// Top-level config
    Config(String),
    /// Top-level secret
    Secret(String),
}

impl MountSource {
    fn is_volume(&self) -> bool {
        matches!(self, Self::Volume(_))
    }
}

impl std::fmt::Display for MountSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Volume(s) => write!(f, "volume:{}", s),
            Self::Config(s) => write!(f, "config:{}", s),
            Self::Secret(s) => write!(f, "secret:{}", s),
        }
    }
}

/// Outcome of checking one service's mount targets
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TargetCheck {
    /// Warnings for volumes shadowed by configs/secrets
    pub warnings: Vec<String>,
    /// Targets whose volume mounts must be dropped
    pub shadowed_targets: BTreeSet<String>,
}

/// Check every `(source, target)` of one service.
///
/// Targets are visited in sorted order so messages are reproducible.
pub fn check_target_conflicts(
    service: &str,
    mappings: &[(MountSource, String)],
) -> Result<TargetCheck, CompilationError> {
    let mut by_target: BTreeMap<&str, Vec<&MountSource>> = BTreeMap::new();
    for (source, target) in mappings {
        by_target.entry(target.as_str()).or_default().push(source);
    }

    let mut errors = Vec::new();
    let mut check = TargetCheck::default();
    for (target, sources) in by_target {
        if sources.len() < 2 {
            continue;
        }
        let (volumes, files): (Vec<&MountSource>, Vec<&MountSource>) =
            sources.into_iter().partition(|s| s.is_volume());

        if files.len() > 1 {
            let names: Vec<String> = files.iter().map(|s| s.to_string()).collect();
            errors.push(format!(
                "service {}: target path {:?} has duplicate configs/secrets: [{}]",
                service,
                target,
                names.join(" ")
            ));
        }
        if let Some(winner) = files.first() {
            for volume in &volumes {
                check.warnings.push(format!(
                    "service {}: target path {:?} conflicts between {} and {}; ignoring volume (use configs/secrets for single files)",
                    service, target, winner, volume
                ));
            }
            if !volumes.is_empty() {
                check.shadowed_targets.insert(target.to_string());
            }
        }
    }

    if errors.is_empty() {
        Ok(check)
    } else {
        Err(CompilationError::TargetConflict {
            service: service.to_string(),
            conflicts: errors,
        })
    }
}
