//! Compose document loading
//!
//! Parses compose YAML into a typed project. Short and long syntax forms are
//! accepted through untagged serde enums and flattened into one shape per
//! field so the normalizer never has to look at raw values. Services are kept
//! sorted by name, which makes every downstream iteration deterministic.

use std::collections::BTreeMap;

use kompox_common::yaml::parse_yaml_mapping;
use serde::Deserialize;
use serde_json::Value;

use crate::error::CompilationError;
use crate::k8s::{ResourceQuantity, ResourceRequirements};

/// Warning recorded when the obsolete top-level `version` key is present
pub const VERSION_OBSOLETE_WARNING: &str = "compose: `version` is obsolete";

// =============================================================================
// Typed project
// =============================================================================

/// A loaded compose project
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ComposeProject {
    /// Services sorted by name
    pub services: Vec<ComposeService>,
    /// Top-level configs by name
    pub configs: BTreeMap<String, FileObject>,
    /// Top-level secrets by name
    pub secrets: BTreeMap<String, FileObject>,
    /// Non-fatal findings while loading
    pub warnings: Vec<String>,
}

/// One compose service
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ComposeService {
    /// Service name, also the container name
    pub name: String,
    /// Container image
    pub image: String,
    /// `entrypoint`, becomes the container command
    pub entrypoint: Vec<String>,
    /// `command`, becomes the container args
    pub command: Vec<String>,
    /// Literal environment; keys declared without a value are dropped
    pub environment: BTreeMap<String, String>,
    /// Env files in declaration order
    pub env_files: Vec<EnvFileRef>,
    /// Port mappings in declaration order
    pub ports: Vec<PortMapping>,
    /// Volume mounts in declaration order
    pub volumes: Vec<VolumeSpec>,
    /// Config references
    pub configs: Vec<FileReference>,
    /// Secret references
    pub secrets: Vec<FileReference>,
    /// Requests/limits from the `x-kompox` extension
    pub resources: Option<ResourceRequirements>,
}

/// Env file reference
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnvFileRef {
    /// Path relative to the base directory
    pub path: String,
    /// A missing optional file contributes nothing
    pub required: bool,
}

/// Port mapping before validation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortMapping {
    /// Published (host) port as written
    pub published: Option<String>,
    /// Container port
    pub target: Option<u16>,
}

/// Volume mount type
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VolumeType {
    /// Host path relative to the compose file
    Bind,
    /// Named volume
    Volume,
    /// Anything else (`tmpfs`, `npipe`, ...)
    Other(String),
}

/// Volume mount before resolution
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VolumeSpec {
    /// Mount type
    pub kind: VolumeType,
    /// Source path or volume reference
    pub source: String,
    /// Mount path in the container
    pub target: String,
}

/// Service reference to a top-level config or secret
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileReference {
    /// Top-level definition name
    pub source: String,
    /// Mount path; the kind's default when unset
    pub target: Option<String>,
    /// File mode
    pub mode: Option<i32>,
}

/// Top-level config or secret definition
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileObject {
    /// Source file relative to the base directory
    pub file: Option<String>,
    /// Inline content
    pub content: Option<String>,
    /// Name of a pre-existing cluster object
    pub name: Option<String>,
    /// Pre-existing object, never generated
    pub external: bool,
}

impl FileObject {
    /// External or name-only definitions refer to objects that must already
    /// exist in the cluster
    pub fn is_passthrough(&self) -> bool {
        self.external || (self.name.is_some() && self.file.is_none() && self.content.is_none())
    }
}

impl ComposeProject {
    /// Load a compose document
    pub fn load(input: &str) -> Result<Self, CompilationError> {
        let map = parse_yaml_mapping(input, "compose")?;
        let mut warnings = Vec::new();
        if map.contains_key("version") {
            tracing::warn!("{}", VERSION_OBSOLETE_WARNING);
            warnings.push(VERSION_OBSOLETE_WARNING.to_string());
        }

        let raw: RawProject = serde_json::from_value(Value::Object(map))
            .map_err(|e| CompilationError::invalid_compose(e.to_string()))?;

        let mut services = Vec::with_capacity(raw.services.len());
        for (name, service) in raw.services {
            services.push(service.unwrap_or_default().into_service(name)?);
        }

        let project = Self {
            services,
            configs: into_file_objects(raw.configs),
            secrets: into_file_objects(raw.secrets),
            warnings,
        };
        tracing::debug!(
            services = project.services.len(),
            configs = project.configs.len(),
            secrets = project.secrets.len(),
            "loaded compose project"
        );
        Ok(project)
    }

    /// Service by name
    pub fn service(&self, name: &str) -> Option<&ComposeService> {
        self.services.iter().find(|s| s.name == name)
    }
}

// =============================================================================
// Raw serde forms
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawProject {
    services: BTreeMap<String, Option<RawService>>,
    configs: BTreeMap<String, Option<RawFileObject>>,
    secrets: BTreeMap<String, Option<RawFileObject>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawService {
    image: Option<String>,
    entrypoint: Option<StringOrList>,
    command: Option<StringOrList>,
    environment: Option<RawEnvironment>,
    env_file: Option<RawEnvFiles>,
    ports: Vec<RawPort>,
    volumes: Vec<RawVolume>,
    configs: Vec<RawFileRef>,
    secrets: Vec<RawFileRef>,
    #[serde(rename = "x-kompox")]
    x_kompox: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StringOrList {
    String(String),
    List(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    String(String),
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Self::String(s) => s,
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawEnvironment {
    Map(BTreeMap<String, Option<Scalar>>),
    List(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawEnvFiles {
    Single(String),
    List(Vec<RawEnvFile>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawEnvFile {
    Path(String),
    Long(LongEnvFile),
}

#[derive(Debug, Deserialize)]
struct LongEnvFile {
    path: String,
    #[serde(default = "default_required")]
    required: bool,
}

fn default_required() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPort {
    Short(String),
    Number(u64),
    Long(LongPort),
}

#[derive(Debug, Deserialize)]
struct LongPort {
    #[serde(default)]
    published: Option<Scalar>,
    #[serde(default)]
    target: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawVolume {
    Short(String),
    Long(LongVolume),
}

#[derive(Debug, Deserialize)]
struct LongVolume {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    target: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawFileRef {
    Short(String),
    Long(LongFileRef),
}

#[derive(Debug, Deserialize)]
struct LongFileRef {
    source: String,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    mode: Option<Scalar>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawFileObject {
    file: Option<String>,
    content: Option<String>,
    name: Option<String>,
    external: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct XKompox {
    resources: Option<RawQuantities>,
    limits: Option<RawQuantities>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawQuantities {
    cpu: Option<Scalar>,
    memory: Option<Scalar>,
}

// =============================================================================
// Conversion
// =============================================================================

impl RawService {
    fn into_service(self, name: String) -> Result<ComposeService, CompilationError> {
        let image = self
            .image
            .filter(|i| !i.trim().is_empty())
            .ok_or_else(|| {
                CompilationError::invalid_compose(format!("service {} has no image", name))
            })?;

        let entrypoint = command_words(&name, "entrypoint", self.entrypoint)?;
        let command = command_words(&name, "command", self.command)?;
        let environment = environment_map(self.environment);

        let env_files = match self.env_file {
            None => Vec::new(),
            Some(RawEnvFiles::Single(path)) => vec![EnvFileRef {
                path,
                required: true,
            }],
            Some(RawEnvFiles::List(entries)) => entries
                .into_iter()
                .map(|e| match e {
                    RawEnvFile::Path(path) => EnvFileRef {
                        path,
                        required: true,
                    },
                    RawEnvFile::Long(l) => EnvFileRef {
                        path: l.path,
                        required: l.required,
                    },
                })
                .collect(),
        };

        let ports = self.ports.into_iter().map(port_mapping).collect();
        let volumes = self.volumes.into_iter().map(volume_spec).collect();
        let configs = file_references(&name, self.configs)?;
        let secrets = file_references(&name, self.secrets)?;
        let resources = self.x_kompox.and_then(|v| resources_from_extension(&name, v));

        Ok(ComposeService {
            name,
            image,
            entrypoint,
            command,
            environment,
            env_files,
            ports,
            volumes,
            configs,
            secrets,
            resources,
        })
    }
}

fn command_words(
    service: &str,
    field: &str,
    value: Option<StringOrList>,
) -> Result<Vec<String>, CompilationError> {
    match value {
        None => Ok(Vec::new()),
        Some(StringOrList::List(list)) => Ok(list),
        Some(StringOrList::String(s)) => split_command(&s).map_err(|e| {
            CompilationError::invalid_compose(format!("service {} {}: {}", service, field, e))
        }),
    }
}

/// Split a shell-style command line into words.
///
/// Supports single quotes, double quotes and backslash escapes; no variable
/// expansion.
pub fn split_command(input: &str) -> Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => current.push(ch),
                        None => return Err("unterminated single quote".to_string()),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(ch @ ('"' | '\\' | '$' | '`')) => current.push(ch),
                            Some(ch) => {
                                current.push('\\');
                                current.push(ch);
                            }
                            None => return Err("unterminated double quote".to_string()),
                        },
                        Some(ch) => current.push(ch),
                        None => return Err("unterminated double quote".to_string()),
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(ch) => current.push(ch),
                    None => return Err("dangling escape".to_string()),
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

fn environment_map(value: Option<RawEnvironment>) -> BTreeMap<String, String> {
    match value {
        None => BTreeMap::new(),
        Some(RawEnvironment::Map(map)) => map
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k, v.into_string())))
            .collect(),
        Some(RawEnvironment::List(list)) => list
            .into_iter()
            .filter_map(|entry| {
                entry
                    .split_once('=')
                    .map(|(k, v)| (k.to_string(), v.to_string()))
            })
            .collect(),
    }
}

fn port_mapping(raw: RawPort) -> PortMapping {
    match raw {
        RawPort::Number(n) => PortMapping {
            published: None,
            target: u16::try_from(n).ok(),
        },
        RawPort::Long(l) => PortMapping {
            published: l.published.map(Scalar::into_string).filter(|p| !p.is_empty()),
            target: l.target.and_then(|t| u16::try_from(t).ok()),
        },
        RawPort::Short(s) => {
            let spec = s.split_once('/').map_or(s.as_str(), |(p, _)| p);
            let parts: Vec<&str> = spec.split(':').collect();
            let (published, target) = match parts.as_slice() {
                [target] => (None, *target),
                [published, target] => (Some(*published), *target),
                [_ip, published, target] => (Some(*published), *target),
                _ => (None, ""),
            };
            PortMapping {
                published: published.filter(|p| !p.is_empty()).map(str::to_string),
                target: target.parse().ok(),
            }
        }
    }
}

fn volume_spec(raw: RawVolume) -> VolumeSpec {
    match raw {
        RawVolume::Long(l) => {
            let kind = match l.kind.as_deref() {
                None | Some("volume") => VolumeType::Volume,
                Some("bind") => VolumeType::Bind,
                Some(other) => VolumeType::Other(other.to_string()),
            };
            VolumeSpec {
                kind,
                source: l.source.unwrap_or_default(),
                target: l.target.unwrap_or_default(),
            }
        }
        RawVolume::Short(s) => {
            let parts: Vec<&str> = s.split(':').collect();
            let (source, target) = match parts.len() {
                1 => (String::new(), parts[0].to_string()),
                2 | 3 => (parts[0].to_string(), parts[1].to_string()),
                n => (parts[..n - 2].join(":"), parts[n - 2].to_string()),
            };
            let kind = if source.starts_with('.') || source.starts_with('/') || source.starts_with('~') {
                VolumeType::Bind
            } else {
                VolumeType::Volume
            };
            VolumeSpec {
                kind,
                source,
                target,
            }
        }
    }
}

fn file_references(
    service: &str,
    refs: Vec<RawFileRef>,
) -> Result<Vec<FileReference>, CompilationError> {
    refs.into_iter()
        .map(|r| match r {
            RawFileRef::Short(source) => Ok(FileReference {
                source,
                target: None,
                mode: None,
            }),
            RawFileRef::Long(l) => {
                let mode = l
                    .mode
                    .map(|m| parse_mode(m).ok_or(()))
                    .transpose()
                    .map_err(|_| {
                        CompilationError::invalid_compose(format!(
                            "service {}: invalid mode for {}",
                            service, l.source
                        ))
                    })?;
                Ok(FileReference {
                    source: l.source,
                    target: l.target.filter(|t| !t.is_empty()),
                    mode,
                })
            }
        })
        .collect()
}

/// Numeric modes are taken as written; string modes are octal (`"0440"`)
fn parse_mode(mode: Scalar) -> Option<i32> {
    match mode {
        Scalar::Int(i) => i32::try_from(i).ok(),
        Scalar::String(s) => i32::from_str_radix(s.trim_start_matches("0o"), 8).ok(),
        Scalar::Bool(_) | Scalar::Float(_) => None,
    }
}

fn into_file_objects(raw: BTreeMap<String, Option<RawFileObject>>) -> BTreeMap<String, FileObject> {
    raw.into_iter()
        .map(|(name, def)| {
            let def = def.unwrap_or_default();
            let external = match def.external {
                Some(Value::Bool(b)) => b,
                Some(Value::Object(_)) => true,
                _ => false,
            };
            let non_empty = |s: Option<String>| s.filter(|s| !s.is_empty());
            (
                name,
                FileObject {
                    file: non_empty(def.file),
                    content: non_empty(def.content),
                    name: non_empty(def.name),
                    external,
                },
            )
        })
        .collect()
}

/// Resource requests/limits from `x-kompox`. Unparseable extensions and
/// invalid quantities are ignored.
fn resources_from_extension(service: &str, value: Value) -> Option<ResourceRequirements> {
    let ext: XKompox = match serde_json::from_value(value) {
        Ok(ext) => ext,
        Err(e) => {
            tracing::debug!(service, error = %e, "ignoring unparseable x-kompox extension");
            return None;
        }
    };
    let quantities = |raw: Option<RawQuantities>| {
        let raw = raw.unwrap_or_default();
        let pick = |q: Option<Scalar>| q.map(Scalar::into_string).filter(|s| is_quantity(s));
        let q = ResourceQuantity {
            cpu: pick(raw.cpu),
            memory: pick(raw.memory),
        };
        (!q.is_empty()).then_some(q)
    };
    let requirements = ResourceRequirements {
        requests: quantities(ext.resources),
        limits: quantities(ext.limits),
    };
    (requirements.requests.is_some() || requirements.limits.is_some()).then_some(requirements)
}

const QUANTITY_SUFFIXES: &[&str] = &[
    "Ki", "Mi", "Gi", "Ti", "Pi", "Ei", "n", "u", "m", "k", "M", "G", "T", "P", "E",
];

/// Loose check for a Kubernetes resource quantity (`500m`, `1.5Gi`, `2`)
pub fn is_quantity(s: &str) -> bool {
    let body = s.strip_prefix(['+', '-']).unwrap_or(s);
    let number_end = body
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(body.len());
    let (number, suffix) = body.split_at(number_end);
    if number.is_empty() || number == "." || number.matches('.').count() > 1 {
        return false;
    }
    if suffix.is_empty() || QUANTITY_SUFFIXES.contains(&suffix) {
        return true;
    }
    // Decimal exponent form: 1e3, 1E-2
    suffix
        .strip_prefix(['e', 'E'])
        .map(|exp| exp.strip_prefix(['+', '-']).unwrap_or(exp))
        .is_some_and(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
}
