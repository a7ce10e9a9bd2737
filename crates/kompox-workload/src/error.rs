//! Compilation error types
//!
//! Every fatal condition found while normalizing a compose document or
//! synthesizing storage objects. Each variant carries the service, volume,
//! rule or file it concerns so the message is actionable on its own.

use std::fmt;

/// Errors that abort a conversion
#[derive(Debug)]
pub enum CompilationError {
    /// Compose document could not be parsed or has the wrong shape
    InvalidCompose {
        /// Description of what's wrong
        message: String,
    },

    /// Port mapping is not a literal `host:container` pair
    PortFormat {
        /// Service declaring the port
        service: String,
    },

    /// Host port is not a positive integer
    HostPortInvalid {
        /// Published value as written
        published: String,
    },

    /// Container port claimed by two services
    ContainerPortConflict {
        /// Container port
        port: u16,
        /// Service that claimed it first
        first: String,
        /// Service that claimed it second
        second: String,
    },

    /// Host port mapped to two container ports
    HostPortConflict {
        /// Host port
        port: u16,
        /// First container port
        first: u16,
        /// Second container port
        second: u16,
    },

    /// Bind volume with an absolute source path
    AbsoluteBindVolume {
        /// Source as written
        source: String,
    },

    /// Bind volume whose source is an existing regular file
    BindVolumeIsFile {
        /// Source as written
        source: String,
    },

    /// Relative bind volume in an app without volumes
    NoAppVolumes {
        /// Source as written
        source: String,
    },

    /// Named volume not declared by the app
    UndefinedVolume {
        /// Volume name
        name: String,
        /// Full source reference
        reference: String,
    },

    /// Sub-path normalizes to nothing or escapes the volume
    InvalidSubPath {
        /// Service declaring the mount
        service: String,
        /// Source as written
        source: String,
        /// Why it was rejected
        reason: String,
    },

    /// Volume entry that cannot be mounted at all
    InvalidVolumeSpec {
        /// Service declaring the mount
        service: String,
        /// Description of what's wrong
        message: String,
    },

    /// Two configs/secrets mounted on one target path
    TargetConflict {
        /// Service declaring the mounts
        service: String,
        /// One entry per conflicting target
        conflicts: Vec<String>,
    },

    /// Service references a config/secret missing from the top level
    UndefinedConfig {
        /// `config` or `secret`
        kind: &'static str,
        /// Service declaring the reference
        service: String,
        /// Referenced name
        name: String,
    },

    /// Top-level config/secret source could not be used
    ConfigSource {
        /// `config` or `secret`
        kind: &'static str,
        /// Definition name
        name: String,
        /// Description of what's wrong
        message: String,
    },

    /// Env file could not be read or parsed
    EnvFile {
        /// Service declaring the file
        service: String,
        /// Path as written
        path: String,
        /// Description of what's wrong
        message: String,
    },

    /// Merged env-file data is not acceptable as Secret data
    SecretData {
        /// Service declaring the env files
        service: String,
        /// Description of what's wrong
        message: String,
    },

    /// Compose service name collides with generated Service names
    ReservedServiceName {
        /// Compose service name
        service: String,
    },

    /// Ingress rule name is not a short DNS label starting with a letter
    InvalidIngressName {
        /// Rule name
        name: String,
    },

    /// Two ingress rules on the same port
    DuplicateIngressPort {
        /// Port
        port: u16,
    },

    /// Ingress rule on a port compose does not publish
    UndefinedIngressPort {
        /// Port
        port: u16,
    },

    /// Container port reached by two rules with different names
    IngressPortNameConflict {
        /// Container port
        container_port: u16,
        /// First rule name
        first: String,
        /// Second rule name
        second: String,
    },

    /// Hostname listed by two ingress rules
    DuplicateIngressHost {
        /// Hostname
        host: String,
        /// First rule name
        first: String,
        /// Second rule name
        second: String,
    },

    /// Custom hostname inside the cluster's generated domain
    IngressHostUnderClusterDomain {
        /// Hostname
        host: String,
        /// Cluster ingress domain
        domain: String,
    },

    /// Generated default hostname collides with another host
    IngressHostCollision {
        /// Hostname
        host: String,
        /// Description of the collision
        message: String,
    },

    /// Binding count differs from declared volume count
    VolumeBindingCount {
        /// Bindings supplied
        bindings: usize,
        /// Volumes declared
        volumes: usize,
    },

    /// Binding out of declaration order
    VolumeBindingOrder {
        /// Position in the binding list
        index: usize,
        /// Volume the binding names
        found: String,
        /// Volume declared at that position
        expected: String,
    },

    /// Binding names a volume the app does not declare
    UndefinedBindingVolume {
        /// Volume name
        name: String,
    },

    /// Binding without a disk handle
    MissingDiskHandle {
        /// Volume name
        volume: String,
    },

    /// Volume class without a CSI driver
    MissingCsiDriver {
        /// Volume name
        volume: String,
    },

    /// Registry credentials document is unusable
    InvalidDockerConfig {
        /// Description of what's wrong
        message: String,
    },

    /// Name validation or source file error from the common layer
    Common(kompox_common::Error),
}

impl fmt::Display for CompilationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCompose { message } => write!(f, "compose project failed: {}", message),
            Self::PortFormat { service } => write!(
                f,
                "ports must be 'host:container' style numeric; service {}",
                service
            ),
            Self::HostPortInvalid { published } => {
                write!(f, "invalid host port {:?}", published)
            }
            Self::ContainerPortConflict {
                port,
                first,
                second,
            } => write!(
                f,
                "containerPort {} used by multiple services ({},{})",
                port, first, second
            ),
            Self::HostPortConflict {
                port,
                first,
                second,
            } => write!(
                f,
                "hostPort {} mapped to multiple container ports ({},{})",
                port, first, second
            ),
            Self::AbsoluteBindVolume { source } => {
                write!(f, "absolute bind volume not supported: {}", source)
            }
            Self::BindVolumeIsFile { source } => write!(
                f,
                "bind volume source must be a directory, not a single file: {} (use configs/secrets for single-file mounts)",
                source
            ),
            Self::NoAppVolumes { source } => write!(
                f,
                "relative bind volume '{}' requires at least one app volume (default) defined",
                source
            ),
            Self::UndefinedVolume { name, reference } => write!(
                f,
                "named volume '{}' referenced by '{}' is not defined in app volumes",
                name, reference
            ),
            Self::InvalidSubPath {
                service,
                source,
                reason,
            } => write!(
                f,
                "service {}: invalid volume sub-path in '{}': {}",
                service, source, reason
            ),
            Self::InvalidVolumeSpec { service, message } => {
                write!(f, "service {}: {}", service, message)
            }
            Self::TargetConflict { service, conflicts } => write!(
                f,
                "target conflicts in service {}: {}",
                service,
                conflicts.join("; ")
            ),
            Self::UndefinedConfig {
                kind,
                service,
                name,
            } => write!(
                f,
                "service {}: {} {:?} not defined in top-level {}s",
                service, kind, name, kind
            ),
            Self::ConfigSource {
                kind,
                name,
                message,
            } => write!(f, "resolve {} {:?}: {}", kind, name, message),
            Self::EnvFile {
                service,
                path,
                message,
            } => write!(
                f,
                "env_file for service {}: {}: {}",
                service, path, message
            ),
            Self::SecretData { service, message } => {
                write!(f, "env_file for service {}: {}", service, message)
            }
            Self::ReservedServiceName { service } => write!(
                f,
                "compose service name '{}' conflicts with reserved ingress service name prefixes",
                service
            ),
            Self::InvalidIngressName { name } => write!(f, "invalid ingress name: {}", name),
            Self::DuplicateIngressPort { port } => write!(f, "duplicate ingress port {}", port),
            Self::UndefinedIngressPort { port } => {
                write!(f, "ingress port {} not defined in compose ports", port)
            }
            Self::IngressPortNameConflict {
                container_port,
                first,
                second,
            } => write!(
                f,
                "containerPort {} referenced by multiple ingress entries with different names ({},{})",
                container_port, first, second
            ),
            Self::DuplicateIngressHost {
                host,
                first,
                second,
            } => write!(
                f,
                "host {} duplicated across ingress entries ({},{})",
                host, first, second
            ),
            Self::IngressHostUnderClusterDomain { host, domain } => write!(
                f,
                "ingress host {} must not be under cluster ingress domain {}",
                host, domain
            ),
            Self::IngressHostCollision { host, message } => {
                write!(f, "generated default host {} {}", host, message)
            }
            Self::VolumeBindingCount { bindings, volumes } => write!(
                f,
                "volume bindings count {} does not match app volumes {}",
                bindings, volumes
            ),
            Self::VolumeBindingOrder {
                index,
                found,
                expected,
            } => write!(
                f,
                "volume binding at index {} is for {}; expected {}",
                index, found, expected
            ),
            Self::UndefinedBindingVolume { name } => {
                write!(f, "volume {} is not defined in app", name)
            }
            Self::MissingDiskHandle { volume } => {
                write!(f, "volume {} has no handle in binding input", volume)
            }
            Self::MissingCsiDriver { volume } => write!(f, "no CSIDriver for volume {}", volume),
            Self::InvalidDockerConfig { message } => {
                write!(f, "invalid docker config: {}", message)
            }
            Self::Common(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CompilationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Common(e) => Some(e),
            _ => None,
        }
    }
}

impl From<kompox_common::Error> for CompilationError {
    fn from(e: kompox_common::Error) -> Self {
        Self::Common(e)
    }
}

impl CompilationError {
    /// Create an invalid compose error
    pub fn invalid_compose(message: impl Into<String>) -> Self {
        Self::InvalidCompose {
            message: message.into(),
        }
    }

    /// Create an invalid volume spec error
    pub fn invalid_volume(service: &str, message: impl Into<String>) -> Self {
        Self::InvalidVolumeSpec {
            service: service.to_string(),
            message: message.into(),
        }
    }

    /// Create an invalid sub-path error
    pub fn invalid_sub_path(service: &str, source: &str, reason: &str) -> Self {
        Self::InvalidSubPath {
            service: service.to_string(),
            source: source.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a config/secret source error
    pub fn config_source(kind: &'static str, name: &str, message: impl Into<String>) -> Self {
        Self::ConfigSource {
            kind,
            name: name.to_string(),
            message: message.into(),
        }
    }

    /// Create an env file error
    pub fn env_file(service: &str, path: &str, message: impl Into<String>) -> Self {
        Self::EnvFile {
            service: service.to_string(),
            path: path.to_string(),
            message: message.into(),
        }
    }

    /// Create an invalid docker config error
    pub fn invalid_docker_config(message: impl Into<String>) -> Self {
        Self::InvalidDockerConfig {
            message: message.into(),
        }
    }
}
