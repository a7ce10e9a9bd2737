//! Secret and ConfigMap materialization
//!
//! Builds the objects the pod reads its configuration from:
//! - one Opaque Secret per service with env files (`<res>-<svc>-base`)
//! - one ConfigMap per top-level config, one Secret per top-level secret
//! - the optional registry credentials Secret (`<res>--pull`)
//!
//! Each object is annotated with the digest of its own data so the pod
//! content hash can be computed from names and annotations alone.

use std::collections::BTreeMap;

use kompox_common::kube_utils::ObjectMeta;
use kompox_common::naming::{
    config_map_name, config_map_volume_name, config_secret_name, config_secret_volume_name,
    env_base_secret_name, pull_secret_name,
};
use kompox_common::{ANNOTATION_CONTENT_HASH, ANNOTATION_SECRET_HASH};
use tracing::debug;

use crate::compose::{FileMount, NormalizedProject};
use crate::content_hash::content_digest;
use crate::error::CompilationError;
use crate::k8s::{ConfigMap, KeyToPath, Secret, Volume, SECRET_TYPE_DOCKER_CONFIG_JSON};

/// Data key of a registry credentials Secret
pub const DOCKER_CONFIG_KEY: &str = ".dockerconfigjson";

/// Where generated objects live and how they are labelled
#[derive(Clone, Copy, Debug)]
pub struct ObjectScope<'a> {
    /// App name
    pub app: &'a str,
    /// Component name
    pub component: &'a str,
    /// Target namespace
    pub namespace: &'a str,
    /// Labels applied to every object
    pub labels: &'a BTreeMap<String, String>,
}

impl ObjectScope<'_> {
    fn metadata(&self, name: String) -> ObjectMeta {
        ObjectMeta::new(name, self.namespace).with_labels(self.labels)
    }
}

/// Secrets, ConfigMaps and pod volumes of one app component
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompiledFiles {
    /// Registry credentials, when a docker config was supplied
    pub pull_secret: Option<Secret>,
    /// One per materialized top-level config
    pub config_maps: Vec<ConfigMap>,
    /// One per materialized top-level secret
    pub config_secrets: Vec<Secret>,
    /// One per service with env files
    pub env_secrets: Vec<Secret>,
    /// ConfigMap volumes then Secret volumes
    pub volumes: Vec<Volume>,
}

impl CompiledFiles {
    /// All Secrets, pull secret first
    pub fn secrets(&self) -> impl Iterator<Item = &Secret> {
        self.pull_secret
            .iter()
            .chain(&self.config_secrets)
            .chain(&self.env_secrets)
    }
}

/// Materialize the configuration objects of a normalized project
pub fn compile(
    scope: &ObjectScope<'_>,
    project: &NormalizedProject,
    docker_config: Option<&str>,
) -> Result<CompiledFiles, CompilationError> {
    let pull_secret = docker_config
        .map(|content| build_pull_secret(scope, content))
        .transpose()?;

    let config_maps = project
        .config_files
        .iter()
        .map(|file| {
            let data = BTreeMap::from([(file.key.clone(), file.text.clone())]);
            let name = config_map_name(scope.app, scope.component, &file.name);
            let mut cm = ConfigMap::new("", scope.namespace);
            cm.metadata = scope
                .metadata(name)
                .with_annotation(ANNOTATION_CONTENT_HASH, content_digest(&data));
            cm.data = data;
            cm
        })
        .collect();

    let config_secrets = project
        .secret_files
        .iter()
        .map(|file| {
            let name = config_secret_name(scope.app, scope.component, &file.name);
            let digest = content_digest([(file.key.as_str(), file.content.as_slice())]);
            let mut secret = Secret::new("", scope.namespace).with_data(&file.key, &file.content);
            secret.metadata = scope
                .metadata(name)
                .with_annotation(ANNOTATION_CONTENT_HASH, digest);
            secret
        })
        .collect();

    let env_secrets = project
        .env_sources
        .iter()
        .map(|source| {
            let name = env_base_secret_name(scope.app, scope.component, &source.service);
            let digest = content_digest(&source.data);
            let mut secret = source
                .data
                .iter()
                .fold(Secret::new("", scope.namespace), |secret, (k, v)| secret.with_data(k, v));
            secret.metadata = scope
                .metadata(name)
                .with_annotation(ANNOTATION_CONTENT_HASH, digest.clone())
                .with_annotation(ANNOTATION_SECRET_HASH, digest);
            secret
        })
        .collect();

    let volumes = file_volumes(&project.config_mounts, &project.secret_mounts);

    let compiled = CompiledFiles {
        pull_secret,
        config_maps,
        config_secrets,
        env_secrets,
        volumes,
    };
    debug!(
        app = %scope.app,
        config_maps = compiled.config_maps.len(),
        secrets = compiled.secrets().count(),
        "materialized configuration objects"
    );
    Ok(compiled)
}

/// Pod volumes for config/secret mounts, ConfigMaps first, each sorted by
/// definition name
pub fn file_volumes(
    config_mounts: &BTreeMap<String, FileMount>,
    secret_mounts: &BTreeMap<String, FileMount>,
) -> Vec<Volume> {
    let item = |mount: &FileMount| KeyToPath {
        key: mount.key.clone(),
        path: mount.key.clone(),
        mode: mount.mode,
    };
    config_mounts
        .iter()
        .map(|(name, mount)| {
            Volume::from_config_map(config_map_volume_name(name), &mount.object_name, item(mount))
        })
        .chain(secret_mounts.iter().map(|(name, mount)| {
            Volume::from_secret(config_secret_volume_name(name), &mount.object_name, item(mount))
        }))
        .collect()
}

/// Check a registry credentials document before it is stored
pub fn validate_docker_config(content: &str) -> Result<(), CompilationError> {
    if content.trim().is_empty() {
        return Err(CompilationError::invalid_docker_config(
            "empty docker config content",
        ));
    }
    let value: serde_json::Value = serde_json::from_str(content)
        .map_err(|e| CompilationError::invalid_docker_config(format!("invalid json: {}", e)))?;
    match value.as_object() {
        Some(object) if !object.is_empty() => Ok(()),
        Some(_) => Err(CompilationError::invalid_docker_config(
            "docker config json object is empty",
        )),
        None => Err(CompilationError::invalid_docker_config(
            "docker config must be a json object",
        )),
    }
}

/// Registry credentials Secret stored verbatim under `.dockerconfigjson`
pub fn build_pull_secret(scope: &ObjectScope<'_>, content: &str) -> Result<Secret, CompilationError> {
    validate_docker_config(content)?;
    let name = pull_secret_name(scope.app, scope.component);
    let digest = content_digest([(DOCKER_CONFIG_KEY, content)]);
    let mut secret = Secret::new("", scope.namespace)
        .with_type(SECRET_TYPE_DOCKER_CONFIG_JSON)
        .with_data(DOCKER_CONFIG_KEY, content);
    secret.metadata = scope
        .metadata(name)
        .with_annotation(ANNOTATION_CONTENT_HASH, digest);
    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::{ConfigFile, EnvSource, SecretFile};
    use crate::k8s::SECRET_TYPE_OPAQUE;
    use kompox_common::LABEL_NAME;

    fn labels() -> BTreeMap<String, String> {
        BTreeMap::from([(LABEL_NAME.to_string(), "shop".to_string())])
    }

    fn project() -> NormalizedProject {
        let mut project = NormalizedProject {
            env_sources: vec![EnvSource {
                service: "web".into(),
                data: BTreeMap::from([("A".to_string(), "1".to_string())]),
            }],
            config_files: vec![ConfigFile {
                name: "nginx".into(),
                key: "nginx.conf".into(),
                text: "server {}".into(),
            }],
            secret_files: vec![SecretFile {
                name: "token".into(),
                key: "token".into(),
                content: vec![0, 1, 2],
            }],
            ..Default::default()
        };
        project.config_mounts.insert(
            "nginx".into(),
            FileMount {
                object_name: "shop-app--cfg-nginx".into(),
                key: "nginx.conf".into(),
                mode: None,
            },
        );
        project.secret_mounts.insert(
            "token".into(),
            FileMount {
                object_name: "shop-app--sec-token".into(),
                key: "token".into(),
                mode: Some(0o400),
            },
        );
        project
    }

    // =========================================================================
    // Story: Every object carries its own digest
    // =========================================================================

    #[test]
    fn story_objects_are_named_labelled_and_hashed() {
        let labels = labels();
        let scope = ObjectScope {
            app: "shop",
            component: "app",
            namespace: "ns",
            labels: &labels,
        };
        let compiled = compile(&scope, &project(), None).unwrap();

        let env = &compiled.env_secrets[0];
        assert_eq!(env.metadata.name, "shop-app-web-base");
        assert_eq!(env.metadata.namespace.as_deref(), Some("ns"));
        assert_eq!(env.metadata.labels[LABEL_NAME], "shop");
        assert_eq!(env.type_.as_deref(), Some(SECRET_TYPE_OPAQUE));
        assert_eq!(env.decoded("A"), Some(b"1".to_vec()));
        let digest = content_digest([("A", "1")]);
        assert_eq!(env.content_hash(), Some(digest.as_str()));
        assert_eq!(env.metadata.annotation(ANNOTATION_SECRET_HASH), Some(digest.as_str()));

        let cm = &compiled.config_maps[0];
        assert_eq!(cm.metadata.name, "shop-app--cfg-nginx");
        assert_eq!(cm.data["nginx.conf"], "server {}");
        assert_eq!(
            cm.content_hash(),
            Some(content_digest([("nginx.conf", "server {}")]).as_str())
        );

        let sec = &compiled.config_secrets[0];
        assert_eq!(sec.metadata.name, "shop-app--sec-token");
        assert_eq!(sec.decoded("token"), Some(vec![0, 1, 2]));
        assert!(compiled.pull_secret.is_none());
    }

    #[test]
    fn story_file_volumes_project_one_key() {
        let compiled = compile(
            &ObjectScope {
                app: "shop",
                component: "app",
                namespace: "ns",
                labels: &labels(),
            },
            &project(),
            None,
        )
        .unwrap();
        assert_eq!(compiled.volumes.len(), 2);
        let cfg = &compiled.volumes[0];
        assert_eq!(cfg.name, "cfg-nginx");
        let source = cfg.config_map.as_ref().unwrap();
        assert_eq!(source.name, "shop-app--cfg-nginx");
        assert_eq!(source.items[0].path, "nginx.conf");
        let sec = &compiled.volumes[1];
        assert_eq!(sec.name, "sec-token");
        assert_eq!(sec.secret.as_ref().unwrap().items[0].mode, Some(0o400));
    }

    // =========================================================================
    // Story: Registry credentials become a dockerconfigjson Secret
    // =========================================================================

    #[test]
    fn story_pull_secret() {
        let labels = labels();
        let scope = ObjectScope {
            app: "shop",
            component: "app",
            namespace: "ns",
            labels: &labels,
        };
        let doc = r#"{"auths":{"ghcr.io":{"auth":"dXNlcjpwYXNz"}}}"#;
        let compiled = compile(&scope, &project(), Some(doc)).unwrap();
        let pull = compiled.pull_secret.as_ref().unwrap();
        assert_eq!(pull.metadata.name, "shop-app--pull");
        assert_eq!(pull.type_.as_deref(), Some(SECRET_TYPE_DOCKER_CONFIG_JSON));
        assert_eq!(pull.decoded(DOCKER_CONFIG_KEY), Some(doc.as_bytes().to_vec()));
        assert_eq!(
            pull.content_hash(),
            Some(content_digest([(DOCKER_CONFIG_KEY, doc)]).as_str())
        );
        assert_eq!(compiled.secrets().next().unwrap().metadata.name, "shop-app--pull");
    }

    #[test]
    fn story_invalid_docker_configs() {
        let msg = |doc: &str| validate_docker_config(doc).unwrap_err().to_string();
        assert_eq!(msg(""), "invalid docker config: empty docker config content");
        assert!(msg("{not json").starts_with("invalid docker config: invalid json:"));
        assert_eq!(msg("{}"), "invalid docker config: docker config json object is empty");
        assert!(validate_docker_config("[]").is_err());
    }
}
