//! Content digests and pod content hash propagation
//!
//! Every generated Secret/ConfigMap carries a digest of its data. The pod
//! template carries a digest of the digests it references, in a fixed order:
//! image-pull secrets, then `envFrom` of containers sorted by name, then
//! volumes. A change in any referenced object changes the pod hash and rolls
//! the pods, even though the Deployment itself did not change.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment as LiveDeployment;
use k8s_openapi::api::core::v1::{
    ConfigMap as LiveConfigMap, LocalObjectReference as LiveObjectReference,
    PodSpec as LivePodSpec, Secret as LiveSecret,
};
use kompox_common::naming::short_hash_bytes;
use kompox_common::ANNOTATION_CONTENT_HASH;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::k8s::{ConfigMap, PodSpec, Secret};

/// Length of content digests and the pod content hash
pub const CONTENT_HASH_LENGTH: usize = 6;

/// Suffix of the registry credentials Secret relative to the Deployment name
pub const PULL_SECRET_SUFFIX: &str = "--pull";

/// Digest of a key/value map, independent of iteration order.
///
/// Entries are sorted by key and hashed as `key=value\0` records, so an
/// empty map and a missing map digest the same.
pub fn content_digest<I, K, V>(entries: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<[u8]>,
{
    let mut entries: Vec<(K, V)> = entries.into_iter().collect();
    entries.sort_by(|a, b| a.0.as_ref().cmp(b.0.as_ref()));

    let mut buf = Vec::new();
    for (key, value) in &entries {
        buf.extend_from_slice(key.as_ref().as_bytes());
        buf.push(b'=');
        buf.extend_from_slice(value.as_ref());
        buf.push(0);
    }
    short_hash_bytes(&buf, CONTENT_HASH_LENGTH)
}

// =============================================================================
// Content hash index
// =============================================================================

/// Object that may carry a content digest annotation
pub trait ContentHashed {
    /// Object name and its stored digest, if both are present
    fn hash_entry(&self) -> Option<(&str, &str)>;
}

impl ContentHashed for Secret {
    fn hash_entry(&self) -> Option<(&str, &str)> {
        Some((self.metadata.name.as_str(), self.content_hash()?))
    }
}

impl ContentHashed for ConfigMap {
    fn hash_entry(&self) -> Option<(&str, &str)> {
        Some((self.metadata.name.as_str(), self.content_hash()?))
    }
}

impl ContentHashed for LiveSecret {
    fn hash_entry(&self) -> Option<(&str, &str)> {
        live_hash_entry(&self.metadata)
    }
}

impl ContentHashed for LiveConfigMap {
    fn hash_entry(&self) -> Option<(&str, &str)> {
        live_hash_entry(&self.metadata)
    }
}

fn live_hash_entry(
    meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta,
) -> Option<(&str, &str)> {
    let name = meta.name.as_deref().filter(|n| !n.is_empty())?;
    let hash = meta.annotations.as_ref()?.get(ANNOTATION_CONTENT_HASH)?;
    Some((name, hash.as_str()))
}

/// Name to digest map. ConfigMaps are indexed after Secrets and win on a
/// name clash.
pub fn index_content_hashes<S, C>(secrets: &[S], config_maps: &[C]) -> BTreeMap<String, String>
where
    S: ContentHashed,
    C: ContentHashed,
{
    secrets
        .iter()
        .filter_map(ContentHashed::hash_entry)
        .chain(config_maps.iter().filter_map(ContentHashed::hash_entry))
        .map(|(name, hash)| (name.to_string(), hash.to_string()))
        .collect()
}

// =============================================================================
// Pod references
// =============================================================================

/// Names of Secrets/ConfigMaps a pod references, in hashing order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PodReferences(Vec<String>);

impl PodReferences {
    /// References of a generated pod spec
    pub fn from_pod_spec(spec: &PodSpec) -> Self {
        let mut names: Vec<String> = spec
            .image_pull_secrets
            .iter()
            .map(|r| r.name.clone())
            .collect();

        let mut containers: Vec<_> = spec.containers.iter().collect();
        containers.sort_by(|a, b| a.name.cmp(&b.name));
        for container in containers {
            for source in &container.env_from {
                names.extend(source.secret_ref.iter().map(|r| r.name.clone()));
                names.extend(source.config_map_ref.iter().map(|r| r.name.clone()));
            }
        }

        for volume in &spec.volumes {
            names.extend(volume.secret.iter().map(|s| s.secret_name.clone()));
            names.extend(volume.config_map.iter().map(|c| c.name.clone()));
        }

        Self::from_names(names)
    }

    /// References of a pod spec read back from the cluster
    pub fn from_live(spec: &LivePodSpec) -> Self {
        let mut names: Vec<String> = spec
            .image_pull_secrets
            .iter()
            .flatten()
            .map(|r| r.name.clone())
            .collect();

        let mut containers: Vec<_> = spec.containers.iter().collect();
        containers.sort_by(|a, b| a.name.cmp(&b.name));
        for container in containers {
            for source in container.env_from.iter().flatten() {
                names.extend(source.secret_ref.iter().map(|r| r.name.clone()));
                names.extend(source.config_map_ref.iter().map(|r| r.name.clone()));
            }
        }

        for volume in spec.volumes.iter().flatten() {
            names.extend(volume.secret.iter().filter_map(|s| s.secret_name.clone()));
            names.extend(volume.config_map.iter().map(|c| c.name.clone()));
        }

        Self::from_names(names)
    }

    fn from_names(names: Vec<String>) -> Self {
        Self(names.into_iter().filter(|n| !n.is_empty()).collect())
    }

    /// Referenced names in hashing order
    pub fn names(&self) -> &[String] {
        &self.0
    }

    /// Aggregate digest, `None` when the pod references nothing.
    ///
    /// A reference missing from `hashes` contributes an empty segment.
    pub fn content_hash(&self, hashes: &BTreeMap<String, String>) -> Option<String> {
        if self.0.is_empty() {
            return None;
        }
        let joined: String = self
            .0
            .iter()
            .map(|name| hashes.get(name).map(String::as_str).unwrap_or(""))
            .collect();
        Some(short_hash_bytes(joined.as_bytes(), CONTENT_HASH_LENGTH))
    }
}

/// Pod content hash of a generated pod spec
pub fn pod_content_hash(spec: &PodSpec, secrets: &[Secret], config_maps: &[ConfigMap]) -> Option<String> {
    let hashes = index_content_hashes(secrets, config_maps);
    PodReferences::from_pod_spec(spec).content_hash(&hashes)
}

// =============================================================================
// Patch plan
// =============================================================================

/// JSON patch operation kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    /// Add a member
    Add,
    /// Replace an existing member
    Replace,
}

/// One RFC 6902 operation
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PatchOperation {
    /// Operation kind
    pub op: PatchOp,
    /// RFC 6901 pointer
    pub path: String,
    /// New value
    pub value: Value,
}

/// Escape one RFC 6901 reference token
pub fn escape_pointer_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

const ANNOTATIONS_PATH: &str = "/spec/template/metadata/annotations";
const PULL_SECRETS_PATH: &str = "/spec/template/spec/imagePullSecrets";

/// What must change on a live Deployment so its pods track the content of
/// the Secrets/ConfigMaps they reference
#[derive(Clone, Debug, PartialEq)]
pub struct PodPatchPlan {
    /// Deployment name
    pub deployment: String,
    /// Expected registry credentials Secret name
    pub pull_secret: String,
    /// Whether the pull Secret exists in the namespace
    pub pull_secret_exists: bool,
    /// Hash stored on the pod template
    pub previous_hash: Option<String>,
    /// Hash of the desired pod template
    pub desired_hash: Option<String>,
    /// The stored hash must be updated
    pub hash_changed: bool,
    /// `imagePullSecrets` must be updated
    pub pull_secrets_changed: bool,
    has_annotations: bool,
    live_pull_secrets: usize,
}

impl PodPatchPlan {
    /// Compare a live Deployment against the live Secrets and ConfigMaps of
    /// its namespace
    pub fn compute(deployment: &LiveDeployment, secrets: &[LiveSecret], config_maps: &[LiveConfigMap]) -> Self {
        let name = deployment.metadata.name.clone().unwrap_or_default();
        let pull_secret = format!("{}{}", name, PULL_SECRET_SUFFIX);
        let pull_secret_exists = secrets
            .iter()
            .any(|s| s.metadata.name.as_deref() == Some(pull_secret.as_str()));

        let template = deployment.spec.as_ref().map(|s| &s.template);
        let annotations = template
            .and_then(|t| t.metadata.as_ref())
            .and_then(|m| m.annotations.as_ref());
        let live_spec = template.and_then(|t| t.spec.clone()).unwrap_or_default();
        let live_pull: Vec<String> = live_spec
            .image_pull_secrets
            .iter()
            .flatten()
            .map(|r| r.name.clone())
            .collect();

        let mut desired_spec = live_spec;
        desired_spec.image_pull_secrets = pull_secret_exists.then(|| {
            vec![LiveObjectReference {
                name: pull_secret.clone(),
            }]
        });
        let hashes = index_content_hashes(secrets, config_maps);
        let desired_hash = PodReferences::from_live(&desired_spec).content_hash(&hashes);
        let previous_hash = annotations.and_then(|a| a.get(ANNOTATION_CONTENT_HASH)).cloned();

        let pull_secrets_changed = if pull_secret_exists {
            live_pull.len() != 1 || live_pull[0] != pull_secret
        } else {
            !live_pull.is_empty()
        };
        let hash_changed = desired_hash.is_some() && desired_hash != previous_hash;

        debug!(
            deployment = %name,
            hash_changed,
            pull_secrets_changed,
            "computed pod content hash patch plan"
        );

        Self {
            deployment: name,
            pull_secret,
            pull_secret_exists,
            previous_hash,
            desired_hash,
            hash_changed,
            pull_secrets_changed,
            has_annotations: annotations.is_some(),
            live_pull_secrets: live_pull.len(),
        }
    }

    /// Nothing to patch
    pub fn is_noop(&self) -> bool {
        !self.hash_changed && !self.pull_secrets_changed
    }

    fn desired_pull_secrets(&self) -> Value {
        if self.pull_secret_exists {
            json!([{ "name": self.pull_secret }])
        } else {
            json!([])
        }
    }

    /// Preferred structural patch
    pub fn json_patch(&self) -> Vec<PatchOperation> {
        let mut ops = Vec::new();

        if let (true, Some(hash)) = (self.hash_changed, &self.desired_hash) {
            let path = format!(
                "{}/{}",
                ANNOTATIONS_PATH,
                escape_pointer_token(ANNOTATION_CONTENT_HASH)
            );
            if !self.has_annotations {
                ops.push(PatchOperation {
                    op: PatchOp::Add,
                    path: ANNOTATIONS_PATH.to_string(),
                    value: json!({}),
                });
            }
            let op = if self.previous_hash.is_some() {
                PatchOp::Replace
            } else {
                PatchOp::Add
            };
            ops.push(PatchOperation {
                op,
                path,
                value: Value::String(hash.clone()),
            });
        }

        if self.pull_secrets_changed {
            if self.pull_secret_exists {
                let op = if self.live_pull_secrets == 0 {
                    PatchOp::Add
                } else {
                    PatchOp::Replace
                };
                ops.push(PatchOperation {
                    op,
                    path: PULL_SECRETS_PATH.to_string(),
                    value: self.desired_pull_secrets(),
                });
            } else if self.live_pull_secrets > 0 {
                ops.push(PatchOperation {
                    op: PatchOp::Replace,
                    path: PULL_SECRETS_PATH.to_string(),
                    value: self.desired_pull_secrets(),
                });
            }
        }

        ops
    }

    /// Merge patch applied when the structural patch is rejected
    pub fn merge_patch(&self) -> Option<Value> {
        if self.is_noop() {
            return None;
        }
        let mut template = serde_json::Map::new();
        if let (true, Some(hash)) = (self.hash_changed, &self.desired_hash) {
            template.insert(
                "metadata".to_string(),
                json!({ "annotations": { ANNOTATION_CONTENT_HASH: hash } }),
            );
        }
        if self.pull_secrets_changed {
            template.insert(
                "spec".to_string(),
                json!({ "imagePullSecrets": self.desired_pull_secrets() }),
            );
        }
        Some(json!({ "spec": { "template": template } }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::{Container, EnvFromSource, KeyToPath, LocalObjectReference, Volume};
    use k8s_openapi::api::apps::v1::DeploymentSpec;
    use k8s_openapi::api::core::v1::PodTemplateSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta as LiveMeta;

    fn hashed_secret(name: &str, hash: &str) -> Secret {
        let mut secret = Secret::new(name, "ns");
        secret
            .metadata
            .annotations
            .insert(ANNOTATION_CONTENT_HASH.to_string(), hash.to_string());
        secret
    }

    fn hashed_config_map(name: &str, hash: &str) -> ConfigMap {
        let mut cm = ConfigMap::new(name, "ns");
        cm.metadata
            .annotations
            .insert(ANNOTATION_CONTENT_HASH.to_string(), hash.to_string());
        cm
    }

    fn live_secret(name: &str, hash: Option<&str>) -> LiveSecret {
        LiveSecret {
            metadata: LiveMeta {
                name: Some(name.to_string()),
                annotations: hash.map(|h| {
                    BTreeMap::from([(ANNOTATION_CONTENT_HASH.to_string(), h.to_string())])
                }),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn three_reference_pod() -> PodSpec {
        PodSpec {
            image_pull_secrets: vec![LocalObjectReference {
                name: "pull".into(),
            }],
            containers: vec![Container {
                name: "web".into(),
                env_from: vec![EnvFromSource::optional_secret("env")],
                ..Default::default()
            }],
            volumes: vec![Volume::from_config_map(
                "cfg-app",
                "cm",
                KeyToPath {
                    key: "app.ini".into(),
                    path: "app.ini".into(),
                    mode: None,
                },
            )],
            ..Default::default()
        }
    }

    // =========================================================================
    // Story: Digests ignore map ordering
    // =========================================================================

    #[test]
    fn story_digest_is_order_independent() {
        let a = content_digest([("A", "1"), ("B", "2")]);
        let b = content_digest([("B", "2"), ("A", "1")]);
        assert_eq!(a, b);
        assert_eq!(a.len(), CONTENT_HASH_LENGTH);
        assert_ne!(a, content_digest([("A", "1"), ("B", "3")]));
        assert_ne!(a, content_digest([("A", "1"), ("C", "2")]));
    }

    #[test]
    fn story_empty_map_digest() {
        let empty: BTreeMap<String, String> = BTreeMap::new();
        assert_eq!(content_digest(&empty), content_digest(Vec::<(&str, &str)>::new()));
    }

    #[test]
    fn story_key_value_boundary_is_hashed() {
        assert_ne!(content_digest([("a", "b")]), content_digest([("ab", "")]));
        assert_ne!(
            content_digest([("a", "b"), ("c", "d")]),
            content_digest([("a", "bc"), ("", "d")])
        );
    }

    // =========================================================================
    // Story: Pod hash follows pull secret, envFrom, volume order
    // =========================================================================

    #[test]
    fn story_reference_order() {
        let pod = three_reference_pod();
        let refs = PodReferences::from_pod_spec(&pod);
        assert_eq!(refs.names(), ["pull", "env", "cm"]);

        let secrets = vec![hashed_secret("pull", "aaaaaa"), hashed_secret("env", "bbbbbb")];
        let config_maps = vec![hashed_config_map("cm", "cccccc")];
        let hash = pod_content_hash(&pod, &secrets, &config_maps).unwrap();
        assert_eq!(hash, short_hash_bytes(b"aaaaaabbbbbbcccccc", CONTENT_HASH_LENGTH));
    }

    #[test]
    fn story_missing_reference_contributes_empty_segment() {
        let pod = three_reference_pod();
        let secrets = vec![hashed_secret("env", "bbbbbb")];
        let hash = pod_content_hash(&pod, &secrets, &[]).unwrap();
        assert_eq!(hash, short_hash_bytes(b"bbbbbb", CONTENT_HASH_LENGTH));
    }

    #[test]
    fn story_changing_one_reference_changes_hash() {
        let pod = three_reference_pod();
        let cms = vec![hashed_config_map("cm", "cccccc")];
        let before = pod_content_hash(&pod, &[hashed_secret("env", "bbbbbb")], &cms);
        let after = pod_content_hash(&pod, &[hashed_secret("env", "dddddd")], &cms);
        assert_ne!(before, after);
    }

    #[test]
    fn story_pod_without_references_has_no_hash() {
        let pod = PodSpec {
            containers: vec![Container {
                name: "web".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_eq!(pod_content_hash(&pod, &[], &[]), None);
    }

    #[test]
    fn story_containers_are_hashed_by_name() {
        let mut pod = PodSpec {
            containers: vec![
                Container {
                    name: "zeta".into(),
                    env_from: vec![EnvFromSource::optional_secret("z")],
                    ..Default::default()
                },
                Container {
                    name: "alpha".into(),
                    env_from: vec![EnvFromSource::optional_secret("a")],
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        assert_eq!(PodReferences::from_pod_spec(&pod).names(), ["a", "z"]);
        pod.containers.reverse();
        assert_eq!(PodReferences::from_pod_spec(&pod).names(), ["a", "z"]);
    }

    // =========================================================================
    // Story: Live deployments get a minimal patch
    // =========================================================================

    fn live_deployment(annotations: Option<BTreeMap<String, String>>, pull: Vec<&str>) -> LiveDeployment {
        let spec: LivePodSpec = serde_json::from_value(json!({
            "containers": [{
                "name": "web",
                "envFrom": [{ "secretRef": { "name": "shop-app-web-base", "optional": true } }]
            }],
            "imagePullSecrets": pull.iter().map(|n| json!({ "name": n })).collect::<Vec<_>>(),
        }))
        .unwrap();
        LiveDeployment {
            metadata: LiveMeta {
                name: Some("shop-app".into()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                template: PodTemplateSpec {
                    metadata: Some(LiveMeta {
                        annotations,
                        ..Default::default()
                    }),
                    spec: Some(spec),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn story_new_pull_secret_adds_list_and_hash() {
        let deployment = live_deployment(None, vec![]);
        let secrets = vec![
            live_secret("shop-app--pull", Some("pppppp")),
            live_secret("shop-app-web-base", Some("eeeeee")),
        ];
        let plan = PodPatchPlan::compute(&deployment, &secrets, &[]);
        assert!(plan.hash_changed);
        assert!(plan.pull_secrets_changed);
        assert_eq!(
            plan.desired_hash.as_deref(),
            Some(short_hash_bytes(b"ppppppeeeeee", CONTENT_HASH_LENGTH).as_str())
        );

        let ops = plan.json_patch();
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0].path, "/spec/template/metadata/annotations");
        assert_eq!(ops[0].value, json!({}));
        assert_eq!(
            ops[1].path,
            "/spec/template/metadata/annotations/kompox.dev~1compose-content-hash"
        );
        assert_eq!(ops[1].op, PatchOp::Add);
        assert_eq!(ops[2].op, PatchOp::Add);
        assert_eq!(ops[2].value, json!([{ "name": "shop-app--pull" }]));

        let merge = plan.merge_patch().unwrap();
        assert_eq!(
            merge["spec"]["template"]["spec"]["imagePullSecrets"],
            json!([{ "name": "shop-app--pull" }])
        );
    }

    #[test]
    fn story_stale_pull_secret_is_removed() {
        let hashes = BTreeMap::from([(ANNOTATION_CONTENT_HASH.to_string(), "old".to_string())]);
        let deployment = live_deployment(Some(hashes), vec!["shop-app--pull"]);
        let secrets = vec![live_secret("shop-app-web-base", Some("eeeeee"))];
        let plan = PodPatchPlan::compute(&deployment, &secrets, &[]);
        assert!(plan.pull_secrets_changed);

        let ops = plan.json_patch();
        assert_eq!(ops[0].op, PatchOp::Replace);
        assert_eq!(ops[1].path, "/spec/template/spec/imagePullSecrets");
        assert_eq!(ops[1].value, json!([]));
        assert_eq!(
            plan.merge_patch().unwrap()["spec"]["template"]["metadata"]["annotations"]
                [ANNOTATION_CONTENT_HASH],
            json!(plan.desired_hash.clone().unwrap())
        );
    }

    #[test]
    fn story_up_to_date_deployment_is_noop() {
        let secrets = vec![live_secret("shop-app-web-base", Some("eeeeee"))];
        let current = short_hash_bytes(b"eeeeee", CONTENT_HASH_LENGTH);
        let annotations = BTreeMap::from([(ANNOTATION_CONTENT_HASH.to_string(), current)]);
        let deployment = live_deployment(Some(annotations), vec![]);
        let plan = PodPatchPlan::compute(&deployment, &secrets, &[]);
        assert!(plan.is_noop());
        assert!(plan.json_patch().is_empty());
        assert_eq!(plan.merge_patch(), None);
    }

    #[test]
    fn story_annotations_without_hash_key_get_add() {
        let annotations = BTreeMap::from([("other".to_string(), "x".to_string())]);
        let deployment = live_deployment(Some(annotations), vec![]);
        let secrets = vec![live_secret("shop-app-web-base", Some("eeeeee"))];
        let ops = PodPatchPlan::compute(&deployment, &secrets, &[]).json_patch();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].op, PatchOp::Add);
    }

    #[test]
    fn pointer_tokens_are_escaped() {
        assert_eq!(escape_pointer_token("a/b~c"), "a~1b~0c");
    }
}
