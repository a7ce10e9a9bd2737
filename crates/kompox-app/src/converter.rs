//! Phased conversion of an app into its manifest set
//!
//! ```text
//! Created --convert--> Converted --bind_volumes--> Bound --build--> Built
//! ```
//!
//! Each phase either succeeds and advances, or fails and leaves the
//! converter where it was. Warnings accumulate across phases and are
//! returned in full by `build`.

use std::path::Path;
use std::sync::Arc;

use kompox_common::config::SynthesisConfig;
use kompox_common::labels::AppLabels;
use kompox_common::model::{App, Cluster, Provider, VolumeBinding, Workspace};
use kompox_common::naming::NamingContext;
use kompox_workload::secrets::{self, validate_docker_config};
use kompox_workload::storage::{bind_volume, check_bindings, validate_binding};
use kompox_workload::{
    normalize, BoundVolume, ComposeProject, NormalizeInput, NormalizedProject, ObjectScope,
    PodCompiler, StorageScope,
};
use tracing::{debug, info, warn};

use crate::error::ConverterError;
use crate::ingress::{resolve_rules, IngressCompiler, IngressScope, ResolvedRule};
use crate::manifest::GeneratedManifestSet;
use crate::policy::{PolicyCompiler, PolicyScope};
use crate::provider::VolumeClassResolver;
use crate::workload::{WorkloadCompiler, WorkloadScope};

/// Component name of the app's single workload
pub const COMPONENT_APP: &str = "app";

/// Where the app runs
#[derive(Clone, Copy, Debug)]
pub struct ConversionTarget<'a> {
    /// Workspace
    pub workspace: &'a Workspace,
    /// Provider
    pub provider: &'a Provider,
    /// Cluster
    pub cluster: &'a Cluster,
    /// App
    pub app: &'a App,
}

/// Externally visible phase of a [`Converter`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConverterPhase {
    /// Nothing run yet
    Created,
    /// Compose document validated
    Converted,
    /// Volumes bound to disks
    Bound,
    /// Manifests produced
    Built,
}

/// Result of the final phase
#[derive(Clone, Debug, PartialEq)]
pub struct BuildOutput {
    /// Objects in apply order
    pub manifests: GeneratedManifestSet,
    /// Every warning recorded by every phase
    pub warnings: Vec<String>,
}

struct Conversion {
    project: NormalizedProject,
    rules: Vec<ResolvedRule>,
}

enum Phase {
    Created,
    Converted(Conversion),
    Bound(Conversion, Vec<BoundVolume>),
    Built,
}

/// Drives one app through convert, bind and build.
///
/// ```rust,ignore
/// let mut converter = Converter::new(target, &config, resolver);
/// converter.convert()?;
/// converter.bind_volumes(&bindings)?;
/// let output = converter.build()?;
/// ```
pub struct Converter<'a> {
    target: ConversionTarget<'a>,
    config: &'a SynthesisConfig,
    resolver: Arc<dyn VolumeClassResolver>,
    docker_config: Option<String>,
    naming: NamingContext,
    labels: AppLabels,
    warnings: Vec<String>,
    phase: Phase,
}

impl<'a> Converter<'a> {
    /// Converter for `target`, resolving volume classes through `resolver`
    pub fn new(
        target: ConversionTarget<'a>,
        config: &'a SynthesisConfig,
        resolver: Arc<dyn VolumeClassResolver>,
    ) -> Self {
        let naming = NamingContext::derive(
            &target.workspace.name,
            &target.provider.name,
            &target.cluster.name,
            &target.app.name,
            config.hash_length,
        );
        let labels = AppLabels::new(&target.app.name, COMPONENT_APP, &naming);
        Self {
            target,
            config,
            resolver,
            docker_config: None,
            naming,
            labels,
            warnings: Vec::new(),
            phase: Phase::Created,
        }
    }

    /// Attach registry credentials (a Docker config JSON document)
    pub fn with_docker_config(mut self, content: impl Into<String>) -> Self {
        self.docker_config = Some(content.into());
        self
    }

    /// Current phase
    pub fn phase(&self) -> ConverterPhase {
        match self.phase {
            Phase::Created => ConverterPhase::Created,
            Phase::Converted(_) => ConverterPhase::Converted,
            Phase::Bound(..) => ConverterPhase::Bound,
            Phase::Built => ConverterPhase::Built,
        }
    }

    /// Hashes and names of this app instance
    pub fn naming(&self) -> &NamingContext {
        &self.naming
    }

    /// Warnings recorded so far
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Normalized project, once converted
    pub fn project(&self) -> Option<&NormalizedProject> {
        match &self.phase {
            Phase::Converted(c) | Phase::Bound(c, _) => Some(&c.project),
            _ => None,
        }
    }

    /// Bound volumes, once bound
    pub fn bound_volumes(&self) -> Option<&[BoundVolume]> {
        match &self.phase {
            Phase::Bound(_, bound) => Some(bound),
            _ => None,
        }
    }

    fn record_warnings(&mut self, warnings: Vec<String>) {
        for warning in warnings {
            warn!(app = %self.target.app.name, warning = %warning, "conversion warning");
            self.warnings.push(warning);
        }
    }

    // =========================================================================
    // Convert
    // =========================================================================

    /// Load and validate the compose document
    pub fn convert(&mut self) -> Result<(), ConverterError> {
        match self.phase {
            Phase::Created => {}
            Phase::Built => return Err(ConverterError::AlreadyBuilt),
            _ => return Err(ConverterError::AlreadyConverted),
        }

        let app = self.target.app;
        self.warnings.clear();
        let project = ComposeProject::load(&app.compose)?;
        self.record_warnings(project.warnings.clone());
        let mut normalized = normalize(
            &project,
            &NormalizeInput {
                app: &app.name,
                component: COMPONENT_APP,
                base_dir: Path::new(app.base_dir()),
                volumes: &app.volumes,
            },
        )?;
        WorkloadCompiler::check_service_names(&app.name, normalized.service_names())?;
        let rules = resolve_rules(
            &app.ingress.rules,
            &normalized.ports,
            self.target.cluster.ingress_domain(),
        )?;
        if let Some(content) = &self.docker_config {
            validate_docker_config(content)?;
        }

        let warnings: Vec<String> = normalized
            .warnings
            .drain(..)
            .skip(project.warnings.len())
            .collect();
        info!(
            app = %app.name,
            namespace = %self.naming.namespace,
            services = normalized.containers.len(),
            ingress_rules = rules.len(),
            warnings = self.warnings.len() + warnings.len(),
            "converted compose project"
        );
        self.record_warnings(warnings);
        self.phase = Phase::Converted(Conversion {
            project: normalized,
            rules,
        });
        Ok(())
    }

    // =========================================================================
    // Bind
    // =========================================================================

    /// Bind every declared volume to its disk, in declaration order
    pub fn bind_volumes(&mut self, bindings: &[VolumeBinding]) -> Result<(), ConverterError> {
        match self.phase {
            Phase::Converted(_) => {}
            Phase::Created => return Err(ConverterError::NotConverted),
            Phase::Bound(..) => return Err(ConverterError::AlreadyBound),
            Phase::Built => return Err(ConverterError::AlreadyBuilt),
        }

        let bound = self.bind(bindings)?;
        info!(
            app = %self.target.app.name,
            volumes = bound.len(),
            "bound volumes"
        );
        self.phase = match std::mem::replace(&mut self.phase, Phase::Created) {
            Phase::Converted(conversion) => Phase::Bound(conversion, bound),
            other => other,
        };
        Ok(())
    }

    fn bind(&self, bindings: &[VolumeBinding]) -> Result<Vec<BoundVolume>, ConverterError> {
        let ConversionTarget { cluster, app, .. } = self.target;
        check_bindings(&app.volumes, bindings)?;

        let scope = StorageScope {
            naming: &self.naming,
            namespace: &self.naming.namespace,
            labels: self.labels.base(),
        };
        let mut bound = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let volume = validate_binding(&app.volumes, binding)?;
            let class = self
                .resolver
                .volume_class(cluster, app, volume)
                .map_err(|source| ConverterError::VolumeClass {
                    volume: volume.name.clone(),
                    source,
                })?;
            let volume = bind_volume(&scope, &app.volumes, binding, &class)?;
            debug!(
                volume = %binding.name,
                resource = %volume.resource_name(),
                csi_driver = %class.csi_driver,
                "bound volume"
            );
            bound.push(volume);
        }
        Ok(bound)
    }

    // =========================================================================
    // Build
    // =========================================================================

    /// Generate the manifest set
    pub fn build(&mut self) -> Result<BuildOutput, ConverterError> {
        let manifests = match &self.phase {
            Phase::Bound(conversion, bound) => self.generate(conversion, bound)?,
            Phase::Created => return Err(ConverterError::NotConverted),
            Phase::Converted(_) => return Err(ConverterError::NotBound),
            Phase::Built => return Err(ConverterError::AlreadyBuilt),
        };
        info!(
            app = %self.target.app.name,
            objects = manifests.objects().len(),
            content_hash = manifests.deployment.content_hash().unwrap_or(""),
            "built manifests"
        );
        self.phase = Phase::Built;
        Ok(BuildOutput {
            manifests,
            warnings: self.warnings.clone(),
        })
    }

    fn generate(
        &self,
        conversion: &Conversion,
        bound: &[BoundVolume],
    ) -> Result<GeneratedManifestSet, ConverterError> {
        let ConversionTarget {
            workspace,
            provider,
            cluster,
            app,
        } = self.target;
        let config = self.config;
        let namespace = self.naming.namespace.as_str();
        let component_labels = self.labels.component();

        let namespace_object = WorkloadCompiler::compile_namespace(
            &self.naming,
            &self.labels,
            [
                workspace.name.as_str(),
                provider.name.as_str(),
                cluster.name.as_str(),
                app.name.as_str(),
            ],
            &provider.driver,
        );

        let policies = config.access_resources.then(|| {
            PolicyCompiler::compile(
                &PolicyScope {
                    app: &app.name,
                    namespace,
                    ingress_namespace: cluster.ingress_namespace(),
                    labels: self.labels.base(),
                },
                &app.network_policy.ingress_rules,
            )
        });

        let files = secrets::compile(
            &ObjectScope {
                app: &app.name,
                component: COMPONENT_APP,
                namespace,
                labels: &component_labels,
            },
            &conversion.project,
            self.docker_config.as_deref(),
        )?;

        let pool = non_empty(app.deployment.pool.as_deref()).unwrap_or(config.default_node_pool.as_str());
        let pod = PodCompiler::new(&conversion.project, &files)
            .with_bound_volumes(bound)
            .with_init_image(&config.init_image)
            .with_node_selector(WorkloadCompiler::node_selector(
                pool,
                app.deployment.zone.as_deref(),
            ))
            .compile();

        let scope = WorkloadScope {
            namespace,
            labels: &self.labels,
        };
        let deployment = WorkloadCompiler::compile_deployment(&scope, pod);
        let service =
            WorkloadCompiler::compile_service(&scope, &conversion.rules, &conversion.project.ports);
        let headless_services = if config.headless_services {
            WorkloadCompiler::compile_headless_services(&scope, conversion.project.service_names())
        } else {
            Vec::new()
        };

        let ingresses = match service {
            Some(_) => {
                let host_prefix = format!("{}-{}", app.name, self.naming.app_id);
                let cert_resolver = non_empty(app.ingress.cert_resolver.as_deref())
                    .or_else(|| non_empty(cluster.ingress.cert_resolver.as_deref()));
                IngressCompiler::compile(
                    &IngressScope {
                        namespace,
                        labels: &self.labels,
                        ingress_class: &config.ingress_class,
                        host_prefix: &host_prefix,
                        domain: cluster.ingress_domain(),
                        cert_resolver,
                    },
                    &conversion.rules,
                )?
            }
            None => Default::default(),
        };

        Ok(GeneratedManifestSet {
            namespace: namespace_object,
            policies,
            persistent_volumes: bound.iter().map(|b| b.persistent_volume.clone()).collect(),
            persistent_volume_claims: bound.iter().map(|b| b.claim.clone()).collect(),
            pull_secret: files.pull_secret,
            config_maps: files.config_maps,
            config_secrets: files.config_secrets,
            env_secrets: files.env_secrets,
            deployment,
            service,
            headless_services,
            ingresses,
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MockVolumeClassResolver, ProviderError, StaticVolumeClassResolver};
    use kompox_common::model::{AppIngress, AppIngressRule, AppVolume, ClusterIngress, VolumeClass};
    use kompox_common::ANNOTATION_CONTENT_HASH;

    const GIB: i64 = 1 << 30;

    const COMPOSE: &str = r#"
services:
  web:
    image: nginx:1.27
    ports: ["8080:80"]
    volumes: ["./html:/usr/share/nginx/html"]
  api:
    image: ghcr.io/example/api:1.0
    ports: ["9090:3000"]
    volumes: ["db/state:/var/lib/api"]
"#;

    struct Fixture {
        workspace: Workspace,
        provider: Provider,
        cluster: Cluster,
        app: App,
        config: SynthesisConfig,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                workspace: Workspace { name: "ws".into() },
                provider: Provider {
                    name: "prv".into(),
                    driver: "aks".into(),
                },
                cluster: Cluster {
                    name: "cls".into(),
                    ingress: ClusterIngress {
                        namespace: Some("traefik".into()),
                        domain: Some("ops.example.net".into()),
                        cert_resolver: Some("staging".into()),
                    },
                },
                app: App {
                    name: "shop".into(),
                    compose: COMPOSE.into(),
                    volumes: vec![
                        AppVolume {
                            name: "default".into(),
                            size: GIB,
                        },
                        AppVolume {
                            name: "db".into(),
                            size: 2 * GIB,
                        },
                    ],
                    ingress: AppIngress {
                        cert_resolver: Some("production".into()),
                        rules: vec![
                            AppIngressRule {
                                name: "main".into(),
                                port: 8080,
                                hosts: vec!["www.example.com".into()],
                            },
                            AppIngressRule {
                                name: "api".into(),
                                port: 9090,
                                hosts: vec!["api.example.com".into()],
                            },
                        ],
                    },
                    ..Default::default()
                },
                config: SynthesisConfig::default(),
            }
        }

        fn target(&self) -> ConversionTarget<'_> {
            ConversionTarget {
                workspace: &self.workspace,
                provider: &self.provider,
                cluster: &self.cluster,
                app: &self.app,
            }
        }

        fn converter(&self) -> Converter<'_> {
            Converter::new(self.target(), &self.config, Arc::new(azure_disk()))
        }
    }

    fn azure_disk() -> StaticVolumeClassResolver {
        StaticVolumeClassResolver::new(VolumeClass {
            csi_driver: "disk.csi.azure.com".into(),
            storage_class_name: "managed-csi".into(),
            ..Default::default()
        })
    }

    fn bindings() -> Vec<VolumeBinding> {
        vec![
            VolumeBinding::new("default", "/subscriptions/x/disks/default-1", GIB),
            VolumeBinding::new("db", "/subscriptions/x/disks/db-1", 2 * GIB),
        ]
    }

    // =========================================================================
    // Story: An app goes from compose text to an ordered manifest set
    // =========================================================================

    #[test]
    fn story_full_lifecycle() {
        let fixture = Fixture::new();
        let mut converter = fixture.converter();
        assert_eq!(converter.phase(), ConverterPhase::Created);

        converter.convert().unwrap();
        assert_eq!(converter.phase(), ConverterPhase::Converted);
        converter.bind_volumes(&bindings()).unwrap();
        assert_eq!(converter.phase(), ConverterPhase::Bound);
        assert_eq!(converter.bound_volumes().unwrap().len(), 2);

        let output = converter.build().unwrap();
        assert_eq!(converter.phase(), ConverterPhase::Built);
        let manifests = &output.manifests;

        assert_eq!(manifests.count("Namespace"), 1);
        assert_eq!(manifests.count("PersistentVolume"), 2);
        assert_eq!(manifests.count("PersistentVolumeClaim"), 2);
        assert_eq!(manifests.count("Deployment"), 1);
        assert_eq!(manifests.count("Ingress"), 2);
        // app Service plus one headless Service per compose service
        assert_eq!(manifests.count("Service"), 3);
        assert_eq!(manifests.service.as_ref().unwrap().spec.ports.len(), 2);

        let kinds: Vec<_> = manifests.objects().iter().map(|o| o.kind().to_string()).collect();
        assert_eq!(kinds.first().map(String::as_str), Some("Namespace"));
        let first = |kind: &str| kinds.iter().position(|k| k == kind).unwrap();
        assert!(first("PersistentVolume") < first("PersistentVolumeClaim"));
        assert!(first("PersistentVolumeClaim") < first("Deployment"));
        assert!(first("Deployment") < first("Service"));
        assert!(first("Service") < first("Ingress"));

        let custom = manifests.ingresses.custom.as_ref().unwrap();
        assert_eq!(
            custom
                .metadata
                .annotation(crate::ingress::ANNOTATION_ROUTER_CERT_RESOLVER),
            Some("production")
        );
        let default = manifests.ingresses.default.as_ref().unwrap();
        let app_id = &converter.naming().app_id;
        assert_eq!(
            default.spec.rules[0].host,
            format!("shop-{}-8080.ops.example.net", app_id)
        );
    }

    #[test]
    fn story_pod_wiring_follows_bindings() {
        let fixture = Fixture::new();
        let mut converter = fixture.converter();
        converter.convert().unwrap();
        converter.bind_volumes(&bindings()).unwrap();
        let claim_names: Vec<String> = converter
            .bound_volumes()
            .unwrap()
            .iter()
            .map(|b| b.resource_name().to_string())
            .collect();
        let output = converter.build().unwrap();
        let pod = &output.manifests.deployment.spec.template.spec;

        let claims: Vec<_> = pod
            .volumes
            .iter()
            .filter_map(|v| v.persistent_volume_claim.as_ref())
            .map(|c| c.claim_name.clone())
            .collect();
        assert_eq!(claims, claim_names);
        assert_eq!(pod.init_containers.len(), 1);
        assert_eq!(pod.node_selector[kompox_common::LABEL_NODE_POOL], "user");
        assert!(output
            .manifests
            .deployment
            .spec
            .template
            .metadata
            .annotations
            .contains_key(ANNOTATION_CONTENT_HASH));
        assert_eq!(
            output.manifests.namespace.metadata.annotation(kompox_common::ANNOTATION_APP),
            Some("ws/prv/cls/shop")
        );
    }

    // =========================================================================
    // Story: Phases run once, in order
    // =========================================================================

    #[test]
    fn story_phase_ordering() {
        let fixture = Fixture::new();
        let mut converter = fixture.converter();

        assert!(matches!(converter.bind_volumes(&bindings()), Err(ConverterError::NotConverted)));
        assert!(matches!(converter.build(), Err(ConverterError::NotConverted)));

        converter.convert().unwrap();
        assert!(matches!(converter.convert(), Err(ConverterError::AlreadyConverted)));
        assert!(matches!(converter.build(), Err(ConverterError::NotBound)));

        converter.bind_volumes(&bindings()).unwrap();
        assert!(matches!(converter.bind_volumes(&bindings()), Err(ConverterError::AlreadyBound)));
        assert!(matches!(converter.convert(), Err(ConverterError::AlreadyConverted)));

        converter.build().unwrap();
        assert!(matches!(converter.build(), Err(ConverterError::AlreadyBuilt)));
        assert!(matches!(converter.convert(), Err(ConverterError::AlreadyBuilt)));
        assert!(matches!(converter.bind_volumes(&bindings()), Err(ConverterError::AlreadyBuilt)));
    }

    #[test]
    fn story_failed_phase_keeps_state() {
        let fixture = Fixture::new();
        let mut converter = fixture.converter();
        converter.convert().unwrap();

        let err = converter.bind_volumes(&bindings()[..1]).unwrap_err();
        assert_eq!(err.to_string(), "volume bindings count 1 does not match app volumes 2");
        assert_eq!(converter.phase(), ConverterPhase::Converted);

        let mut swapped = bindings();
        swapped.swap(0, 1);
        assert!(converter.bind_volumes(&swapped).is_err());

        let mut missing = bindings();
        missing[1].disk.handle = " ".into();
        let err = converter.bind_volumes(&missing).unwrap_err();
        assert_eq!(err.to_string(), "volume db has no handle in binding input");
        assert_eq!(converter.phase(), ConverterPhase::Converted);

        converter.bind_volumes(&bindings()).unwrap();
        assert_eq!(converter.phase(), ConverterPhase::Bound);
    }

    #[test]
    fn story_invalid_compose_stays_created() {
        let mut fixture = Fixture::new();
        fixture.app.compose = "services:\n  shop-app-web:\n    image: nginx\n".into();
        fixture.app.ingress = AppIngress::default();
        let mut converter = fixture.converter();
        let err = converter.convert().unwrap_err();
        assert!(err.to_string().contains("reserved ingress service name prefixes"));
        assert_eq!(converter.phase(), ConverterPhase::Created);
    }

    #[test]
    fn story_invalid_docker_config_is_fatal_at_convert() {
        let fixture = Fixture::new();
        let mut converter = fixture.converter().with_docker_config("{}");
        let err = converter.convert().unwrap_err();
        assert_eq!(err.to_string(), "invalid docker config: docker config json object is empty");
    }

    // =========================================================================
    // Story: The provider driver resolves every volume class
    // =========================================================================

    #[test]
    fn story_resolver_called_once_per_volume() {
        let fixture = Fixture::new();
        let mut mock = MockVolumeClassResolver::new();
        mock.expect_volume_class()
            .times(2)
            .returning(|cluster, _, volume| {
                assert_eq!(cluster.name, "cls");
                Ok(VolumeClass {
                    csi_driver: format!("{}.csi.example.com", volume.name),
                    ..Default::default()
                })
            });
        let mut converter = Converter::new(fixture.target(), &fixture.config, Arc::new(mock));
        converter.convert().unwrap();
        converter.bind_volumes(&bindings()).unwrap();
        let bound = converter.bound_volumes().unwrap();
        assert_eq!(bound[1].persistent_volume.spec.csi.driver, "db.csi.example.com");
    }

    #[test]
    fn story_resolver_failure_names_the_volume() {
        let fixture = Fixture::new();
        let mut mock = MockVolumeClassResolver::new();
        mock.expect_volume_class()
            .returning(|_, _, _| Err(ProviderError::VolumeClass("quota exceeded".into())));
        let mut converter = Converter::new(fixture.target(), &fixture.config, Arc::new(mock));
        converter.convert().unwrap();
        let err = converter.bind_volumes(&bindings()).unwrap_err();
        assert_eq!(err.to_string(), "volume class for default: quota exceeded");
        assert_eq!(converter.phase(), ConverterPhase::Converted);
    }

    #[test]
    fn story_class_without_csi_driver_is_fatal() {
        let fixture = Fixture::new();
        let resolver = azure_disk().with_override("db", VolumeClass::default());
        let mut converter = Converter::new(fixture.target(), &fixture.config, Arc::new(resolver));
        converter.convert().unwrap();
        let err = converter.bind_volumes(&bindings()).unwrap_err();
        assert_eq!(err.to_string(), "no CSIDriver for volume db");
    }

    // =========================================================================
    // Story: Warnings survive to the end
    // =========================================================================

    #[test]
    fn story_warnings_accumulate() {
        let mut fixture = Fixture::new();
        fixture.app.compose = format!("version: \"3.9\"\n{}", COMPOSE);
        let mut converter = fixture.converter();
        converter.convert().unwrap();
        assert_eq!(converter.warnings().len(), 1);
        converter.bind_volumes(&bindings()).unwrap();
        let output = converter.build().unwrap();
        assert_eq!(
            output.warnings,
            vec![kompox_workload::compose::project::VERSION_OBSOLETE_WARNING.to_string()]
        );
    }

    #[test]
    fn story_load_warnings_survive_a_failed_convert() {
        let mut fixture = Fixture::new();
        fixture.app.compose = concat!(
            "version: \"3.9\"\n",
            "services:\n",
            "  web:\n",
            "    image: nginx:1.27\n",
            "    ports: [\"8080:80\"]\n",
            "  admin:\n",
            "    image: nginx:1.27\n",
            "    ports: [\"8080:81\"]\n",
        )
        .to_string();
        let mut converter = fixture.converter();
        let err = converter.convert().unwrap_err();
        assert!(!err.is_phase_error());
        assert_eq!(converter.phase(), ConverterPhase::Created);
        assert_eq!(
            converter.warnings(),
            [kompox_workload::compose::project::VERSION_OBSOLETE_WARNING.to_string()]
        );

        converter.convert().unwrap_err();
        assert_eq!(converter.warnings().len(), 1);
    }

    // =========================================================================
    // Story: Optional objects follow configuration
    // =========================================================================

    #[test]
    fn story_minimal_config_skips_optional_objects() {
        let mut fixture = Fixture::new();
        fixture.config = SynthesisConfig::minimal();
        let mut converter = fixture.converter();
        converter.convert().unwrap();
        converter.bind_volumes(&bindings()).unwrap();
        let manifests = converter.build().unwrap().manifests;
        assert!(manifests.policies.is_none());
        assert!(manifests.headless_services.is_empty());
        assert_eq!(manifests.count("Service"), 1);
        assert_eq!(manifests.count("NetworkPolicy"), 0);
    }

    #[test]
    fn story_access_objects_when_enabled() {
        let fixture = Fixture::new();
        let mut converter = fixture.converter();
        converter.convert().unwrap();
        converter.bind_volumes(&bindings()).unwrap();
        let manifests = converter.build().unwrap().manifests;
        let kinds: Vec<_> = manifests
            .objects()
            .iter()
            .take(5)
            .map(|o| o.kind().to_string())
            .collect();
        assert_eq!(
            kinds,
            vec!["Namespace", "ServiceAccount", "Role", "RoleBinding", "NetworkPolicy"]
        );
        let policy = &manifests.policies.as_ref().unwrap().network_policy;
        let allowed = &policy.spec.ingress[0].from[1]
            .namespace_selector
            .as_ref()
            .unwrap()
            .match_expressions[0]
            .values;
        assert_eq!(allowed, &vec!["kube-system".to_string(), "traefik".to_string()]);
    }

    #[test]
    fn story_no_ingress_rules_exposes_ports() {
        let mut fixture = Fixture::new();
        fixture.app.ingress = AppIngress::default();
        let mut converter = fixture.converter();
        converter.convert().unwrap();
        converter.bind_volumes(&bindings()).unwrap();
        let manifests = converter.build().unwrap().manifests;
        let names: Vec<_> = manifests
            .service
            .as_ref()
            .unwrap()
            .spec
            .ports
            .iter()
            .map(|p| p.name.clone())
            .collect();
        assert_eq!(names, vec!["p8080", "p9090"]);
        assert_eq!(manifests.count("Ingress"), 0);
    }

    #[test]
    fn story_pull_secret_is_referenced() {
        let fixture = Fixture::new();
        let mut converter = fixture
            .converter()
            .with_docker_config(r#"{"auths":{"ghcr.io":{"auth":"eDp5"}}}"#);
        converter.convert().unwrap();
        converter.bind_volumes(&bindings()).unwrap();
        let manifests = converter.build().unwrap().manifests;
        let pull = manifests.pull_secret.as_ref().unwrap();
        assert_eq!(pull.metadata.name, "shop-app--pull");
        assert_eq!(
            manifests.deployment.spec.template.spec.image_pull_secrets[0].name,
            pull.metadata.name
        );
    }

    #[test]
    fn story_manifests_render_as_yaml() {
        let fixture = Fixture::new();
        let mut converter = fixture.converter();
        converter.convert().unwrap();
        converter.bind_volumes(&bindings()).unwrap();
        let manifests = converter.build().unwrap().manifests;
        let values = manifests.to_values().unwrap();
        assert_eq!(values.len(), manifests.objects().len());
        assert_eq!(values[0]["kind"], "Namespace");
        let yaml = manifests.to_yaml().unwrap();
        assert_eq!(yaml.matches("---").count(), values.len());

        for object in manifests.objects() {
            let resource = object.api_resource();
            assert_eq!(resource.kind, object.kind());
            let cluster_scoped = matches!(resource.kind.as_str(), "Namespace" | "PersistentVolume");
            assert_eq!(object.namespace().is_none(), cluster_scoped, "{}", object.name());
        }
        let objects = manifests.objects();
        let pvc = objects
            .iter()
            .find(|o| o.kind() == "PersistentVolumeClaim")
            .unwrap();
        assert_eq!(pvc.api_resource().plural, "persistentvolumeclaims");
        assert_eq!(pvc.namespace(), Some(converter.naming().namespace.as_str()));
    }
}
