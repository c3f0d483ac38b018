//! The five cluster objects that make up one spark.
//!
//! Every object is named after the spark, carries the spark labels and lives in
//! the same namespace. The workload references the other four by name.

use std::collections::BTreeMap;

use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec},
        core::v1::{
            Capabilities, ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EnvVar,
            EnvVarSource, PersistentVolumeClaim, PersistentVolumeClaimSpec,
            PersistentVolumeClaimVolumeSource, PodSecurityContext, PodSpec, PodTemplateSpec,
            ResourceRequirements, Secret, SecretKeySelector, SecretVolumeSource, SecurityContext,
            Service, ServicePort, ServiceSpec, Volume, VolumeMount, VolumeResourceRequirements,
        },
    },
    apimachinery::pkg::{
        api::resource::Quantity,
        apis::meta::v1::{LabelSelector, ObjectMeta},
    },
};
use secrecy::{ExposeSecret, SecretString};
use strum::{Display, EnumIter, IntoStaticStr};

use crate::{
    constants::*,
    script::{GitRepo, provisioning_script},
};

/// Kinds of objects in a spark bundle, in creation order.
#[derive(
    Clone, Copy, Debug, Display, EnumIter, Eq, Hash, IntoStaticStr, Ord, PartialEq, PartialOrd,
)]
pub enum ResourceKind {
    ConfigMap,
    Secret,
    PersistentVolumeClaim,
    Service,
    Deployment,
}

impl ResourceKind {
    /// Dependencies first, the workload that references them last.
    pub const CREATION_ORDER: [ResourceKind; 5] = [
        ResourceKind::ConfigMap,
        ResourceKind::Secret,
        ResourceKind::PersistentVolumeClaim,
        ResourceKind::Service,
        ResourceKind::Deployment,
    ];

    pub const DELETION_ORDER: [ResourceKind; 5] = [
        ResourceKind::Deployment,
        ResourceKind::Service,
        ResourceKind::PersistentVolumeClaim,
        ResourceKind::Secret,
        ResourceKind::ConfigMap,
    ];

    pub fn object_name(self, spark_name: &str) -> String {
        match self {
            ResourceKind::ConfigMap => format!("{spark_name}{CONFIG_MAP_SUFFIX}"),
            ResourceKind::Secret => format!("{spark_name}{SECRET_SUFFIX}"),
            ResourceKind::PersistentVolumeClaim => format!("{spark_name}{VOLUME_CLAIM_SUFFIX}"),
            ResourceKind::Service => format!("{spark_name}{SERVICE_SUFFIX}"),
            ResourceKind::Deployment => spark_name.to_owned(),
        }
    }
}

/// Values that end up in the spark's Secret.
#[derive(Debug)]
pub struct SparkSecrets {
    pub anthropic_api_key: SecretString,
    pub github_token: Option<SecretString>,
}

/// Per-user settings the provisioning script picks up from the ConfigMap.
#[derive(Clone, Debug, Default)]
pub struct UserProfile {
    pub ssh_public_key: String,
    pub github_user: Option<String>,
    pub dotfiles_repo: Option<GitRepo>,
}

/// Everything needed to render the bundle of one spark.
pub struct SparkResources<'a> {
    pub name: &'a str,
    pub namespace: &'a str,
    pub git_repo: Option<&'a GitRepo>,
    pub database_url: &'a SecretString,
    pub secrets: &'a SparkSecrets,
    pub profile: &'a UserProfile,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SparkBundle {
    pub config_map: ConfigMap,
    pub secret: Secret,
    pub volume_claim: PersistentVolumeClaim,
    pub service: Service,
    pub deployment: Deployment,
}

#[derive(Clone, Debug, PartialEq)]
pub enum BundleResource {
    ConfigMap(ConfigMap),
    Secret(Secret),
    PersistentVolumeClaim(PersistentVolumeClaim),
    Service(Service),
    Deployment(Deployment),
}

impl BundleResource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            BundleResource::ConfigMap(_) => ResourceKind::ConfigMap,
            BundleResource::Secret(_) => ResourceKind::Secret,
            BundleResource::PersistentVolumeClaim(_) => ResourceKind::PersistentVolumeClaim,
            BundleResource::Service(_) => ResourceKind::Service,
            BundleResource::Deployment(_) => ResourceKind::Deployment,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            BundleResource::ConfigMap(o) => &o.metadata,
            BundleResource::Secret(o) => &o.metadata,
            BundleResource::PersistentVolumeClaim(o) => &o.metadata,
            BundleResource::Service(o) => &o.metadata,
            BundleResource::Deployment(o) => &o.metadata,
        }
    }

    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }
}

impl SparkBundle {
    pub fn into_creation_order(self) -> [BundleResource; 5] {
        [
            BundleResource::ConfigMap(self.config_map),
            BundleResource::Secret(self.secret),
            BundleResource::PersistentVolumeClaim(self.volume_claim),
            BundleResource::Service(self.service),
            BundleResource::Deployment(self.deployment),
        ]
    }
}

pub fn spark_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_APP.to_owned(), APP_NAME.to_owned()),
        (LABEL_SPARK_NAME.to_owned(), name.to_owned()),
    ])
}

/// Label selector matching every object (and pod) of one spark.
pub fn spark_selector(name: &str) -> String {
    format!("{SPARK_LABEL_SELECTOR},{LABEL_SPARK_NAME}={name}")
}

/// The overlay network host the spark's SSH service is published as.
pub fn ssh_hostname(name: &str) -> String {
    format!("{HOSTNAME_PREFIX}{name}")
}

pub fn ssh_destination(name: &str) -> String {
    format!("{SSH_USER}@{}", ssh_hostname(name))
}

impl SparkResources<'_> {
    pub fn build(&self) -> SparkBundle {
        SparkBundle {
            config_map: self.config_map(),
            secret: self.secret(),
            volume_claim: self.volume_claim(),
            service: self.service(),
            deployment: self.deployment(),
        }
    }

    fn metadata(&self, kind: ResourceKind) -> ObjectMeta {
        ObjectMeta {
            name: Some(kind.object_name(self.name)),
            namespace: Some(self.namespace.to_owned()),
            labels: Some(spark_labels(self.name)),
            ..ObjectMeta::default()
        }
    }

    pub fn config_map(&self) -> ConfigMap {
        let optional = |value: Option<&str>| value.unwrap_or_default().to_owned();

        ConfigMap {
            metadata: self.metadata(ResourceKind::ConfigMap),
            data: Some(BTreeMap::from([
                (
                    CONFIG_KEY_AUTHORIZED_KEYS.to_owned(),
                    self.profile.ssh_public_key.clone(),
                ),
                (
                    CONFIG_KEY_GIT_REPO.to_owned(),
                    optional(self.git_repo.map(GitRepo::as_str)),
                ),
                (
                    CONFIG_KEY_DOTFILES_REPO.to_owned(),
                    optional(self.profile.dotfiles_repo.as_ref().map(GitRepo::as_str)),
                ),
                (
                    CONFIG_KEY_GITHUB_USER.to_owned(),
                    optional(self.profile.github_user.as_deref()),
                ),
            ])),
            ..ConfigMap::default()
        }
    }

    pub fn secret(&self) -> Secret {
        let github_token = self
            .secrets
            .github_token
            .as_ref()
            .map(|token| token.expose_secret().to_owned())
            .unwrap_or_default();

        Secret {
            metadata: self.metadata(ResourceKind::Secret),
            string_data: Some(BTreeMap::from([
                (
                    SECRET_KEY_DATABASE_URL.to_owned(),
                    self.database_url.expose_secret().to_owned(),
                ),
                (
                    SECRET_KEY_ANTHROPIC_API_KEY.to_owned(),
                    self.secrets.anthropic_api_key.expose_secret().to_owned(),
                ),
                (SECRET_KEY_GITHUB_TOKEN.to_owned(), github_token),
            ])),
            ..Secret::default()
        }
    }

    pub fn volume_claim(&self) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: self.metadata(ResourceKind::PersistentVolumeClaim),
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec![ACCESS_MODE_READ_WRITE_ONCE.to_owned()]),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([(
                        "storage".to_owned(),
                        Quantity(STORAGE_SIZE.to_owned()),
                    )])),
                    ..VolumeResourceRequirements::default()
                }),
                ..PersistentVolumeClaimSpec::default()
            }),
            status: None,
        }
    }

    pub fn service(&self) -> Service {
        let mut metadata = self.metadata(ResourceKind::Service);
        metadata.annotations = Some(BTreeMap::from([(
            TAILSCALE_HOSTNAME_ANNOTATION.to_owned(),
            ssh_hostname(self.name),
        )]));

        Service {
            metadata,
            spec: Some(ServiceSpec {
                type_: Some("LoadBalancer".to_owned()),
                load_balancer_class: Some(TAILSCALE_LOAD_BALANCER_CLASS.to_owned()),
                ports: Some(vec![ServicePort {
                    name: Some(SSH_PORT_NAME.to_owned()),
                    port: SSH_PORT,
                    protocol: Some("TCP".to_owned()),
                    ..ServicePort::default()
                }]),
                selector: Some(spark_labels(self.name)),
                ..ServiceSpec::default()
            }),
            status: None,
        }
    }

    pub fn deployment(&self) -> Deployment {
        let secret_name = ResourceKind::Secret.object_name(self.name);
        let secret_env = |key: &str| EnvVar {
            name: key.to_owned(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: secret_name.clone(),
                    key: key.to_owned(),
                    ..SecretKeySelector::default()
                }),
                ..EnvVarSource::default()
            }),
            ..EnvVar::default()
        };

        let container = Container {
            name: CONTAINER_NAME.to_owned(),
            image: Some(CONTAINER_IMAGE.to_owned()),
            command: Some(vec![
                "/bin/bash".to_owned(),
                "-c".to_owned(),
                provisioning_script(),
            ]),
            ports: Some(vec![ContainerPort {
                name: Some(SSH_PORT_NAME.to_owned()),
                container_port: SSH_PORT,
                protocol: Some("TCP".to_owned()),
                ..ContainerPort::default()
            }]),
            env: Some(vec![
                secret_env(SECRET_KEY_DATABASE_URL),
                secret_env(SECRET_KEY_ANTHROPIC_API_KEY),
                EnvVar {
                    name: ENV_SPARK_NAME.to_owned(),
                    value: Some(self.name.to_owned()),
                    ..EnvVar::default()
                },
            ]),
            volume_mounts: Some(vec![
                VolumeMount {
                    name: VOLUME_NAME_STORAGE.to_owned(),
                    mount_path: USER_HOME.to_owned(),
                    ..VolumeMount::default()
                },
                VolumeMount {
                    name: VOLUME_NAME_CONFIG.to_owned(),
                    mount_path: VOLUME_MOUNT_PATH_CONFIG.to_owned(),
                    read_only: Some(true),
                    ..VolumeMount::default()
                },
                VolumeMount {
                    name: VOLUME_NAME_SECRET.to_owned(),
                    mount_path: VOLUME_MOUNT_PATH_SECRET.to_owned(),
                    read_only: Some(true),
                    ..VolumeMount::default()
                },
            ]),
            resources: Some(ResourceRequirements {
                requests: Some(BTreeMap::from([
                    ("cpu".to_owned(), Quantity(CPU_REQUEST.to_owned())),
                    ("memory".to_owned(), Quantity(MEMORY_REQUEST.to_owned())),
                ])),
                limits: Some(BTreeMap::from([
                    ("cpu".to_owned(), Quantity(CPU_LIMIT.to_owned())),
                    ("memory".to_owned(), Quantity(MEMORY_LIMIT.to_owned())),
                ])),
                ..ResourceRequirements::default()
            }),
            // sshd and the user setup need root, the session itself drops to the user.
            security_context: Some(SecurityContext {
                run_as_user: Some(0),
                allow_privilege_escalation: Some(true),
                capabilities: Some(Capabilities {
                    add: Some(vec!["SETUID".to_owned(), "SETGID".to_owned()]),
                    ..Capabilities::default()
                }),
                read_only_root_filesystem: Some(false),
                ..SecurityContext::default()
            }),
            ..Container::default()
        };

        let volumes = vec![
            Volume {
                name: VOLUME_NAME_STORAGE.to_owned(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: ResourceKind::PersistentVolumeClaim.object_name(self.name),
                    ..PersistentVolumeClaimVolumeSource::default()
                }),
                ..Volume::default()
            },
            Volume {
                name: VOLUME_NAME_CONFIG.to_owned(),
                config_map: Some(ConfigMapVolumeSource {
                    name: ResourceKind::ConfigMap.object_name(self.name),
                    ..ConfigMapVolumeSource::default()
                }),
                ..Volume::default()
            },
            Volume {
                name: VOLUME_NAME_SECRET.to_owned(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(secret_name.clone()),
                    ..SecretVolumeSource::default()
                }),
                ..Volume::default()
            },
        ];

        Deployment {
            metadata: self.metadata(ResourceKind::Deployment),
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                selector: LabelSelector {
                    match_labels: Some(spark_labels(self.name)),
                    ..LabelSelector::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(spark_labels(self.name)),
                        ..ObjectMeta::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![container],
                        volumes: Some(volumes),
                        security_context: Some(PodSecurityContext {
                            fs_group: Some(USER_UID),
                            ..PodSecurityContext::default()
                        }),
                        ..PodSpec::default()
                    }),
                },
                ..DeploymentSpec::default()
            }),
            status: None,
        }
    }
}
