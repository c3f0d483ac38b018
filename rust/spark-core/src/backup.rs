//! Objects for a one-off copy of a workload's data directory into a fresh claim.

use std::collections::BTreeMap;

use indoc::formatdoc;
use k8s_openapi::{
    api::{
        batch::v1::{Job, JobSpec},
        core::v1::{
            Container, PersistentVolumeClaim, PersistentVolumeClaimSpec,
            PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, Volume, VolumeMount,
            VolumeResourceRequirements,
        },
    },
    apimachinery::pkg::{api::resource::Quantity, apis::meta::v1::ObjectMeta},
};

use crate::constants::*;

/// Where to copy from and what to create.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BackupConfig {
    pub namespace: String,
    pub pod: String,
    pub container: String,
    pub source_path: String,
    pub size: String,
    pub storage_class: String,
    pub name: String,
    pub service_account: String,
    pub image: String,
}

impl BackupConfig {
    pub fn job_name(&self) -> String {
        format!("{}{BACKUP_JOB_SUFFIX}", self.name)
    }

    /// The durable claim the data ends up in. `created` is the `YYYY-MM-DD` label value.
    pub fn volume_claim(&self, created: &str) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(BTreeMap::from([
                    (LABEL_APP.to_owned(), BACKUP_APP_LABEL.to_owned()),
                    (BACKUP_LABEL_CREATED.to_owned(), created.to_owned()),
                ])),
                ..ObjectMeta::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec![ACCESS_MODE_READ_WRITE_ONCE.to_owned()]),
                storage_class_name: Some(self.storage_class.clone()),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([(
                        "storage".to_owned(),
                        Quantity(self.size.clone()),
                    )])),
                    ..VolumeResourceRequirements::default()
                }),
                ..PersistentVolumeClaimSpec::default()
            }),
            status: None,
        }
    }

    /// The job streaming the source directory out of the pod into the claim.
    ///
    /// The source coordinates are passed as positional arguments to the shell,
    /// the script text itself is constant.
    pub fn copy_job(&self) -> Job {
        let command = vec![
            "/bin/bash".to_owned(),
            "-c".to_owned(),
            copy_script(),
            BACKUP_CONTAINER_NAME.to_owned(),
            self.namespace.clone(),
            self.pod.clone(),
            self.container.clone(),
            self.source_path.clone(),
        ];

        Job {
            metadata: ObjectMeta {
                name: Some(self.job_name()),
                namespace: Some(self.namespace.clone()),
                labels: Some(BTreeMap::from([(
                    LABEL_APP.to_owned(),
                    BACKUP_APP_LABEL.to_owned(),
                )])),
                ..ObjectMeta::default()
            },
            spec: Some(JobSpec {
                backoff_limit: Some(BACKUP_JOB_BACKOFF_LIMIT),
                ttl_seconds_after_finished: Some(BACKUP_JOB_TTL_SECONDS),
                template: PodTemplateSpec {
                    metadata: None,
                    spec: Some(PodSpec {
                        service_account_name: Some(self.service_account.clone()),
                        restart_policy: Some("Never".to_owned()),
                        containers: vec![Container {
                            name: BACKUP_CONTAINER_NAME.to_owned(),
                            image: Some(self.image.clone()),
                            command: Some(command),
                            volume_mounts: Some(vec![VolumeMount {
                                name: BACKUP_VOLUME_NAME.to_owned(),
                                mount_path: BACKUP_MOUNT_PATH.to_owned(),
                                ..VolumeMount::default()
                            }]),
                            ..Container::default()
                        }],
                        volumes: Some(vec![Volume {
                            name: BACKUP_VOLUME_NAME.to_owned(),
                            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                                claim_name: self.name.clone(),
                                ..PersistentVolumeClaimVolumeSource::default()
                            }),
                            ..Volume::default()
                        }]),
                        ..PodSpec::default()
                    }),
                },
                ..JobSpec::default()
            }),
            status: None,
        }
    }
}

fn copy_script() -> String {
    formatdoc! {r#"
        set -euo pipefail
        NAMESPACE="$1"
        POD="$2"
        CONTAINER="$3"
        SOURCE_PATH="$4"

        echo "Starting backup process..."
        echo "Source pod: $POD"
        echo "Source path: $SOURCE_PATH"
        echo "Backup destination: {BACKUP_MOUNT_PATH}"

        kubectl exec -n "$NAMESPACE" "$POD" -c "$CONTAINER" -- tar czf - -C "$SOURCE_PATH" . | tar xzf - -C {BACKUP_MOUNT_PATH}

        echo "Backup completed successfully!"
        ls -lah {BACKUP_MOUNT_PATH}
    "#}
}
