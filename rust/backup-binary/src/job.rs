//! Provisions the backup claim, starts the copy job and waits for it to finish.

use std::time::Duration;

use async_trait::async_trait;
use homelab_spark_core::{
    backup::BackupConfig,
    client::{self, Client},
    constants::{BACKUP_JOB_BACKOFF_LIMIT, JOB_NAME_LABEL},
    poll::{PollConfig, PollLimit, PollOutcome, poll},
};
use k8s_openapi::api::{
    batch::v1::{Job, JobStatus},
    core::v1::{PersistentVolumeClaim, Pod},
};
use snafu::{OptionExt, ResultExt, Snafu};
use strum::{EnumDiscriminants, IntoStaticStr};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to create backup volume claim {name:?}"))]
    CreateVolumeClaim { source: client::Error, name: String },

    #[snafu(display("failed to create backup job {name:?}"))]
    CreateJob { source: client::Error, name: String },

    #[snafu(display("failed to read status of backup job {name:?}"))]
    QueryJob { source: client::Error, name: String },

    #[snafu(display("backup job {name:?} disappeared while waiting for it"))]
    JobMissing { name: String },

    #[snafu(display("backup job {name:?} failed, check logs with: {logs_hint}"))]
    JobFailed { name: String, logs_hint: String },

    #[snafu(display(
        "backup job {name:?} did not finish within {timeout:?}, it may still be running"
    ))]
    JobTimedOut { name: String, timeout: Duration },

    #[snafu(display("stopped waiting for backup job {name:?}, it may still be running"))]
    Cancelled { name: String },
}

impl Error {
    pub fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }
}

#[async_trait]
pub trait BackupCluster: Send + Sync {
    async fn create_volume_claim(
        &self,
        claim: &PersistentVolumeClaim,
    ) -> Result<(), client::Error>;

    async fn create_job(&self, job: &Job) -> Result<(), client::Error>;

    /// `None` when the job does not exist (any more).
    async fn job_status(&self, name: &str) -> Result<Option<JobStatus>, client::Error>;

    async fn job_pod_names(&self, job: &str) -> Result<Vec<String>, client::Error>;
}

pub struct KubeBackupCluster {
    client: Client,
}

impl KubeBackupCluster {
    pub fn new(client: Client) -> Self {
        KubeBackupCluster { client }
    }
}

#[async_trait]
impl BackupCluster for KubeBackupCluster {
    async fn create_volume_claim(
        &self,
        claim: &PersistentVolumeClaim,
    ) -> Result<(), client::Error> {
        self.client.create(claim).await.map(drop)
    }

    async fn create_job(&self, job: &Job) -> Result<(), client::Error> {
        self.client.create(job).await.map(drop)
    }

    async fn job_status(&self, name: &str) -> Result<Option<JobStatus>, client::Error> {
        let job = self.client.get_opt::<Job>(name).await?;
        Ok(job.map(|job| job.status.unwrap_or_default()))
    }

    async fn job_pod_names(&self, job: &str) -> Result<Vec<String>, client::Error> {
        let pods = self
            .client
            .list::<Pod>(&format!("{JOB_NAME_LABEL}={job}"))
            .await?;
        Ok(pods
            .into_iter()
            .filter_map(|pod| pod.metadata.name)
            .collect())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum JobState {
    Succeeded,
    Failed,
}

impl JobState {
    /// `None` while the job is still running or retrying.
    fn of(status: &JobStatus) -> Option<Self> {
        if status.succeeded.unwrap_or(0) > 0 {
            return Some(JobState::Succeeded);
        }

        let failed_condition = status.conditions.iter().flatten().any(|condition| {
            condition.type_ == "Failed" && condition.status == "True"
        });
        if failed_condition || status.failed.unwrap_or(0) > BACKUP_JOB_BACKOFF_LIMIT {
            return Some(JobState::Failed);
        }
        None
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BackupCompleted {
    pub claim: String,
    pub job: String,
    pub status_checks: u32,
}

/// Creates the claim and the copy job, then waits for the job to finish.
///
/// `created` is the `YYYY-MM-DD` label put on the claim.
pub async fn run_backup(
    cluster: &dyn BackupCluster,
    config: &BackupConfig,
    created: &str,
    wait: PollConfig,
    cancel: &CancellationToken,
) -> Result<BackupCompleted, Error> {
    info!(claim = config.name, "Creating backup volume claim");
    cluster
        .create_volume_claim(&config.volume_claim(created))
        .await
        .context(CreateVolumeClaimSnafu { name: &config.name })?;

    let job_name = config.job_name();
    info!(job = job_name, "Creating backup job");
    cluster
        .create_job(&config.copy_job())
        .await
        .context(CreateJobSnafu { name: &job_name })?;

    info!(job = job_name, "Waiting for backup to complete");
    let status_checks =
        wait_for_job_completion(cluster, &config.namespace, &job_name, wait, cancel).await?;

    Ok(BackupCompleted {
        claim: config.name.clone(),
        job: job_name,
        status_checks,
    })
}

/// Returns the number of status checks it took for the job to succeed.
pub async fn wait_for_job_completion(
    cluster: &dyn BackupCluster,
    namespace: &str,
    job: &str,
    wait: PollConfig,
    cancel: &CancellationToken,
) -> Result<u32, Error> {
    let outcome = poll(wait, cancel, |attempt| async move {
        let status = cluster
            .job_status(job)
            .await
            .context(QueryJobSnafu { name: job })?
            .context(JobMissingSnafu { name: job })?;
        let state = JobState::of(&status);
        debug!(attempt, ?state, "Checked backup job");
        Ok::<_, Error>(state)
    })
    .await?;

    match outcome {
        PollOutcome::Done {
            value: JobState::Succeeded,
            attempts,
        } => {
            info!(job, attempts, "Backup job succeeded");
            Ok(attempts)
        }
        PollOutcome::Done {
            value: JobState::Failed,
            ..
        } => JobFailedSnafu {
            name: job,
            logs_hint: logs_hint(cluster, namespace, job).await,
        }
        .fail(),
        PollOutcome::Exhausted { .. } => JobTimedOutSnafu {
            name: job,
            timeout: match wait.limit {
                PollLimit::Elapsed(timeout) => timeout,
                PollLimit::Attempts(attempts) => wait.interval * attempts,
            },
        }
        .fail(),
        PollOutcome::Cancelled { .. } => CancelledSnafu { name: job }.fail(),
    }
}

/// Points at the job's pod, falling back to the job itself when no pod is found.
async fn logs_hint(cluster: &dyn BackupCluster, namespace: &str, job: &str) -> String {
    match cluster.job_pod_names(job).await {
        Ok(pods) if !pods.is_empty() => format!("kubectl logs -n {namespace} {}", pods[0]),
        Ok(_) => format!("kubectl logs -n {namespace} job/{job}"),
        Err(error) => {
            warn!(job, %error, "Failed to look up the pod of the failed job");
            format!("kubectl logs -n {namespace} job/{job}")
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use homelab_spark_core::constants::{JOB_POLL_INTERVAL, JOB_TIMEOUT};
    use k8s_openapi::api::batch::v1::JobCondition;
    use kube::error::ErrorResponse;
    use rstest::rstest;

    use super::*;

    #[derive(Clone, Debug, Eq, PartialEq)]
    enum Call {
        CreateClaim(String),
        CreateJob(String),
        JobStatus(String),
        JobPods(String),
    }

    #[derive(Default)]
    struct FakeCluster {
        calls: Mutex<Vec<Call>>,
        /// Status returned per query, the last one repeats.
        statuses: Vec<JobStatus>,
        pods: Vec<String>,
        fail_claim: bool,
        /// Status queries from this number on fail.
        failing_query: Option<usize>,
    }

    fn api_error() -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_owned(),
            message: "injected".to_owned(),
            reason: "InternalError".to_owned(),
            code: 500,
        })
    }

    impl FakeCluster {
        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn status_queries(&self) -> usize {
            self.calls()
                .iter()
                .filter(|call| matches!(call, Call::JobStatus(_)))
                .count()
        }
    }

    #[async_trait]
    impl BackupCluster for FakeCluster {
        async fn create_volume_claim(
            &self,
            claim: &PersistentVolumeClaim,
        ) -> Result<(), client::Error> {
            let name = claim.metadata.name.clone().unwrap_or_default();
            self.record(Call::CreateClaim(name.clone()));
            if self.fail_claim {
                return Err(client::Error::AlreadyExists {
                    kind: "PersistentVolumeClaim".to_owned(),
                    name,
                });
            }
            Ok(())
        }

        async fn create_job(&self, job: &Job) -> Result<(), client::Error> {
            self.record(Call::CreateJob(job.metadata.name.clone().unwrap_or_default()));
            Ok(())
        }

        async fn job_status(&self, name: &str) -> Result<Option<JobStatus>, client::Error> {
            self.record(Call::JobStatus(name.to_owned()));
            let query = self.status_queries();
            if self.failing_query.is_some_and(|failing| query >= failing) {
                return Err(client::Error::GetObject {
                    source: api_error(),
                    kind: "Job".to_owned(),
                    name: name.to_owned(),
                });
            }
            let index = (query - 1).min(self.statuses.len().saturating_sub(1));
            Ok(self.statuses.get(index).cloned())
        }

        async fn job_pod_names(&self, job: &str) -> Result<Vec<String>, client::Error> {
            self.record(Call::JobPods(job.to_owned()));
            Ok(self.pods.clone())
        }
    }

    fn running() -> JobStatus {
        JobStatus {
            active: Some(1),
            ..JobStatus::default()
        }
    }

    fn succeeded() -> JobStatus {
        JobStatus {
            succeeded: Some(1),
            ..JobStatus::default()
        }
    }

    fn failed() -> JobStatus {
        JobStatus {
            failed: Some(4),
            conditions: Some(vec![JobCondition {
                type_: "Failed".to_owned(),
                status: "True".to_owned(),
                reason: Some("BackoffLimitExceeded".to_owned()),
                ..JobCondition::default()
            }]),
            ..JobStatus::default()
        }
    }

    fn config() -> BackupConfig {
        BackupConfig {
            namespace: "uptime-kuma".to_owned(),
            pod: "uptime-kuma-0".to_owned(),
            container: "uptime-kuma".to_owned(),
            source_path: "/app/data".to_owned(),
            size: "5Gi".to_owned(),
            storage_class: "local-path".to_owned(),
            name: "uptime-kuma-backup-20251019-101500".to_owned(),
            service_account: "uptime-kuma".to_owned(),
            image: "bitnami/kubectl:latest".to_owned(),
        }
    }

    fn wait() -> PollConfig {
        PollConfig {
            interval: JOB_POLL_INTERVAL,
            limit: PollLimit::Elapsed(JOB_TIMEOUT),
        }
    }

    async fn run(cluster: &FakeCluster) -> Result<BackupCompleted, Error> {
        run_backup(
            cluster,
            &config(),
            "2025-10-19",
            wait(),
            &CancellationToken::new(),
        )
        .await
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(50)]
    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_poll(#[case] succeeded_on: usize) {
        let mut statuses = vec![running(); succeeded_on - 1];
        statuses.push(succeeded());
        let cluster = FakeCluster {
            statuses,
            ..FakeCluster::default()
        };

        let completed = run(&cluster).await.unwrap();
        assert_eq!(succeeded_on as u32, completed.status_checks);
        assert_eq!("uptime-kuma-backup-20251019-101500", completed.claim);
        assert_eq!("uptime-kuma-backup-20251019-101500-job", completed.job);

        let calls = cluster.calls();
        assert_eq!(
            Call::CreateClaim("uptime-kuma-backup-20251019-101500".to_owned()),
            calls[0]
        );
        assert_eq!(
            Call::CreateJob("uptime-kuma-backup-20251019-101500-job".to_owned()),
            calls[1]
        );
        assert_eq!(succeeded_on, cluster.status_queries());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job_points_at_pod() {
        let cluster = FakeCluster {
            statuses: vec![running(), failed()],
            pods: vec!["uptime-kuma-backup-20251019-101500-job-x7k2p".to_owned()],
            ..FakeCluster::default()
        };

        let error = run(&cluster).await.unwrap_err();
        match error {
            Error::JobFailed { logs_hint, .. } => assert_eq!(
                "kubectl logs -n uptime-kuma uptime-kuma-backup-20251019-101500-job-x7k2p",
                logs_hint
            ),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(2, cluster.status_queries());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job_without_pod() {
        let cluster = FakeCluster {
            statuses: vec![failed()],
            ..FakeCluster::default()
        };

        let error = run(&cluster).await.unwrap_err();
        assert!(
            error
                .to_string()
                .ends_with("kubectl logs -n uptime-kuma job/uptime-kuma-backup-20251019-101500-job"),
            "{error}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrying_job_is_not_failed_yet() {
        let retrying = JobStatus {
            failed: Some(1),
            active: Some(1),
            ..JobStatus::default()
        };
        let cluster = FakeCluster {
            statuses: vec![retrying, succeeded()],
            ..FakeCluster::default()
        };

        assert_eq!(2, run(&cluster).await.unwrap().status_checks);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out() {
        let cluster = FakeCluster {
            statuses: vec![running()],
            ..FakeCluster::default()
        };

        let error = run(&cluster).await.unwrap_err();
        assert!(
            matches!(error, Error::JobTimedOut { timeout, .. } if timeout == JOB_TIMEOUT),
            "{error:?}"
        );
        // One check right away, then every 2 seconds up to the 5 minute mark.
        assert_eq!(151, cluster.status_queries());
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_error_aborts_wait() {
        let cluster = FakeCluster {
            statuses: vec![running()],
            failing_query: Some(3),
            ..FakeCluster::default()
        };

        let error = run(&cluster).await.unwrap_err();
        assert_eq!("QueryJob", error.category());
        assert_eq!(3, cluster.status_queries());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_job() {
        let cluster = FakeCluster::default();
        let error = run(&cluster).await.unwrap_err();
        assert_eq!("JobMissing", error.category());
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_failure_skips_job() {
        let cluster = FakeCluster {
            fail_claim: true,
            ..FakeCluster::default()
        };

        let error = run(&cluster).await.unwrap_err();
        assert_eq!("CreateVolumeClaim", error.category());
        assert_eq!(
            vec![Call::CreateClaim(
                "uptime-kuma-backup-20251019-101500".to_owned()
            )],
            cluster.calls()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait() {
        let cluster = FakeCluster {
            statuses: vec![running()],
            ..FakeCluster::default()
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let error = run_backup(&cluster, &config(), "2025-10-19", wait(), &cancel)
            .await
            .unwrap_err();
        assert_eq!("Cancelled", error.category());
        assert_eq!(0, cluster.status_queries());
    }
}
