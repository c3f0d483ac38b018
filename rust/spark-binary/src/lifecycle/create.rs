use std::convert::Infallible;

use homelab_spark_core::{
    bundle::{SparkResources, ssh_destination},
    constants::POD_PHASE_RUNNING,
    names,
    poll::{PollConfig, PollOutcome, poll},
    script::GitRepo,
};
use rand::Rng;
use snafu::{OptionExt, ResultExt};
use strum::Display;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn};
use tracing_futures::Instrument;

use super::{
    BuildDatabaseUrlSnafu, CreateDatabaseSnafu, Error, ListSparksSnafu, NameSpaceExhaustedSnafu,
    SubmitResourceSnafu,
};
use crate::{
    cluster::SparkCluster,
    config::{CreateConfig, PostgresConfig},
    db::DatabaseAdmin,
    ssh::{self, RemoteShell},
};

/// How often a fresh name is drawn when the previous one is taken.
pub const NAME_ATTEMPTS: usize = 10;

pub struct CreateSettings<'a> {
    pub namespace: &'a str,
    pub git_repo: Option<&'a GitRepo>,
    pub postgres: &'a PostgresConfig,
    pub config: &'a CreateConfig,
    pub readiness: PollConfig,
    pub open_shell: bool,
}

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum Readiness {
    Ready,
    /// The pod did not reach `Running` in time. The spark exists nonetheless.
    NotReady,
    /// The wait was interrupted. The spark exists nonetheless.
    Cancelled,
}

#[derive(Debug)]
pub enum ShellSession {
    Skipped,
    Closed,
    Failed(ssh::Error),
}

#[derive(Debug)]
pub struct SparkCreated {
    pub name: String,
    pub readiness: Readiness,
    pub readiness_checks: u32,
    pub session: ShellSession,
}

pub async fn create_spark<R: Rng + ?Sized>(
    cluster: &dyn SparkCluster,
    database: &dyn DatabaseAdmin,
    shell: &dyn RemoteShell,
    settings: &CreateSettings<'_>,
    rng: &mut R,
    cancel: &CancellationToken,
) -> Result<SparkCreated, Error> {
    let taken = cluster.list_spark_names().await.context(ListSparksSnafu)?;
    let name = names::generate_unused(rng, &taken, NAME_ATTEMPTS).context(
        NameSpaceExhaustedSnafu {
            attempts: NAME_ATTEMPTS,
        },
    )?;

    let span = info_span!("create_spark", spark = %name);
    async move {
        info!("Creating spark");

        database
            .create_database(&name)
            .await
            .context(CreateDatabaseSnafu { name: &name })?;

        if let Err(submit_error) = submit_bundle(cluster, settings, &name).await {
            warn!("Submitting the spark failed, dropping its database again");
            if let Err(drop_error) = database.drop_database(&name).await {
                error!(
                    error = %drop_error,
                    "Failed to drop the database after a failed submission, it has to be dropped manually"
                );
            }
            return Err(submit_error);
        }

        let (readiness, readiness_checks) =
            wait_for_running_pod(cluster, &name, settings.readiness, cancel).await;
        match readiness {
            Readiness::Ready => info!(readiness_checks, "Spark is ready"),
            Readiness::NotReady => warn!(readiness_checks, "Spark pod is not running yet"),
            Readiness::Cancelled => warn!(readiness_checks, "Stopped waiting for the spark pod"),
        }

        let session = if readiness == Readiness::Ready && settings.open_shell {
            match shell.open(&ssh_destination(&name)).await {
                Ok(()) => ShellSession::Closed,
                Err(shell_error) => {
                    warn!(error = %shell_error, "SSH session failed, the spark is left running");
                    ShellSession::Failed(shell_error)
                }
            }
        } else {
            ShellSession::Skipped
        };

        Ok(SparkCreated {
            name,
            readiness,
            readiness_checks,
            session,
        })
    }
    .instrument(span)
    .await
}

async fn submit_bundle(
    cluster: &dyn SparkCluster,
    settings: &CreateSettings<'_>,
    name: &str,
) -> Result<(), Error> {
    let database_url = settings
        .postgres
        .spark_database_url(name)
        .context(BuildDatabaseUrlSnafu { name })?;

    let bundle = SparkResources {
        name,
        namespace: settings.namespace,
        git_repo: settings.git_repo,
        database_url: &database_url,
        secrets: &settings.config.secrets,
        profile: &settings.config.profile,
    }
    .build();

    for resource in bundle.into_creation_order() {
        let kind = resource.kind();
        cluster
            .create_resource(resource)
            .await
            .context(SubmitResourceSnafu { kind, name })?;
        info!(%kind, "Submitted");
    }
    Ok(())
}

/// Query errors count as "not running yet".
async fn wait_for_running_pod(
    cluster: &dyn SparkCluster,
    name: &str,
    config: PollConfig,
    cancel: &CancellationToken,
) -> (Readiness, u32) {
    let outcome = poll(config, cancel, |attempt| async move {
        match cluster.pod_phases(name).await {
            Ok(phases) => Ok::<_, Infallible>(
                phases
                    .iter()
                    .any(|phase| phase == POD_PHASE_RUNNING)
                    .then_some(()),
            ),
            Err(query_error) => {
                debug!(attempt, error = %query_error, "Pod status query failed");
                Ok(None)
            }
        }
    })
    .await
    .unwrap_or_else(|never| match never {});

    match outcome {
        PollOutcome::Done { attempts, .. } => (Readiness::Ready, attempts),
        PollOutcome::Exhausted { attempts } => (Readiness::NotReady, attempts),
        PollOutcome::Cancelled { attempts } => (Readiness::Cancelled, attempts),
    }
}
