use std::{path::PathBuf, time::Duration};

use chrono::{DateTime, Local};
use clap::Parser;
use homelab_spark_core::{
    backup::BackupConfig,
    client::{self, Client},
    constants::{JOB_POLL_INTERVAL, JOB_TIMEOUT},
    poll::{PollConfig, PollLimit},
};
use snafu::{ResultExt, Snafu};
use strum::{EnumDiscriminants, IntoStaticStr};
use tokio_util::sync::CancellationToken;
use tracing::info_span;
use tracing_futures::Instrument;
use tracing_subscriber::EnvFilter;

use crate::job::{BackupCompleted, KubeBackupCluster};

mod job;

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

const LOG_ENV: &str = "VOLUME_BACKUP_LOG";
const DEFAULT_NAME_PREFIX: &str = "uptime-kuma-backup-";

/// Copy a directory out of a running pod into a new, durable volume claim.
#[derive(Parser)]
#[clap(about, author, version = built_info::PKG_VERSION)]
struct Opts {
    /// Namespace the source pod runs in. The claim and the job are created there too.
    #[arg(long, default_value = "uptime-kuma")]
    namespace: String,

    /// Pod to copy from.
    #[arg(long, default_value = "uptime-kuma-0")]
    pod: String,

    /// Container in the pod to copy from.
    #[arg(long, default_value = "uptime-kuma")]
    container: String,

    /// Directory inside the container to back up.
    #[arg(long, default_value = "/app/data")]
    source: String,

    /// Size of the backup volume claim.
    #[arg(long, default_value = "5Gi")]
    size: String,

    #[arg(long, default_value = "local-path")]
    storage_class: String,

    /// Name of the backup volume claim [default: uptime-kuma-backup-<YYYYMMDD-HHMMSS>].
    #[arg(long)]
    name: Option<String>,

    /// Service account allowed to exec into the source pod.
    #[arg(long, default_value = "uptime-kuma")]
    service_account: String,

    /// Image providing kubectl and tar.
    #[arg(long, default_value = "bitnami/kubectl:latest")]
    image: String,

    /// Kubeconfig to use instead of the default lookup.
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// How long to wait for the copy job to finish.
    #[arg(long, default_value_t = JOB_TIMEOUT.as_secs())]
    timeout_seconds: u64,
}

impl Opts {
    fn backup_config(&self, now: &DateTime<Local>) -> BackupConfig {
        BackupConfig {
            namespace: self.namespace.clone(),
            pod: self.pod.clone(),
            container: self.container.clone(),
            source_path: self.source.clone(),
            size: self.size.clone(),
            storage_class: self.storage_class.clone(),
            name: self.name.clone().unwrap_or_else(|| default_backup_name(now)),
            service_account: self.service_account.clone(),
            image: self.image.clone(),
        }
    }
}

fn default_backup_name(now: &DateTime<Local>) -> String {
    format!("{DEFAULT_NAME_PREFIX}{}", now.format("%Y%m%d-%H%M%S"))
}

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
enum Error {
    #[snafu(display("failed to connect to the cluster"))]
    ConnectCluster { source: client::Error },

    #[snafu(display("{source}"))]
    Backup { source: job::Error },
}

impl Error {
    fn category(&self) -> &'static str {
        match self {
            Error::Backup { source } => source.category(),
            Error::ConnectCluster { .. } => ErrorDiscriminants::from(self).into(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(
        built_info.pkg_version = built_info::PKG_VERSION,
        built_info.target = built_info::TARGET,
        built_info.built_time_utc = built_info::BUILT_TIME_UTC,
        built_info.rustc_version = built_info::RUSTC_VERSION,
        "Starting {description}",
        description = built_info::PKG_DESCRIPTION
    );

    if let Err(error) = run(opts).await {
        tracing::error!(category = error.category(), "{error}");
        return Err(error.into());
    }
    Ok(())
}

async fn run(opts: Opts) -> Result<(), Error> {
    let now = Local::now();
    let config = opts.backup_config(&now);

    let client = match &opts.kubeconfig {
        Some(path) => Client::from_kubeconfig(path, &config.namespace).await,
        None => Client::try_default(&config.namespace).await,
    }
    .context(ConnectClusterSnafu)?;
    let cluster = KubeBackupCluster::new(client);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, the backup job is left running");
                cancel.cancel();
            }
        }
    });

    let wait = PollConfig {
        interval: JOB_POLL_INTERVAL,
        limit: PollLimit::Elapsed(Duration::from_secs(opts.timeout_seconds)),
    };
    let created = now.format("%Y-%m-%d").to_string();

    let completed = job::run_backup(&cluster, &config, &created, wait, &cancel)
        .instrument(info_span!("backup", name = %config.name))
        .await
        .context(BackupSnafu)?;

    print_completed(&completed, &config);
    Ok(())
}

fn print_completed(completed: &BackupCompleted, config: &BackupConfig) {
    println!("Backup completed successfully!");
    println!();
    println!("Backup details:");
    println!("  PVC Name:  {}", completed.claim);
    println!("  Namespace: {}", config.namespace);
    println!("  Size:      {}", config.size);
    println!("  Job:       {}", completed.job);
    println!();
    println!(
        "To restore from this backup, mount the PVC '{}' into a pod.",
        completed.claim
    );
}
