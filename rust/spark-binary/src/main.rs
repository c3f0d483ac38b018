use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use homelab_spark_core::{
    bundle::ssh_destination,
    client::{self, Client},
    constants::{READINESS_ATTEMPTS, READINESS_INTERVAL},
    names::{self, validate_spark_name},
    poll::{PollConfig, PollLimit},
    script::GitRepo,
};
use snafu::{ResultExt, Snafu};
use strum::{EnumDiscriminants, IntoStaticStr};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::{
    cluster::KubeSparkCluster,
    config::SparkArgs,
    db::PostgresAdmin,
    lifecycle::{CreateSettings, Readiness, ShellSession, SparkCreated},
    ssh::SshShell,
};

mod cluster;
mod config;
mod db;
mod lifecycle;
mod ssh;

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

const LOG_ENV: &str = "SPARK_LOG";

#[derive(Parser)]
#[clap(about, author, version = built_info::PKG_VERSION)]
struct Opts {
    #[clap(subcommand)]
    cmd: Command,

    #[clap(flatten)]
    args: SparkArgs,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new spark: a Debian workload with SSH, Claude Code and dotfiles,
    /// reachable over Tailscale, with a dedicated PostgreSQL database.
    Create {
        /// Git repository to clone into the spark.
        #[arg(short, long)]
        repo: Option<GitRepo>,

        /// Do not open an SSH session once the spark is ready.
        #[arg(long)]
        no_shell: bool,
    },

    /// Delete a spark, its cluster objects and its database.
    Delete { name: String },

    /// List all sparks.
    List {
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },

    /// SSH into an existing spark.
    Shell { name: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
enum Error {
    #[snafu(display("failed to load configuration"))]
    LoadConfig { source: config::Error },

    #[snafu(display("invalid spark name"))]
    InvalidSparkName { source: names::Error },

    #[snafu(display("failed to connect to the database server"))]
    ConnectDatabase { source: db::Error },

    #[snafu(display("failed to connect to the cluster"))]
    ConnectCluster { source: client::Error },

    #[snafu(display("{source}"))]
    Workflow { source: lifecycle::Error },

    #[snafu(display("failed to render output"))]
    RenderJson { source: serde_json::Error },
}

impl Error {
    fn category(&self) -> &'static str {
        match self {
            Error::Workflow { source } => source.category(),
            _ => ErrorDiscriminants::from(self).into(),
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
    let args = opts.args;

    match opts.cmd {
        Command::Create { repo, no_shell } => {
            let create_config = args
                .create_config(home_dir().as_deref())
                .context(LoadConfigSnafu)?;
            let postgres = args.postgres_config().context(LoadConfigSnafu)?;

            let database = PostgresAdmin::connect(&postgres)
                .await
                .context(ConnectDatabaseSnafu)?;
            let cluster = kube_cluster(&args.namespace).await?;

            let cancel = CancellationToken::new();
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::warn!("Interrupted, no longer waiting for the spark");
                        cancel.cancel();
                    }
                }
            });

            let settings = CreateSettings {
                namespace: &args.namespace,
                git_repo: repo.as_ref(),
                postgres: &postgres,
                config: &create_config,
                readiness: PollConfig {
                    interval: READINESS_INTERVAL,
                    limit: PollLimit::Attempts(READINESS_ATTEMPTS),
                },
                open_shell: !no_shell,
            };
            let created = lifecycle::create_spark(
                &cluster,
                &database,
                &SshShell,
                &settings,
                &mut rand::rng(),
                &cancel,
            )
            .await
            .context(WorkflowSnafu)?;

            print_created(&created, repo.as_ref());
        }
        Command::Delete { name } => {
            validate_spark_name(&name).context(InvalidSparkNameSnafu)?;
            let postgres = args.postgres_config().context(LoadConfigSnafu)?;
            let database = PostgresAdmin::connect(&postgres)
                .await
                .context(ConnectDatabaseSnafu)?;
            let cluster = kube_cluster(&args.namespace).await?;

            let deleted = lifecycle::delete_spark(&cluster, &database, &name)
                .await
                .context(WorkflowSnafu)?;
            println!(
                "Spark {} deleted ({} objects removed, {} already gone)",
                deleted.name,
                deleted.removed.len(),
                deleted.already_absent.len()
            );
        }
        Command::List { output } => {
            let cluster = kube_cluster(&args.namespace).await?;
            let sparks = lifecycle::list_sparks(&cluster)
                .await
                .context(WorkflowSnafu)?;

            match output {
                OutputFormat::Table => print!("{}", lifecycle::render_text(&sparks)),
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&sparks).context(RenderJsonSnafu)?
                ),
            }
        }
        Command::Shell { name } => {
            validate_spark_name(&name).context(InvalidSparkNameSnafu)?;
            let cluster = kube_cluster(&args.namespace).await?;
            println!("Connecting to spark: {name}");
            lifecycle::open_shell(&cluster, &SshShell, &name)
                .await
                .context(WorkflowSnafu)?;
        }
    }
    Ok(())
}

async fn kube_cluster(namespace: &str) -> Result<KubeSparkCluster, Error> {
    let client = Client::try_default(namespace)
        .await
        .context(ConnectClusterSnafu)?;
    Ok(KubeSparkCluster::new(client))
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(PathBuf::from)
}

fn print_created(created: &SparkCreated, repo: Option<&GitRepo>) {
    print!("{}", created_message(created, repo));
}

fn created_message(created: &SparkCreated, repo: Option<&GitRepo>) -> String {
    let name = &created.name;
    let destination = ssh_destination(name);
    let mut out = String::new();

    match created.readiness {
        Readiness::Ready => {
            out += "Spark Details:\n";
            out += &format!("  Name:     {name}\n");
            out += &format!("  Database: {name}\n");
            out += &format!("  SSH:      ssh {destination}\n");
            if let Some(repo) = repo {
                out += &format!("  Git Repo: {repo}\n");
            }
        }
        Readiness::NotReady => {
            out += &format!(
                "Spark {name} created but its pod was not running after {} checks.\n",
                created.readiness_checks
            );
            out += &format!("You can connect later with: spark shell {name}\n");
        }
        Readiness::Cancelled => {
            out += &format!("Stopped waiting for spark {name}. It was created and keeps starting.\n");
            out += &format!("You can connect later with: spark shell {name}\n");
        }
    }

    if let ShellSession::Failed(_) = created.session {
        out += &format!("You can try connecting manually with: ssh {destination}\n");
    }
    out
}
