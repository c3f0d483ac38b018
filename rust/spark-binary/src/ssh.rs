use std::process::ExitStatus;

use async_trait::async_trait;
use snafu::{ResultExt, Snafu, ensure};
use tokio::process::Command;
use tracing::info;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to start ssh"))]
    Spawn { source: std::io::Error },

    #[snafu(display("ssh session to {destination} ended with {status}"))]
    SessionFailed {
        destination: String,
        status: ExitStatus,
    },
}

/// Opens an interactive session on a spark.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    async fn open(&self, destination: &str) -> Result<(), Error>;
}

/// Runs the local `ssh` client attached to the current terminal.
pub struct SshShell;

#[async_trait]
impl RemoteShell for SshShell {
    async fn open(&self, destination: &str) -> Result<(), Error> {
        info!(destination, "Opening SSH session");

        // stdio is inherited by default.
        let status = Command::new("ssh")
            .arg(destination)
            .status()
            .await
            .context(SpawnSnafu)?;

        ensure!(
            status.success(),
            SessionFailedSnafu {
                destination,
                status
            }
        );
        Ok(())
    }
}
