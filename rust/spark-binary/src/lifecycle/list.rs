use std::fmt::Write;

use homelab_spark_core::bundle::ssh_destination;
use serde::Serialize;
use snafu::ResultExt;
use strum::Display;
use tracing::warn;

use super::{Error, ListSparksSnafu};
use crate::cluster::SparkCluster;

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq, Serialize)]
pub enum SparkStatus {
    Ready,
    #[strum(serialize = "Not Ready")]
    NotReady,
    /// The status query failed.
    Unknown,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SparkSummary {
    pub name: String,
    pub status: SparkStatus,
    pub ssh: String,
    pub database: String,
}

/// Lists every spark workload. A failing status query degrades that entry to
/// [`SparkStatus::Unknown`] instead of failing the listing.
pub async fn list_sparks(cluster: &dyn SparkCluster) -> Result<Vec<SparkSummary>, Error> {
    let names = cluster.list_spark_names().await.context(ListSparksSnafu)?;

    let mut summaries = Vec::with_capacity(names.len());
    for name in names {
        let status = match cluster.workload_ready_replicas(&name).await {
            Ok(Some(ready)) if ready > 0 => SparkStatus::Ready,
            Ok(Some(_)) => SparkStatus::NotReady,
            Ok(None) => {
                warn!(spark = name, "Workload disappeared while listing");
                SparkStatus::Unknown
            }
            Err(error) => {
                warn!(spark = name, %error, "Failed to query spark status");
                SparkStatus::Unknown
            }
        };
        summaries.push(SparkSummary {
            ssh: format!("ssh {}", ssh_destination(&name)),
            database: name.clone(),
            name,
            status,
        });
    }
    Ok(summaries)
}

pub fn render_text(sparks: &[SparkSummary]) -> String {
    if sparks.is_empty() {
        return "No sparks found\n".to_owned();
    }

    let mut out = format!("Active sparks ({}):\n\n", sparks.len());
    for spark in sparks {
        // Writing into a String cannot fail.
        let _ = writeln!(
            out,
            "  - {} ({})\n    SSH: {}\n    Database: {}\n",
            spark.name, spark.status, spark.ssh, spark.database
        );
    }
    out
}
