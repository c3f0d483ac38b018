use homelab_spark_core::{bundle::ResourceKind, client::Deletion, names::validate_spark_name};
use snafu::{ResultExt, ensure};
use tracing::{info, info_span};
use tracing_futures::Instrument;

use super::{
    DeleteResourceSnafu, DropDatabaseSnafu, Error, InvalidSparkNameSnafu, SparkNotFoundSnafu,
};
use crate::{cluster::SparkCluster, db::DatabaseAdmin};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeleteOutcome {
    pub name: String,
    pub removed: Vec<ResourceKind>,
    pub already_absent: Vec<ResourceKind>,
}

/// Removes the workload, then its service, claim, secret and config, then the
/// database.
///
/// Objects that are already gone are skipped, so a partially deleted spark can
/// be deleted again. The first failing call stops the workflow. When none of the
/// objects existed, [`Error::SparkNotFound`] is returned and the database is
/// not touched.
pub async fn delete_spark(
    cluster: &dyn SparkCluster,
    database: &dyn DatabaseAdmin,
    name: &str,
) -> Result<DeleteOutcome, Error> {
    validate_spark_name(name).context(InvalidSparkNameSnafu)?;

    async {
        let mut outcome = DeleteOutcome {
            name: name.to_owned(),
            removed: Vec::new(),
            already_absent: Vec::new(),
        };

        for kind in ResourceKind::DELETION_ORDER {
            let deletion = cluster
                .delete_resource(kind, &kind.object_name(name))
                .await
                .context(DeleteResourceSnafu { kind, name })?;
            match deletion {
                Deletion::Deleted => {
                    info!(%kind, "Deleted");
                    outcome.removed.push(kind);
                }
                Deletion::Absent => {
                    info!(%kind, "Already absent");
                    outcome.already_absent.push(kind);
                }
            }
        }

        ensure!(!outcome.removed.is_empty(), SparkNotFoundSnafu { name });

        database
            .drop_database(name)
            .await
            .context(DropDatabaseSnafu { name })?;
        Ok(outcome)
    }
    .instrument(info_span!("delete_spark", spark = %name))
    .await
}
