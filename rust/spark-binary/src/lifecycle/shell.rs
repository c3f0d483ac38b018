use homelab_spark_core::{
    bundle::ssh_destination, constants::POD_PHASE_RUNNING, names::validate_spark_name,
};
use snafu::{OptionExt, ResultExt, ensure};

use super::{
    Error, InvalidSparkNameSnafu, OpenShellSnafu, QuerySparkSnafu, SparkNotFoundSnafu,
    SparkNotRunningSnafu,
};
use crate::{cluster::SparkCluster, ssh::RemoteShell};

/// Opens an interactive session on a running spark.
pub async fn open_shell(
    cluster: &dyn SparkCluster,
    shell: &dyn RemoteShell,
    name: &str,
) -> Result<(), Error> {
    validate_spark_name(name).context(InvalidSparkNameSnafu)?;

    cluster
        .workload_ready_replicas(name)
        .await
        .context(QuerySparkSnafu { name })?
        .context(SparkNotFoundSnafu { name })?;

    let phases = cluster
        .pod_phases(name)
        .await
        .context(QuerySparkSnafu { name })?;
    ensure!(
        phases.iter().any(|phase| phase == POD_PHASE_RUNNING),
        SparkNotRunningSnafu {
            name,
            phase: phases.first().map_or("NoPod", String::as_str),
        }
    );

    shell
        .open(&ssh_destination(name))
        .await
        .context(OpenShellSnafu { name })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::lifecycle::fakes::{Call, FakeCluster, FakeShell, Journal, calls};

    #[tokio::test]
    async fn test_opens_session_on_running_spark() {
        let journal = Journal::default();
        let cluster = FakeCluster {
            running_from_query: Some(1),
            ..FakeCluster::with_journal(&journal)
        };
        cluster.insert_spark("brave-owl");
        let shell = FakeShell::with_journal(&journal);

        open_shell(&cluster, &shell, "brave-owl").await.unwrap();
        assert_eq!(
            Some(&Call::OpenShell("user@spark-brave-owl".to_owned())),
            calls(&journal).last()
        );
    }

    #[tokio::test]
    async fn test_missing_spark() {
        let journal = Journal::default();
        let cluster = FakeCluster::with_journal(&journal);
        let shell = FakeShell::with_journal(&journal);

        let error = open_shell(&cluster, &shell, "brave-owl").await.unwrap_err();
        assert!(matches!(error, Error::SparkNotFound { .. }), "{error:?}");
    }

    #[tokio::test]
    async fn test_spark_not_running() {
        let journal = Journal::default();
        let cluster = FakeCluster::with_journal(&journal);
        cluster.insert_spark("brave-owl");
        let shell = FakeShell::with_journal(&journal);

        let error = open_shell(&cluster, &shell, "brave-owl").await.unwrap_err();
        assert_eq!(
            "spark \"brave-owl\" is not running (status: Pending)",
            error.to_string()
        );
        assert!(
            !calls(&journal)
                .iter()
                .any(|call| matches!(call, Call::OpenShell(_)))
        );
    }

    #[rstest]
    #[case(vec!["Failed"], "Failed")]
    #[case(vec!["Succeeded", "Pending"], "Succeeded")]
    #[case(vec![], "NoPod")]
    #[tokio::test]
    async fn test_reports_phase_of_stopped_spark(
        #[case] phases: Vec<&str>,
        #[case] expected_phase: &str,
    ) {
        let journal = Journal::default();
        let cluster = FakeCluster {
            pod_phase_override: Some(phases.into_iter().map(str::to_owned).collect()),
            ..FakeCluster::with_journal(&journal)
        };
        cluster.insert_spark("brave-owl");
        let shell = FakeShell::with_journal(&journal);

        let error = open_shell(&cluster, &shell, "brave-owl").await.unwrap_err();
        assert!(
            matches!(&error, Error::SparkNotRunning { phase, .. } if phase == expected_phase),
            "{error:?}"
        );
    }

    #[tokio::test]
    async fn test_failed_session_is_an_error() {
        let journal = Journal::default();
        let cluster = FakeCluster {
            running_from_query: Some(1),
            ..FakeCluster::with_journal(&journal)
        };
        cluster.insert_spark("brave-owl");
        let shell = FakeShell {
            fail: true,
            ..FakeShell::with_journal(&journal)
        };

        let error = open_shell(&cluster, &shell, "brave-owl").await.unwrap_err();
        assert_eq!("OpenShell", error.category());
    }
}
