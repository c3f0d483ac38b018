//! The spark workflows: create, delete, list and shell.
//!
//! Each workflow talks to the cluster, the database server and the local SSH
//! client only through the [`SparkCluster`](crate::cluster::SparkCluster),
//! [`DatabaseAdmin`](crate::db::DatabaseAdmin) and
//! [`RemoteShell`](crate::ssh::RemoteShell) seams.

use homelab_spark_core::{bundle::ResourceKind, client, names};
use snafu::Snafu;
use strum::{EnumDiscriminants, IntoStaticStr};

use crate::{config, db, ssh};

mod create;
mod delete;
mod list;
mod shell;

#[cfg(test)]
mod fakes;

pub use create::{CreateSettings, Readiness, ShellSession, SparkCreated, create_spark};
pub use delete::delete_spark;
pub use list::{list_sparks, render_text};
pub use shell::open_shell;

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("invalid spark name"))]
    InvalidSparkName { source: names::Error },

    #[snafu(display("no unused spark name found after {attempts} attempts"))]
    NameSpaceExhausted { attempts: usize },

    #[snafu(display("failed to list sparks"))]
    ListSparks { source: client::Error },

    #[snafu(display("failed to create database for spark {name:?}"))]
    CreateDatabase { source: db::Error, name: String },

    #[snafu(display("failed to build the database URL for spark {name:?}"))]
    BuildDatabaseUrl { source: config::Error, name: String },

    #[snafu(display("failed to submit {kind} for spark {name:?}"))]
    SubmitResource {
        source: client::Error,
        kind: ResourceKind,
        name: String,
    },

    #[snafu(display("failed to delete {kind} of spark {name:?}"))]
    DeleteResource {
        source: client::Error,
        kind: ResourceKind,
        name: String,
    },

    #[snafu(display("failed to drop database of spark {name:?}"))]
    DropDatabase { source: db::Error, name: String },

    #[snafu(display("spark {name:?} not found"))]
    SparkNotFound { name: String },

    #[snafu(display("spark {name:?} is not running (status: {phase})"))]
    SparkNotRunning { name: String, phase: String },

    #[snafu(display("failed to look up spark {name:?}"))]
    QuerySpark { source: client::Error, name: String },

    #[snafu(display("SSH session to spark {name:?} failed"))]
    OpenShell { source: ssh::Error, name: String },
}

impl Error {
    pub fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }
}
