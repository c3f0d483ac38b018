use async_trait::async_trait;
use pg_escape::quote_identifier;
use secrecy::ExposeSecret;
use snafu::{ResultExt, Snafu, ensure};
use tokio_postgres::{Client, NoTls};
use tracing::{info, warn};

use crate::config::PostgresConfig;

// NAMEDATALEN - 1, longer identifiers are silently truncated by the server.
const MAX_DATABASE_NAME_LENGTH: usize = 63;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("invalid Postgres connection settings"))]
    ParseConfig { source: tokio_postgres::Error },

    #[snafu(display("failed to connect to Postgres at {host}:{port}"))]
    Connect {
        source: tokio_postgres::Error,
        host: String,
        port: u16,
    },

    #[snafu(display("Postgres at {host}:{port} did not answer"))]
    Ping {
        source: tokio_postgres::Error,
        host: String,
        port: u16,
    },

    #[snafu(display(
        "{name:?} is not a usable database name (1 to {MAX_DATABASE_NAME_LENGTH} bytes)"
    ))]
    InvalidDatabaseName { name: String },

    #[snafu(display("database {name:?} already exists"))]
    DatabaseExists { name: String },

    #[snafu(display("failed to check whether database {name:?} exists"))]
    CheckDatabase {
        source: tokio_postgres::Error,
        name: String,
    },

    #[snafu(display("failed to create database {name:?}"))]
    CreateDatabase {
        source: tokio_postgres::Error,
        name: String,
    },

    #[snafu(display("failed to terminate sessions on database {name:?}"))]
    TerminateSessions {
        source: tokio_postgres::Error,
        name: String,
    },

    #[snafu(display("failed to drop database {name:?}"))]
    DropDatabase {
        source: tokio_postgres::Error,
        name: String,
    },
}

/// Creates and drops the per-spark databases on the shared server.
#[async_trait]
pub trait DatabaseAdmin: Send + Sync {
    /// Fails with [`Error::DatabaseExists`] instead of reusing an existing database.
    async fn create_database(&self, name: &str) -> Result<(), Error>;

    /// Terminates open sessions, then drops the database if it exists.
    async fn drop_database(&self, name: &str) -> Result<(), Error>;
}

fn validate_database_name(name: &str) -> Result<(), Error> {
    ensure!(
        !name.is_empty() && name.len() <= MAX_DATABASE_NAME_LENGTH,
        InvalidDatabaseNameSnafu { name }
    );
    Ok(())
}

pub struct PostgresAdmin {
    client: Client,
}

impl PostgresAdmin {
    pub async fn connect(config: &PostgresConfig) -> Result<Self, Error> {
        let mut pg_config: tokio_postgres::Config = config
            .admin_connection_string()
            .parse()
            .context(ParseConfigSnafu)?;
        pg_config.password(config.password.expose_secret());

        let (client, connection) =
            pg_config
                .connect(NoTls)
                .await
                .with_context(|_| ConnectSnafu {
                    host: config.host.clone(),
                    port: config.port,
                })?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!("Postgres connection error: {e}");
            }
        });

        client
            .simple_query("SELECT 1")
            .await
            .with_context(|_| PingSnafu {
                host: config.host.clone(),
                port: config.port,
            })?;

        Ok(PostgresAdmin { client })
    }
}

#[async_trait]
impl DatabaseAdmin for PostgresAdmin {
    async fn create_database(&self, name: &str) -> Result<(), Error> {
        validate_database_name(name)?;

        let exists: bool = self
            .client
            .query_one(
                "SELECT EXISTS(SELECT 1 FROM pg_catalog.pg_database WHERE datname = $1)",
                &[&name],
            )
            .await
            .context(CheckDatabaseSnafu { name })?
            .get(0);
        ensure!(!exists, DatabaseExistsSnafu { name });

        self.client
            .batch_execute(&format!("CREATE DATABASE {}", quote_identifier(name)))
            .await
            .context(CreateDatabaseSnafu { name })?;

        info!(database = name, "Created database");
        Ok(())
    }

    async fn drop_database(&self, name: &str) -> Result<(), Error> {
        validate_database_name(name)?;

        let terminated = self
            .client
            .execute(
                "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
                 WHERE datname = $1 AND pid <> pg_backend_pid()",
                &[&name],
            )
            .await
            .context(TerminateSessionsSnafu { name })?;
        if terminated > 0 {
            info!(database = name, sessions = terminated, "Terminated open sessions");
        }

        self.client
            .batch_execute(&format!(
                "DROP DATABASE IF EXISTS {}",
                quote_identifier(name)
            ))
            .await
            .context(DropDatabaseSnafu { name })?;

        info!(database = name, "Dropped database");
        Ok(())
    }
}
