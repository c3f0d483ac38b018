//! Command line and environment settings, validated per workflow.
//!
//! Every setting can be given as a flag or through its environment variable.
//! Nothing is read from the process environment after parsing.

use std::path::{Path, PathBuf};

use clap::Args;
use homelab_spark_core::{
    bundle::{SparkSecrets, UserProfile},
    connection::{self, build_connection_string, build_connection_uri},
    constants::DEFAULT_NAMESPACE,
    script::GitRepo,
};
use secrecy::{ExposeSecret, SecretString};
use snafu::{OptionExt, ResultExt, Snafu};

const DEFAULT_SSH_PUBLIC_KEY: &str = ".ssh/id_ed25519.pub";

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("{name} is not set"))]
    MissingEnv { name: &'static str },

    #[snafu(display("cannot locate the SSH public key, neither SSH_PUBLIC_KEY_PATH nor HOME is set"))]
    NoSshPublicKeyPath,

    #[snafu(display("failed to read SSH public key from {path:?}"))]
    ReadSshPublicKey {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("SSH public key file {path:?} is empty"))]
    EmptySshPublicKey { path: PathBuf },

    #[snafu(display("failed to build the connection URI for database {database:?}"))]
    BuildDatabaseUrl {
        source: connection::Error,
        database: String,
    },
}

#[derive(Args, Clone)]
pub struct SparkArgs {
    /// Namespace all spark objects live in.
    #[arg(long, env = "SPARK_NAMESPACE", default_value = DEFAULT_NAMESPACE, global = true)]
    pub namespace: String,

    #[arg(long, env = "POSTGRES_HOST", default_value = "postgres.postgres.svc.cluster.local", global = true)]
    pub postgres_host: String,

    #[arg(long, env = "POSTGRES_PORT", default_value_t = 5432, global = true)]
    pub postgres_port: u16,

    #[arg(long, env = "POSTGRES_USER", default_value = "spark", global = true)]
    pub postgres_user: String,

    #[arg(long, env = "POSTGRES_PASSWORD", hide_env_values = true, global = true)]
    pub postgres_password: Option<String>,

    /// Database the administrative connection logs into.
    #[arg(long, env = "POSTGRES_DB", default_value = "homelab", global = true)]
    pub postgres_db: String,

    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true, global = true)]
    pub anthropic_api_key: Option<String>,

    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true, global = true)]
    pub github_token: Option<String>,

    /// GitHub login written next to the token into the GitHub CLI config.
    #[arg(long, env = "GITHUB_USER", global = true)]
    pub github_user: Option<String>,

    /// Dotfiles repository cloned and installed when a spark boots for the first time.
    #[arg(long, env = "SPARK_DOTFILES_REPO", global = true)]
    pub dotfiles_repo: Option<GitRepo>,

    /// Defaults to `$HOME/.ssh/id_ed25519.pub`.
    #[arg(long, env = "SSH_PUBLIC_KEY_PATH", global = true)]
    pub ssh_public_key_path: Option<PathBuf>,
}

/// Connection parameters of the shared database server.
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: SecretString,
    pub database: String,
}

impl PostgresConfig {
    /// Key/value form for administrative connections, the password travels separately.
    pub fn admin_connection_string(&self) -> String {
        build_connection_string(&self.host, self.port, &self.user, &self.database)
    }

    /// The URI a spark workload uses to reach its own database.
    pub fn spark_database_url(&self, database: &str) -> Result<SecretString, Error> {
        let uri = build_connection_uri(
            &self.host,
            self.port,
            &self.user,
            self.password.expose_secret(),
            database,
        )
        .context(BuildDatabaseUrlSnafu { database })?;
        Ok(SecretString::from(String::from(uri)))
    }
}

/// Everything the create workflow needs besides the database.
pub struct CreateConfig {
    pub secrets: SparkSecrets,
    pub profile: UserProfile,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|value| !value.is_empty())
}

impl SparkArgs {
    pub fn postgres_config(&self) -> Result<PostgresConfig, Error> {
        let password = non_empty(&self.postgres_password).context(MissingEnvSnafu {
            name: "POSTGRES_PASSWORD",
        })?;

        Ok(PostgresConfig {
            host: self.postgres_host.clone(),
            port: self.postgres_port,
            user: self.postgres_user.clone(),
            password: SecretString::from(password),
            database: self.postgres_db.clone(),
        })
    }

    /// `home` is the caller's home directory, used when no key path is configured.
    pub fn create_config(&self, home: Option<&Path>) -> Result<CreateConfig, Error> {
        let anthropic_api_key = non_empty(&self.anthropic_api_key).context(MissingEnvSnafu {
            name: "ANTHROPIC_API_KEY",
        })?;

        let key_path = match &self.ssh_public_key_path {
            Some(path) => path.clone(),
            None => home
                .context(NoSshPublicKeyPathSnafu)?
                .join(DEFAULT_SSH_PUBLIC_KEY),
        };
        let ssh_public_key = read_ssh_public_key(&key_path)?;

        Ok(CreateConfig {
            secrets: SparkSecrets {
                anthropic_api_key: SecretString::from(anthropic_api_key),
                github_token: non_empty(&self.github_token).map(SecretString::from),
            },
            profile: UserProfile {
                ssh_public_key,
                github_user: non_empty(&self.github_user).map(str::to_owned),
                dotfiles_repo: self.dotfiles_repo.clone(),
            },
        })
    }
}

fn read_ssh_public_key(path: &Path) -> Result<String, Error> {
    let key = std::fs::read_to_string(path).context(ReadSshPublicKeySnafu { path })?;
    let key = key.trim();
    snafu::ensure!(!key.is_empty(), EmptySshPublicKeySnafu { path });
    Ok(key.to_owned())
}
