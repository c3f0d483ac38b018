use std::time::Duration;

use const_format::concatcp;

pub const APP_NAME: &str = "spark";
pub const DEFAULT_NAMESPACE: &str = "spark";

pub const LABEL_APP: &str = "app";
pub const LABEL_SPARK_NAME: &str = "spark-name";
pub const SPARK_LABEL_SELECTOR: &str = concatcp!(LABEL_APP, "=", APP_NAME);

pub const CONFIG_MAP_SUFFIX: &str = "-config";
pub const SECRET_SUFFIX: &str = "-secret";
pub const VOLUME_CLAIM_SUFFIX: &str = "-storage";
pub const SERVICE_SUFFIX: &str = "-ssh";

pub const CONFIG_KEY_AUTHORIZED_KEYS: &str = "authorized_keys";
pub const CONFIG_KEY_GIT_REPO: &str = "git_repo";
pub const CONFIG_KEY_DOTFILES_REPO: &str = "dotfiles_repo";
pub const CONFIG_KEY_GITHUB_USER: &str = "github_user";

pub const SECRET_KEY_DATABASE_URL: &str = "DATABASE_URL";
pub const SECRET_KEY_ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";
pub const SECRET_KEY_GITHUB_TOKEN: &str = "GITHUB_TOKEN";

pub const ENV_SPARK_NAME: &str = "SPARK_NAME";

pub const STORAGE_SIZE: &str = "10Gi";
pub const ACCESS_MODE_READ_WRITE_ONCE: &str = "ReadWriteOnce";

pub const SSH_PORT: i32 = 22;
pub const SSH_PORT_NAME: &str = "ssh";
pub const SSH_USER: &str = "user";
pub const HOSTNAME_PREFIX: &str = "spark-";
pub const TAILSCALE_HOSTNAME_ANNOTATION: &str = "tailscale.com/hostname";
pub const TAILSCALE_LOAD_BALANCER_CLASS: &str = "tailscale";

pub const CONTAINER_NAME: &str = "debian";
pub const CONTAINER_IMAGE: &str = "debian:bookworm";
pub const USER_UID: i64 = 1000;
pub const USER_HOME: &str = "/home/user";

pub const VOLUME_NAME_STORAGE: &str = "spark-storage";
pub const VOLUME_NAME_CONFIG: &str = "spark-config";
pub const VOLUME_MOUNT_PATH_CONFIG: &str = "/tmp/spark-config";
pub const VOLUME_NAME_SECRET: &str = "spark-secret";
pub const VOLUME_MOUNT_PATH_SECRET: &str = "/tmp/spark-secret";

pub const CPU_REQUEST: &str = "100m";
pub const MEMORY_REQUEST: &str = "256Mi";
pub const CPU_LIMIT: &str = "1000m";
pub const MEMORY_LIMIT: &str = "2Gi";

pub const POD_PHASE_RUNNING: &str = "Running";

pub const READINESS_ATTEMPTS: u32 = 60;
pub const READINESS_INTERVAL: Duration = Duration::from_secs(2);

pub const BACKUP_APP_LABEL: &str = "uptime-kuma-backup";
pub const BACKUP_LABEL_CREATED: &str = "created";
pub const BACKUP_JOB_SUFFIX: &str = "-job";
pub const BACKUP_CONTAINER_NAME: &str = "backup";
pub const BACKUP_VOLUME_NAME: &str = "backup";
pub const BACKUP_MOUNT_PATH: &str = "/backup";
pub const BACKUP_JOB_BACKOFF_LIMIT: i32 = 3;
// Finished jobs are garbage collected after an hour, the claim stays.
pub const BACKUP_JOB_TTL_SECONDS: i32 = 3600;
pub const JOB_NAME_LABEL: &str = "job-name";

pub const JOB_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const JOB_TIMEOUT: Duration = Duration::from_secs(5 * 60);
