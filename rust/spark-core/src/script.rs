//! The provisioning script a spark workload runs as its entry command.
//!
//! The script is rendered from constants only. Everything a caller controls (the
//! repository to clone, the dotfiles repository, the GitHub user) is read at
//! runtime from the mounted ConfigMap into quoted shell variables, so no caller
//! input ever becomes script text.

use std::{fmt, str::FromStr};

use indoc::formatdoc;
use snafu::{Snafu, ensure};
use url::Url;

use crate::constants::{
    CONFIG_KEY_AUTHORIZED_KEYS, CONFIG_KEY_DOTFILES_REPO, CONFIG_KEY_GIT_REPO,
    CONFIG_KEY_GITHUB_USER, SECRET_KEY_GITHUB_TOKEN, SSH_USER, USER_HOME, USER_UID,
    VOLUME_MOUNT_PATH_CONFIG, VOLUME_MOUNT_PATH_SECRET,
};

const ALLOWED_SCHEMES: [&str; 4] = ["https", "http", "ssh", "git"];
const FORBIDDEN_CHARS: [char; 9] = ['\'', '"', '`', '\\', '$', ';', '|', '<', '>'];

const CLAUDE_INSTALLER: &str =
    "https://raw.githubusercontent.com/anthropics/claude-code/main/install.sh";

#[derive(Snafu, Debug, PartialEq, Eq)]
pub enum Error {
    #[snafu(display("git repository must not be empty"))]
    EmptyRepo,

    #[snafu(display("git repository {repo:?} contains characters that are not allowed"))]
    ForbiddenCharacters { repo: String },

    #[snafu(display("git repository {repo:?} must not start with '-'"))]
    LeadingDash { repo: String },

    #[snafu(display(
        "git repository {repo:?} must be an https, http, ssh or git URL, or user@host:path"
    ))]
    UnsupportedLocation { repo: String },
}

/// A repository location that is safe to hand to `git clone --`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GitRepo(String);

impl GitRepo {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GitRepo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for GitRepo {
    type Err = Error;

    fn from_str(repo: &str) -> Result<Self, Self::Err> {
        ensure!(!repo.is_empty(), EmptyRepoSnafu);
        ensure!(
            !repo
                .chars()
                .any(|c| c.is_whitespace() || c.is_control() || FORBIDDEN_CHARS.contains(&c)),
            ForbiddenCharactersSnafu { repo }
        );
        ensure!(!repo.starts_with('-'), LeadingDashSnafu { repo });
        ensure!(
            is_url_location(repo) || is_scp_location(repo),
            UnsupportedLocationSnafu { repo }
        );

        Ok(GitRepo(repo.to_owned()))
    }
}

fn is_url_location(repo: &str) -> bool {
    match Url::parse(repo) {
        Ok(url) => {
            ALLOWED_SCHEMES.contains(&url.scheme())
                && url.host_str().is_some_and(|host| !host.is_empty())
                && url.path().len() > 1
        }
        Err(_) => false,
    }
}

// `git@github.com:owner/repo.git`
fn is_scp_location(repo: &str) -> bool {
    if repo.contains("://") {
        return false;
    }
    let Some((authority, path)) = repo.split_once(':') else {
        return false;
    };
    let host = authority
        .rsplit_once('@')
        .map_or(authority, |(_user, host)| host);

    !host.is_empty() && !host.contains('/') && !path.is_empty()
}

pub fn provisioning_script() -> String {
    formatdoc! {r#"
        #!/bin/bash
        set -e

        CONFIG_DIR="{VOLUME_MOUNT_PATH_CONFIG}"
        SECRET_DIR="{VOLUME_MOUNT_PATH_SECRET}"
        USER_NAME="{SSH_USER}"
        USER_HOME="{USER_HOME}"

        read_config() {{
            if [ -f "$CONFIG_DIR/$1" ]; then
                cat "$CONFIG_DIR/$1"
            fi
        }}

        as_user() {{
            runuser -u "$USER_NAME" -- env HOME="$USER_HOME" "$@"
        }}

        # Install dependencies
        apt-get update
        apt-get install -y openssh-server sudo curl git wget vim tmux build-essential ca-certificates

        # Create user with sudo access
        useradd -u {USER_UID} -d "$USER_HOME" -s /bin/bash "$USER_NAME" || true
        echo "$USER_NAME ALL=(ALL) NOPASSWD:ALL" > "/etc/sudoers.d/$USER_NAME"
        chmod 440 "/etc/sudoers.d/$USER_NAME"

        mkdir -p "$USER_HOME/.ssh" "$USER_HOME/.local/bin" "$USER_HOME/.config/gh"
        cp "$CONFIG_DIR/{CONFIG_KEY_AUTHORIZED_KEYS}" "$USER_HOME/.ssh/authorized_keys"
        chmod 600 "$USER_HOME/.ssh/authorized_keys"
        chmod 700 "$USER_HOME/.ssh"
        chown -R {USER_UID}:{USER_UID} "$USER_HOME"

        # GitHub CLI authentication
        GITHUB_USER="$(read_config {CONFIG_KEY_GITHUB_USER})"
        if [ -s "$SECRET_DIR/{SECRET_KEY_GITHUB_TOKEN}" ]; then
            {{
                echo "github.com:"
                if [ -n "$GITHUB_USER" ]; then
                    printf '    user: %s\n' "$GITHUB_USER"
                fi
                printf '    oauth_token: %s\n' "$(cat "$SECRET_DIR/{SECRET_KEY_GITHUB_TOKEN}")"
                echo "    git_protocol: https"
            }} > "$USER_HOME/.config/gh/hosts.yml"
            chown -R {USER_UID}:{USER_UID} "$USER_HOME/.config/gh"
            chmod 700 "$USER_HOME/.config/gh"
            chmod 600 "$USER_HOME/.config/gh/hosts.yml"
        fi

        # Claude Code CLI
        as_user bash -c "curl -fsSL {CLAUDE_INSTALLER} | sh" || echo "failed to install Claude Code" >&2

        # Dotfiles
        DOTFILES_REPO="$(read_config {CONFIG_KEY_DOTFILES_REPO})"
        if [ -n "$DOTFILES_REPO" ] && [ ! -d "$USER_HOME/.dotfiles" ]; then
            if as_user git clone -- "$DOTFILES_REPO" "$USER_HOME/.dotfiles"; then
                (cd "$USER_HOME/.dotfiles" && as_user ./install.sh) || true
            else
                echo "failed to clone dotfiles from $DOTFILES_REPO" >&2
            fi
        fi

        # Project repository
        GIT_REPO="$(read_config {CONFIG_KEY_GIT_REPO})"
        if [ -n "$GIT_REPO" ] && [ ! -d "$USER_HOME/project" ]; then
            as_user git clone -- "$GIT_REPO" "$USER_HOME/project" || echo "failed to clone $GIT_REPO" >&2
        fi

        chown -R {USER_UID}:{USER_UID} "$USER_HOME"

        # SSH daemon
        mkdir -p /run/sshd
        ssh-keygen -A
        cat >> /etc/ssh/sshd_config <<EOF
        PermitRootLogin no
        PasswordAuthentication no
        PubkeyAuthentication yes
        AllowUsers $USER_NAME
        EOF

        exec /usr/sbin/sshd -D -e
    "#}
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("https://github.com/t-eckert/homelab.git")]
    #[case("http://git.internal/team/repo")]
    #[case("ssh://git@github.com/owner/repo.git")]
    #[case("git://example.org/repo")]
    #[case("git@github.com:owner/repo.git")]
    #[case("github.com:owner/repo")]
    fn test_accepted_repos(#[case] repo: &str) {
        let parsed: GitRepo = repo.parse().unwrap();
        assert_eq!(repo, parsed.as_str());
    }

    #[rstest]
    #[case("", Error::EmptyRepo)]
    #[case(
        "https://github.com/a/b.git\"; curl evil | sh; \"",
        Error::ForbiddenCharacters { repo: "https://github.com/a/b.git\"; curl evil | sh; \"".to_owned() }
    )]
    #[case(
        "https://github.com/$(whoami)",
        Error::ForbiddenCharacters { repo: "https://github.com/$(whoami)".to_owned() }
    )]
    #[case(
        "https://github.com/a b",
        Error::ForbiddenCharacters { repo: "https://github.com/a b".to_owned() }
    )]
    #[case(
        "--upload-pack=touch:x",
        Error::LeadingDash { repo: "--upload-pack=touch:x".to_owned() }
    )]
    #[case(
        "file:///etc/passwd",
        Error::UnsupportedLocation { repo: "file:///etc/passwd".to_owned() }
    )]
    #[case(
        "not-a-repo",
        Error::UnsupportedLocation { repo: "not-a-repo".to_owned() }
    )]
    #[case(
        "https://github.com",
        Error::UnsupportedLocation { repo: "https://github.com".to_owned() }
    )]
    fn test_rejected_repos(#[case] repo: &str, #[case] expected: Error) {
        assert_eq!(Err(expected), repo.parse::<GitRepo>());
    }

    #[test]
    fn test_script_reads_repository_from_config() {
        let script = provisioning_script();

        assert!(script.starts_with("#!/bin/bash\nset -e\n"));
        assert!(script.contains("GIT_REPO=\"$(read_config git_repo)\""));
        assert!(script.contains("as_user git clone -- \"$GIT_REPO\" \"$USER_HOME/project\""));
        assert!(script.contains("CONFIG_DIR=\"/tmp/spark-config\""));
        assert!(script.contains("useradd -u 1000 -d \"$USER_HOME\""));
        assert!(script.contains("printf '    oauth_token: %s\\n'"));
        assert!(script.trim_end().ends_with("exec /usr/sbin/sshd -D -e"));
    }

    #[test]
    fn test_script_heredoc_is_not_indented() {
        let script = provisioning_script();
        assert!(script.contains("\nPermitRootLogin no\n"));
        assert!(script.contains("\nEOF\n"));
    }
}
