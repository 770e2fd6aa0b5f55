//! Version-control client.
//!
//! [`VersionControl`] is the capability set the sync coordinator drives;
//! [`GitCli`] implements it by shelling out to the `git` binary.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git {args} failed: {output}")]
    CommandFailed { args: String, output: String },

    #[error("git {args} timed out after {after:?}")]
    Timeout { args: String, after: Duration },

    #[error("IO error: {0}")]
    Io(String),

    #[error("No remote repository configured")]
    MissingRemote,
}

pub type Result<T> = std::result::Result<T, GitError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    NothingToCommit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,
    UpToDate,
}

#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Whether a working copy exists at the vault path
    async fn repo_exists(&self) -> bool;

    /// Create the vault directory and an empty repository in it
    async fn init(&self) -> Result<()>;

    /// Clone `url` into the vault path
    async fn clone_remote(&self, url: &str) -> Result<()>;

    async fn add_remote(&self, name: &str, url: &str) -> Result<()>;

    /// Fetch and rebase local commits onto the upstream branch
    async fn pull_rebase(&self) -> Result<()>;

    async fn add(&self, paths: &[String]) -> Result<()>;

    async fn commit(&self, message: &str) -> Result<CommitOutcome>;

    async fn push(&self) -> Result<PushOutcome>;

    /// Porcelain status lines; empty when the tree is clean
    async fn status(&self) -> Result<Vec<String>>;

    async fn configure_identity(&self, name: &str, email: &str) -> Result<()>;
}

/// `git` subprocess client bound to one working copy.
pub struct GitCli {
    repo_path: PathBuf,
    ssh_key_path: Option<PathBuf>,
    timeout: Duration,
    ssh_command: OnceLock<Option<String>>,
}

impl GitCli {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
            ssh_key_path: None,
            timeout: Duration::from_secs(60),
            ssh_command: OnceLock::new(),
        }
    }

    pub fn with_ssh_key(mut self, key_path: impl Into<PathBuf>) -> Self {
        self.ssh_key_path = Some(key_path.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Transport command for network operations, resolved on first use.
    /// `None` when no key is configured or the key file does not exist.
    fn ssh_command(&self) -> Option<&str> {
        self.ssh_command
            .get_or_init(|| {
                let key = self.ssh_key_path.as_ref().filter(|k| k.is_file())?;
                debug!("Using ssh key {}", key.display());
                Some(ssh_command_for(key))
            })
            .as_deref()
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        self.run_in(&self.repo_path, args, false).await
    }

    async fn run_network(&self, args: &[&str]) -> Result<String> {
        self.run_in(&self.repo_path, args, true).await
    }

    async fn rebase_in_progress(&self) -> bool {
        let git_dir = self.repo_path.join(".git");
        for marker in ["rebase-merge", "rebase-apply"] {
            if tokio::fs::try_exists(git_dir.join(marker)).await.unwrap_or(false) {
                return true;
            }
        }
        false
    }

    /// Run git in `dir`, returning combined stdout and stderr.
    async fn run_in(&self, dir: &Path, args: &[&str], network: bool) -> Result<String> {
        let joined = args.join(" ");
        debug!("Running: git {} in {}", joined, dir.display());

        let mut cmd = Command::new("git");
        cmd.args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if network {
            if let Some(ssh) = self.ssh_command() {
                cmd.env("GIT_SSH_COMMAND", ssh);
            }
        }

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| GitError::Timeout {
                args: joined.clone(),
                after: self.timeout,
            })?
            .map_err(|e| GitError::Io(format!("git {joined}: {e}")))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            Ok(combined)
        } else {
            Err(GitError::CommandFailed {
                args: joined,
                output: combined.trim().to_string(),
            })
        }
    }
}

fn ssh_command_for(key: &Path) -> String {
    format!(
        "ssh -i {} -o StrictHostKeyChecking=accept-new",
        key.display()
    )
}

fn is_nothing_to_commit(output: &str) -> bool {
    output.contains("nothing to commit") || output.contains("nothing added to commit")
}

fn is_up_to_date(output: &str) -> bool {
    output.contains("up-to-date") || output.contains("up to date")
}

fn parse_porcelain(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl VersionControl for GitCli {
    async fn repo_exists(&self) -> bool {
        tokio::fs::metadata(self.repo_path.join(".git"))
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    async fn init(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.repo_path)
            .await
            .map_err(|e| GitError::Io(format!("{}: {e}", self.repo_path.display())))?;
        self.run(&["init"]).await?;
        Ok(())
    }

    async fn clone_remote(&self, url: &str) -> Result<()> {
        if url.trim().is_empty() {
            return Err(GitError::MissingRemote);
        }
        if let Some(parent) = self.repo_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| GitError::Io(format!("{}: {e}", parent.display())))?;
        }

        // Target is taken relative to the process working directory
        let target = self.repo_path.to_string_lossy().to_string();
        self.run_in(Path::new("."), &["clone", url, &target], true)
            .await?;
        Ok(())
    }

    async fn add_remote(&self, name: &str, url: &str) -> Result<()> {
        self.run(&["remote", "add", name, url]).await?;
        Ok(())
    }

    /// A rebase that stops on conflicts is aborted, leaving local commits
    /// in place for the next attempt.
    async fn pull_rebase(&self) -> Result<()> {
        let result = self.run_network(&["pull", "--rebase"]).await;
        if result.is_err() && self.rebase_in_progress().await {
            warn!("Aborting conflicted rebase in {}", self.repo_path.display());
            if let Err(e) = self.run(&["rebase", "--abort"]).await {
                warn!("git rebase --abort failed: {}", e);
            }
        }
        result.map(|_| ())
    }

    async fn add(&self, paths: &[String]) -> Result<()> {
        let mut args = vec!["add"];
        args.extend(paths.iter().map(String::as_str));
        self.run(&args).await?;
        Ok(())
    }

    async fn commit(&self, message: &str) -> Result<CommitOutcome> {
        match self
            .run(&["-c", "commit.gpgsign=false", "commit", "-m", message])
            .await
        {
            Ok(_) => Ok(CommitOutcome::Committed),
            Err(GitError::CommandFailed { output, .. }) if is_nothing_to_commit(&output) => {
                Ok(CommitOutcome::NothingToCommit)
            }
            Err(e) => Err(e),
        }
    }

    /// Push the current branch to `origin`, setting it as upstream so the
    /// first push from a freshly initialised vault works too.
    async fn push(&self) -> Result<PushOutcome> {
        match self
            .run_network(&["push", "--set-upstream", "origin", "HEAD"])
            .await
        {
            Ok(output) if is_up_to_date(&output) => Ok(PushOutcome::UpToDate),
            Ok(_) => Ok(PushOutcome::Pushed),
            Err(GitError::CommandFailed { output, .. }) if is_up_to_date(&output) => {
                Ok(PushOutcome::UpToDate)
            }
            Err(e) => Err(e),
        }
    }

    async fn status(&self) -> Result<Vec<String>> {
        let output = self.run(&["status", "--porcelain"]).await?;
        Ok(parse_porcelain(&output))
    }

    async fn configure_identity(&self, name: &str, email: &str) -> Result<()> {
        if !name.is_empty() {
            self.run(&["config", "user.name", name]).await?;
        }
        if !email.is_empty() {
            self.run(&["config", "user.email", email]).await?;
        }
        Ok(())
    }
}
