//! Sync coordinator: treats the vault's git remote as a shared database.
//!
//! A cycle is pull → status → stage → commit → push. It runs on a timer
//! (see [`SyncCoordinator::start`]) or on demand, always inside the vault's
//! exclusive scope so it never interleaves with a foreground write.
//!
//! Failure policy:
//! - a failed pull is logged and the cycle carries on with the local copy
//! - "nothing to commit" and "already up to date" are successes
//! - any other failure faults the cycle; a commit whose push failed is
//!   pushed again on the next cycle even if the tree is clean by then

use crate::git::{CommitOutcome, GitError, PushOutcome, VersionControl};
use crate::vault::{Vault, VaultGuard};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Commit message used by timer-driven cycles.
pub const AUTO_SYNC_MESSAGE: &str = "Auto-sync from shelf";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Sync failed: {0}")]
    Git(#[from] GitError),
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Pulling,
    Staging,
    Committing,
    Pushing,
    /// Last cycle failed; the next one starts over from a pull
    Faulted { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Clean tree and nothing waiting to be pushed
    NoChanges,
    /// Changes were seen but nothing ended up committed
    NothingToCommit,
    /// Local commits reached the remote (or it already had them)
    Pushed { changes: usize },
}

/// How the vault's repository is created and who commits to it.
#[derive(Debug, Clone, Default)]
pub struct RepositorySettings {
    pub remote: Option<String>,
    pub user_name: String,
    pub user_email: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VaultStatus {
    pub path: PathBuf,
    pub exists: bool,
    pub remote: Option<String>,
    pub state: SyncState,
    pub pending_push: bool,
}

pub struct SyncCoordinator {
    vault: Vault,
    vcs: Arc<dyn VersionControl>,
    settings: RepositorySettings,
    state: watch::Sender<SyncState>,
    pending_push: AtomicBool,
}

impl SyncCoordinator {
    pub fn new(vault: Vault, vcs: Arc<dyn VersionControl>, settings: RepositorySettings) -> Self {
        let (state, _) = watch::channel(SyncState::Idle);
        Self {
            vault,
            vcs,
            settings,
            state,
            pending_push: AtomicBool::new(false),
        }
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    pub fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    /// Receive every state transition.
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: SyncState) {
        debug!("Sync state -> {:?}", state);
        self.state.send_replace(state);
    }

    fn fault(&self, error: GitError) -> SyncError {
        warn!("Sync fault: {}", error);
        self.set_state(SyncState::Faulted {
            reason: error.to_string(),
        });
        error.into()
    }

    /// One full cycle, on demand.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        let scope = self.vault.lock().await;
        self.pull_locked(&scope).await;
        self.publish_locked(&scope, AUTO_SYNC_MESSAGE).await
    }

    /// Pull with rebase. Failures are logged only; returns whether it
    /// succeeded. The state from before the pull is restored afterwards.
    pub async fn pull_locked(&self, scope: &VaultGuard<'_>) -> bool {
        debug_assert!(scope.guards(&self.vault), "guard belongs to another vault");
        let previous = self.state();
        self.set_state(SyncState::Pulling);
        let pulled = match self.vcs.pull_rebase().await {
            Ok(()) => true,
            Err(e) => {
                warn!("git pull failed, continuing with local copy: {}", e);
                false
            }
        };
        self.set_state(previous);
        pulled
    }

    /// Stage, commit and push whatever changed in the working tree.
    pub async fn publish_locked(
        &self,
        scope: &VaultGuard<'_>,
        message: &str,
    ) -> Result<CycleOutcome> {
        debug_assert!(scope.guards(&self.vault), "guard belongs to another vault");
        self.set_state(SyncState::Staging);
        let changes = self.vcs.status().await.map_err(|e| self.fault(e))?;
        let pending = self.pending_push.load(Ordering::SeqCst);

        if changes.is_empty() && !pending {
            self.set_state(SyncState::Idle);
            return Ok(CycleOutcome::NoChanges);
        }

        if !changes.is_empty() {
            debug!("{} local changes detected", changes.len());
            self.vcs
                .add(&[".".to_string()])
                .await
                .map_err(|e| self.fault(e))?;

            self.set_state(SyncState::Committing);
            match self.vcs.commit(message).await.map_err(|e| self.fault(e))? {
                CommitOutcome::Committed => self.pending_push.store(true, Ordering::SeqCst),
                CommitOutcome::NothingToCommit if !pending => {
                    debug!("Nothing to commit after staging");
                    self.set_state(SyncState::Idle);
                    return Ok(CycleOutcome::NothingToCommit);
                }
                CommitOutcome::NothingToCommit => {}
            }
        } else {
            debug!("Retrying push of an earlier commit");
        }

        self.set_state(SyncState::Pushing);
        let outcome = self.vcs.push().await.map_err(|e| self.fault(e))?;
        self.pending_push.store(false, Ordering::SeqCst);
        self.set_state(SyncState::Idle);

        match outcome {
            PushOutcome::Pushed => info!("Pushed {} changes", changes.len()),
            PushOutcome::UpToDate => debug!("Remote already up to date"),
        }
        Ok(CycleOutcome::Pushed {
            changes: changes.len(),
        })
    }

    /// Make sure a working copy exists: clone the remote if one is
    /// configured, otherwise initialise a local repository. No-op when the
    /// repository is already there.
    pub async fn ensure_repository(&self) -> Result<()> {
        let _scope = self.vault.lock().await;
        if self.vcs.repo_exists().await {
            debug!("Repository already exists at {}", self.vault.root().display());
            return Ok(());
        }

        match &self.settings.remote {
            Some(url) => {
                info!("Cloning {} into {}", url, self.vault.root().display());
                self.vcs.clone_remote(url).await?;
                self.configure_identity().await
            }
            None => self.init_locked().await,
        }
    }

    /// Initialise a fresh repository, adding the configured remote as
    /// `origin`. No-op when the repository already exists.
    pub async fn init_repository(&self) -> Result<()> {
        let _scope = self.vault.lock().await;
        if self.vcs.repo_exists().await {
            return Ok(());
        }
        self.init_locked().await
    }

    async fn init_locked(&self) -> Result<()> {
        info!("Initialising repository at {}", self.vault.root().display());
        self.vcs.init().await?;
        self.configure_identity().await?;
        if let Some(url) = &self.settings.remote {
            self.vcs.add_remote("origin", url).await?;
        }
        Ok(())
    }

    async fn configure_identity(&self) -> Result<()> {
        self.vcs
            .configure_identity(&self.settings.user_name, &self.settings.user_email)
            .await?;
        Ok(())
    }

    pub async fn vault_status(&self) -> VaultStatus {
        VaultStatus {
            path: self.vault.root().to_path_buf(),
            exists: self.vcs.repo_exists().await,
            remote: self.settings.remote.clone(),
            state: self.state(),
            pending_push: self.pending_push.load(Ordering::SeqCst),
        }
    }

    /// Run a cycle every `interval` in a background task. The first cycle
    /// happens one interval after starting.
    pub fn start(self: &Arc<Self>, interval: Duration) -> SyncHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let coordinator = Arc::clone(self);

        let task = tokio::spawn(async move {
            info!("Starting sync coordinator (interval: {:?})", interval);
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                // A cycle in progress always runs to completion before
                // shutdown is observed
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = coordinator.run_cycle().await {
                            warn!("Scheduled sync failed: {}", e);
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }

            info!("Sync coordinator stopped");
        });

        SyncHandle { shutdown, task }
    }
}

/// Owned by whoever started the coordinator. Dropping it also stops the
/// schedule.
pub struct SyncHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Stop scheduling cycles and wait for any in-flight cycle to finish.
    pub async fn stop(self) {
        self.shutdown.send_replace(true);
        if let Err(e) = self.task.await {
            warn!("Sync task ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Scripted in-memory stand-in for git.
    #[derive(Default)]
    pub(crate) struct FakeVcs {
        pub exists: AtomicBool,
        pub fail_pull: AtomicBool,
        /// Paths reported by `status`
        pub dirty: Mutex<Vec<String>>,
        /// When set, `add` stages nothing
        pub unstageable: AtomicBool,
        staged: Mutex<Vec<String>>,
        pub push_results: Mutex<VecDeque<crate::git::Result<PushOutcome>>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeVcs {
        pub fn existing() -> Self {
            let fake = Self::default();
            fake.exists.store(true, Ordering::SeqCst);
            fake
        }

        pub fn touch(&self, path: &str) {
            self.dirty.lock().unwrap().push(format!(" M {path}"));
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: &str) {
            self.calls.lock().unwrap().push(call.to_string());
        }
    }

    #[async_trait]
    impl VersionControl for FakeVcs {
        async fn repo_exists(&self) -> bool {
            self.exists.load(Ordering::SeqCst)
        }

        async fn init(&self) -> crate::git::Result<()> {
            self.record("init");
            self.exists.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn clone_remote(&self, url: &str) -> crate::git::Result<()> {
            self.record(&format!("clone {url}"));
            self.exists.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn add_remote(&self, name: &str, url: &str) -> crate::git::Result<()> {
            self.record(&format!("remote add {name} {url}"));
            Ok(())
        }

        async fn pull_rebase(&self) -> crate::git::Result<()> {
            self.record("pull");
            if self.fail_pull.load(Ordering::SeqCst) {
                return Err(GitError::CommandFailed {
                    args: "pull --rebase".into(),
                    output: "Could not resolve host".into(),
                });
            }
            Ok(())
        }

        async fn add(&self, _paths: &[String]) -> crate::git::Result<()> {
            self.record("add");
            if !self.unstageable.load(Ordering::SeqCst) {
                let dirty = std::mem::take(&mut *self.dirty.lock().unwrap());
                self.staged.lock().unwrap().extend(dirty);
            }
            Ok(())
        }

        async fn commit(&self, message: &str) -> crate::git::Result<CommitOutcome> {
            self.record(&format!("commit {message}"));
            let staged = std::mem::take(&mut *self.staged.lock().unwrap());
            Ok(if staged.is_empty() {
                CommitOutcome::NothingToCommit
            } else {
                CommitOutcome::Committed
            })
        }

        async fn push(&self) -> crate::git::Result<PushOutcome> {
            self.record("push");
            self.push_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(PushOutcome::Pushed))
        }

        async fn status(&self) -> crate::git::Result<Vec<String>> {
            self.record("status");
            let mut lines = self.dirty.lock().unwrap().clone();
            lines.extend(self.staged.lock().unwrap().iter().cloned());
            Ok(lines)
        }

        async fn configure_identity(&self, name: &str, email: &str) -> crate::git::Result<()> {
            self.record(&format!("identity {name} <{email}>"));
            Ok(())
        }
    }

    fn coordinator(temp: &TempDir, fake: Arc<FakeVcs>, remote: Option<&str>) -> SyncCoordinator {
        SyncCoordinator::new(
            Vault::open(temp.path()),
            fake,
            RepositorySettings {
                remote: remote.map(str::to_string),
                user_name: "Shelf".into(),
                user_email: "shelf@local".into(),
            },
        )
    }

    fn rejected() -> GitError {
        GitError::CommandFailed {
            args: "push".into(),
            output: "! [rejected] main -> main (fetch first)".into(),
        }
    }

    #[tokio::test]
    async fn test_clean_tree_is_a_no_op() {
        let temp = TempDir::new().unwrap();
        let fake = Arc::new(FakeVcs::existing());
        let sync = coordinator(&temp, fake.clone(), None);

        let outcome = sync.run_cycle().await.unwrap();

        assert_eq!(outcome, CycleOutcome::NoChanges);
        assert_eq!(fake.calls(), ["pull", "status"]);
        assert_eq!(sync.state(), SyncState::Idle);
    }

    #[tokio::test]
    async fn test_changes_are_committed_and_pushed() {
        let temp = TempDir::new().unwrap();
        let fake = Arc::new(FakeVcs::existing());
        fake.touch("reading.md");
        let sync = coordinator(&temp, fake.clone(), None);

        let outcome = sync.run_cycle().await.unwrap();

        assert_eq!(outcome, CycleOutcome::Pushed { changes: 1 });
        assert_eq!(
            fake.calls(),
            [
                "pull",
                "status",
                "add",
                format!("commit {AUTO_SYNC_MESSAGE}").as_str(),
                "push"
            ]
        );
        assert_eq!(sync.state(), SyncState::Idle);
    }

    #[tokio::test]
    async fn test_pull_failure_does_not_block_publish() {
        let temp = TempDir::new().unwrap();
        let fake = Arc::new(FakeVcs::existing());
        fake.fail_pull.store(true, Ordering::SeqCst);
        fake.touch("reading.md");
        let sync = coordinator(&temp, fake.clone(), None);

        let outcome = sync.run_cycle().await.unwrap();
        assert_eq!(outcome, CycleOutcome::Pushed { changes: 1 });
    }

    #[tokio::test]
    async fn test_unstageable_changes_are_a_no_op() {
        let temp = TempDir::new().unwrap();
        let fake = Arc::new(FakeVcs::existing());
        fake.unstageable.store(true, Ordering::SeqCst);
        fake.touch("reading.md");
        let sync = coordinator(&temp, fake.clone(), None);

        let outcome = sync.run_cycle().await.unwrap();

        assert_eq!(outcome, CycleOutcome::NothingToCommit);
        assert!(!fake.calls().contains(&"push".to_string()));
        assert_eq!(sync.state(), SyncState::Idle);
    }

    #[tokio::test]
    async fn test_up_to_date_push_is_success() {
        let temp = TempDir::new().unwrap();
        let fake = Arc::new(FakeVcs::existing());
        fake.push_results.lock().unwrap().push_back(Ok(PushOutcome::UpToDate));
        fake.touch("reading.md");
        let sync = coordinator(&temp, fake.clone(), None);

        assert!(sync.run_cycle().await.is_ok());
        assert_eq!(sync.state(), SyncState::Idle);
    }

    #[cfg(debug_assertions)]
    #[tokio::test]
    #[should_panic(expected = "guard belongs to another vault")]
    async fn test_guard_from_another_vault_is_rejected() {
        let temp = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let fake = Arc::new(FakeVcs::existing());
        fake.touch("reading.md");
        let sync = coordinator(&temp, fake, None);

        let foreign = Vault::open(other.path());
        let scope = foreign.lock().await;
        let _ = sync.publish_locked(&scope, "sneaky").await;
    }

    #[tokio::test]
    async fn test_failed_push_faults_and_is_retried() {
        let temp = TempDir::new().unwrap();
        let fake = Arc::new(FakeVcs::existing());
        fake.push_results.lock().unwrap().push_back(Err(rejected()));
        fake.touch("reading.md");
        let sync = coordinator(&temp, fake.clone(), None);

        assert!(sync.run_cycle().await.is_err());
        assert!(matches!(sync.state(), SyncState::Faulted { .. }));
        assert!(sync.vault_status().await.pending_push);

        // Tree is clean now, but the earlier commit still needs pushing
        let outcome = sync.run_cycle().await.unwrap();
        assert_eq!(outcome, CycleOutcome::Pushed { changes: 0 });
        assert_eq!(sync.state(), SyncState::Idle);
        assert!(!sync.vault_status().await.pending_push);

        let pushes = fake.calls().iter().filter(|c| *c == "push").count();
        assert_eq!(pushes, 2);
    }

    #[tokio::test]
    async fn test_state_transitions_are_published() {
        let temp = TempDir::new().unwrap();
        let fake = Arc::new(FakeVcs::existing());
        fake.touch("reading.md");
        let sync = coordinator(&temp, fake, None);
        let mut rx = sync.subscribe();

        sync.run_cycle().await.unwrap();

        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), SyncState::Idle);
    }

    #[tokio::test]
    async fn test_ensure_repository_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let fake = Arc::new(FakeVcs::existing());
        let sync = coordinator(&temp, fake.clone(), Some("git@example.com:me/vault.git"));

        sync.ensure_repository().await.unwrap();
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_ensure_repository_clones_remote() {
        let temp = TempDir::new().unwrap();
        let fake = Arc::new(FakeVcs::default());
        let sync = coordinator(&temp, fake.clone(), Some("git@example.com:me/vault.git"));

        sync.ensure_repository().await.unwrap();
        sync.ensure_repository().await.unwrap();

        assert_eq!(
            fake.calls(),
            ["clone git@example.com:me/vault.git", "identity Shelf <shelf@local>"]
        );
    }

    #[tokio::test]
    async fn test_ensure_repository_initialises_local_vault() {
        let temp = TempDir::new().unwrap();
        let fake = Arc::new(FakeVcs::default());
        let sync = coordinator(&temp, fake.clone(), None);

        sync.ensure_repository().await.unwrap();
        assert_eq!(fake.calls(), ["init", "identity Shelf <shelf@local>"]);
    }

    #[tokio::test]
    async fn test_init_repository_adds_remote() {
        let temp = TempDir::new().unwrap();
        let fake = Arc::new(FakeVcs::default());
        let sync = coordinator(&temp, fake.clone(), Some("git@example.com:me/vault.git"));

        sync.init_repository().await.unwrap();
        assert_eq!(
            fake.calls(),
            [
                "init",
                "identity Shelf <shelf@local>",
                "remote add origin git@example.com:me/vault.git"
            ]
        );
    }

    #[tokio::test]
    async fn test_vault_status() {
        let temp = TempDir::new().unwrap();
        let fake = Arc::new(FakeVcs::default());
        let sync = coordinator(&temp, fake, Some("git@example.com:me/vault.git"));

        let status = sync.vault_status().await;
        assert!(!status.exists);
        assert_eq!(status.path, temp.path());
        assert_eq!(status.remote.as_deref(), Some("git@example.com:me/vault.git"));
        assert_eq!(status.state, SyncState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_cycles_until_stopped() {
        let temp = TempDir::new().unwrap();
        let fake = Arc::new(FakeVcs::existing());
        let sync = Arc::new(coordinator(&temp, fake.clone(), None));

        let handle = sync.start(Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(25)).await;
        handle.stop().await;

        let pulls = fake.calls().iter().filter(|c| *c == "pull").count();
        assert_eq!(pulls, 2);

        tokio::time::sleep(Duration::from_secs(60)).await;
        let after = fake.calls().iter().filter(|c| *c == "pull").count();
        assert_eq!(after, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_waits_for_in_flight_cycle() {
        let temp = TempDir::new().unwrap();
        let fake = Arc::new(FakeVcs::existing());
        fake.touch("reading.md");
        let sync = Arc::new(coordinator(&temp, fake.clone(), None));

        // Hold the scope so the first scheduled cycle blocks on it
        let vault = sync.vault().clone();
        let scope = vault.lock().await;

        let handle = sync.start(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let stopper = tokio::spawn(handle.stop());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!stopper.is_finished());

        drop(scope);
        stopper.await.unwrap();

        assert!(fake.calls().contains(&"push".to_string()));
    }
}
