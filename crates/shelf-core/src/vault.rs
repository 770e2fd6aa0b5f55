//! Vault handle and its exclusive scope.
//!
//! Every handle opened on the same directory shares one async mutex, so a
//! foreground read-modify-write-commit sequence and a background sync cycle
//! never interleave.

use crate::store::DOCUMENT_PATH;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

type Scope = Arc<AsyncMutex<()>>;

/// Scopes of currently open vaults, keyed by resolved path.
static SCOPES: Lazy<Mutex<HashMap<PathBuf, Weak<AsyncMutex<()>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

#[derive(Clone)]
pub struct Vault {
    root: PathBuf,
    scope: Scope,
}

/// Held for the duration of one critical section.
pub struct VaultGuard<'a> {
    scope: &'a Scope,
    _guard: MutexGuard<'a, ()>,
}

impl VaultGuard<'_> {
    /// Whether this guard holds `vault`'s scope, which is shared by every
    /// handle opened on the same directory.
    pub fn guards(&self, vault: &Vault) -> bool {
        Arc::ptr_eq(self.scope, &vault.scope)
    }
}

impl Vault {
    pub fn open(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let key = resolve(&root);
        let scope = shared_scope(key);
        Self { root, scope }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn document_path(&self) -> PathBuf {
        self.root.join(DOCUMENT_PATH)
    }

    /// Enter the exclusive scope, waiting for any other holder to leave.
    pub async fn lock(&self) -> VaultGuard<'_> {
        VaultGuard {
            scope: &self.scope,
            _guard: self.scope.lock().await,
        }
    }

    /// Whether another task currently holds the scope.
    pub fn is_locked(&self) -> bool {
        self.scope.try_lock().is_err()
    }
}

/// Canonical path when the directory exists, otherwise the absolute form.
fn resolve(root: &Path) -> PathBuf {
    root.canonicalize()
        .or_else(|_| std::path::absolute(root))
        .unwrap_or_else(|_| root.to_path_buf())
}

fn shared_scope(key: PathBuf) -> Scope {
    let mut scopes = SCOPES.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    scopes.retain(|_, weak| weak.strong_count() > 0);

    if let Some(scope) = scopes.get(&key).and_then(Weak::upgrade) {
        return scope;
    }

    let scope = Arc::new(AsyncMutex::new(()));
    scopes.insert(key, Arc::downgrade(&scope));
    scope
}
