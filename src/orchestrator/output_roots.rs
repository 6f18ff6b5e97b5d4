//! Active output root plus the root each run was written under.
//!
//! The user can switch the output folder at any time. Download links for runs
//! created before the switch must keep working, so every run id is pinned to
//! the root it was created in.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

struct Roots {
    global: PathBuf,
    runs: HashMap<String, PathBuf>,
}

/// Thread-safe registry of output roots.
pub struct OutputRootRegistry {
    inner: Mutex<Roots>,
}

impl OutputRootRegistry {
    pub fn new(root: PathBuf) -> Self {
        Self {
            inner: Mutex::new(Roots {
                global: root,
                runs: HashMap::new(),
            }),
        }
    }

    /// The root new runs are created under.
    pub fn get_root(&self) -> PathBuf {
        self.lock().global.clone()
    }

    /// Change the root for new runs. Existing runs are unaffected.
    pub fn set_root(&self, root: PathBuf) {
        let mut roots = self.lock();
        tracing::info!(
            from = %roots.global.display(),
            to = %root.display(),
            "Output root changed"
        );
        roots.global = root;
    }

    /// Pin `run_id` to `root`. The first binding wins.
    pub fn bind_run(&self, run_id: &str, root: &Path) {
        self.lock()
            .runs
            .entry(run_id.to_string())
            .or_insert_with(|| root.to_path_buf());
    }

    pub fn is_bound(&self, run_id: &str) -> bool {
        self.lock().runs.contains_key(run_id)
    }

    /// Root a run was created under, or the current root for unknown runs.
    pub fn get_run_root(&self, run_id: &str) -> PathBuf {
        let roots = self.lock();
        roots
            .runs
            .get(run_id)
            .cloned()
            .unwrap_or_else(|| roots.global.clone())
    }

    fn lock(&self) -> MutexGuard<'_, Roots> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
