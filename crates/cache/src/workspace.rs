//! Exclusive, durable workspace directories keyed by identity
//!
//! Every identity owns one directory below the manager's root. Access is
//! serialized per identity: inside a process through a lock slot held in a
//! sharded map, and optionally across processes through a lock file next to
//! the workspace. Distinct identities never wait on each other.

use crate::identity::Identity;
use dashmap::DashMap;
use kiln_core::{Error, Result, LOCK_FILE_EXTENSION, OUTPUT_DIR_NAME, RESULTS_FILE_NAME};
use kiln_utils::DirectoryLock;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};

/// The directory bound to one identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Root under which a unit of work writes its outputs
    pub fn output_dir(&self) -> PathBuf {
        self.dir.join(OUTPUT_DIR_NAME)
    }

    /// File listing the produced output locations
    pub fn results_file(&self) -> PathBuf {
        self.dir.join(RESULTS_FILE_NAME)
    }
}

type Slot = Arc<Mutex<()>>;

/// Allocates workspaces below a root and serializes access per identity
#[derive(Debug)]
pub struct WorkspaceManager {
    root: PathBuf,
    slots: DashMap<String, Slot>,
    cross_process: bool,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>, cross_process: bool) -> Self {
        Self {
            root: root.into(),
            slots: DashMap::new(),
            cross_process,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Workspace of `identity`, without acquiring it
    pub fn workspace_for(&self, identity: &Identity) -> Workspace {
        Workspace::new(self.root.join(identity.unique_id()))
    }

    /// Run `action` with exclusive access to the workspace of `identity`
    ///
    /// Blocks while another caller holds the same workspace. The directory
    /// exists when `action` starts. Access is released on every exit path,
    /// including errors and panics inside `action`.
    pub fn with_workspace<T, F>(&self, identity: &Identity, action: F) -> Result<T>
    where
        F: FnOnce(&Workspace) -> Result<T>,
    {
        let key = identity.unique_id();
        let workspace = Workspace::new(self.root.join(&key));

        let slot = SlotRelease {
            slots: &self.slots,
            key: &key,
            slot: self
                .slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone(),
        };
        trace!(workspace = %key, "waiting for workspace");
        let _guard = slot.slot.lock();

        let _file_lock = if self.cross_process {
            let lock_path = self.root.join(format!("{key}.{LOCK_FILE_EXTENSION}"));
            Some(
                DirectoryLock::acquire(&lock_path)
                    .map_err(|e| Error::workspace_acquisition(&lock_path, e))?,
            )
        } else {
            None
        };

        fs::create_dir_all(workspace.dir())
            .map_err(|e| Error::workspace_acquisition(workspace.dir(), e))?;
        debug!(workspace = %workspace.dir().display(), "acquired workspace");

        action(&workspace)
    }

    /// Number of identities currently held or waited on in this process
    pub fn active_slots(&self) -> usize {
        self.slots.len()
    }
}

/// Drops the lock slot from the map once nobody else holds or waits on it
struct SlotRelease<'a> {
    slots: &'a DashMap<String, Slot>,
    key: &'a str,
    slot: Slot,
}

impl Drop for SlotRelease<'_> {
    fn drop(&mut self) {
        // Two references left: the map's and ours
        self.slots
            .remove_if(self.key, |_, slot| Arc::strong_count(slot) == 2);
    }
}
