//! Single-run ownership of a workspace location
//!
//! Two layers: a process-wide registry of active roots (rejects a second run
//! from the same process) and a sibling lock file holding the owner pid
//! (rejects a run from another live process). A lock file whose owner is
//! gone is stale and gets replaced.

use super::handle::WorkspaceError;
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use tracing::{debug, warn};

fn active_roots() -> &'static Mutex<HashSet<PathBuf>> {
    static ACTIVE: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
    ACTIVE.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Held for the lifetime of an open workspace; released on drop.
#[derive(Debug)]
pub(crate) struct RunLock {
    root: PathBuf,
    lock_path: PathBuf,
}

impl RunLock {
    /// Lock file path for a workspace root: `<root>.lock` next to it.
    pub(crate) fn lock_path_for(root: &Path) -> PathBuf {
        let mut name = root
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "workspace".into());
        name.push(".lock");
        root.with_file_name(name)
    }

    pub(crate) fn acquire(root: &Path) -> Result<Self, WorkspaceError> {
        let root = absolute(root)?;
        {
            let mut active = active_roots().lock().map_err(|_| WorkspaceError::Poisoned)?;
            if !active.insert(root.clone()) {
                return Err(WorkspaceError::Busy { root, owner: None });
            }
        }

        let lock_path = Self::lock_path_for(&root);
        match write_lock_file(&lock_path) {
            Ok(()) => {
                debug!(path = %lock_path.display(), "acquired workspace lock");
                Ok(Self { root, lock_path })
            }
            Err(err) => {
                if let Ok(mut active) = active_roots().lock() {
                    active.remove(&root);
                }
                Err(err)
            }
        }
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.lock_path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %self.lock_path.display(), error = %e, "failed to remove workspace lock");
            }
        }
        if let Ok(mut active) = active_roots().lock() {
            active.remove(&self.root);
        }
    }
}

fn absolute(path: &Path) -> Result<PathBuf, WorkspaceError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|source| WorkspaceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(cwd.join(path))
}

fn write_lock_file(lock_path: &Path) -> Result<(), WorkspaceError> {
    let io_err = |source| WorkspaceError::Io {
        path: lock_path.to_path_buf(),
        source,
    };
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }

    // Second pass only happens after a stale lock was removed.
    for _ in 0..2 {
        match OpenOptions::new().write(true).create_new(true).open(lock_path) {
            Ok(mut file) => {
                write!(file, "{}", std::process::id()).map_err(io_err)?;
                return Ok(());
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let owner = std::fs::read_to_string(lock_path)
                    .ok()
                    .and_then(|s| s.trim().parse::<u32>().ok());
                match owner {
                    Some(pid) if pid != std::process::id() && pid_alive(pid) => {
                        return Err(WorkspaceError::Busy {
                            root: lock_path.to_path_buf(),
                            owner: Some(pid),
                        });
                    }
                    _ => {
                        warn!(path = %lock_path.display(), owner = ?owner, "removing stale workspace lock");
                        match std::fs::remove_file(lock_path) {
                            Ok(()) => {}
                            Err(e) if e.kind() == ErrorKind::NotFound => {}
                            Err(e) => return Err(io_err(e)),
                        }
                    }
                }
            }
            Err(e) => return Err(io_err(e)),
        }
    }
    Err(WorkspaceError::Busy {
        root: lock_path.to_path_buf(),
        owner: None,
    })
}

#[cfg(target_os = "linux")]
fn pid_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn pid_alive(_pid: u32) -> bool {
    false
}
