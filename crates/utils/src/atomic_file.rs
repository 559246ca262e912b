//! Crash-safe replacement of workspace and history files
//!
//! Results files and history records are only trusted when complete. Each
//! write goes to a uniquely named sibling, is flushed, renamed over the
//! target and then the parent directory is flushed, so after a crash the
//! target holds either the previous bytes or the new ones.

use kiln_core::{Error, Result};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use uuid::Uuid;

/// Replace `path` with `content` atomically and durably
///
/// `what` names the file in error reports, e.g. `"results file"` or
/// `"history record"`.
pub fn write_atomic(path: &Path, content: &[u8], what: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => {
            return Err(Error::file_system(
                path,
                format!("locate directory of {what}"),
                io::Error::new(io::ErrorKind::InvalidInput, "path has no parent directory"),
            ))
        }
    };
    fs::create_dir_all(parent)
        .map_err(|e| Error::file_system(parent, format!("create directory for {what}"), e))?;

    let staging = parent.join(format!(".{}.tmp", Uuid::new_v4()));
    if let Err(e) = stage(&staging, content) {
        let _ = fs::remove_file(&staging);
        return Err(Error::file_system(&staging, format!("stage {what}"), e));
    }
    if let Err(e) = fs::rename(&staging, path) {
        let _ = fs::remove_file(&staging);
        return Err(Error::file_system(path, format!("replace {what}"), e));
    }
    sync_dir(parent).map_err(|e| Error::file_system(parent, format!("persist {what}"), e))
}

fn stage(staging: &Path, content: &[u8]) -> io::Result<()> {
    let mut file = File::create(staging)?;
    file.write_all(content)?;
    file.sync_all()
}

/// Flush the directory entry created by the rename
#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

// Directory handles cannot be fsynced here; the rename is as durable as it gets
#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
