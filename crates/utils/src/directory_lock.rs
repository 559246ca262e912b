//! Cross-process exclusive locks backed by lock files

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// An exclusive advisory lock held on a lock file for as long as the value lives
#[derive(Debug)]
pub struct DirectoryLock {
    lock_file: File,
    lock_path: PathBuf,
    pid: u32,
}

impl DirectoryLock {
    /// Acquire the lock, blocking until any other holder releases it
    pub fn acquire(lock_path: &Path) -> io::Result<Self> {
        let lock_file = Self::open(lock_path)?;
        lock_file.lock_exclusive()?;
        Self::claim(lock_file, lock_path)
    }

    /// Try to acquire the lock without blocking
    ///
    /// Fails with `ErrorKind::WouldBlock` when another holder has it.
    pub fn try_acquire(lock_path: &Path) -> io::Result<Self> {
        let lock_file = Self::open(lock_path)?;
        match lock_file.try_lock_exclusive() {
            Ok(()) => Self::claim(lock_file, lock_path),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                format!("lock already held: {}", lock_path.display()),
            )),
            Err(e) => Err(e),
        }
    }

    fn open(lock_path: &Path) -> io::Result<File> {
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path)
    }

    fn claim(mut lock_file: File, lock_path: &Path) -> io::Result<Self> {
        let pid = std::process::id();
        lock_file.set_len(0)?;
        writeln!(lock_file, "{pid}")?;
        lock_file.sync_all()?;

        Ok(Self {
            lock_file,
            lock_path: lock_path.to_path_buf(),
            pid,
        })
    }

    /// Get the PID that owns this lock
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Get the lock file path
    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for DirectoryLock {
    fn drop(&mut self) {
        // The lock file stays on disk: unlinking it would let a new holder lock
        // a fresh inode while a waiter still blocks on the old one.
        let _ = fs2::FileExt::unlock(&self.lock_file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_directory_lock_exclusive() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("abc.lock");

        let lock1 = DirectoryLock::acquire(&lock_path).unwrap();
        assert_eq!(lock1.pid(), std::process::id());

        let lock2 = DirectoryLock::try_acquire(&lock_path);
        assert!(lock2.is_err());
        assert_eq!(lock2.unwrap_err().kind(), io::ErrorKind::WouldBlock);

        drop(lock1);

        let lock3 = DirectoryLock::try_acquire(&lock_path).unwrap();
        drop(lock3);
        assert!(lock_path.exists());
    }

    #[test]
    fn test_acquire_blocks_until_released() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("nested").join("ws.lock");

        let held = DirectoryLock::acquire(&lock_path).unwrap();
        let (tx, rx) = mpsc::channel();
        let waiter_path = lock_path.clone();
        let waiter = thread::spawn(move || {
            let _lock = DirectoryLock::acquire(&waiter_path).unwrap();
            tx.send(()).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        drop(held);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
    }
}
