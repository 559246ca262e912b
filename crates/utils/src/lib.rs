//! Shared utilities for kiln
//!
//! File system helpers (atomic writes, lock files, XDG paths) and tracing
//! setup used by the execution core.

pub mod atomic_file;
pub mod directory_lock;
pub mod tracing;
pub mod xdg;

pub use atomic_file::*;
pub use directory_lock::DirectoryLock;
pub use xdg::XdgPaths;
