//! Content fingerprinting of file system inputs and outputs
//!
//! A [`FileSnapshot`] captures the relative structure and content hashes of a
//! file or directory tree. A [`Fingerprint`] condenses a snapshot into one
//! hash under a [`NormalizationStrategy`], which decides how much of each
//! entry's path takes part. Under relative or name-only normalization the
//! fingerprint does not depend on where the tree lives on disk.

use crate::hashing::{hash_file, HashCode, Hasher};
use kiln_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Kind of a file system location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileKind {
    RegularFile,
    Directory,
    Missing,
}

impl FileKind {
    fn tag(self) -> &'static str {
        match self {
            FileKind::RegularFile => "file",
            FileKind::Directory => "dir",
            FileKind::Missing => "missing",
        }
    }
}

/// One location below a snapshot root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    /// Slash-separated path relative to the snapshot root
    pub relative_path: String,
    pub kind: FileKind,
    pub content_hash: HashCode,
}

/// Content and relative structure of a file system location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSnapshot {
    absolute_path: PathBuf,
    kind: FileKind,
    content_hash: HashCode,
    /// Entries below a directory root, sorted by relative path
    entries: Vec<SnapshotEntry>,
    hash: HashCode,
}

impl FileSnapshot {
    /// Snapshot of a location that does not exist
    pub fn missing(absolute_path: impl Into<PathBuf>) -> Self {
        let marker = missing_hash();
        Self {
            absolute_path: absolute_path.into(),
            kind: FileKind::Missing,
            content_hash: marker,
            entries: Vec::new(),
            hash: marker,
        }
    }

    /// Snapshot of a single regular file
    pub fn file(absolute_path: impl Into<PathBuf>, content_hash: HashCode) -> Self {
        Self {
            absolute_path: absolute_path.into(),
            kind: FileKind::RegularFile,
            content_hash,
            entries: Vec::new(),
            hash: content_hash,
        }
    }

    /// Snapshot of a directory tree
    pub fn directory(absolute_path: impl Into<PathBuf>, mut entries: Vec<SnapshotEntry>) -> Self {
        entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        let mut hasher = Hasher::new();
        hasher.put_str(FileKind::Directory.tag());
        for entry in &entries {
            hasher
                .put_str(&entry.relative_path)
                .put_str(entry.kind.tag())
                .put_hash(&entry.content_hash);
        }
        Self {
            absolute_path: absolute_path.into(),
            kind: FileKind::Directory,
            content_hash: directory_hash(),
            entries,
            hash: hasher.finish(),
        }
    }

    pub fn absolute_path(&self) -> &Path {
        &self.absolute_path
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn entries(&self) -> &[SnapshotEntry] {
        &self.entries
    }

    /// Aggregate hash of the content and relative structure, independent of
    /// the root's own name and location
    pub fn hash(&self) -> HashCode {
        self.hash
    }

    fn name(&self) -> String {
        self.absolute_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// How much of each path takes part in a fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NormalizationStrategy {
    /// Full absolute path of every entry
    AbsolutePath,
    /// Root name plus each entry's path relative to the root
    #[default]
    RelativePath,
    /// File name of each entry only
    NameOnly,
    /// Content only; directories are ignored
    IgnorePath,
}

/// Normalized content signature of one or more file system locations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(HashCode);

impl Fingerprint {
    pub fn hash(&self) -> HashCode {
        self.0
    }
}

impl From<HashCode> for Fingerprint {
    fn from(hash: HashCode) -> Self {
        Self(hash)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Read access to the file system, producing snapshots
pub trait FileSystemAccess: Send + Sync {
    /// Snapshot the location at `path`; a missing location is not an error
    fn read(&self, path: &Path) -> Result<FileSnapshot>;
}

/// [`FileSystemAccess`] over the local disk
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileSystem;

impl FileSystemAccess for LocalFileSystem {
    fn read(&self, path: &Path) -> Result<FileSnapshot> {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(FileSnapshot::missing(path));
            }
            Err(e) => return Err(Error::file_system(path, "read metadata", e)),
        };

        if metadata.is_file() {
            return Ok(FileSnapshot::file(path, hash_file(path)?));
        }

        let mut entries = Vec::new();
        for entry in WalkDir::new(path).min_depth(1).follow_links(true) {
            let entry = entry.map_err(|e| {
                let io_error: io::Error = e.into();
                Error::file_system(path, "walk directory", io_error)
            })?;
            let relative_path = relative_slash_path(path, entry.path())?;
            if entry.file_type().is_dir() {
                entries.push(SnapshotEntry {
                    relative_path,
                    kind: FileKind::Directory,
                    content_hash: directory_hash(),
                });
            } else {
                entries.push(SnapshotEntry {
                    relative_path,
                    kind: FileKind::RegularFile,
                    content_hash: hash_file(entry.path())?,
                });
            }
        }

        Ok(FileSnapshot::directory(path, entries))
    }
}

/// Path of `root` after normalization, as used by content-addressed identities
pub fn normalize_path(snapshot: &FileSnapshot, strategy: NormalizationStrategy) -> String {
    match strategy {
        NormalizationStrategy::AbsolutePath => slash_path(snapshot.absolute_path()),
        NormalizationStrategy::RelativePath | NormalizationStrategy::NameOnly => snapshot.name(),
        NormalizationStrategy::IgnorePath => String::new(),
    }
}

/// Fingerprint a single snapshot
pub fn fingerprint(snapshot: &FileSnapshot, strategy: NormalizationStrategy) -> Fingerprint {
    fingerprint_collection(std::slice::from_ref(snapshot), strategy)
}

/// Fingerprint several roots into one signature, regardless of their order
///
/// Each root is condensed on its own, with its entries qualified by the
/// normalized root path, so entries never move between roots unnoticed.
pub fn fingerprint_collection(
    snapshots: &[FileSnapshot],
    strategy: NormalizationStrategy,
) -> Fingerprint {
    let mut roots: Vec<HashCode> = snapshots
        .iter()
        .map(|snapshot| root_hash(snapshot, strategy))
        .collect();
    roots.sort();

    let mut hasher = Hasher::new();
    hasher.put_u64(roots.len() as u64);
    for root in &roots {
        hasher.put_hash(root);
    }
    Fingerprint(hasher.finish())
}

fn root_hash(snapshot: &FileSnapshot, strategy: NormalizationStrategy) -> HashCode {
    let root_path = normalize_path(snapshot, strategy);
    let ignore_dirs = strategy == NormalizationStrategy::IgnorePath;

    let mut entries: Vec<(String, FileKind, HashCode)> = snapshot
        .entries
        .iter()
        .filter(|entry| !(ignore_dirs && entry.kind == FileKind::Directory))
        .map(|entry| {
            let path = match strategy {
                NormalizationStrategy::AbsolutePath | NormalizationStrategy::RelativePath => {
                    format!("{root_path}/{}", entry.relative_path)
                }
                NormalizationStrategy::NameOnly => entry
                    .relative_path
                    .rsplit('/')
                    .next()
                    .unwrap_or_default()
                    .to_string(),
                NormalizationStrategy::IgnorePath => String::new(),
            };
            (path, entry.kind, entry.content_hash)
        })
        .collect();

    let mut hasher = Hasher::new();
    if ignore_dirs {
        // Only content counts: a lone file equals a directory holding just that file
        if snapshot.kind != FileKind::Directory {
            entries.push((String::new(), snapshot.kind, snapshot.content_hash));
        }
    } else {
        hasher
            .put_str(&root_path)
            .put_str(snapshot.kind.tag())
            .put_hash(&snapshot.content_hash);
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.2.cmp(&b.2)));

    hasher.put_u64(entries.len() as u64);
    for (path, kind, hash) in &entries {
        hasher.put_str(path).put_str(kind.tag()).put_hash(hash);
    }
    hasher.finish()
}

/// Snapshots and fingerprints paths through a [`FileSystemAccess`]
#[derive(Clone)]
pub struct Fingerprinter {
    file_system: std::sync::Arc<dyn FileSystemAccess>,
}

impl fmt::Debug for Fingerprinter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fingerprinter").finish_non_exhaustive()
    }
}

impl Fingerprinter {
    pub fn new(file_system: std::sync::Arc<dyn FileSystemAccess>) -> Self {
        Self { file_system }
    }

    /// Snapshot one location
    pub fn snapshot(&self, path: &Path) -> Result<FileSnapshot> {
        self.file_system.read(path)
    }

    /// Snapshot and fingerprint one location
    pub fn fingerprint_path(
        &self,
        path: &Path,
        strategy: NormalizationStrategy,
    ) -> Result<Fingerprint> {
        Ok(fingerprint(&self.snapshot(path)?, strategy))
    }

    /// Snapshot and fingerprint several locations as one collection
    pub fn fingerprint_paths(
        &self,
        paths: &[PathBuf],
        strategy: NormalizationStrategy,
    ) -> Result<Fingerprint> {
        let snapshots = paths
            .iter()
            .map(|p| self.snapshot(p))
            .collect::<Result<Vec<_>>>()?;
        Ok(fingerprint_collection(&snapshots, strategy))
    }
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new(std::sync::Arc::new(LocalFileSystem))
    }
}

fn missing_hash() -> HashCode {
    HashCode::of(b"kiln:missing")
}

fn directory_hash() -> HashCode {
    HashCode::of(b"kiln:directory")
}

/// Render a path with `/` separators regardless of platform
pub(crate) fn slash_path(path: &Path) -> String {
    let rendered: Vec<String> = path
        .components()
        .filter_map(|c| match c {
            Component::RootDir => Some(String::new()),
            Component::Prefix(p) => Some(p.as_os_str().to_string_lossy().into_owned()),
            Component::CurDir => None,
            other => Some(other.as_os_str().to_string_lossy().into_owned()),
        })
        .collect();
    if rendered.len() == 1 && rendered[0].is_empty() {
        return "/".to_string();
    }
    rendered.join("/")
}

fn relative_slash_path(root: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(root).map_err(|_| {
        Error::configuration(format!(
            "{} is not below {}",
            path.display(),
            root.display()
        ))
    })?;
    Ok(slash_path(relative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn tree(root: &Path) {
        write(&root.join("a.txt"), "alpha");
        write(&root.join("nested/b.txt"), "beta");
    }

    #[test]
    fn test_missing_location_is_a_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let snapshot = LocalFileSystem.read(&temp_dir.path().join("nope")).unwrap();
        assert_eq!(snapshot.kind(), FileKind::Missing);
        assert!(snapshot.entries().is_empty());
    }

    #[test]
    fn test_file_snapshot_hash_is_content_hash() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("Foo.txt");
        write(&path, "A");

        let snapshot = LocalFileSystem.read(&path).unwrap();
        assert_eq!(snapshot.kind(), FileKind::RegularFile);
        assert_eq!(snapshot.hash(), HashCode::of(b"A"));
    }

    #[test]
    fn test_directory_snapshot_lists_relative_entries() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("lib");
        tree(&root);

        let snapshot = LocalFileSystem.read(&root).unwrap();
        let paths: Vec<_> = snapshot
            .entries()
            .iter()
            .map(|e| e.relative_path.as_str())
            .collect();
        assert_eq!(paths, vec!["a.txt", "nested", "nested/b.txt"]);
    }

    #[test]
    fn test_relative_fingerprint_ignores_location() {
        let one = TempDir::new().unwrap();
        let two = TempDir::new().unwrap();
        tree(&one.path().join("lib"));
        tree(&two.path().join("deeper/still/lib"));

        let a = LocalFileSystem.read(&one.path().join("lib")).unwrap();
        let b = LocalFileSystem
            .read(&two.path().join("deeper/still/lib"))
            .unwrap();

        assert_eq!(
            fingerprint(&a, NormalizationStrategy::RelativePath),
            fingerprint(&b, NormalizationStrategy::RelativePath)
        );
        assert_ne!(
            fingerprint(&a, NormalizationStrategy::AbsolutePath),
            fingerprint(&b, NormalizationStrategy::AbsolutePath)
        );
    }

    #[test]
    fn test_content_change_changes_fingerprint() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("lib");
        tree(&root);
        let before = fingerprint(
            &LocalFileSystem.read(&root).unwrap(),
            NormalizationStrategy::RelativePath,
        );

        write(&root.join("nested/b.txt"), "changed");
        let after = fingerprint(
            &LocalFileSystem.read(&root).unwrap(),
            NormalizationStrategy::RelativePath,
        );
        assert_ne!(before, after);
    }

    #[test]
    fn test_rename_matters_unless_paths_ignored() {
        let one = TempDir::new().unwrap();
        let two = TempDir::new().unwrap();
        write(&one.path().join("out/x.txt"), "same");
        write(&two.path().join("out/y.txt"), "same");

        let a = LocalFileSystem.read(&one.path().join("out")).unwrap();
        let b = LocalFileSystem.read(&two.path().join("out")).unwrap();

        assert_ne!(
            fingerprint(&a, NormalizationStrategy::NameOnly),
            fingerprint(&b, NormalizationStrategy::NameOnly)
        );
        assert_eq!(
            fingerprint(&a, NormalizationStrategy::IgnorePath),
            fingerprint(&b, NormalizationStrategy::IgnorePath)
        );
    }

    #[test]
    fn test_collection_fingerprint_ignores_order() {
        let temp_dir = TempDir::new().unwrap();
        let a = temp_dir.path().join("a.jar");
        let b = temp_dir.path().join("b.jar");
        write(&a, "A");
        write(&b, "B");

        let fingerprinter = Fingerprinter::default();
        let forward = fingerprinter
            .fingerprint_paths(&[a.clone(), b.clone()], NormalizationStrategy::NameOnly)
            .unwrap();
        let backward = fingerprinter
            .fingerprint_paths(&[b, a], NormalizationStrategy::NameOnly)
            .unwrap();
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_missing_and_empty_directory_differ() {
        let temp_dir = TempDir::new().unwrap();
        let empty = temp_dir.path().join("empty");
        fs::create_dir_all(&empty).unwrap();

        let missing = FileSnapshot::missing(temp_dir.path().join("empty"));
        let present = LocalFileSystem.read(&empty).unwrap();
        assert_ne!(
            fingerprint(&missing, NormalizationStrategy::RelativePath),
            fingerprint(&present, NormalizationStrategy::RelativePath)
        );
    }

    fn dir(path: &Path) {
        fs::create_dir_all(path).unwrap();
    }

    #[test]
    fn test_swapped_nesting_across_roots_differs() {
        let one = TempDir::new().unwrap();
        let two = TempDir::new().unwrap();
        dir(&one.path().join("a/b"));
        dir(&two.path().join("b/a"));

        let fingerprinter = Fingerprinter::default();
        for strategy in [
            NormalizationStrategy::RelativePath,
            NormalizationStrategy::NameOnly,
        ] {
            let nested = fingerprinter
                .fingerprint_paths(&[one.path().join("a")], strategy)
                .unwrap();
            let swapped = fingerprinter
                .fingerprint_paths(&[two.path().join("b")], strategy)
                .unwrap();
            assert_ne!(nested, swapped, "{strategy:?}");
        }
    }

    #[test]
    fn test_nested_file_differs_from_sibling_root() {
        let nested_root = TempDir::new().unwrap();
        let flat_root = TempDir::new().unwrap();
        write(&nested_root.path().join("lib/a.txt"), "alpha");
        dir(&flat_root.path().join("lib"));
        write(&flat_root.path().join("a.txt"), "alpha");

        let fingerprinter = Fingerprinter::default();
        for strategy in [
            NormalizationStrategy::RelativePath,
            NormalizationStrategy::NameOnly,
            NormalizationStrategy::IgnorePath,
        ] {
            let nested = fingerprinter
                .fingerprint_paths(&[nested_root.path().join("lib")], strategy)
                .unwrap();
            let flat = fingerprinter
                .fingerprint_paths(
                    &[flat_root.path().join("lib"), flat_root.path().join("a.txt")],
                    strategy,
                )
                .unwrap();
            assert_ne!(nested, flat, "{strategy:?}");
        }
    }

    #[test]
    fn test_ignore_path_matches_lone_file_and_its_directory() {
        let temp_dir = TempDir::new().unwrap();
        write(&temp_dir.path().join("x.txt"), "same");
        write(&temp_dir.path().join("out/y.txt"), "same");

        let fingerprinter = Fingerprinter::default();
        assert_eq!(
            fingerprinter
                .fingerprint_path(&temp_dir.path().join("x.txt"), NormalizationStrategy::IgnorePath)
                .unwrap(),
            fingerprinter
                .fingerprint_path(&temp_dir.path().join("out"), NormalizationStrategy::IgnorePath)
                .unwrap()
        );
    }

    #[test]
    fn test_normalize_path() {
        let snapshot = FileSnapshot::file("/src/Foo.txt", HashCode::of(b"A"));
        assert_eq!(
            normalize_path(&snapshot, NormalizationStrategy::AbsolutePath),
            "/src/Foo.txt"
        );
        assert_eq!(
            normalize_path(&snapshot, NormalizationStrategy::RelativePath),
            "Foo.txt"
        );
        assert_eq!(
            normalize_path(&snapshot, NormalizationStrategy::IgnorePath),
            ""
        );
    }

    #[test]
    fn test_slash_path() {
        assert_eq!(slash_path(Path::new("/a/b/c.txt")), "/a/b/c.txt");
        assert_eq!(slash_path(Path::new("a/b")), "a/b");
        assert_eq!(slash_path(Path::new("/")), "/");
    }
}
