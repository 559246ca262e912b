//! Relocation-safe persistence of produced output locations
//!
//! The results file holds one token per line. `o/<path>` names a location
//! below the workspace output directory, `i/<path>` names the input artifact
//! itself or a location nested in it, passed through without copying. Paths
//! are relative with `/` separators, so a workspace read from another
//! location or machine resolves against the roots known at read time.

use crate::workspace::Workspace;
use kiln_core::{Error, Result, INPUT_FILE_PATH_PREFIX, OUTPUT_FILE_PATH_PREFIX};
use kiln_utils::write_atomic;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Ordered absolute locations produced by one execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    files: Vec<PathBuf>,
}

impl ResultSet {
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self { files }
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn into_files(self) -> Vec<PathBuf> {
        self.files
    }
}

/// A produced location relative to one of the two known roots
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultLocation {
    /// Below the workspace output directory; empty for the directory itself
    Output(String),
    /// The input artifact or below it; empty for the artifact itself
    Input(String),
}

impl ResultLocation {
    fn token(&self) -> String {
        match self {
            ResultLocation::Output(path) => format!("{OUTPUT_FILE_PATH_PREFIX}{path}"),
            ResultLocation::Input(path) => format!("{INPUT_FILE_PATH_PREFIX}{path}"),
        }
    }

    fn resolve(&self, output_dir: &Path, input_artifact: &Path) -> PathBuf {
        let (root, relative) = match self {
            ResultLocation::Output(path) => (output_dir, path),
            ResultLocation::Input(path) => (input_artifact, path),
        };
        if relative.is_empty() {
            return root.to_path_buf();
        }
        relative
            .split('/')
            .fold(root.to_path_buf(), |acc, segment| acc.join(segment))
    }
}

/// Reads and writes the results file of a workspace for one input artifact
#[derive(Debug, Clone)]
pub struct ResultsCodec {
    input_artifact: PathBuf,
}

impl ResultsCodec {
    pub fn new(input_artifact: impl Into<PathBuf>) -> Self {
        Self {
            input_artifact: input_artifact.into(),
        }
    }

    /// Classify `path` against the output directory and the input artifact
    ///
    /// A path below neither root is an invalid result.
    pub fn locate(&self, output_dir: &Path, path: &Path) -> Result<ResultLocation> {
        if let Some(relative) = relative_below(output_dir, path) {
            return Ok(ResultLocation::Output(relative));
        }
        if let Some(relative) = relative_below(&self.input_artifact, path) {
            return Ok(ResultLocation::Input(relative));
        }
        Err(Error::invalid_result_path(path))
    }

    /// Persist `results` into the workspace results file, atomically
    pub fn write(&self, workspace: &Workspace, results: &ResultSet) -> Result<()> {
        let output_dir = workspace.output_dir();
        let mut content = String::new();
        for file in results.files() {
            content.push_str(&self.locate(&output_dir, file)?.token());
            content.push('\n');
        }
        write_atomic(&workspace.results_file(), content.as_bytes(), "results file")
    }

    /// Reconstruct the result set of a workspace against the current roots
    pub fn read(&self, workspace: &Workspace) -> Result<ResultSet> {
        let path = workspace.results_file();
        let content = fs::read_to_string(&path)
            .map_err(|e| Error::file_system(&path, "read results file", e))?;
        let output_dir = workspace.output_dir();

        let files = content
            .lines()
            .enumerate()
            .map(|(index, line)| {
                parse_token(line)
                    .map(|location| location.resolve(&output_dir, &self.input_artifact))
                    .map_err(|reason| Error::corrupt_results(&path, index + 1, reason))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ResultSet::new(files))
    }
}

fn relative_below(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut segments = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(segment) => segments.push(segment.to_str()?.to_string()),
            _ => return None,
        }
    }
    Some(segments.join("/"))
}

fn parse_token(line: &str) -> std::result::Result<ResultLocation, String> {
    if let Some(rest) = line.strip_prefix(OUTPUT_FILE_PATH_PREFIX) {
        Ok(ResultLocation::Output(checked_relative(rest, line)?))
    } else if let Some(rest) = line.strip_prefix(INPUT_FILE_PATH_PREFIX) {
        Ok(ResultLocation::Input(checked_relative(rest, line)?))
    } else {
        Err(format!("unknown prefix in '{line}'"))
    }
}

fn checked_relative(relative: &str, line: &str) -> std::result::Result<String, String> {
    if !relative.is_empty() {
        for segment in relative.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(format!("invalid path segment '{segment}' in '{line}'"));
            }
        }
    }
    Ok(relative.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn workspace(root: &Path) -> Workspace {
        let ws = Workspace::new(root.join("ws"));
        fs::create_dir_all(ws.output_dir()).unwrap();
        ws
    }

    #[test]
    fn test_tokens_written_per_location() {
        let temp_dir = TempDir::new().unwrap();
        let ws = workspace(temp_dir.path());
        let input = PathBuf::from("/src/lib.zip");
        let codec = ResultsCodec::new(&input);

        let results = ResultSet::new(vec![
            ws.output_dir().join("Foo.out"),
            ws.output_dir().join("nested/deeper/Bar.out"),
            input.clone(),
            input.join("inner/a.class"),
            ws.output_dir(),
        ]);
        codec.write(&ws, &results).unwrap();

        let content = fs::read_to_string(ws.results_file()).unwrap();
        assert_eq!(
            content,
            "o/Foo.out\no/nested/deeper/Bar.out\ni/\ni/inner/a.class\no/\n"
        );
        assert_eq!(codec.read(&ws).unwrap(), results);
    }

    #[test]
    fn test_no_absolute_paths_persisted() {
        let temp_dir = TempDir::new().unwrap();
        let ws = workspace(temp_dir.path());
        let codec = ResultsCodec::new("/src/Foo.txt");
        codec
            .write(&ws, &ResultSet::new(vec![ws.output_dir().join("Foo.out")]))
            .unwrap();

        let content = fs::read_to_string(ws.results_file()).unwrap();
        assert!(!content.contains(&temp_dir.path().display().to_string()));
    }

    #[test]
    fn test_path_outside_roots_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let ws = workspace(temp_dir.path());
        let codec = ResultsCodec::new("/src/lib.zip");

        let err = codec
            .write(&ws, &ResultSet::new(vec![PathBuf::from("/elsewhere/out.txt")]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidResultPath { .. }));
        assert!(err.is_invariant_violation());

        let escaping = ws.output_dir().join("../results.bin");
        assert!(codec
            .write(&ws, &ResultSet::new(vec![escaping]))
            .is_err());
        assert!(!ws.results_file().exists());
    }

    #[test]
    fn test_unknown_prefix_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let ws = workspace(temp_dir.path());
        fs::write(ws.results_file(), "o/ok.txt\nx/what.txt\n").unwrap();

        let err = ResultsCodec::new("/src/lib.zip").read(&ws).unwrap_err();
        match err {
            Error::CorruptResults { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_escaping_segments_are_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let ws = workspace(temp_dir.path());
        let codec = ResultsCodec::new("/src/lib.zip");

        for bad in ["o/../x", "i/a//b", "o/./a", ""] {
            fs::write(ws.results_file(), format!("{bad}\n")).unwrap();
            let err = codec.read(&ws).unwrap_err();
            assert!(err.is_invariant_violation(), "{bad:?} should be corrupt");
        }
    }

    #[test]
    fn test_empty_result_set() {
        let temp_dir = TempDir::new().unwrap();
        let ws = workspace(temp_dir.path());
        let codec = ResultsCodec::new("/src/lib.zip");
        codec.write(&ws, &ResultSet::default()).unwrap();
        assert!(codec.read(&ws).unwrap().is_empty());
    }

    fn relative_path() -> impl Strategy<Value = Vec<String>> {
        proptest::collection::vec("[a-zA-Z0-9_]{1,8}(\\.[a-z]{1,3})?", 0..4)
    }

    proptest! {
        #[test]
        fn test_roundtrip_under_root_substitution(
            entries in proptest::collection::vec((any::<bool>(), relative_path()), 0..8)
        ) {
            let temp_dir = TempDir::new().unwrap();
            let first = Workspace::new(temp_dir.path().join("machine-a/ws"));
            let second = Workspace::new(temp_dir.path().join("machine-b/cache/ws"));
            let first_input = PathBuf::from("/home/a/lib.zip");
            let second_input = PathBuf::from("/mnt/b/repo/lib.zip");

            let build = |ws: &Workspace, input: &Path| -> ResultSet {
                ResultSet::new(
                    entries
                        .iter()
                        .map(|(is_output, segments)| {
                            let root = if *is_output { ws.output_dir() } else { input.to_path_buf() };
                            segments.iter().fold(root, |acc, s| acc.join(s))
                        })
                        .collect(),
                )
            };

            ResultsCodec::new(&first_input)
                .write(&first, &build(&first, &first_input))
                .unwrap();
            fs::create_dir_all(second.dir()).unwrap();
            fs::copy(first.results_file(), second.results_file()).unwrap();

            let read = ResultsCodec::new(&second_input).read(&second).unwrap();
            prop_assert_eq!(read, build(&second, &second_input));
        }
    }
}
