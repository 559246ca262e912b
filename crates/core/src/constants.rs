/// Constants used throughout the kiln codebase
// Environment variable names
pub const KILN_LOG_VAR: &str = "KILN_LOG";
pub const KILN_CACHE_DIR_VAR: &str = "KILN_CACHE_DIR";
pub const KILN_CROSS_PROCESS_LOCKS_VAR: &str = "KILN_CROSS_PROCESS_LOCKS";

// Application directory name under the XDG base directories
pub const APP_DIR_NAME: &str = "kiln";

// Workspace layout
pub const TRANSFORMS_DIR_NAME: &str = "transforms";
pub const DEFAULT_PROJECT_CACHE_DIR: &str = ".kiln/transforms";
pub const OUTPUT_DIR_NAME: &str = "transformed";
pub const RESULTS_FILE_NAME: &str = "results.bin";
pub const HISTORY_DIR_NAME: &str = "history";
pub const LOCK_FILE_EXTENSION: &str = "lock";

// Results file line prefixes
pub const INPUT_FILE_PATH_PREFIX: &str = "i/";
pub const OUTPUT_FILE_PATH_PREFIX: &str = "o/";

// Property names recorded in execution history
pub const INPUT_ARTIFACT_PROPERTY: &str = "inputArtifact";
pub const DEPENDENCIES_PROPERTY: &str = "inputArtifactDependencies";
pub const SECONDARY_INPUTS_PROPERTY: &str = "inputPropertiesHash";
pub const OUTPUT_DIRECTORY_PROPERTY: &str = "outputDirectory";
pub const RESULTS_FILE_PROPERTY: &str = "resultsFile";
