//! Identity resolution for units of work
//!
//! An [`Identity`] is the cache key of one unit of work. Which fields take
//! part depends on the producer of the input artifact:
//!
//! - artifacts from an external, immutable source are content addressed, so
//!   two copies of the same file at different locations share one workspace
//! - artifacts produced inside a project are keyed by their absolute path,
//!   because outputs derived from them may embed that location

use crate::fingerprint::Fingerprint;
use crate::hashing::{HashCode, Hasher};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Where the input artifact of a unit of work comes from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Producer {
    /// Immutable, content-addressed artifact (e.g. a downloaded library)
    External,
    /// Mutable artifact produced by the project rooted at `dir`
    Project { dir: PathBuf },
}

impl Producer {
    pub fn is_content_addressed(&self) -> bool {
        matches!(self, Producer::External)
    }
}

/// Configuration of the work itself, hashed into the identity
///
/// Values are kept in name order and serialized canonically, so the order in
/// which properties were declared never changes the hash.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecondaryInputs {
    implementation: String,
    values: BTreeMap<String, Value>,
}

impl SecondaryInputs {
    /// Secondary inputs for the given implementation identifier
    pub fn new(implementation: impl Into<String>) -> Self {
        Self {
            implementation: implementation.into(),
            values: BTreeMap::new(),
        }
    }

    /// Set a named value property, replacing an earlier value of that name
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.insert(name, value);
        self
    }

    pub fn implementation(&self) -> &str {
        &self.implementation
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn hash(&self) -> HashCode {
        let mut hasher = Hasher::new();
        hasher.put_str(&self.implementation);
        hasher.put_u64(self.values.len() as u64);
        for (name, value) in &self.values {
            hasher.put_str(name).put_str(&to_canonical_json(value));
        }
        hasher.finish()
    }
}

/// Serialize a JSON value with sorted object keys and no whitespace
pub fn to_canonical_json(value: &Value) -> String {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => value.to_string(),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(to_canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        Value::Object(map) => {
            let sorted: BTreeMap<&String, String> = map
                .iter()
                .map(|(k, v)| (k, to_canonical_json(v)))
                .collect();
            let items: Vec<String> = sorted
                .into_iter()
                .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), v))
                .collect();
            format!("{{{}}}", items.join(","))
        }
    }
}

/// Fingerprints of the file inputs of one unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFingerprints {
    /// Absolute path of the input artifact
    pub input_path: PathBuf,
    /// Input path under the declared normalization strategy
    pub normalized_input_path: String,
    /// Content hash of the input artifact
    pub input_hash: HashCode,
    /// Combined fingerprint of all dependencies
    pub dependencies: Fingerprint,
}

/// Cache key of a unit of work
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Identity {
    /// Location independent identity of immutable inputs
    ContentAddressed {
        normalized_input_path: String,
        input_hash: HashCode,
        secondary_hash: HashCode,
        dependencies_hash: HashCode,
    },
    /// Location sensitive identity of project-local inputs
    ProjectLocal {
        input_absolute_path: PathBuf,
        secondary_hash: HashCode,
        dependencies_hash: HashCode,
    },
}

impl Identity {
    /// Stable hex id over the identity's fields in fixed order
    pub fn unique_id(&self) -> String {
        let mut hasher = Hasher::new();
        match self {
            Identity::ContentAddressed {
                normalized_input_path,
                input_hash,
                secondary_hash,
                dependencies_hash,
            } => {
                hasher
                    .put_str("content-addressed")
                    .put_str(normalized_input_path)
                    .put_hash(input_hash)
                    .put_hash(secondary_hash)
                    .put_hash(dependencies_hash);
            }
            Identity::ProjectLocal {
                input_absolute_path,
                secondary_hash,
                dependencies_hash,
            } => {
                hasher
                    .put_str("project-local")
                    .put_str(&crate::fingerprint::slash_path(input_absolute_path))
                    .put_hash(secondary_hash)
                    .put_hash(dependencies_hash);
            }
        }
        hasher.finish().to_hex()
    }

    pub fn is_content_addressed(&self) -> bool {
        matches!(self, Identity::ContentAddressed { .. })
    }

    pub fn secondary_hash(&self) -> HashCode {
        match self {
            Identity::ContentAddressed { secondary_hash, .. }
            | Identity::ProjectLocal { secondary_hash, .. } => *secondary_hash,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.unique_id())
    }
}

/// Derive the identity of a unit of work under its producer's policy
pub fn resolve(
    producer: &Producer,
    inputs: &InputFingerprints,
    secondary_hash: HashCode,
) -> Identity {
    match producer {
        Producer::External => Identity::ContentAddressed {
            normalized_input_path: inputs.normalized_input_path.clone(),
            input_hash: inputs.input_hash,
            secondary_hash,
            dependencies_hash: inputs.dependencies.hash(),
        },
        Producer::Project { .. } => Identity::ProjectLocal {
            input_absolute_path: inputs.input_path.clone(),
            secondary_hash,
            dependencies_hash: inputs.dependencies.hash(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::{fingerprint_collection, FileSnapshot, NormalizationStrategy};
    use proptest::prelude::*;
    use serde_json::json;

    fn inputs(path: &str, content: &[u8]) -> InputFingerprints {
        let path = PathBuf::from(path);
        let snapshot = FileSnapshot::file(&path, HashCode::of(content));
        InputFingerprints {
            normalized_input_path: crate::fingerprint::normalize_path(
                &snapshot,
                NormalizationStrategy::RelativePath,
            ),
            input_path: path,
            input_hash: snapshot.hash(),
            dependencies: fingerprint_collection(&[], NormalizationStrategy::NameOnly),
        }
    }

    #[test]
    fn test_content_addressed_ignores_location() {
        let secondary = SecondaryInputs::new("Unzip").hash();
        let a = resolve(&Producer::External, &inputs("/m2/lib.zip", b"zip"), secondary);
        let b = resolve(&Producer::External, &inputs("/other/lib.zip", b"zip"), secondary);
        assert_eq!(a, b);
        assert_eq!(a.unique_id(), b.unique_id());
    }

    #[test]
    fn test_content_addressed_sees_content() {
        let secondary = SecondaryInputs::new("Unzip").hash();
        let a = resolve(&Producer::External, &inputs("/m2/lib.zip", b"one"), secondary);
        let b = resolve(&Producer::External, &inputs("/m2/lib.zip", b"two"), secondary);
        assert_ne!(a.unique_id(), b.unique_id());
    }

    #[test]
    fn test_project_local_sees_location() {
        let project = Producer::Project {
            dir: PathBuf::from("/work"),
        };
        let secondary = SecondaryInputs::new("Minify").hash();
        let a = resolve(&project, &inputs("/work/a/app.js", b"x"), secondary);
        let b = resolve(&project, &inputs("/work/b/app.js", b"x"), secondary);
        assert_ne!(a.unique_id(), b.unique_id());
        assert!(!a.is_content_addressed());
    }

    #[test]
    fn test_policies_never_alias() {
        let secondary = SecondaryInputs::new("Minify").hash();
        let input = inputs("/work/app.js", b"x");
        let a = resolve(&Producer::External, &input, secondary);
        let b = resolve(
            &Producer::Project {
                dir: PathBuf::from("/work"),
            },
            &input,
            secondary,
        );
        assert_ne!(a.unique_id(), b.unique_id());
    }

    #[test]
    fn test_secondary_inputs_separate_behaviour() {
        let input = inputs("/m2/lib.zip", b"zip");
        let minify = SecondaryInputs::new("Transform").with("level", json!(1));
        let harder = SecondaryInputs::new("Transform").with("level", json!(2));
        let other = SecondaryInputs::new("Other").with("level", json!(1));

        let ids: Vec<String> = [minify, harder, other]
            .iter()
            .map(|s| resolve(&Producer::External, &input, s.hash()).unique_id())
            .collect();
        assert_ne!(ids[0], ids[1]);
        assert_ne!(ids[0], ids[2]);
        assert_ne!(ids[1], ids[2]);
    }

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let value = json!({ "z": [ { "y": "yes" }, null ], "a": { "x": 10 } });
        assert_eq!(
            to_canonical_json(&value),
            "{\"a\":{\"x\":10},\"z\":[{\"y\":\"yes\"},null]}"
        );
        assert_eq!(to_canonical_json(&json!("quote\"d")), "\"quote\\\"d\"");
    }

    #[test]
    fn test_unique_id_is_hex_sha256() {
        let id = resolve(
            &Producer::External,
            &inputs("/m2/lib.zip", b"zip"),
            SecondaryInputs::new("Unzip").hash(),
        )
        .unique_id();
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    proptest! {
        #[test]
        fn test_identity_independent_of_declaration_order(
            props in proptest::collection::btree_map("[a-z]{1,6}", 0i64..1000, 0..8),
            deps in proptest::collection::btree_set("[a-z]{1,6}", 0..6),
        ) {
            let forward: Vec<_> = props.iter().collect();
            let mut backward = forward.clone();
            backward.reverse();

            let mut first = SecondaryInputs::new("Transform");
            for (k, v) in &forward {
                first.insert(k.as_str(), json!(v));
            }
            let mut second = SecondaryInputs::new("Transform");
            for (k, v) in &backward {
                second.insert(k.as_str(), json!(v));
            }
            prop_assert_eq!(first.hash(), second.hash());

            let snapshots: Vec<FileSnapshot> = deps
                .iter()
                .map(|d| FileSnapshot::file(format!("/deps/{d}.jar"), HashCode::of(d.as_bytes())))
                .collect();
            let mut reversed = snapshots.clone();
            reversed.reverse();

            let mut a = inputs("/m2/lib.zip", b"zip");
            a.dependencies = fingerprint_collection(&snapshots, NormalizationStrategy::NameOnly);
            let mut b = inputs("/m2/lib.zip", b"zip");
            b.dependencies = fingerprint_collection(&reversed, NormalizationStrategy::NameOnly);

            let left = resolve(&Producer::External, &a, first.hash());
            let right = resolve(&Producer::External, &b, second.hash());
            prop_assert_eq!(left.unique_id(), right.unique_id());
            prop_assert_eq!(left, right);
        }
    }
}
