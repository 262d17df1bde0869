//! JSON persistence for the override cache.
//!
//! A session file captures every edited annotation list so work in progress
//! survives a restart. Loading a session replaces the store's overrides; the
//! next load or export picks them up through the usual override precedence.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use super::dataset::{Annotation, ClassTable, Dataset, Split};
use super::overrides::OverrideCache;
use crate::error::BoxsetError;

const SESSION_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SessionFile {
    version: u32,
    #[serde(default)]
    classes: Vec<String>,
    entries: Vec<SessionEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionEntry {
    split: Split,
    image_key: String,
    annotations: Vec<Annotation>,
}

/// Edits restored from a session file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Session {
    /// Class table at save time, empty when the file did not record one.
    pub classes: Vec<String>,
    pub overrides: OverrideCache,
}

impl Session {
    /// An empty dataset seeded with these edits, ready for the loader.
    pub fn into_dataset(self) -> Dataset {
        Dataset {
            classes: ClassTable::from_names(self.classes),
            overrides: self.overrides,
            ..Default::default()
        }
    }
}

fn to_file(classes: &[String], overrides: &OverrideCache) -> SessionFile {
    SessionFile {
        version: SESSION_VERSION,
        classes: classes.to_vec(),
        entries: overrides
            .iter()
            .map(|(split, key, list)| SessionEntry {
                split,
                image_key: key.to_string(),
                annotations: list.to_vec(),
            })
            .collect(),
    }
}

fn from_file(file: SessionFile) -> Session {
    let mut overrides = OverrideCache::new();
    for entry in file.entries {
        overrides.replace(entry.split, entry.image_key, entry.annotations);
    }
    Session {
        classes: file.classes,
        overrides,
    }
}

/// Writes the override cache and class table to a JSON session file.
pub fn write_session(
    path: &Path,
    classes: &[String],
    overrides: &OverrideCache,
) -> Result<(), BoxsetError> {
    let file = File::create(path).map_err(BoxsetError::Io)?;
    let writer = BufWriter::new(file);

    serde_json::to_writer_pretty(writer, &to_file(classes, overrides)).map_err(|source| {
        BoxsetError::SessionJsonWrite {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// Reads a JSON session file.
pub fn read_session(path: &Path) -> Result<Session, BoxsetError> {
    let file = File::open(path).map_err(BoxsetError::Io)?;
    let reader = BufReader::new(file);

    let parsed: SessionFile =
        serde_json::from_reader(reader).map_err(|source| BoxsetError::SessionJsonParse {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(from_file(parsed))
}

/// Serializes a session to a string. Useful for tests.
pub fn to_json_string(classes: &[String], overrides: &OverrideCache) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&to_file(classes, overrides))
}

/// Parses a session from a string. Useful for tests.
pub fn from_json_str(json: &str) -> Result<Session, serde_json::Error> {
    serde_json::from_str(json).map(from_file)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_overrides() -> OverrideCache {
        let mut cache = OverrideCache::new();
        cache.replace(
            Split::Train,
            "train/a.jpg",
            vec![Annotation::rectangle(0u64, 1usize, 0.5, 0.5, 0.25, 0.125)],
        );
        cache.replace(Split::Valid, "valid/b.jpg", Vec::new());
        cache
    }

    #[test]
    fn test_session_string_round_trip() {
        let classes = vec!["cat".to_string(), "dog".to_string()];
        let json = to_json_string(&classes, &sample_overrides()).expect("serialize");
        let session = from_json_str(&json).expect("parse");

        assert_eq!(session.classes, classes);
        assert_eq!(session.overrides, sample_overrides());
    }

    #[test]
    fn test_empty_override_list_survives() {
        let json = to_json_string(&[], &sample_overrides()).expect("serialize");
        let session = from_json_str(&json).expect("parse");
        let empty = session
            .overrides
            .get(Split::Valid, "valid/b.jpg")
            .expect("entry kept");
        assert!(empty.is_empty());
    }

    #[test]
    fn test_session_file_round_trip() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let path = temp.path().join("session.json");

        write_session(&path, &["cat".to_string()], &sample_overrides()).expect("write");
        let session = read_session(&path).expect("read");
        assert_eq!(session.overrides.len(), 2);
    }

    #[test]
    fn test_malformed_session_is_reported() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let path = temp.path().join("broken.json");
        std::fs::write(&path, "{ not json").expect("write");

        let err = read_session(&path).unwrap_err();
        assert!(matches!(err, BoxsetError::SessionJsonParse { .. }));
    }
}
