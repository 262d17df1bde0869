//! `dataset.yaml` manifest handling.
//!
//! The manifest names the class table and, optionally, where each split's
//! images live. Unknown keys are kept so a re-export writes them back.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use crate::error::BoxsetError;
use crate::model::{ClassTable, Split, MAX_CLASS_COUNT};

/// Entry names probed for a manifest, in order.
pub const MANIFEST_ENTRIES: [&str; 2] = ["dataset.yaml", "data.yaml"];

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_split_path",
        skip_serializing_if = "Option::is_none"
    )]
    pub train: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_split_path",
        skip_serializing_if = "Option::is_none"
    )]
    pub val: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_split_path",
        skip_serializing_if = "Option::is_none"
    )]
    pub test: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_class_count",
        skip_serializing_if = "Option::is_none"
    )]
    pub nc: Option<usize>,
    #[serde(default, deserialize_with = "deserialize_names")]
    pub names: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ManifestNames {
    Sequence(Vec<String>),
    Mapping(BTreeMap<usize, String>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SplitPath {
    One(String),
    Many(Vec<String>),
}

fn check_class_count<E: serde::de::Error>(count: usize) -> Result<usize, E> {
    if count > MAX_CLASS_COUNT {
        return Err(E::custom(format!(
            "{} classes declared, at most {} are supported",
            count, MAX_CLASS_COUNT
        )));
    }
    Ok(count)
}

fn deserialize_class_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<usize>, D::Error> {
    let count: Option<usize> = Option::deserialize(deserializer)?;
    count.map(check_class_count).transpose()
}

fn deserialize_names<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let names: Option<ManifestNames> = Option::deserialize(deserializer)?;
    Ok(match names {
        None => Vec::new(),
        Some(ManifestNames::Sequence(names)) => {
            check_class_count::<D::Error>(names.len())?;
            names
        }
        Some(ManifestNames::Mapping(mapping)) => {
            let len = mapping.keys().next_back().map(|max| max.saturating_add(1)).unwrap_or(0);
            let len = check_class_count::<D::Error>(len)?;
            let mut names = vec![String::new(); len];
            for (index, name) in mapping {
                names[index] = name;
            }
            for (index, name) in names.iter_mut().enumerate() {
                if name.trim().is_empty() {
                    *name = format!("class_{}", index);
                }
            }
            names
        }
    })
}

// Multi-folder splits are reduced to their first folder.
fn deserialize_split_path<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    let path: Option<SplitPath> = Option::deserialize(deserializer)?;
    Ok(match path {
        None => None,
        Some(SplitPath::One(p)) => Some(p),
        Some(SplitPath::Many(paths)) => paths.into_iter().next(),
    })
}

/// Strips leading `./` and `../` segments and trailing slashes.
pub fn normalize_manifest_path(path: &str) -> String {
    let mut rest = path.trim();
    loop {
        if let Some(stripped) = rest.strip_prefix("./") {
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix("../") {
            rest = stripped;
        } else {
            break;
        }
    }
    rest.trim_end_matches('/').to_string()
}

impl Manifest {
    /// Parses manifest text read from archive entry `entry`.
    pub fn parse(entry: &str, text: &str) -> Result<Self, BoxsetError> {
        serde_yaml::from_str(text).map_err(|source| BoxsetError::ManifestParse {
            entry: entry.to_string(),
            source,
        })
    }

    /// Layout written when the source had no manifest.
    pub fn default_layout() -> Self {
        Self {
            path: Some("./".to_string()),
            train: Some("train/images".to_string()),
            val: Some("valid/images".to_string()),
            test: Some("test/images".to_string()),
            ..Default::default()
        }
    }

    /// Raw path declared for `split`, if any.
    pub fn split_path(&self, split: Split) -> Option<&str> {
        let path = match split {
            Split::Train => &self.train,
            Split::Valid => &self.val,
            Split::Test => &self.test,
        };
        path.as_deref().filter(|p| !p.trim().is_empty())
    }

    /// Splits the manifest declares a path for.
    pub fn declared_splits(&self) -> Vec<Split> {
        Split::ALL
            .into_iter()
            .filter(|split| self.split_path(*split).is_some())
            .collect()
    }

    /// Class table from `names`, padded with `class_<n>` up to `nc`.
    ///
    /// Repeated names keep their position under a `<name>_<k>` name.
    pub fn class_table(&self) -> ClassTable {
        let mut names = self.names.clone();
        if let Some(nc) = self.nc {
            for index in names.len()..nc {
                names.push(format!("class_{}", index));
            }
        }
        ClassTable::from_names(names)
    }

    /// Copy with `names` and `nc` replaced by the current class table.
    pub fn with_classes(&self, classes: &ClassTable) -> Self {
        Self {
            names: classes.names().to_vec(),
            nc: Some(classes.len()),
            ..self.clone()
        }
    }

    pub fn to_yaml_string(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}
