//! Engine configuration.
//!
//! Every field has a default, so an empty YAML document (or no file at all)
//! yields a working configuration. Unknown keys are rejected so typos do
//! not silently fall back to defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::BoxsetError;

/// One step of the split folder resolution chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionStrategy {
    /// Path declared in the manifest, `/images` suffix stripped as the base.
    Manifest,
    /// A top-level folder named after the split.
    Conventional,
    /// A single shared `images`/`labels` pair.
    Shared,
    /// First top-level folder that contains image files.
    Scan,
}

impl ResolutionStrategy {
    pub const DEFAULT_ORDER: [ResolutionStrategy; 4] = [
        ResolutionStrategy::Manifest,
        ResolutionStrategy::Conventional,
        ResolutionStrategy::Shared,
        ResolutionStrategy::Scan,
    ];
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Images ingested between progress reports and cancellation checks.
    pub chunk_size: usize,
    pub full_image_cache_capacity: usize,
    pub thumbnail_cache_capacity: usize,
    /// System memory use (percent) above which the loader backs off.
    pub memory_warning_percent: f64,
    pub memory_backoff_ms: u64,
    /// Largest archive accepted, as a fraction of total system memory.
    pub max_archive_memory_fraction: f64,
    /// Half-side of a corner handle zone at zoom 1.
    pub handle_size_px: f64,
    /// A drawn box must exceed this extent on both axes to be kept.
    pub min_draw_size_px: f64,
    pub thumbnail_max_side: u32,
    pub resolution_order: Vec<ResolutionStrategy>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            full_image_cache_capacity: 100,
            thumbnail_cache_capacity: 500,
            memory_warning_percent: 85.0,
            memory_backoff_ms: 50,
            max_archive_memory_fraction: 0.10,
            handle_size_px: 10.0,
            min_draw_size_px: 5.0,
            thumbnail_max_side: 128,
            resolution_order: ResolutionStrategy::DEFAULT_ORDER.to_vec(),
        }
    }
}

impl EngineConfig {
    /// Loads a YAML config file.
    pub fn load(path: &Path) -> Result<Self, BoxsetError> {
        let text = fs::read_to_string(path)?;
        Self::from_yaml_str(&text).map_err(|source| BoxsetError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut config: EngineConfig = serde_yaml::from_str(text)?;
        // A zero chunk would never make progress.
        config.chunk_size = config.chunk_size.max(1);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.full_image_cache_capacity, 100);
        assert_eq!(config.thumbnail_cache_capacity, 500);
        assert_eq!(config.resolution_order, ResolutionStrategy::DEFAULT_ORDER.to_vec());
    }

    #[test]
    fn test_partial_yaml_keeps_other_defaults() {
        let config = EngineConfig::from_yaml_str("chunk_size: 50\nresolution_order: [scan, manifest]\n")
            .expect("parse");
        assert_eq!(config.chunk_size, 50);
        assert_eq!(
            config.resolution_order,
            vec![ResolutionStrategy::Scan, ResolutionStrategy::Manifest]
        );
        assert_eq!(config.thumbnail_max_side, 128);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(EngineConfig::from_yaml_str("  \n").expect("parse"), EngineConfig::default());
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(EngineConfig::from_yaml_str("chunk_sise: 10\n").is_err());
    }

    #[test]
    fn test_load_reports_path_on_parse_error() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let path = temp.path().join("config.yaml");
        std::fs::write(&path, "chunk_size: [not, a, number]\n").expect("write");

        let err = EngineConfig::load(&path).unwrap_err();
        assert!(matches!(err, BoxsetError::ConfigParse { .. }));
    }
}
