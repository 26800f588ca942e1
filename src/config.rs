use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

/// Perceptual hash settings. Fixed for a run, never derived from the data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HashConfig {
    /// Side length of the hash grid; the fingerprint has `hash_size²` bits.
    pub hash_size: u32,
    /// Maximum Hamming distance at which two images count as duplicates.
    pub threshold: u32,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            hash_size: 8,
            threshold: 10,
        }
    }
}

/// Per-topic train/validation quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitSizes {
    pub train: usize,
    pub validation: usize,
}

impl Default for SplitSizes {
    fn default() -> Self {
        Self {
            train: 4,
            validation: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub hash: HashConfig,
    pub split: SplitSizes,
    pub image_extensions: Vec<String>,
    pub aesthetic_file_name: String,
    /// Worker threads for the rayon pool; `None` keeps rayon's default.
    pub workers: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            hash: HashConfig::default(),
            split: SplitSizes::default(),
            image_extensions: ["jpg", "jpeg", "png", "webp", "gif", "bmp", "tiff", "tif"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            aesthetic_file_name: "aesthetic_data.json".to_string(),
            workers: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Explicit path first, then the per-user config file, then defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match Self::default_path() {
            Some(path) if path.is_file() => {
                log::info!("Using config {}", path.display());
                Self::from_file(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("curatrs").join("config.json"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(2..=16).contains(&self.hash.hash_size) {
            return Err(ConfigError::Invalid {
                field: "hash.hash_size",
                message: format!("{} is outside 2..=16", self.hash.hash_size),
            });
        }
        let bits = self.hash.hash_size * self.hash.hash_size;
        if self.hash.threshold >= bits {
            return Err(ConfigError::Invalid {
                field: "hash.threshold",
                message: format!("{} would match every pair of {}-bit hashes", self.hash.threshold, bits),
            });
        }
        if self.image_extensions.is_empty() {
            return Err(ConfigError::Invalid {
                field: "image_extensions",
                message: "at least one extension is required".to_string(),
            });
        }
        if self.workers == Some(0) {
            return Err(ConfigError::Invalid {
                field: "workers",
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn is_image_name(&self, name: &str) -> bool {
        Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_lowercase();
                self.image_extensions.iter().any(|allowed| *allowed == ext)
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, r#"{"split": {"train": 8}, "workers": 3}"#).unwrap();

        let config = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(config.split.train, 8);
        assert_eq!(config.split.validation, 2);
        assert_eq!(config.workers, Some(3));
        assert_eq!(config.hash, HashConfig::default());
    }

    #[test]
    fn test_rejects_threshold_covering_whole_hash() {
        let mut config = PipelineConfig::default();
        config.hash.hash_size = 4;
        config.hash.threshold = 16;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "hash.threshold", .. })
        ));
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            PipelineConfig::from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_image_name_is_case_insensitive() {
        let config = PipelineConfig::default();
        assert!(config.is_image_name("photo.JPG"));
        assert!(config.is_image_name("a.b.png"));
        assert!(!config.is_image_name("aesthetic_data.json"));
        assert!(!config.is_image_name("README"));
    }
}
