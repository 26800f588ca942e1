// Topic-scoped duplicate detection.
//
// Duplicates are only ever searched for inside one topic directory. Two
// images in different topics are never compared.

use crate::config::PipelineConfig;
use crate::core::hash::{Fingerprinter, HashError, TopicIndex};
use image_hasher::ImageHash;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Canonical file name -> names of its duplicates, for a single topic.
///
/// Every readable image of the topic appears exactly once: either as a key
/// (possibly with an empty duplicate list) or inside one duplicate list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DuplicateMap(BTreeMap<String, Vec<String>>);

impl DuplicateMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, canonical: String, duplicates: Vec<String>) {
        self.0.insert(canonical, duplicates);
    }

    /// Groups fingerprints greedily in file name order: the smallest name not
    /// yet grouped becomes canonical and claims every later, ungrouped image
    /// within `threshold` bits of it.
    pub fn from_fingerprints(fingerprints: &[(String, ImageHash)], threshold: u32) -> Self {
        let mut sorted: Vec<&(String, ImageHash)> = fingerprints.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));

        let mut grouped = vec![false; sorted.len()];
        let mut map = Self::new();
        for i in 0..sorted.len() {
            if grouped[i] {
                continue;
            }
            grouped[i] = true;
            let (canonical, hash) = sorted[i];
            let mut duplicates = Vec::new();
            for j in (i + 1)..sorted.len() {
                if !grouped[j] && hash.dist(&sorted[j].1) <= threshold {
                    grouped[j] = true;
                    duplicates.push(sorted[j].0.clone());
                }
            }
            map.insert(canonical.clone(), duplicates);
        }
        map
    }

    pub fn groups(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }

    /// Groups that actually contain duplicates.
    pub fn duplicate_groups(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter().filter(|(_, dups)| !dups.is_empty())
    }

    /// Every name on the duplicate side.
    pub fn duplicates(&self) -> impl Iterator<Item = &String> {
        self.0.values().flatten()
    }

    pub fn duplicate_count(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    /// Number of images the map was built from.
    pub fn image_count(&self) -> usize {
        self.0.len() + self.duplicate_count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn load(path: &Path) -> Result<Self, HashError> {
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|source| HashError::DuplicateFile {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), HashError> {
        let json = serde_json::to_string_pretty(self).map_err(|source| {
            HashError::DuplicateFile {
                path: path.display().to_string(),
                source,
            }
        })?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// Where the duplicate file of `topic` lives: next to the topic, inside its
/// subcluster directory.
pub fn duplicate_file_path(subcluster: &Path, topic: &str) -> PathBuf {
    subcluster.join(format!("duplicates_{}.json", topic))
}

/// Inverse of [`duplicate_file_path`]: the topic a file name belongs to.
pub fn topic_of_duplicate_file(file_name: &str) -> Option<&str> {
    file_name
        .strip_prefix("duplicates_")
        .and_then(|rest| rest.strip_suffix(".json"))
        .filter(|topic| !topic.is_empty())
}

/// Something that can find duplicates inside one topic directory. Must be
/// deterministic for a fixed set of files.
pub trait DuplicateDetector: Sync {
    fn detect(&self, topic: &Path) -> Result<DuplicateMap, HashError>;
}

/// Gradient-hash detector with a fixed Hamming threshold.
pub struct PerceptualDetector {
    fingerprinter: Fingerprinter,
    threshold: u32,
    config: PipelineConfig,
}

impl PerceptualDetector {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            fingerprinter: Fingerprinter::new(&config.hash),
            threshold: config.hash.threshold,
            config: config.clone(),
        }
    }
}

impl DuplicateDetector for PerceptualDetector {
    fn detect(&self, topic: &Path) -> Result<DuplicateMap, HashError> {
        let index = TopicIndex::build(topic, &self.fingerprinter, &self.config)?;
        Ok(DuplicateMap::from_fingerprints(
            &index.fingerprints,
            self.threshold,
        ))
    }
}
