use crate::config::{PipelineConfig, SplitSizes};
use crate::core::scoring::{load_topic_scores, AestheticScores};
use crate::core::tree;
use indicatif::{ParallelProgressIterator, ProgressBar};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct RankedImage {
    pub path: PathBuf,
    pub score: f64,
}

/// Train and validation image paths, in traversal order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitManifest {
    pub train: Vec<PathBuf>,
    pub validation: Vec<PathBuf>,
}

impl SplitManifest {
    pub fn extend(&mut self, other: SplitManifest) {
        self.train.extend(other.train);
        self.validation.extend(other.validation);
    }

    /// Writes the two halves as JSON arrays of paths.
    pub fn save(&self, train_path: &Path, valid_path: &Path) -> std::io::Result<()> {
        fs::write(train_path, serde_json::to_string_pretty(&self.train)?)?;
        fs::write(valid_path, serde_json::to_string_pretty(&self.validation)?)?;
        Ok(())
    }
}

/// Width and height of an image file, read from its header only.
pub fn image_dimensions(path: &Path) -> Option<(u32, u32)> {
    match image::image_dimensions(path) {
        Ok(dimensions) => Some(dimensions),
        Err(e) => {
            log::warn!("Failed to open {}: {}", path.display(), e);
            None
        }
    }
}

/// `width × height × aesthetic`, or `None` when the image should not be
/// ranked at all.
pub fn ranking_score(dimensions: Option<(u32, u32)>, aesthetic: f64) -> Option<f64> {
    let (width, height) = dimensions?;
    let score = (width as f64) * (height as f64) * aesthetic;
    (score.is_finite() && score > 0.0).then_some(score)
}

/// Ranks the scored images of one topic, best first. Equal scores keep the
/// order of `scores`.
pub fn rank_topic<F>(topic: &Path, scores: &AestheticScores, mut dimensions: F) -> Vec<RankedImage>
where
    F: FnMut(&Path) -> Option<(u32, u32)>,
{
    let mut ranked: Vec<RankedImage> = scores
        .entries()
        .iter()
        .filter_map(|(name, aesthetic)| {
            let path = topic.join(name);
            ranking_score(dimensions(&path), *aesthetic).map(|score| RankedImage { path, score })
        })
        .collect();
    // sort_by is stable
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked
}

/// First `train` images to train, next `validation` to validation, rest
/// dropped.
pub fn split_ranked(ranked: Vec<RankedImage>, sizes: SplitSizes) -> SplitManifest {
    let mut paths = ranked.into_iter().map(|r| r.path);
    let train: Vec<PathBuf> = paths.by_ref().take(sizes.train).collect();
    let validation: Vec<PathBuf> = paths.take(sizes.validation).collect();
    SplitManifest { train, validation }
}

/// Walks the (deduplicated) tree under `root` and builds the manifests from
/// each topic's score file. Topics without a usable score file contribute
/// nothing. Fails only when `root` cannot be listed.
pub fn build_split(
    root: &Path,
    config: &PipelineConfig,
    progress: ProgressBar,
) -> std::io::Result<SplitManifest> {
    let root = fs::canonicalize(root)?;
    let topics = tree::all_topics(&root)?;
    progress.set_length(topics.len() as u64);

    let per_topic: Vec<SplitManifest> = topics
        .par_iter()
        .progress_with(progress)
        .map(|topic| match load_topic_scores(topic, config) {
            Some(scores) => split_ranked(
                rank_topic(&topic.path, &scores, image_dimensions),
                config.split,
            ),
            None => SplitManifest::default(),
        })
        .collect();

    let mut manifest = SplitManifest::default();
    for part in per_topic {
        manifest.extend(part);
    }
    Ok(manifest)
}
