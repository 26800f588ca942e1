//! Curation pipeline for hierarchical image datasets
//! (`<root>/<cluster>/<subcluster>/<topic>/<images>`).
//!
//! Duplicates are detected per topic with a perceptual hash, rolled up into
//! cluster and dataset summaries, and filtered out while the trees are merged
//! into one output tree. The merged tree is then ranked per topic by pixel
//! area × aesthetic score and split into train and validation manifests.

pub mod config;
pub mod core;
pub mod progress;

pub use config::{ConfigError, HashConfig, PipelineConfig, SplitSizes};
pub use crate::core::aggregate::{ClusterStats, DuplicateSummary};
pub use crate::core::detect::{DetectOptions, DetectionRun};
pub use crate::core::duplicate::{DuplicateDetector, DuplicateMap, PerceptualDetector};
pub use crate::core::merge::{DatasetMerger, MergeError, MergeReport, SuppressionScope};
pub use crate::core::ranking::{build_split, SplitManifest};
pub use crate::core::scoring::{AestheticScorer, AestheticScores, CommandScorer};
