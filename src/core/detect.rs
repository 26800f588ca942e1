use crate::core::aggregate::{self, DatasetAccumulator, TopicOutcome};
use crate::core::duplicate::{duplicate_file_path, DuplicateDetector, DuplicateMap};
use crate::core::hash::HashError;
use crate::core::tree::{self, TopicRef};
use indicatif::{ParallelProgressIterator, ProgressBar};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct DetectOptions {
    /// Recompute even when a topic already has a persisted duplicate file.
    pub force: bool,
}

/// Result of running detection over one dataset root.
#[derive(Debug)]
pub struct DatasetDetection {
    pub root: PathBuf,
    pub name: String,
    pub report: DatasetAccumulator,
    pub topics_scanned: usize,
    pub topics_reused: usize,
    pub topics_failed: usize,
    pub cancelled: bool,
}

enum TopicSource {
    Computed,
    Reused,
    Failed,
    NotStarted,
}

/// Runs a detector over every topic of a dataset root, persisting one
/// duplicate file per topic.
pub struct DetectionRun<'a, D: DuplicateDetector> {
    detector: &'a D,
    options: DetectOptions,
    cancellation_token: Arc<AtomicBool>,
    progress: ProgressBar,
}

impl<'a, D: DuplicateDetector> DetectionRun<'a, D> {
    pub fn new(detector: &'a D, options: DetectOptions) -> Self {
        Self {
            detector,
            options,
            cancellation_token: Arc::new(AtomicBool::new(false)),
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn get_cancellation_token(&self) -> Arc<AtomicBool> {
        self.cancellation_token.clone()
    }

    /// Stops new topics from being started. Topics already running finish and
    /// persist their files.
    pub fn cancel(&self) {
        self.cancellation_token.store(true, Ordering::Relaxed);
    }

    /// Fails only when the root itself cannot be listed.
    pub fn run(&self, root: &Path) -> std::io::Result<DatasetDetection> {
        let clusters = tree::clusters(root)?;
        let topics: Vec<TopicRef> = clusters
            .iter()
            .flat_map(|cluster| tree::cluster_topics(root, cluster))
            .collect();

        self.progress.set_length(topics.len() as u64);
        let results: Vec<(TopicOutcome, TopicSource)> = topics
            .into_par_iter()
            .progress_with(self.progress.clone())
            .map(|topic| self.process_topic(topic))
            .collect();

        let mut detection = DatasetDetection {
            root: root.to_path_buf(),
            name: tree::dataset_name(root),
            report: DatasetAccumulator::default(),
            topics_scanned: 0,
            topics_reused: 0,
            topics_failed: 0,
            cancelled: self.cancellation_token.load(Ordering::Relaxed),
        };
        let mut outcomes = Vec::with_capacity(results.len());
        for (outcome, source) in results {
            match source {
                TopicSource::Computed => detection.topics_scanned += 1,
                TopicSource::Reused => detection.topics_reused += 1,
                TopicSource::Failed => detection.topics_failed += 1,
                TopicSource::NotStarted => {}
            }
            outcomes.push(outcome);
        }
        detection.report = aggregate::aggregate(&clusters, &outcomes);
        Ok(detection)
    }

    fn process_topic(&self, topic: TopicRef) -> (TopicOutcome, TopicSource) {
        if self.cancellation_token.load(Ordering::Relaxed) {
            return (TopicOutcome::failed(topic), TopicSource::NotStarted);
        }

        let dup_path = duplicate_file_path(topic.subcluster_path(), &topic.topic);
        if !self.options.force && dup_path.is_file() {
            match DuplicateMap::load(&dup_path) {
                Ok(duplicates) => {
                    log::debug!("Reusing {}", dup_path.display());
                    return (TopicOutcome { topic, duplicates }, TopicSource::Reused);
                }
                Err(e) => log::warn!("Recomputing {}: {}", topic.path.display(), e),
            }
        }

        match self.detect_and_persist(&topic.path, &dup_path) {
            Ok(duplicates) => (TopicOutcome { topic, duplicates }, TopicSource::Computed),
            Err(e) => {
                log::error!("Skipping topic {}: {}", topic.path.display(), e);
                (TopicOutcome::failed(topic), TopicSource::Failed)
            }
        }
    }

    fn detect_and_persist(&self, topic: &Path, dup_path: &Path) -> Result<DuplicateMap, HashError> {
        let duplicates = self.detector.detect(topic)?;
        if let Err(e) = duplicates.save(dup_path) {
            // The counts are still valid for this run; only the cache is lost.
            log::warn!("Could not persist {}: {}", dup_path.display(), e);
        }
        Ok(duplicates)
    }
}
