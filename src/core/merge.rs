use crate::core::duplicate::{topic_of_duplicate_file, DuplicateMap};
use crate::core::tree::{self, SubclusterRef};
use chrono::Utc;
use clap::ValueEnum;
use indicatif::{ParallelProgressIterator, ProgressBar};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("None of the input roots exist: {roots:?}")]
    NoInputRoots { roots: Vec<String> },

    #[error("Cannot create destination directory {path}: {source}")]
    Destination {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("History file error: {0}")]
    History(#[from] std::io::Error),
}

/// Which duplicate files suppress a topic's files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SuppressionScope {
    /// Union of every duplicate file of the subcluster applies to all of its
    /// topics.
    #[default]
    Subcluster,
    /// Each topic is filtered by its own duplicate file only.
    Topic,
}

/// Counts for a merge. Reduced across workers; never shared while running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    pub copied: usize,
    pub already_present: usize,
    pub suppressed: usize,
    pub failed: usize,
    pub subclusters: usize,
}

impl MergeReport {
    pub fn merge(self, other: Self) -> Self {
        Self {
            copied: self.copied + other.copied,
            already_present: self.already_present + other.already_present,
            suppressed: self.suppressed + other.suppressed,
            failed: self.failed + other.failed,
            subclusters: self.subclusters + other.subclusters,
        }
    }
}

/// Duplicate file names of one subcluster, keyed by topic.
#[derive(Debug, Clone, Default)]
pub struct SubclusterDuplicates {
    by_topic: BTreeMap<String, BTreeSet<String>>,
}

impl SubclusterDuplicates {
    /// Reads every `duplicates_<topic>.json` of the subcluster. Unreadable or
    /// corrupt files count as empty.
    pub fn load(subcluster: &Path) -> Self {
        let mut by_topic = BTreeMap::new();
        let names = match tree::list_files(subcluster) {
            Ok(names) => names,
            Err(e) => {
                log::warn!("Cannot list {}: {}", subcluster.display(), e);
                return Self { by_topic };
            }
        };
        for name in names {
            let Some(topic) = topic_of_duplicate_file(&name) else {
                continue;
            };
            match DuplicateMap::load(&subcluster.join(&name)) {
                Ok(map) => {
                    by_topic.insert(topic.to_string(), map.duplicates().cloned().collect());
                }
                Err(e) => log::warn!("Ignoring {}: {}", subcluster.join(&name).display(), e),
            }
        }
        Self { by_topic }
    }

    pub fn for_topic(&self, topic: &str, scope: SuppressionScope) -> BTreeSet<String> {
        match scope {
            SuppressionScope::Topic => self.by_topic.get(topic).cloned().unwrap_or_default(),
            SuppressionScope::Subcluster => self.by_topic.values().flatten().cloned().collect(),
        }
    }
}

/// One line of `<output>/.merge_history.jsonl`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MergeHistoryRecord {
    pub timestamp: String,
    pub roots: Vec<String>,
    pub output: String,
    pub scope: SuppressionScope,
    pub report: MergeReport,
}

pub const HISTORY_FILE: &str = ".merge_history.jsonl";

/// Copies the non-duplicate files of one or more dataset trees into a single
/// output tree with the same cluster/subcluster/topic layout.
pub struct DatasetMerger {
    output: PathBuf,
    scope: SuppressionScope,
    progress: ProgressBar,
}

impl DatasetMerger {
    pub fn new(output: impl Into<PathBuf>, scope: SuppressionScope) -> Self {
        Self {
            output: output.into(),
            scope,
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn merge(&self, roots: &[PathBuf]) -> Result<MergeReport, MergeError> {
        let existing: Vec<&PathBuf> = roots.iter().filter(|root| root.is_dir()).collect();
        if existing.is_empty() {
            return Err(MergeError::NoInputRoots {
                roots: roots.iter().map(|r| r.display().to_string()).collect(),
            });
        }
        for root in roots.iter().filter(|root| !root.is_dir()) {
            log::warn!("Skipping missing input root {}", root.display());
        }
        create_dir(&self.output)?;

        let subclusters: Vec<SubclusterRef> = existing
            .iter()
            .flat_map(|root| match tree::clusters(root) {
                Ok(clusters) => clusters
                    .iter()
                    .flat_map(|cluster| tree::subclusters(root, cluster))
                    .collect::<Vec<_>>(),
                Err(e) => {
                    log::error!("Cannot list {}: {}", root.display(), e);
                    Vec::new()
                }
            })
            .collect();

        self.progress.set_length(subclusters.len() as u64);
        let report = subclusters
            .par_iter()
            .progress_with(self.progress.clone())
            .map(|subcluster| self.merge_subcluster(subcluster))
            .try_reduce(MergeReport::default, |a, b| Ok(a.merge(b)))?;

        self.append_history(roots, report)?;
        Ok(report)
    }

    pub fn merge_subcluster(&self, subcluster: &SubclusterRef) -> Result<MergeReport, MergeError> {
        let duplicates = SubclusterDuplicates::load(&subcluster.path);
        let mut report = MergeReport {
            subclusters: 1,
            ..MergeReport::default()
        };

        for topic in tree::topics(subcluster) {
            let suppressed = duplicates.for_topic(&topic.topic, self.scope);
            let dest_topic = self
                .output
                .join(&topic.cluster)
                .join(&topic.subcluster)
                .join(&topic.topic);
            create_dir(&dest_topic)?;

            let files = match tree::list_files(&topic.path) {
                Ok(files) => files,
                Err(e) => {
                    log::error!("Cannot list topic {}: {}", topic.path.display(), e);
                    continue;
                }
            };

            for name in files {
                if suppressed.contains(&name) {
                    report.suppressed += 1;
                    continue;
                }
                let src = topic.path.join(&name);
                let dst = dest_topic.join(&name);
                if dst.exists() {
                    report.already_present += 1;
                    continue;
                }
                match copy_new(&src, &dst) {
                    Ok(_) => report.copied += 1,
                    // Another worker merging a sibling root got there first.
                    Err(e) if e.kind() == io::ErrorKind::AlreadyExists && dst.exists() => {
                        report.already_present += 1
                    }
                    Err(e) => {
                        log::warn!("Failed to copy {:?} → {:?}: {}", src, dst, e);
                        report.failed += 1;
                    }
                }
            }
        }
        Ok(report)
    }

    fn append_history(&self, roots: &[PathBuf], report: MergeReport) -> Result<(), MergeError> {
        let record = MergeHistoryRecord {
            timestamp: Utc::now().to_rfc3339(),
            roots: roots.iter().map(|r| r.display().to_string()).collect(),
            output: self.output.display().to_string(),
            scope: self.scope,
            report,
        };
        let line = serde_json::to_string(&record).map_err(std::io::Error::from)?;
        let mut out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.output.join(HISTORY_FILE))?;
        writeln!(out, "{}", line)?;
        Ok(())
    }
}

/// Copies `src` to `dst`, failing if `dst` already exists. A partial copy is
/// removed again.
fn copy_new(src: &Path, dst: &Path) -> io::Result<u64> {
    let mut reader = fs::File::open(src)?;
    let mut writer = OpenOptions::new().write(true).create_new(true).open(dst)?;
    io::copy(&mut reader, &mut writer).inspect_err(|_| {
        let _ = fs::remove_file(dst);
    })
}

fn create_dir(path: &Path) -> Result<(), MergeError> {
    fs::create_dir_all(path).map_err(|source| MergeError::Destination {
        path: path.display().to_string(),
        source,
    })
}

/// Reads the merge history of an output root. Malformed lines are skipped.
pub fn read_history(output: &Path) -> std::io::Result<Vec<MergeHistoryRecord>> {
    let file = fs::File::open(output.join(HISTORY_FILE))?;
    let mut records = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        match serde_json::from_str::<MergeHistoryRecord>(&line) {
            Ok(record) => records.push(record),
            Err(err) => log::warn!("Skipping malformed history entry {}: {}", i, err),
        }
    }
    Ok(records)
}
