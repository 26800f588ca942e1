// Aesthetic scores are produced by an external model. The core only stores
// them per topic and reads them back; the `AestheticScorer` trait is the seam
// to whatever actually runs the model.

use crate::config::PipelineConfig;
use crate::core::aggregate::median;
use crate::core::tree::{self, TopicRef};
use indicatif::{ParallelProgressIterator, ProgressBar};
use rayon::prelude::*;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed score file {path}: {source}")]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Scorer failed for {path}: {message}")]
    Scorer { path: String, message: String },
}

/// Opaque quality oracle. Retries and backoff belong to the implementation.
pub trait AestheticScorer: Sync {
    fn score(&self, image: &Path) -> Result<f64, ScoreError>;
}

/// Runs an external program with the image path as its last argument and
/// reads a single float from its standard output.
pub struct CommandScorer {
    program: String,
    args: Vec<String>,
}

impl CommandScorer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl AestheticScorer for CommandScorer {
    fn score(&self, image: &Path) -> Result<f64, ScoreError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(image)
            .output()?;
        let fail = |message: String| ScoreError::Scorer {
            path: image.display().to_string(),
            message,
        };
        if !output.status.success() {
            return Err(fail(format!(
                "{} exited with {}",
                self.program, output.status
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .trim()
            .parse::<f64>()
            .map_err(|e| fail(format!("unparseable output {:?}: {}", stdout.trim(), e)))
    }
}

/// Per-topic score file: file name -> score, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AestheticScores {
    entries: Vec<(String, f64)>,
}

impl AestheticScores {
    pub fn from_entries(entries: Vec<(String, f64)>) -> Self {
        Self { entries }
    }

    /// Non-numeric entries are dropped with a warning; a file that is not a
    /// JSON object is an error.
    pub fn load(path: &Path) -> Result<Self, ScoreError> {
        let text = fs::read_to_string(path)?;
        let map: Map<String, Value> =
            serde_json::from_str(&text).map_err(|source| ScoreError::Malformed {
                path: path.display().to_string(),
                source,
            })?;
        let mut entries = Vec::with_capacity(map.len());
        for (name, value) in map {
            match value.as_f64() {
                Some(score) => entries.push((name, score)),
                None => log::warn!(
                    "Ignoring non-numeric score {} for {} in {}",
                    value,
                    name,
                    path.display()
                ),
            }
        }
        Ok(Self { entries })
    }

    pub fn save(&self, path: &Path) -> Result<(), ScoreError> {
        let mut map = Map::new();
        for (name, score) in &self.entries {
            let value = serde_json::Number::from_f64(*score)
                .map(Value::Number)
                .unwrap_or(Value::Null);
            map.insert(name.clone(), value);
        }
        let json = serde_json::to_string_pretty(&map).map_err(|source| ScoreError::Malformed {
            path: path.display().to_string(),
            source,
        })?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn entries(&self) -> &[(String, f64)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn median(&self) -> Option<f64> {
        let mut values: Vec<f64> = self
            .entries
            .iter()
            .map(|(_, s)| *s)
            .filter(|s| s.is_finite())
            .collect();
        median(&mut values)
    }
}

/// Counts for a scoring pass over a dataset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScoringReport {
    pub topics_scored: usize,
    pub topics_skipped: usize,
    pub images_scored: usize,
    pub images_failed: usize,
}

impl ScoringReport {
    fn merge(self, other: Self) -> Self {
        Self {
            topics_scored: self.topics_scored + other.topics_scored,
            topics_skipped: self.topics_skipped + other.topics_skipped,
            images_scored: self.images_scored + other.images_scored,
            images_failed: self.images_failed + other.images_failed,
        }
    }
}

/// Scores every image of one topic in file name order. Images the scorer
/// rejects are left out.
pub fn score_topic<S: AestheticScorer>(
    topic: &Path,
    scorer: &S,
    config: &PipelineConfig,
) -> Result<(AestheticScores, usize), ScoreError> {
    let names: Vec<String> = tree::list_files(topic)?
        .into_iter()
        .filter(|name| config.is_image_name(name))
        .collect();
    let results: Vec<Option<(String, f64)>> = names
        .into_par_iter()
        .map(|name| match scorer.score(&topic.join(&name)) {
            Ok(score) => Some((name, score)),
            Err(e) => {
                log::warn!("{}", e);
                None
            }
        })
        .collect();
    let failed = results.iter().filter(|r| r.is_none()).count();
    Ok((
        AestheticScores::from_entries(results.into_iter().flatten().collect()),
        failed,
    ))
}

/// Writes a score file into every topic of `root` that lacks one (or every
/// topic when `force` is set).
pub fn score_dataset<S: AestheticScorer>(
    root: &Path,
    scorer: &S,
    config: &PipelineConfig,
    force: bool,
    progress: ProgressBar,
) -> std::io::Result<ScoringReport> {
    let topics = tree::all_topics(root)?;
    progress.set_length(topics.len() as u64);
    let report = topics
        .par_iter()
        .progress_with(progress)
        .map(|topic| {
            let out = topic.path.join(&config.aesthetic_file_name);
            if !force && out.is_file() {
                return ScoringReport {
                    topics_skipped: 1,
                    ..ScoringReport::default()
                };
            }
            let result = score_topic(&topic.path, scorer, config)
                .and_then(|(scores, failed)| scores.save(&out).map(|_| (scores.len(), failed)));
            match result {
                Ok((scored, failed)) => ScoringReport {
                    topics_scored: 1,
                    images_scored: scored,
                    images_failed: failed,
                    ..ScoringReport::default()
                },
                Err(e) => {
                    log::error!("Skipping topic {}: {}", topic.path.display(), e);
                    ScoringReport {
                        topics_skipped: 1,
                        ..ScoringReport::default()
                    }
                }
            }
        })
        .reduce(ScoringReport::default, ScoringReport::merge);
    Ok(report)
}

/// Loads the score file of a topic. `None` when the topic has no usable file.
pub fn load_topic_scores(topic: &TopicRef, config: &PipelineConfig) -> Option<AestheticScores> {
    let path = topic.path.join(&config.aesthetic_file_name);
    if !path.is_file() {
        return None;
    }
    match AestheticScores::load(&path) {
        Ok(scores) => Some(scores),
        Err(e) => {
            log::warn!("Skipping topic {}: {}", topic.path.display(), e);
            None
        }
    }
}

/// Median aesthetic score of one subcluster: the median of its topic medians.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubclusterScore {
    pub path: PathBuf,
    pub label: String,
    pub median: f64,
    pub topics: usize,
}

/// Subcluster medians across all roots, best first. Ties keep traversal order.
pub fn subcluster_medians(roots: &[PathBuf], config: &PipelineConfig) -> Vec<SubclusterScore> {
    let mut per_subcluster: BTreeMap<PathBuf, (String, Vec<f64>)> = BTreeMap::new();
    for root in roots {
        let topics = match tree::all_topics(root) {
            Ok(topics) => topics,
            Err(e) => {
                log::warn!("Skipping root {}: {}", root.display(), e);
                continue;
            }
        };
        for topic in topics {
            let Some(topic_median) = load_topic_scores(&topic, config).and_then(|s| s.median())
            else {
                continue;
            };
            per_subcluster
                .entry(topic.subcluster_path().to_path_buf())
                .or_insert_with(|| (format!("{}-{}", topic.cluster, topic.subcluster), Vec::new()))
                .1
                .push(topic_median);
        }
    }

    let mut scores: Vec<SubclusterScore> = per_subcluster
        .into_iter()
        .filter_map(|(path, (label, mut medians))| {
            let topics = medians.len();
            median(&mut medians).map(|median| SubclusterScore {
                path,
                label,
                median,
                topics,
            })
        })
        .collect();
    scores.sort_by(|a, b| b.median.total_cmp(&a.median));
    scores
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    struct TableScorer(HashMap<String, f64>);

    impl AestheticScorer for TableScorer {
        fn score(&self, image: &Path) -> Result<f64, ScoreError> {
            let name = image.file_name().unwrap().to_string_lossy().to_string();
            self.0.get(&name).copied().ok_or(ScoreError::Scorer {
                path: image.display().to_string(),
                message: "unknown".to_string(),
            })
        }
    }

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_load_keeps_file_order_and_skips_non_numeric() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("aesthetic_data.json");
        fs::write(&path, r#"{"z.png": 1.5, "a.png": "high", "m.png": -2}"#).unwrap();

        let scores = AestheticScores::load(&path).unwrap();
        assert_eq!(
            scores.entries(),
            &[("z.png".to_string(), 1.5), ("m.png".to_string(), -2.0)]
        );
    }

    #[test]
    fn test_corrupt_file_is_malformed() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("aesthetic_data.json");
        fs::write(&path, "[1.0, 2.0]").unwrap();
        assert!(matches!(
            AestheticScores::load(&path),
            Err(ScoreError::Malformed { .. })
        ));
    }

    #[test]
    fn test_save_then_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("aesthetic_data.json");
        let scores =
            AestheticScores::from_entries(vec![("b.png".into(), 0.25), ("a.png".into(), 3.0)]);
        scores.save(&path).unwrap();
        assert_eq!(AestheticScores::load(&path).unwrap(), scores);
    }

    #[test]
    fn test_score_dataset_writes_missing_files_only() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        touch(root, "c/s/t1/a.png");
        touch(root, "c/s/t1/b.png");
        touch(root, "c/s/t1/notes.txt");
        touch(root, "c/s/t2/a.png");
        AestheticScores::from_entries(vec![("a.png".into(), 9.0)])
            .save(&root.join("c/s/t2/aesthetic_data.json"))
            .unwrap();

        let scorer = TableScorer(HashMap::from([("a.png".to_string(), 4.0)]));
        let config = PipelineConfig::default();
        let report =
            score_dataset(root, &scorer, &config, false, ProgressBar::hidden()).unwrap();

        assert_eq!(report.topics_scored, 1);
        assert_eq!(report.topics_skipped, 1);
        assert_eq!(report.images_scored, 1);
        assert_eq!(report.images_failed, 1);
        let t1 = AestheticScores::load(&root.join("c/s/t1/aesthetic_data.json")).unwrap();
        assert_eq!(t1.entries(), &[("a.png".to_string(), 4.0)]);
        let t2 = AestheticScores::load(&root.join("c/s/t2/aesthetic_data.json")).unwrap();
        assert_eq!(t2.entries(), &[("a.png".to_string(), 9.0)]);
    }

    #[test]
    fn test_subcluster_medians_rank_best_first() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let write = |rel: &str, values: &[f64]| {
            fs::create_dir_all(root.join(rel)).unwrap();
            AestheticScores::from_entries(
                values
                    .iter()
                    .enumerate()
                    .map(|(i, v)| (format!("{}.png", i), *v))
                    .collect(),
            )
            .save(&root.join(rel).join("aesthetic_data.json"))
            .unwrap();
        };
        write("c/low/t1", &[1.0, 2.0, 3.0]);
        write("c/high/t1", &[5.0, 6.0]);
        write("c/high/t2", &[7.0]);
        fs::create_dir_all(root.join("c/none/t1")).unwrap();

        let medians = subcluster_medians(&[root.to_path_buf()], &PipelineConfig::default());
        assert_eq!(medians.len(), 2);
        assert_eq!(medians[0].label, "c-high");
        assert_eq!(medians[0].median, 6.25);
        assert_eq!(medians[0].topics, 2);
        assert_eq!(medians[1].label, "c-low");
        assert_eq!(medians[1].median, 2.0);
    }

    #[cfg(unix)]
    #[test]
    fn test_command_scorer_parses_stdout() {
        let scorer = CommandScorer::new("echo", vec!["0.75".to_string()]);
        // echo prints "0.75 <path>", which is not a single float.
        assert!(scorer.score(Path::new("img.png")).is_err());

        let scorer = CommandScorer::new("sh", vec!["-c".into(), "echo 0.75".into()]);
        assert_eq!(scorer.score(Path::new("img.png")).unwrap(), 0.75);
    }
}
