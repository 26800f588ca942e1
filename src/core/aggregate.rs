// Roll-up of per-topic duplicate maps into cluster and dataset reports.
//
// Workers never share counters: each topic produces a `TopicOutcome`, which is
// folded into a `ClusterAccumulator`; cluster accumulators are folded into a
// `DatasetAccumulator`. Every fold is commutative and associative, so the
// result does not depend on the order parallel workers finish in.

use crate::core::duplicate::DuplicateMap;
use crate::core::tree::TopicRef;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStats {
    pub total_images: usize,
    pub duplicate_images: usize,
}

/// Persisted as `duplicates_summary_<dataset>.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateSummary {
    pub total_images: usize,
    pub total_duplicate_images: usize,
    pub cluster_stats: BTreeMap<String, ClusterStats>,
}

/// `subcluster/topic/canonical` -> `subcluster/topic/duplicate`s, per cluster.
/// Persisted as `all_duplicates_<dataset>.json`.
pub type DuplicateListing = BTreeMap<String, BTreeMap<String, Vec<String>>>;

/// What one topic contributed. A topic that could not be scanned contributes
/// an empty map.
#[derive(Debug, Clone)]
pub struct TopicOutcome {
    pub topic: TopicRef,
    pub duplicates: DuplicateMap,
}

impl TopicOutcome {
    pub fn failed(topic: TopicRef) -> Self {
        Self {
            topic,
            duplicates: DuplicateMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterAccumulator {
    pub total_images: usize,
    /// Duplicate identities qualified as `subcluster/topic/file`.
    pub duplicates: BTreeSet<String>,
    pub groups: BTreeMap<String, Vec<String>>,
}

impl ClusterAccumulator {
    pub fn absorb(mut self, outcome: &TopicOutcome) -> Self {
        let qualifier = outcome.topic.qualifier();
        let qualify = |name: &str| format!("{}/{}", qualifier, name);

        self.total_images += outcome.duplicates.image_count();
        for (canonical, dups) in outcome.duplicates.duplicate_groups() {
            let qualified: Vec<String> = dups.iter().map(|d| qualify(d.as_str())).collect();
            self.duplicates.extend(qualified.iter().cloned());
            self.groups.insert(qualify(canonical.as_str()), qualified);
        }
        self
    }

    pub fn merge(mut self, other: Self) -> Self {
        self.total_images += other.total_images;
        self.duplicates.extend(other.duplicates);
        for (canonical, dups) in other.groups {
            let entry = self.groups.entry(canonical).or_default();
            for dup in dups {
                if !entry.contains(&dup) {
                    entry.push(dup);
                }
            }
        }
        self
    }

    pub fn stats(&self) -> ClusterStats {
        ClusterStats {
            total_images: self.total_images,
            duplicate_images: self.duplicates.len(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetAccumulator {
    pub clusters: BTreeMap<String, ClusterAccumulator>,
}

impl DatasetAccumulator {
    /// Starts with every listed cluster present, so clusters whose topics all
    /// failed still show up with zero counts.
    pub fn with_clusters<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            clusters: names
                .into_iter()
                .map(|name| (name.into(), ClusterAccumulator::default()))
                .collect(),
        }
    }

    pub fn absorb(mut self, outcome: &TopicOutcome) -> Self {
        let cluster = self
            .clusters
            .remove(&outcome.topic.cluster)
            .unwrap_or_default();
        self.clusters
            .insert(outcome.topic.cluster.clone(), cluster.absorb(outcome));
        self
    }

    pub fn merge(mut self, other: Self) -> Self {
        for (name, acc) in other.clusters {
            let merged = match self.clusters.remove(&name) {
                Some(existing) => existing.merge(acc),
                None => acc,
            };
            self.clusters.insert(name, merged);
        }
        self
    }

    /// Dataset-wide duplicate identities, qualified as
    /// `cluster/subcluster/topic/file`.
    pub fn duplicate_set(&self) -> BTreeSet<String> {
        self.clusters
            .iter()
            .flat_map(|(cluster, acc)| {
                acc.duplicates
                    .iter()
                    .map(move |dup| format!("{}/{}", cluster, dup))
            })
            .collect()
    }

    pub fn summary(&self) -> DuplicateSummary {
        let cluster_stats: BTreeMap<String, ClusterStats> = self
            .clusters
            .iter()
            .map(|(name, acc)| (name.clone(), acc.stats()))
            .collect();
        DuplicateSummary {
            total_images: cluster_stats.values().map(|s| s.total_images).sum(),
            total_duplicate_images: self.duplicate_set().len(),
            cluster_stats,
        }
    }

    pub fn listing(&self) -> DuplicateListing {
        self.clusters
            .iter()
            .map(|(name, acc)| (name.clone(), acc.groups.clone()))
            .collect()
    }
}

/// Folds topic outcomes into a dataset report. `clusters` are the cluster
/// names that must appear in the report even if nothing was found in them.
pub fn aggregate(clusters: &[String], outcomes: &[TopicOutcome]) -> DatasetAccumulator {
    outcomes
        .iter()
        .fold(DatasetAccumulator::with_clusters(clusters.iter().cloned()), |acc, outcome| {
            acc.absorb(outcome)
        })
}

/// Figures digested from several persisted summaries.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SummaryDigest {
    pub files_read: usize,
    pub total_images: usize,
    pub total_duplicate_images: usize,
    pub cluster_count: usize,
    pub median_cluster_images: f64,
    pub median_cluster_duplicates: f64,
}

pub fn digest_summaries(summaries: &[DuplicateSummary]) -> SummaryDigest {
    let mut images = Vec::new();
    let mut duplicates = Vec::new();
    for summary in summaries {
        for stats in summary.cluster_stats.values() {
            images.push(stats.total_images as f64);
            duplicates.push(stats.duplicate_images as f64);
        }
    }
    SummaryDigest {
        files_read: summaries.len(),
        total_images: summaries.iter().map(|s| s.total_images).sum(),
        total_duplicate_images: summaries.iter().map(|s| s.total_duplicate_images).sum(),
        cluster_count: images.len(),
        median_cluster_images: median(&mut images).unwrap_or(0.0),
        median_cluster_duplicates: median(&mut duplicates).unwrap_or(0.0),
    }
}

pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn topic(cluster: &str, subcluster: &str, name: &str) -> TopicRef {
        TopicRef {
            cluster: cluster.into(),
            subcluster: subcluster.into(),
            topic: name.into(),
            path: PathBuf::from(format!("/d/{}/{}/{}", cluster, subcluster, name)),
        }
    }

    fn outcome(t: TopicRef, groups: &[(&str, &[&str])]) -> TopicOutcome {
        let mut map = DuplicateMap::new();
        for (canonical, dups) in groups {
            map.insert(
                canonical.to_string(),
                dups.iter().map(|d| d.to_string()).collect(),
            );
        }
        TopicOutcome {
            topic: t,
            duplicates: map,
        }
    }

    #[test]
    fn test_cluster_counts_union_of_qualified_duplicates() {
        let outcomes = vec![
            outcome(
                topic("c1", "s1", "t1"),
                &[("a.png", &["b.png", "c.png"]), ("d.png", &[])],
            ),
            // Same file names in another topic are different identities.
            outcome(topic("c1", "s1", "t2"), &[("a.png", &["b.png"])]),
            outcome(topic("c2", "s1", "t1"), &[("x.png", &[])]),
        ];
        let report = aggregate(&["c1".to_string(), "c2".to_string()], &outcomes);
        let summary = report.summary();

        assert_eq!(
            summary.cluster_stats["c1"],
            ClusterStats {
                total_images: 6,
                duplicate_images: 3
            }
        );
        assert_eq!(
            summary.cluster_stats["c2"],
            ClusterStats {
                total_images: 1,
                duplicate_images: 0
            }
        );
        assert_eq!(summary.total_images, 7);
        assert_eq!(summary.total_duplicate_images, 3);
        assert!(report.duplicate_set().contains("c1/s1/t2/b.png"));
    }

    #[test]
    fn test_same_topic_twice_counts_duplicates_once() {
        let t = outcome(topic("c", "s", "t"), &[("a", &["b"])]);
        let once = ClusterAccumulator::default().absorb(&t);
        let twice = once.clone().merge(once.clone());
        assert_eq!(twice.duplicates, once.duplicates);
        assert_eq!(twice.groups, once.groups);
        assert_eq!(twice.stats().duplicate_images, 1);
    }

    #[test]
    fn test_merge_order_does_not_matter() {
        let outcomes = vec![
            outcome(topic("c1", "s", "t1"), &[("a", &["b"])]),
            outcome(topic("c1", "s", "t2"), &[("a", &["c", "d"])]),
            outcome(topic("c2", "s", "t1"), &[("q", &["r"])]),
        ];
        let forward = outcomes
            .iter()
            .map(|o| DatasetAccumulator::default().absorb(o))
            .fold(DatasetAccumulator::default(), DatasetAccumulator::merge);
        let backward = outcomes
            .iter()
            .rev()
            .map(|o| DatasetAccumulator::default().absorb(o))
            .fold(DatasetAccumulator::default(), DatasetAccumulator::merge);
        assert_eq!(forward.summary(), backward.summary());
        assert_eq!(forward.listing(), backward.listing());
    }

    #[test]
    fn test_failed_cluster_reported_as_zero() {
        let outcomes = vec![TopicOutcome::failed(topic("broken", "s", "t"))];
        let summary = aggregate(&["broken".to_string(), "empty".to_string()], &outcomes).summary();
        assert_eq!(summary.cluster_stats.len(), 2);
        assert_eq!(summary.cluster_stats["empty"], ClusterStats::default());
        assert_eq!(summary.cluster_stats["broken"], ClusterStats::default());
        assert_eq!(summary.total_images, 0);
    }

    #[test]
    fn test_summary_json_shape() {
        let outcomes = vec![outcome(topic("c", "s", "t"), &[("a", &["b"])])];
        let json = serde_json::to_value(aggregate(&["c".to_string()], &outcomes).summary()).unwrap();
        assert_eq!(json["total_images"], 2);
        assert_eq!(json["total_duplicate_images"], 1);
        assert_eq!(json["cluster_stats"]["c"]["duplicate_images"], 1);
    }

    #[test]
    fn test_listing_holds_only_groups_with_duplicates() {
        let outcomes = vec![outcome(topic("c", "s", "t"), &[("a", &["b"]), ("z", &[])])];
        let listing = aggregate(&["c".to_string()], &outcomes).listing();
        assert_eq!(listing["c"].len(), 1);
        assert_eq!(listing["c"]["s/t/a"], vec!["s/t/b".to_string()]);
    }

    #[test]
    fn test_digest_medians() {
        let mut first = DuplicateSummary::default();
        first.total_images = 30;
        first.total_duplicate_images = 4;
        for (name, total, dups) in [("a", 10, 1), ("b", 20, 3)] {
            first.cluster_stats.insert(
                name.into(),
                ClusterStats {
                    total_images: total,
                    duplicate_images: dups,
                },
            );
        }
        let mut second = DuplicateSummary::default();
        second.total_images = 40;
        second.total_duplicate_images = 9;
        second.cluster_stats.insert(
            "c".into(),
            ClusterStats {
                total_images: 40,
                duplicate_images: 9,
            },
        );

        let digest = digest_summaries(&[first, second]);
        assert_eq!(digest.files_read, 2);
        assert_eq!(digest.total_images, 70);
        assert_eq!(digest.total_duplicate_images, 13);
        assert_eq!(digest.cluster_count, 3);
        assert_eq!(digest.median_cluster_images, 20.0);
        assert_eq!(digest.median_cluster_duplicates, 3.0);
    }

    #[test]
    fn test_median_even_and_empty() {
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&mut []), None);
    }
}
