// Traversal of the fixed dataset hierarchy:
// <root>/<cluster>/<subcluster>/<topic>/<files>
//
// Every listing is sorted by file name so results never depend on the order
// the OS returns directory entries in.

use std::fs::FileType;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A topic directory together with its position in the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TopicRef {
    pub cluster: String,
    pub subcluster: String,
    pub topic: String,
    pub path: PathBuf,
}

impl TopicRef {
    pub fn subcluster_path(&self) -> &Path {
        self.path.parent().unwrap_or(&self.path)
    }

    /// `subcluster/topic`, the qualifier used inside a cluster.
    pub fn qualifier(&self) -> String {
        format!("{}/{}", self.subcluster, self.topic)
    }
}

/// A subcluster directory together with its cluster name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SubclusterRef {
    pub cluster: String,
    pub subcluster: String,
    pub path: PathBuf,
}

/// Names of the entries directly inside `dir` whose type (after following
/// symlinks) passes `keep`, sorted. Dangling links are skipped; only a failure
/// to read `dir` itself is an error.
fn list_entries(dir: &Path, keep: fn(&FileType) -> bool) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() > 0 => {
                log::warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                continue;
            }
            Err(e) => return Err(io::Error::from(e)),
        };
        if keep(&entry.file_type()) {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    Ok(names)
}

/// Names of the immediate subdirectories of `dir`, sorted.
pub fn list_subdirs(dir: &Path) -> io::Result<Vec<String>> {
    list_entries(dir, FileType::is_dir)
}

/// Names of the regular files directly inside `dir`, sorted.
pub fn list_files(dir: &Path) -> io::Result<Vec<String>> {
    list_entries(dir, FileType::is_file)
}

/// Cluster names of a dataset root. Fails only when the root itself cannot be
/// listed.
pub fn clusters(root: &Path) -> io::Result<Vec<String>> {
    list_subdirs(root)
}

/// Subclusters of one cluster. An unreadable cluster yields nothing.
pub fn subclusters(root: &Path, cluster: &str) -> Vec<SubclusterRef> {
    let cluster_path = root.join(cluster);
    match list_subdirs(&cluster_path) {
        Ok(names) => names
            .into_iter()
            .map(|subcluster| SubclusterRef {
                cluster: cluster.to_string(),
                path: cluster_path.join(&subcluster),
                subcluster,
            })
            .collect(),
        Err(e) => {
            log::error!("Cannot list cluster {}: {}", cluster_path.display(), e);
            Vec::new()
        }
    }
}

/// Topics of one subcluster. An unreadable subcluster yields nothing.
pub fn topics(subcluster: &SubclusterRef) -> Vec<TopicRef> {
    match list_subdirs(&subcluster.path) {
        Ok(names) => names
            .into_iter()
            .map(|topic| TopicRef {
                cluster: subcluster.cluster.clone(),
                subcluster: subcluster.subcluster.clone(),
                path: subcluster.path.join(&topic),
                topic,
            })
            .collect(),
        Err(e) => {
            log::error!(
                "Cannot list subcluster {}: {}",
                subcluster.path.display(),
                e
            );
            Vec::new()
        }
    }
}

/// All topics of one cluster, in traversal order.
pub fn cluster_topics(root: &Path, cluster: &str) -> Vec<TopicRef> {
    subclusters(root, cluster)
        .iter()
        .flat_map(topics)
        .collect()
}

/// All topics under a dataset root, in traversal order.
pub fn all_topics(root: &Path) -> io::Result<Vec<TopicRef>> {
    Ok(clusters(root)?
        .iter()
        .flat_map(|cluster| cluster_topics(root, cluster))
        .collect())
}

/// Name used for per-dataset report files: the last path component.
pub fn dataset_name(root: &Path) -> String {
    root.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dataset".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_walks_hierarchy_in_sorted_order() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        for rel in ["b/s2/t1", "b/s1/t2", "b/s1/t1", "a/s1/t9"] {
            fs::create_dir_all(root.join(rel)).unwrap();
        }
        // Stray files at every level are not part of the hierarchy.
        fs::write(root.join("notes.txt"), b"x").unwrap();
        fs::write(root.join("b/s1/duplicates_t1.json"), b"{}").unwrap();

        let found: Vec<String> = all_topics(root)
            .unwrap()
            .iter()
            .map(|t| format!("{}/{}", t.cluster, t.qualifier()))
            .collect();
        assert_eq!(found, vec!["a/s1/t9", "b/s1/t1", "b/s1/t2", "b/s2/t1"]);
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        assert!(all_topics(&temp_dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_missing_cluster_yields_no_topics() {
        let temp_dir = TempDir::new().unwrap();
        assert!(cluster_topics(temp_dir.path(), "ghost").is_empty());
    }

    #[test]
    fn test_list_files_skips_directories() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir(temp_dir.path().join("nested")).unwrap();
        fs::write(temp_dir.path().join("b.png"), b"b").unwrap();
        fs::write(temp_dir.path().join("a.png"), b"a").unwrap();

        assert_eq!(list_files(temp_dir.path()).unwrap(), vec!["a.png", "b.png"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_followed_and_dangling_ones_skipped() {
        use std::os::unix::fs::symlink;

        let temp_dir = TempDir::new().unwrap();
        let store = temp_dir.path().join("store");
        fs::create_dir_all(store.join("t_real")).unwrap();
        fs::write(store.join("img.png"), b"i").unwrap();

        let sub = temp_dir.path().join("root/c/s");
        fs::create_dir_all(sub.join("t")).unwrap();
        symlink(store.join("t_real"), sub.join("linked")).unwrap();
        symlink(store.join("img.png"), sub.join("t/a.png")).unwrap();
        symlink(store.join("gone.png"), sub.join("t/b.png")).unwrap();
        fs::write(sub.join("t/c.png"), b"c").unwrap();

        assert_eq!(list_subdirs(&sub).unwrap(), vec!["linked", "t"]);
        assert_eq!(list_files(&sub.join("t")).unwrap(), vec!["a.png", "c.png"]);
    }
}
