use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use common::Result;
use tracing::warn;

use crate::schema::{parse_partition_name, partition_name};

/// On-disk working copy of the dataset, one `Date=YYYY-MM-DD` directory per
/// calendar day. Plain synchronous filesystem code; the local disk is
/// assumed reliable.
#[derive(Debug, Clone)]
pub struct LocalPartitionCache {
    root: PathBuf,
}

impl LocalPartitionCache {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn partition_dir(&self, date: NaiveDate) -> PathBuf {
        self.root.join(partition_name(date))
    }

    /// Dates with a partition directory present, derived by scanning the
    /// top level. Entries that do not follow the naming convention are
    /// ignored.
    pub fn list_local_dates(&self) -> BTreeSet<NaiveDate> {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return BTreeSet::new();
        };
        entries
            .flatten()
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| parse_partition_name(&entry.file_name().to_string_lossy()))
            .collect()
    }

    /// A partition counts as present only when its directory holds at least
    /// one file.
    pub fn is_present(&self, date: NaiveDate) -> bool {
        !self.partition_files(date).is_empty()
    }

    pub fn partition_files(&self, date: NaiveDate) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(self.partition_dir(date)) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        files.sort();
        files
    }

    /// Best-effort removal of a partition directory.
    pub fn remove_partition(&self, date: NaiveDate) {
        let dir = self.partition_dir(date);
        if dir.is_dir() {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                warn!(partition = %partition_name(date), error = %e, "Could not remove local partition");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_list_local_dates_ignores_noise() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalPartitionCache::new(dir.path()).unwrap();

        std::fs::create_dir(dir.path().join("Date=2024-03-01")).unwrap();
        std::fs::create_dir(dir.path().join("Date=2024-03-02")).unwrap();
        std::fs::create_dir(dir.path().join("scratch")).unwrap();
        std::fs::write(dir.path().join("Date=2024-03-03"), b"a file, not a dir").unwrap();

        let dates = cache.list_local_dates();
        assert_eq!(
            dates.into_iter().collect::<Vec<_>>(),
            vec![date("2024-03-01"), date("2024-03-02")]
        );
    }

    #[test]
    fn test_presence_requires_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalPartitionCache::new(dir.path()).unwrap();
        let d = date("2024-03-01");

        assert!(!cache.is_present(d));

        std::fs::create_dir(cache.partition_dir(d)).unwrap();
        assert!(!cache.is_present(d), "empty directory is not present");

        std::fs::write(cache.partition_dir(d).join("part.parquet"), b"x").unwrap();
        assert!(cache.is_present(d));
    }

    #[test]
    fn test_remove_partition_is_best_effort() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalPartitionCache::new(dir.path()).unwrap();
        let d = date("2024-03-01");

        // Removing something absent must not panic or error.
        cache.remove_partition(d);

        std::fs::create_dir(cache.partition_dir(d)).unwrap();
        std::fs::write(cache.partition_dir(d).join("part.parquet"), b"x").unwrap();
        cache.remove_partition(d);
        assert!(!cache.partition_dir(d).exists());
    }
}
