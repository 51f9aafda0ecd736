use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::NaiveDate;
use common::Result;
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{info, warn};

use crate::cache::LocalPartitionCache;
use crate::schema::partition_name;
use crate::storage::{DownloadPolicy, NodeKind, RemoteStore, download_to_path, list_children};
use crate::utils::retry::RetryPolicy;

/// Reconciliation state of one date partition across the two tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Absent,
    LocalOnly,
    RemoteOnly,
    Synced,
}

/// Outcome of one `ensure_local_dates` run. Warnings are per-file and
/// non-blocking; a run with warnings still succeeded for everything else.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub downloaded_files: usize,
    pub skipped_dates: usize,
    pub warnings: Vec<String>,
}

/// Orchestrates reconciliation between the remote dataset root and the
/// local partition cache. Partitions are independent units of work and are
/// processed under a bounded pool.
pub struct PartitionSyncManager {
    store: Arc<dyn RemoteStore>,
    cache: LocalPartitionCache,
    root_id: String,
    policy: DownloadPolicy,
    concurrency: usize,
}

impl PartitionSyncManager {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        cache: LocalPartitionCache,
        root_id: String,
        policy: DownloadPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            cache,
            root_id,
            policy,
            concurrency: concurrency.max(1),
        }
    }

    pub fn cache(&self) -> &LocalPartitionCache {
        &self.cache
    }

    /// Materializes the requested dates locally, pulling whatever exists
    /// upstream. Dates with no remote folder are skipped and will simply
    /// produce zero query rows. A single file's failure is recorded as a
    /// warning and never aborts the batch.
    pub async fn ensure_local_dates(&self, requested: &BTreeSet<NaiveDate>) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        let missing: Vec<NaiveDate> = requested
            .iter()
            .copied()
            .filter(|d| !self.cache.is_present(*d))
            .collect();
        if missing.is_empty() {
            return Ok(report);
        }

        // One listing up front; per-date lookups against a flaky backend
        // would multiply round-trips.
        let remote_folders: HashMap<String, String> =
            list_children(self.store.as_ref(), &self.root_id, Some(NodeKind::Folder))
                .await?
                .into_iter()
                .map(|node| (node.name, node.id))
                .collect();

        let mut futures = FuturesUnordered::new();
        for date in missing {
            let folder_id = remote_folders.get(&partition_name(date)).cloned();
            futures.push(self.pull_partition(date, folder_id));

            if futures.len() >= self.concurrency {
                if let Some(outcome) = futures.next().await {
                    merge_outcome(&mut report, outcome);
                }
            }
        }
        while let Some(outcome) = futures.next().await {
            merge_outcome(&mut report, outcome);
        }

        info!(
            downloaded = report.downloaded_files,
            skipped = report.skipped_dates,
            warnings = report.warnings.len(),
            "Partition sync finished"
        );
        Ok(report)
    }

    async fn pull_partition(&self, date: NaiveDate, folder_id: Option<String>) -> PullOutcome {
        let mut outcome = PullOutcome::default();
        let Some(folder_id) = folder_id else {
            outcome.skipped = true;
            return outcome;
        };

        let children = match list_children(self.store.as_ref(), &folder_id, None).await {
            Ok(children) => children,
            Err(e) => {
                outcome
                    .warnings
                    .push(format!("Could not list {}: {}", partition_name(date), e));
                return outcome;
            }
        };

        let dir = self.cache.partition_dir(date);
        for file in children
            .into_iter()
            .filter(|node| node.kind != NodeKind::Folder)
        {
            let dest = dir.join(&file.name);
            match download_to_path(self.store.as_ref(), &file.id, &dest, &self.policy).await {
                Ok(()) => outcome.downloaded += 1,
                Err(e) => {
                    let message = format!("Could not download {} ({}): {}", file.name, file.id, e);
                    warn!(partition = %partition_name(date), "{}", message);
                    outcome.warnings.push(message);
                }
            }
        }
        outcome
    }

    /// Pushes every file of the touched partitions upstream. Uploads are
    /// not deduplicated against remote contents; re-invoking for an
    /// already-uploaded partition accumulates duplicates.
    pub async fn upload_new_partitions(&self, dates: &BTreeSet<NaiveDate>) -> Result<usize> {
        let retry = RetryPolicy::default();
        let mut uploaded = 0;

        for date in dates {
            let files = self.cache.partition_files(*date);
            if files.is_empty() {
                continue;
            }

            let folder_id = self.ensure_remote_folder(*date).await?;
            for path in files {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let data = bytes::Bytes::from(tokio::fs::read(&path).await?);
                retry
                    .run(|| self.store.upload(&folder_id, &name, data.clone()))
                    .await?;
                uploaded += 1;
            }
        }

        Ok(uploaded)
    }

    async fn ensure_remote_folder(&self, date: NaiveDate) -> Result<String> {
        let name = partition_name(date);
        match self.store.find_child_by_name(&self.root_id, &name).await? {
            Some(node) => Ok(node.id),
            None => self.store.create_folder(&self.root_id, &name).await,
        }
    }

    /// Removes partitions from both tiers. Forward-only: a local removal
    /// failure does not roll back the remote deletion.
    pub async fn delete_dates(&self, dates: &BTreeSet<NaiveDate>) -> Result<()> {
        let remote_folders: HashMap<String, String> =
            list_children(self.store.as_ref(), &self.root_id, Some(NodeKind::Folder))
                .await?
                .into_iter()
                .map(|node| (node.name, node.id))
                .collect();

        for date in dates {
            if let Some(folder_id) = remote_folders.get(&partition_name(*date)) {
                for child in list_children(self.store.as_ref(), folder_id, None).await? {
                    self.store.delete(&child.id).await?;
                }
                self.store.delete(folder_id).await?;
            }
            self.cache.remove_partition(*date);
        }

        Ok(())
    }

    pub async fn partition_state(&self, date: NaiveDate) -> Result<SyncState> {
        let local = self.cache.is_present(date);
        let remote = match self
            .store
            .find_child_by_name(&self.root_id, &partition_name(date))
            .await?
        {
            Some(folder) => list_children(self.store.as_ref(), &folder.id, None)
                .await?
                .iter()
                .any(|node| node.kind != NodeKind::Folder),
            None => false,
        };

        Ok(match (local, remote) {
            (false, false) => SyncState::Absent,
            (true, false) => SyncState::LocalOnly,
            (false, true) => SyncState::RemoteOnly,
            (true, true) => SyncState::Synced,
        })
    }
}

#[derive(Debug, Default)]
struct PullOutcome {
    downloaded: usize,
    skipped: bool,
    warnings: Vec<String>,
}

fn merge_outcome(report: &mut SyncReport, outcome: PullOutcome) {
    report.downloaded_files += outcome.downloaded;
    if outcome.skipped {
        report.skipped_dates += 1;
    }
    report.warnings.extend(outcome.warnings);
}

/// Inclusive calendar date range, the unit requested by queries.
pub fn dates_in_range(start: NaiveDate, end: NaiveDate) -> BTreeSet<NaiveDate> {
    let mut dates = BTreeSet::new();
    let mut current = start;
    while current <= end {
        dates.insert(current);
        match current.succ_opt() {
            Some(next) => current = next,
            None => break,
        }
    }
    dates
}
