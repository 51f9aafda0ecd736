use std::collections::BTreeSet;
use std::io::Cursor;
use std::sync::Arc;

use chrono::NaiveDate;
use common::Result;
use common::config::Settings;
use tracing::{error, info};

use crate::cache::LocalPartitionCache;
use crate::ingest::{commit_partitions, parse_and_filter, read_csv_batches};
use crate::query::{DialStats, QueryEngine, QueryRequest, QueryResult};
use crate::storage::fs::FsRemoteStore;
use crate::storage::{DownloadPolicy, RemoteStore};
use crate::sync::{PartitionSyncManager, SyncState, dates_in_range};

/// A query answer plus any non-blocking reconciliation warnings that were
/// produced while materializing the requested range.
pub struct QueryOutcome<T> {
    pub result: T,
    pub sync_warnings: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ImportReport {
    pub rows_ingested: usize,
    pub partitions: Vec<NaiveDate>,
    pub files_uploaded: usize,
}

/// The one application context: remote store handle, local cache, sync
/// manager and query engine, wired from settings at startup. Constructed
/// explicitly and shared behind an `Arc`; there is no global state.
pub struct DialSpeedService {
    sync: PartitionSyncManager,
    engine: QueryEngine,
    default_percentiles: BTreeSet<u8>,
}

impl DialSpeedService {
    pub async fn new(settings: &Settings) -> Result<Self> {
        let store: Arc<dyn RemoteStore> =
            Arc::new(FsRemoteStore::new(&settings.remote.root_path));
        Self::with_store(settings, store).await
    }

    /// Wires the service around any store implementation. Construction is
    /// the only place where a broken environment (unwritable cache root,
    /// unresolvable dataset root) fails hard.
    pub async fn with_store(settings: &Settings, store: Arc<dyn RemoteStore>) -> Result<Self> {
        let cache = LocalPartitionCache::new(&settings.cache.root)?;

        // The configured root may be a shortcut into the shared dataset;
        // resolve it once so every later call works on the real folder.
        let root_id = store.resolve_shortcut(&settings.remote.root_id).await?;

        let policy = DownloadPolicy {
            max_attempts: settings.sync.max_attempts,
            chunk_size: settings.sync.chunk_size,
            ..DownloadPolicy::default()
        };
        let sync = PartitionSyncManager::new(
            store,
            cache.clone(),
            root_id,
            policy,
            settings.sync.concurrency,
        );
        let engine = QueryEngine::new(cache);

        Ok(Self {
            sync,
            engine,
            default_percentiles: settings.query.default_percentiles.iter().copied().collect(),
        })
    }

    pub fn default_percentiles(&self) -> BTreeSet<u8> {
        self.default_percentiles.clone()
    }

    pub async fn grouped_summary(
        &self,
        request: QueryRequest,
    ) -> Result<QueryOutcome<Arc<QueryResult>>> {
        let sync_warnings = self.materialize(request.start, request.end).await;
        let result = self.engine.grouped_summary(&request).await?;
        Ok(QueryOutcome {
            result,
            sync_warnings,
        })
    }

    pub async fn weekly_summary(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        campaigns: BTreeSet<String>,
        percentiles: BTreeSet<u8>,
    ) -> Result<QueryOutcome<Arc<QueryResult>>> {
        let sync_warnings = self.materialize(start, end).await;
        let result = self
            .engine
            .weekly_summary(start, end, &campaigns, &percentiles)
            .await?;
        Ok(QueryOutcome {
            result,
            sync_warnings,
        })
    }

    pub async fn overall_stats(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        campaigns: BTreeSet<String>,
        percentiles: BTreeSet<u8>,
    ) -> Result<QueryOutcome<Arc<DialStats>>> {
        let sync_warnings = self.materialize(start, end).await;
        let result = self
            .engine
            .overall_stats(start, end, &campaigns, &percentiles)
            .await?;
        Ok(QueryOutcome {
            result,
            sync_warnings,
        })
    }

    pub async fn list_campaigns(&self) -> Vec<String> {
        self.engine.list_known_campaigns().await
    }

    /// Ingests one CSV payload: validate, filter, commit to the local
    /// tier, push the touched partitions upstream, drop stale results.
    /// A schema violation fails the payload before anything is written.
    pub async fn import_csv(&self, data: &[u8]) -> Result<ImportReport> {
        let batches = read_csv_batches(Cursor::new(data))?;
        let mut records = Vec::new();
        for batch in &batches {
            records.extend(parse_and_filter(batch)?);
        }
        if records.is_empty() {
            info!("Import contained no usable rows");
            return Ok(ImportReport::default());
        }

        let rows_ingested = records.len();
        let touched = commit_partitions(self.sync.cache(), records)?;
        self.engine.invalidate_results();

        let files_uploaded = self.sync.upload_new_partitions(&touched).await?;
        info!(
            rows = rows_ingested,
            partitions = touched.len(),
            uploaded = files_uploaded,
            "Import finished"
        );

        Ok(ImportReport {
            rows_ingested,
            partitions: touched.into_iter().collect(),
            files_uploaded,
        })
    }

    /// Removes every partition in the inclusive range from both tiers.
    pub async fn delete_range(&self, start: NaiveDate, end: NaiveDate) -> Result<usize> {
        let dates = dates_in_range(start, end);
        self.sync.delete_dates(&dates).await?;
        self.engine.invalidate_results();
        Ok(dates.len())
    }

    pub async fn partition_state(&self, date: NaiveDate) -> Result<SyncState> {
        self.sync.partition_state(date).await
    }

    /// Pulls the requested range into the local tier. An unreachable
    /// remote degrades to a warning; whatever is already cached still
    /// answers the query.
    async fn materialize(&self, start: NaiveDate, end: NaiveDate) -> Vec<String> {
        match self.sync.ensure_local_dates(&dates_in_range(start, end)).await {
            Ok(report) => report.warnings,
            Err(e) => {
                error!(error = %e, "Partition sync failed, serving local data only");
                vec![format!("Remote sync unavailable: {}", e)]
            }
        }
    }
}
