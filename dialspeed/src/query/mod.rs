pub mod cache;
pub mod stats;

pub use stats::{DialStats, PercentileValue};

use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array, Int32Array, Int64Array, StringArray};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use chrono::{Datelike, NaiveDate, Utc};
use common::{Error, Result};
use datafusion::functions_aggregate::min_max::min;
use datafusion::prelude::{ParquetReadOptions, SessionContext, ident, lit};
use serde::Serialize;
use tracing::error;

use crate::cache::LocalPartitionCache;
use crate::schema::PARTITION_COLUMN;
use self::cache::{CacheKey, QueryCache};

/// Grouping dimensions a request may ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupDim {
    Campaign,
    Date,
    HourInterval,
}

impl GroupDim {
    /// Column name in the scanned dataset.
    fn column(&self) -> &'static str {
        match self {
            GroupDim::Campaign => "campaign",
            GroupDim::Date => PARTITION_COLUMN,
            GroupDim::HourInterval => "hour_interval",
        }
    }
}

impl FromStr for GroupDim {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "campaign" => Ok(GroupDim::Campaign),
            "date" => Ok(GroupDim::Date),
            "hour_interval" | "interval" => Ok(GroupDim::HourInterval),
            other => Err(Error::InvalidInput(format!(
                "Unknown grouping dimension: {}",
                other
            ))),
        }
    }
}

/// One grouping key component.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(untagged)]
pub enum GroupValue {
    Text(String),
    Int(i64),
}

/// A stateless, idempotent aggregate query over the local cache.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub campaigns: BTreeSet<String>,
    pub group_by: Vec<GroupDim>,
    pub percentiles: BTreeSet<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryRow {
    pub group: Vec<GroupValue>,
    #[serde(flatten)]
    pub stats: DialStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub dims: Vec<String>,
    pub rows: Vec<SummaryRow>,
}

impl QueryResult {
    pub fn empty(dims: Vec<String>) -> Self {
        Self {
            dims,
            rows: Vec::new(),
        }
    }
}

struct ObservationRow {
    group: Vec<GroupValue>,
    level1: String,
    min_speed: f64,
}

/// Executes grouped aggregate queries over whatever partitions are locally
/// present. Filters and the per-fine-key minimum run in DataFusion over the
/// hive-partitioned cache directory; count/mean/percentiles run in-process.
/// Faults degrade to empty (or zero) results and are logged, never surfaced.
pub struct QueryEngine {
    ctx: SessionContext,
    cache: LocalPartitionCache,
    results: QueryCache,
}

impl QueryEngine {
    pub fn new(cache: LocalPartitionCache) -> Self {
        Self {
            ctx: SessionContext::new(),
            cache,
            results: QueryCache::default(),
        }
    }

    /// Drops all cached results. Must be called whenever the locally
    /// visible partition set changes (ingestion, deletion).
    pub fn invalidate_results(&self) {
        self.results.invalidate();
    }

    /// Grouped summary over arbitrary dimensions. No campaigns or no
    /// dimensions selected yields an empty result, not an error.
    pub async fn grouped_summary(&self, request: &QueryRequest) -> Result<Arc<QueryResult>> {
        validate_campaigns(&request.campaigns)?;
        validate_percentiles(&request.percentiles)?;

        let dims: Vec<String> = request
            .group_by
            .iter()
            .map(|d| d.column().to_string())
            .collect();
        if request.campaigns.is_empty() || request.group_by.is_empty() {
            return Ok(Arc::new(QueryResult::empty(dims)));
        }

        let key = self.cache_key(request.start, request.end, &request.campaigns, &request.percentiles, dims.clone());
        if let Some(hit) = self.results.get_rows(&key) {
            return Ok(hit);
        }

        let percentiles = percentiles_desc(&request.percentiles);
        let columns: Vec<&str> = request.group_by.iter().map(|d| d.column()).collect();
        let result = match self
            .min_observations(request.start, request.end, &request.campaigns, &columns)
            .await
        {
            Ok(observations) => {
                let mut rows = aggregate_rows(observations, &percentiles);
                sort_grouped(&mut rows, &request.group_by);
                QueryResult { dims, rows }
            }
            Err(e) => {
                error!(error = %e, "Grouped summary failed, degrading to empty result");
                QueryResult::empty(dims)
            }
        };

        let result = Arc::new(result);
        self.results.put_rows(key, result.clone());
        Ok(result)
    }

    /// Weekly rollup: ISO week start (Monday) by campaign, week descending.
    pub async fn weekly_summary(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        campaigns: &BTreeSet<String>,
        percentiles: &BTreeSet<u8>,
    ) -> Result<Arc<QueryResult>> {
        validate_campaigns(campaigns)?;
        validate_percentiles(percentiles)?;

        let dims = vec!["week_start".to_string(), "campaign".to_string()];
        if campaigns.is_empty() {
            return Ok(Arc::new(QueryResult::empty(dims)));
        }

        let key = self.cache_key(start, end, campaigns, percentiles, dims.clone());
        if let Some(hit) = self.results.get_rows(&key) {
            return Ok(hit);
        }

        let ps = percentiles_desc(percentiles);
        let result = match self
            .min_observations(start, end, campaigns, &[PARTITION_COLUMN, "campaign"])
            .await
        {
            Ok(observations) => {
                let mut rows = aggregate_rows(fold_to_weeks(observations), &ps);
                rows.sort_by(|a, b| {
                    b.group[0]
                        .cmp(&a.group[0])
                        .then_with(|| a.group[1].cmp(&b.group[1]))
                });
                QueryResult { dims, rows }
            }
            Err(e) => {
                error!(error = %e, "Weekly summary failed, degrading to empty result");
                QueryResult::empty(dims)
            }
        };

        let result = Arc::new(result);
        self.results.put_rows(key, result.clone());
        Ok(result)
    }

    /// Single aggregate row over the whole selection. Faults degrade to a
    /// zero-valued record.
    pub async fn overall_stats(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        campaigns: &BTreeSet<String>,
        percentiles: &BTreeSet<u8>,
    ) -> Result<Arc<DialStats>> {
        validate_campaigns(campaigns)?;
        validate_percentiles(percentiles)?;

        let ps = percentiles_desc(percentiles);
        if campaigns.is_empty() {
            return Ok(Arc::new(DialStats::zero(&ps)));
        }

        let key = self.cache_key(start, end, campaigns, percentiles, Vec::new());
        if let Some(hit) = self.results.get_stats(&key) {
            return Ok(hit);
        }

        let stats = match self.min_observations(start, end, campaigns, &[]).await {
            Ok(observations) => {
                let values: Vec<f64> = observations.into_iter().map(|o| o.min_speed).collect();
                stats::summarize(values, &ps)
            }
            Err(e) => {
                error!(error = %e, "Overall stats failed, degrading to zero record");
                DialStats::zero(&ps)
            }
        };

        let stats = Arc::new(stats);
        self.results.put_stats(key, stats.clone());
        Ok(stats)
    }

    /// Distinct campaign values across all locally cached data.
    pub async fn list_known_campaigns(&self) -> Vec<String> {
        match self.distinct_campaigns().await {
            Ok(campaigns) => campaigns,
            Err(e) => {
                error!(error = %e, "Campaign listing failed, degrading to empty list");
                Vec::new()
            }
        }
    }

    async fn distinct_campaigns(&self) -> Result<Vec<String>> {
        let table = self.register_scan().await?;
        let result = async {
            let df = self
                .ctx
                .table(table.as_str())
                .await?
                .select(vec![ident("campaign")])?
                .distinct()?
                .sort(vec![ident("campaign").sort(true, false)])?;
            let batches = df.collect().await?;

            let mut campaigns = Vec::new();
            for batch in &batches {
                let names = utf8_column(batch, "campaign")?;
                for row in 0..names.len() {
                    if !names.is_null(row) {
                        campaigns.push(names.value(row).to_string());
                    }
                }
            }
            Ok(campaigns)
        }
        .await;
        let _ = self.ctx.deregister_table(table.as_str());
        result
    }

    /// Step 1 of every query shape: one minimum-speed observation per
    /// (`group_columns`…, `level1`) fine key within the date/campaign
    /// selection. A call may be logged multiple times for one fine key;
    /// only the fastest contact counts.
    async fn min_observations(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        campaigns: &BTreeSet<String>,
        group_columns: &[&str],
    ) -> Result<Vec<ObservationRow>> {
        let table = self.register_scan().await?;
        let result = async {
            // `ident`, not `col`: the partition column is case-sensitive
            // and an unquoted identifier would be folded to lowercase.
            let campaign_filter = ident("campaign").in_list(
                campaigns.iter().map(|c| lit(c.as_str())).collect(),
                false,
            );
            let date_filter = ident(PARTITION_COLUMN).between(
                lit(start.format("%Y-%m-%d").to_string()),
                lit(end.format("%Y-%m-%d").to_string()),
            );

            let mut group_exprs: Vec<_> = group_columns.iter().map(|c| ident(*c)).collect();
            group_exprs.push(ident("level1"));

            let df = self
                .ctx
                .table(table.as_str())
                .await?
                .filter(date_filter.and(campaign_filter))?
                .aggregate(
                    group_exprs,
                    vec![min(ident("dial_speed_seconds")).alias("min_dial_speed")],
                )?;
            let batches = df.collect().await?;
            extract_observations(&batches, group_columns)
        }
        .await;
        let _ = self.ctx.deregister_table(table.as_str());
        result
    }

    /// Registers a fresh listing of the cache directory under a unique
    /// table name, so each query sees the partition files present now.
    async fn register_scan(&self) -> Result<String> {
        let table = format!(
            "calls_{}",
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        );
        let root = self
            .cache
            .root()
            .to_str()
            .ok_or_else(|| Error::Other("Cache root is not valid UTF-8".to_string()))?;

        let options = ParquetReadOptions::default()
            .table_partition_cols(vec![(PARTITION_COLUMN.to_string(), DataType::Utf8)]);
        self.ctx
            .register_parquet(table.as_str(), format!("{}/", root), options)
            .await?;
        Ok(table)
    }

    fn cache_key(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        campaigns: &BTreeSet<String>,
        percentiles: &BTreeSet<u8>,
        dims: Vec<String>,
    ) -> CacheKey {
        CacheKey {
            start,
            end,
            campaigns: campaigns.iter().cloned().collect(),
            dims,
            percentiles: percentiles.iter().copied().collect(),
        }
    }
}

/// Campaign names come from outside; only a conservative character set is
/// allowed anywhere near the scan.
fn validate_campaigns(campaigns: &BTreeSet<String>) -> Result<()> {
    for name in campaigns {
        let ok = !name.is_empty()
            && name.len() <= 128
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ' ' | '.'));
        if !ok {
            return Err(Error::InvalidInput(format!(
                "Campaign name not allowed: {:?}",
                name
            )));
        }
    }
    Ok(())
}

fn validate_percentiles(percentiles: &BTreeSet<u8>) -> Result<()> {
    for p in percentiles {
        if !(1..=99).contains(p) {
            return Err(Error::InvalidInput(format!(
                "Percentile out of range [1, 99]: {}",
                p
            )));
        }
    }
    Ok(())
}

fn percentiles_desc(percentiles: &BTreeSet<u8>) -> Vec<u8> {
    percentiles.iter().rev().copied().collect()
}

fn utf8_column(batch: &RecordBatch, name: &str) -> Result<StringArray> {
    let idx = batch.schema().index_of(name)?;
    let array = cast(batch.column(idx), &DataType::Utf8)?;
    array
        .as_any()
        .downcast_ref::<StringArray>()
        .cloned()
        .ok_or_else(|| Error::Other(format!("Column {} did not cast to Utf8", name)))
}

fn group_value(array: &ArrayRef, row: usize) -> Result<GroupValue> {
    match array.data_type() {
        DataType::Int32 => array
            .as_any()
            .downcast_ref::<Int32Array>()
            .map(|a| GroupValue::Int(a.value(row) as i64)),
        DataType::Int64 => array
            .as_any()
            .downcast_ref::<Int64Array>()
            .map(|a| GroupValue::Int(a.value(row))),
        _ => array
            .as_any()
            .downcast_ref::<StringArray>()
            .map(|a| GroupValue::Text(a.value(row).to_string())),
    }
    .ok_or_else(|| Error::Other("Unexpected group column layout".to_string()))
}

fn extract_observations(
    batches: &[RecordBatch],
    group_columns: &[&str],
) -> Result<Vec<ObservationRow>> {
    let mut observations = Vec::new();

    for batch in batches {
        let schema = batch.schema();

        let mut dim_arrays: Vec<ArrayRef> = Vec::with_capacity(group_columns.len());
        for name in group_columns {
            let idx = schema.index_of(name)?;
            let array = batch.column(idx);
            let normalized = match array.data_type() {
                DataType::Int32 | DataType::Int64 => array.clone(),
                _ => cast(array, &DataType::Utf8)?,
            };
            dim_arrays.push(normalized);
        }
        let level1s = utf8_column(batch, "level1")?;
        let mins = cast(batch.column(schema.index_of("min_dial_speed")?), &DataType::Float64)?;
        let mins = mins
            .as_any()
            .downcast_ref::<Float64Array>()
            .cloned()
            .ok_or_else(|| Error::Other("min_dial_speed did not cast to Float64".to_string()))?;

        for row in 0..batch.num_rows() {
            if mins.is_null(row) || level1s.is_null(row) {
                continue;
            }
            if dim_arrays.iter().any(|a| a.is_null(row)) {
                continue;
            }
            let group = dim_arrays
                .iter()
                .map(|a| group_value(a, row))
                .collect::<Result<Vec<_>>>()?;
            observations.push(ObservationRow {
                group,
                level1: level1s.value(row).to_string(),
                min_speed: mins.value(row),
            });
        }
    }

    Ok(observations)
}

/// Step 2: fold observations by final group key and summarize each group.
/// The fold keeps the minimum per (group, level1) so shapes that coarsen
/// the key after scanning (weekly) stay exact.
fn aggregate_rows(observations: Vec<ObservationRow>, percentiles: &[u8]) -> Vec<SummaryRow> {
    let mut fine: HashMap<(Vec<GroupValue>, String), f64> = HashMap::new();
    for obs in observations {
        fine.entry((obs.group, obs.level1))
            .and_modify(|v| *v = v.min(obs.min_speed))
            .or_insert(obs.min_speed);
    }

    let mut groups: HashMap<Vec<GroupValue>, Vec<f64>> = HashMap::new();
    for ((group, _level1), speed) in fine {
        groups.entry(group).or_default().push(speed);
    }

    groups
        .into_iter()
        .map(|(group, values)| SummaryRow {
            group,
            stats: stats::summarize(values, percentiles),
        })
        .collect()
}

/// Coarsens per-date observations to ISO week starts (Monday).
fn fold_to_weeks(observations: Vec<ObservationRow>) -> Vec<ObservationRow> {
    observations
        .into_iter()
        .filter_map(|mut obs| {
            let GroupValue::Text(date_str) = &obs.group[0] else {
                return None;
            };
            let date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d").ok()?;
            let week = date
                - chrono::Duration::days(i64::from(date.weekday().num_days_from_monday()));
            obs.group[0] = GroupValue::Text(week.format("%Y-%m-%d").to_string());
            Some(obs)
        })
        .collect()
}

/// Single dimension sorts ascending; a cross-tabulation led by the date
/// dimension sorts date descending then the rest ascending.
fn sort_grouped(rows: &mut [SummaryRow], dims: &[GroupDim]) {
    if dims.len() > 1 && dims[0] == GroupDim::Date {
        rows.sort_by(|a, b| {
            b.group[0]
                .cmp(&a.group[0])
                .then_with(|| a.group[1..].cmp(&b.group[1..]))
        });
    } else {
        rows.sort_by(|a, b| a.group.cmp(&b.group));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::commit_partitions;
    use crate::schema::CallRecord;
    use chrono::{NaiveDateTime, Timelike};

    fn record(campaign: &str, level1: &str, insert: &str, speed: f64) -> CallRecord {
        let insert_time =
            NaiveDateTime::parse_from_str(insert, "%Y-%m-%d %H:%M:%S").unwrap();
        CallRecord {
            campaign: campaign.to_string(),
            level1: level1.to_string(),
            call_start: insert_time + chrono::Duration::milliseconds((speed * 1000.0) as i64),
            insert_time,
            attempt: 1,
            status: "Connected".to_string(),
            dial_speed_seconds: speed,
            hour_interval: insert_time.hour(),
        }
    }

    fn scenario_records() -> Vec<CallRecord> {
        vec![
            record("Camp_A", "agent1", "2024-01-01 09:00:00", 10.0),
            record("Camp_A", "agent2", "2024-01-01 10:00:00", 20.0),
            record("Camp_A", "agent3", "2024-01-01 11:00:00", 30.0),
            record("Camp_A", "agent4", "2024-01-02 09:30:00", 5.0),
            record("Camp_A", "agent4", "2024-01-03 09:00:00", 40.0),
            record("Camp_A", "agent5", "2024-01-03 14:00:00", 50.0),
        ]
    }

    fn seeded_engine() -> (tempfile::TempDir, QueryEngine) {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalPartitionCache::new(dir.path()).unwrap();
        commit_partitions(&cache, scenario_records()).unwrap();
        (dir, QueryEngine::new(cache))
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn campaigns(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_overall_stats_scenario() {
        let (_dir, engine) = seeded_engine();

        // agent4 is contacted on two days; only its fastest call counts,
        // so the observations are [10, 20, 30, 5, 50].
        let stats = engine
            .overall_stats(
                date("2024-01-01"),
                date("2024-01-03"),
                &campaigns(&["Camp_A"]),
                &[50u8].into_iter().collect(),
            )
            .await
            .unwrap();

        assert_eq!(stats.call_count, 5);
        assert_eq!(stats.avg_dial_speed, 23);
        assert_eq!(stats.percentiles[0].value, 20);
    }

    #[tokio::test]
    async fn test_grouped_by_date_sorts_ascending() {
        let (_dir, engine) = seeded_engine();

        let request = QueryRequest {
            start: date("2024-01-01"),
            end: date("2024-01-03"),
            campaigns: campaigns(&["Camp_A"]),
            group_by: vec![GroupDim::Date],
            percentiles: [95u8, 90, 85].into_iter().collect(),
        };
        let result = engine.grouped_summary(&request).await.unwrap();

        assert_eq!(result.dims, vec!["Date"]);
        let dates: Vec<&GroupValue> = result.rows.iter().map(|r| &r.group[0]).collect();
        assert_eq!(
            dates,
            vec![
                &GroupValue::Text("2024-01-01".to_string()),
                &GroupValue::Text("2024-01-02".to_string()),
                &GroupValue::Text("2024-01-03".to_string()),
            ]
        );

        let day1 = &result.rows[0].stats;
        assert_eq!(day1.call_count, 3);
        assert_eq!(day1.avg_dial_speed, 20);
        // P95 >= P90 >= P85 for the same grouping
        assert!(day1.percentiles[0].value >= day1.percentiles[1].value);
        assert!(day1.percentiles[1].value >= day1.percentiles[2].value);
    }

    #[tokio::test]
    async fn test_cross_tab_sorts_date_desc_hour_asc() {
        let (_dir, engine) = seeded_engine();

        let request = QueryRequest {
            start: date("2024-01-01"),
            end: date("2024-01-03"),
            campaigns: campaigns(&["Camp_A"]),
            group_by: vec![GroupDim::Date, GroupDim::HourInterval, GroupDim::Campaign],
            percentiles: [90u8].into_iter().collect(),
        };
        let result = engine.grouped_summary(&request).await.unwrap();

        assert_eq!(result.rows.len(), 6);
        assert_eq!(result.rows[0].group[0], GroupValue::Text("2024-01-03".to_string()));
        assert_eq!(result.rows[0].group[1], GroupValue::Int(9));
        assert_eq!(result.rows[1].group[1], GroupValue::Int(14));
        assert_eq!(
            result.rows.last().unwrap().group[0],
            GroupValue::Text("2024-01-01".to_string())
        );
    }

    #[tokio::test]
    async fn test_weekly_rollup_folds_min_per_key() {
        let (_dir, engine) = seeded_engine();

        // All three days fall in the week starting Monday 2024-01-01.
        let result = engine
            .weekly_summary(
                date("2024-01-01"),
                date("2024-01-03"),
                &campaigns(&["Camp_A"]),
                &[50u8].into_iter().collect(),
            )
            .await
            .unwrap();

        assert_eq!(result.rows.len(), 1);
        let row = &result.rows[0];
        assert_eq!(row.group[0], GroupValue::Text("2024-01-01".to_string()));
        assert_eq!(row.group[1], GroupValue::Text("Camp_A".to_string()));
        assert_eq!(row.stats.call_count, 5);
    }

    #[tokio::test]
    async fn test_empty_selection_yields_empty_result() {
        let (_dir, engine) = seeded_engine();

        let request = QueryRequest {
            start: date("2024-01-01"),
            end: date("2024-01-03"),
            campaigns: BTreeSet::new(),
            group_by: vec![GroupDim::Campaign],
            percentiles: [90u8].into_iter().collect(),
        };
        assert!(engine.grouped_summary(&request).await.unwrap().rows.is_empty());

        let request = QueryRequest {
            group_by: Vec::new(),
            campaigns: campaigns(&["Camp_A"]),
            ..request
        };
        assert!(engine.grouped_summary(&request).await.unwrap().rows.is_empty());

        let stats = engine
            .overall_stats(
                date("2024-01-01"),
                date("2024-01-03"),
                &BTreeSet::new(),
                &[90u8].into_iter().collect(),
            )
            .await
            .unwrap();
        assert_eq!(stats.call_count, 0);
    }

    #[tokio::test]
    async fn test_faults_degrade_instead_of_propagating() {
        // No partition files at all: the scan cannot even be registered.
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalPartitionCache::new(dir.path()).unwrap();
        let engine = QueryEngine::new(cache);

        let request = QueryRequest {
            start: date("2024-01-01"),
            end: date("2024-01-03"),
            campaigns: campaigns(&["Camp_A"]),
            group_by: vec![GroupDim::Campaign],
            percentiles: [90u8].into_iter().collect(),
        };
        assert!(engine.grouped_summary(&request).await.unwrap().rows.is_empty());

        let stats = engine
            .overall_stats(
                date("2024-01-01"),
                date("2024-01-03"),
                &campaigns(&["Camp_A"]),
                &[90u8].into_iter().collect(),
            )
            .await
            .unwrap();
        assert_eq!(stats.call_count, 0);
        assert!(engine.list_known_campaigns().await.is_empty());
    }

    #[tokio::test]
    async fn test_campaign_allow_list() {
        let (_dir, engine) = seeded_engine();

        let result = engine
            .overall_stats(
                date("2024-01-01"),
                date("2024-01-03"),
                &campaigns(&["Camp_A'; DROP TABLE calls --"]),
                &[90u8].into_iter().collect(),
            )
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_list_known_campaigns() {
        let (_dir, engine) = seeded_engine();
        assert_eq!(engine.list_known_campaigns().await, vec!["Camp_A".to_string()]);
    }

    #[tokio::test]
    async fn test_result_cache_invalidation() {
        let (dir, engine) = seeded_engine();
        let ps: BTreeSet<u8> = [50u8].into_iter().collect();

        let first = engine
            .overall_stats(date("2024-01-01"), date("2024-01-03"), &campaigns(&["Camp_A"]), &ps)
            .await
            .unwrap();
        assert_eq!(first.call_count, 5);

        // New data lands in an existing partition.
        let cache = LocalPartitionCache::new(dir.path()).unwrap();
        commit_partitions(
            &cache,
            vec![record("Camp_A", "agent9", "2024-01-02 12:00:00", 100.0)],
        )
        .unwrap();

        // Until invalidation the cached shape is served.
        let stale = engine
            .overall_stats(date("2024-01-01"), date("2024-01-03"), &campaigns(&["Camp_A"]), &ps)
            .await
            .unwrap();
        assert_eq!(stale.call_count, 5);

        engine.invalidate_results();
        let fresh = engine
            .overall_stats(date("2024-01-01"), date("2024-01-03"), &campaigns(&["Camp_A"]), &ps)
            .await
            .unwrap();
        assert_eq!(fresh.call_count, 6);
    }
}
