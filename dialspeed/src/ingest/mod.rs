use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Seek};
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, Float64Builder, Int32Builder, Int64Builder, StringArray, StringBuilder,
    TimestampMillisecondBuilder,
};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use chrono::{NaiveDate, NaiveDateTime, Timelike, Utc};
use common::{Error, Result};
use parquet::arrow::ArrowWriter;
use tracing::info;

use crate::cache::LocalPartitionCache;
use crate::schema::{CallRecord, REQUIRED_INPUT_COLUMNS, call_record_schema};

const CONNECTED_STATUS: &str = "Connected";

/// Timestamp formats the upstream dialer exports use, day-first first.
/// ISO variants cover columns the CSV reader already typed as timestamps.
const TIMESTAMP_FORMATS: [&str; 8] = [
    "%d-%m-%Y %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%d-%m-%Y %H:%M",
    "%d/%m/%Y %H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

fn parse_attempt(raw: &str) -> i64 {
    let raw = raw.trim();
    raw.parse::<i64>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().map(|v| v as i64))
        .unwrap_or(0)
}

/// Validates and filters one raw input table into canonical call records.
///
/// The required columns are an external contract and checked by exact name;
/// a missing column fails the whole file with a schema error naming it.
/// Row-level problems (empty grouping key, later attempts, non-connected
/// status, unparsable timestamps) drop the row, never the file. An empty
/// output is valid.
pub fn parse_and_filter(batch: &RecordBatch) -> Result<Vec<CallRecord>> {
    let schema = batch.schema();
    let missing: Vec<&str> = REQUIRED_INPUT_COLUMNS
        .iter()
        .copied()
        .filter(|name| schema.index_of(name).is_err())
        .collect();
    if !missing.is_empty() {
        return Err(Error::missing_columns(&missing));
    }

    // Work on everything as strings; inputs arrive with whatever types the
    // reader inferred and the contract is textual.
    let col = |name: &str| -> Result<StringArray> {
        let array = batch.column(schema.index_of(name)?);
        let utf8 = cast(array, &DataType::Utf8)?;
        Ok(utf8
            .as_any()
            .downcast_ref::<StringArray>()
            .cloned()
            .ok_or_else(|| Error::Other(format!("Column {} did not cast to Utf8", name)))?)
    };

    let campaigns = col("CAMPAIGNNAME")?;
    let level1s = col("Level1")?;
    let call_starts = col("CallStartdate")?;
    let insert_times = col("Insert_Dt")?;
    let attempts = col("attempt")?;
    let statuses = col("CallStatus")?;

    let mut records = Vec::new();
    for row in 0..batch.num_rows() {
        if level1s.is_null(row) {
            continue;
        }
        let level1 = level1s.value(row).trim();
        if level1.is_empty() {
            continue;
        }

        let attempt = if attempts.is_null(row) {
            0
        } else {
            parse_attempt(attempts.value(row))
        };
        let status = if statuses.is_null(row) {
            ""
        } else {
            statuses.value(row).trim()
        };
        if attempt != 1 || status != CONNECTED_STATUS {
            continue;
        }

        if call_starts.is_null(row) || insert_times.is_null(row) {
            continue;
        }
        let (Some(call_start), Some(insert_time)) = (
            parse_timestamp(call_starts.value(row)),
            parse_timestamp(insert_times.value(row)),
        ) else {
            continue;
        };

        let dial_speed_seconds =
            (call_start - insert_time).num_milliseconds().abs() as f64 / 1000.0;

        records.push(CallRecord {
            campaign: if campaigns.is_null(row) {
                String::new()
            } else {
                campaigns.value(row).trim().to_string()
            },
            level1: level1.to_string(),
            call_start,
            insert_time,
            attempt,
            status: status.to_string(),
            dial_speed_seconds,
            hour_interval: insert_time.hour(),
        });
    }

    Ok(records)
}

/// Converts canonical records into one arrow batch in partition-file order.
pub fn records_to_batch(records: &[CallRecord]) -> Result<RecordBatch> {
    let mut campaign = StringBuilder::new();
    let mut level1 = StringBuilder::new();
    let mut call_start = TimestampMillisecondBuilder::new();
    let mut insert_time = TimestampMillisecondBuilder::new();
    let mut attempt = Int64Builder::new();
    let mut status = StringBuilder::new();
    let mut dial_speed = Float64Builder::new();
    let mut hour = Int32Builder::new();

    for record in records {
        campaign.append_value(&record.campaign);
        level1.append_value(&record.level1);
        call_start.append_value(record.call_start.and_utc().timestamp_millis());
        insert_time.append_value(record.insert_time.and_utc().timestamp_millis());
        attempt.append_value(record.attempt);
        status.append_value(&record.status);
        dial_speed.append_value(record.dial_speed_seconds);
        hour.append_value(record.hour_interval as i32);
    }

    let columns: Vec<ArrayRef> = vec![
        Arc::new(campaign.finish()),
        Arc::new(level1.finish()),
        Arc::new(call_start.finish()),
        Arc::new(insert_time.finish()),
        Arc::new(attempt.finish()),
        Arc::new(status.finish()),
        Arc::new(dial_speed.finish()),
        Arc::new(hour.finish()),
    ];

    Ok(RecordBatch::try_new(
        Arc::new(call_record_schema()),
        columns,
    )?)
}

/// Writes validated records into their date partitions, one new immutable
/// parquet file per touched partition. Returns the set of dates touched —
/// the input to the upload step and to query-cache invalidation.
///
/// File names embed timestamp, sequence, and a random suffix so concurrent
/// imports into the same partition cannot collide.
pub fn commit_partitions(
    cache: &LocalPartitionCache,
    records: Vec<CallRecord>,
) -> Result<BTreeSet<NaiveDate>> {
    let mut by_date: BTreeMap<NaiveDate, Vec<CallRecord>> = BTreeMap::new();
    for record in records {
        by_date.entry(record.partition_date()).or_default().push(record);
    }

    let mut touched = BTreeSet::new();
    for (date, group) in by_date {
        let dir = cache.partition_dir(date);
        std::fs::create_dir_all(&dir)?;

        let seq = cache.partition_files(date).len() + 1;
        let name = format!(
            "import_{}_{}_{:08x}.parquet",
            Utc::now().timestamp(),
            seq,
            rand::random::<u32>()
        );

        let batch = records_to_batch(&group)?;
        let file = std::fs::File::create(dir.join(&name))?;
        let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
        writer.write(&batch)?;
        writer.close()?;

        info!(rows = batch.num_rows(), file = %name, date = %date, "Committed partition file");
        touched.insert(date);
    }

    Ok(touched)
}

/// Reads CSV input (header row required) into arrow batches, inferring the
/// column types. The ingest contract is validated afterwards by
/// [`parse_and_filter`].
pub fn read_csv_batches<R: Read + Seek>(mut reader: R) -> Result<Vec<RecordBatch>> {
    let format = arrow::csv::reader::Format::default().with_header(true);
    let (schema, _) = format
        .infer_schema(&mut reader, Some(1000))
        .map_err(|e| Error::InvalidInput(format!("Unreadable CSV input: {}", e)))?;
    reader.rewind()?;

    let csv = arrow::csv::ReaderBuilder::new(Arc::new(schema))
        .with_format(format)
        .build(reader)?;
    let batches = csv.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    fn input_batch(rows: &[[&str; 6]]) -> RecordBatch {
        let column = |idx: usize| -> ArrayRef {
            Arc::new(StringArray::from(
                rows.iter().map(|r| r[idx].to_string()).collect::<Vec<_>>(),
            ))
        };
        let schema = arrow::datatypes::Schema::new(
            REQUIRED_INPUT_COLUMNS
                .iter()
                .map(|name| arrow::datatypes::Field::new(*name, DataType::Utf8, true))
                .collect::<Vec<_>>(),
        );
        RecordBatch::try_new(
            Arc::new(schema),
            (0..6).map(column).collect::<Vec<_>>(),
        )
        .unwrap()
    }

    #[test]
    fn test_missing_columns_named_in_error() {
        let schema = arrow::datatypes::Schema::new(vec![
            arrow::datatypes::Field::new("CAMPAIGNNAME", DataType::Utf8, true),
            arrow::datatypes::Field::new("Level1", DataType::Utf8, true),
        ]);
        let batch = RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(StringArray::from(vec!["A"])) as ArrayRef,
                Arc::new(StringArray::from(vec!["x"])) as ArrayRef,
            ],
        )
        .unwrap();

        let err = parse_and_filter(&batch).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("CallStartdate"));
        assert!(message.contains("Insert_Dt"));
        assert!(message.contains("attempt"));
        assert!(message.contains("CallStatus"));
        assert!(!message.contains("Level1,"));
    }

    #[test]
    fn test_filters_and_derived_fields() {
        let batch = input_batch(&[
            // kept: first connected attempt, 65s dial speed at hour 10
            ["Camp_A", "agent1", "14-03-2024 10:01:05", "14-03-2024 10:00:00", "1", "Connected"],
            // dropped: second attempt
            ["Camp_A", "agent2", "14-03-2024 10:02:00", "14-03-2024 10:00:00", "2", "Connected"],
            // dropped: not connected
            ["Camp_A", "agent3", "14-03-2024 10:02:00", "14-03-2024 10:00:00", "1", "Dropped"],
            // dropped: empty grouping key
            ["Camp_A", "  ", "14-03-2024 10:02:00", "14-03-2024 10:00:00", "1", "Connected"],
            // dropped: unparsable timestamp
            ["Camp_A", "agent5", "not a time", "14-03-2024 10:00:00", "1", "Connected"],
            // kept: call logged before insert, speed is absolute
            ["Camp_B", "agent6", "14-03-2024 21:59:30", "14-03-2024 22:00:00", "1", "Connected"],
            // dropped: non-numeric attempt coerces to 0
            ["Camp_A", "agent7", "14-03-2024 10:02:00", "14-03-2024 10:00:00", "x", "Connected"],
        ]);

        let records = parse_and_filter(&batch).unwrap();
        assert_eq!(records.len(), 2);
        for record in &records {
            assert_eq!(record.attempt, 1);
            assert_eq!(record.status, "Connected");
            assert!(!record.level1.is_empty());
            assert!(record.dial_speed_seconds >= 0.0);
        }

        assert_eq!(records[0].dial_speed_seconds, 65.0);
        assert_eq!(records[0].hour_interval, 10);
        assert_eq!(records[1].dial_speed_seconds, 30.0);
        assert_eq!(records[1].hour_interval, 22);
    }

    #[test]
    fn test_empty_result_is_valid() {
        let batch = input_batch(&[[
            "Camp_A", "agent1", "14-03-2024 10:01:05", "14-03-2024 10:00:00", "3", "Connected",
        ]]);
        assert!(parse_and_filter(&batch).unwrap().is_empty());
    }

    #[test]
    fn test_commit_groups_by_insert_date() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalPartitionCache::new(dir.path()).unwrap();

        let batch = input_batch(&[
            ["Camp_A", "a1", "14-03-2024 10:01:00", "14-03-2024 10:00:00", "1", "Connected"],
            ["Camp_A", "a2", "15-03-2024 09:01:00", "15-03-2024 09:00:00", "1", "Connected"],
            ["Camp_A", "a3", "14-03-2024 11:01:00", "14-03-2024 11:00:00", "1", "Connected"],
        ]);
        let records = parse_and_filter(&batch).unwrap();
        let touched = commit_partitions(&cache, records).unwrap();

        let d1 = NaiveDate::from_ymd_opt(2024, 3, 14).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(touched, [d1, d2].into_iter().collect());
        assert!(cache.is_present(d1));
        assert!(cache.is_present(d2));

        // Partition files are immutable; a second import adds a new file.
        let batch2 = input_batch(&[[
            "Camp_B", "b1", "14-03-2024 12:01:00", "14-03-2024 12:00:00", "1", "Connected",
        ]]);
        commit_partitions(&cache, parse_and_filter(&batch2).unwrap()).unwrap();
        assert_eq!(cache.partition_files(d1).len(), 2);

        // Files must round-trip through the parquet reader.
        let file = std::fs::File::open(&cache.partition_files(d1)[0]).unwrap();
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .unwrap()
            .build()
            .unwrap();
        let rows: usize = reader.map(|b| b.unwrap().num_rows()).sum();
        assert_eq!(rows, 2);
    }

    #[test]
    fn test_read_csv_batches() {
        let csv = "\
CAMPAIGNNAME,Level1,CallStartdate,Insert_Dt,attempt,CallStatus
Camp_A,agent1,14-03-2024 10:01:05,14-03-2024 10:00:00,1,Connected
Camp_A,agent2,14-03-2024 10:03:00,14-03-2024 10:02:00,2,Dropped
";
        let batches = read_csv_batches(std::io::Cursor::new(csv.as_bytes())).unwrap();
        let records: Vec<CallRecord> = batches
            .iter()
            .map(|b| parse_and_filter(b).unwrap())
            .collect::<Vec<_>>()
            .concat();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].campaign, "Camp_A");
        assert_eq!(records[0].dial_speed_seconds, 65.0);
    }
}
