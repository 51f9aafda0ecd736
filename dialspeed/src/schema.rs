use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use chrono::{NaiveDate, NaiveDateTime};

/// Input columns the upstream dialer export must carry, exact names.
/// This is an external contract with the data producers; it is validated,
/// never inferred.
pub const REQUIRED_INPUT_COLUMNS: [&str; 6] = [
    "CAMPAIGNNAME",
    "Level1",
    "CallStartdate",
    "Insert_Dt",
    "attempt",
    "CallStatus",
];

/// Hive partition column carried by the directory name, not the file.
pub const PARTITION_COLUMN: &str = "Date";

/// Directory naming for one calendar day of data, identical on both tiers.
pub fn partition_name(date: NaiveDate) -> String {
    format!("Date={}", date.format("%Y-%m-%d"))
}

/// Parses a `Date=YYYY-MM-DD` directory name back into a date.
pub fn parse_partition_name(name: &str) -> Option<NaiveDate> {
    let date = name.strip_prefix("Date=")?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// One validated, enriched call row in the canonical schema. Only rows with
/// `attempt == 1` and `status == "Connected"` survive ingestion, so those
/// fields are invariant in practice but kept for auditability.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    pub campaign: String,
    pub level1: String,
    pub call_start: NaiveDateTime,
    pub insert_time: NaiveDateTime,
    pub attempt: i64,
    pub status: String,
    pub dial_speed_seconds: f64,
    pub hour_interval: u32,
}

impl CallRecord {
    /// The partition this record belongs to.
    pub fn partition_date(&self) -> NaiveDate {
        self.insert_time.date()
    }
}

/// Canonical columnar schema of one partition file.
pub fn call_record_schema() -> Schema {
    Schema::new(vec![
        Field::new("campaign", DataType::Utf8, false),
        Field::new("level1", DataType::Utf8, false),
        Field::new(
            "call_start",
            DataType::Timestamp(TimeUnit::Millisecond, None),
            false,
        ),
        Field::new(
            "insert_time",
            DataType::Timestamp(TimeUnit::Millisecond, None),
            false,
        ),
        Field::new("attempt", DataType::Int64, false),
        Field::new("status", DataType::Utf8, false),
        Field::new("dial_speed_seconds", DataType::Float64, false),
        Field::new("hour_interval", DataType::Int32, false),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_name_round_trip() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();
        let name = partition_name(date);
        assert_eq!(name, "Date=2024-01-03");
        assert_eq!(parse_partition_name(&name), Some(date));
    }

    #[test]
    fn test_parse_partition_name_rejects_noise() {
        assert_eq!(parse_partition_name("2024-01-03"), None);
        assert_eq!(parse_partition_name("Date=yesterday"), None);
        assert_eq!(parse_partition_name(".tmp"), None);
    }
}
