use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// Request models. List-valued parameters arrive comma separated,
// e.g. `campaigns=Camp_A,Camp_B&group_by=date,hour_interval`.
#[derive(Deserialize)]
pub struct SummaryParams {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub campaigns: String,
    pub group_by: String,
    pub percentiles: Option<String>,
}

#[derive(Deserialize)]
pub struct StatsParams {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub campaigns: String,
    pub percentiles: Option<String>,
}

#[derive(Deserialize)]
pub struct DeleteParams {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

// Response models
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}
