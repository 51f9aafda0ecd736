use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State},
    routing::{delete, get, post},
};
use serde_json::json;

use crate::query::{GroupDim, QueryRequest};
use crate::services::{AppError, DialSpeedService};
use super::models::{ApiResponse, DeleteParams, StatsParams, SummaryParams};

fn parse_campaigns(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_group_by(raw: &str) -> Result<Vec<GroupDim>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| GroupDim::from_str(s).map_err(AppError::from))
        .collect()
}

fn parse_percentiles(
    raw: Option<&str>,
    service: &DialSpeedService,
) -> Result<BTreeSet<u8>, AppError> {
    let Some(raw) = raw else {
        return Ok(service.default_percentiles());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u8>()
                .map_err(|_| AppError::bad_request(format!("Not a percentile: {}", s)))
        })
        .collect()
}

pub async fn get_summary(
    State(service): State<Arc<DialSpeedService>>,
    Query(params): Query<SummaryParams>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let request = QueryRequest {
        start: params.start,
        end: params.end,
        campaigns: parse_campaigns(&params.campaigns),
        group_by: parse_group_by(&params.group_by)?,
        percentiles: parse_percentiles(params.percentiles.as_deref(), &service)?,
    };

    let outcome = service.grouped_summary(request).await?;
    Ok(Json(ApiResponse::success(json!({
        "dims": &outcome.result.dims,
        "rows": &outcome.result.rows,
        "sync_warnings": outcome.sync_warnings,
    }))))
}

pub async fn get_weekly(
    State(service): State<Arc<DialSpeedService>>,
    Query(params): Query<StatsParams>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let outcome = service
        .weekly_summary(
            params.start,
            params.end,
            parse_campaigns(&params.campaigns),
            parse_percentiles(params.percentiles.as_deref(), &service)?,
        )
        .await?;

    Ok(Json(ApiResponse::success(json!({
        "dims": &outcome.result.dims,
        "rows": &outcome.result.rows,
        "sync_warnings": outcome.sync_warnings,
    }))))
}

pub async fn get_stats(
    State(service): State<Arc<DialSpeedService>>,
    Query(params): Query<StatsParams>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let outcome = service
        .overall_stats(
            params.start,
            params.end,
            parse_campaigns(&params.campaigns),
            parse_percentiles(params.percentiles.as_deref(), &service)?,
        )
        .await?;

    Ok(Json(ApiResponse::success(json!({
        "stats": &*outcome.result,
        "sync_warnings": outcome.sync_warnings,
    }))))
}

pub async fn get_campaigns(
    State(service): State<Arc<DialSpeedService>>,
) -> Json<ApiResponse<Vec<String>>> {
    Json(ApiResponse::success(service.list_campaigns().await))
}

pub async fn import_csv(
    State(service): State<Arc<DialSpeedService>>,
    body: Bytes,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    if body.is_empty() {
        return Err(AppError::bad_request("Empty CSV body".into()));
    }

    let report = service.import_csv(&body).await?;
    Ok(Json(ApiResponse::success(json!({
        "rows_ingested": report.rows_ingested,
        "partitions": report
            .partitions
            .iter()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .collect::<Vec<_>>(),
        "files_uploaded": report.files_uploaded,
    }))))
}

pub async fn delete_partitions(
    State(service): State<Arc<DialSpeedService>>,
    Query(params): Query<DeleteParams>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    if params.end < params.start {
        return Err(AppError::bad_request("End date precedes start date".into()));
    }

    let removed = service.delete_range(params.start, params.end).await?;
    Ok(Json(ApiResponse::success(json!({
        "partitions_removed": removed,
    }))))
}

// Define all API routes
pub fn routes(service: Arc<DialSpeedService>) -> Router {
    Router::new()
        .route("/api/summary", get(get_summary))
        .route("/api/weekly", get(get_weekly))
        .route("/api/stats", get(get_stats))
        .route("/api/campaigns", get(get_campaigns))
        .route("/api/import", post(import_csv))
        .route("/api/partitions", delete(delete_partitions))
        .with_state(service)
}
