use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::analytics::models::{Aggregate, NewViewEvent, SeriesPoint, StatsFilter};
use crate::analytics::series::parse_instant;
use crate::analytics::{Analytics, IngestOutcome};
use crate::api::client::ClientMeta;
use crate::api::response::{ApiResponse, ApiResult};
use crate::config::WebSocketConfig;
use crate::error::AnalyticsError;

pub struct AppState {
    pub analytics: Analytics,
    pub websocket: WebSocketConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackRequest {
    #[serde(default)]
    pub page: String,
    pub visitor_id: Option<String>,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub session_id: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsQuery {
    pub page: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesQuery {
    pub page: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub interval: Option<String>,
}

#[derive(Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
}

pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, AnalyticsError> {
    body.map(|Json(payload)| payload)
        .map_err(|e| AnalyticsError::Invalid(e.body_text()))
}

pub(crate) fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, AnalyticsError> {
    query
        .map(|Query(params)| params)
        .map_err(|e| AnalyticsError::Invalid(e.body_text()))
}

pub async fn health_check() -> Json<ApiResponse<HealthStatus>> {
    Json(ApiResponse::ok(HealthStatus { status: "ok" }))
}

/// Record a page view and return the page's aggregate
pub async fn track_view(
    State(state): State<Arc<AppState>>,
    client: ClientMeta,
    body: Result<Json<TrackRequest>, JsonRejection>,
) -> ApiResult<Aggregate> {
    let payload = json_body(body)?;

    let result = state
        .analytics
        .ingestor
        .ingest(NewViewEvent {
            page: payload.page,
            visitor_id: non_empty(payload.visitor_id),
            user_agent: non_empty(payload.user_agent).or(client.user_agent),
            referrer: non_empty(payload.referrer).or(client.referrer),
            ip: client.ip,
            country: non_empty(payload.country),
            city: non_empty(payload.city),
            session_id: non_empty(payload.session_id),
        })
        .await?;

    let message = match result.outcome {
        IngestOutcome::Recorded => "View recorded",
        IngestOutcome::Bot => "Bot traffic ignored",
        IngestOutcome::Duplicate => "Duplicate view ignored",
    };
    Ok(Json(ApiResponse::ok_with_message(result.aggregate, message)))
}

/// Unfiltered statistics for one page, or all pages
pub async fn page_views(
    State(state): State<Arc<AppState>>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> ApiResult<Aggregate> {
    let query = query_params(query)?;
    let page = non_empty(query.page);
    let aggregate = state.analytics.aggregator.get_stats(page.as_deref()).await?;
    Ok(Json(ApiResponse::ok(aggregate)))
}

/// Statistics with optional date range and country filters
pub async fn filtered_stats(
    State(state): State<Arc<AppState>>,
    query: Result<Query<StatsQuery>, QueryRejection>,
) -> ApiResult<Aggregate> {
    let query = query_params(query)?;

    let filter = StatsFilter {
        page: non_empty(query.page),
        start: non_empty(query.start_date)
            .map(|v| parse_instant("startDate", &v))
            .transpose()?,
        end: non_empty(query.end_date)
            .map(|v| parse_instant("endDate", &v))
            .transpose()?,
        country: non_empty(query.country),
    };

    let aggregate = state.analytics.aggregator.get_stats_filtered(&filter).await?;
    Ok(Json(ApiResponse::ok(aggregate)))
}

/// Hourly or daily view counts over `[startDate, endDate]`
pub async fn view_series(
    State(state): State<Arc<AppState>>,
    query: Result<Query<SeriesQuery>, QueryRejection>,
) -> ApiResult<Vec<SeriesPoint>> {
    let query = query_params(query)?;
    let page = non_empty(query.page);

    let points = state
        .analytics
        .series
        .series(
            page.as_deref(),
            query.start_date.as_deref().unwrap_or_default(),
            query.end_date.as_deref().unwrap_or_default(),
            query.interval.as_deref().unwrap_or("day"),
        )
        .await?;

    Ok(Json(ApiResponse::ok(points)))
}
