//! Content view endpoints (articles, projects, pages)

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::analytics::models::{ContentBucket, ContentType, NewContentView, Period};
use crate::api::client::ClientMeta;
use crate::api::handlers::{json_body, non_empty, query_params, AppState};
use crate::api::response::{ApiResponse, ApiResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackContentRequest {
    #[serde(default)]
    pub content_id: String,
    #[serde(default)]
    pub content_type: String,
    pub visitor_id: Option<String>,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentQuery {
    #[serde(default)]
    pub content_id: String,
    #[serde(default)]
    pub content_type: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentHistoryQuery {
    #[serde(default)]
    pub content_id: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub period: String,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ContentCount {
    pub count: i64,
}

pub async fn track_content_view(
    State(state): State<Arc<AppState>>,
    client: ClientMeta,
    body: Result<Json<TrackContentRequest>, JsonRejection>,
) -> ApiResult<()> {
    let payload = json_body(body)?;

    state
        .analytics
        .ingestor
        .track_content(NewContentView {
            content_id: payload.content_id.trim().to_string(),
            content_type: ContentType::parse_lossy(&payload.content_type),
            visitor_id: non_empty(payload.visitor_id),
            user_agent: non_empty(payload.user_agent).or(client.user_agent),
            referrer: non_empty(payload.referrer).or(client.referrer),
            ip: client.ip,
        })
        .await?;

    Ok(Json(ApiResponse::ok_with_message((), "View tracked")))
}

pub async fn content_view_count(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ContentQuery>, QueryRejection>,
) -> ApiResult<ContentCount> {
    let query = query_params(query)?;

    let count = state
        .analytics
        .series
        .content_count(
            ContentType::parse_lossy(&query.content_type),
            query.content_id.trim(),
        )
        .await?;

    Ok(Json(ApiResponse::ok(ContentCount { count })))
}

pub async fn content_view_history(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ContentHistoryQuery>, QueryRejection>,
) -> ApiResult<Vec<ContentBucket>> {
    let query = query_params(query)?;

    let buckets = state
        .analytics
        .series
        .content_series(
            ContentType::parse_lossy(&query.content_type),
            query.content_id.trim(),
            Period::parse_lossy(&query.period),
            query.limit,
        )
        .await?;

    Ok(Json(ApiResponse::ok(buckets)))
}
