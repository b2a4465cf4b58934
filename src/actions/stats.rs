use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::actions::{DataResponse, json_error};
use crate::stats::StatsService;
use crate::web::AppState;

#[derive(Debug, Deserialize)]
pub struct StatsParams {
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
}

/// GET /stats?from_date=YYYY-MM-DD&to_date=YYYY-MM-DD
/// Per-day totals for the range, merged across the hot and cold tiers.
/// Days without data are omitted from the response.
pub async fn get_stats(
    Query(params): Query<StatsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    metrics::counter!("stats.api.requests_total").increment(1);

    if params.from_date > params.to_date {
        return json_error(StatusCode::BAD_REQUEST, "from_date must be <= to_date")
            .into_response();
    }

    let service = StatsService::new(state.redis.clone(), state.mongo.clone());

    match service.get_range(params.from_date, params.to_date).await {
        Ok(data) => (StatusCode::OK, Json(DataResponse { data })).into_response(),
        Err(e) => {
            metrics::counter!("stats.api.errors_total").increment(1);
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("Failed to query stats: {}", e),
            )
            .into_response()
        }
    }
}
