// src/api.rs
//! Read-only HTTP surface over stored findings and trend analysis.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::metrics::Metrics;
use crate::model::{Finding, StatisticsRecord};
use crate::store::ContentStore;
use crate::trends::{AnalysisReport, KeywordInsight, TrendAnalyzer, TrendReport};

const MAX_DAYS: u32 = 366;

#[derive(Clone)]
pub struct AppState {
    pub store: ContentStore,
    pub analyzer: TrendAnalyzer,
    pub default_days: u32,
}

impl AppState {
    pub fn new(store: ContentStore, default_days: u32) -> Self {
        Self {
            analyzer: TrendAnalyzer::new(store.clone()),
            store,
            default_days,
        }
    }
}

pub fn router(state: AppState, metrics: &Metrics) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/trends", get(trends))
        .route("/api/report", get(report))
        .route("/api/keywords/{keyword}", get(keyword))
        .route("/api/findings/{date}", get(findings))
        .with_state(state)
        .merge(metrics.router())
}

#[derive(Debug, Deserialize)]
struct DaysQuery {
    days: Option<u32>,
}

impl DaysQuery {
    fn resolve(&self, default: u32) -> Result<u32, ApiError> {
        match self.days.unwrap_or(default) {
            0 => Err(ApiError::BadRequest("days must be at least 1".into())),
            d if d > MAX_DAYS => Err(ApiError::BadRequest(format!("days must be at most {MAX_DAYS}"))),
            d => Ok(d),
        }
    }
}

#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    NotFound(String),
    Store(StoreError),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Store(e)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, msg) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Store(e) => {
                tracing::error!(error = %e, "store read failed");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };
        (status, Json(ErrorBody { error: msg })).into_response()
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

async fn trends(State(st): State<AppState>, Query(q): Query<DaysQuery>) -> Result<Json<TrendReport>, ApiError> {
    let days = q.resolve(st.default_days)?;
    Ok(Json(st.analyzer.analyze_trends(today(), days).await?))
}

async fn report(State(st): State<AppState>, Query(q): Query<DaysQuery>) -> Result<Json<AnalysisReport>, ApiError> {
    let days = q.resolve(st.default_days)?;
    Ok(Json(st.analyzer.generate_report(today(), days).await?))
}

async fn keyword(
    State(st): State<AppState>,
    Path(keyword): Path<String>,
    Query(q): Query<DaysQuery>,
) -> Result<Json<KeywordInsight>, ApiError> {
    let days = q.resolve(st.default_days)?;
    Ok(Json(st.analyzer.keyword_insights(&keyword, today(), days).await?))
}

#[derive(Debug, Serialize)]
struct DayOut {
    date: NaiveDate,
    findings: Vec<Finding>,
    statistics: Option<StatisticsRecord>,
}

async fn findings(State(st): State<AppState>, Path(date): Path<String>) -> Result<Json<DayOut>, ApiError> {
    let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
        .map_err(|e| ApiError::BadRequest(format!("date `{date}`: {e}")))?;
    let Some(findings) = st.store.load_findings(date).await? else {
        return Err(ApiError::NotFound(format!("no record for {date}")));
    };
    let statistics = st.store.load_statistics(date).await?;
    Ok(Json(DayOut {
        date,
        findings,
        statistics,
    }))
}
