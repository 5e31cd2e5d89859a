use axum::{
    extract::{rejection::FormRejection, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;

use order_board_core::{csv::export_filename, LockOutcome, OrderFlag, OrderList, OrderSummary};

use crate::problem::ProblemResponse;
use crate::summary::{LockFlagLookup, OrderSummaryService};
use crate::telemetry;

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    service: OrderSummaryService,
}

impl AppState {
    pub fn new(metrics: PrometheusHandle, service: OrderSummaryService) -> Self {
        Self { metrics, service }
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn service(&self) -> &OrderSummaryService {
        &self.service
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/api/summary", get(summary))
        .route("/api/order-flag", get(order_flag))
        .route("/api/order-controls/:id/close", post(close_order_control))
        .route("/api/orders/list", get(order_list))
        .route("/api/orders/export", get(export_current))
        .route("/api/orders/export/history", post(export_history))
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

/// Query parameters shared by the board endpoints. Empty values count as absent.
#[derive(Debug, Default, Deserialize)]
struct ScopeQuery {
    #[serde(default)]
    center_id: Option<String>,
    #[serde(default)]
    location_id: Option<String>,
    #[serde(default)]
    order_control_id: Option<String>,
    #[serde(default)]
    group_size: Option<String>,
    #[serde(default)]
    product_name: Option<String>,
}

impl ScopeQuery {
    fn center_id(&self) -> Result<Option<i64>, ProblemResponse> {
        optional_number("center_id", self.center_id.as_deref())
    }

    fn location_id(&self) -> Result<Option<i64>, ProblemResponse> {
        optional_number("location_id", self.location_id.as_deref())
    }

    fn order_control_id(&self) -> Result<Option<i64>, ProblemResponse> {
        optional_number("order_control_id", self.order_control_id.as_deref())
    }
}

fn optional_number<T: std::str::FromStr>(
    name: &str,
    raw: Option<&str>,
) -> Result<Option<T>, ProblemResponse> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(None),
        Some(value) => value.parse().map(Some).map_err(|_| {
            ProblemResponse::new(
                StatusCode::BAD_REQUEST,
                "validation_error",
                format!("{name} must be numeric (got {value})"),
            )
        }),
    }
}

async fn summary(
    State(state): State<AppState>,
    Query(query): Query<ScopeQuery>,
) -> Result<Json<OrderSummary>, ProblemResponse> {
    let group_size = optional_number::<usize>("group_size", query.group_size.as_deref())?
        .unwrap_or_else(|| state.service().default_group_size());

    let summary = state
        .service()
        .get_summary(query.center_id()?, query.location_id()?, group_size)
        .await?;

    Ok(Json(summary))
}

async fn order_flag(
    State(state): State<AppState>,
    Query(query): Query<ScopeQuery>,
) -> Result<Json<LockFlagLookup>, ProblemResponse> {
    let lookup = state
        .service()
        .get_lock_flag(
            query.order_control_id()?,
            query.center_id()?,
            query.location_id()?,
        )
        .await?;

    Ok(Json(lookup))
}

async fn close_order_control(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<LockOutcome>, ProblemResponse> {
    let id = optional_number("order_control_id", Some(raw_id.as_str()))?.ok_or_else(|| {
        ProblemResponse::new(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "order_control_id is required",
        )
    })?;

    let outcome = state.service().toggle_lock(id).await?;
    Ok(Json(outcome))
}

async fn order_list(
    State(state): State<AppState>,
    Query(query): Query<ScopeQuery>,
) -> Result<Json<OrderList>, ProblemResponse> {
    let list = state
        .service()
        .get_order_list(
            query.product_name.as_deref(),
            query.center_id()?,
            query.location_id()?,
        )
        .await?;

    Ok(Json(list))
}

async fn export_current(
    State(state): State<AppState>,
    Query(query): Query<ScopeQuery>,
) -> Result<Response, ProblemResponse> {
    let center_id = query.center_id()?;
    let lookup = state
        .service()
        .get_lock_flag(query.order_control_id()?, center_id, query.location_id()?)
        .await?;

    if lookup.order_flag == Some(OrderFlag::Open) {
        counter!("csv_exports_total", "kind" => "current", "result" => "refused").increment(1);
        return Err(ProblemResponse::new(
            StatusCode::CONFLICT,
            "ordering_open",
            "close the ordering window before exporting",
        ));
    }

    let export = state
        .service()
        .export_current_csv(query.order_control_id.as_deref().unwrap_or_default())
        .await?;

    Ok(csv_response(
        export.csv,
        &export_filename(&export.business_date, center_id),
    ))
}

#[derive(Debug, Default, Deserialize)]
struct HistoryForm {
    #[serde(default)]
    date: Option<String>,
}

async fn export_history(
    State(state): State<AppState>,
    Query(query): Query<ScopeQuery>,
    form: Result<Form<HistoryForm>, FormRejection>,
) -> Result<Response, ProblemResponse> {
    let Form(form) = form.map_err(|rejection| {
        ProblemResponse::new(rejection.status(), "invalid_form", rejection.body_text())
    })?;
    let center_id = query.center_id()?;
    let export = state
        .service()
        .export_historical_csv(
            form.date.as_deref().unwrap_or_default(),
            center_id,
            query.location_id()?,
        )
        .await?;

    Ok(csv_response(
        export.csv,
        &export_filename(&export.business_date, center_id),
    ))
}

fn csv_response(body: String, filename: &str) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        body,
    )
        .into_response()
}
