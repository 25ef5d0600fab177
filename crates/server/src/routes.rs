use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use tessera_core::{
    computed_subtotal, AuditEntry, EngineError, MatchCandidate, Money, VendorBill,
    VendorBillLine, VendorSkuAlias,
};
use tessera_engine::{IngestOutcome, ParsedBill, PostingReceipt, Reconciler};

pub type AppState = Arc<Reconciler>;

pub fn router(engine: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/bills", post(ingest_bill).get(list_bills))
        .route("/bills/{id}", get(get_bill))
        .route("/bills/{id}/audit", get(get_audit))
        .route("/bills/{id}/lines/{line_no}/suggestions", get(get_suggestions))
        .route("/bills/{id}/lines/{line_no}/match", put(put_match))
        .route("/bills/{id}/lines/{line_no}/alias", post(create_alias))
        .route("/bills/{id}/accept-high-confidence", post(accept_high_confidence))
        .route("/bills/{id}/post", post(post_bill))
        .route("/bills/{id}/reopen", post(reopen_bill))
        .route("/bills/{id}/void", post(void_bill))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(2 * 1024 * 1024))
        .with_state(engine)
}

/// Engine failures mapped onto HTTP. The body always carries the retry hint
/// and the blamed line numbers so a client can highlight the exact rows.
struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
            EngineError::InvalidState { .. }
            | EngineError::UnmatchedLines(_)
            | EngineError::AlreadyPosted(_)
            | EngineError::Conflict { .. } => StatusCode::CONFLICT,
            EngineError::Collaborator { .. } => StatusCode::BAD_GATEWAY,
            EngineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({
            "error": self.0.to_string(),
            "retryable": self.0.is_retryable(),
            "lines": self.0.blamed_lines(),
        });
        (status, Json(body)).into_response()
    }
}

/// Reviewer identity from the `x-actor` header; auth proper lives upstream.
fn actor(headers: &HeaderMap) -> String {
    headers
        .get("x-actor")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("system")
        .to_string()
}

async fn health() -> &'static str {
    "ok"
}

async fn ingest_bill(
    State(engine): State<AppState>,
    headers: HeaderMap,
    Json(parsed): Json<ParsedBill>,
) -> Result<(StatusCode, Json<IngestOutcome>), ApiError> {
    let actor = actor(&headers);
    let out = engine.ingest(parsed, &actor).await?;
    let status = if out.duplicate {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(out)))
}

#[derive(Deserialize)]
struct ListQuery {
    store_id: i64,
}

async fn list_bills(
    State(engine): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<VendorBill>>, ApiError> {
    Ok(Json(engine.bills(q.store_id).await?))
}

#[derive(Serialize)]
struct BillView {
    bill: VendorBill,
    lines: Vec<VendorBillLine>,
    computed_subtotal: Money,
    /// Printed extension minus recomputed one, per line that printed one.
    price_gaps: Vec<PriceGap>,
}

#[derive(Serialize)]
struct PriceGap {
    line_no: i64,
    gap: Money,
}

async fn get_bill(
    State(engine): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<BillView>, ApiError> {
    let (bill, lines) = engine.bill(id).await?;
    let price_gaps = lines
        .iter()
        .filter_map(|l| {
            l.price_discrepancy().map(|gap| PriceGap {
                line_no: l.line_no,
                gap,
            })
        })
        .filter(|g| !g.gap.is_zero())
        .collect();
    Ok(Json(BillView {
        computed_subtotal: computed_subtotal(&lines),
        price_gaps,
        bill,
        lines,
    }))
}

async fn get_audit(
    State(engine): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<AuditEntry>>, ApiError> {
    Ok(Json(engine.audit_log(id).await?))
}

#[derive(Deserialize)]
struct SuggestQuery {
    limit: Option<usize>,
}

async fn get_suggestions(
    State(engine): State<AppState>,
    Path((id, line_no)): Path<(i64, i64)>,
    Query(q): Query<SuggestQuery>,
) -> Result<Json<Vec<MatchCandidate>>, ApiError> {
    Ok(Json(engine.suggest(id, line_no, q.limit).await?))
}

#[derive(Deserialize)]
struct MatchBody {
    internal_sku: String,
}

async fn put_match(
    State(engine): State<AppState>,
    Path((id, line_no)): Path<(i64, i64)>,
    headers: HeaderMap,
    Json(body): Json<MatchBody>,
) -> Result<Json<VendorBillLine>, ApiError> {
    let actor = actor(&headers);
    let line = engine
        .update_match(id, line_no, &body.internal_sku, &actor)
        .await?;
    Ok(Json(line))
}

async fn create_alias(
    State(engine): State<AppState>,
    Path((id, line_no)): Path<(i64, i64)>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<VendorSkuAlias>), ApiError> {
    let actor = actor(&headers);
    let alias = engine.create_alias(id, line_no, &actor).await?;
    Ok((StatusCode::CREATED, Json(alias)))
}

async fn accept_high_confidence(
    State(engine): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let actor = actor(&headers);
    let accepted = engine.accept_high_confidence(id, &actor).await?;
    Ok(Json(json!({ "accepted": accepted })))
}

async fn post_bill(
    State(engine): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<PostingReceipt>, ApiError> {
    let actor = actor(&headers);
    Ok(Json(engine.post(id, &actor).await?))
}

#[derive(Deserialize, Default)]
struct ReasonBody {
    #[serde(default)]
    reason: Option<String>,
}

async fn reopen_bill(
    State(engine): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    body: Option<Json<ReasonBody>>,
) -> Result<Json<VendorBill>, ApiError> {
    let actor = actor(&headers);
    let reason = body.and_then(|Json(b)| b.reason);
    Ok(Json(engine.reopen(id, reason.as_deref(), &actor).await?))
}

async fn void_bill(
    State(engine): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    body: Option<Json<ReasonBody>>,
) -> Result<Json<VendorBill>, ApiError> {
    let actor = actor(&headers);
    let reason = body.and_then(|Json(b)| b.reason);
    Ok(Json(engine.void(id, reason.as_deref(), &actor).await?))
}
