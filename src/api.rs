// 🌐 REST API
// Axum router over the normalization, extraction and analysis pipeline

use crate::analysis::{analyze_findings, AnalysisResult};
use crate::config::ForensicsConfig;
use crate::db::{FindingFilter, LedgerStore, TransactionFilter};
use crate::error::ForensicsError;
use crate::extractor::{extract_statement, ExtractionOptions, ExtractionResult, RowMergePattern};
use crate::loan_tracker::{
    suspected_loan_deposits, trace_case_funds, track_case_loan_usage, FundTraceOptions, LoanQuery,
    LoanUsage, SuspectedLoanDeposit, TraceDirection, TracingResult,
};
use crate::model::{Finding, FindingType, Row};
use crate::parser::{parse_statement_with, ParsedStatement};
use crate::schema::{ColumnAnalysis, ColumnAnalyzer};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub config: Arc<ForensicsConfig>,
}

impl AppState {
    pub fn new(conn: Connection, config: ForensicsConfig) -> Self {
        AppState {
            db: Arc::new(Mutex::new(conn)),
            config: Arc::new(config),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, ApiError> {
        self.db
            .lock()
            .map_err(|_| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "database lock poisoned"))
    }
}

/// API Response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: &str) -> Self {
        ApiError {
            status,
            message: message.to_string(),
        }
    }
}

impl From<ForensicsError> for ApiError {
    fn from(err: ForensicsError) -> Self {
        let status = match &err {
            ForensicsError::UnknownSchema
            | ForensicsError::MissingDateColumn(_)
            | ForensicsError::HeaderRowOutOfRange { .. }
            | ForensicsError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ForensicsError::TransactionWaitExceeded(_) => StatusCode::SERVICE_UNAVAILABLE,
            ForensicsError::TransactionTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            log::error!("Request failed: {}", err);
        }
        ApiError {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ApiResponse::<()>::err(self.message))).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementRequest {
    pub rows: Vec<Row>,
    pub header_row_index: usize,
    /// Upstream proposal used when no known schema matches
    #[serde(default)]
    pub column_analysis: Option<ColumnAnalysis>,
    #[serde(default)]
    pub merge: RowMergePattern,
}

impl StatementRequest {
    fn analyzer(&self) -> Option<&dyn ColumnAnalyzer> {
        self.column_analysis.as_ref().map(|a| a as &dyn ColumnAnalyzer)
    }
}

#[derive(Debug, Deserialize)]
pub struct FindingsQuery {
    #[serde(rename = "type")]
    pub finding_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoanUsageQuery {
    pub keyword: Option<String>,
    pub amount: Option<f64>,
    pub tolerance: Option<f64>,
    pub document_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FundTraceQuery {
    pub direction: TraceDirection,
    pub max_depth: Option<usize>,
    pub tolerance: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct SuspectsQuery {
    pub min_amount: Option<f64>,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/health
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// POST /api/normalize - parse without persisting
async fn normalize(Json(request): Json<StatementRequest>) -> ApiResult<ParsedStatement> {
    let parsed = parse_statement_with(&request.rows, request.header_row_index, request.analyzer())?;
    Ok(Json(ApiResponse::ok(parsed)))
}

/// POST /api/cases/:case_id/documents/:document_id/extract
async fn extract(
    State(state): State<AppState>,
    Path((case_id, document_id)): Path<(String, String)>,
    Json(request): Json<StatementRequest>,
) -> ApiResult<ExtractionResult> {
    let options = ExtractionOptions::from_config(&state.config.extraction).with_merge(request.merge);
    let mut conn = state.lock()?;
    let result = extract_statement(
        &mut conn,
        &case_id,
        &document_id,
        &request.rows,
        request.header_row_index,
        request.analyzer(),
        &options,
    )?;
    Ok(Json(ApiResponse::ok(result)))
}

/// POST /api/cases/:case_id/analyze
async fn analyze(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
) -> ApiResult<AnalysisResult> {
    let conn = state.lock()?;
    let result = analyze_findings(&*conn, &case_id, &state.config.detection)?;
    Ok(Json(ApiResponse::ok(result)))
}

/// GET /api/cases/:case_id/findings?type=
async fn findings(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
    Query(query): Query<FindingsQuery>,
) -> ApiResult<Vec<Finding>> {
    let mut filter = FindingFilter::for_case(&case_id);
    if let Some(raw) = query.finding_type.as_deref() {
        let finding_type: FindingType = raw
            .parse()
            .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, &format!("{}", e)))?;
        filter = filter.of_type(finding_type);
    }

    let conn = state.lock()?;
    let found = conn.find_findings(&filter)?;
    Ok(Json(ApiResponse::ok(found)))
}

/// GET /api/cases/:case_id/loan-usage?keyword=&amount=&tolerance=&document_id=
async fn loan_usage(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
    Query(query): Query<LoanUsageQuery>,
) -> ApiResult<LoanUsage> {
    let loan_query = LoanQuery {
        keyword: query.keyword,
        amount: query.amount,
        tolerance: query.tolerance.unwrap_or(0.0),
        document_id: query.document_id,
    };

    let conn = state.lock()?;
    let usage = track_case_loan_usage(&*conn, &case_id, &loan_query)?;
    Ok(Json(ApiResponse::ok(usage)))
}

/// GET /api/cases/:case_id/transactions/:transaction_id/fund-chains?direction=&max_depth=&tolerance=
async fn fund_chains(
    State(state): State<AppState>,
    Path((case_id, transaction_id)): Path<(String, String)>,
    Query(query): Query<FundTraceQuery>,
) -> ApiResult<TracingResult> {
    let defaults = FundTraceOptions::default();
    let options = FundTraceOptions {
        max_depth: query.max_depth.unwrap_or(defaults.max_depth),
        amount_tolerance: query.tolerance.unwrap_or(defaults.amount_tolerance),
        ..defaults
    };

    let conn = state.lock()?;
    let result = trace_case_funds(&*conn, &case_id, &transaction_id, query.direction, &options)?;
    Ok(Json(ApiResponse::ok(result)))
}

/// GET /api/cases/:case_id/suspected-loans?min_amount=
async fn suspected_loans(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
    Query(query): Query<SuspectsQuery>,
) -> ApiResult<Vec<SuspectedLoanDeposit>> {
    let min_amount = query.min_amount.unwrap_or(state.config.loans.suspect_min_amount);

    let conn = state.lock()?;
    let transactions = conn.find_transactions(&TransactionFilter::for_case(&case_id))?;
    Ok(Json(ApiResponse::ok(suspected_loan_deposits(&transactions, min_amount))))
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/normalize", post(normalize))
        .route("/cases/:case_id/documents/:document_id/extract", post(extract))
        .route("/cases/:case_id/analyze", post(analyze))
        .route("/cases/:case_id/findings", get(findings))
        .route("/cases/:case_id/loan-usage", get(loan_usage))
        .route("/cases/:case_id/suspected-loans", get(suspected_loans))
        .route(
            "/cases/:case_id/transactions/:transaction_id/fund-chains",
            get(fund_chains),
        )
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}
