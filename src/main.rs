use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use paper_record_core::config::CoreConfigValues;
use paper_record_core::labels::{PlainTextLabelRenderer, SpoolDirPrinter};
use paper_record_core::snapshot::{Workspace, WorkspaceSnapshot};
use paper_record_core::{
    AssignmentReport, LocationId, PaperRecordError, PaperRecordId, PaperRecordMergeRequest,
    PaperRecordMergeRequestId, PaperRecordRequest, PaperRecordRequestId, PaperRecordResult,
    PaperRecordService, PatientId, PersonId,
};
use paper_record_types::{Identifier, NonEmptyText};

type ApiError = (StatusCode, Json<ErrorRes>);

/// Error body returned by every handler.
///
/// The identifier fields are only present when an assignment batch stopped at a label that
/// failed to print.
#[derive(Debug, Serialize)]
struct ErrorRes {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    failed_identifier: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    printed_before_failure: Vec<String>,
}

fn api_error(status: StatusCode, message: &str) -> ApiError {
    (
        status,
        Json(ErrorRes {
            error: message.to_string(),
            failed_identifier: None,
            printed_before_failure: Vec::new(),
        }),
    )
}

/// Application state shared across REST handlers.
///
/// The service and the workspace share the same in-memory adapters, so the workspace can
/// be written back to the snapshot file on shutdown.
#[derive(Clone)]
struct AppState {
    service: Arc<PaperRecordService>,
    workspace: Workspace,
}

/// Main entry point for the paper record server.
///
/// Loads the workspace snapshot, serves the REST API until Ctrl-C and then writes the
/// workspace back.
///
/// # Environment Variables
/// - `PAPER_RECORDS_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `PAPER_RECORDS_SNAPSHOT`: workspace snapshot file (default: "paper_records.json")
/// - `PAPER_RECORDS_SPOOL_DIR`: directory label print jobs are written to (default: "labels")
/// - `PAPER_RECORDS_FORM_LABEL_COUNT`: form labels printed per assignment
/// - `PAPER_RECORDS_PRINT_BASE_DELAY_MS`, `PAPER_RECORDS_PRINT_DELAY_PER_LABEL_MS`: printer pacing
/// - `PAPER_RECORDS_MAX_IDENTIFIER_ATTEMPTS`: bound on chart number generation retries
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("paper_records_run=info".parse()?)
                .add_directive("paper_record_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let env = |name: &str| std::env::var(name).ok();
    let rest_addr = env("PAPER_RECORDS_REST_ADDR").unwrap_or_else(|| "0.0.0.0:3000".into());
    let snapshot_path = PathBuf::from(
        env("PAPER_RECORDS_SNAPSHOT")
            .unwrap_or_else(|| paper_record_core::constants::DEFAULT_SNAPSHOT_FILENAME.into()),
    );
    let spool_dir = PathBuf::from(env("PAPER_RECORDS_SPOOL_DIR").unwrap_or_else(|| "labels".into()));

    let cfg = CoreConfigValues {
        form_label_count: env("PAPER_RECORDS_FORM_LABEL_COUNT"),
        print_base_delay_ms: env("PAPER_RECORDS_PRINT_BASE_DELAY_MS"),
        print_delay_per_label_ms: env("PAPER_RECORDS_PRINT_DELAY_PER_LABEL_MS"),
        max_identifier_attempts: env("PAPER_RECORDS_MAX_IDENTIFIER_ATTEMPTS"),
    }
    .resolve()?;
    let cfg = Arc::new(cfg);

    std::fs::create_dir_all(&spool_dir)?;
    let workspace = WorkspaceSnapshot::load(&snapshot_path)?.into_workspace()?;
    let service = workspace.service(
        cfg,
        Arc::new(PlainTextLabelRenderer),
        Arc::new(SpoolDirPrinter::new(&spool_dir)),
    );

    tracing::info!("++ Starting paper records REST on {}", rest_addr);
    tracing::info!("++ Workspace snapshot {}", snapshot_path.display());

    let state = AppState {
        service: Arc::new(service),
        workspace: workspace.clone(),
    };
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    workspace.snapshot()?.save(&snapshot_path)?;
    tracing::info!("-- Saved workspace snapshot {}", snapshot_path.display());
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/patients", post(register_patient))
        .route("/paper-record-requests", post(request_paper_record))
        .route("/pending-requests", get(pending_by_identifier))
        .route("/assignments", post(assign_requests))
        .route("/work-lists/:status/:kind", get(list_requests))
        .route("/paper-record-requests/:id/sent", post(mark_sent))
        .route("/paper-record-requests/:id/cancelled", post(mark_cancelled))
        .route("/paper-record-requests/:id/returned", post(mark_returned))
        .route("/paper-records/merge", post(merge_paper_records))
        .route("/merge-requests", get(open_merge_requests))
        .route("/merge-requests/:id/merged", post(confirm_merge))
        .route("/expiry/pull", post(expire_pull))
        .route("/expiry/create", post(expire_create))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {:?}", e);
    }
}

/// Runs a blocking core call on the blocking pool and maps its error to a response.
async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> PaperRecordResult<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            tracing::error!("Paper record error: {:?}", e);
            Err(error_response(&e))
        }
        Err(e) => {
            tracing::error!("Blocking task failed: {:?}", e);
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal error"))
        }
    }
}

fn error_response(error: &PaperRecordError) -> ApiError {
    match error {
        PaperRecordError::InvalidInput(_)
        | PaperRecordError::InvalidText(_)
        | PaperRecordError::UnknownLocation(_)
        | PaperRecordError::NoMatchingLocation { .. }
        | PaperRecordError::RecordLocationMismatch { .. } => {
            api_error(StatusCode::BAD_REQUEST, "Invalid request")
        }
        PaperRecordError::NotFound { .. } => api_error(StatusCode::NOT_FOUND, "Not found"),
        PaperRecordError::InvalidTransition { .. } | PaperRecordError::IllegalState(_) => {
            api_error(StatusCode::CONFLICT, "Conflict with current state")
        }
        PaperRecordError::Conflict(_) => {
            api_error(StatusCode::CONFLICT, "Changed by another request, retry")
        }
        PaperRecordError::UnableToPrintLabel { .. } => {
            api_error(StatusCode::SERVICE_UNAVAILABLE, "Label printer unavailable")
        }
        PaperRecordError::AssignmentAborted {
            failed_identifier,
            printed_before_failure,
            ..
        } => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorRes {
                error: "Label printer unavailable".into(),
                failed_identifier: Some(failed_identifier.clone()),
                printed_before_failure: printed_before_failure.clone(),
            }),
        ),
        _ => api_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal error"),
    }
}

fn location(name: &str) -> Result<LocationId, ApiError> {
    LocationId::new(name).map_err(|e| {
        tracing::error!("Invalid location: {:?}", e);
        api_error(StatusCode::BAD_REQUEST, "Invalid location")
    })
}

// ============================================================================
// BODIES
// ============================================================================

#[derive(Serialize)]
struct HealthRes {
    ok: bool,
    message: String,
}

#[derive(Deserialize)]
struct RegisterPatientReq {
    name: String,
    primary_identifier: String,
}

#[derive(Serialize)]
struct RegisterPatientRes {
    patient_id: PatientId,
}

#[derive(Deserialize)]
struct RequestPaperRecordReq {
    patient_id: PatientId,
    location: String,
    request_location: String,
    creator: PersonId,
}

#[derive(Deserialize)]
struct LocationQuery {
    location: Option<String>,
}

#[derive(Deserialize)]
struct IdentifierQuery {
    identifier: String,
    location: String,
}

#[derive(Deserialize)]
struct AssignReq {
    ids: Vec<PaperRecordRequestId>,
    assignee: PersonId,
    location: String,
}

#[derive(Deserialize)]
struct MergeReq {
    preferred: PaperRecordId,
    not_preferred: PaperRecordId,
    creator: PersonId,
}

#[derive(Deserialize)]
struct ExpireReq {
    cutoff: DateTime<Utc>,
}

#[derive(Serialize)]
struct ExpireRes {
    expired: Vec<PaperRecordRequestId>,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// Health check endpoint
#[axum::debug_handler]
async fn health(State(_state): State<AppState>) -> Json<HealthRes> {
    Json(HealthRes {
        ok: true,
        message: "paper records is alive".into(),
    })
}

/// Register a patient with a primary identifier
///
/// # Errors
/// Returns `400 Bad Request` for a blank name, a malformed identifier or an identifier
/// already held by another patient.
#[axum::debug_handler]
async fn register_patient(
    State(state): State<AppState>,
    Json(req): Json<RegisterPatientReq>,
) -> Result<Json<RegisterPatientRes>, ApiError> {
    let registry = state.workspace.registry.clone();
    let patient_id = blocking(move || {
        registry.register_patient(
            NonEmptyText::new(&req.name)?,
            Identifier::new(&req.primary_identifier)?,
        )
    })
    .await?;
    Ok(Json(RegisterPatientRes { patient_id }))
}

/// Request a patient's paper record
///
/// Returns the pending requests for the patient at the resolved medical record location.
#[axum::debug_handler]
async fn request_paper_record(
    State(state): State<AppState>,
    Json(req): Json<RequestPaperRecordReq>,
) -> Result<Json<Vec<PaperRecordRequest>>, ApiError> {
    let at = location(&req.location)?;
    let to = location(&req.request_location)?;
    let service = state.service.clone();
    let requests =
        blocking(move || service.request_paper_record(req.patient_id, &at, &to, req.creator))
            .await?;
    Ok(Json(requests))
}

/// List work queues: `open` or `assigned`, `pull` or `create`
#[axum::debug_handler]
async fn list_requests(
    State(state): State<AppState>,
    Path((status, kind)): Path<(String, String)>,
    Query(query): Query<LocationQuery>,
) -> Result<Json<Vec<PaperRecordRequest>>, ApiError> {
    let at = query.location.as_deref().map(location).transpose()?;
    let service = state.service.clone();
    let requests = match (status.as_str(), kind.as_str()) {
        ("open", "pull") => blocking(move || service.open_requests_to_pull(at.as_ref())).await?,
        ("open", "create") => {
            blocking(move || service.open_requests_to_create(at.as_ref())).await?
        }
        ("assigned", "pull") => {
            blocking(move || service.assigned_requests_to_pull(at.as_ref())).await?
        }
        ("assigned", "create") => {
            blocking(move || service.assigned_requests_to_create(at.as_ref())).await?
        }
        _ => return Err(api_error(StatusCode::NOT_FOUND, "Not found")),
    };
    Ok(Json(requests))
}

/// The single pending request for a chart or primary identifier at a location
///
/// # Errors
/// Returns `404 Not Found` when nothing is pending and `409 Conflict` when more than one
/// request is pending.
#[axum::debug_handler]
async fn pending_by_identifier(
    State(state): State<AppState>,
    Query(query): Query<IdentifierQuery>,
) -> Result<Json<PaperRecordRequest>, ApiError> {
    let at = location(&query.location)?;
    let service = state.service.clone();
    let found = blocking(move || {
        service.get_pending_paper_record_request_by_identifier(&query.identifier, &at)
    })
    .await?;
    found
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "No pending request"))
}

/// Assign open requests and print their labels
///
/// The report lists assigned charts under `success` and charts that were not OPEN under
/// `skipped`. There is no `error` list: a label that fails to print aborts the whole batch.
///
/// # Errors
/// Returns `503 Service Unavailable` if a label fails to print; nothing is assigned. The
/// body names the chart that failed in `failed_identifier` and the charts whose labels had
/// already printed in `printed_before_failure`. Returns `409 Conflict` if a request changed
/// while its labels were printing.
#[axum::debug_handler]
async fn assign_requests(
    State(state): State<AppState>,
    Json(req): Json<AssignReq>,
) -> Result<Json<AssignmentReport>, ApiError> {
    let at = location(&req.location)?;
    let service = state.service.clone();
    let report = blocking(move || service.assign_requests(&req.ids, req.assignee, &at)).await?;
    Ok(Json(report))
}

#[axum::debug_handler]
async fn mark_sent(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<PaperRecordRequest>, ApiError> {
    let service = state.service.clone();
    let request =
        blocking(move || service.mark_request_sent(PaperRecordRequestId::new(id))).await?;
    Ok(Json(request))
}

#[axum::debug_handler]
async fn mark_cancelled(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<PaperRecordRequest>, ApiError> {
    let service = state.service.clone();
    let request =
        blocking(move || service.mark_request_cancelled(PaperRecordRequestId::new(id))).await?;
    Ok(Json(request))
}

#[axum::debug_handler]
async fn mark_returned(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<PaperRecordRequest>, ApiError> {
    let service = state.service.clone();
    let request =
        blocking(move || service.mark_request_returned(PaperRecordRequestId::new(id))).await?;
    Ok(Json(request))
}

/// Mark two paper records for a physical merge
///
/// # Errors
/// Returns `400 Bad Request` if the records belong to different medical record locations.
#[axum::debug_handler]
async fn merge_paper_records(
    State(state): State<AppState>,
    Json(req): Json<MergeReq>,
) -> Result<Json<PaperRecordMergeRequest>, ApiError> {
    let service = state.service.clone();
    let merge = blocking(move || {
        service.mark_paper_records_for_merge(req.preferred, req.not_preferred, req.creator)
    })
    .await?;
    Ok(Json(merge))
}

#[axum::debug_handler]
async fn confirm_merge(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<PaperRecordMergeRequest>, ApiError> {
    let service = state.service.clone();
    let merge = blocking(move || {
        service.mark_paper_records_as_merged(PaperRecordMergeRequestId::new(id))
    })
    .await?;
    Ok(Json(merge))
}

/// Open merge requests at the medical record location for `location`
#[axum::debug_handler]
async fn open_merge_requests(
    State(state): State<AppState>,
    Query(query): Query<LocationQuery>,
) -> Result<Json<Vec<PaperRecordMergeRequest>>, ApiError> {
    let Some(name) = query.location else {
        return Err(api_error(StatusCode::BAD_REQUEST, "location is required"));
    };
    let at = location(&name)?;
    let service = state.service.clone();
    let merges = blocking(move || service.open_paper_record_merge_requests(&at)).await?;
    Ok(Json(merges))
}

#[axum::debug_handler]
async fn expire_pull(
    State(state): State<AppState>,
    Json(req): Json<ExpireReq>,
) -> Result<Json<ExpireRes>, ApiError> {
    let service = state.service.clone();
    let expired = blocking(move || service.expire_pending_pull_requests(req.cutoff)).await?;
    Ok(Json(ExpireRes { expired }))
}

#[axum::debug_handler]
async fn expire_create(
    State(state): State<AppState>,
    Json(req): Json<ExpireReq>,
) -> Result<Json<ExpireRes>, ApiError> {
    let service = state.service.clone();
    let expired = blocking(move || service.expire_pending_create_requests(req.cutoff)).await?;
    Ok(Json(ExpireRes { expired }))
}
