use axum::{
    Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Request, State, rejection::BytesRejection},
    http::{HeaderValue, StatusCode, header},
    middleware::{Next, from_fn},
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
};
use iabp_session::{
    InMemorySessionStorage, ParameterUpdate, PasswordGate, RateLimitGuard, Session,
    SessionContext, SessionError, SessionStorage,
};
use serde_json::{Value, json};
use std::{sync::Arc, time::Duration};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Instrument, debug, error, info, warn};
use uuid::Uuid;

use crate::{
    checklist::{ChecklistItem, SAFETY_CHECKLIST},
    client::{AnalysisClient, AnthropicClient},
    config::AppConfig,
    credentials::{self, Credential},
    error::{ApiError, ApiResult},
    image_prep::{self, PreparedImage},
    models::{
        AnalysisResponse, ApiKeyRequest, ExtractionResponse, LoginRequest, SessionResponse,
    },
    prompts::DISCLAIMER,
};

pub const REPORT_FILE_NAME: &str = "iabp_report.txt";

#[derive(Clone)]
pub struct AppState {
    pub session_storage: Arc<dyn SessionStorage>,
    pub client: Arc<dyn AnalysisClient>,
    pub gate: PasswordGate,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        client: Arc<dyn AnalysisClient>,
        session_storage: Arc<dyn SessionStorage>,
    ) -> Self {
        Self {
            session_storage,
            client,
            gate: PasswordGate::new(config.app_password.clone()),
            config: Arc::new(config),
        }
    }

    fn credential_for(&self, ctx: &SessionContext) -> Option<Credential> {
        credentials::resolve(
            self.config.secret_api_key.as_deref(),
            ctx.user_api_key.as_deref(),
        )
    }

    fn require_credential(&self, ctx: &SessionContext) -> ApiResult<Credential> {
        Ok(credentials::require(
            self.config.secret_api_key.as_deref(),
            ctx.user_api_key.as_deref(),
        )?)
    }
}

/// Build the production router. Must be called inside a tokio runtime, since it starts the
/// idle-session sweeper.
pub fn create_app(config: AppConfig) -> anyhow::Result<Router> {
    let client = Arc::new(AnthropicClient::new(&config)?);
    let storage: Arc<dyn SessionStorage> = Arc::new(InMemorySessionStorage::new());
    spawn_session_sweeper(storage.clone(), config.session_ttl);
    Ok(build_router(AppState::new(config, client, storage)))
}

/// Periodically drop sessions that outlived the idle TTL.
pub fn spawn_session_sweeper(
    storage: Arc<dyn SessionStorage>,
    ttl: Duration,
) -> tokio::task::JoinHandle<()> {
    let period = (ttl / 4).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let removed = storage.purge_idle(ttl).await;
            debug!("Session sweep removed {}, {} remain", removed, storage.len().await);
        }
    })
}

pub fn build_router(app_state: AppState) -> Router {
    let body_limit = app_state.config.max_upload_bytes;

    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/_stcore/health", get(health_check))
        .route("/checklist", get(checklist))
        .route("/sessions", post(create_session))
        .route("/sessions/{session_id}", get(get_session).delete(end_session))
        .route("/sessions/{session_id}/login", post(login))
        .route("/sessions/{session_id}/api-key", put(set_api_key))
        .route("/sessions/{session_id}/parameters", put(update_parameters))
        .route("/sessions/{session_id}/extract", post(extract_parameters))
        .route("/sessions/{session_id}/analyze", post(generate_analysis))
        .route("/sessions/{session_id}/report", get(download_report))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(from_fn(correlation_id_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Tag every request with a correlation id and run it inside a matching span.
async fn correlation_id_middleware(mut request: Request, next: Next) -> Response {
    let correlation_id = Uuid::new_v4().to_string();

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        request.headers_mut().insert("x-correlation-id", value);
    }

    let span = tracing::info_span!("http_request", correlation_id = %correlation_id);
    next.run(request).instrument(span).await
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "IABP Monitor Analyzer",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "AI-powered clinical decision support for intra-aortic balloon pump management",
        "disclaimer": DISCLAIMER,
        "endpoints": {
            "POST /sessions": "Start a new session",
            "GET /sessions/{session_id}": "Get session parameters and latest analysis",
            "DELETE /sessions/{session_id}": "End a session",
            "POST /sessions/{session_id}/login": "Unlock a password-protected session",
            "PUT /sessions/{session_id}/api-key": "Set the API key for this session",
            "PUT /sessions/{session_id}/parameters": "Edit monitor parameters",
            "POST /sessions/{session_id}/extract": "Upload a monitor image (PNG/JPEG) and extract parameters",
            "POST /sessions/{session_id}/analyze": "Generate clinical analysis",
            "GET /sessions/{session_id}/report": "Download the analysis as text",
            "GET /checklist": "Critical safety checklist",
            "GET /health": "Health check"
        }
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn checklist() -> Json<Vec<ChecklistItem>> {
    Json(SAFETY_CHECKLIST.to_vec())
}

async fn load_session(state: &AppState, session_id: &str) -> ApiResult<Session> {
    match state.session_storage.get(session_id).await {
        Ok(Some(session)) if session.is_expired(state.config.session_ttl) => {
            info!(
                "Session {} expired after {:?} idle",
                session_id,
                session.idle_for()
            );
            state.session_storage.delete(session_id).await?;
            Err(SessionError::SessionNotFound(session_id.to_string()).into())
        }
        Ok(Some(session)) => {
            session.touch();
            Ok(session)
        }
        Ok(None) => Err(SessionError::SessionNotFound(session_id.to_string()).into()),
        Err(e) => {
            error!("Failed to load session {}: {}", session_id, e);
            Err(e.into())
        }
    }
}

async fn build_session_response(state: &AppState, session: &Session) -> SessionResponse {
    let ctx = session.context().await;
    let unlocked = state.gate.require(&ctx).is_ok();

    SessionResponse {
        session_id: session.id.clone(),
        created_at: session.created_at.to_rfc3339(),
        password_required: state.gate.is_enabled(),
        password_correct: ctx.password_correct,
        credential_source: state.credential_for(&ctx).map(|c| c.source),
        parameters: unlocked.then(|| ctx.parameters.clone()),
        analysis: if unlocked { ctx.analysis.clone() } else { None },
    }
}

async fn create_session(State(state): State<AppState>) -> ApiResult<Json<SessionResponse>> {
    state
        .session_storage
        .purge_idle(state.config.session_ttl)
        .await;
    let session = Session::new(RateLimitGuard::new(state.config.min_request_interval));

    state.session_storage.save(session.clone()).await.map_err(|e| {
        error!("Failed to create session: {}", e);
        ApiError::from(e)
    })?;

    info!("Session {} created", session.id);
    Ok(Json(build_session_response(&state, &session).await))
}

async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<SessionResponse>> {
    let session = load_session(&state, &session_id).await?;
    Ok(Json(build_session_response(&state, &session).await))
}

async fn end_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let session = load_session(&state, &session_id).await?;
    state.gate.require(&*session.context().await)?;

    state.session_storage.delete(&session_id).await?;
    info!("Session {} ended", session_id);

    Ok(Json(json!({ "session_id": session_id, "status": "ended" })))
}

async fn login(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<Json<SessionResponse>> {
    let session = load_session(&state, &session_id).await?;
    state.gate.login(&mut *session.context().await, &request.password)?;

    Ok(Json(build_session_response(&state, &session).await))
}

async fn set_api_key(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<ApiKeyRequest>,
) -> ApiResult<Json<SessionResponse>> {
    if request.api_key.trim().is_empty() {
        return Err(ApiError::bad_request("API key cannot be empty"));
    }

    let session = load_session(&state, &session_id).await?;
    {
        let mut ctx = session.context().await;
        state.gate.require(&ctx)?;
        ctx.set_user_api_key(request.api_key);
        if state.config.secret_api_key.is_some() {
            info!("Session {} set its own API key; the configured secret takes precedence", session_id);
        }
    }

    Ok(Json(build_session_response(&state, &session).await))
}

async fn update_parameters(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(update): Json<ParameterUpdate>,
) -> ApiResult<Json<SessionResponse>> {
    let session = load_session(&state, &session_id).await?;
    {
        let mut ctx = session.context().await;
        state.gate.require(&ctx)?;
        ctx.parameters.apply(update);
    }

    Ok(Json(build_session_response(&state, &session).await))
}

/// Claim the session's rate-guard slot right before an outbound call.
async fn acquire_call_slot(session: &Session) -> ApiResult<()> {
    let mut ctx = session.context().await;
    ctx.guard.try_acquire().map_err(|e| {
        warn!("Session {}: {}", session.id, e);
        ApiError::from(e)
    })
}

async fn prepare_image(body: Bytes) -> ApiResult<PreparedImage> {
    tokio::task::spawn_blocking(move || image_prep::prepare_for_model(&body))
        .await
        .map_err(|e| ApiError::Internal(format!("Image processing was interrupted: {}", e)))?
        .map_err(ApiError::from)
}

/// Map body extraction failures; hitting the body limit is an oversized upload.
fn upload_body(body: Result<Bytes, BytesRejection>, max_bytes: usize) -> ApiResult<Bytes> {
    body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(format!(
                "Image is above the {} byte upload limit",
                max_bytes
            ))
        } else {
            ApiError::bad_request(rejection.body_text())
        }
    })
}

async fn extract_parameters(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    body: Result<Bytes, BytesRejection>,
) -> ApiResult<Json<ExtractionResponse>> {
    let session = load_session(&state, &session_id).await?;
    let credential = {
        let ctx = session.context().await;
        state.gate.require(&ctx)?;
        state.require_credential(&ctx)?
    };
    let body = upload_body(body, state.config.max_upload_bytes)
        .inspect_err(|e| warn!("Session {} upload rejected: {}", session_id, e))?;

    // Size and format are checked before any outbound call.
    let format = image_prep::validate_upload(&body, state.config.max_upload_bytes).map_err(|e| {
        warn!("Session {} upload rejected: {}", session_id, e);
        ApiError::from(e)
    })?;
    info!(
        "Session {} uploaded {} ({} bytes)",
        session_id,
        format.media_type(),
        body.len()
    );

    // Claim the slot before decoding.
    acquire_call_slot(&session).await?;
    let prepared = prepare_image(body).await?;

    let extraction = state
        .client
        .extract_parameters(&credential, &prepared)
        .await
        .map_err(|e| {
            error!("Parameter extraction failed for session {}: {}", session_id, e);
            ApiError::from(e)
        })?;

    let (updated_fields, parameters) = {
        let mut ctx = session.context().await;
        let updated = ctx.parameters.merge_extracted(&extraction.values);
        (updated, ctx.parameters.clone())
    };

    let payload_mb = prepared.payload_mb();
    info!(
        "Session {} extracted {} parameters",
        session_id,
        updated_fields.len()
    );

    Ok(Json(ExtractionResponse {
        session_id,
        updated_fields,
        parameters,
        payload_mb,
        message: format!(
            "Successfully extracted parameters! (Payload: {:.2} MB). Verify the values before generating an analysis.",
            payload_mb
        ),
    }))
}

async fn generate_analysis(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<AnalysisResponse>> {
    let session = load_session(&state, &session_id).await?;
    let (credential, parameters) = {
        let mut ctx = session.context().await;
        state.gate.require(&ctx)?;
        let credential = state.require_credential(&ctx)?;
        ctx.guard.try_acquire().map_err(|e| {
            warn!("Session {}: {}", session_id, e);
            ApiError::from(e)
        })?;
        (credential, ctx.parameters.clone())
    };

    info!(
        "Session {} analysis requested with {:?} credential",
        session_id, credential.source
    );

    let analysis = state
        .client
        .analyze(&credential, &parameters)
        .await
        .map_err(|e| {
            error!("Analysis failed for session {}: {}", session_id, e);
            ApiError::from(e)
        })?;

    session.context().await.analysis = Some(analysis.clone());

    Ok(Json(AnalysisResponse {
        session_id,
        analysis,
        disclaimer: DISCLAIMER.to_string(),
    }))
}

async fn download_report(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Response> {
    let session = load_session(&state, &session_id).await?;
    let text = {
        let ctx = session.context().await;
        state.gate.require(&ctx)?;
        ctx.analysis
            .as_ref()
            .map(|a| a.text.clone())
            .ok_or_else(|| ApiError::not_found("Analysis"))?
    };

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", REPORT_FILE_NAME),
            ),
        ],
        text,
    )
        .into_response())
}
