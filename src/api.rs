// HTTP API
// axum router, JSON envelope, auth and rate-limit middleware

use axum::{
    extract::{rejection::JsonRejection, Json, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    set_header::SetResponseHeaderLayer,
};

use crate::models::{
    AppConfig, DestinationView, FailoverConfig, Platform, PresetSummary, SourceSpec, Topology,
};
use crate::services::{
    input_health, redact_secrets, Backends, CreateDestinationRequest, DestinationService,
    FlowControl, HealthReporter, Orchestrator, OrchestratorConfig, OrchestratorError,
    PlatformCatalog, PresetCatalog, ProvisioningManager, TransitionOutcome,
    UpdateDestinationRequest,
};

// ============================================================================
// State
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    destinations: Arc<DestinationService>,
    orchestrator: Arc<Orchestrator>,
    reporter: Arc<HealthReporter>,
    flows: Arc<dyn FlowControl>,
    flow_arn: Option<String>,
    platforms: Arc<PlatformCatalog>,
    presets: Arc<PresetCatalog>,
    backend: &'static str,
    registry_backend: &'static str,
    topology: Topology,
    api_token: Option<String>,
    cors_origins: Vec<String>,
    rate_limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl AppState {
    /// Wire the services over the selected backends
    pub fn new(config: &AppConfig, backends: Backends) -> Result<Self, String> {
        let platforms = Arc::new(PlatformCatalog::load()?);
        let presets = Arc::new(PresetCatalog::load()?);
        let flow_arn = Some(config.flow_arn.trim().to_string()).filter(|arn| !arn.is_empty());

        let orchestrator = Arc::new(Orchestrator::new(
            backends.registry.clone(),
            backends.channels.clone(),
            platforms.clone(),
            OrchestratorConfig::from_app_config(config),
        ));
        let provisioning = Arc::new(ProvisioningManager::new(
            backends.registry.clone(),
            backends.secrets.clone(),
            backends.provisioner.clone(),
            backends.channels.clone(),
            backends.flows.clone(),
            presets.clone(),
            config,
        ));
        let destinations = Arc::new(DestinationService::new(
            backends.registry.clone(),
            backends.secrets.clone(),
            orchestrator.clone(),
            provisioning,
            platforms.clone(),
            presets.clone(),
            config.topology,
            config.secret_prefix.clone(),
        ));
        let reporter = Arc::new(HealthReporter::new(
            backends.registry.clone(),
            backends.channels.clone(),
            backends.flows.clone(),
            config.channels.clone(),
            flow_arn.clone(),
        ));

        let rate_limit = NonZeroU32::new(config.rate_limit_per_minute).unwrap_or(NonZeroU32::MIN);
        let api_token = Some(config.api_token.trim().to_string()).filter(|token| !token.is_empty());

        Ok(Self {
            destinations,
            orchestrator,
            reporter,
            flows: backends.flows,
            flow_arn,
            platforms,
            presets,
            backend: backends.name,
            registry_backend: backends.registry.backend_name(),
            topology: config.topology,
            api_token,
            cors_origins: config.cors_origins.clone(),
            rate_limiter: Arc::new(RateLimiter::direct(Quota::per_minute(rate_limit))),
        })
    }

    pub fn auth_enabled(&self) -> bool {
        self.api_token.is_some()
    }

    fn require_flow_arn(&self) -> Result<&str, ApiError> {
        self.flow_arn.as_deref().ok_or_else(|| {
            ApiError(OrchestratorError::NotFound("No ingest flow configured".to_string()))
        })
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// Core error rendered as `{"status":"error","error":<kind>,"message":...}`
pub struct ApiError(OrchestratorError);

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
            OrchestratorError::InvalidState(_) | OrchestratorError::ValidationFailure(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            log::error!("[API] {}", redact_secrets(&self.0.to_string()));
        }

        let mut body = json!({
            "status": "error",
            "error": self.0.kind().as_str(),
            "message": redact_secrets(&self.0.to_string()),
        });
        if let OrchestratorError::PartialFailure { failures, .. } = &self.0 {
            let failures: Vec<String> = failures.iter().map(|failure| redact_secrets(failure)).collect();
            body["failures"] = json!(failures);
        }
        (status, Json(body)).into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

/// Merge `payload` into a success envelope
fn success(payload: Value) -> ApiResult {
    let mut body = json!({ "status": "success" });
    if let (Value::Object(envelope), Value::Object(fields)) = (&mut body, payload) {
        envelope.extend(fields);
    }
    Ok((StatusCode::OK, Json(body)).into_response())
}

fn to_value(value: impl Serialize) -> Result<Value, ApiError> {
    serde_json::to_value(value).map_err(|e| ApiError(e.into()))
}

/// Unwrap a JSON body, reporting malformed input as a validation failure
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| ApiError(OrchestratorError::ValidationFailure(e.body_text())))
}

fn transition(outcome: TransitionOutcome) -> ApiResult {
    success(json!({
        "destination": DestinationView::from(&outcome.destination),
        "channel_id": outcome.channel_id,
        "channel_state": outcome.channel_state,
        "channel_action": outcome.channel_action,
    }))
}

// ============================================================================
// Security Utilities
// ============================================================================

fn verify_token(expected: &str, provided: &str) -> bool {
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn error_envelope(status: StatusCode, error: &str, message: &str) -> Response {
    (
        status,
        Json(json!({ "status": "error", "error": error, "message": message })),
    )
        .into_response()
}

/// Allow a request when no token is configured or a matching bearer token is sent
async fn auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.api_token.as_deref() else {
        return next.run(request).await;
    };
    match bearer_token(&headers) {
        Some(token) if verify_token(expected, token) => next.run(request).await,
        _ => error_envelope(StatusCode::UNAUTHORIZED, "Unauthorized", "Authentication required"),
    }
}

async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    match state.rate_limiter.check() {
        Ok(_) => next.run(request).await,
        Err(_) => error_envelope(
            StatusCode::TOO_MANY_REQUESTS,
            "RateLimited",
            "Rate limit exceeded. Please try again later.",
        ),
    }
}

/// CORS with `scheme://host:*` wildcard-port entries
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allowed_origins = origins.to_vec();

    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            let Ok(origin) = origin.to_str() else {
                return false;
            };
            allowed_origins.iter().any(|allowed| match allowed.strip_suffix(":*") {
                Some(prefix) => origin.starts_with(prefix) && origin[prefix.len()..].starts_with(':'),
                None => origin == allowed,
            })
        }))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

// ============================================================================
// Destinations
// ============================================================================

async fn list_destinations(State(state): State<AppState>) -> ApiResult {
    let destinations = state.destinations.list().await?;
    let views: Vec<DestinationView> = destinations.iter().map(DestinationView::from).collect();
    success(json!({ "destinations": views }))
}

async fn get_destination(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let destination = state.destinations.get(&id).await?;
    success(json!({ "destination": DestinationView::from(&destination) }))
}

async fn create_destination(
    State(state): State<AppState>,
    payload: Result<Json<CreateDestinationRequest>, JsonRejection>,
) -> ApiResult {
    let destination = state.destinations.create(body(payload)?).await?;
    success(json!({ "destination": DestinationView::from(&destination) }))
}

async fn update_destination(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateDestinationRequest>, JsonRejection>,
) -> ApiResult {
    let destination = state.destinations.update(&id, body(payload)?).await?;
    success(json!({ "destination": DestinationView::from(&destination) }))
}

async fn delete_destination(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    state.destinations.delete(&id).await?;
    success(json!({ "deleted": id }))
}

async fn start_destination(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    transition(state.orchestrator.start(&id).await?)
}

async fn stop_destination(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    transition(state.orchestrator.stop(&id).await?)
}

async fn start_channel(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    transition(state.orchestrator.start_channel(&id).await?)
}

async fn stop_channel(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    transition(state.orchestrator.stop_channel(&id).await?)
}

async fn reset_destination(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let destination = state.orchestrator.reset(&id).await?;
    success(json!({ "destination": DestinationView::from(&destination) }))
}

async fn migrate(State(state): State<AppState>) -> ApiResult {
    let report = state.destinations.migrate().await?;
    success(json!({ "migration": to_value(report)? }))
}

// ============================================================================
// Catalogs
// ============================================================================

#[derive(Deserialize)]
struct PresetQuery {
    platform: Option<String>,
}

async fn list_presets(State(state): State<AppState>, Query(query): Query<PresetQuery>) -> ApiResult {
    let summaries: Vec<PresetSummary> = match query.platform.as_deref() {
        Some(name) => {
            let platform = Platform::from_str(name).map_err(|e| ApiError(OrchestratorError::ValidationFailure(e)))?;
            state
                .presets
                .list_for(platform)
                .into_iter()
                .map(|preset| preset.to_summary())
                .collect()
        }
        None => state.presets.summaries(),
    };
    success(json!({ "presets": to_value(summaries)? }))
}

async fn admin_presets(State(state): State<AppState>) -> ApiResult {
    success(json!({ "presets": to_value(state.presets.list())? }))
}

async fn admin_platforms(State(state): State<AppState>) -> ApiResult {
    let platforms: Vec<Value> = state
        .platforms
        .list()
        .into_iter()
        .map(|config| {
            let mut value = to_value(config)?;
            value["channelId"] = json!(state.orchestrator.shared_channel_for(config.platform));
            Ok(value)
        })
        .collect::<Result<_, ApiError>>()?;
    success(json!({ "platforms": platforms }))
}

// ============================================================================
// Channels, Flow and Status
// ============================================================================

async fn channel_statuses(State(state): State<AppState>) -> ApiResult {
    success(to_value(state.reporter.get_all_channel_statuses().await)?)
}

async fn validate_channels(State(state): State<AppState>) -> ApiResult {
    success(json!({ "validation": to_value(state.reporter.validate_configuration().await?)? }))
}

async fn flow_status(State(state): State<AppState>) -> ApiResult {
    success(json!({ "flow": to_value(state.reporter.get_flow_status().await?)? }))
}

async fn inputs_health(State(state): State<AppState>) -> ApiResult {
    success(json!({ "health": to_value(state.reporter.get_input_health().await?)? }))
}

async fn start_flow(State(state): State<AppState>) -> ApiResult {
    let flow_arn = state.require_flow_arn()?;
    state.flows.start(flow_arn).await.map_err(OrchestratorError::from)?;
    success(json!({ "flow_arn": flow_arn }))
}

async fn stop_flow(State(state): State<AppState>) -> ApiResult {
    let flow_arn = state.require_flow_arn()?;
    state.flows.stop(flow_arn).await.map_err(OrchestratorError::from)?;
    success(json!({ "flow_arn": flow_arn }))
}

async fn add_source(
    State(state): State<AppState>,
    payload: Result<Json<SourceSpec>, JsonRejection>,
) -> ApiResult {
    let spec = body(payload)?;
    if spec.name.trim().is_empty() {
        return Err(ApiError(OrchestratorError::ValidationFailure("Source name is required".to_string())));
    }
    let flow_arn = state.require_flow_arn()?;
    let source = state.flows.add_source(flow_arn, &spec).await.map_err(OrchestratorError::from)?;
    success(json!({ "source": to_value(source)? }))
}

async fn update_failover(
    State(state): State<AppState>,
    payload: Result<Json<FailoverConfig>, JsonRejection>,
) -> ApiResult {
    let config = body(payload)?;
    let flow_arn = state.require_flow_arn()?;
    state
        .flows
        .update_failover(flow_arn, &config)
        .await
        .map_err(OrchestratorError::from)?;
    let flow = state.flows.describe_flow(flow_arn).await.map_err(OrchestratorError::from)?;
    success(json!({
        "failover": to_value(&flow.failover)?,
        "health": to_value(input_health(&flow))?,
    }))
}

async fn streaming_status(State(state): State<AppState>) -> ApiResult {
    success(to_value(state.reporter.streaming_status().await?)?)
}

/// Liveness only; never calls out to the backends
async fn health(State(state): State<AppState>) -> ApiResult {
    success(json!({
        "healthy": true,
        "version": env!("CARGO_PKG_VERSION"),
        "backend": state.backend,
        "registry": state.registry_backend,
        "topology": state.topology.as_str(),
        "auth": state.auth_enabled(),
    }))
}

// ============================================================================
// Router
// ============================================================================

pub fn build_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/api/destinations", get(list_destinations).post(create_destination))
        .route(
            "/api/destinations/:id",
            get(get_destination).put(update_destination).delete(delete_destination),
        )
        .route("/api/destinations/:id/start", post(start_destination))
        .route("/api/destinations/:id/stop", post(stop_destination))
        .route("/api/destinations/:id/start-channel", post(start_channel))
        .route("/api/destinations/:id/stop-channel", post(stop_channel))
        .route("/api/destinations/:id/reset", post(reset_destination))
        .route("/api/presets", get(list_presets))
        .route("/api/admin/presets", get(admin_presets))
        .route("/api/admin/platforms", get(admin_platforms))
        .route("/api/channels/status", get(channel_statuses))
        .route("/api/channels/validate", get(validate_channels))
        .route("/api/mediaconnect/flow/status", get(flow_status))
        .route("/api/mediaconnect/inputs/health", get(inputs_health))
        .route("/api/mediaconnect/flow/start", post(start_flow))
        .route("/api/mediaconnect/flow/stop", post(stop_flow))
        .route("/api/mediaconnect/sources", post(add_source))
        .route("/api/mediaconnect/failover", put(update_failover))
        .route("/api/streaming/status", get(streaming_status))
        .route("/api/migrate", post(migrate))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let public_routes = Router::new().route("/api/health", get(health));

    let cors = build_cors_layer(&state.cors_origins);
    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(state, rate_limit_middleware))
        .layer(cors)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
}
