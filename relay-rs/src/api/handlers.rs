//! API request handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::backup::{BackupManager, BackupMetadata};
use crate::error::RelayError;
use crate::install::{InstallReport, InstallState, Installer};
use crate::postfix::{ConfigSnapshot, DeliveryRecord, DeliveryStatus, Monitor, QueueEntry};
use crate::store::{Provider, SenderProfile, SenderStore, StoreState};
use crate::system::{MailClient, MailDaemon, SystemDetector, SystemInfo};

/// Shared application state
pub struct AppState {
    pub store: SenderStore,
    pub writer: Arc<crate::postfix::PostfixWriter>,
    pub installer: Arc<Installer>,
    pub monitor: Arc<Monitor>,
    pub detector: SystemDetector,
    pub daemon: Arc<dyn MailDaemon>,
    pub backups: Arc<BackupManager>,
    pub mailer: Arc<dyn MailClient>,
    /// Serializes every mutating workflow. Reads run unsynchronized.
    pub config_lock: Mutex<()>,
}

/// API error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub kind: String,
    pub detail: String,
}

type HandlerError = (StatusCode, Json<ApiError>);
type HandlerResult<T> = Result<Json<T>, HandlerError>;

fn reply_err(err: RelayError) -> HandlerError {
    let status = match &err {
        RelayError::NotFound(_) => StatusCode::NOT_FOUND,
        RelayError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        RelayError::Config(_) | RelayError::Json(_) => StatusCode::BAD_REQUEST,
        RelayError::ReadinessTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = ApiError {
        kind: err.kind().to_string(),
        detail: err.to_string(),
    };
    (status, Json(body))
}

fn bad_request(detail: &str) -> HandlerError {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiError {
            kind: "config_error".to_string(),
            detail: detail.to_string(),
        }),
    )
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub install_state: InstallState,
    pub daemon_active: bool,
    pub config_valid: bool,
    pub sender_count: usize,
    pub active_sender: Option<String>,
    pub queue_length: usize,
}

/// GET /api/status
pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let probe = state.installer.probe().await;
    let store = state.store.load().await;
    let queue_length = state
        .monitor
        .list_queue()
        .await
        .map(|q| q.len())
        .unwrap_or(0);

    let install_state = if probe.is_ready() {
        InstallState::Ready
    } else {
        InstallState::NotInstalled
    };

    Json(StatusResponse {
        install_state,
        daemon_active: state.daemon.is_active().await,
        config_valid: state.daemon.check_config().await,
        sender_count: store.profiles.len(),
        active_sender: store.active,
        queue_length,
    })
}

/// GET /api/system
pub async fn system(State(state): State<Arc<AppState>>) -> Json<SystemInfo> {
    Json(state.detector.system_info(state.daemon.as_ref()).await)
}

/// Request body for creating or updating a sender profile. The
/// password arrives in clear and is stored Base64 encoded. Host and
/// port may be omitted for providers with a known endpoint.
#[derive(Debug, Deserialize)]
pub struct SenderRequest {
    pub name: String,
    #[serde(default)]
    pub provider: Option<Provider>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: String,
    pub password: String,
}

impl SenderRequest {
    fn into_profile(self) -> Result<SenderProfile, HandlerError> {
        let provider = self.provider.unwrap_or(Provider::Custom);
        let endpoint = provider.default_endpoint();
        let host = match self.host.or_else(|| endpoint.map(|(h, _)| h.to_string())) {
            Some(h) if !h.is_empty() => h,
            _ => return Err(bad_request("host is required for this provider")),
        };
        let port = match self.port.or_else(|| endpoint.map(|(_, p)| p)) {
            Some(p) => p,
            None => return Err(bad_request("port is required for this provider")),
        };
        if self.name.is_empty() {
            return Err(bad_request("sender name must not be empty"));
        }
        Ok(SenderProfile {
            name: self.name,
            host,
            port,
            username: self.username,
            secret: SenderProfile::encode_secret(&self.password),
            provider,
        })
    }
}

/// GET /api/senders
pub async fn list_senders(State(state): State<Arc<AppState>>) -> Json<StoreState> {
    Json(state.store.load().await)
}

/// POST /api/senders
pub async fn create_sender(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SenderRequest>,
) -> HandlerResult<StoreState> {
    let profile = req.into_profile()?;
    let _guard = state.config_lock.lock().await;
    let result = state.store.add(profile).await.map_err(reply_err)?;
    Ok(Json(result))
}

/// PUT /api/senders/:name
pub async fn update_sender(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<SenderRequest>,
) -> HandlerResult<StoreState> {
    let profile = req.into_profile()?;
    let _guard = state.config_lock.lock().await;
    let result = state.store.update(&name, profile).await.map_err(reply_err)?;
    Ok(Json(result))
}

/// DELETE /api/senders/:name
pub async fn delete_sender(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> HandlerResult<StoreState> {
    let _guard = state.config_lock.lock().await;
    let result = state.store.delete(&name).await.map_err(reply_err)?;
    Ok(Json(result))
}

/// POST /api/senders/:name/activate
pub async fn activate_sender(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> HandlerResult<StoreState> {
    let _guard = state.config_lock.lock().await;
    let result = state.store.activate(&name).await.map_err(reply_err)?;
    info!("Sender '{}' activated", name);
    Ok(Json(result))
}

/// GET /api/config
pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<ConfigSnapshot> {
    Json(state.writer.snapshot().await)
}

/// POST /api/config/apply
pub async fn apply_config(State(state): State<Arc<AppState>>) -> HandlerResult<ConfigSnapshot> {
    let _guard = state.config_lock.lock().await;
    let profile = state.store.active_profile().await.map_err(reply_err)?;
    state.writer.apply(&profile).await.map_err(reply_err)?;
    Ok(Json(state.writer.snapshot().await))
}

/// POST /api/install
pub async fn install(State(state): State<Arc<AppState>>) -> HandlerResult<InstallReport> {
    let _guard = state.config_lock.lock().await;
    let profile = state.store.active_profile().await.map_err(reply_err)?;
    let report = state.installer.run_install(&profile).await.map_err(reply_err)?;
    Ok(Json(report))
}

#[derive(Debug, Serialize)]
pub struct UninstallResponse {
    pub steps: Vec<String>,
}

/// POST /api/uninstall
pub async fn uninstall(State(state): State<Arc<AppState>>) -> HandlerResult<UninstallResponse> {
    let _guard = state.config_lock.lock().await;
    let steps = state.installer.run_uninstall().await.map_err(reply_err)?;
    Ok(Json(UninstallResponse { steps }))
}

/// POST /api/reset
pub async fn reset(State(state): State<Arc<AppState>>) -> HandlerResult<ConfigSnapshot> {
    let _guard = state.config_lock.lock().await;
    state.writer.reset_to_defaults().await.map_err(reply_err)?;
    Ok(Json(state.writer.snapshot().await))
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub lines: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct LogResponse {
    pub lines: Vec<String>,
}

/// GET /api/log?lines=n
pub async fn get_log(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogQuery>,
) -> HandlerResult<LogResponse> {
    let n = query.lines.unwrap_or(50);
    let lines = state.monitor.tail(n).await.map_err(reply_err)?;
    Ok(Json(LogResponse { lines }))
}

#[derive(Debug, Serialize)]
pub struct LogStatusResponse {
    pub total: usize,
    pub delivered: usize,
    pub deferred: usize,
    pub bounced: usize,
    pub unknown: usize,
    /// Latest known status per queue id.
    pub by_queue_id: std::collections::BTreeMap<String, DeliveryStatus>,
    pub records: Vec<DeliveryRecord>,
}

/// GET /api/log/status
pub async fn log_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogQuery>,
) -> HandlerResult<LogStatusResponse> {
    let n = query.lines.unwrap_or(200);
    let records = state.monitor.delivery_records(n).await.map_err(reply_err)?;
    let count = |s: DeliveryStatus| records.iter().filter(|r| r.status == s).count();
    Ok(Json(LogStatusResponse {
        total: records.len(),
        delivered: count(DeliveryStatus::Delivered),
        deferred: count(DeliveryStatus::Deferred),
        bounced: count(DeliveryStatus::Bounced),
        unknown: count(DeliveryStatus::Unknown),
        by_queue_id: crate::postfix::monitor::statuses_by_id(&records),
        records,
    }))
}

/// GET /api/queue
pub async fn get_queue(State(state): State<Arc<AppState>>) -> HandlerResult<Vec<QueueEntry>> {
    let entries = state.monitor.list_queue().await.map_err(reply_err)?;
    Ok(Json(entries))
}

/// POST /api/queue/flush
pub async fn flush_queue(State(state): State<Arc<AppState>>) -> HandlerResult<Vec<QueueEntry>> {
    state.monitor.flush_queue().await.map_err(reply_err)?;
    let entries = state.monitor.list_queue().await.map_err(reply_err)?;
    Ok(Json(entries))
}

#[derive(Debug, Deserialize)]
pub struct SendTestRequest {
    pub to: String,
    pub subject: Option<String>,
    pub body: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SendTestResponse {
    pub sent: bool,
    pub from: String,
    pub to: String,
}

/// POST /api/send-test
pub async fn send_test(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SendTestRequest>,
) -> HandlerResult<SendTestResponse> {
    let profile = state.store.active_profile().await.map_err(reply_err)?;
    let subject = req.subject.as_deref().unwrap_or("Relay test message");
    let body = req
        .body
        .as_deref()
        .unwrap_or("This is a test message confirming the relay is operational.");
    state
        .mailer
        .send(&profile.name, &profile.username, &req.to, subject, body)
        .await
        .map_err(reply_err)?;
    info!("Test message queued for {}", req.to);
    Ok(Json(SendTestResponse {
        sent: true,
        from: profile.username,
        to: req.to,
    }))
}

/// GET /api/backups
pub async fn list_backups(
    State(state): State<Arc<AppState>>,
) -> HandlerResult<Vec<BackupMetadata>> {
    let backups = state.backups.list_backups().await.map_err(reply_err)?;
    Ok(Json(backups))
}

#[derive(Debug, Deserialize, Default)]
pub struct CreateBackupRequest {
    pub name: Option<String>,
}

/// POST /api/backups
pub async fn create_backup(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateBackupRequest>,
) -> HandlerResult<BackupMetadata> {
    let _guard = state.config_lock.lock().await;
    let metadata = state
        .backups
        .create_backup(req.name.as_deref())
        .await
        .map_err(reply_err)?;
    Ok(Json(metadata))
}

/// POST /api/backups/:name/restore
pub async fn restore_backup(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> HandlerResult<BackupMetadata> {
    let _guard = state.config_lock.lock().await;
    let metadata = state.backups.restore_backup(&name).await.map_err(reply_err)?;
    Ok(Json(metadata))
}

/// DELETE /api/backups/:name
pub async fn delete_backup(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> HandlerResult<Vec<BackupMetadata>> {
    let _guard = state.config_lock.lock().await;
    state.backups.delete_backup(&name).await.map_err(reply_err)?;
    let remaining = state.backups.list_backups().await.map_err(reply_err)?;
    Ok(Json(remaining))
}
