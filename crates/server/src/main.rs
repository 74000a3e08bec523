use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use dotenvy::dotenv;
use filamentdryer_core::{render, DryerError, Preset};
use filamentdryer_sync::{sync_presets, DryerSettings, LocalStorage, Origin, PresetStorage, SyncReport};
use prometheus::{Encoder, IntCounter, IntGauge, TextEncoder};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tokio::signal;
use tokio::sync::{Mutex, RwLock};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod models;
mod services;

use models::*;
use services::SettingsService;

type SharedStorage = Arc<dyn PresetStorage + Send + Sync>;

#[derive(Clone)]
struct AppState {
    settings: Arc<RwLock<DryerSettings>>,
    settings_service: SettingsService,
    storages: Arc<HashMap<Origin, SharedStorage>>,
    // Serializes syncs so concurrent saves cannot interleave removals and uploads.
    sync_lock: Arc<Mutex<()>>,
    metrics: Arc<Metrics>,
}

impl AppState {
    fn storage_for(&self, origin: Origin) -> anyhow::Result<SharedStorage> {
        self.storages
            .get(&origin)
            .cloned()
            .ok_or_else(|| anyhow!("no storage configured for origin {:?}", origin))
    }
}

struct Metrics {
    sync_runs_total: IntCounter,
    sync_errors_total: IntCounter,
    preset_files_written_total: IntCounter,
    preset_failures_total: IntCounter,
    last_sync_timestamp: IntGauge,
}

impl Metrics {
    fn new() -> prometheus::Result<Arc<Self>> {
        let sync_runs_total = IntCounter::new("filamentdryer_sync_runs_total", "Total preset sync runs")?;
        let sync_errors_total = IntCounter::new("filamentdryer_sync_errors_total", "Preset syncs aborted by a storage error")?;
        let preset_files_written_total = IntCounter::new("filamentdryer_preset_files_written_total", "Total preset files written")?;
        let preset_failures_total = IntCounter::new("filamentdryer_preset_failures_total", "Total presets that failed to sync")?;
        let last_sync_timestamp = IntGauge::new("filamentdryer_last_sync_timestamp", "Epoch seconds of the last completed sync")?;

        let registry = prometheus::default_registry();
        let _ = registry.register(Box::new(sync_runs_total.clone()));
        let _ = registry.register(Box::new(sync_errors_total.clone()));
        let _ = registry.register(Box::new(preset_files_written_total.clone()));
        let _ = registry.register(Box::new(preset_failures_total.clone()));
        let _ = registry.register(Box::new(last_sync_timestamp.clone()));

        Ok(Arc::new(Self {
            sync_runs_total,
            sync_errors_total,
            preset_files_written_total,
            preset_failures_total,
            last_sync_timestamp,
        }))
    }

    fn record(&self, report: &SyncReport) {
        self.sync_runs_total.inc();
        self.preset_files_written_total.inc_by(report.written() as u64);
        self.preset_failures_total.inc_by(report.failed() as u64);
        self.last_sync_timestamp.set(chrono::Utc::now().timestamp());
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    init_tracing();

    let db = init_db().await.context("failed to init db")?;
    let settings_service = SettingsService::new(db);
    settings_service.ensure_schema().await?;
    let (settings, updated_at) = settings_service.load_or_init(DryerSettings::from_env()).await?;
    info!(%updated_at, directory = %settings.preset_directory, presets = settings.presets.len(), "Loaded settings");

    let storage_root = std::env::var("FILAMENTDRYER_STORAGE_ROOT").unwrap_or_else(|_| "./data/files".to_string());
    info!(root = %storage_root, "Using local preset storage");
    let mut storages: HashMap<Origin, SharedStorage> = HashMap::new();
    storages.insert(Origin::Local, Arc::new(LocalStorage::new(PathBuf::from(storage_root))));

    let state = AppState {
        settings: Arc::new(RwLock::new(settings)),
        settings_service,
        storages: Arc::new(storages),
        sync_lock: Arc::new(Mutex::new(())),
        metrics: Metrics::new()?,
    };

    // Initial sync, same as after host startup
    if let Err(e) = run_sync(&state).await {
        tracing::error!(?e, "Initial preset sync failed");
    }

    let app = router(state);

    let addr: SocketAddr = std::env::var("FILAMENTDRYER_HTTP_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        .parse()
        .context("invalid FILAMENTDRYER_HTTP_ADDR")?;

    info!(%addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/version", get(version))
        .route("/metrics", get(metrics_handler))
        .route("/api/settings", get(api_get_settings).post(api_save_settings))
        .route("/api/sync", post(api_sync))
        .route("/api/presets", get(api_list_presets))
        .route("/api/presets/:index/script", get(api_preset_script))
        .route("/api/files", get(api_list_files))
        .with_state(state)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,axum=info,hyper=info,sqlx=warn"))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(?e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                tracing::error!(?e, "failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn init_db() -> Result<SqlitePool, sqlx::Error> {
    let path = std::env::var("FILAMENTDRYER_DB_PATH").unwrap_or_else(|_| "./data/filamentdryer.db".to_string());
    // Ensure parent directory exists
    if let Some(parent) = std::path::Path::new(&path).parent() { let _ = std::fs::create_dir_all(parent); }
    let url = format!("sqlite://{}?mode=rwc", path);
    let pool = match SqlitePoolOptions::new().max_connections(5).connect(&url).await {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = ?e, "Failed to open SQLite at path; falling back to in-memory DB");
            SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await?
        }
    };
    let _ = sqlx::query("PRAGMA journal_mode=WAL;").execute(&pool).await;
    Ok(pool)
}

/// Runs one sync against the current settings snapshot.
async fn run_sync(state: &AppState) -> anyhow::Result<SyncReport> {
    let _guard = state.sync_lock.lock().await;
    let settings = state.settings.read().await.clone();
    let storage = state.storage_for(settings.preset_origin)?;

    let result = tokio::task::spawn_blocking(move || sync_presets(&settings, storage.as_ref())).await?;
    match result {
        Ok(report) => {
            state.metrics.record(&report);
            Ok(report)
        }
        Err(e) => {
            state.metrics.sync_errors_total.inc();
            Err(e.into())
        }
    }
}

enum SaveError {
    Invalid(serde_json::Error),
    Failed(anyhow::Error),
    /// The settings were stored and applied; only the sync after them failed.
    SyncFailed { settings: DryerSettings, error: anyhow::Error },
}

/// Merges `patch` into the settings, persists them and re-syncs.
async fn save_settings(state: &AppState, patch: &serde_json::Value) -> Result<(DryerSettings, SyncReport), SaveError> {
    let updated = {
        let mut current = state.settings.write().await;
        let updated = current.merged(patch).map_err(SaveError::Invalid)?;
        state.settings_service.save(&updated).await.map_err(SaveError::Failed)?;
        *current = updated.clone();
        updated
    };
    info!(presets = updated.presets.len(), "Settings saved");
    match run_sync(state).await {
        Ok(report) => Ok((updated, report)),
        Err(error) => Err(SaveError::SyncFailed { settings: updated, error }),
    }
}

async fn healthz() -> &'static str { "ok" }

async fn readyz(State(state): State<AppState>) -> StatusCode {
    if state.settings_service.ping().await { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE }
}

async fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "generator": filamentdryer_core::script::GENERATOR_VERSION,
    }))
}

async fn metrics_handler() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buf) {
        tracing::error!(?e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    ([(CONTENT_TYPE, encoder.format_type().to_string())], buf).into_response()
}

// ----- Settings and sync handlers -----

async fn api_get_settings(State(state): State<AppState>) -> Response {
    let settings = state.settings.read().await.clone();
    Json(settings).into_response()
}

async fn api_save_settings(State(state): State<AppState>, Json(patch): Json<serde_json::Value>) -> Response {
    if !patch.is_object() {
        return (StatusCode::BAD_REQUEST, "settings must be a JSON object").into_response();
    }
    match save_settings(&state, &patch).await {
        Ok((settings, report)) => Json(SaveSettingsResponse {
            settings,
            sync: Some(report.into()),
            sync_error: None,
        })
        .into_response(),
        Err(SaveError::Invalid(e)) => (StatusCode::BAD_REQUEST, format!("invalid settings: {}", e)).into_response(),
        Err(SaveError::Failed(e)) => {
            tracing::error!(?e, "Failed to save settings");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to save settings").into_response()
        }
        Err(SaveError::SyncFailed { settings, error }) => {
            tracing::error!(?error, "Settings saved but the preset sync failed");
            let body = SaveSettingsResponse {
                settings,
                sync: None,
                sync_error: Some(format!("{:#}", error)),
            };
            (StatusCode::MULTI_STATUS, Json(body)).into_response()
        }
    }
}

async fn api_sync(State(state): State<AppState>) -> Response {
    match run_sync(&state).await {
        Ok(report) => Json(SyncResponse::from(report)).into_response(),
        Err(e) => {
            tracing::error!(?e, "Failed to sync presets");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to sync presets").into_response()
        }
    }
}

// ----- Preset read APIs -----

async fn api_list_presets(State(state): State<AppState>) -> Response {
    let settings = state.settings.read().await.clone();
    let presets = settings
        .parsed_presets()
        .into_iter()
        .enumerate()
        .map(|(index, parsed)| PresetView::new(index, parsed, &settings.filename_template))
        .collect();
    Json(PresetsResponse { presets }).into_response()
}

async fn api_preset_script(Path(index): Path<usize>, State(state): State<AppState>) -> Response {
    let settings = state.settings.read().await.clone();
    let Some(raw) = settings.presets.get(index) else {
        return (StatusCode::NOT_FOUND, "no preset at that index").into_response();
    };
    let script = Preset::from_value(raw)
        .and_then(|p| p.to_request(settings.use_heated_bed, settings.use_heated_chamber))
        .and_then(|request| render(&request, &settings.script_options()));
    match script {
        Ok(buf) => ([(CONTENT_TYPE, "text/plain; charset=utf-8")], buf).into_response(),
        Err(e @ (DryerError::Validation(_) | DryerError::InvalidConfiguration(_) | DryerError::Encoding { .. })) => {
            (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()).into_response()
        }
        Err(e) => {
            tracing::error!(?e, index, "Failed to render preset script");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to render preset script").into_response()
        }
    }
}

async fn api_list_files(State(state): State<AppState>) -> Response {
    let settings = state.settings.read().await.clone();
    let storage = match state.storage_for(settings.preset_origin) {
        Ok(s) => s,
        Err(e) => return (StatusCode::NOT_FOUND, e.to_string()).into_response(),
    };
    let directory = settings.preset_folder();
    let dir = directory.clone();
    let listed = tokio::task::spawn_blocking(move || storage.list_files(&dir)).await;
    match listed {
        Ok(Ok(files)) => Json(FilesResponse { directory, files }).into_response(),
        Ok(Err(e)) => {
            tracing::warn!(?e, "Failed to list preset files");
            (StatusCode::NOT_FOUND, e.to_string()).into_response()
        }
        Err(e) => {
            tracing::error!(?e, "File listing task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
