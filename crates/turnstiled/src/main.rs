use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use turnstile_core::{Embedder, GeofencePolicy, OnnxEmbedder, TemplateStore};
use turnstiled::attendance::AttendanceLog;
use turnstiled::config::Config;
use turnstiled::db::Database;
use turnstiled::engine::{Engine, EnginePolicy};
use turnstiled::http::{build_router, AppState};
use turnstiled::sites::SiteRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "turnstiled starting");

    let config = Config::from_env();

    let db = Database::open(&config.db_path).await?;
    let persisted = db.load_templates().await?;
    tracing::info!(count = persisted.len(), "templates loaded from database");

    let store = Arc::new(TemplateStore::new(db, config.min_enroll_samples));
    store.hydrate(persisted).await;

    let sites = Arc::new(SiteRegistry::open(&config.sites_path)?);

    let embedder: Arc<dyn Embedder> = Arc::new(OnnxEmbedder::load(&config.arcface_model_path())?);

    let attendance = Arc::new(AttendanceLog::new(config.attendance_path.clone()));

    let policy = EnginePolicy {
        default_threshold: config.match_threshold,
        geofence: GeofencePolicy { max_accuracy_m: config.max_gps_accuracy_m },
        embed_timeout: Duration::from_secs(config.embed_timeout_secs),
    };
    let engine = Arc::new(Engine::new(
        Arc::clone(&store),
        Arc::clone(&sites),
        embedder,
        Arc::clone(&attendance),
        policy,
    ));

    let app = build_router(AppState { engine, store, sites, attendance });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "turnstiled listening");

    axum::serve(listener, app).await?;

    Ok(())
}
