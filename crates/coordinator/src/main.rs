use anyhow::{Context, Result};
use coordinator::{
  config::CoordinatorConfig,
  face_client::HttpFaceClient,
  pg_store::PgAttendanceStore,
  routes,
  state::CoordinatorState,
  store::AttendanceStore,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
  telemetry::init();

  let config = CoordinatorConfig::from_env();
  info!(
    bind = %config.bind_addr,
    face_service = %config.face_service_url,
    threshold = config.default_recognition_threshold,
    "coordinator configuration"
  );

  let database_url = config
    .database_url
    .clone()
    .context("DATABASE_URL must be set")?;

  let pool = PgPoolOptions::new()
    .max_connections(10)
    .connect(&database_url)
    .await
    .context("failed to connect to Postgres")?;

  sqlx::migrate!("./migrations")
    .run(&pool)
    .await
    .context("failed to run migrations")?;
  info!("database migrations applied");

  let store: Arc<dyn AttendanceStore> = Arc::new(PgAttendanceStore::new(pool));
  let face_client = Arc::new(
    HttpFaceClient::new(&config.face_service_url, config.face_service_timeout_secs)
      .map_err(|e| anyhow::anyhow!("failed to build face client: {e}"))?,
  );

  let state = CoordinatorState::new(config.clone(), store, face_client);
  let app = routes::router(state);

  let listener = TcpListener::bind(&config.bind_addr).await?;
  info!("coordinator listening on {}", config.bind_addr);

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;

  Ok(())
}

async fn shutdown_signal() {
  let ctrl_c = async {
    let _ = tokio::signal::ctrl_c().await;
  };

  #[cfg(unix)]
  let terminate = async {
    use tokio::signal::unix::{signal, SignalKind};
    if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
      let _ = sigterm.recv().await;
    }
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = ctrl_c => {},
    _ = terminate => {},
  }

  info!("shutdown signal received");
}
