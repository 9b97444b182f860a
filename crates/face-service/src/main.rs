use anyhow::Result;
use face_service::{api, FaceServiceConfig, FaceServiceState};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init();

    info!("Starting face service...");

    let config = FaceServiceConfig::from_env()?;
    info!(
        bind = %config.bind_addr,
        node_id = %config.node_id,
        models_dir = %config.models_dir.display(),
        detector = %config.detector_model,
        embedder = %config.embedder_model,
        detection_threshold = config.detection_threshold,
        min_face_size = config.min_face_size,
        max_faces = config.max_faces,
        min_quality_score = config.min_quality_score,
        liveness_movement_threshold = config.liveness_movement_threshold,
        request_timeout_secs = config.request_timeout_secs,
        "face service configuration"
    );

    let state = FaceServiceState::new(config.clone());

    match state.warmup().await {
        Ok(()) => info!("models loaded and warmed up"),
        Err(e) => warn!(
            error = %e,
            "starting without models - pipeline endpoints will fail until model files are present"
        ),
    }

    let app = api::router(state.clone());

    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("face service listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.clear_models();
    info!("face service shutdown complete");

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
