use crate::core::api::*;
use crate::core::complaints::ComplaintLog;
use crate::core::scheduler::Scheduler;

use axum::{
    error_handling::HandleErrorLayer,
    http::StatusCode,
    routing::{delete, get, post},
    Router,
};
use std::{future::Future, net::SocketAddr, sync::Arc};
use tokio::time;
use tower::{BoxError, ServiceBuilder};
use tower_http::trace::TraceLayer;

/// Routes exposing the snapshot, target management and the complaint log.
pub fn router(scheduler: Arc<Scheduler>, complaints: Arc<ComplaintLog>) -> Router {
    let app_state = Arc::new(AppState {
        scheduler,
        complaints,
    });
    // Compose the routes
    Router::new()
        .route("/snapshot", get(snapshot))
        .route("/summary", get(summary))
        .route("/targets", get(targets_index).post(target_register))
        .route("/targets/:name", delete(target_delete))
        .route("/targets/:name/reset", post(target_reset))
        .route("/targets/:name/poll", post(target_poll))
        .route("/targets/:name/history", get(target_history))
        .route("/complaints", get(complaints_index).post(complaint_submit))
        .route("/complaints/summary", get(complaints_summary))
        // Add middleware to all routes
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(|error: BoxError| async move {
                    if error.is::<tower::timeout::error::Elapsed>() {
                        Ok(StatusCode::REQUEST_TIMEOUT)
                    } else {
                        Err((
                            StatusCode::INTERNAL_SERVER_ERROR,
                            format!("Unhandled internal error: {}", error),
                        ))
                    }
                }))
                .timeout(time::Duration::from_secs(10))
                .layer(TraceLayer::new_for_http())
                .into_inner(),
        )
        .with_state(app_state)
}

/// Serves the API on `addr` until `shutdown` resolves.
pub async fn listen<F>(
    addr: SocketAddr,
    scheduler: Arc<Scheduler>,
    complaints: Arc<ComplaintLog>,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(scheduler, complaints);
    tracing::info!("listening on {}", addr);
    axum::Server::try_bind(&addr)?
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
