use crate::browser::BrowserLauncher;
use crate::pipeline::orchestrator::ScanOrchestrator;
use crate::web::{api, stream};
use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::{IpAddr, SocketAddr, TcpListener};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub fn router<L: BrowserLauncher>(orchestrator: ScanOrchestrator<L>) -> Router {
    Router::new()
        .route("/api/health", get(api::health))
        .route("/api/metadata", get(api::metadata::<L>))
        .route("/api/scan", get(stream::scan::<L>))
        .route(
            "/api/scans/:id",
            get(api::scan_status).delete(api::stop_scan_handler),
        )
        .route("/api/clean", post(api::clean))
        .layer(TraceLayer::new_for_http())
        .with_state(orchestrator)
}

pub async fn run_server<L: BrowserLauncher>(
    host: IpAddr,
    port: u16,
    orchestrator: ScanOrchestrator<L>,
) -> Result<()> {
    let mut current_port = port;
    let listener = loop {
        let addr = SocketAddr::new(host, current_port);
        match TcpListener::bind(addr) {
            Ok(listener) => {
                // Tokio requires a non-blocking socket
                listener.set_nonblocking(true)?;
                info!("Successfully bound to {}", addr);
                break listener;
            }
            Err(e) => {
                warn!("Failed to bind to {}: {}. Trying next port...", addr, e);
                current_port = current_port
                    .checked_add(1)
                    .ok_or_else(|| anyhow::anyhow!("No available ports found"))?;
            }
        }
    };

    let app = router(orchestrator);

    let tokio_listener = tokio::net::TcpListener::from_std(listener)?;
    info!(
        "Slide scanner server started on http://{:?}",
        tokio_listener.local_addr()?
    );

    axum::serve(tokio_listener, app).await?;

    Ok(())
}
