use anyhow::{Context, Result};
use sluice_service::config::Config;
use sluice_service::metric;
use tokio::net::TcpListener;

use crate::endpoints;
use crate::service::FileService;

/// Starts the HTTP server based on the loaded config, and runs it until ctrl-c.
pub fn run(config: Config) -> Result<()> {
    // Log this metric before actually starting the server. This allows to see restarts even if
    // service creation fails.
    metric!(counter("server.starting") += 1);

    let megs = 1024 * 1024;
    let web_pool = tokio::runtime::Builder::new_multi_thread()
        .thread_name("sluice-web")
        .enable_all()
        .thread_stack_size(8 * megs)
        .build()?;

    web_pool.block_on(serve(config))?;
    tracing::info!("System shutdown complete");

    Ok(())
}

async fn serve(config: Config) -> Result<()> {
    let service = FileService::create(config).context("failed to create service state")?;

    let bind = &service.config().bind;
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind to {bind}"))?;
    tracing::info!("Starting HTTP server on {}", listener.local_addr()?);

    serve_until(listener, service, shutdown_signal()).await
}

/// Serves requests on `listener` until `signal` resolves, then shuts the service down.
///
/// Deferred requests are cancelled as soon as the signal fires, so their clients get an error
/// response instead of keeping the graceful shutdown waiting.
async fn serve_until<F>(listener: TcpListener, service: FileService, signal: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let requester = service.requester().clone();
    let signal = async move {
        signal.await;
        tracing::info!("Shutting down");
        requester.shutdown().await;
    };

    axum::serve(listener, endpoints::create_app(service.clone()))
        .with_graceful_shutdown(signal)
        .await
        .context("server failed")?;

    service.shutdown().await
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(
            error = &err as &dyn std::error::Error,
            "failed to listen for ctrl-c, graceful shutdown is unavailable"
        );
        std::future::pending::<()>().await;
    }
}
