use crate::config::{Config, MetricsConfig};
use luma_netselect::handler::routes;
use luma_netselect::{MemoryEngine, RequestHandler};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use warp::http::StatusCode;
use warp::path::FullPath;
use warp::Filter;

/// Runs a storage node answering internal select requests until ctrl-c.
pub async fn run(config: Config) -> Result<(), anyhow::Error> {
    if config.metrics.enabled {
        let conf = config.metrics.clone();
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(conf).await {
                error!(error = %e, "metrics server failed");
            }
        });
    }

    let engine = match &config.server.data_file {
        Some(path) => {
            let engine = MemoryEngine::load_json_lines(path)?;
            info!(path = %path.display(), rows = engine.len().await, "loaded rows");
            engine
        }
        None => MemoryEngine::new(),
    };

    let handler = Arc::new(
        RequestHandler::new(Arc::new(engine))
            .with_flush_threshold(config.server.flush_threshold_bytes),
    );
    let routes = routes(handler).with(warp::trace::request());

    let (addr, server) = warp::serve(routes)
        .try_bind_with_graceful_shutdown(config.server.listen_addr, shutdown_signal())?;
    info!(%addr, "storage node listening");
    server.await;
    info!("storage node stopped");
    Ok(())
}

async fn start_metrics_server(conf: MetricsConfig) -> Result<(), anyhow::Error> {
    let path = conf.path.clone();
    let metrics_route = warp::get()
        .and(warp::path::full())
        .and_then(move |full: FullPath| {
            let matches = full.as_str() == path;
            async move {
                if !matches {
                    return Err(warp::reject::not_found());
                }
                let reply = match luma_netselect::metrics::render() {
                    Ok(text) => warp::reply::with_status(text, StatusCode::OK),
                    Err(e) => {
                        warp::reply::with_status(e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                    }
                };
                Ok(reply)
            }
        });

    let (addr, server) = warp::serve(metrics_route)
        .try_bind_with_graceful_shutdown(conf.listen_addr, shutdown_signal())?;
    info!(%addr, path = %conf.path, "metrics server listening");
    server.await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
