use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use settlement_gateway::{handlers, AppState, Config};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use webhooks::HttpTransport;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if std::env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false) {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing();

    info!("Starting Settlement Gateway...");

    let transport = HttpTransport::new(
        Duration::from_secs(config.webhooks.request_timeout_secs),
        &config.webhooks.user_agent,
    )
    .context("Failed to build webhook transport")?;

    let state = AppState::build(&config, Arc::new(transport));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = state.spawn_workers(&shutdown_rx);
    info!(workers = workers.len(), "Background workers started");

    let server = config.server.clone();
    info!("Starting HTTP server on {}:{}", server.host, server.port);

    let data = web::Data::new(state);
    HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header()
                    .max_age(3600),
            )
            .wrap(middleware::Logger::default())
            .configure(handlers::configure_routes)
    })
    .workers(server.workers)
    .bind((server.host.as_str(), server.port))
    .context("Failed to bind HTTP listener")?
    .run()
    .await?;

    info!("HTTP server stopped, draining workers");
    let _ = shutdown_tx.send(true);
    for handle in workers {
        if let Err(e) = handle.await {
            warn!("Worker task ended abnormally: {}", e);
        }
    }

    Ok(())
}
