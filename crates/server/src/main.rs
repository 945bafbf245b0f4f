use anyhow::Context;
use db::DBService;
use server::{AppState, router};
use services::services::{
    config::Config,
    crawler::CrawlerService,
    quotes::QuoteExpiryService,
};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    utils::log::init();

    let config = Config::from_env().context("loading configuration")?;

    let db = DBService::new(&config.database_url)
        .await
        .context("opening database")?;
    info!(database_url = %config.database_url, "Database ready");

    if config.crawler_enabled {
        CrawlerService::spawn(db.clone(), config.crawler.clone()).await;
    } else {
        info!("Crawler disabled by configuration");
    }
    QuoteExpiryService::spawn(db.clone()).await;

    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState::new(db, config)?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("Listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutting down");
}
