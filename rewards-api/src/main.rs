//! Rewards HTTP server

use actix_web::{middleware, web, App, HttpServer};
use rewards_core::{Config, RewardsService};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.filter.clone()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = if let Ok(config_path) = std::env::var("REWARDS_CONFIG") {
        Config::from_file(&config_path)?
    } else {
        Config::from_env()?
    };

    init_tracing(&config);
    info!(
        service = %config.service_name,
        version = %config.service_version,
        "Rewards server starting"
    );

    let service = RewardsService::open(&config).await?;
    let service_data = web::Data::new(service);

    let listen_addr = config.http.listen_addr.clone();
    info!("Starting HTTP server on {}", listen_addr);

    let mut server = HttpServer::new(move || {
        App::new()
            .app_data(service_data.clone())
            .wrap(middleware::Logger::default())
            .wrap(middleware::NormalizePath::trim())
            .configure(rewards_api::configure_routes)
    });
    if config.http.workers > 0 {
        server = server.workers(config.http.workers);
    }

    server.bind(&listen_addr)?.run().await?;

    info!("Rewards server stopped");
    Ok(())
}
