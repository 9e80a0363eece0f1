use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use graphcore::RuntimeConfig;
use graphserver::AppState;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

const METRICS_UPKEEP: Duration = Duration::from_secs(5);

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🚀 Starting graph run server");

    let config_path = std::env::var_os("GRAPHRUN_CONFIG").map(PathBuf::from);
    let config = RuntimeConfig::load(config_path.as_deref())?;
    let bind_address = config.server.bind_address.clone();

    let app_state = web::Data::new(AppState::from_config(config)?);

    info!(
        "✅ Runtime initialized with the {} executor",
        app_state.runtime.executor().name()
    );
    let metrics = app_state.metrics.clone();
    actix_web::rt::spawn(async move {
        let mut ticker = tokio::time::interval(METRICS_UPKEEP);
        loop {
            ticker.tick().await;
            metrics.run_upkeep();
        }
    });

    info!("🌐 Server starting on http://{}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .configure(graphserver::configure)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    Ok(())
}
