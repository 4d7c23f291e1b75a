use shiori_auth::config::Configuration;
use shiori_auth::{app, initialize_state, telemetry};

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

const CONFIG_PATH_ENV: &str = "CONFIG_PATH";
const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[tokio::main]
async fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    let path = std::env::var(CONFIG_PATH_ENV)
        .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let config = Configuration::default().path(path).read();

    let provider = match telemetry::init(
        config.as_ref().ok().and_then(|c| c.telemetry.as_ref()),
    ) {
        Ok(provider) => provider,
        Err(err) => {
            eprintln!("cannot initialize telemetry: {err}");
            std::process::exit(1);
        },
    };

    let config = match config {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "cannot read configuration");
            std::process::exit(1);
        },
    };
    let state = match initialize_state(&config).await {
        Ok(state) => state,
        Err(err) => {
            tracing::error!(error = %err, "cannot start authentication service");
            std::process::exit(1);
        },
    };

    let address = &config.address;
    let listener = match tokio::net::TcpListener::bind(address.as_str()).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(%address, error = %err, "cannot bind address");
            std::process::exit(1);
        },
    };
    tracing::info!(name = %config.name, %address, "listening");

    if let Err(err) = axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %err, "server stopped");
    }

    if let Some(provider) = provider {
        if let Err(err) = provider.shutdown() {
            eprintln!("cannot flush logs: {err}");
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
