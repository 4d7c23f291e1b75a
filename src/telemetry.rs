//! Telemetry logic.
//! Logs go to stdout and, when an endpoint is configured, to an OTLP collector.
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::LogExporter;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::{SdkLogger, SdkLoggerProvider};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::Telemetry;

type Error = Box<dyn std::error::Error + Send + Sync>;

fn ressources() -> Resource {
    Resource::builder().with_service_name("shiori-auth").build()
}

/// Create OLTP exporter for logs.
pub fn setup_logging(
    endpoint: &str,
) -> Result<
    (
        OpenTelemetryTracingBridge<SdkLoggerProvider, SdkLogger>,
        SdkLoggerProvider,
    ),
    Error,
> {
    let exporter = LogExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let provider: SdkLoggerProvider = SdkLoggerProvider::builder()
        .with_resource(ressources())
        .with_batch_exporter(exporter)
        .build();

    Ok((OpenTelemetryTracingBridge::new(&provider), provider))
}

/// Install the global subscriber.
///
/// Verbosity follows `RUST_LOG` and defaults to `info`. The returned provider
/// must be shut down before exit to flush pending logs.
pub fn init(config: Option<&Telemetry>) -> Result<Option<SdkLoggerProvider>, Error> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let (bridge, provider) =
        match config.and_then(|t| t.otlp_endpoint.as_deref()) {
            Some(endpoint) => {
                let (bridge, provider) = setup_logging(endpoint)?;
                (Some(bridge), Some(provider))
            },
            None => (None, None),
        };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(bridge)
        .try_init()?;

    Ok(provider)
}
