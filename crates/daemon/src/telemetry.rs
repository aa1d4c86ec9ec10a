//! Logging and optional OpenTelemetry export

use crate::config::{DaemonConfig, LogFormat};
use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

const DEFAULT_LOG_FILTER: &str = "ferry=info";
const LOG_FILE_PREFIX: &str = "ferry.log";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber
///
/// `RUST_LOG` overrides the default `ferry=info` filter. The returned guard
/// flushes the log file writer and must live until shutdown.
///
/// # Environment Variables
///
/// - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (e.g., http://localhost:4317)
/// - `OTEL_SERVICE_NAME`: Service name (default: ferry-daemon)
pub fn init_logging(config: &DaemonConfig) -> Result<Option<WorkerGuard>> {
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))?;

    let mut layers: Vec<BoxedLayer> = Vec::new();
    layers.push(match config.log_format {
        // Production: JSON structured logging
        LogFormat::Json => fmt::layer().json().boxed(),
        LogFormat::Pretty => fmt::layer().pretty().boxed(),
    });

    let guard = match &config.log_dir {
        Some(dir) => {
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX));
            layers.push(fmt::layer().json().with_ansi(false).with_writer(writer).boxed());
            Some(guard)
        }
        None => None,
    };

    #[cfg(feature = "telemetry")]
    if let Some(layer) = otel_layer()? {
        layers.push(layer);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()?;

    #[cfg(not(feature = "telemetry"))]
    if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        tracing::warn!("OpenTelemetry endpoint set but feature 'telemetry' not enabled");
    }

    Ok(guard)
}

#[cfg(feature = "telemetry")]
fn otel_layer() -> Result<Option<BoxedLayer>> {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_otlp::WithExportConfig;

    let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") else {
        return Ok(None);
    };
    let service_name =
        std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "ferry-daemon".to_string());

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let provider = opentelemetry_sdk::trace::TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .build();
    let tracer = provider.tracer(service_name);
    opentelemetry::global::set_tracer_provider(provider);

    Ok(Some(tracing_opentelemetry::layer().with_tracer(tracer).boxed()))
}
