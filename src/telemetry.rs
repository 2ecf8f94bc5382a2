use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::__tracing_subscriber_SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the fmt subscriber, filtered by `RUST_LOG` (default `info`).
/// Later calls are ignored.
pub fn init_tracing(service_name: &str) {
    let installed = tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok();
    if installed {
        tracing::info!(service = service_name, "tracing initialized");
    }
}

/// Like [`init_tracing`], with spans also exported over OTLP/HTTP to `endpoint`.
#[cfg(feature = "remote")]
pub fn init_tracing_otlp(service_name: &str, endpoint: &str) -> Result<(), crate::HarnessError> {
    use opentelemetry::KeyValue;
    use opentelemetry::trace::TracerProvider;
    use opentelemetry_otlp::{Protocol, WithExportConfig};
    use opentelemetry_sdk::{Resource, trace as sdktrace};

    let otlp_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| crate::HarnessError::Other(format!("failed to build OTLP exporter: {}", e)))?;
    let resource = Resource::builder_empty()
        .with_attributes(vec![KeyValue::new("service.name", service_name.to_string())])
        .build();
    let tracer_provider = sdktrace::SdkTracerProvider::builder()
        .with_simple_exporter(otlp_exporter)
        .with_resource(resource)
        .build();
    let tracer = tracer_provider.tracer(service_name.to_string());
    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
    tracing_subscriber::registry()
        .with(env_filter())
        .with(otel_layer)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| crate::HarnessError::Other(format!("tracing already initialized: {}", e)))?;
    Ok(())
}
