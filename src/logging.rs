use color_eyre::Result;
use color_eyre::eyre::Context;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const SERVICE_NAME: &str = "setlist-sync";

/// Installs the global subscriber. When `otlp_endpoint` is set, spans are also
/// exported over OTLP/gRPC and the returned provider must be shut down on exit.
pub fn init_tracing(
    filter: &str,
    otlp_endpoint: Option<&str>,
) -> Result<Option<SdkTracerProvider>> {
    let filter_layer = EnvFilter::try_new(filter).wrap_err("Failed to create tracing filter")?;
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let Some(endpoint) = otlp_endpoint else {
        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .init();
        return Ok(None);
    };

    let tracer_provider = otlp_tracer_provider(endpoint)?;
    opentelemetry::global::set_tracer_provider(tracer_provider.clone());
    let telemetry_layer =
        tracing_opentelemetry::layer().with_tracer(opentelemetry::global::tracer(SERVICE_NAME));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(telemetry_layer)
        .init();

    Ok(Some(tracer_provider))
}

fn otlp_tracer_provider(endpoint: &str) -> Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .wrap_err("Failed to create OTLP span exporter")?;

    let resource = Resource::builder()
        .with_attributes(vec![KeyValue::new(
            opentelemetry_semantic_conventions::resource::SERVICE_NAME,
            SERVICE_NAME,
        )])
        .build();

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build())
}
