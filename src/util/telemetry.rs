use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::{self, Protocol, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::util::env::{Env, LogFormat};

pub type Result<T> = core::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Console logging plus, when `OTEL_EXPORTER_OTLP_ENDPOINT` is set, span export to a collector
#[derive(Debug, Clone)]
pub struct Telemetry {
    pub service_name: String,
    pub log_filter: String,
    pub log_format: LogFormat,

    tracer_provider: Option<SdkTracerProvider>,
}

impl Telemetry {
    pub fn new(env: &Env) -> Result<Telemetry> {
        let service_version = env!("CARGO_PKG_VERSION");

        let tracer_provider = match env.otel_exporter_otlp_endpoint.as_deref() {
            Some(collector_url) => Some(build_tracer_provider(
                collector_url,
                base_attrs(env.api_service_name.clone(), service_version),
            )?),
            None => None,
        };

        Ok(Self {
            service_name: env.api_service_name.clone(),
            log_filter: env.log_filter.clone(),
            log_format: env.log_format,
            tracer_provider,
        })
    }

    /// Installs the global subscriber. Fails if one is already installed.
    pub fn register(self) -> Result<Self> {
        let filter = EnvFilter::try_new(&self.log_filter)?;

        let pretty_layer = (self.log_format == LogFormat::Pretty).then(|| {
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
        });
        let json_layer = (self.log_format == LogFormat::Json).then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_target(true)
        });
        let trace_layer = self.tracer_provider.as_ref().map(|provider| {
            tracing_opentelemetry::layer().with_tracer(provider.tracer(self.service_name.clone()))
        });

        tracing_subscriber::registry()
            .with(filter)
            .with(pretty_layer)
            .with(json_layer)
            .with(trace_layer)
            .try_init()?;

        if self.tracer_provider.is_some() {
            tracing::info!(service = %self.service_name, "exporting spans over otlp");
        }

        Ok(self)
    }

    pub fn shutdown(self) {
        let Some(provider) = self.tracer_provider else {
            return;
        };

        if let Err(e) = provider.shutdown() {
            eprintln!("error during tracing shutdown: {e:?}");
        } else {
            println!("tracing shut down ok");
        }
    }
}

pub fn build_tracer_provider(
    collector_url: &str,
    base_resource: Resource,
) -> Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_protocol(Protocol::Grpc)
        .with_endpoint(collector_url)
        .with_timeout(Duration::from_secs(5))
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(base_resource)
        .build())
}

fn base_attrs(name: String, version: &'static str) -> Resource {
    Resource::builder()
        .with_service_name(name)
        .with_attributes([KeyValue::new("service.version", version)])
        .build()
}
