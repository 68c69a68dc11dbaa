//! # Telemetry
//!
//! Logging through `tracing` is always on: events and spans are printed by
//! the `tracing_subscriber` fmt layer, filtered by `RUST_LOG` (default
//! `info`). OpenTelemetry export is opt-in.
//!
//! ## Feature matrix
//!
//! - `otel`: exports spans over OTLP/gRPC.
//! - `metrics`: exports counters and histograms over OTLP/gRPC.
//!
//! The exporter endpoint comes from the standard OpenTelemetry environment
//! (`OTEL_EXPORTER_OTLP_ENDPOINT`, default `http://localhost:4317`).
//!
//! ## Metrics
//!
//! - `aggregations` / `aggregation_errors`: calls to the coordinator.
//! - `aggregation_duration` (ms): successful calls only.
//! - `connections_dialed`: new connections opened by the pool.
//! - `enrichment_misses`: users the points service had no balance for.
//!
//! Without `metrics` every recording function below compiles to a no-op.
//!
//! ```bash
//! cargo run --bin userstats-server --features otel,metrics
//! ```

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(any(feature = "metrics", feature = "otel"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(any(feature = "metrics", feature = "otel"))]
use opentelemetry_otlp::{Protocol, WithExportConfig};
#[cfg(any(feature = "metrics", feature = "otel"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "metrics", feature = "otel"))]
use opentelemetry_semantic_conventions as semvcns;

#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Histogram, Meter};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

#[cfg(feature = "otel")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "otel")]
use opentelemetry_sdk::propagation::TraceContextPropagator;
#[cfg(feature = "otel")]
use opentelemetry_sdk::trace as sdktrace;

#[cfg(any(feature = "metrics", feature = "otel"))]
const EXPORT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Providers that must outlive the server so buffered telemetry is flushed.
pub struct TelemetryProviders {
    #[cfg(feature = "otel")]
    pub tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes and shuts down every exporter. Errors are reported on stderr
    /// since the subscriber may already be gone.
    pub fn shutdown(self) {
        #[cfg(feature = "otel")]
        {
            if let Err(err) = self.tracer_provider.force_flush() {
                eprintln!("Error flushing traces: {err:#?}");
            }
            if let Err(err) = self.tracer_provider.shutdown() {
                eprintln!("Error shutting down tracer: {err:#?}");
            }
        }

        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {err:#?}");
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {err:#?}");
            }
        }
    }
}

/// Installs the global subscriber for `service_name`.
///
/// # Errors
///
/// Fails if an exporter cannot be built.
pub fn init_telemetry(service_name: &'static str) -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "otel")]
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    #[cfg(feature = "otel")]
    let tracer_provider = init_tracer(service_name)?;

    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics(service_name)?;

    #[cfg(any(feature = "metrics", feature = "otel"))]
    let scope = InstrumentationScope::builder(service_name)
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build();

    #[cfg(not(any(feature = "metrics", feature = "otel")))]
    let _ = service_name;

    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true),
        );

    #[cfg(feature = "otel")]
    let registry = {
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        registry.with(
            tracing_opentelemetry::layer()
                .with_tracer(tracer_provider.tracer_with_scope(scope.clone()))
                .with_error_records_to_exceptions(true),
        )
    };

    #[cfg(feature = "metrics")]
    let registry = {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        let meter = opentelemetry::global::meter_with_scope(scope);
        init_metric_handles(&meter);

        registry.with(tracing_opentelemetry::MetricsLayer::new(
            meter_provider.clone(),
        ))
    };

    registry.init();

    Ok(TelemetryProviders {
        #[cfg(feature = "otel")]
        tracer_provider,
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

#[cfg(any(feature = "metrics", feature = "otel"))]
fn resource(service_name: &'static str) -> Resource {
    Resource::builder()
        .with_service_name(service_name)
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "metrics")]
fn init_metrics(service_name: &'static str) -> anyhow::Result<sdkmetrics::SdkMeterProvider> {
    use anyhow::Context;

    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_protocol(Protocol::Grpc)
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("failed to build metrics exporter")?;

    Ok(sdkmetrics::SdkMeterProvider::builder()
        .with_resource(resource(service_name))
        .with_periodic_exporter(exporter)
        .build())
}

#[cfg(feature = "otel")]
fn init_tracer(service_name: &'static str) -> anyhow::Result<sdktrace::SdkTracerProvider> {
    use anyhow::Context;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_protocol(Protocol::Grpc)
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("failed to build span exporter")?;

    let batch = sdktrace::BatchSpanProcessor::builder(exporter)
        .with_batch_config(
            sdktrace::BatchConfigBuilder::default()
                .with_scheduled_delay(std::time::Duration::from_secs(5))
                .with_max_queue_size(2048)
                .build(),
        )
        .build();

    Ok(sdktrace::SdkTracerProvider::builder()
        .with_resource(resource(service_name))
        .with_span_processor(batch)
        .build())
}

#[cfg(feature = "metrics")]
static AGGREGATIONS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static AGGREGATION_ERRORS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static AGGREGATION_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static CONNECTIONS_DIALED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static ENRICHMENT_MISSES: OnceLock<Counter<u64>> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: &Meter) {
    let _ = AGGREGATIONS.set(
        meter
            .u64_counter("aggregations")
            .with_description("Aggregation calls started")
            .build(),
    );

    let _ = AGGREGATION_ERRORS.set(
        meter
            .u64_counter("aggregation_errors")
            .with_description("Aggregation calls that failed")
            .build(),
    );

    let _ = AGGREGATION_DURATION_MS.set(
        meter
            .f64_histogram("aggregation_duration")
            .with_unit("ms")
            .with_description("End-to-end duration of successful aggregations")
            .build(),
    );

    let _ = CONNECTIONS_DIALED.set(
        meter
            .u64_counter("connections_dialed")
            .with_description("Connections opened to the points service")
            .build(),
    );

    let _ = ENRICHMENT_MISSES.set(
        meter
            .u64_counter("enrichment_misses")
            .with_description("Users without a balance in the points service")
            .build(),
    );
}

#[cfg(feature = "metrics")]
pub fn increment_aggregations() {
    if let Some(counter) = AGGREGATIONS.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_aggregations() {}

#[cfg(feature = "metrics")]
pub fn increment_aggregation_errors() {
    if let Some(counter) = AGGREGATION_ERRORS.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_aggregation_errors() {}

#[cfg(feature = "metrics")]
pub fn record_aggregation_duration(duration_ms: f64) {
    if let Some(histogram) = AGGREGATION_DURATION_MS.get() {
        histogram.record(duration_ms, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_aggregation_duration(_duration_ms: f64) {}

#[cfg(feature = "metrics")]
pub fn increment_connections_dialed() {
    if let Some(counter) = CONNECTIONS_DIALED.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_connections_dialed() {}

#[cfg(feature = "metrics")]
pub fn record_enrichment_misses(count: u64) {
    if let Some(counter) = ENRICHMENT_MISSES.get() {
        counter.add(count, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_enrichment_misses(_count: u64) {}
