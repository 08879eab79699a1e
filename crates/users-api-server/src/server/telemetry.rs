//! # Telemetry Features
//!
//! Console logging through `tracing-subscriber` is always on. OpenTelemetry
//! export is optional and selected with cargo features.
//!
//! ## Feature matrix
//!
//! - `traces`: OpenTelemetry distributed tracing (spans via
//!   `tracing-opentelemetry`).
//! - `metrics`: OpenTelemetry metrics recorded by [`ServiceMetrics`].
//! - `otlp`: OTLP/gRPC exporter. Endpoint, headers and compression come from
//!   the standard `OTEL_EXPORTER_OTLP_*` variables, read by the exporter
//!   itself; without an endpoint it targets `http://localhost:4317`.
//! - `stdout`: stdout exporter, useful locally.
//!
//! ## Feature constraints
//!
//! - Exporters require at least one of `traces` or `metrics`.
//! - `otlp` and `stdout` can be enabled together.
//!
//! ## Provider lifetime
//!
//! No global tracer or meter provider is installed. [`TelemetryProviders`]
//! owns both providers; the supervisor hands a [`ServiceMetrics`] handle to
//! the gRPC service and calls [`TelemetryProviders::shutdown`] as the last
//! drain step. Dropping the providers without an explicit shutdown flushes
//! them as well, so every exit path releases them.
//!
//! ## Example usage
//!
//! ```bash
//! OTEL_EXPORTER_OTLP_ENDPOINT=https://collector:4317 \
//!   cargo run --features traces,metrics,otlp
//! cargo run --features traces,stdout
//! ```

#[cfg(all(feature = "otlp", not(any(feature = "traces", feature = "metrics"))))]
compile_error!("The 'otlp' feature requires at least one of 'traces' or 'metrics' to be enabled.");

#[cfg(all(feature = "stdout", not(any(feature = "traces", feature = "metrics"))))]
compile_error!(
    "The 'stdout' feature requires at least one of 'traces' or 'metrics' to be enabled."
);

use crate::server::config::{LogFormat, TelemetryConfig};
use anyhow::Context;
use core::time::Duration;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(all(feature = "otlp", any(feature = "metrics", feature = "traces")))]
use opentelemetry_otlp::{WithExportConfig, WithTonicConfig};
#[cfg(all(feature = "otlp", feature = "metrics"))]
use opentelemetry_sdk::metrics::Temporality;
#[cfg(all(feature = "otlp", any(feature = "metrics", feature = "traces")))]
use tonic::transport::ClientTlsConfig;

#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Histogram, MeterProvider};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;

#[cfg(any(feature = "metrics", feature = "traces"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(any(feature = "metrics", feature = "traces"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "metrics", feature = "traces"))]
use opentelemetry_semantic_conventions as semvcns;

#[cfg(feature = "traces")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "traces")]
use opentelemetry_sdk::trace as sdktrace;

/// Owned handles to the OpenTelemetry providers.
pub struct TelemetryProviders {
    #[cfg(feature = "traces")]
    tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "metrics")]
    meter_provider: sdkmetrics::SdkMeterProvider,
    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    service_name: String,
    closed: bool,
}

impl TelemetryProviders {
    /// Builds the providers for the enabled features without installing any
    /// subscriber.
    pub fn new(config: &TelemetryConfig) -> anyhow::Result<Self> {
        Ok(Self {
            #[cfg(feature = "traces")]
            tracer_provider: init_tracer(&config.service_name)?,
            #[cfg(feature = "metrics")]
            meter_provider: init_metrics(&config.service_name)?,
            service_name: config.service_name.clone(),
            closed: false,
        })
    }

    /// Returns the metric instruments used by the gRPC service.
    pub fn service_metrics(&self) -> ServiceMetrics {
        #[cfg(feature = "metrics")]
        {
            let meter = self.meter_provider.meter_with_scope(scope(&self.service_name));
            ServiceMetrics::from_meter(&meter)
        }
        #[cfg(not(feature = "metrics"))]
        ServiceMetrics::default()
    }

    /// Flushes pending telemetry and shuts the providers down. Later calls
    /// are no-ops.
    ///
    /// Every provider is attempted even if an earlier one fails; the returned
    /// error lists all failures.
    pub fn shutdown(&mut self) -> anyhow::Result<()> {
        if core::mem::replace(&mut self.closed, true) {
            return Ok(());
        }

        #[allow(unused_mut)]
        let mut failures: Vec<String> = Vec::new();

        #[cfg(feature = "traces")]
        {
            if let Err(err) = self.tracer_provider.force_flush() {
                failures.push(format!("flushing traces: {err}"));
            }
            if let Err(err) = self.tracer_provider.shutdown() {
                failures.push(format!("shutting down tracer: {err}"));
            }
        }

        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                failures.push(format!("flushing metrics: {err}"));
            }
            if let Err(err) = self.meter_provider.shutdown() {
                failures.push(format!("shutting down meter: {err}"));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("telemetry shutdown failed: {}", failures.join("; "))
        }
    }
}

impl Drop for TelemetryProviders {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            eprintln!("Error shutting down telemetry: {err:#}");
        }
    }
}

/// Builds the providers and installs the global `tracing` subscriber.
///
/// Console output is always enabled and is unrelated to the `stdout`
/// exporter; it prints spans and events as they happen. The filter comes from
/// `RUST_LOG` and defaults to `info`.
pub fn init_telemetry(config: &TelemetryConfig) -> anyhow::Result<TelemetryProviders> {
    let providers = TelemetryProviders::new(config)?;

    let (pretty, json) = match config.log_format {
        LogFormat::Pretty => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_thread_ids(true)
                    .with_line_number(true)
                    .with_target(false)
                    .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                    .with_file(true)
                    .pretty(),
            ),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .with_thread_ids(true)
                    .with_line_number(true)
                    .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                    .with_file(true)
                    .json(),
            ),
        ),
    };

    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(pretty)
        .with(json);

    #[cfg(feature = "traces")]
    let registry = registry.with(
        tracing_opentelemetry::layer()
            .with_tracer(
                providers
                    .tracer_provider
                    .tracer_with_scope(scope(&config.service_name)),
            )
            .with_error_records_to_exceptions(true),
    );

    registry
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(providers)
}

/// Copies the OpenTelemetry trace and span ids of `span` into its `trace_id`
/// and `span_id` fields, so every log event emitted inside it carries them.
///
/// The fields stay empty without the `traces` feature or when the span has no
/// valid OpenTelemetry context.
pub fn record_trace_context(span: &tracing::Span) {
    #[cfg(feature = "traces")]
    {
        use opentelemetry::trace::TraceContextExt;
        use tracing_opentelemetry::OpenTelemetrySpanExt;

        let context = span.context();
        let otel_span = context.span();
        let span_context = otel_span.span_context();
        if span_context.is_valid() {
            span.record("trace_id", tracing::field::display(span_context.trace_id()));
            span.record("span_id", tracing::field::display(span_context.span_id()));
        }
    }
    #[cfg(not(feature = "traces"))]
    let _ = span;
}

/// Per-call metric instruments for the gRPC service.
///
/// Cloning is cheap. Without the `metrics` feature every method is a no-op.
#[derive(Clone, Default)]
pub struct ServiceMetrics {
    #[cfg(feature = "metrics")]
    instruments: Option<Instruments>,
}

#[cfg(feature = "metrics")]
#[derive(Clone)]
struct Instruments {
    requests: Counter<u64>,
    duration_ms: Histogram<f64>,
    users_created: Counter<u64>,
}

impl ServiceMetrics {
    #[cfg(feature = "metrics")]
    fn from_meter(meter: &opentelemetry::metrics::Meter) -> Self {
        Self {
            instruments: Some(Instruments {
                requests: meter
                    .u64_counter("rpc.requests")
                    .with_description("Completed gRPC calls by method and status code")
                    .build(),
                duration_ms: meter
                    .f64_histogram("rpc.duration")
                    .with_unit("ms")
                    .with_description("Server-side gRPC call duration")
                    .build(),
                users_created: meter
                    .u64_counter("users.created")
                    .with_description("Users inserted into the store")
                    .build(),
            }),
        }
    }

    #[cfg(feature = "metrics")]
    pub fn record_call(&self, method: &'static str, code: tonic::Code, elapsed: Duration) {
        if let Some(instruments) = &self.instruments {
            let attrs = [
                KeyValue::new("rpc.method", method),
                KeyValue::new("rpc.grpc.status_code", i64::from(code as i32)),
            ];
            instruments.requests.add(1, &attrs);
            instruments
                .duration_ms
                .record(elapsed.as_secs_f64() * 1000.0, &attrs);
        }
    }

    #[cfg(not(feature = "metrics"))]
    pub fn record_call(&self, _method: &'static str, _code: tonic::Code, _elapsed: Duration) {}

    #[cfg(feature = "metrics")]
    pub fn record_user_created(&self) {
        if let Some(instruments) = &self.instruments {
            instruments.users_created.add(1, &[]);
        }
    }

    #[cfg(not(feature = "metrics"))]
    pub fn record_user_created(&self) {}
}

#[cfg(any(feature = "metrics", feature = "traces"))]
fn scope(service_name: &str) -> InstrumentationScope {
    InstrumentationScope::builder(service_name.to_owned())
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build()
}

#[cfg(any(feature = "metrics", feature = "traces"))]
fn resource(service_name: &str) -> Resource {
    Resource::builder()
        .with_service_name(service_name.to_owned())
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
fn init_metrics(service_name: &str) -> anyhow::Result<sdkmetrics::SdkMeterProvider> {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource(service_name));

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::MetricExporter;
        let exporter = MetricExporter::default();
        let reader = opentelemetry_sdk::metrics::PeriodicReader::builder(exporter)
            .with_interval(Duration::from_secs(5))
            .build();

        builder.with_reader(reader)
    };

    #[cfg(feature = "otlp")]
    let builder = {
        let exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_tls_config(ClientTlsConfig::new().with_native_roots())
            .with_timeout(Duration::from_secs(10))
            .with_temporality(Temporality::Delta)
            .build()
            .context("failed to build metrics exporter")?;

        builder.with_periodic_exporter(exporter)
    };

    Ok(builder.build())
}

#[cfg(feature = "traces")]
fn init_tracer(service_name: &str) -> anyhow::Result<sdktrace::SdkTracerProvider> {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource(service_name));

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::SpanExporter;
        let batch = sdktrace::BatchSpanProcessor::builder(SpanExporter::default())
            .with_batch_config(
                sdktrace::BatchConfigBuilder::default()
                    .with_scheduled_delay(Duration::from_secs(5))
                    .with_max_queue_size(2048)
                    .build(),
            )
            .build();
        builder.with_span_processor(batch)
    };

    #[cfg(feature = "otlp")]
    let builder = {
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_tls_config(ClientTlsConfig::new().with_native_roots())
            .with_timeout(Duration::from_secs(10))
            .build()
            .context("failed to build tracer exporter")?;

        let batch = sdktrace::BatchSpanProcessor::builder(exporter)
            .with_batch_config(
                sdktrace::BatchConfigBuilder::default()
                    .with_scheduled_delay(Duration::from_secs(5))
                    .with_max_queue_size(2048)
                    .build(),
            )
            .build();

        builder.with_span_processor(batch)
    };

    Ok(builder.build())
}


#[cfg(test)]
mod tests {
    use super::{span_capture::SpanCapture, *};

    #[cfg(all(feature = "otlp", any(feature = "traces", feature = "metrics")))]
    #[tokio::test]
    async fn otlp_exporters_build_from_standard_environment() {
        // No endpoint is required; the exporter falls back to its default.
        let mut providers = TelemetryProviders::new(&TelemetryConfig::default()).unwrap();
        let _ = providers.shutdown();
    }

    #[test]
    fn trace_context_is_left_empty_without_an_otel_span() {
        let capture = SpanCapture::default();
        let subscriber = tracing_subscriber::registry().with(capture.clone());
        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!(
                "call",
                trace_id = tracing::field::Empty,
                span_id = tracing::field::Empty
            );
            record_trace_context(&span);
        });

        let call = capture.named("call").unwrap();
        assert!(!call.fields.contains_key("trace_id"));
        assert!(!call.fields.contains_key("span_id"));
    }

    #[cfg(feature = "traces")]
    #[test]
    fn trace_context_is_recorded_on_the_span() {
        let provider = sdktrace::SdkTracerProvider::builder().build();
        let capture = SpanCapture::default();
        let subscriber = tracing_subscriber::registry()
            .with(tracing_opentelemetry::layer().with_tracer(provider.tracer("test")))
            .with(capture.clone());
        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!(
                "call",
                trace_id = tracing::field::Empty,
                span_id = tracing::field::Empty
            );
            record_trace_context(&span);
        });

        let call = capture.named("call").unwrap();
        assert_eq!(call.fields["trace_id"].len(), 32);
        assert_eq!(call.fields["span_id"].len(), 16);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let mut providers = TelemetryProviders::new(&TelemetryConfig::default()).unwrap();
        providers.shutdown().unwrap();
        providers.shutdown().unwrap();
    }

    #[test]
    fn metrics_handle_records_without_panicking() {
        let providers = TelemetryProviders::new(&TelemetryConfig::default()).unwrap();
        let metrics = providers.service_metrics();
        metrics.record_call("CreateUser", tonic::Code::Ok, Duration::from_millis(3));
        metrics.record_user_created();
    }
}
