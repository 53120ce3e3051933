//! Logging and trace export.
//!
//! Diffs and the summary own stdout, so every log line goes to stderr.

use std::io::IsTerminal;

use anyhow::{bail, Context, Result};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::{
	SpanExporter, OTEL_EXPORTER_OTLP_ENDPOINT, OTEL_EXPORTER_OTLP_PROTOCOL,
	OTEL_EXPORTER_OTLP_PROTOCOL_DEFAULT, OTEL_EXPORTER_OTLP_TRACES_ENDPOINT,
};
use opentelemetry_sdk::{trace::SdkTracerProvider, Resource};
use tracing::{Level, Subscriber};
use tracing_subscriber::{
	layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt, EnvFilter, Layer,
};

const SERVICE_NAME: &str = "kdiff";

/// Not exported by opentelemetry_sdk.
const OTEL_SERVICE_NAME: &str = "OTEL_SERVICE_NAME";

/// Level of kdiff's own events for a `-v` count.
pub fn verbosity_level(verbose: u8) -> Level {
	match verbose {
		0 => Level::WARN,
		1 => Level::INFO,
		2 => Level::DEBUG,
		_ => Level::TRACE,
	}
}

/// Filter directives for the subscriber.
///
/// `--log-level` applies to everything and wins over `RUST_LOG`. Without
/// either, the `-v` count sets kdiff's level and dependencies stay at warn
/// so that `-vv` does not drown the diff in client chatter.
fn filter_directives(log_level: Option<Level>, verbose: u8, rust_log: Option<&str>) -> String {
	if let Some(level) = log_level {
		return level.as_str().to_lowercase();
	}
	match rust_log.map(str::trim).filter(|s| !s.is_empty()) {
		Some(directives) => directives.to_string(),
		None => format!(
			"warn,kdiff={}",
			verbosity_level(verbose).as_str().to_lowercase()
		),
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OtlpProtocol {
	Grpc,
	Http,
}

/// Trace export settings read from the standard `OTEL_*` variables.
#[derive(Debug, PartialEq, Eq)]
struct OtlpSettings {
	protocol: OtlpProtocol,
	/// Set when `OTEL_SERVICE_NAME` does not name the service already.
	service_name: Option<&'static str>,
}

impl OtlpSettings {
	/// `None` unless an OTLP endpoint is configured.
	fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Option<Self>> {
		let configured = [OTEL_EXPORTER_OTLP_ENDPOINT, OTEL_EXPORTER_OTLP_TRACES_ENDPOINT]
			.into_iter()
			.any(|name| var(name).is_some());
		if !configured {
			return Ok(None);
		}

		let protocol = var(OTEL_EXPORTER_OTLP_PROTOCOL);
		let protocol = match protocol
			.as_deref()
			.unwrap_or(OTEL_EXPORTER_OTLP_PROTOCOL_DEFAULT)
		{
			"grpc" => OtlpProtocol::Grpc,
			"http/protobuf" | "http/json" => OtlpProtocol::Http,
			other => bail!("unsupported {OTEL_EXPORTER_OTLP_PROTOCOL} {other:?}"),
		};

		Ok(Some(Self {
			protocol,
			service_name: var(OTEL_SERVICE_NAME).is_none().then_some(SERVICE_NAME),
		}))
	}

	fn layer<S>(&self) -> Result<(impl Layer<S>, SdkTracerProvider)>
	where
		S: Subscriber + for<'span> LookupSpan<'span>,
	{
		// Resource::builder() picks up OTEL_SERVICE_NAME and OTEL_RESOURCE_ATTRIBUTES.
		let mut resource = Resource::builder();
		if let Some(name) = self.service_name {
			resource = resource.with_service_name(name);
		}

		let exporter = match self.protocol {
			OtlpProtocol::Grpc => SpanExporter::builder().with_tonic().build(),
			OtlpProtocol::Http => SpanExporter::builder().with_http().build(),
		}
		.context("building OTLP span exporter")?;

		let provider = SdkTracerProvider::builder()
			.with_resource(resource.build())
			.with_batch_exporter(exporter)
			.build();
		let layer = tracing_opentelemetry::layer()
			.with_error_records_to_exceptions(true)
			.with_tracer(provider.tracer(SERVICE_NAME));
		opentelemetry::global::set_tracer_provider(provider.clone());

		Ok((layer, provider))
	}
}

/// Flushes exported spans when dropped. Keep it alive for the whole command.
#[must_use]
pub struct TelemetryGuard {
	tracer_provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
	fn drop(&mut self) {
		let Some(provider) = self.tracer_provider.take() else {
			return;
		};
		if let Err(e) = provider.shutdown() {
			eprintln!("kdiff: flushing traces failed: {e}");
		}
	}
}

/// Install the global subscriber.
///
/// Output is pretty on a terminal and JSON otherwise. Spans are exported over
/// OTLP when `OTEL_EXPORTER_OTLP_ENDPOINT` or
/// `OTEL_EXPORTER_OTLP_TRACES_ENDPOINT` is set.
pub fn init(log_level: Option<Level>, verbose: u8) -> Result<TelemetryGuard> {
	let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
	let directives = filter_directives(log_level, verbose, rust_log.as_deref());
	let filter = EnvFilter::try_new(&directives)
		.with_context(|| format!("invalid log filter {directives:?}"))?;

	let fmt_layer = if std::io::stderr().is_terminal() {
		tracing_subscriber::fmt::layer()
			.with_writer(std::io::stderr)
			.pretty()
			.boxed()
	} else {
		tracing_subscriber::fmt::layer()
			.with_writer(std::io::stderr)
			.json()
			.boxed()
	};

	let (otel_layer, tracer_provider) =
		match OtlpSettings::from_lookup(|name| std::env::var(name).ok())? {
			Some(settings) => {
				let (layer, provider) = settings.layer()?;
				(Some(layer), Some(provider))
			}
			None => (None, None),
		};

	tracing_subscriber::registry()
		.with(filter)
		.with(fmt_layer)
		.with(otel_layer)
		.try_init()
		.context("installing tracing subscriber")?;

	Ok(TelemetryGuard { tracer_provider })
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;

	use assert_matches::assert_matches;
	use rstest::rstest;

	use super::*;

	fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
		let vars: HashMap<String, String> = vars
			.iter()
			.map(|(k, v)| ((*k).to_string(), (*v).to_string()))
			.collect();
		move |name: &str| vars.get(name).cloned()
	}

	#[rstest]
	#[case::quiet(0, "warn,kdiff=warn")]
	#[case::verbose(1, "warn,kdiff=info")]
	#[case::debug(2, "warn,kdiff=debug")]
	#[case::capped(7, "warn,kdiff=trace")]
	fn test_verbosity_sets_default_filter(#[case] verbose: u8, #[case] expected: &str) {
		assert_eq!(filter_directives(None, verbose, None), expected);
	}

	#[test]
	fn test_log_level_wins() {
		assert_eq!(
			filter_directives(Some(Level::DEBUG), 0, Some("kube=trace")),
			"debug"
		);
	}

	#[test]
	fn test_rust_log_wins_over_verbosity() {
		assert_eq!(filter_directives(None, 3, Some("kube=trace")), "kube=trace");
		assert_eq!(filter_directives(None, 1, Some("  ")), "warn,kdiff=info");
	}

	#[test]
	fn test_otlp_disabled_without_endpoint() {
		let settings = OtlpSettings::from_lookup(lookup(&[(OTEL_EXPORTER_OTLP_PROTOCOL, "grpc")]));
		assert_matches!(settings, Ok(None));
	}

	#[rstest]
	#[case::grpc("grpc", OtlpProtocol::Grpc)]
	#[case::protobuf("http/protobuf", OtlpProtocol::Http)]
	#[case::json("http/json", OtlpProtocol::Http)]
	fn test_otlp_protocol(#[case] protocol: &str, #[case] expected: OtlpProtocol) {
		let settings = OtlpSettings::from_lookup(lookup(&[
			(OTEL_EXPORTER_OTLP_TRACES_ENDPOINT, "http://collector:4317"),
			(OTEL_EXPORTER_OTLP_PROTOCOL, protocol),
		]))
		.unwrap()
		.unwrap();
		assert_eq!(settings.protocol, expected);
		assert_eq!(settings.service_name, Some(SERVICE_NAME));
	}

	#[test]
	fn test_otlp_rejects_unknown_protocol() {
		let settings = OtlpSettings::from_lookup(lookup(&[
			(OTEL_EXPORTER_OTLP_ENDPOINT, "http://collector:4317"),
			(OTEL_EXPORTER_OTLP_PROTOCOL, "carrier-pigeon"),
		]));
		assert!(settings.is_err());
	}

	#[test]
	fn test_otlp_keeps_configured_service_name() {
		let settings = OtlpSettings::from_lookup(lookup(&[
			(OTEL_EXPORTER_OTLP_ENDPOINT, "http://collector:4318"),
			(OTEL_SERVICE_NAME, "shop-ci"),
		]))
		.unwrap()
		.unwrap();
		assert_eq!(settings.service_name, None);
	}
}
