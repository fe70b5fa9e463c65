use opentelemetry::global;
use snafu::{ResultExt, Snafu};
use tracing::Subscriber;
use tracing_subscriber::{EnvFilter, Layer};
use tracing_subscriber::{prelude::*, registry::LookupSpan, util::TryInitError};

pub use opentelemetry::{
    KeyValue,
    metrics::{Counter, Meter},
};

const RUST_LOG_FORMAT: &str = "RUST_LOG_FORMAT";

pub type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

#[derive(Debug, Snafu)]
pub enum ObservabilityError {
    #[snafu(display("Failed to install the global tracing subscriber"))]
    Subscriber { source: TryInitError },
}

/// Returns a meter from the globally installed meter provider.
///
/// Counters recorded before the host installs a provider are dropped.
pub fn meter(name: &'static str) -> Meter {
    global::meter(name)
}

/// Installs the stdout logging layer as the global subscriber.
///
/// The filter comes from `RUST_LOG` and defaults to `INFO`. Set
/// `RUST_LOG_FORMAT=json` to emit one JSON object per event.
pub fn init_observability() -> Result<(), ObservabilityError> {
    tracing_subscriber::registry()
        .with(stdout())
        .try_init()
        .context(SubscriberSnafu {})
}

fn stdout<S>() -> BoxedLayer<S>
where
    S: Subscriber,
    for<'a> S: LookupSpan<'a>,
{
    let log_env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("INFO"));

    let json_fmt = std::env::var(RUST_LOG_FORMAT)
        .map(|val| val == "json")
        .unwrap_or(false);

    if json_fmt {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .json()
            .with_filter(log_env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_target(false)
            .with_filter(log_env_filter)
            .boxed()
    }
}
