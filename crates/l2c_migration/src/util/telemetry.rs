use tracing_subscriber::{prelude::*, EnvFilter, Registry};

/// Initialize tracing
///
/// `RUST_LOG` selects the filter (default `info`); `json` switches the formatter to
/// one JSON object per line for log shippers.
#[allow(clippy::unwrap_used)]
pub async fn init(json: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .or(EnvFilter::try_new("info"))
        .unwrap();

    let logger = if json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().compact().boxed()
    };

    let collector = Registry::default().with(logger).with(env_filter);

    tracing::subscriber::set_global_default(collector).unwrap();
}
