use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the tracing subscriber: JSON in `release` mode (machine-
/// readable, suitable for log aggregation), pretty in `debug` mode.
/// `RUST_LOG` always wins over the mode-derived default.
pub fn init(mode: &str) {
    let default_level = if mode == "debug" { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if mode == "debug" {
        let fmt_layer = tracing_subscriber::fmt::layer().pretty();
        tracing_subscriber::registry().with(env_filter).with(fmt_layer).init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true);
        tracing_subscriber::registry().with(env_filter).with(fmt_layer).init();
    }
}
