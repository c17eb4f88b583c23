use std::str::FromStr;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber. `log` records from the library crates are
/// forwarded into it.
pub fn setup_logging(log_level: &str, json_format: bool) {
    // A bare level gets quieter defaults for the HTTP stack; full directive
    // strings are used as given.
    let normalized = log_level.trim();
    let filter_spec = if normalized.contains(',') || normalized.contains('=') {
        normalized.to_string()
    } else {
        format!(
            "{},h2=info,hyper=info,hyper_util=info,reqwest=info,rustls=info",
            normalized
        )
    };
    let filter = EnvFilter::from_str(&filter_spec).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::registry().with(filter);

    if json_format {
        let json_layer = fmt::layer()
            .json()
            .with_target(false)
            .with_current_span(false);
        subscriber.with(json_layer).init();
    } else {
        let fmt_layer = fmt::layer().with_target(true).compact();
        subscriber.with(fmt_layer).init();
    }

    tracing::info!(
        "Logging initialized (filter: {}, format: {})",
        filter_spec,
        if json_format { "json" } else { "compact" }
    );
}
