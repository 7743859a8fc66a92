//! Logging initialization.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset or unparsable. Covers the library
/// and both binary targets.
pub const DEFAULT_FILTER: &str = "postcron=info,refresh_tokens=info,scheduled_tasks=info";

/// Install the global subscriber: human-readable lines on stderr, filtered
/// by `RUST_LOG`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        init();
        init();
        tracing::info!("still logging");
    }

    #[test]
    fn test_default_filter_parses() {
        EnvFilter::try_new(DEFAULT_FILTER).expect("valid directives");
        for target in ["postcron", "refresh_tokens", "scheduled_tasks"] {
            assert!(DEFAULT_FILTER.contains(&format!("{}=info", target)));
        }
    }
}
