//! Diagnostic tracing for the engine itself.
//!
//! Two channels leave a running turn and they never mix:
//!
//! - `events` carries what the user is meant to see: agent text, operation
//!   notices, errors and the final `done`. The CLI prints it to stdout.
//! - `tracing` (set up here) carries engine internals such as prompt sizes,
//!   dispatch decisions and backend failures. It goes to stderr and is
//!   filtered by `RUST_LOG`, so `conductor run ... 2>/dev/null` leaves only the
//!   event stream.
//!
//! ```bash
//! RUST_LOG=conductor::orchestrator=debug,conductor::agents=debug conductor run "add a README"
//! ```

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Used when `RUST_LOG` is unset or blank.
pub const DEFAULT_FILTER: &str = "warn";

/// Install the stderr subscriber. A second call is a no-op.
pub fn init() {
    let filter = filter_from(std::env::var("RUST_LOG").ok().as_deref());
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Unparseable directives fall back to [`DEFAULT_FILTER`].
fn filter_from(directives: Option<&str>) -> EnvFilter {
    directives
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_or_missing_directives_use_the_default() {
        assert_eq!(filter_from(None).to_string(), DEFAULT_FILTER);
        assert_eq!(filter_from(Some("  ")).to_string(), DEFAULT_FILTER);
    }

    #[test]
    fn explicit_directives_are_kept() {
        let filter = filter_from(Some("conductor=debug")).to_string();
        assert!(filter.contains("conductor=debug"), "{filter}");
    }
}
