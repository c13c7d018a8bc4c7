//! Defaults and environment wiring.
//!
//! Every value here can be overridden per-invocation via CLI flags or the
//! `ENSEMBLE_*` environment variables bound to them, with `.env` files
//! loaded at startup.

use tracing_subscriber::EnvFilter;

/// Default orchestrator address clients connect to.
pub const DEFAULT_WS_URL: &str = "ws://localhost:8001";

/// Default bind host for the orchestrator server.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default bind port for the orchestrator server.
pub const DEFAULT_PORT: u16 = 8001;

/// Default delay between scripted pipeline emissions, in milliseconds.
pub const DEFAULT_PACE_MS: u64 = 400;

/// Load a `.env` file if one exists; missing files are not an error.
pub fn load_dotenv() {
    let _ = dotenvy::dotenv();
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `verbose` picks between debug- and
/// info-level output for this crate.
pub fn init_tracing(verbose: bool) {
    let fallback = if verbose {
        "ensemble=debug,info"
    } else {
        "ensemble=info,warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_url_matches_default_bind_address() {
        assert_eq!(DEFAULT_WS_URL, format!("ws://localhost:{DEFAULT_PORT}"));
        assert_eq!(DEFAULT_HOST, "127.0.0.1");
    }
}
