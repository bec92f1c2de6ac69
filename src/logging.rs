//! Tracing subscriber setup.
//!
//! Logs go to stderr so DOT output on stdout stays machine-readable.
//! `RUST_LOG` overrides the level chosen by the verbose flag.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init(verbose: bool) {
    let default_filter = if verbose { "bookcrawl=debug,info" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .init();
}
