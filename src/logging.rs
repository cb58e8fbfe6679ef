use crate::error::Result;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

// Sets up logging to stderr. `RUST_LOG` takes precedence over `level`.
//
// Calling this more than once keeps the first subscriber.
pub fn setup_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()
        .ok();

    Ok(())
}
