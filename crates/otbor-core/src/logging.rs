use tracing_subscriber::{fmt, EnvFilter};

use crate::Result;

/// Initialize logging/tracing for the bot.
pub fn init(service_name: &str) -> Result<()> {
    // Default: info for our crates, warn for everything else.
    // Can be overridden with `RUST_LOG`.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,otbor=info,otbor_core=info,otbor_store=info,otbor_redis=info,\
otbor_sheets=info,otbor_telegram=info,{service_name}=info"
        ))
    });

    // `try_init` so tests and embedders that already installed a subscriber keep theirs.
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(true)
        .try_init();

    Ok(())
}
