// SPDX-License-Identifier: GPL-3.0-only

use anyhow::Result;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init_logger() -> Result<()> {
    let level = if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,cosmic_display={level}")));
    let fmt_layer = fmt::layer().with_writer(std::io::stderr).compact();

    #[cfg(feature = "systemd")]
    let (journald, journald_err) = match tracing_journald::layer() {
        Ok(layer) => (Some(layer), None),
        Err(err) => (None, Some(err)),
    };
    #[cfg(not(feature = "systemd"))]
    let journald: Option<tracing_subscriber::layer::Identity> = None;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(journald)
        .try_init()?;
    log_panics::init();

    #[cfg(feature = "systemd")]
    if let Some(err) = journald_err {
        tracing::warn!(?err, "Failed to connect to journald, logging to stderr only");
    }

    info!("Version: {}", std::env!("CARGO_PKG_VERSION"));
    debug!(
        "Git commit {}",
        std::option_env!("GIT_HASH").unwrap_or("Unknown")
    );

    Ok(())
}
