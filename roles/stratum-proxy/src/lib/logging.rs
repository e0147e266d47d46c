use std::{fs::OpenOptions, io, path::Path, str::FromStr, sync::Arc};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

use crate::error::ProxyError;

/// Initialize logging to stdout and optionally to a file.
///
/// The level comes from `RUST_LOG` and defaults to `info`. The file is opened once, in append
/// mode, and written without ANSI colors.
pub fn init_logging(log_file: Option<&Path>) -> Result<(), ProxyError> {
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter = match LevelFilter::from_str(&rust_log) {
        Ok(level) => EnvFilter::new(level.to_string()),
        // not a bare level, treat it as a directive list such as `stratum_proxy=debug`
        Err(_) => EnvFilter::try_new(&rust_log).unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let stdout_layer = fmt::layer().with_writer(io::stdout);
    let subscriber: Box<dyn tracing::Subscriber + Send + Sync> = match log_file {
        Some(path) => {
            let file = Arc::new(OpenOptions::new().create(true).append(true).open(path)?);
            let file_layer = fmt::layer().with_ansi(false).with_writer(file);
            Box::new(
                Registry::default()
                    .with(env_filter)
                    .with(stdout_layer)
                    .with(file_layer),
            )
        }
        None => Box::new(Registry::default().with(env_filter).with(stdout_layer)),
    };

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| ProxyError::InvalidConfig(format!("cannot install log subscriber: {e}")))
}
