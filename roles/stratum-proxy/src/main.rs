use stratum_proxy::{logging::init_logging, StratumProxy};
use tracing::error;

use crate::args::process_cli_args;

mod args;

#[tokio::main]
async fn main() {
    let proxy_config = process_cli_args().unwrap_or_else(|e| {
        eprintln!("Stratum proxy config error: {e}");
        std::process::exit(1);
    });

    if let Err(e) = init_logging(proxy_config.log_dir()) {
        eprintln!("Cannot initialize logging: {e}");
        std::process::exit(1);
    }

    if let Err(e) = StratumProxy::new(proxy_config).start().await {
        error!("Stratum proxy stopped: {e}");
        std::process::exit(1);
    }
}
