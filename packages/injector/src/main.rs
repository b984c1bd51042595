// packages/injector/src/main.rs
//! socksctl
//!
//! Enables, disables and inspects the SOCKS5 injector for processes started
//! from the current shell.

use anyhow::Result;
use socks_injector::cli;
use socks_injector::observability::init_tracing;
use socks_injector::utils::config::ProxyConfig;
use tracing::debug;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let invocation = cli::parse(std::env::args_os());
    debug!("socksctl v{}: {:?}", socks_injector::VERSION, invocation);

    let outcome = cli::run(invocation, &ProxyConfig::resolve()).await;
    print!("{}", outcome.output);

    if outcome.exit_code != 0 {
        std::process::exit(outcome.exit_code);
    }
    Ok(())
}
