use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

pub mod commands;
pub mod core;
pub mod storage;

const LOG_ENV: &str = "TUNEFETCH_LOG";

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn try_run() -> anyhow::Result<i32> {
    let path = storage::config::config_path(std::env::args().nth(1));
    let settings = Arc::new(storage::config::load_settings(&path)?);
    println!("{}", commands::download::config_info(&settings));

    let runtime = tokio::runtime::Runtime::new().context("Failed to start the async runtime")?;
    let result = runtime.block_on(commands::download::download_all(settings))?;

    println!("{}", commands::download::format_summary(&result.summary()));
    Ok(commands::download::exit_code(&result))
}

pub fn run() {
    init_tracing();

    let code = match try_run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Fatal error: {:#}", e);
            2
        }
    };
    std::process::exit(code);
}
