use std::sync::Arc;

use anyhow::{anyhow, Context};

use wallet_ledger::config::Config;
use wallet_ledger::engine::TransferEngine;
use wallet_ledger::replay::run;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args();
    let file_name = args.nth(1).ok_or(anyhow!("Input file not provided"))?;
    let input = tokio::fs::File::open(&file_name)
        .await
        .context(format!("Can't open input file: `{}`", file_name))?;
    let config = Config::from_env().context("Invalid configuration")?;
    setup_tracing();

    let ledger = Arc::new(config.build_ledger());
    let rates = Arc::new(config.build_rate_cache()?);
    let engine = Arc::new(TransferEngine::new(ledger.clone(), rates));
    run(input, engine).await;

    let mut output = std::io::stdout().lock();
    ledger.dump_to_writer(&mut output)?;
    Ok(())
}

fn setup_tracing() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "error")
    }
    tracing_subscriber::fmt::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}
