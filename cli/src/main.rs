//! chainingest — poll EVM, Solana and Near chains for logs and transactions.
//!
//! Usage:
//! ```bash
//! # Run every poller in a config file until Ctrl-C
//! chainingest run --config chainingest.yaml
//!
//! # Check an endpoint: current height and latency
//! chainingest check --url https://cloudflare-eth.com
//! chainingest check --url https://api.mainnet-beta.solana.com --family solana
//! ```

mod app;
mod config;
mod logging;
mod metrics;

use std::env;
use std::process;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;

use chainingest_chains::ChainRegistry;
use chainingest_core::{BlockTag, RpcTransport};
use chainingest_http::HttpRpcClient;

use crate::config::{Config, Family};
use crate::logging::LogConfig;

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "run" => cmd_run(&args[2..]).await,
        "check" => cmd_check(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("chainingest {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("chainingest {}", env!("CARGO_PKG_VERSION"));
    println!("Poll blockchains for logs and transactions\n");
    println!("USAGE:");
    println!("    chainingest <COMMAND>\n");
    println!("COMMANDS:");
    println!("    run        Run the pollers of a config file until Ctrl-C");
    println!("    check      Check an RPC endpoint (height, latency)");
    println!("    version    Print version");
    println!("    help       Print this help\n");
    println!("RUN FLAGS:");
    println!("    --config <FILE>   YAML config file  [required]\n");
    println!("CHECK FLAGS:");
    println!("    --url <URL>       RPC endpoint URL  [required]");
    println!("    --family <NAME>   evm | solana | near  [default: evm]");
}

async fn cmd_run(args: &[String]) -> anyhow::Result<()> {
    let path = parse_flag(args, "--config").context("--config is required")?;
    let config = Config::load(&path)?;
    logging::init(&config.log);
    tracing::info!(config = %path, chains = config.chains.len(), pollers = config.pollers.len(), "starting");
    app::run(config).await
}

async fn cmd_check(args: &[String]) -> anyhow::Result<()> {
    let url = parse_flag(args, "--url").context("--url is required")?;
    let family: Family = parse_flag(args, "--family").as_deref().unwrap_or("evm").parse()?;
    logging::init(&LogConfig {
        level: "warn".into(),
        ..LogConfig::default()
    });

    let client: Arc<dyn RpcTransport> = Arc::new(HttpRpcClient::default_for(url.as_str())?);
    let repo = app::family_repository(family, ChainRegistry::new().with_chain("endpoint", 0, client));

    println!("Checking {url}...");

    let start = Instant::now();
    let height = repo.get_block_height("endpoint", BlockTag::Latest).await?;
    let latency = start.elapsed();

    println!("  Status:       OK");
    println!("  Family:       {family:?}");
    println!("  Height:       {height}");
    println!("  Latency:      {}ms", latency.as_millis());

    Ok(())
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}
