mod config;
mod descriptor;
mod engine_config;
mod error;
mod output;
mod parser;
mod probe_engine;
mod reporter;
mod subscription;
mod validator;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use config::Config;
use output::display_summary;
use probe_engine::ProbeEngine;
use reporter::ValidListReporter;
use subscription::load_input;
use validator::XrayValidator;

#[derive(Parser, Debug)]
#[command(name = "xrayprobe")]
#[command(about = "Keep only the vmess/vless/trojan links whose Xray config passes `xray -test`")]
struct Args {
    /// TOML config file; command line options override its values
    #[arg(long)]
    config: Option<String>,

    /// Candidate list: file path, file:// or http(s):// URL (default: config.txt)
    #[arg(short, long)]
    input: Option<String>,

    /// Output file for accepted links, recreated on every run (default: valid.txt)
    #[arg(short, long)]
    output: Option<String>,

    /// Engine executable (default: xray)
    #[arg(short, long)]
    engine: Option<String>,

    /// Timeout for each engine run in seconds (default: 100)
    #[arg(short = 'T', long)]
    timeout: Option<u64>,

    /// Number of concurrent engine runs (default: 5)
    #[arg(short, long)]
    concurrent: Option<usize>,

    /// Port of the SOCKS inbound written into generated configs (default: 1080)
    #[arg(long)]
    socks_port: Option<u16>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Print the default config file and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if args.print_config {
        print!("{}", Config::generate_default_toml());
        return;
    }

    let config = load_config(&args);
    let verbose = args.verbose || config.as_ref().is_ok_and(|c| c.main.verbose);

    // Initialize logging
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    let result = match config {
        Ok(config) => run(config).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::default(),
    };

    if let Some(input) = &args.input {
        config.main.input = input.clone();
    }
    if let Some(output) = &args.output {
        config.main.output = output.clone();
    }
    if let Some(engine) = &args.engine {
        config.engine.path = engine.clone();
    }
    if let Some(timeout) = args.timeout {
        config.main.timeout = timeout;
    }
    if let Some(concurrent) = args.concurrent {
        config.main.concurrent = concurrent;
    }
    if let Some(socks_port) = args.socks_port {
        config.engine.socks_port = socks_port;
    }

    Ok(config)
}

async fn run(config: Config) -> Result<()> {
    info!("xrayprobe starting...");
    info!("Loading candidates from: {}", config.main.input);

    let content = load_input(&config.main.input).await?;
    let reporter = ValidListReporter::create(&config.main.output).await?;

    let validator = Arc::new(XrayValidator::new(&config.engine.path));
    let options = config.engine_options();
    info!(
        "Testing with {} ({}s timeout, {} concurrent)",
        validator.engine().display(),
        options.timeout.as_secs(),
        options.concurrency
    );

    let mut engine = ProbeEngine::new(options, validator);
    engine.register_reporter(Arc::new(reporter));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping running engine processes");
            let _ = shutdown_tx.send(true);
        }
    });

    let summary = engine.run(content.lines(), shutdown_rx).await;
    info!("Accepted links written to {}", config.main.output);

    display_summary(&summary);
    Ok(())
}
