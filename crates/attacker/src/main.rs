use anyhow::{Context, Result};
use attack_core::{
    AttackConfig, AttackResult, Attacker, CancellationToken, Config, HeaderTally, HttpTransport,
    Metrics, MockTransport, StaticTargeter, TargetConfig, Transport,
};
use clap::Parser;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "attacker")]
#[command(about = "Open-loop HTTP load generator - fixed request rate, latency metrics")]
struct Args {
    /// Path to configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Target URL (overrides config)
    #[arg(long)]
    url: Option<String>,

    /// Requests per second (overrides config and RATE)
    #[arg(long)]
    rate: Option<f64>,

    /// Duration in seconds, 0 runs until Ctrl+C (overrides config and DURATION)
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Transport: mock or http
    #[arg(long, default_value = "http")]
    mode: String,

    /// Print the metrics as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Print progress every N milliseconds
    #[arg(long, default_value = "1000")]
    print_every_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    let target = config
        .target
        .build()
        .with_context(|| format!("Invalid target {}", config.target.url))?;
    info!("Target: {} {}", target.method(), target.url());

    let transport: Arc<dyn Transport> = match args.mode.as_str() {
        "mock" => Arc::new(MockTransport::new(Duration::from_millis(5), 200)),
        "http" => Arc::new(
            HttpTransport::new(config.target.timeout())
                .context("Failed to create HTTP transport")?
                .with_capture_headers(&config.target.capture_headers),
        ),
        _ => anyhow::bail!("Invalid mode: {}, must be 'mock' or 'http'", args.mode),
    };

    let mut attacker = Attacker::new(transport);
    if let Some(limit) = config.attack.max_in_flight {
        attacker = attacker.with_max_in_flight(limit);
    }

    let cancel = CancellationToken::new();
    let (mut stream, _handle) = attacker
        .start_with_token(
            Arc::new(StaticTargeter::new(target)),
            config.attack.rate,
            config.attack.duration(),
            cancel.clone(),
        )
        .context("Failed to start attack")?;

    tokio::spawn(cancel_on_ctrl_c(cancel));

    // Drain to completion; progress is only a running count
    let mut results: Vec<AttackResult> = Vec::new();
    let mut ticker = tokio::time::interval(Duration::from_millis(args.print_every_ms.max(1)));
    ticker.tick().await;
    loop {
        tokio::select! {
            next = stream.recv() => match next {
                Some(result) => results.push(result),
                None => break,
            },
            _ = ticker.tick() => print_progress(&results),
        }
    }
    let wait = stream.started().elapsed();

    let metrics = Metrics::new(&results, wait);
    let tally = HeaderTally::new(&results, &config.target.capture_headers);

    if args.json {
        let report = serde_json::json!({ "metrics": metrics, "headers": tally });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&metrics, &tally);
    }

    Ok(())
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => {
            let url = args
                .url
                .clone()
                .context("--url is required when no --config is given")?;
            Config {
                target: TargetConfig {
                    url,
                    method: "GET".to_string(),
                    headers: BTreeMap::new(),
                    body: None,
                    timeout_ms: 30_000,
                    capture_headers: Vec::new(),
                },
                attack: AttackConfig {
                    rate: 50.0,
                    duration_ms: 5_000,
                    max_in_flight: None,
                },
                experiments: Vec::new(),
            }
        }
    };

    config.apply_env();
    if let Some(url) = &args.url {
        config.target.url = url.clone();
    }
    if let Some(rate) = args.rate {
        config.attack.rate = rate;
    }
    if let Some(secs) = args.duration_secs {
        config.attack.duration_ms = secs.saturating_mul(1000);
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("Ctrl+C received, stopping attack (in-flight requests will finish)");
        cancel.cancel();
    }
}

fn print_progress(results: &[AttackResult]) {
    let failed = results.iter().filter(|r| !r.is_success()).count();
    info!("Progress: completed={} failed={}", results.len(), failed);
}

fn print_summary(metrics: &Metrics, tally: &HeaderTally) {
    println!("\n=== Attack Summary ===");
    println!("Requests: {}", metrics.requests);
    println!("Rate: {:.2}/s", metrics.rate());
    println!("Duration: {:?}", metrics.duration);
    println!("Wait: {:?}", metrics.wait);
    println!("Success: {:.2}%", metrics.success * 100.0);
    println!("Latency p50: {:?}", metrics.latencies.p50);
    println!("Latency p95: {:?}", metrics.latencies.p95);
    println!("Latency p99: {:?}", metrics.latencies.p99);
    println!("Latency mean: {:?}", metrics.latencies.mean);
    println!("Latency max: {:?}", metrics.latencies.max);
    println!("Bytes in: {}", metrics.bytes_in);
    println!("Bytes out: {}", metrics.bytes_out);

    if !metrics.status_codes.is_empty() {
        println!("Status codes:");
        for (code, count) in &metrics.status_codes {
            println!("  {}: {}", code, count);
        }
    }
    if !metrics.errors.is_empty() {
        println!("Errors:");
        for (error, count) in &metrics.errors {
            println!("  {} x{}", error, count);
        }
    }
    for (header, values) in &tally.counts {
        println!("{}:", header);
        for (value, count) in values {
            println!("  {}: {}", value, count);
        }
    }
    println!();
}
