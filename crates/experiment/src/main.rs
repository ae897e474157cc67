mod driver;

use anyhow::{Context, Result};
use attack_core::{Config, HttpTransport};
use clap::Parser;
use driver::{run_experiment, ExperimentReport, PerturbOutcome};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "experiment")]
#[command(about = "Run load experiments that degrade the target mid-run and report metrics")]
struct Args {
    /// Path to configuration file
    #[arg(long, default_value = "config/example.toml")]
    config: PathBuf,

    /// Run only the experiment with this name
    #[arg(long)]
    only: Option<String>,

    /// Print the experiment plan without running it
    #[arg(long)]
    dry_run: bool,

    /// Print reports as JSON on stdout
    #[arg(long)]
    json: bool,
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
    let mut config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;
    config.apply_env();
    config.validate().context("Invalid configuration")?;

    let experiments: Vec<_> = config
        .experiments
        .iter()
        .filter(|e| args.only.as_deref().map_or(true, |only| e.name == only))
        .cloned()
        .collect();
    if experiments.is_empty() {
        anyhow::bail!("No experiments to run in {:?}", args.config);
    }

    if args.dry_run {
        print_plan(&config, &experiments);
        return Ok(());
    }

    info!(
        "Running {} experiments against {} at {}/s for {}ms",
        experiments.len(),
        config.target.url,
        config.attack.rate,
        config.attack.duration_ms
    );

    let mut reports = Vec::new();
    for experiment in &experiments {
        // Fresh client per run so pooled connections never outlive it
        let transport = Arc::new(
            HttpTransport::new(config.target.timeout())
                .context("Failed to create HTTP transport")?
                .with_capture_headers(&config.target.capture_headers),
        );
        let report = run_experiment(
            experiment,
            config.target.build()?,
            &config.attack,
            transport,
            &config.target.capture_headers,
        )
        .await
        .with_context(|| format!("Experiment '{}' could not run", experiment.name))?;

        if !args.json {
            print_report(&report);
        }
        reports.push(report);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }

    let failed: Vec<&str> = reports
        .iter()
        .filter(|r| r.failed())
        .map(|r| r.name.as_str())
        .collect();
    if !failed.is_empty() {
        anyhow::bail!("Perturbation failed in experiments: {}", failed.join(", "));
    }

    Ok(())
}

fn print_plan(config: &Config, experiments: &[attack_core::ExperimentConfig]) {
    println!("\n=== Dry Run ===");
    println!("target: {} {}", config.target.method, config.target.url);
    println!("rate: {}/s", config.attack.rate);
    println!("duration: {}ms", config.attack.duration_ms);
    for experiment in experiments {
        match &experiment.perturb {
            Some(p) => println!(
                "  {}: run {:?} after {}ms",
                experiment.name, p.command, p.after_ms
            ),
            None => println!("  {}: no perturbation", experiment.name),
        }
    }
    println!();
}

fn print_report(report: &ExperimentReport) {
    let metrics = &report.metrics;
    println!("\n=== Experiment {} ===", report.name);
    match &report.perturb {
        PerturbOutcome::None => {}
        PerturbOutcome::Skipped => println!("perturbation: skipped (attack ended first)"),
        PerturbOutcome::Succeeded { output } => println!("perturbation: {}", output.trim()),
        PerturbOutcome::Failed { reason } => println!("perturbation FAILED: {}", reason),
    }
    println!("p50 {:?}", metrics.latencies.p50);
    println!("p95 {:?}", metrics.latencies.p95);
    println!("p99 {:?}", metrics.latencies.p99);
    println!("mean {:?}", metrics.latencies.mean);
    println!("wait {:?}", metrics.wait);
    println!("success {:.2}", metrics.success * 100.0);
    println!("requests {}", metrics.requests);
    if metrics.success < 1.0 {
        println!("errors {:?}", metrics.errors);
    }
    for (header, values) in &report.headers.counts {
        println!("{} {:?}", header, values);
    }
    println!();
}
