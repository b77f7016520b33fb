use anyhow::{Context, Result};
use clap::Parser;
use jobload_core::{
    report_paths, run_pool, write_json_summary, write_workbook, Config, HttpJobApi, JobApi,
    MockJobApi, RunContext, RunSummary,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "jobload")]
#[command(about = "Load test for a certificate-secured job API - token, trigger, poll, report")]
struct Args {
    /// Path to configuration file
    #[arg(long, default_value = "config/example.toml")]
    config: PathBuf,

    /// Endpoint mode: http or mock
    #[arg(long, default_value = "http")]
    mode: String,

    /// Number of concurrent workers (overrides config)
    #[arg(long)]
    threads: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;
    if let Some(threads) = args.threads {
        config.run.threads = threads;
    }
    config.validate().context("Invalid configuration")?;

    info!(
        "Starting load test: {} workers, token TTL {}ms, poll every {}ms up to {} checks",
        config.run.threads,
        config.token.ttl_ms,
        config.status.interval_ms,
        config.status.max_checks
    );

    let api: Arc<dyn JobApi> = match args.mode.as_str() {
        "http" => Arc::new(HttpJobApi::new(&config).context("Failed to create HTTP client")?),
        "mock" => Arc::new(MockJobApi::new(&config, Duration::from_millis(50), 2)),
        _ => anyhow::bail!("Invalid mode: {}, must be 'http' or 'mock'", args.mode),
    };
    info!("Using endpoints: {}", api.name());

    let ctx = RunContext::new(config, api);
    let pool = run_pool(&ctx).await;

    let collections = ctx.recorder.snapshot();
    let summary = RunSummary::build(
        ctx.config.run.threads,
        &pool,
        &collections,
        ctx.tokens.refreshes(),
        ctx.tokens.hits(),
    );

    let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string();
    let (xlsx_path, json_path) = report_paths(&ctx.config.run.output_dir, &stamp);
    write_workbook(&xlsx_path, &summary, &collections.workers)?;
    write_json_summary(&json_path, &summary)?;

    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("\n=== Load Test Summary ===");
    println!("Duration: {:.2}s", summary.duration_secs);
    println!("Threads: {}", summary.threads);
    println!(
        "Workers: {} total, {} succeeded, {} failed",
        summary.total_workers, summary.successful_workers, summary.failed_workers
    );
    println!("Overall error rate: {:.2}%", summary.overall_error_rate);
    println!(
        "Token: {} refreshes, {} cache hits",
        summary.token_refreshes, summary.token_cache_hits
    );
    if summary.pool_timed_out {
        println!("Pool timed out; late workers are missing from the report");
    }
    for (name, m) in [
        ("Token", &summary.token),
        ("Trigger", &summary.trigger),
        ("Status", &summary.status),
    ] {
        println!(
            "{:<8} requests={} errors={:.2}% mean={:.3}s p50={:.3}s p95={:.3}s p99={:.3}s",
            name, m.total, m.error_rate, m.mean, m.median, m.p95, m.p99
        );
    }
    println!();
}
