//! tricat simulator CLI
//!
//! Runs the three-node add/cat transfer scenarios on a virtual clock.

use clap::Parser;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use tricat_sim::scenarios::ScenarioId;
use tricat_sim::{ScenarioResult, ScenarioRunner, SimConfig};

/// tricat three-node transfer simulator
#[derive(Parser, Debug)]
#[command(name = "tricat-sim")]
#[command(about = "Run deterministic three-node add/cat transfers over a simulated network", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long)]
    seed: Option<u64>,

    /// Scenario to run (transfer_100mb, slow_blockstore, slow_network, slow_routing, coast_to_coast_100mb, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Include epic scenarios when running all
    #[arg(long)]
    epic: bool,

    /// JSON configuration file (see SimConfig)
    #[arg(short, long)]
    config: Option<String>,

    /// Override every scenario's payload size in bytes
    #[arg(long)]
    size: Option<usize>,

    /// Number of consecutive seeds to run (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Cancel a scenario after this many simulated seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Error: failed to install tracing subscriber: {}", e);
        std::process::exit(1);
    }

    let mut config = match &args.config {
        Some(path) => SimConfig::from_json_file(path).unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }),
        None => SimConfig::default(),
    };

    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        if args.epic {
            ScenarioId::all()
        } else {
            ScenarioId::standard()
        }
    } else {
        vec![args.scenario.parse().unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            eprintln!(
                "Available scenarios: {}, all",
                ScenarioId::all()
                    .iter()
                    .map(|s| s.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            std::process::exit(1);
        })]
    };

    // Determine base seed
    let base_seed = match args.seed {
        Some(0) => std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(config.seed),
        Some(seed) => seed,
        None => config.seed,
    };

    // Paused clock: simulated delays cost no wall-clock time
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    if !args.json {
        info!("tricat simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let mut all_results: Vec<ScenarioResult> = Vec::new();
    let mut failed_count = 0;

    for seed_offset in 0..args.seeds {
        config.seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = ScenarioRunner::new(config.clone())
            .with_size(args.size)
            .with_timeout(args.timeout_secs.map(Duration::from_secs));

        for scenario in &scenarios {
            let result = runtime.block_on(runner.run(*scenario));

            if !args.json {
                match &result.outcome {
                    Ok(report) => info!(
                        "✓ {} (seed={}) PASSED in {:.3}s simulated ({} bytes, {} blocks)",
                        scenario.name(),
                        result.seed,
                        report.elapsed.as_secs_f64(),
                        report.bytes,
                        report.blocks
                    ),
                    Err(e) => error!(
                        "✗ {} (seed={}) FAILED at {}: {}",
                        scenario.name(),
                        result.seed,
                        e.step(),
                        e
                    ),
                }
            }

            if !result.passed() {
                failed_count += 1;
            }
            all_results.push(result);
        }
    }

    // Summary
    let total = all_results.len();
    let passed = total - failed_count;

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "results": all_results.iter().map(|r| {
                let report = r.outcome.as_ref().ok();
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed(),
                    "payload_bytes": r.payload_size,
                    "root": report.map(|report| report.root.to_string()),
                    "elapsed_secs": report.map(|report| report.elapsed.as_secs_f64()),
                    "traffic": report.map(|report| report.traffic),
                    "failed_step": r.outcome.as_ref().err().map(|e| e.step().name()),
                    "failure_reason": r.failure_reason(),
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(out) => println!("{}", out),
            Err(e) => eprintln!("Error: {}", e),
        }
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);
            for result in &all_results {
                if let Some(reason) = result.failure_reason() {
                    error!("  - {} seed={}: {}", result.scenario.name(), result.seed, reason);
                }
            }
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
}
