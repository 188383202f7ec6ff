//! echo-bench - closed-loop latency benchmark for echo servers
//!
//! Drives a configurable number of virtual clients over one connection and
//! reports round-trip latency, optionally resending requests that time out.

use anyhow::Result;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use echo_bench::benchmark::{CancelFlag, Orchestrator};
use echo_bench::config::{Backend, BenchmarkConfig, CliArgs, SchedulerMode};
use echo_bench::metrics::MetricsReporter;

fn setup_logging(verbose: bool, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else if verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

fn print_banner(config: &BenchmarkConfig) {
    if config.quiet {
        return;
    }

    println!("echo-bench v{}", env!("CARGO_PKG_VERSION"));
    println!("====================================");
    match config.backend {
        Backend::Tcp => println!(
            "Server: {} ({}, backend: {})",
            config.server,
            config.address,
            config.backend.as_str()
        ),
        Backend::Sim => println!(
            "Server: {} (delay={}us, jitter={}us, loss={})",
            config.backend.as_str(),
            config.sim.delay.as_micros(),
            config.sim.jitter.as_micros(),
            config.sim.loss
        ),
    }
    println!(
        "Clients: {}, Iterations: {}, Payload: {} bytes",
        config.clients, config.iterations, config.payload_size
    );
    match config.mode {
        SchedulerMode::Reliable { timeout } => {
            println!("Mode: reliable, timeout: {}us", timeout.as_micros())
        }
        mode => println!("Mode: {}", mode.as_str()),
    }
    println!("Serialization: {}", config.strategy);
    println!("====================================\n");
}

/// Raise `cancel` on SIGINT/SIGTERM; a second signal exits at once
fn install_interrupt_handler(cancel: CancelFlag) -> Result<()> {
    ctrlc::set_handler(move || {
        if cancel.is_cancelled() {
            std::process::exit(130);
        }
        eprintln!("Interrupted");
        cancel.cancel();
    })?;
    Ok(())
}

fn run() -> Result<()> {
    // Parse CLI arguments
    let args = CliArgs::parse_args();

    // Setup logging
    setup_logging(args.verbose, args.quiet);

    // Build configuration
    let config = BenchmarkConfig::from_cli(&args)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    print_banner(&config);

    let cancel = CancelFlag::new();
    install_interrupt_handler(cancel.clone())?;

    let orchestrator = Orchestrator::new(config.clone(), cancel);
    let report = orchestrator.run()?;

    if report.interrupted {
        warn!(
            received = report.counters.received,
            remaining = report.counters.iterations_remaining,
            "run interrupted before the budget was spent"
        );
    }

    let reporter = MetricsReporter::new(config.quiet);
    reporter.report_console(&report);

    // Export to JSON if requested
    if let Some(ref output_path) = config.output_path {
        info!("Writing results to: {:?}", output_path);
        reporter.write_json_file(output_path, &report)?;
    }

    Ok(())
}

fn main() {
    if let Err(e) = run() {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}
