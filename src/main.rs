mod catalog;
mod config;
mod cycle;
mod data_dir;
mod jsonfile;
mod log_tail;
mod monitor;
mod results;
mod retry;
mod runner;
mod settings;
mod signals;
mod simulator;
mod status;
mod verdict;

use clap::{Parser, Subcommand};
use config::HarnessConfig;
use std::path::PathBuf;
use std::process::ExitCode;

/// Functional test harness for diagnostic scan tools: start the hardware
/// simulator for each case, run the automation step, watch the simulator log
/// for relink traffic, and record pass/fail results.
#[derive(Parser, Debug)]
#[command(name = "scanbench", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "scanbench.toml", global = true)]
    config: PathBuf,

    /// Validate config and print resolved settings, don't run
    #[arg(long, global = true)]
    dry_run: bool,

    /// Extra logging (every poll, every matched line)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only warnings, errors and the final table
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run cases (all cases when none are named)
    Run {
        /// Case names, e.g. "Case 01.sim"
        cases: Vec<String>,

        /// Only cases of this make, e.g. CARB or "Monitor Icon" (repeatable)
        #[arg(long = "group")]
        groups: Vec<String>,

        /// Only cases of this kind: relink, led-mil, monitor-icon, other
        #[arg(long)]
        kind: Option<catalog::CaseKind>,

        /// Serial port of the simulator (overrides config)
        #[arg(long)]
        com_port: Option<String>,

        /// Observation window in seconds (overrides config)
        #[arg(long)]
        duration: Option<u64>,
    },
    /// Run only the relink monitor against a case log
    Monitor {
        /// Case name; selects the log unless --log is given
        case: String,

        /// Log file to watch (default: the case log in the data directory)
        #[arg(long)]
        log: Option<PathBuf>,

        /// Observation window in seconds (overrides config)
        #[arg(long)]
        duration: Option<u64>,
    },
    /// Print the results table of the last run
    Results,
    /// List the case catalog
    Cases,
}

fn init_logging(verbose: bool, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    let default_level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);
    tracing::debug!(?cli, "parsed CLI arguments");

    let mut config = match HarnessConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Run {
            cases,
            groups,
            kind,
            com_port,
            duration,
        } => {
            if let Some(port) = com_port {
                config.simulator.com_port = port;
            }
            if let Some(secs) = duration {
                config.monitor.duration_secs = secs;
            }
            if cli.dry_run {
                print_config(&config);
                return ExitCode::SUCCESS;
            }
            handle_run(&config, &cases, &groups, kind).await
        }
        Command::Monitor {
            case,
            log,
            duration,
        } => {
            if let Some(secs) = duration {
                config.monitor.duration_secs = secs;
            }
            if cli.dry_run {
                print_config(&config);
                return ExitCode::SUCCESS;
            }
            handle_monitor(&config, &case, log).await
        }
        Command::Results => handle_results(&config),
        Command::Cases => handle_cases(&config),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn print_config(config: &HarnessConfig) {
    println!("Dry run mode: config validated, not running.");
    println!("{config:#?}");
}

/// Handle `scanbench run`. Exits with 2 when any case did not pass.
async fn handle_run(
    config: &HarnessConfig,
    names: &[String],
    groups: &[String],
    kind: Option<catalog::CaseKind>,
) -> Result<ExitCode, String> {
    if config.simulator.com_port.is_empty() {
        return Err("No COM port configured: set simulator.com_port or pass --com-port".to_string());
    }

    let catalog = catalog::Catalog::load(&config.storage.sim_dir, &config.cases);
    let (cases, unknown) = catalog.select(names);
    if !unknown.is_empty() {
        return Err(format!("Unknown case(s): {}", unknown.join(", ")));
    }
    let cases = catalog::filter(cases, groups, kind);
    if cases.is_empty() {
        return Err("No case selected.".to_string());
    }

    let stop = signals::StopFlag::new();
    signals::install(stop.clone(), config.shutdown.stop_file.clone());

    let results = runner::Runner::new(config, catalog, stop)
        .run(&cases)
        .await
        .map_err(|e| e.to_string())?;

    print!("{}", results.render());
    print_details(&results);
    let (passed, failed, pending) = results.summary();
    println!();
    println!("{passed} passed, {failed} failed, {pending} pending");

    Ok(if failed > 0 || pending > 0 {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    })
}

/// Handle `scanbench monitor`.
async fn handle_monitor(
    config: &HarnessConfig,
    case: &str,
    log: Option<PathBuf>,
) -> Result<ExitCode, String> {
    let settings = monitor::MonitorSettings::from_config(&config.monitor);
    let monitor = match log {
        Some(path) => monitor::RelinkMonitor::new(case, path, &settings),
        None => {
            let dd = data_dir::DataDir::new(&config.storage.data_dir);
            monitor::RelinkMonitor::for_case(case, &dd, &settings)
        }
    }
    .map_err(|e| e.to_string())?;

    let stop = signals::StopFlag::new();
    signals::install(stop.clone(), config.shutdown.stop_file.clone());

    let fast_threshold = monitor.fast().threshold();
    let slow_threshold = monitor.slow().threshold();
    let report = monitor.run(&stop).await;

    println!("Case:        {}", report.case);
    println!("Status:      {}", report.status);
    println!(
        "Relink 4.2s: {} ({}/{} matches)",
        report.fast, report.fast_matches, fast_threshold
    );
    println!(
        "Relink 60s:  {} ({}/{} matches)",
        report.slow, report.slow_matches, slow_threshold
    );
    if let Some(error) = &report.error {
        println!("Error:       {error}");
    }

    let passed = report.fast == verdict::Verdict::Passed && report.slow == verdict::Verdict::Passed;
    Ok(if passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

/// Handle `scanbench results`.
fn handle_results(config: &HarnessConfig) -> Result<ExitCode, String> {
    let dd = data_dir::DataDir::new(&config.storage.data_dir);
    let table = results::ResultsTable::load(&dd.results()).map_err(|e| e.to_string())?;
    if table.rows().is_empty() {
        println!("No results recorded.");
        return Ok(ExitCode::SUCCESS);
    }
    print!("{}", table.render());
    print_details(&table);
    Ok(ExitCode::SUCCESS)
}

/// Errors and finding mismatches below the table.
fn print_details(table: &results::ResultsTable) {
    for row in table.rows() {
        if let Some(error) = &row.error {
            println!("{}: {} (attempts: {})", row.case, error, row.attempts);
        }
        for mismatch in &row.mismatches {
            println!("{}: {}", row.case, mismatch);
        }
    }
}

/// Handle `scanbench cases`.
fn handle_cases(config: &HarnessConfig) -> Result<ExitCode, String> {
    let catalog = catalog::Catalog::load(&config.storage.sim_dir, &config.cases);
    if catalog.cases().is_empty() {
        println!("No cases configured or found under {}.", config.storage.sim_dir.display());
        return Ok(ExitCode::SUCCESS);
    }
    for entry in catalog.cases() {
        let kind = catalog::CaseKind::of(entry);
        let sim = if catalog.sim_file(entry).is_some() {
            "sim ok"
        } else {
            "sim missing"
        };
        println!("{:<40} {:<16} {:<12} {}", entry.name, entry.make, kind.label(), sim);
    }
    Ok(ExitCode::SUCCESS)
}
