use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use fifo_tb::coverage::CoverageSnapshot;
use fifo_tb::dut::Mutation;
use fifo_tb::env::{self, RunConfig, SWEEP};
use fifo_tb::report::{self, RunResult};
use fifo_tb::utils::random_seed;
use fifo_tb::{TbError, TbResult};
use indexmap::IndexMap;

/// Coverage-driven random testbench for a dual-clock FIFO
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Data bus width in bits
    #[arg(short, long, default_value_t = 4)]
    width: u32,

    /// Address width, the FIFO holds 2^depth words
    #[arg(short, long, default_value_t = 4)]
    depth: u32,

    /// Random seed, drawn at random when omitted
    #[arg(short, long)]
    seed: Option<u64>,

    /// Closure threshold of the write_enable x data cross in percent
    #[arg(short, long, default_value_t = 100.0)]
    threshold: f64,

    /// Length of the directed underflow phase [default: 2^depth + 100]
    #[arg(long)]
    underflow_reads: Option<u64>,

    /// Give up the random phase after this many transactions
    #[arg(long)]
    max_transactions: Option<u64>,

    /// Fault injected into the behavioral FIFO, e.g. `lifo-order` or `stuck-data-bit:2`
    #[arg(long, default_value = "none")]
    mutation: Mutation,

    /// Stop the simulation after this many nanoseconds
    #[arg(long, value_name = "NS")]
    time_limit: Option<u64>,

    /// Run every width in the sweep list with depth equal to width
    #[arg(long, num_args = 0.., value_delimiter = ',', value_name = "WIDTHS")]
    sweep: Option<Vec<u32>>,

    /// Write the coverage snapshot as JSON
    #[arg(long, value_name = "PATH")]
    coverage_json: Option<PathBuf>,

    /// Write a JUnit XML report
    #[arg(long, value_name = "PATH")]
    junit: Option<PathBuf>,

    /// Print the per-dimension coverage table
    #[arg(long)]
    coverage_report: bool,
}

/// Worst outcome over all runs, mapped to the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Outcome {
    Pass,
    Fail,
    Error,
}

impl Outcome {
    fn of(results: &[RunResult]) -> Self {
        results
            .iter()
            .map(|(_, r)| match r {
                Ok(report) if report.passed() => Outcome::Pass,
                Ok(_) => Outcome::Fail,
                Err(_) => Outcome::Error,
            })
            .max()
            .unwrap_or(Outcome::Error)
    }
}

impl From<Outcome> for ExitCode {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Pass => ExitCode::SUCCESS,
            Outcome::Fail => ExitCode::from(1),
            Outcome::Error => ExitCode::from(2),
        }
    }
}

impl Cli {
    fn config(&self) -> TbResult<RunConfig> {
        let time_limit_ps = match self.time_limit {
            Some(ns) => Some(ns.checked_mul(1000).ok_or_else(|| {
                TbError::Config(format!("time limit of {} ns is out of range", ns))
            })?),
            None => None,
        };
        Ok(RunConfig {
            width: self.width,
            depth: self.depth,
            seed: self.seed.unwrap_or_else(random_seed),
            threshold: self.threshold,
            underflow_reads: self.underflow_reads,
            max_random_transactions: self.max_transactions,
            mutation: self.mutation,
            time_limit_ps,
            ..Default::default()
        })
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    match execute(&cli) {
        Ok(outcome) => outcome.into(),
        Err(e) => {
            log::error!("{}", e);
            Outcome::Error.into()
        }
    }
}

fn execute(cli: &Cli) -> TbResult<Outcome> {
    let base = cli.config()?;
    let results: Vec<RunResult> = match &cli.sweep {
        Some(widths) => {
            let widths = if widths.is_empty() { &SWEEP[..] } else { &widths[..] };
            env::sweep(&base, widths)
        }
        None => {
            let report = env::run(&base)?;
            vec![(base, Ok(report))]
        }
    };

    for (config, result) in &results {
        match result {
            Ok(r) => {
                println!("{}", report::summary(r));
                if cli.coverage_report {
                    report::coverage_table(&r.coverage).printstd();
                }
            }
            Err(e) => log::error!("{}: {}", config.name(), e),
        }
    }
    if results.len() > 1 {
        report::results_table(&results).printstd();
    }

    if let Some(path) = &cli.coverage_json {
        let snapshots: IndexMap<&str, &CoverageSnapshot> = results
            .iter()
            .filter_map(|(_, r)| r.as_ref().ok())
            .map(|r| (r.name.as_str(), &r.coverage))
            .collect();
        match (cli.sweep.is_some(), snapshots.values().next()) {
            (false, Some(snapshot)) => report::write_json(path, snapshot)?,
            _ => report::write_json(path, &snapshots)?,
        }
        log::info!("coverage written to {}", path.display());
    }
    if let Some(path) = &cli.junit {
        report::write_junit(path, env!("CARGO_PKG_NAME"), &results)?;
        log::info!("junit report written to {}", path.display());
    }

    Ok(Outcome::of(&results))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fifo_tb::coverage::CoverageEngine;
    use fifo_tb::env::RunReport;

    fn report(compared: u64) -> RunReport {
        RunReport {
            name: "fifo_w2_d2".to_string(),
            width: 2,
            depth: 2,
            seed: 1,
            mutation: "none".to_string(),
            closed: true,
            random_transactions: 8,
            underflow_transactions: 104,
            transactions_sent: 112,
            idle_cycles: 0,
            compared,
            unpaired: 0,
            mismatches: Vec::new(),
            gaps: Vec::new(),
            coverage: CoverageEngine::new(100.0).unwrap().snapshot(),
            sim_time_ps: 0,
            wall_secs: 0.0,
        }
    }

    #[test]
    fn worst_run_decides_the_exit_code() {
        let pass = || -> RunResult { (RunConfig::new(2, 2), Ok(report(10))) };
        let fail = || -> RunResult { (RunConfig::new(2, 2), Ok(report(0))) };
        let error =
            || -> RunResult { (RunConfig::new(21, 21), Err(TbError::Config("width".into()))) };

        assert_eq!(Outcome::of(&[pass(), pass()]), Outcome::Pass);
        assert_eq!(Outcome::of(&[pass(), fail()]), Outcome::Fail);
        assert_eq!(Outcome::of(&[pass(), error()]), Outcome::Error);
        assert_eq!(Outcome::of(&[error(), fail()]), Outcome::Error);
        assert_eq!(Outcome::of(&[]), Outcome::Error);
    }

    #[test]
    fn sweep_with_invalid_width_is_an_error() {
        let cli = Cli::try_parse_from(["fifo-tb", "--sweep", "21"]).unwrap();
        let base = cli.config().unwrap();
        let results = env::sweep(&base, &[21]);
        assert_eq!(Outcome::of(&results), Outcome::Error);
    }

    #[test]
    fn time_limit_overflow_is_rejected() {
        let max = u64::MAX.to_string();
        let cli = Cli::try_parse_from(["fifo-tb", "--time-limit", max.as_str()]).unwrap();
        assert!(matches!(cli.config(), Err(TbError::Config(_))));
        let cli = Cli::try_parse_from(["fifo-tb", "--time-limit", "5"]).unwrap();
        assert_eq!(cli.config().unwrap().time_limit_ps, Some(5_000));
    }
}
