use junit_report::{Duration, ReportBuilder, TestCaseBuilder, TestSuiteBuilder};
use num_format::{Locale, ToFormattedString};
use prettytable::{row, Table};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use crate::coverage::{CoverageSnapshot, CROSS};
use crate::env::{RunConfig, RunReport};
use crate::{TbError, TbResult};

/// Outcome of one configuration, as returned by [`crate::env::sweep`].
pub type RunResult = (RunConfig, TbResult<RunReport>);

const MISSING_SHOWN: usize = 8;

pub fn coverage_table(snapshot: &CoverageSnapshot) -> Table {
    let mut table = Table::new();
    table.set_titles(row!["dimension", "hit", "total", "coverage", "missing"]);
    for (name, dim) in snapshot.iter() {
        let mut missing: Vec<String> = dim
            .missing
            .iter()
            .take(MISSING_SHOWN)
            .map(|b| b.to_string())
            .collect();
        if dim.missing.len() > MISSING_SHOWN {
            missing.push(format!("... {} more", dim.missing.len() - MISSING_SHOWN));
        }
        table.add_row(row![
            name,
            r->dim.hit.to_formatted_string(&Locale::en),
            r->dim.total.to_formatted_string(&Locale::en),
            r->format!("{:.2}%", dim.coverage),
            missing.join(" ")
        ]);
    }
    table
}

pub fn results_table(results: &[RunResult]) -> Table {
    let mut table = Table::new();
    table.set_titles(row![
        "run", "seed", "result", "sent", "compared", "mismatches", "cross", "sim time", "real time"
    ]);
    for (config, result) in results {
        match result {
            Ok(r) => {
                let cross = r
                    .coverage
                    .get(CROSS)
                    .map(|d| format!("{:.2}%", d.coverage))
                    .unwrap_or_default();
                table.add_row(row![
                    r.name,
                    r.seed,
                    r.verdict(),
                    r->r.transactions_sent.to_formatted_string(&Locale::en),
                    r->r.compared.to_formatted_string(&Locale::en),
                    r->r.mismatches.len(),
                    r->cross,
                    r->format!("{}ns", (r.sim_time_ps / 1000).to_formatted_string(&Locale::en)),
                    r->format!("{:.3}s", r.wall_secs)
                ]);
            }
            Err(e) => {
                table.add_row(row![config.name(), config.seed, "ERROR", H6->e]);
            }
        }
    }
    table
}

/// Multi-line end-of-run summary.
pub fn summary(report: &RunReport) -> String {
    let sim_ns = report.sim_time_ps / 1000;
    let speed = match report.wall_secs > 0.0 {
        true => (sim_ns as f64 / report.wall_secs) as u64,
        false => 0,
    };
    let mut lines = vec![
        format!(
            "{}: {} (seed {}, mutation {})",
            report.name,
            report.verdict(),
            report.seed,
            report.mutation
        ),
        format!(
            "transactions: {} random, {} underflow, {} idle cycles",
            report.random_transactions.to_formatted_string(&Locale::en),
            report.underflow_transactions.to_formatted_string(&Locale::en),
            report.idle_cycles.to_formatted_string(&Locale::en)
        ),
        format!(
            "scoreboard: {} compared, {} mismatches, {} unpaired",
            report.compared.to_formatted_string(&Locale::en),
            report.mismatches.len(),
            report.unpaired
        ),
        format!(
            "coverage: closed={}, {} gap(s)",
            report.closed,
            report.gaps.len()
        ),
        format!(
            "simulation time: {} ns, real time: {:.3} s, speed: {} ns/s",
            sim_ns.to_formatted_string(&Locale::en),
            report.wall_secs,
            speed.to_formatted_string(&Locale::en)
        ),
    ];
    for m in report.mismatches.iter().take(MISSING_SHOWN) {
        lines.push(format!("  mismatch {}", m));
    }
    lines.join("\n")
}

/// One test case per run.
pub fn write_junit(path: &Path, suite: &str, results: &[RunResult]) -> TbResult<()> {
    let mut test_cases = Vec::new();
    for (config, result) in results {
        let tc = match result {
            Ok(report) => {
                let time = Duration::seconds_f64(report.wall_secs);
                match report.clone().into_result() {
                    Ok(_) => TestCaseBuilder::success(&report.name, time),
                    Err(e) => {
                        TestCaseBuilder::failure(&report.name, time, "failure", &e.to_string())
                    }
                }
            }
            Err(e) => {
                TestCaseBuilder::error(&config.name(), Duration::ZERO, "error", &e.to_string())
            }
        }
        .build();
        test_cases.push(tc);
    }

    let test_suite = TestSuiteBuilder::new(suite).add_testcases(test_cases).build();
    let report = ReportBuilder::new().add_testsuite(test_suite).build();
    let file = File::create(path)?;
    report
        .write_xml(BufWriter::new(file))
        .map_err(|e| TbError::Report(e.to_string()))
}

/// Pretty-printed JSON, e.g. a coverage snapshot.
pub fn write_json(path: &Path, value: &impl Serialize) -> TbResult<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)
        .map_err(|e| TbError::Report(e.to_string()))
}
