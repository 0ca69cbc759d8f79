//! End-of-run summary: per-repository table plus the totals line.

use std::path::Path;

use chrono::Local;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use reposync_core::{Outcome, RunSummary};

#[derive(Tabled)]
struct ResultRow {
    #[tabled(rename = "repository")]
    repo: String,
    #[tabled(rename = "outcome")]
    outcome: String,
    #[tabled(rename = "time")]
    elapsed: String,
}

pub fn print_summary(summary: &RunSummary, root: &Path, dry_run: bool) {
    let separator = "■".repeat(60).bright_black().to_string();
    let mode = if dry_run { " (dry run)" } else { "" };

    println!("{separator}");
    println!(
        "reposync v{} | {} | started {}{mode}",
        env!("CARGO_PKG_VERSION"),
        root.display(),
        summary
            .started_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S"),
    );

    if summary.results.is_empty() {
        println!("No repositories found.");
    } else {
        let rows: Vec<ResultRow> = summary
            .results
            .iter()
            .map(|r| ResultRow {
                repo: r.repo.to_string(),
                outcome: r.outcome.to_string(),
                elapsed: format_elapsed(r.elapsed_ms),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }

    let line = summary.summary_line();
    let line = if summary.is_success() {
        line.green().bold()
    } else {
        line.red().bold()
    };
    println!("{line}");

    for outcome in [Outcome::Failed, Outcome::Timeout, Outcome::Unknown] {
        let names: Vec<&str> = summary
            .results
            .iter()
            .filter(|r| r.outcome == outcome)
            .map(|r| r.repo.as_str())
            .collect();
        if !names.is_empty() {
            println!("{} {}", indicator(outcome), names.join(", "));
        }
    }
    println!("{separator}");
}

fn indicator(outcome: Outcome) -> String {
    let label = format!("{outcome}:");
    match outcome {
        Outcome::Failed => label.red().bold().to_string(),
        Outcome::Timeout => label.yellow().bold().to_string(),
        _ => label.magenta().bold().to_string(),
    }
}

fn format_elapsed(ms: u64) -> String {
    if ms < 1_000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1_000.0)
    } else {
        format!("{}m{:02}s", ms / 60_000, (ms % 60_000) / 1_000)
    }
}
