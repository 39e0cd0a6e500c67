//! Terminal run report.

use colored::*;

use crate::catalog::SourceDatabase;
use crate::orchestrator::{LoadOutcome, RunAbort, RunObserver, RunStatistics, TableReport};

/// Prints one line per table as the run progresses.
#[derive(Debug, Default)]
pub struct ConsoleReporter {
    verbose: bool,
}

impl ConsoleReporter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

/// Single report line for a table, without colors.
pub fn outcome_line(report: &TableReport) -> String {
    match &report.outcome {
        LoadOutcome::Loaded { rows } => format!("{} ({} rows)", report.target, rows),
        LoadOutcome::SkippedAlreadyLoaded { rows } => {
            format!("{} already loaded ({} rows)", report.target, rows)
        }
        LoadOutcome::FailedCreate { kind, reason } | LoadOutcome::FailedLoad { kind, reason } => {
            format!("{} {}: {}", report.target, kind, reason)
        }
    }
}

impl RunObserver for ConsoleReporter {
    fn on_database(&mut self, database: &SourceDatabase) {
        println!();
        println!(
            "{} {} {}",
            "Database:".cyan().bold(),
            database.name.white().bold(),
            format!("({} tables)", database.tables.len()).dimmed()
        );
    }

    fn on_table(&mut self, report: &TableReport) {
        let line = outcome_line(report);
        match report.outcome {
            LoadOutcome::Loaded { .. } => println!("  {} {}", "✓".green(), line),
            LoadOutcome::SkippedAlreadyLoaded { .. } => println!("  {} {}", "○".yellow(), line.dimmed()),
            _ => println!("  {} {}", "✗".red(), line.red()),
        }
        if self.verbose {
            if report.attempts > 1 {
                println!("      {}", format!("created after {} attempts", report.attempts).dimmed());
            }
            for warning in &report.warnings {
                println!("      {} {}", "⚠".yellow(), warning.dimmed());
            }
        }
    }

    fn on_abort(&mut self, abort: &RunAbort) {
        println!(
            "  {} {} {}: {}",
            "✗".red().bold(),
            abort.target,
            abort.kind.to_string().red().bold(),
            abort.message
        );
    }
}

/// Command that retries only what did not finish.
pub fn rerun_hint(stats: &RunStatistics) -> Option<String> {
    let targets = stats.rerun_targets();
    if targets.is_empty() {
        return None;
    }
    let only: Vec<String> = targets.iter().map(|t| format!("--only {}", t)).collect();
    Some(format!("snowload run {}", only.join(" ")))
}

/// Print the summary block that ends every run.
pub fn print_summary(stats: &RunStatistics) {
    let counts = stats.counts();
    let elapsed = stats.elapsed();

    println!();
    println!("{}", "═══════════════════════════════════════════════════".dimmed());
    println!("{}", "  Summary".bold());
    println!("{}", "═══════════════════════════════════════════════════".dimmed());
    println!("  {:<16} {}", "Loaded:", counts.loaded.to_string().green());
    println!("  {:<16} {}", "Rows loaded:", counts.rows_loaded);
    println!("  {:<16} {}", "Skipped:", counts.skipped.to_string().yellow());
    println!("  {:<16} {}", "Create failed:", paint_failures(counts.failed_create));
    println!("  {:<16} {}", "Load failed:", paint_failures(counts.failed_load));
    println!(
        "  {:<16} {:.1}s",
        "Duration:",
        elapsed.num_milliseconds() as f64 / 1000.0
    );

    let failures: Vec<&TableReport> = stats.failures().collect();
    if !failures.is_empty() {
        println!();
        println!("{}", "Failed tables:".red().bold());
        for report in failures {
            println!("  {} {}", "✗".red(), outcome_line(report));
        }
    }

    if let Some(abort) = &stats.aborted {
        println!();
        println!(
            "{} {} while processing {}",
            "Run aborted:".red().bold(),
            abort.message,
            abort.target
        );
        if !stats.not_processed.is_empty() {
            println!(
                "  {}",
                format!("{} selected tables were not reached", stats.not_processed.len()).yellow()
            );
        }
    }

    if let Some(hint) = rerun_hint(stats) {
        println!();
        println!("{} {}", "Rerun:".cyan(), hint);
    } else {
        println!();
        println!("{}", "✓ All tables loaded".green().bold());
    }
}

fn paint_failures(n: usize) -> ColoredString {
    match n {
        0 => n.to_string().normal(),
        _ => n.to_string().red().bold(),
    }
}
