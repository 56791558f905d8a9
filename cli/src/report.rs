//! Campaign report rendering: colored terminal summaries and JSON export.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use alembic::{CampaignError, CampaignReport, OpKind};
use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;

pub fn print_report(report: &CampaignReport, verbose: bool) {
    println!(
        "  {} {} completed, {} aborted, {} sweeps",
        "runs:".bright_cyan(),
        report.runs_completed,
        report.runs_aborted,
        report.sweeps
    );
    println!(
        "  {} {} executed, {} rejected, {} refused",
        "ops:".bright_cyan(),
        report.total_executed(),
        report.total_rejected(),
        report.total_refused()
    );
    println!(
        "  {} {} accounts, {} token ids, {} registered (largest run)",
        "rosters:".bright_cyan(),
        report.max_accounts,
        report.max_token_ids,
        report.max_registered
    );

    if verbose {
        println!(
            "  {:<28} {:>9} {:>9} {:>9}",
            "operation".bold(),
            "executed".bold(),
            "rejected".bold(),
            "refused".bold()
        );
        for op in OpKind::ALL {
            let stats = report.stats(op);
            let refused = format!("{:>9}", stats.refused);
            let refused = if stats.refused > 0 {
                refused.yellow()
            } else {
                refused.normal()
            };
            println!(
                "  {:<28} {:>9} {:>9} {}",
                op.name(),
                stats.executed,
                stats.rejected,
                refused
            );
        }
    }

    println!("  {}", "no divergence found".green());
}

pub fn print_failure(err: &CampaignError) {
    println!("  {}", "divergence found".red().bold());
    println!("  {err}");
}

// ============================================================================
// JSON export
// ============================================================================

#[derive(Serialize)]
struct OpDoc {
    executed: u64,
    rejected: u64,
    refused: u64,
}

#[derive(Serialize)]
pub struct ReportDoc {
    policy: &'static str,
    runs_completed: u32,
    runs_aborted: u32,
    sweeps: u64,
    executed: u64,
    rejected: u64,
    refused: u64,
    max_accounts: usize,
    max_token_ids: usize,
    max_registered: usize,
    ops: BTreeMap<&'static str, OpDoc>,
}

impl From<&CampaignReport> for ReportDoc {
    fn from(report: &CampaignReport) -> Self {
        let ops = report
            .ops
            .iter()
            .map(|(op, stats)| {
                (
                    op.name(),
                    OpDoc {
                        executed: stats.executed,
                        rejected: stats.rejected,
                        refused: stats.refused,
                    },
                )
            })
            .collect();
        Self {
            policy: report.policy.as_str(),
            runs_completed: report.runs_completed,
            runs_aborted: report.runs_aborted,
            sweeps: report.sweeps,
            executed: report.total_executed(),
            rejected: report.total_rejected(),
            refused: report.total_refused(),
            max_accounts: report.max_accounts,
            max_token_ids: report.max_token_ids,
            max_registered: report.max_registered,
            ops,
        }
    }
}

/// Write all reports of one invocation as a single JSON array.
pub fn write_json(reports: &[CampaignReport], path: &Path) -> Result<()> {
    let docs: Vec<ReportDoc> = reports.iter().map(ReportDoc::from).collect();
    let body = serde_json::to_string_pretty(&docs).context("Failed to serialize reports")?;
    fs::write(path, body)
        .with_context(|| format!("Failed to write report file: {}", path.display()))
}
