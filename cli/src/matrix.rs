//! The `faults` command: one campaign per (planted defect, policy) pair,
//! tabulating which cells flag the divergence and which stay silent.
//!
//! Silent cells are not all equal: some defects sit in places a policy
//! never looks (allowances under loose, malformed calls under
//! discriminate), others simply were not drawn at this seed and depth.

use alembic::{run_campaign, CampaignConfig, CampaignError, CampaignReport, PolicyKind};
use alembic_ledger::faults::{
    NoDebitLedger, OverwritingRegistrar, ShadowShortfallLedger, StickyAllowanceLedger,
    SupplyDriftLedger, TruncatingBatchLedger,
};
use anyhow::Result;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FaultKind {
    NoDebit,
    SupplyDrift,
    ShadowShortfall,
    OverwritingRegistrar,
    StickyAllowance,
    TruncatingBatch,
}

impl FaultKind {
    const ALL: [FaultKind; 6] = [
        FaultKind::NoDebit,
        FaultKind::SupplyDrift,
        FaultKind::ShadowShortfall,
        FaultKind::OverwritingRegistrar,
        FaultKind::StickyAllowance,
        FaultKind::TruncatingBatch,
    ];

    fn name(self) -> &'static str {
        match self {
            FaultKind::NoDebit => "no_debit",
            FaultKind::SupplyDrift => "supply_drift",
            FaultKind::ShadowShortfall => "shadow_shortfall",
            FaultKind::OverwritingRegistrar => "overwriting_registrar",
            FaultKind::StickyAllowance => "sticky_allowance",
            FaultKind::TruncatingBatch => "truncating_batch",
        }
    }

    fn describe(self) -> &'static str {
        match self {
            FaultKind::NoDebit => "transfers credit the receiver without debiting the sender",
            FaultKind::SupplyDrift => "recorded supply inflates by one on every transfer",
            FaultKind::ShadowShortfall => "shadow credits land one unit short",
            FaultKind::OverwritingRegistrar => "re-registration rotates the shadow handle",
            FaultKind::StickyAllowance => "spent allowances never burn down",
            FaultKind::TruncatingBatch => "mismatched batches apply the zipped prefix",
        }
    }
}

fn run_cell(
    fault: FaultKind,
    config: &CampaignConfig,
) -> Result<CampaignReport, CampaignError> {
    match fault {
        FaultKind::NoDebit => run_campaign(config, NoDebitLedger::new),
        FaultKind::SupplyDrift => run_campaign(config, SupplyDriftLedger::new),
        FaultKind::ShadowShortfall => run_campaign(config, ShadowShortfallLedger::new),
        FaultKind::OverwritingRegistrar => run_campaign(config, OverwritingRegistrar::new),
        FaultKind::StickyAllowance => run_campaign(config, StickyAllowanceLedger::new),
        FaultKind::TruncatingBatch => run_campaign(config, TruncatingBatchLedger::new),
    }
}

type Cell = Result<CampaignReport, CampaignError>;

pub fn run_matrix(
    policies: &[PolicyKind],
    settings: &CampaignConfig,
    verbose: bool,
) -> Result<()> {
    let bar = ProgressBar::new((FaultKind::ALL.len() * policies.len()) as u64);
    bar.set_style(
        ProgressStyle::with_template("[{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );

    let mut rows: Vec<(FaultKind, Vec<(PolicyKind, Cell)>)> = Vec::new();
    for fault in FaultKind::ALL {
        let mut row = Vec::new();
        for &policy in policies {
            bar.set_message(format!("{} vs {}", fault.name(), policy));
            let mut config = settings.clone();
            config.policy = policy;
            row.push((policy, run_cell(fault, &config)));
            bar.inc(1);
        }
        rows.push((fault, row));
    }
    bar.finish_and_clear();

    print!("{}", format!("{:<24}", "defect").bold());
    for &policy in policies {
        print!(" {}", format!("{:<26}", policy).bold());
    }
    println!();

    let mut caught = 0usize;
    for (fault, row) in &rows {
        print!("{:<24}", fault.name());
        for (_, cell) in row {
            match cell {
                Err(err) => {
                    caught += 1;
                    let text = format!("caught (run {}, step {})", err.run_index, err.step);
                    print!(" {}", format!("{text:<26}").green());
                }
                Ok(_) => print!(" {}", format!("{:<26}", "missed").yellow()),
            }
        }
        println!();
    }
    println!(
        "{} {caught} of {} cells flagged the defect",
        "matrix:".bright_green().bold(),
        rows.len() * policies.len()
    );

    if verbose {
        println!();
        for (fault, row) in &rows {
            for (policy, cell) in row {
                if let Err(err) = cell {
                    println!(
                        "{} {} vs {policy}: {err}",
                        "caught:".bright_cyan(),
                        fault.name()
                    );
                }
            }
        }
        println!();
        for fault in FaultKind::ALL {
            println!(
                "{} {}",
                format!("{:<24}", fault.name()).bright_cyan(),
                fault.describe()
            );
        }
    }

    Ok(())
}
