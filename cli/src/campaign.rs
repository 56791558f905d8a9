//! The `run` command: fuzz campaigns against the reference ledger, one per
//! selected policy.

use std::path::Path;

use alembic::{run_campaign, CampaignConfig, PolicyKind};
use alembic_ledger::MemoryLedger;
use anyhow::Result;
use colored::Colorize;

use crate::report;

pub fn run_campaigns(
    policies: &[PolicyKind],
    settings: &CampaignConfig,
    json: Option<&Path>,
    verbose: bool,
) -> Result<()> {
    let mut reports = Vec::new();
    let mut failures = 0u32;

    for &policy in policies {
        let mut config = settings.clone();
        config.policy = policy;
        println!(
            "{} {} ({} runs x {} ops, seed {:#x})",
            "campaign:".bright_green().bold(),
            policy,
            config.runs,
            config.depth,
            config.seed
        );
        match run_campaign(&config, MemoryLedger::new) {
            Ok(report) => {
                report::print_report(&report, verbose);
                reports.push(report);
            }
            Err(err) => {
                report::print_failure(&err);
                failures += 1;
            }
        }
    }

    if let Some(path) = json {
        report::write_json(&reports, path)?;
        println!("{} {}", "report written to".bright_cyan(), path.display());
    }

    if failures > 0 {
        anyhow::bail!("{failures} campaign(s) found divergences");
    }
    Ok(())
}

pub fn describe_policies() {
    println!("{}", "loose: fire and record".bright_green().bold());
    println!(
        "  Invokes every prepared call and updates the mirror as if it\n\
         \x20 succeeded, whether or not the ledger agreed. Divergence is left\n\
         \x20 entirely to the invariant sweep, which makes this policy a probe\n\
         \x20 of the sweep itself: on a correct ledger the first refused call\n\
         \x20 already splits the two sides, so expect red."
    );
    println!();
    println!("{}", "strict: call first, prove afterward".bright_green().bold());
    println!(
        "  Invokes the call, tolerates refusals, and audits every success:\n\
         \x20 the preconditions that must have held for it, and the exact\n\
         \x20 post-call state the mirror is about to record. Catches all six\n\
         \x20 planted defects."
    );
    println!();
    println!(
        "{}",
        "discriminate: screen, then demand success".bright_green().bold()
    );
    println!(
        "  Evaluates the same predicates as early guards, so only known-valid\n\
         \x20 calls reach the ledger, and any refusal of a screened call is\n\
         \x20 fatal. Blind to defects only malformed or duplicate calls can\n\
         \x20 reach, since it never submits one."
    );
}
