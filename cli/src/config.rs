//! Campaign settings: built-in defaults, then the TOML file, then
//! command-line flags, in rising precedence.

use std::fs;
use std::path::Path;

use alembic::{ArithmeticMode, CampaignConfig, PolicyKind};
use anyhow::{Context, Result};
use serde::Deserialize;

/// On-disk campaign settings. Every field is optional; absent fields fall
/// back to the engine defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CampaignFile {
    pub policy: Option<String>,
    pub runs: Option<u32>,
    pub depth: Option<u32>,
    pub seed: Option<u64>,
    pub check_every: Option<u32>,
    pub abort_on_failure: Option<bool>,
    pub arithmetic: Option<String>,
}

/// Merge command-line flags over the settings file over the defaults into
/// one runnable configuration, plus the list of policies to drive.
///
/// The returned config carries the first selected policy; callers running
/// several overwrite `policy` per campaign.
#[allow(clippy::too_many_arguments)]
pub fn resolve(
    config_path: Option<&Path>,
    policy: Option<&str>,
    runs: Option<u32>,
    depth: Option<u32>,
    seed: Option<u64>,
    check_every: Option<u32>,
    abort_on_failure: bool,
    arithmetic: Option<&str>,
) -> Result<(Vec<PolicyKind>, CampaignConfig)> {
    let file = match config_path {
        Some(path) => load_file(path)?,
        None => CampaignFile::default(),
    };
    let defaults = CampaignConfig::default();

    let policy_text = policy
        .map(str::to_string)
        .or(file.policy)
        .unwrap_or_else(|| defaults.policy.to_string());
    let policies = parse_policies(&policy_text)?;

    let arithmetic = match arithmetic.map(str::to_string).or(file.arithmetic) {
        Some(text) => parse_arithmetic(&text)?,
        None => defaults.arithmetic,
    };

    let config = CampaignConfig {
        policy: policies[0],
        runs: runs.or(file.runs).unwrap_or(defaults.runs),
        depth: depth.or(file.depth).unwrap_or(defaults.depth),
        seed: seed.or(file.seed).unwrap_or(defaults.seed),
        abort_on_failure: abort_on_failure
            || file.abort_on_failure.unwrap_or(defaults.abort_on_failure),
        check_every: check_every.or(file.check_every).unwrap_or(defaults.check_every),
        arithmetic,
    };

    if config.runs == 0 {
        anyhow::bail!("runs must be at least 1");
    }
    if config.depth == 0 {
        anyhow::bail!("depth must be at least 1");
    }

    Ok((policies, config))
}

fn load_file(path: &Path) -> Result<CampaignFile> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
    toml::from_str(&data)
        .with_context(|| format!("Failed to parse settings file: {}", path.display()))
}

fn parse_policies(text: &str) -> Result<Vec<PolicyKind>> {
    if text == "all" {
        return Ok(PolicyKind::ALL.to_vec());
    }
    Ok(vec![parse_policy(text)?])
}

fn parse_policy(text: &str) -> Result<PolicyKind> {
    match text {
        "loose" => Ok(PolicyKind::Loose),
        "strict" => Ok(PolicyKind::Strict),
        "discriminate" => Ok(PolicyKind::Discriminate),
        _ => anyhow::bail!(
            "Unknown policy: {}. Use loose, strict, discriminate, or all",
            text
        ),
    }
}

fn parse_arithmetic(text: &str) -> Result<ArithmeticMode> {
    match text {
        "saturating" => Ok(ArithmeticMode::Saturating),
        "panicking" => Ok(ArithmeticMode::Panicking),
        _ => anyhow::bail!(
            "Unknown arithmetic mode: {}. Use saturating or panicking",
            text
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn settings_file(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_apply_without_file_or_flags() {
        let (policies, config) =
            resolve(None, None, None, None, None, None, false, None).unwrap();
        let defaults = CampaignConfig::default();
        assert_eq!(policies, vec![defaults.policy]);
        assert_eq!(config.runs, defaults.runs);
        assert_eq!(config.depth, defaults.depth);
        assert_eq!(config.seed, defaults.seed);
        assert!(!config.abort_on_failure);
    }

    #[test]
    fn file_values_override_defaults() {
        let file = settings_file(
            "policy = \"strict\"\nruns = 3\ndepth = 64\nseed = 99\n\
             check_every = 16\nabort_on_failure = true\narithmetic = \"panicking\"\n",
        );
        let (policies, config) =
            resolve(Some(file.path()), None, None, None, None, None, false, None).unwrap();
        assert_eq!(policies, vec![PolicyKind::Strict]);
        assert_eq!(config.runs, 3);
        assert_eq!(config.depth, 64);
        assert_eq!(config.seed, 99);
        assert_eq!(config.check_every, 16);
        assert!(config.abort_on_failure);
        assert_eq!(config.arithmetic, ArithmeticMode::Panicking);
    }

    #[test]
    fn flags_override_the_file() {
        let file = settings_file("policy = \"strict\"\nruns = 3\nseed = 99\n");
        let (policies, config) = resolve(
            Some(file.path()),
            Some("loose"),
            Some(10),
            None,
            None,
            None,
            false,
            None,
        )
        .unwrap();
        assert_eq!(policies, vec![PolicyKind::Loose]);
        assert_eq!(config.runs, 10);
        // Untouched by flags, still from the file.
        assert_eq!(config.seed, 99);
    }

    #[test]
    fn all_selects_every_policy_in_order() {
        let (policies, _) =
            resolve(None, Some("all"), None, None, None, None, false, None).unwrap();
        assert_eq!(policies, PolicyKind::ALL.to_vec());
    }

    #[test]
    fn unknown_policy_is_rejected() {
        let err = resolve(None, Some("lenient"), None, None, None, None, false, None)
            .unwrap_err();
        assert!(err.to_string().contains("Unknown policy"));
    }

    #[test]
    fn unknown_file_keys_are_rejected() {
        let file = settings_file("runs = 3\nrun_depth = 64\n");
        let err = resolve(Some(file.path()), None, None, None, None, None, false, None)
            .unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[test]
    fn zero_runs_are_rejected() {
        let err = resolve(None, None, Some(0), None, None, None, false, None).unwrap_err();
        assert!(err.to_string().contains("runs"));
    }
}
