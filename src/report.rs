use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use regex::Regex;

use crate::model::{Criterion, QualityMetrics, Thresholds};

pub const REPORT_FILE: &str = "CORRECT.LP";

const COMPLETENESS_COLUMN: usize = 4;
const I_OVER_SIGMA_COLUMN: usize = 8;
const CC_HALF_COLUMN: usize = 10;
const SIGNIFICANCE_MARKER: char = '*';

/// Leading resolution limit followed by observed and unique reflection counts.
const SHELL_ROW_PATTERN: &str = r"^\s+\d+\.\d{2}\s+\d+\s+\d+";

pub fn read_final_shell(path: &Path) -> Result<QualityMetrics> {
    if !path.exists() {
        bail!(
            "statistics report {} does not exist; did XDS fail?",
            path.display()
        );
    }
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    parse_final_shell(&text).with_context(|| format!("failed to parse {}", path.display()))
}

/// Returns the statistics of the textually last shell row.
///
/// CORRECT.LP repeats the per-shell table for data subsets before the table for
/// the whole dataset, so every qualifying row replaces the previous one outright,
/// significance flag included.
pub fn parse_final_shell(report: &str) -> Result<QualityMetrics> {
    let pattern = Regex::new(SHELL_ROW_PATTERN).context("failed to compile shell row regex")?;

    let last = report
        .lines()
        .filter(|line| pattern.is_match(line))
        .try_fold(None, |_, line| parse_shell_row(line).map(Some))?;

    last.context("couldn't find completeness, I/sigma and/or CC1/2 in report; did XDS fail?")
}

fn parse_shell_row(line: &str) -> Result<QualityMetrics> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() <= CC_HALF_COLUMN {
        bail!(
            "shell row has {} columns, expected at least {}: {}",
            parts.len(),
            CC_HALF_COLUMN + 1,
            line.trim()
        );
    }

    let shell_resolution = parse_number(parts[0], "resolution limit", line)?;
    let completeness = parse_number(
        parts[COMPLETENESS_COLUMN].split('%').next().unwrap_or_default(),
        "completeness",
        line,
    )?;
    let i_over_sigma = parse_number(parts[I_OVER_SIGMA_COLUMN], "I/sigma", line)?;
    let cc_token = parts[CC_HALF_COLUMN];
    let cc_half = parse_number(
        cc_token.split(SIGNIFICANCE_MARKER).next().unwrap_or_default(),
        "CC1/2",
        line,
    )?;

    Ok(QualityMetrics {
        shell_resolution,
        completeness,
        i_over_sigma,
        cc_half,
        cc_half_significant: cc_token.contains(SIGNIFICANCE_MARKER),
    })
}

fn parse_number(token: &str, label: &str, line: &str) -> Result<f64> {
    token
        .parse::<f64>()
        .with_context(|| format!("invalid {label} '{token}' in shell row: {}", line.trim()))
}

pub fn failed_criteria(metrics: &QualityMetrics, thresholds: &Thresholds) -> Vec<Criterion> {
    let mut failed = Vec::new();
    if metrics.completeness < thresholds.min_completeness {
        failed.push(Criterion::Completeness);
    }
    if metrics.i_over_sigma < thresholds.min_i_over_sigma {
        failed.push(Criterion::IOverSigma);
    }
    if metrics.cc_half < thresholds.min_cc_half {
        failed.push(Criterion::CcHalf);
    }
    if !metrics.cc_half_significant {
        failed.push(Criterion::CcHalfSignificance);
    }
    failed
}

pub fn conditions_met(metrics: &QualityMetrics, thresholds: &Thresholds) -> bool {
    failed_criteria(metrics, thresholds).is_empty()
}
