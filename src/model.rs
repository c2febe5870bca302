use std::fmt;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::cli::ThresholdArgs;

/// Statistics of the last resolution shell in a CORRECT.LP summary table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub shell_resolution: f64,
    pub completeness: f64,
    pub i_over_sigma: f64,
    pub cc_half: f64,
    pub cc_half_significant: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub min_completeness: f64,
    pub min_i_over_sigma: f64,
    pub min_cc_half: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_completeness: 90.0,
            min_i_over_sigma: 1.0,
            min_cc_half: 50.0,
        }
    }
}

impl Thresholds {
    pub fn from_args(args: &ThresholdArgs) -> Result<Self> {
        for (label, value) in [
            ("minimum completeness", args.min_completeness),
            ("minimum I/sigma", args.min_i_sigma),
            ("minimum CC1/2", args.min_cc_half),
        ] {
            if !value.is_finite() {
                bail!("{label} must be a finite number (got {value})");
            }
        }
        if !(args.min_cc_half > 1.0) {
            bail!(
                "minimum CC1/2 must be given on the 0-100 scale (got {})",
                args.min_cc_half
            );
        }
        if !(0.0..=100.0).contains(&args.min_completeness) {
            bail!(
                "minimum completeness must be a percentage (got {})",
                args.min_completeness
            );
        }
        if args.min_i_sigma < 0.0 {
            bail!("minimum I/sigma must not be negative (got {})", args.min_i_sigma);
        }

        Ok(Self {
            min_completeness: args.min_completeness,
            min_i_over_sigma: args.min_i_sigma,
            min_cc_half: args.min_cc_half,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Criterion {
    Completeness,
    IOverSigma,
    CcHalf,
    CcHalfSignificance,
}

impl Criterion {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completeness => "completeness",
            Self::IOverSigma => "i_over_sigma",
            Self::CcHalf => "cc_half",
            Self::CcHalfSignificance => "cc_half_significance",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initial,
    Coarse,
    Fine,
    Final,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Initial => "initial",
            Self::Coarse => "coarse",
            Self::Fine => "fine",
            Self::Final => "final",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchSettings {
    pub start_resolution: f64,
    pub step_size: f64,
    pub max_resolution: f64,
    pub only_correct_loops: bool,
    pub convert: bool,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            start_resolution: 1.4,
            step_size: 0.05,
            max_resolution: 3.5,
            only_correct_loops: false,
            convert: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub phase: Phase,
    pub resolution: f64,
    pub archived_report: String,
    pub metrics: Option<QualityMetrics>,
    pub conditions_met: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub manifest_version: u32,
    pub started_at: String,
    pub finished_at: String,
    pub image_template: String,
    pub work_dir: String,
    pub thresholds: Thresholds,
    pub settings: SearchSettings,
    pub attempts: Vec<AttemptRecord>,
    pub good_resolution: f64,
    pub best_resolution: f64,
    pub converged: bool,
    pub final_report: String,
    pub final_report_sha256: Option<String>,
    pub reflections_sha256: Option<String>,
}
