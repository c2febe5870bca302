use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::cli::StatsArgs;
use crate::model::{Criterion, QualityMetrics, Thresholds};
use crate::report::{failed_criteria, read_final_shell};

#[derive(Debug, Serialize)]
struct StatsSummary {
    report: String,
    metrics: QualityMetrics,
    thresholds: Thresholds,
    conditions_met: bool,
    failed: Vec<Criterion>,
}

pub fn run(args: StatsArgs) -> Result<()> {
    let thresholds = Thresholds::from_args(&args.thresholds)?;
    let metrics = read_final_shell(&args.report)?;
    let failed = failed_criteria(&metrics, &thresholds);

    info!(
        report = %args.report.display(),
        shell_resolution = metrics.shell_resolution,
        completeness = metrics.completeness,
        i_over_sigma = metrics.i_over_sigma,
        cc_half = metrics.cc_half,
        cc_half_significant = metrics.cc_half_significant,
        conditions_met = failed.is_empty(),
        "final shell statistics"
    );

    if args.json {
        let summary = StatsSummary {
            report: args.report.display().to_string(),
            metrics,
            thresholds,
            conditions_met: failed.is_empty(),
            failed,
        };
        let rendered =
            serde_json::to_string_pretty(&summary).context("failed to serialize statistics")?;
        println!("{rendered}");
    }

    Ok(())
}
