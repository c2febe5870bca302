use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::model::RunManifest;
use crate::report::{REPORT_FILE, read_final_shell};
use crate::util::{default_manifest_path, read_json};

pub fn run(args: StatusArgs) -> Result<()> {
    let manifest_path = args
        .manifest_path
        .clone()
        .unwrap_or_else(|| default_manifest_path(&args.work_dir));

    info!(work_dir = %args.work_dir.display(), "status requested");

    let archives = discover_archives(&args.work_dir)?;
    if archives.is_empty() {
        warn!(work_dir = %args.work_dir.display(), "no archived statistics reports");
    }
    for path in &archives {
        match read_final_shell(path) {
            Ok(metrics) => info!(
                report = %path.display(),
                completeness = metrics.completeness,
                i_over_sigma = metrics.i_over_sigma,
                cc_half = metrics.cc_half,
                cc_half_significant = metrics.cc_half_significant,
                "archived report"
            ),
            Err(err) => warn!(report = %path.display(), error = %err, "unreadable archived report"),
        }
    }

    if manifest_path.exists() {
        let manifest: RunManifest = read_json(&manifest_path)?;
        info!(
            started_at = %manifest.started_at,
            finished_at = %manifest.finished_at,
            attempts = manifest.attempts.len(),
            good_resolution = manifest.good_resolution,
            best_resolution = manifest.best_resolution,
            converged = manifest.converged,
            final_report = %manifest.final_report,
            "last run"
        );
    } else {
        warn!(path = %manifest_path.display(), "run manifest missing");
    }

    Ok(())
}

fn discover_archives(work_dir: &Path) -> Result<Vec<PathBuf>> {
    let prefix = format!("{REPORT_FILE}_");
    let mut archives = Vec::new();

    let entries =
        fs::read_dir(work_dir).with_context(|| format!("failed to read {}", work_dir.display()))?;
    for entry in entries {
        let entry =
            entry.with_context(|| format!("failed to read entry in {}", work_dir.display()))?;
        let path = entry.path();

        let is_archive = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.starts_with(&prefix))
            .unwrap_or(false);
        if is_archive && path.is_file() {
            archives.push(path);
        }
    }

    archives.sort();
    Ok(archives)
}
