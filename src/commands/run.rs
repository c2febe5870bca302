use anyhow::{Result, bail};
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::inp::{CrystalForm, SpaceGroup, UnitCell};
use crate::model::{RunManifest, SearchSettings, Thresholds};
use crate::runner::{ProcessRunner, REFLECTIONS_FILE};
use crate::search::SearchSession;
use crate::util::{
    default_manifest_path, now_utc_string, sha256_file_if_present, write_json_pretty,
};

pub fn run(args: RunArgs) -> Result<()> {
    let started_at = now_utc_string();

    let thresholds = Thresholds::from_args(&args.thresholds)?;
    let settings = search_settings(&args)?;
    let crystal_form = crystal_form(&args)?;

    if !args.work_dir.is_dir() {
        bail!("working directory does not exist: {}", args.work_dir.display());
    }
    let manifest_path = args
        .manifest_path
        .clone()
        .unwrap_or_else(|| default_manifest_path(&args.work_dir));

    info!(
        work_dir = %args.work_dir.display(),
        images = %args.image_template,
        min_completeness = thresholds.min_completeness,
        min_i_over_sigma = thresholds.min_i_over_sigma,
        min_cc_half = thresholds.min_cc_half,
        "starting resolution search"
    );

    let mut runner = ProcessRunner::new(
        args.work_dir.clone(),
        args.image_template.clone(),
        crystal_form,
    );
    let outcome = SearchSession::new(thresholds, settings).run(&mut runner)?;

    let manifest = RunManifest {
        manifest_version: 1,
        started_at,
        finished_at: now_utc_string(),
        image_template: args.image_template.clone(),
        work_dir: args.work_dir.display().to_string(),
        thresholds,
        settings,
        good_resolution: outcome.good_resolution,
        best_resolution: outcome.best_resolution,
        converged: outcome.converged,
        final_report: outcome.final_report.display().to_string(),
        final_report_sha256: sha256_file_if_present(&outcome.final_report)?,
        reflections_sha256: sha256_file_if_present(&args.work_dir.join(REFLECTIONS_FILE))?,
        attempts: outcome.attempts,
    };
    write_json_pretty(&manifest_path, &manifest)?;
    info!(path = %manifest_path.display(), "wrote run manifest");

    if !manifest.converged {
        warn!("thresholds were never met; the reported resolution is the search boundary");
    }
    println!("********** Done at {:.2} A! **********", manifest.best_resolution);

    Ok(())
}

fn search_settings(args: &RunArgs) -> Result<SearchSettings> {
    for (label, value) in [
        ("start resolution", args.start_resolution),
        ("resolution step size", args.step_size),
        ("max resolution", args.max_resolution),
    ] {
        if !value.is_finite() {
            bail!("{label} must be a finite number (got {value})");
        }
    }
    if !(args.start_resolution > 0.0) {
        bail!("start resolution must be positive (got {})", args.start_resolution);
    }
    if !(args.step_size > 0.0) {
        bail!("resolution step size must be positive (got {})", args.step_size);
    }
    if !(args.max_resolution >= args.start_resolution) {
        bail!(
            "max resolution {} is higher than the start resolution {}",
            args.max_resolution,
            args.start_resolution
        );
    }

    Ok(SearchSettings {
        start_resolution: args.start_resolution,
        step_size: args.step_size,
        max_resolution: args.max_resolution,
        only_correct_loops: args.only_correct_loops,
        convert: !args.skip_conversion,
    })
}

fn crystal_form(args: &RunArgs) -> Result<Option<CrystalForm>> {
    let space_group = args
        .space_group
        .as_deref()
        .map(str::parse::<SpaceGroup>)
        .transpose()?;
    let unit_cell = args
        .unit_cell_constants
        .as_deref()
        .map(str::parse::<UnitCell>)
        .transpose()?;

    match (space_group, unit_cell) {
        (Some(space_group), Some(unit_cell)) => Ok(Some(CrystalForm {
            space_group,
            unit_cell,
        })),
        (None, None) => Ok(None),
        _ => {
            warn!("crystal form needs both space group number and unit cell constants; ignoring");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::cli::ThresholdArgs;

    fn sample_args() -> RunArgs {
        RunArgs {
            image_template: "../img/ptp1b_1_?????.cbf".to_string(),
            thresholds: ThresholdArgs {
                min_completeness: 90.0,
                min_i_sigma: 1.0,
                min_cc_half: 50.0,
            },
            start_resolution: 1.4,
            step_size: 0.05,
            max_resolution: 3.5,
            space_group: None,
            unit_cell_constants: None,
            only_correct_loops: false,
            work_dir: PathBuf::from("."),
            skip_conversion: false,
            manifest_path: None,
        }
    }

    #[test]
    fn cc_half_on_fractional_scale_is_rejected() {
        let mut args = sample_args();
        args.thresholds.min_cc_half = 0.5;
        let err = Thresholds::from_args(&args.thresholds).expect_err("0-1 scale must fail");
        assert!(err.to_string().contains("0-100"));
    }

    #[test]
    fn search_settings_reject_inverted_range() {
        let mut args = sample_args();
        args.max_resolution = 1.2;
        assert!(search_settings(&args).is_err());

        let mut args = sample_args();
        args.step_size = 0.0;
        assert!(search_settings(&args).is_err());
    }

    #[test]
    fn non_finite_flags_are_rejected() {
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let mut args = sample_args();
            args.max_resolution = value;
            assert!(search_settings(&args).is_err(), "max {value} must fail");

            let mut args = sample_args();
            args.start_resolution = value;
            assert!(search_settings(&args).is_err(), "start {value} must fail");

            let mut args = sample_args();
            args.step_size = value;
            assert!(search_settings(&args).is_err(), "step {value} must fail");

            let mut args = sample_args();
            args.thresholds.min_cc_half = value;
            assert!(Thresholds::from_args(&args.thresholds).is_err(), "cc {value} must fail");

            let mut args = sample_args();
            args.thresholds.min_completeness = value;
            assert!(Thresholds::from_args(&args.thresholds).is_err());

            let mut args = sample_args();
            args.thresholds.min_i_sigma = value;
            assert!(Thresholds::from_args(&args.thresholds).is_err());
        }
        assert!(search_settings(&sample_args()).is_ok());
        assert!(Thresholds::from_args(&sample_args().thresholds).is_ok());
    }

    #[test]
    fn skip_conversion_disables_convert() {
        let mut args = sample_args();
        args.skip_conversion = true;
        let settings = search_settings(&args).expect("settings should validate");
        assert!(!settings.convert);
        assert_eq!(settings.start_resolution, 1.4);
    }

    #[test]
    fn crystal_form_requires_both_parts() {
        let mut args = sample_args();
        args.space_group = Some("152".to_string());
        assert!(crystal_form(&args).expect("valid input").is_none());

        args.unit_cell_constants = Some("88,88,104,90,90,120".to_string());
        let form = crystal_form(&args)
            .expect("valid input")
            .expect("crystal form should be present");
        assert_eq!(form.unit_cell.to_string(), "88 88 104 90 90 120");

        args.unit_cell_constants = Some("88,88,104".to_string());
        assert!(crystal_form(&args).is_err());
    }
}
