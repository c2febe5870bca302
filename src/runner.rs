use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::inp::{
    CrystalForm, Directive, FULL_PIPELINE_INDEXING_JOBS, FULL_PIPELINE_INTEGRATION_JOBS,
    REFINEMENT_JOBS, rewrite_inp,
};
use crate::model::QualityMetrics;
use crate::report::{REPORT_FILE, read_final_shell};

pub const XDS_PROGRAM: &str = "xds";
pub const GENERATE_INP_PROGRAM: &str = "generate_XDS.INP";
pub const XDSCONV_PROGRAM: &str = "xdsconv";
pub const REFLECTIONS_FILE: &str = "XDS_ASCII.HKL";
pub const XDSCONV_INP_FILE: &str = "XDSCONV.INP";
pub const CONVERSION_SCRIPT_FILE: &str = "run_xdsconv.sh";

const XDSCONV_INP: &str = "
INPUT_FILE= XDS_ASCII.HKL
OUTPUT_FILE= temp.hkl CCP4
FRIEDEL'S_LAW= TRUE";

const CONVERSION_SCRIPT: &str = "
f2mtz HKLOUT temp.mtz<F2MTZ.INP
cad HKLIN1 temp.mtz HKLOUT XDS_ASCII.mtz<<EOF
LABIN FILE 1 ALL
END
EOF";

/// Name under which a CORRECT.LP copy is kept after each run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArchiveTag {
    Attempt(f64),
    Final(f64),
}

impl fmt::Display for ArchiveTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attempt(resolution) => write!(f, "{REPORT_FILE}_{resolution:.2}"),
            Self::Final(resolution) => write!(f, "{REPORT_FILE}_{resolution:.2}_FINAL"),
        }
    }
}

/// Everything the resolution search needs from XDS and the working directory.
pub trait XdsRunner {
    /// Generates XDS.INP, applies the crystal form and the starting resolution.
    fn prepare_input(&mut self, resolution: f64) -> Result<()>;

    /// Indexing and integration through CORRECT at the resolution already in XDS.INP.
    fn run_full_pipeline(&mut self) -> Result<()>;

    /// CORRECT only, at `resolution`.
    fn run_refinement(&mut self, resolution: f64) -> Result<()>;

    fn report_exists(&self) -> bool;

    fn final_shell(&self) -> Result<QualityMetrics>;

    fn archive_report(&mut self, tag: ArchiveTag) -> Result<PathBuf>;

    /// XDS_ASCII.HKL to MTZ via xdsconv, f2mtz and cad.
    fn run_conversion(&mut self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct ProcessRunner {
    work_dir: PathBuf,
    image_template: String,
    crystal_form: Option<CrystalForm>,
}

impl ProcessRunner {
    pub fn new(work_dir: PathBuf, image_template: String, crystal_form: Option<CrystalForm>) -> Self {
        Self {
            work_dir,
            image_template,
            crystal_form,
        }
    }

    fn execute(&self, program: &str, args: &[&str]) -> Result<()> {
        info!(program, args = ?args, "running external program");
        let status = Command::new(program)
            .args(args)
            .current_dir(&self.work_dir)
            .status()
            .with_context(|| format!("failed to execute {} {}", program, args.join(" ")))?;

        if !status.success() {
            warn!(program, status = %status, "external program returned non-zero exit status");
        }
        Ok(())
    }

    fn run_jobs(&self, jobs: &str) -> Result<()> {
        rewrite_inp(&self.work_dir, &[Directive::Jobs(jobs.to_string())])?;
        self.execute(XDS_PROGRAM, &[])
    }
}

impl XdsRunner for ProcessRunner {
    fn prepare_input(&mut self, resolution: f64) -> Result<()> {
        let quoted_template = format!("\"{}\"", self.image_template);
        self.execute(GENERATE_INP_PROGRAM, &[&quoted_template])?;

        match &self.crystal_form {
            Some(form) => {
                info!(
                    space_group = %form.space_group,
                    unit_cell = %form.unit_cell,
                    "applying crystal form"
                );
                rewrite_inp(
                    &self.work_dir,
                    &[
                        Directive::SpaceGroup(form.space_group),
                        Directive::UnitCell(form.unit_cell.clone()),
                    ],
                )?;
            }
            None => warn!(
                "space group number and unit cell constants not specified; using XDS defaults"
            ),
        }

        rewrite_inp(&self.work_dir, &[Directive::ResolutionRange(resolution)])
    }

    fn run_full_pipeline(&mut self) -> Result<()> {
        // IDXREF regularly complains about unindexed spots at the initial
        // resolution; later CORRECT runs are what flag a bad dataset.
        self.run_jobs(FULL_PIPELINE_INDEXING_JOBS)?;
        self.run_jobs(FULL_PIPELINE_INTEGRATION_JOBS)
    }

    fn run_refinement(&mut self, resolution: f64) -> Result<()> {
        rewrite_inp(
            &self.work_dir,
            &[
                Directive::Jobs(REFINEMENT_JOBS.to_string()),
                Directive::ResolutionRange(resolution),
            ],
        )?;
        self.execute(XDS_PROGRAM, &[])
    }

    fn report_exists(&self) -> bool {
        self.work_dir.join(REPORT_FILE).exists()
    }

    fn final_shell(&self) -> Result<QualityMetrics> {
        read_final_shell(&self.work_dir.join(REPORT_FILE))
    }

    fn archive_report(&mut self, tag: ArchiveTag) -> Result<PathBuf> {
        archive_report(&self.work_dir, tag)
    }

    fn run_conversion(&mut self) -> Result<()> {
        write_conversion_inputs(&self.work_dir)?;
        self.execute(XDSCONV_PROGRAM, &[])?;
        self.execute("sh", &[CONVERSION_SCRIPT_FILE])
    }
}

pub fn archive_report(work_dir: &Path, tag: ArchiveTag) -> Result<PathBuf> {
    let source = work_dir.join(REPORT_FILE);
    let target = work_dir.join(tag.to_string());
    if !source.exists() {
        bail!(
            "cannot archive {}: report is missing; did XDS fail?",
            source.display()
        );
    }
    fs::copy(&source, &target).with_context(|| {
        format!(
            "failed to copy {} to {}",
            source.display(),
            target.display()
        )
    })?;
    Ok(target)
}

pub fn write_conversion_inputs(work_dir: &Path) -> Result<()> {
    let inp_path = work_dir.join(XDSCONV_INP_FILE);
    fs::write(&inp_path, XDSCONV_INP)
        .with_context(|| format!("failed to write {}", inp_path.display()))?;

    let script_path = work_dir.join(CONVERSION_SCRIPT_FILE);
    fs::write(&script_path, CONVERSION_SCRIPT)
        .with_context(|| format!("failed to write {}", script_path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::scratch_dir;

    #[test]
    fn archive_tags_carry_two_decimal_resolution() {
        assert_eq!(ArchiveTag::Attempt(1.4).to_string(), "CORRECT.LP_1.40");
        assert_eq!(ArchiveTag::Attempt(2.0999999999).to_string(), "CORRECT.LP_2.10");
        assert_eq!(ArchiveTag::Final(2.07).to_string(), "CORRECT.LP_2.07_FINAL");
    }

    #[test]
    fn archive_report_copies_current_report() {
        let dir = scratch_dir("archive");
        fs::write(dir.join(REPORT_FILE), "report body").expect("report should be written");

        let archived =
            archive_report(&dir, ArchiveTag::Attempt(1.45)).expect("archive should succeed");

        assert_eq!(archived, dir.join("CORRECT.LP_1.45"));
        assert_eq!(
            fs::read_to_string(&archived).expect("archive should be readable"),
            "report body"
        );
        assert!(dir.join(REPORT_FILE).exists());
    }

    #[test]
    fn archive_report_fails_when_report_is_missing() {
        let dir = scratch_dir("archive_missing");
        assert!(archive_report(&dir, ArchiveTag::Final(2.0)).is_err());
    }

    #[test]
    fn conversion_inputs_use_static_content() {
        let dir = scratch_dir("conversion");
        write_conversion_inputs(&dir).expect("conversion inputs should be written");

        let inp = fs::read_to_string(dir.join(XDSCONV_INP_FILE)).expect("XDSCONV.INP exists");
        assert!(inp.contains("INPUT_FILE= XDS_ASCII.HKL\n"));
        assert!(inp.ends_with("FRIEDEL'S_LAW= TRUE"));

        let script =
            fs::read_to_string(dir.join(CONVERSION_SCRIPT_FILE)).expect("script exists");
        assert!(script.contains("f2mtz HKLOUT temp.mtz<F2MTZ.INP"));
        assert!(script.contains("HKLOUT XDS_ASCII.mtz"));
    }
}
