use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Error, Result, bail};
use tracing::debug;

pub const INP_FILE: &str = "XDS.INP";
pub const INP_BACKUP_FILE: &str = "XDS.INP.old";

/// Low-resolution bound written into every INCLUDE_RESOLUTION_RANGE.
pub const LOW_RESOLUTION_LIMIT: u32 = 80;

pub const FULL_PIPELINE_INDEXING_JOBS: &str = "XYCORR INIT COLSPOT IDXREF";
pub const FULL_PIPELINE_INTEGRATION_JOBS: &str = "DEFPIX INTEGRATE CORRECT";
pub const REFINEMENT_JOBS: &str = "CORRECT";

#[derive(Debug, Clone, PartialEq)]
pub struct UnitCell {
    constants: Vec<String>,
}

impl FromStr for UnitCell {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        let constants: Vec<String> = raw.split(',').map(|value| value.trim().to_string()).collect();
        if constants.len() != 6 {
            bail!(
                "unit cell constants need six comma-separated values, got {}: {raw}",
                constants.len()
            );
        }
        for value in &constants {
            let parsed = value
                .parse::<f64>()
                .with_context(|| format!("invalid unit cell constant '{value}' in {raw}"))?;
            if !(parsed > 0.0) {
                bail!("unit cell constant must be positive: {value}");
            }
        }
        Ok(Self { constants })
    }
}

impl fmt::Display for UnitCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.constants.join(" "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceGroup(u32);

impl FromStr for SpaceGroup {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        let number = raw
            .trim()
            .parse::<u32>()
            .with_context(|| format!("invalid space group number: {raw}"))?;
        if !(1..=230).contains(&number) {
            bail!("space group number must be within 1..=230, got {number}");
        }
        Ok(Self(number))
    }
}

impl fmt::Display for SpaceGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CrystalForm {
    pub space_group: SpaceGroup,
    pub unit_cell: UnitCell,
}

/// A single XDS.INP override.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    Jobs(String),
    ResolutionRange(f64),
    SpaceGroup(SpaceGroup),
    UnitCell(UnitCell),
}

impl Directive {
    fn matches(&self, line: &str) -> bool {
        match self {
            Self::Jobs(_) => line.contains("JOB="),
            Self::ResolutionRange(_) => line.trim().starts_with("INCLUDE_RESOLUTION_RANGE"),
            Self::SpaceGroup(_) => line.contains("SPACE_GROUP_NUMBER"),
            Self::UnitCell(_) => line.contains("UNIT_CELL_CONSTANTS"),
        }
    }

    fn render(&self) -> String {
        match self {
            Self::Jobs(jobs) => format!("JOB= {jobs}\n"),
            Self::ResolutionRange(high) => {
                format!("INCLUDE_RESOLUTION_RANGE= {LOW_RESOLUTION_LIMIT} {high:.2} \n")
            }
            Self::SpaceGroup(number) => format!("SPACE_GROUP_NUMBER= {number} \n"),
            Self::UnitCell(cell) => format!("UNIT_CELL_CONSTANTS= {cell} \n"),
        }
    }
}

/// Replaces every line claimed by a directive; everything else passes through untouched.
pub fn apply_directives(document: &str, directives: &[Directive]) -> String {
    let mut rewritten = String::with_capacity(document.len());
    for line in document.split_inclusive('\n') {
        match directives.iter().find(|directive| directive.matches(line)) {
            Some(directive) => rewritten.push_str(&directive.render()),
            None => rewritten.push_str(line),
        }
    }
    rewritten
}

/// Moves XDS.INP to XDS.INP.old and writes the edited document in its place.
pub fn rewrite_inp(work_dir: &Path, directives: &[Directive]) -> Result<()> {
    let inp_path = work_dir.join(INP_FILE);
    let backup_path = work_dir.join(INP_BACKUP_FILE);

    fs::rename(&inp_path, &backup_path).with_context(|| {
        format!(
            "failed to move {} to {}",
            inp_path.display(),
            backup_path.display()
        )
    })?;
    let previous = fs::read_to_string(&backup_path)
        .with_context(|| format!("failed to read {}", backup_path.display()))?;

    let rewritten = apply_directives(&previous, directives);
    fs::write(&inp_path, rewritten)
        .with_context(|| format!("failed to write {}", inp_path.display()))?;

    debug!(path = %inp_path.display(), directives = ?directives, "rewrote XDS.INP");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::scratch_dir;

    const GENERATED_INP: &str = "\
JOB= XYCORR INIT COLSPOT IDXREF DEFPIX INTEGRATE CORRECT
MAXIMUM_NUMBER_OF_JOBS=4
ORGX= 1230.5 ORGY= 1260.1
 INCLUDE_RESOLUTION_RANGE=50 0
SPACE_GROUP_NUMBER=0
UNIT_CELL_CONSTANTS= 70 80 90 90 90 90
NAME_TEMPLATE_OF_DATA_FRAMES=../img/ptp1b_1_?????.cbf
! INCLUDE_RESOLUTION_RANGE= 40 2.0 is commented out
";

    #[test]
    fn empty_override_set_is_identity() {
        assert_eq!(apply_directives(GENERATED_INP, &[]), GENERATED_INP);
        assert_eq!(apply_directives("no trailing newline", &[]), "no trailing newline");
    }

    #[test]
    fn overrides_replace_only_their_lines_in_order() {
        let directives = vec![
            Directive::Jobs(REFINEMENT_JOBS.to_string()),
            Directive::ResolutionRange(2.1),
        ];

        let rewritten = apply_directives(GENERATED_INP, &directives);
        let lines: Vec<&str> = rewritten.lines().collect();
        let original: Vec<&str> = GENERATED_INP.lines().collect();

        assert_eq!(lines.len(), original.len());
        assert_eq!(lines[0], "JOB= CORRECT");
        assert_eq!(lines[3], "INCLUDE_RESOLUTION_RANGE= 80 2.10 ");
        for index in [1, 2, 4, 5, 6, 7] {
            assert_eq!(lines[index], original[index]);
        }
    }

    #[test]
    fn unit_cell_is_normalized_to_spaces() {
        let cell: UnitCell = "88,88,104,90,90,120".parse().expect("cell should parse");
        let space_group: SpaceGroup = "152".parse().expect("space group should parse");

        let rewritten = apply_directives(
            GENERATED_INP,
            &[Directive::SpaceGroup(space_group), Directive::UnitCell(cell)],
        );

        assert!(rewritten.contains("\nUNIT_CELL_CONSTANTS= 88 88 104 90 90 120 \n"));
        assert!(rewritten.contains("\nSPACE_GROUP_NUMBER= 152 \n"));
    }

    #[test]
    fn crystal_form_values_are_validated() {
        assert!("88,88,104,90,90".parse::<UnitCell>().is_err());
        assert!("88,88,abc,90,90,120".parse::<UnitCell>().is_err());
        assert!("0".parse::<SpaceGroup>().is_err());
        assert!("231".parse::<SpaceGroup>().is_err());
        assert!("P1".parse::<SpaceGroup>().is_err());
    }

    #[test]
    fn rewrite_inp_keeps_previous_version_as_backup() {
        let dir = scratch_dir("inp");
        fs::write(dir.join(INP_FILE), GENERATED_INP).expect("inp should be written");

        rewrite_inp(&dir, &[Directive::ResolutionRange(1.4)]).expect("rewrite should succeed");

        let backup = fs::read_to_string(dir.join(INP_BACKUP_FILE)).expect("backup should exist");
        assert_eq!(backup, GENERATED_INP);
        let current = fs::read_to_string(dir.join(INP_FILE)).expect("inp should exist");
        assert!(current.contains("INCLUDE_RESOLUTION_RANGE= 80 1.40 \n"));
    }

    #[test]
    fn rewrite_inp_fails_without_source_document() {
        let dir = scratch_dir("inp_missing");
        let err = rewrite_inp(&dir, &[Directive::ResolutionRange(1.4)])
            .expect_err("missing XDS.INP must be fatal");
        assert!(err.to_string().contains("XDS.INP"));
    }
}
