use std::path::PathBuf;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::model::{AttemptRecord, Phase, SearchSettings, Thresholds};
use crate::report::{conditions_met, failed_criteria};
use crate::runner::{ArchiveTag, XdsRunner};

/// Decrement used when narrowing back toward higher resolution.
pub const FINE_STEP: f64 = 0.01;

const RESOLUTION_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub good_resolution: f64,
    pub best_resolution: f64,
    pub converged: bool,
    pub attempts: Vec<AttemptRecord>,
    pub final_report: PathBuf,
}

/// State of one resolution search, threaded through every phase.
#[derive(Debug, Clone)]
pub struct SearchSession {
    pub thresholds: Thresholds,
    pub settings: SearchSettings,
    pub current: f64,
    pub good: Option<f64>,
    pub best: Option<f64>,
    pub converged: bool,
    pub attempts: Vec<AttemptRecord>,
}

impl SearchSession {
    pub fn new(thresholds: Thresholds, settings: SearchSettings) -> Self {
        Self {
            thresholds,
            current: settings.start_resolution,
            settings,
            good: None,
            best: None,
            converged: false,
            attempts: Vec::new(),
        }
    }

    pub fn run<R: XdsRunner>(mut self, runner: &mut R) -> Result<SearchOutcome> {
        self.initial_pass(runner)?;
        self.coarse_widen(runner)?;
        self.fine_narrow(runner)?;
        let outcome = self.final_rerun(runner)?;

        if self.settings.convert {
            runner.run_conversion()?;
        } else {
            info!("skipping MTZ conversion");
        }

        info!(
            resolution = %format!("{:.2}", outcome.best_resolution),
            converged = outcome.converged,
            "resolution search finished"
        );
        Ok(outcome)
    }

    pub fn initial_pass<R: XdsRunner>(&mut self, runner: &mut R) -> Result<()> {
        self.current = self.settings.start_resolution;
        runner.prepare_input(self.current)?;

        if self.settings.only_correct_loops {
            info!("skipping initial indexing and integration");
            return Ok(());
        }

        info!(
            resolution = %format!("{:.2}", self.current),
            "running initial indexing and integration"
        );
        runner.run_full_pipeline()?;
        self.record_attempt(runner, Phase::Initial, ArchiveTag::Attempt(self.current))?;
        Ok(())
    }

    /// Widens the cutoff by the coarse step until the thresholds hold or the
    /// maximum resolution is passed.
    pub fn coarse_widen<R: XdsRunner>(&mut self, runner: &mut R) -> Result<()> {
        if !runner.report_exists() {
            info!(
                resolution = %format!("{:.2}", self.current),
                "no statistics report yet; running CORRECT once"
            );
            runner.run_refinement(self.current)?;
            self.record_attempt(runner, Phase::Coarse, ArchiveTag::Attempt(self.current))?;
        }

        let start = self.current;
        let mut steps = 0_u32;
        loop {
            if self.evaluate(runner)? {
                self.converged = true;
                break;
            }
            if !(self.current <= self.settings.max_resolution + RESOLUTION_TOLERANCE) {
                break;
            }
            steps += 1;
            self.current = start + f64::from(steps) * self.settings.step_size;
            runner.run_refinement(self.current)?;
            self.record_attempt(runner, Phase::Coarse, ArchiveTag::Attempt(self.current))?;
        }

        if !self.converged {
            warn!(
                resolution = %format!("{:.2}", self.current),
                max_resolution = self.settings.max_resolution,
                "no resolution met the thresholds; continuing with the last one tried"
            );
        }
        self.good = Some(self.current);
        Ok(())
    }

    /// Steps back toward higher resolution in `FINE_STEP` decrements and stops
    /// one step after the first failure.
    pub fn fine_narrow<R: XdsRunner>(&mut self, runner: &mut R) -> Result<()> {
        let good = self.good.unwrap_or(self.current);
        self.current = good;

        for n in 1..fine_iteration_count(self.settings.step_size) {
            self.current = good - f64::from(n) * FINE_STEP;
            runner.run_refinement(self.current)?;
            self.record_attempt(runner, Phase::Fine, ArchiveTag::Attempt(self.current))?;

            if !self.evaluate(runner)? {
                info!(
                    resolution = %format!("{:.2}", self.current),
                    "too far; backing off by {FINE_STEP:.2} A"
                );
                self.current = good - f64::from(n - 1) * FINE_STEP;
                break;
            }
        }

        self.best = Some(self.current);
        Ok(())
    }

    /// Re-runs CORRECT at the settled cutoff so the files on disk match it.
    pub fn final_rerun<R: XdsRunner>(&mut self, runner: &mut R) -> Result<SearchOutcome> {
        let best = self.best.unwrap_or(self.current);
        self.current = best;
        runner.run_refinement(best)?;
        let final_report = self.record_attempt(runner, Phase::Final, ArchiveTag::Final(best))?;

        match runner.final_shell() {
            Ok(metrics) => {
                let met = conditions_met(&metrics, &self.thresholds);
                if let Some(attempt) = self.attempts.last_mut() {
                    attempt.metrics = Some(metrics);
                    attempt.conditions_met = Some(met);
                }
            }
            Err(err) => warn!(error = %err, "final report has no shell statistics"),
        }

        Ok(SearchOutcome {
            good_resolution: self.good.unwrap_or(best),
            best_resolution: best,
            converged: self.converged,
            attempts: self.attempts.clone(),
            final_report,
        })
    }

    fn evaluate<R: XdsRunner>(&mut self, runner: &R) -> Result<bool> {
        let metrics = runner.final_shell()?;
        let failed = failed_criteria(&metrics, &self.thresholds);
        let met = failed.is_empty();

        if met {
            info!(
                resolution = %format!("{:.2}", self.current),
                completeness = metrics.completeness,
                i_over_sigma = metrics.i_over_sigma,
                cc_half = metrics.cc_half,
                "thresholds met"
            );
        } else {
            let failed: Vec<&str> = failed.iter().map(|criterion| criterion.as_str()).collect();
            info!(
                resolution = %format!("{:.2}", self.current),
                completeness = metrics.completeness,
                i_over_sigma = metrics.i_over_sigma,
                cc_half = metrics.cc_half,
                cc_half_significant = metrics.cc_half_significant,
                failed = ?failed,
                "thresholds not met"
            );
        }

        if let Some(attempt) = self.attempts.last_mut() {
            attempt.metrics = Some(metrics);
            attempt.conditions_met = Some(met);
        }
        Ok(met)
    }

    fn record_attempt<R: XdsRunner>(
        &mut self,
        runner: &mut R,
        phase: Phase,
        tag: ArchiveTag,
    ) -> Result<PathBuf> {
        let archived = runner.archive_report(tag)?;
        debug!(phase = %phase, archived = %archived.display(), "archived statistics report");
        self.attempts.push(AttemptRecord {
            phase,
            resolution: self.current,
            archived_report: archived.display().to_string(),
            metrics: None,
            conditions_met: None,
        });
        Ok(archived)
    }
}

/// Number of fine iterations covering one coarse step; decrements tried are one fewer.
pub fn fine_iteration_count(step_size: f64) -> u32 {
    (step_size / FINE_STEP - RESOLUTION_TOLERANCE).ceil().max(0.0) as u32
}
