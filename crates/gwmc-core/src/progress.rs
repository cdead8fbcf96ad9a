//! Progress reporting.
//!
//! The scheduler decides *when* to report (based on [`Verbosity`] and the
//! configured interval); reporters decide *how*. Nothing the reporter does
//! feeds back into the sampler.

use crate::moves::MoveKind;
use serde::{Deserialize, Serialize};

/// How chatty a run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    /// No progress reports and no advisories are sent to the reporter.
    Silent,
    /// Reports at every `progress_interval` percent of the run.
    #[default]
    Normal,
    /// Reports after every cycle.
    Verbose,
}

/// Which part of the run a cycle belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    BurnIn,
    Production,
}

/// Information about sampling progress.
///
/// Passed to reporters after a cycle completes.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Cycle number (1-indexed, burn-in cycles included)
    pub cycle: usize,

    /// Total number of cycles in the run
    pub total: usize,

    pub phase: Phase,

    /// Move used in this cycle
    pub move_kind: MoveKind,

    /// Fraction of walkers whose proposal was accepted in this cycle
    pub acceptance_rate: f64,

    /// Mean cached log-density across all walkers
    pub mean_log_density: f64,
}

impl ProgressInfo {
    /// Percentage of the run completed.
    pub fn percent_complete(&self) -> f64 {
        100.0 * self.cycle as f64 / self.total as f64
    }
}

/// Receives progress reports and advisories from a run.
///
/// Any `FnMut(&ProgressInfo)` closure is a reporter; advisories then fall
/// back to `log::warn!`.
pub trait ProgressReporter {
    fn report(&mut self, info: &ProgressInfo);

    /// A non-fatal diagnostic about the run, such as a low acceptance rate.
    fn advisory(&mut self, message: &str) {
        log::warn!("{}", message);
    }
}

impl<F> ProgressReporter for F
where
    F: FnMut(&ProgressInfo),
{
    fn report(&mut self, info: &ProgressInfo) {
        self(info)
    }
}

/// Reporter writing through the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ProgressReporter for LogReporter {
    fn report(&mut self, info: &ProgressInfo) {
        let phase = match info.phase {
            Phase::BurnIn => "burn-in",
            Phase::Production => "production",
        };
        log::info!(
            "cycle {}/{} ({:.0}%, {}): acceptance {:.3}, mean log-density {:.4}",
            info.cycle,
            info.total,
            info.percent_complete(),
            phase,
            info.acceptance_rate,
            info.mean_log_density
        );
    }
}

/// Reporter that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl ProgressReporter for NullReporter {
    fn report(&mut self, _info: &ProgressInfo) {}

    fn advisory(&mut self, _message: &str) {}
}

/// Decides after which cycles a report is due.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReportSchedule {
    verbosity: Verbosity,
    every: usize,
    total: usize,
}

impl ReportSchedule {
    pub(crate) fn new(verbosity: Verbosity, interval_percent: usize, total: usize) -> Self {
        let every = (total * interval_percent).div_ceil(100).max(1);
        Self {
            verbosity,
            every,
            total,
        }
    }

    pub(crate) fn is_due(&self, cycle: usize) -> bool {
        match self.verbosity {
            Verbosity::Silent => false,
            Verbosity::Verbose => true,
            Verbosity::Normal => cycle % self.every == 0 || cycle == self.total,
        }
    }

    pub(crate) fn advisories_enabled(&self) -> bool {
        self.verbosity != Verbosity::Silent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_schedule_reports_at_intervals() {
        let schedule = ReportSchedule::new(Verbosity::Normal, 10, 200);
        let due: Vec<usize> = (1..=200).filter(|&c| schedule.is_due(c)).collect();

        assert_eq!(due.len(), 10);
        assert_eq!(due[0], 20);
        assert_eq!(*due.last().unwrap(), 200);
    }

    #[test]
    fn final_cycle_always_reported() {
        let schedule = ReportSchedule::new(Verbosity::Normal, 30, 10);
        let due: Vec<usize> = (1..=10).filter(|&c| schedule.is_due(c)).collect();
        assert_eq!(due, vec![3, 6, 9, 10]);
    }

    #[test]
    fn silent_and_verbose() {
        let silent = ReportSchedule::new(Verbosity::Silent, 5, 50);
        assert!((1..=50).all(|c| !silent.is_due(c)));
        assert!(!silent.advisories_enabled());

        let verbose = ReportSchedule::new(Verbosity::Verbose, 5, 50);
        assert!((1..=50).all(|c| verbose.is_due(c)));
    }

    #[test]
    fn closure_reporter() {
        let mut seen = Vec::new();
        {
            let mut reporter = |info: &ProgressInfo| seen.push(info.cycle);
            let info = ProgressInfo {
                cycle: 3,
                total: 10,
                phase: Phase::BurnIn,
                move_kind: MoveKind::Stretch,
                acceptance_rate: 0.5,
                mean_log_density: -1.0,
            };
            reporter.report(&info);
            assert_eq!(info.percent_complete(), 30.0);
        }
        assert_eq!(seen, vec![3]);
    }
}
