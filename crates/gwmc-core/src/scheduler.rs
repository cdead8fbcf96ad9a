//! Cycle scheduling.
//!
//! A cycle updates every walker exactly once with a single move. The
//! scheduler runs burn-in and production cycles back to back, picks the move
//! for each cycle, keeps a full snapshot after every cycle and aborts on the
//! first non-finite log-density.

use crate::config::{CyclePlan, UpdateScheme};
use crate::ensemble::{CycleSnapshot, EnsembleState};
use crate::errors::{GwmcError, GwmcResult};
use crate::moves::{
    judge, update_walker, Complement, CycleMove, Move, MoveKind, StretchMove, WalkMove,
};
use crate::posterior::LogDensity;
use crate::progress::{Phase, ProgressInfo, ProgressReporter, ReportSchedule, Verbosity};
use ndarray::{s, Array1, ArrayView1, ArrayView2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Move used in cycle `cycle` (1-indexed).
///
/// With a walk-move rate `r > 0` every `r`-th cycle is a walk move; all other
/// cycles are stretch moves.
pub fn move_for_cycle(cycle: usize, walk_move_rate: usize) -> MoveKind {
    if walk_move_rate > 0 && cycle % walk_move_rate == 0 {
        MoveKind::Walk
    } else {
        MoveKind::Stretch
    }
}

/// Shared flag used to stop a run between cycles.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Snapshots produced by the scheduler.
#[derive(Debug, Clone)]
pub struct CycleHistory {
    /// One snapshot per completed cycle, burn-in included
    pub snapshots: Vec<CycleSnapshot>,
    /// Set when the run stopped early on a cancellation request
    pub cancelled: bool,
}

/// Drives the burn-in and production cycles of one run.
#[derive(Debug, Clone)]
pub struct CycleScheduler {
    plan: CyclePlan,
    stretch: StretchMove,
    walk: WalkMove,
    walk_move_rate: usize,
    scheme: UpdateScheme,
    reports: ReportSchedule,
}

impl CycleScheduler {
    pub fn new(
        plan: CyclePlan,
        stretch: StretchMove,
        walk: WalkMove,
        walk_move_rate: usize,
        scheme: UpdateScheme,
        verbosity: Verbosity,
        progress_interval: usize,
    ) -> Self {
        let reports = ReportSchedule::new(verbosity, progress_interval, plan.total_cycles());
        Self {
            plan,
            stretch,
            walk,
            walk_move_rate,
            scheme,
            reports,
        }
    }

    pub fn plan(&self) -> &CyclePlan {
        &self.plan
    }

    fn cycle_move(&self, cycle: usize) -> CycleMove<'_> {
        match move_for_cycle(cycle, self.walk_move_rate) {
            MoveKind::Stretch => CycleMove::Stretch(&self.stretch),
            MoveKind::Walk => CycleMove::Walk(&self.walk),
        }
    }

    /// Run every planned cycle on the calling thread, mutating `state` in
    /// place.
    ///
    /// The partitioned scheme visits its walkers one after another here and
    /// produces exactly the samples [`CycleScheduler::run_parallel`] would.
    /// The cancellation token is polled before each cycle; a cycle that has
    /// started always runs to completion.
    pub fn run<P, C, R, F>(
        &self,
        state: &mut EnsembleState,
        posterior: &P,
        context: &C,
        rng: &mut R,
        reporter: &mut F,
        cancel: Option<&CancelToken>,
    ) -> GwmcResult<CycleHistory>
    where
        P: LogDensity<C> + ?Sized,
        C: ?Sized,
        R: Rng + ?Sized,
        F: ProgressReporter + ?Sized,
    {
        let scheme = self.scheme;
        self.run_cycles(state, rng, reporter, cancel, |mv, state, rng, cycle| match scheme {
            UpdateScheme::Sequential => sequential_cycle(mv, state, posterior, context, rng, cycle),
            UpdateScheme::Partitioned => {
                partitioned_cycle_serial(mv, state, posterior, context, rng, cycle)
            }
        })
    }

    /// Like [`CycleScheduler::run`], but the partitioned scheme evaluates the
    /// proposals of each half in parallel.
    pub fn run_parallel<P, C, R, F>(
        &self,
        state: &mut EnsembleState,
        posterior: &P,
        context: &C,
        rng: &mut R,
        reporter: &mut F,
        cancel: Option<&CancelToken>,
    ) -> GwmcResult<CycleHistory>
    where
        P: LogDensity<C> + Sync + ?Sized,
        C: Sync + ?Sized,
        R: Rng + ?Sized,
        F: ProgressReporter + ?Sized,
    {
        let scheme = self.scheme;
        self.run_cycles(state, rng, reporter, cancel, |mv, state, rng, cycle| match scheme {
            UpdateScheme::Sequential => sequential_cycle(mv, state, posterior, context, rng, cycle),
            UpdateScheme::Partitioned => {
                partitioned_cycle(mv, state, posterior, context, rng, cycle)
            }
        })
    }

    fn run_cycles<R, F, U>(
        &self,
        state: &mut EnsembleState,
        rng: &mut R,
        reporter: &mut F,
        cancel: Option<&CancelToken>,
        mut update: U,
    ) -> GwmcResult<CycleHistory>
    where
        R: Rng + ?Sized,
        F: ProgressReporter + ?Sized,
        U: FnMut(&CycleMove<'_>, &mut EnsembleState, &mut R, usize) -> GwmcResult<()>,
    {
        let total = self.plan.total_cycles();
        let mut snapshots = Vec::with_capacity(total);

        log::debug!(
            "Running {} cycles ({} burn-in, {} production) with {} walkers",
            total,
            self.plan.burn_in_cycles,
            self.plan.keep_cycles,
            state.n_walkers()
        );

        for cycle in 1..=total {
            if cancel.is_some_and(CancelToken::is_cancelled) {
                log::info!("Run cancelled after {} of {} cycles", cycle - 1, total);
                return Ok(CycleHistory {
                    snapshots,
                    cancelled: true,
                });
            }

            let mv = self.cycle_move(cycle);
            update(&mv, state, rng, cycle)?;

            let snapshot = state.snapshot(mv.kind());
            if let Some((walker, value)) = snapshot.first_non_finite() {
                return Err(GwmcError::RuntimeNonFinite {
                    cycle,
                    walker,
                    value,
                });
            }

            if self.reports.is_due(cycle) {
                let phase = if cycle <= self.plan.burn_in_cycles {
                    Phase::BurnIn
                } else {
                    Phase::Production
                };
                reporter.report(&ProgressInfo {
                    cycle,
                    total,
                    phase,
                    move_kind: snapshot.move_kind,
                    acceptance_rate: snapshot.acceptance_rate(),
                    mean_log_density: state.mean_log_density(),
                });
            }

            snapshots.push(snapshot);
        }

        Ok(CycleHistory {
            snapshots,
            cancelled: false,
        })
    }

    pub(crate) fn advisories_enabled(&self) -> bool {
        self.reports.advisories_enabled()
    }
}

/// Update walkers `0..N` one after another against the live ensemble.
pub fn sequential_cycle<M, P, C, R>(
    mv: &M,
    state: &mut EnsembleState,
    posterior: &P,
    context: &C,
    rng: &mut R,
    cycle: usize,
) -> GwmcResult<()>
where
    M: Move + ?Sized,
    P: LogDensity<C> + ?Sized,
    C: ?Sized,
    R: Rng + ?Sized,
{
    for walker in 0..state.n_walkers() {
        update_walker(mv, state, walker, posterior, context, rng, cycle)?;
    }
    Ok(())
}

/// Update the two halves of the ensemble in turn, each against the frozen
/// positions of the other half.
///
/// Each walker in the active half gets its own RNG, seeded from `rng` in
/// walker order, so the outcome does not depend on how rayon schedules the
/// proposals.
pub fn partitioned_cycle<M, P, C, R>(
    mv: &M,
    state: &mut EnsembleState,
    posterior: &P,
    context: &C,
    rng: &mut R,
    cycle: usize,
) -> GwmcResult<()>
where
    M: Move + Sync + ?Sized,
    P: LogDensity<C> + Sync + ?Sized,
    C: Sync + ?Sized,
    R: Rng + ?Sized,
{
    for (active, complementary) in halves(state.n_walkers()) {
        let seeds = walker_seeds(&active, rng);
        let decisions: Vec<GwmcResult<WalkerDecision>> = {
            let frozen = HalfView::new(state, complementary);
            active
                .zip(seeds)
                .collect::<Vec<_>>()
                .into_par_iter()
                .map(|(walker, seed)| -> GwmcResult<WalkerDecision> {
                    frozen.decide(mv, walker, seed, posterior, context, cycle)
                })
                .collect()
        };
        apply_decisions(state, decisions)?;
    }

    Ok(())
}

/// The partitioned update of [`partitioned_cycle`] on the calling thread.
pub fn partitioned_cycle_serial<M, P, C, R>(
    mv: &M,
    state: &mut EnsembleState,
    posterior: &P,
    context: &C,
    rng: &mut R,
    cycle: usize,
) -> GwmcResult<()>
where
    M: Move + ?Sized,
    P: LogDensity<C> + ?Sized,
    C: ?Sized,
    R: Rng + ?Sized,
{
    for (active, complementary) in halves(state.n_walkers()) {
        let seeds = walker_seeds(&active, rng);
        let decisions: Vec<GwmcResult<WalkerDecision>> = {
            let frozen = HalfView::new(state, complementary);
            active
                .zip(seeds)
                .map(|(walker, seed)| frozen.decide(mv, walker, seed, posterior, context, cycle))
                .collect()
        };
        apply_decisions(state, decisions)?;
    }

    Ok(())
}

/// Walker index, proposed position, its log-density and the acceptance decision.
type WalkerDecision = (usize, Array1<f64>, f64, bool);

/// Active and complementary walker ranges, first half first.
fn halves(n_walkers: usize) -> [(Range<usize>, Range<usize>); 2] {
    let half = n_walkers / 2;
    [(0..half, half..n_walkers), (half..n_walkers, 0..half)]
}

fn walker_seeds<R: Rng + ?Sized>(active: &Range<usize>, rng: &mut R) -> Vec<u64> {
    active.clone().map(|_| rng.gen()).collect()
}

/// The ensemble as seen by one half during a partitioned update.
struct HalfView<'a> {
    positions: ArrayView2<'a, f64>,
    log_densities: ArrayView1<'a, f64>,
    complement: Complement<'a>,
}

impl<'a> HalfView<'a> {
    fn new(state: &'a EnsembleState, complementary: Range<usize>) -> Self {
        let positions = state.positions();
        Self {
            positions,
            log_densities: state.log_densities(),
            complement: Complement::new(positions.slice_move(s![complementary, ..])),
        }
    }

    fn decide<M, P, C>(
        &self,
        mv: &M,
        walker: usize,
        seed: u64,
        posterior: &P,
        context: &C,
        cycle: usize,
    ) -> GwmcResult<WalkerDecision>
    where
        M: Move + ?Sized,
        P: LogDensity<C> + ?Sized,
        C: ?Sized,
    {
        let mut walker_rng = ChaCha8Rng::seed_from_u64(seed);
        let proposal = mv.propose(self.positions.row(walker), &self.complement, &mut walker_rng);
        let (log_density, accepted) = judge(
            &proposal,
            self.log_densities[walker],
            posterior,
            context,
            &mut walker_rng,
            cycle,
            walker,
        )?;
        Ok((walker, proposal.position, log_density, accepted))
    }
}

fn apply_decisions(
    state: &mut EnsembleState,
    decisions: Vec<GwmcResult<WalkerDecision>>,
) -> GwmcResult<()> {
    for decision in decisions {
        let (walker, position, log_density, accepted) = decision?;
        if accepted {
            state.accept(walker, position, log_density);
        } else {
            state.reject(walker);
        }
    }
    Ok(())
}
