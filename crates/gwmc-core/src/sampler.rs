//! Affine-invariant ensemble sampler (Goodman & Weare 2010).
//!
//! Entry point of a run. The walker ensemble is seeded around the start
//! vector and evolved by the cycle scheduler; the recorded cycles are then
//! assembled into a [`SampleSet`].
//!
//! # References
//!
//! Goodman, J., & Weare, J. (2010). Ensemble samplers with affine invariance.
//! Communications in Applied Mathematics and Computational Science, 5(1), 65-80.

use crate::config::{CyclePlan, SamplerConfig};
use crate::ensemble::{CycleSnapshot, EnsembleState};
use crate::errors::{GwmcError, GwmcResult};
use crate::moves::{StretchMove, WalkMove};
use crate::output::{OutputAssembler, SampleSet};
use crate::posterior::LogDensity;
use crate::progress::{LogReporter, ProgressReporter};
use crate::scheduler::{CancelToken, CycleScheduler};
use ndarray::ArrayView1;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Cycles completed before a run was cancelled.
#[derive(Debug, Clone)]
pub struct PartialRun {
    /// Snapshot of every completed cycle, burn-in included
    pub snapshots: Vec<CycleSnapshot>,
    pub plan: CyclePlan,
}

impl PartialRun {
    pub fn completed_cycles(&self) -> usize {
        self.snapshots.len()
    }

    /// Whether the run got past burn-in before it was stopped.
    pub fn reached_production(&self) -> bool {
        self.snapshots.len() > self.plan.burn_in_cycles
    }
}

/// How a cancellable run ended.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(SampleSet),
    Cancelled(PartialRun),
}

impl RunOutcome {
    pub fn completed(self) -> Option<SampleSet> {
        match self {
            RunOutcome::Completed(set) => Some(set),
            RunOutcome::Cancelled(_) => None,
        }
    }
}

/// Ensemble sampler for an unnormalised log-density.
///
/// # Example
///
/// ```
/// use gwmc_core::{EnsembleSampler, SamplerConfig, Verbosity};
/// use ndarray::{array, ArrayView1};
///
/// let log_density = |x: ArrayView1<f64>, _: &()| -0.5 * x.dot(&x);
/// let config = SamplerConfig::new(2000)
///     .with_walkers(20)
///     .with_burn_in(200)
///     .with_seed(1)
///     .with_verbosity(Verbosity::Silent);
///
/// let sampler = EnsembleSampler::new(log_density, (), config);
/// let samples = sampler.run(array![0.5, -0.5].view()).unwrap();
///
/// assert_eq!(samples.n_samples(), 2000);
/// assert_eq!(samples.flat_positions().ncols(), 2);
/// ```
pub struct EnsembleSampler<P, C> {
    /// Target log-density
    posterior: P,

    /// Auxiliary context passed to every evaluation
    context: C,

    config: SamplerConfig,
}

impl<P, C> EnsembleSampler<P, C>
where
    P: LogDensity<C>,
{
    pub fn new(posterior: P, context: C, config: SamplerConfig) -> Self {
        Self {
            posterior,
            context,
            config,
        }
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    /// Random source for a run: seeded from the configuration if a seed is
    /// set, from system entropy otherwise.
    fn rng(&self) -> ChaCha8Rng {
        match self.config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        }
    }

    /// Run the sampler from `start`, reporting progress through `log`.
    pub fn run(&self, start: ArrayView1<f64>) -> GwmcResult<SampleSet>
    where
        P: Sync,
        C: Sync,
    {
        let mut rng = self.rng();
        self.run_with(start, &mut rng, &mut LogReporter)
    }

    /// Run the sampler with a caller-supplied random source and reporter.
    pub fn run_with<R, F>(
        &self,
        start: ArrayView1<f64>,
        rng: &mut R,
        reporter: &mut F,
    ) -> GwmcResult<SampleSet>
    where
        P: Sync,
        C: Sync,
        R: Rng + ?Sized,
        F: ProgressReporter + ?Sized,
    {
        let (scheduler, mut state) = self.prepare(start, rng)?;
        let history = scheduler.run_parallel(
            &mut state,
            &self.posterior,
            &self.context,
            rng,
            reporter,
            None,
        )?;
        Ok(self.finish(start.len(), &scheduler, &history.snapshots, reporter))
    }

    /// Run the sampler, stopping between cycles once `cancel` is triggered.
    pub fn run_cancellable<R, F>(
        &self,
        start: ArrayView1<f64>,
        rng: &mut R,
        reporter: &mut F,
        cancel: &CancelToken,
    ) -> GwmcResult<RunOutcome>
    where
        P: Sync,
        C: Sync,
        R: Rng + ?Sized,
        F: ProgressReporter + ?Sized,
    {
        let (scheduler, mut state) = self.prepare(start, rng)?;
        let history = scheduler.run_parallel(
            &mut state,
            &self.posterior,
            &self.context,
            rng,
            reporter,
            Some(cancel),
        )?;

        if history.cancelled {
            return Ok(RunOutcome::Cancelled(PartialRun {
                snapshots: history.snapshots,
                plan: *scheduler.plan(),
            }));
        }
        Ok(RunOutcome::Completed(self.finish(
            start.len(),
            &scheduler,
            &history.snapshots,
            reporter,
        )))
    }

    /// Run the sampler on the calling thread.
    ///
    /// Neither the posterior nor the context has to be `Sync`, so contexts
    /// built on `Rc` or `RefCell` work here. For a given random source the
    /// samples are identical to [`EnsembleSampler::run_with`].
    pub fn run_single_threaded<R, F>(
        &self,
        start: ArrayView1<f64>,
        rng: &mut R,
        reporter: &mut F,
    ) -> GwmcResult<SampleSet>
    where
        R: Rng + ?Sized,
        F: ProgressReporter + ?Sized,
    {
        let (scheduler, mut state) = self.prepare(start, rng)?;
        let history = scheduler.run(
            &mut state,
            &self.posterior,
            &self.context,
            rng,
            reporter,
            None,
        )?;
        Ok(self.finish(start.len(), &scheduler, &history.snapshots, reporter))
    }

    /// Validate the configuration against `start` and seed the ensemble.
    fn prepare<R>(
        &self,
        start: ArrayView1<f64>,
        rng: &mut R,
    ) -> GwmcResult<(CycleScheduler, EnsembleState)>
    where
        R: Rng + ?Sized,
    {
        let n_dim = start.len();
        if start.iter().any(|x| !x.is_finite()) {
            return Err(GwmcError::Configuration(
                "Start vector contains non-finite values".to_string(),
            ));
        }
        let plan = self.config.plan(n_dim)?;
        let dispersion = self.config.dispersion(n_dim)?;

        let scheduler = CycleScheduler::new(
            plan,
            StretchMove::new(self.config.stretch_scale)?,
            WalkMove::new(plan.walk_sample_size)?,
            self.config.walk_move_rate,
            self.config.update_scheme,
            self.config.verbosity,
            self.config.progress_interval,
        );

        let state = EnsembleState::initialize(
            start,
            plan.n_walkers,
            &dispersion,
            &self.posterior,
            &self.context,
            rng,
        )?;

        Ok((scheduler, state))
    }

    fn finish<F>(
        &self,
        n_dim: usize,
        scheduler: &CycleScheduler,
        snapshots: &[CycleSnapshot],
        reporter: &mut F,
    ) -> SampleSet
    where
        F: ProgressReporter + ?Sized,
    {
        let assembler = OutputAssembler::from_plan(scheduler.plan(), self.config.merge_walkers);
        let samples = assembler.assemble(snapshots, self.config.resolved_param_names(n_dim));

        log::info!(
            "Sampling finished: {} samples from {} walkers, acceptance rate {:.3}",
            samples.n_samples(),
            samples.walker_count,
            samples.acceptance_rate
        );
        if let Some(advisory) = samples.low_acceptance_advisory() {
            if scheduler.advisories_enabled() {
                reporter.advisory(&advisory);
            } else {
                log::warn!("{}", advisory);
            }
        }

        samples
    }
}

/// Draw samples from `posterior` starting around `start`.
///
/// Convenience wrapper around [`EnsembleSampler::run`].
pub fn sample<P, C>(
    posterior: P,
    start: ArrayView1<f64>,
    config: SamplerConfig,
    context: C,
) -> GwmcResult<SampleSet>
where
    P: LogDensity<C> + Sync,
    C: Sync,
{
    EnsembleSampler::new(posterior, context, config).run(start)
}
