//! Convergence diagnostics for ensemble runs
//!
//! Summaries computed from a finished [`SampleSet`]: per-walker acceptance
//! fractions, the sample mean and covariance of the merged samples, and the
//! integrated autocorrelation time and effective sample size of each
//! parameter.
//!
//! Autocorrelation-based diagnostics need at least [`MIN_AUTOCORR_CYCLES`]
//! retained cycles and are reported as `NaN` otherwise.

use gwmc_core::SampleSet;
use indexmap::IndexMap;
use ndarray::{s, Array1, Array2, ArrayView1, Axis};

/// Fewest retained cycles for which an autocorrelation time is estimated.
pub const MIN_AUTOCORR_CYCLES: usize = 4;

/// Window factor `c` of the automatic windowing rule: the autocorrelation
/// sum stops at the first lag `M` with `M >= c * tau(M)`.
pub const WINDOW_FACTOR: f64 = 5.0;

/// Fraction of retained cycles in which each walker's proposal was accepted.
pub fn acceptance_fraction(samples: &SampleSet) -> Array1<f64> {
    if samples.n_cycles() == 0 {
        return Array1::from_elem(samples.walker_count, f64::NAN);
    }

    samples
        .accepted
        .map(|&flag| if flag { 1.0 } else { 0.0 })
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::from_elem(samples.walker_count, f64::NAN))
}

/// Mean of every parameter over all retained samples.
pub fn sample_mean(samples: &SampleSet) -> IndexMap<String, f64> {
    let flat = samples.flat_positions();
    let mean = flat
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::from_elem(samples.n_dim, f64::NAN));

    samples
        .param_names
        .iter()
        .cloned()
        .zip(mean.iter().copied())
        .collect()
}

/// Population covariance matrix of the merged samples, ordered as
/// `param_names`.
pub fn sample_covariance(samples: &SampleSet) -> Array2<f64> {
    let flat = samples.flat_positions();
    let n = flat.nrows();
    if n == 0 {
        return Array2::from_elem((samples.n_dim, samples.n_dim), f64::NAN);
    }

    let mean = flat.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(samples.n_dim));
    let centred = &flat - &mean;
    centred.t().dot(&centred) / n as f64
}

/// Integrated autocorrelation time of each parameter, in cycles.
///
/// The normalised autocorrelation function is computed per walker, averaged
/// over walkers, and summed as
///
/// τ(M) = 1 + 2 Σ_{k=1..M} ρ(k)
///
/// up to the first lag `M` satisfying `M >= WINDOW_FACTOR * τ(M)` (Sokal's
/// automatic windowing). When the chain is too short for the window to
/// close, the sum over every available lag is returned.
///
/// # References
///
/// Sokal, A. (1997). Monte Carlo Methods in Statistical Mechanics:
/// Foundations and New Algorithms. In Functional Integration (pp. 131-192).
pub fn autocorr_time(samples: &SampleSet) -> IndexMap<String, f64> {
    let mut result = IndexMap::new();
    let enough = samples.n_cycles() >= MIN_AUTOCORR_CYCLES;
    let cube = samples.walker_positions();

    for (param_idx, param_name) in samples.param_names.iter().enumerate() {
        let tau = if enough {
            let chains: Vec<ArrayView1<f64>> = (0..samples.walker_count)
                .map(|walker| cube.slice(s![.., walker, param_idx]))
                .collect();
            integrated_time(&chains)
        } else {
            f64::NAN
        };
        result.insert(param_name.clone(), tau);
    }

    result
}

/// Effective sample size of each parameter.
///
/// ESS = N / τ, where N is the number of retained samples across all walkers
/// and τ the integrated autocorrelation time from [`autocorr_time`].
pub fn ess(samples: &SampleSet) -> IndexMap<String, f64> {
    let n_total = samples.n_samples() as f64;

    autocorr_time(samples)
        .into_iter()
        .map(|(name, tau)| (name, n_total / tau))
        .collect()
}

/// Every diagnostic for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostics {
    pub acceptance_fraction: Array1<f64>,
    pub mean: IndexMap<String, f64>,
    pub covariance: Array2<f64>,
    pub autocorr_time: IndexMap<String, f64>,
    pub ess: IndexMap<String, f64>,
}

impl Diagnostics {
    pub fn from_samples(samples: &SampleSet) -> Self {
        let autocorr_time = autocorr_time(samples);
        let n_total = samples.n_samples() as f64;
        let ess = autocorr_time
            .iter()
            .map(|(name, tau)| (name.clone(), n_total / tau))
            .collect();

        let diagnostics = Self {
            acceptance_fraction: acceptance_fraction(samples),
            mean: sample_mean(samples),
            covariance: sample_covariance(samples),
            autocorr_time,
            ess,
        };

        for (name, tau) in &diagnostics.autocorr_time {
            log::debug!(
                "{}: tau = {:.2}, ess = {:.1}",
                name,
                tau,
                diagnostics.ess[name.as_str()]
            );
        }
        if samples.n_cycles() < MIN_AUTOCORR_CYCLES {
            log::warn!(
                "Only {} retained cycles; autocorrelation needs at least {}",
                samples.n_cycles(),
                MIN_AUTOCORR_CYCLES
            );
        }

        diagnostics
    }

    /// Largest autocorrelation time over all parameters.
    ///
    /// A thinning interval of about this many cycles gives nearly
    /// independent samples.
    pub fn max_autocorr_time(&self) -> f64 {
        self.autocorr_time
            .values()
            .copied()
            .fold(f64::NAN, f64::max)
    }
}

/// Walker-averaged integrated autocorrelation time of a set of equal-length chains.
fn integrated_time(chains: &[ArrayView1<f64>]) -> f64 {
    let centred: Vec<(Array1<f64>, f64)> = chains
        .iter()
        .filter_map(|chain| {
            let mean = chain.mean()?;
            let centred = chain.mapv(|x| x - mean);
            let variance = centred.dot(&centred) / chain.len() as f64;
            // A walker that never moved carries no autocorrelation information
            (variance > 0.0).then_some((centred, variance))
        })
        .collect();

    if centred.is_empty() {
        return f64::NAN;
    }

    let n = centred[0].0.len();
    let mut tau = 1.0;

    for lag in 1..n {
        let rho = centred
            .iter()
            .map(|(chain, variance)| autocorrelation(chain, *variance, lag))
            .sum::<f64>()
            / centred.len() as f64;
        tau += 2.0 * rho;

        if lag as f64 >= WINDOW_FACTOR * tau {
            break;
        }
    }

    tau
}

/// Normalised autocorrelation of a centred chain at `lag`.
///
/// Uses the biased autocovariance estimator (divisor `n`), so
/// `autocorrelation(chain, var, 0) == 1`.
fn autocorrelation(centred: &Array1<f64>, variance: f64, lag: usize) -> f64 {
    let n = centred.len();
    if lag >= n {
        return 0.0;
    }

    let head = centred.slice(s![..n - lag]);
    let tail = centred.slice(s![lag..]);
    head.dot(&tail) / n as f64 / variance
}
