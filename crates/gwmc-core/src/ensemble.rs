//! Walker ensemble state.
//!
//! The ensemble owns, for each of its N walkers, the current position, the
//! cached log-density at that position and whether the walker's most recent
//! proposal was accepted. Moves mutate it in place, walker by walker.

use crate::errors::{GwmcError, GwmcResult};
use crate::moves::MoveKind;
use crate::posterior::LogDensity;
use nalgebra::DMatrix;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// Initial dispersion of walkers around the start vector.
#[derive(Debug, Clone, PartialEq)]
pub enum InitialDispersion {
    /// Diagonal covariance with entries `max(scale[i] * start[i]^2, floor)`.
    Scale { scale: Vec<f64>, floor: f64 },
    /// Explicit covariance matrix.
    Covariance(Array2<f64>),
}

impl InitialDispersion {
    /// Build the covariance matrix of the initial multivariate normal.
    pub fn covariance(&self, start: ArrayView1<f64>) -> Array2<f64> {
        match self {
            InitialDispersion::Scale { scale, floor } => {
                let diagonal: Array1<f64> = start
                    .iter()
                    .zip(scale)
                    .map(|(x, s)| (s * x * x).max(*floor))
                    .collect();
                Array2::from_diag(&diagonal)
            }
            InitialDispersion::Covariance(covariance) => covariance.clone(),
        }
    }
}

/// Relative tolerance when comparing mirrored covariance entries.
const SYMMETRY_TOLERANCE: f64 = 1e-10;

/// Lower Cholesky factor `L` of a symmetric positive-definite matrix, `LLᵀ = covariance`.
pub fn cholesky_lower(covariance: &Array2<f64>) -> GwmcResult<Array2<f64>> {
    let (rows, cols) = covariance.dim();
    if rows != cols {
        return Err(GwmcError::Configuration(format!(
            "Covariance must be square, got shape ({}, {})",
            rows, cols
        )));
    }
    if covariance.iter().any(|v| !v.is_finite()) {
        return Err(GwmcError::Configuration(
            "Covariance contains non-finite entries".to_string(),
        ));
    }

    for i in 0..rows {
        for j in (i + 1)..cols {
            let (upper, lower) = (covariance[[i, j]], covariance[[j, i]]);
            if (upper - lower).abs() > SYMMETRY_TOLERANCE * upper.abs().max(lower.abs()) {
                return Err(GwmcError::Configuration(format!(
                    "Covariance matrix is not symmetric: entry ({}, {}) is {} but ({}, {}) is {}",
                    i, j, upper, j, i, lower
                )));
            }
        }
    }

    let matrix = DMatrix::from_fn(rows, cols, |i, j| covariance[[i, j]]);
    let factor = matrix.cholesky().ok_or_else(|| {
        GwmcError::Configuration("Covariance matrix is not positive definite".to_string())
    })?;
    let lower = factor.l();

    Ok(Array2::from_shape_fn((rows, cols), |(i, j)| lower[(i, j)]))
}

/// Full copy of the ensemble at the end of one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleSnapshot {
    /// Walker positions: shape (n_walkers, n_dim)
    pub positions: Array2<f64>,
    pub accepted: Array1<bool>,
    pub log_densities: Array1<f64>,
    /// Move used to produce this cycle
    pub move_kind: MoveKind,
}

impl CycleSnapshot {
    /// Fraction of walkers whose last proposal was accepted.
    pub fn acceptance_rate(&self) -> f64 {
        mean_flag(&self.accepted)
    }

    /// First walker whose cached log-density is not finite.
    pub fn first_non_finite(&self) -> Option<(usize, f64)> {
        first_non_finite(&self.log_densities)
    }
}

/// State of all walkers in the ensemble.
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleState {
    /// Current positions of walkers: shape (n_walkers, n_dim)
    pub(crate) positions: Array2<f64>,

    /// Cached log-densities at the current positions: shape (n_walkers,)
    pub(crate) log_densities: Array1<f64>,

    /// Whether each walker's most recent proposal was accepted
    pub(crate) accepted: Array1<bool>,
}

impl EnsembleState {
    /// Seed `n_walkers` walkers from a multivariate normal centred on `start`.
    ///
    /// Walker positions are drawn one walker at a time as `start + L z`, with
    /// `L` the lower Cholesky factor of the dispersion covariance and `z` a
    /// vector of standard normal draws. Every seeded walker is then evaluated
    /// and the call fails with [`GwmcError::Initialization`] if any
    /// log-density is not finite.
    pub fn initialize<P, C, R>(
        start: ArrayView1<f64>,
        n_walkers: usize,
        dispersion: &InitialDispersion,
        posterior: &P,
        context: &C,
        rng: &mut R,
    ) -> GwmcResult<Self>
    where
        P: LogDensity<C> + ?Sized,
        C: ?Sized,
        R: Rng + ?Sized,
    {
        let n_dim = start.len();
        let covariance = dispersion.covariance(start);
        if covariance.dim() != (n_dim, n_dim) {
            return Err(GwmcError::Configuration(format!(
                "Initial covariance has shape {:?}, expected ({}, {})",
                covariance.dim(),
                n_dim,
                n_dim
            )));
        }
        let lower = cholesky_lower(&covariance)?;

        let mut positions = Array2::zeros((n_walkers, n_dim));
        for mut walker in positions.outer_iter_mut() {
            let z: Array1<f64> = (0..n_dim).map(|_| rng.sample(StandardNormal)).collect();
            walker.assign(&(&start + &lower.dot(&z)));
        }

        Self::from_positions(positions, posterior, context)
    }

    /// Build an ensemble from explicit walker positions.
    pub fn from_positions<P, C>(
        positions: Array2<f64>,
        posterior: &P,
        context: &C,
    ) -> GwmcResult<Self>
    where
        P: LogDensity<C> + ?Sized,
        C: ?Sized,
    {
        let (n_walkers, n_dim) = positions.dim();
        if n_walkers < 2 || n_dim == 0 {
            return Err(GwmcError::Configuration(format!(
                "An ensemble needs at least 2 walkers and 1 dimension, got shape ({}, {})",
                n_walkers, n_dim
            )));
        }

        let log_densities: Array1<f64> = positions
            .outer_iter()
            .map(|walker| posterior.log_density(walker, context))
            .collect();

        if let Some((walker, value)) = first_non_finite(&log_densities) {
            return Err(GwmcError::Initialization { walker, value });
        }

        log::debug!(
            "Initialised {} walkers in {} dimensions, mean log-density {:.4}",
            n_walkers,
            n_dim,
            log_densities.mean().unwrap_or(f64::NAN)
        );

        Ok(Self {
            positions,
            log_densities,
            accepted: Array1::from_elem(n_walkers, false),
        })
    }

    pub fn n_walkers(&self) -> usize {
        self.positions.nrows()
    }

    pub fn n_dim(&self) -> usize {
        self.positions.ncols()
    }

    pub fn positions(&self) -> ArrayView2<'_, f64> {
        self.positions.view()
    }

    pub fn position(&self, walker: usize) -> ArrayView1<'_, f64> {
        self.positions.row(walker)
    }

    pub fn log_densities(&self) -> ArrayView1<'_, f64> {
        self.log_densities.view()
    }

    pub fn accepted(&self) -> ArrayView1<'_, bool> {
        self.accepted.view()
    }

    /// Fraction of walkers whose most recent proposal was accepted.
    pub fn acceptance_rate(&self) -> f64 {
        mean_flag(&self.accepted)
    }

    pub fn mean_log_density(&self) -> f64 {
        self.log_densities.mean().unwrap_or(f64::NEG_INFINITY)
    }

    /// Record the outcome of one walker update.
    pub(crate) fn accept(&mut self, walker: usize, position: Array1<f64>, log_density: f64) {
        self.positions.row_mut(walker).assign(&position);
        self.log_densities[walker] = log_density;
        self.accepted[walker] = true;
    }

    pub(crate) fn reject(&mut self, walker: usize) {
        self.accepted[walker] = false;
    }

    /// Copy the current state into a cycle snapshot.
    pub fn snapshot(&self, move_kind: MoveKind) -> CycleSnapshot {
        CycleSnapshot {
            positions: self.positions.clone(),
            accepted: self.accepted.clone(),
            log_densities: self.log_densities.clone(),
            move_kind,
        }
    }
}

fn mean_flag(flags: &Array1<bool>) -> f64 {
    if flags.is_empty() {
        return 0.0;
    }
    flags.iter().filter(|&&a| a).count() as f64 / flags.len() as f64
}

fn first_non_finite(log_densities: &Array1<f64>) -> Option<(usize, f64)> {
    log_densities
        .iter()
        .enumerate()
        .find(|(_, lp)| !lp.is_finite())
        .map(|(i, &lp)| (i, lp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use is_close::is_close;
    use ndarray::{array, Axis};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn standard_normal(x: ArrayView1<f64>, _: &()) -> f64 {
        -0.5 * x.dot(&x)
    }

    #[test]
    fn scale_covariance_is_floored() {
        let dispersion = InitialDispersion::Scale {
            scale: vec![1e-4, 1e-2, 1.0],
            floor: 1e-13,
        };
        let cov = dispersion.covariance(array![10.0, 0.0, -2.0].view());

        assert!(is_close!(cov[[0, 0]], 1e-2));
        assert_eq!(cov[[1, 1]], 1e-13);
        assert!(is_close!(cov[[2, 2]], 4.0));
        assert_eq!(cov[[0, 1]], 0.0);
    }

    #[test]
    fn cholesky_reconstructs_covariance() {
        let cov = array![[4.0, 1.2, 0.0], [1.2, 2.0, 0.3], [0.0, 0.3, 1.0]];
        let lower = cholesky_lower(&cov).unwrap();

        assert_eq!(lower[[0, 1]], 0.0);
        let rebuilt = lower.dot(&lower.t());
        for (a, b) in rebuilt.iter().zip(cov.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn cholesky_rejects_asymmetric() {
        let cov = array![[1.0, 5.0], [0.0, 1.0]];
        assert!(matches!(
            cholesky_lower(&cov),
            Err(GwmcError::Configuration(msg)) if msg.contains("not symmetric")
        ));

        // Rounding noise in an otherwise symmetric matrix is tolerated
        let noisy = array![[2.0, 0.5], [0.5 + 1e-14, 1.0]];
        assert!(cholesky_lower(&noisy).is_ok());
    }

    #[test]
    fn cholesky_rejects_indefinite() {
        let cov = array![[1.0, 2.0], [2.0, 1.0]];
        assert!(matches!(
            cholesky_lower(&cov),
            Err(GwmcError::Configuration(_))
        ));
        assert!(cholesky_lower(&array![[1.0, 0.0]]).is_err());
    }

    #[test]
    fn initialize_draws_around_start() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let start = array![1.0, -2.0];
        let dispersion = InitialDispersion::Covariance(array![[0.01, 0.0], [0.0, 0.04]]);

        let state =
            EnsembleState::initialize(start.view(), 2000, &dispersion, &standard_normal, &(), &mut rng)
                .unwrap();

        assert_eq!(state.n_walkers(), 2000);
        assert_eq!(state.n_dim(), 2);
        assert!(state.log_densities().iter().all(|lp| lp.is_finite()));
        assert!(state.accepted().iter().all(|&a| !a));

        let mean = state.positions().mean_axis(Axis(0)).unwrap();
        assert!((mean[0] - 1.0).abs() < 0.02);
        assert!((mean[1] + 2.0).abs() < 0.04);

        let sd = state.positions().std_axis(Axis(0), 0.0);
        assert!((sd[0] - 0.1).abs() < 0.01);
        assert!((sd[1] - 0.2).abs() < 0.02);
    }

    #[test]
    fn initialize_zero_start_uses_floor() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let dispersion = InitialDispersion::Scale {
            scale: vec![1e-4; 3],
            floor: 1e-13,
        };
        let state = EnsembleState::initialize(
            array![0.0, 0.0, 0.0].view(),
            10,
            &dispersion,
            &standard_normal,
            &(),
            &mut rng,
        )
        .unwrap();

        // Walkers are distinct even though every start coordinate is zero
        assert_ne!(state.position(0), state.position(1));
        assert!(state.positions().iter().all(|x| x.abs() < 1e-5));
    }

    #[test]
    fn initialize_rejects_non_finite_start() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let zero_density = |_: ArrayView1<f64>, _: &()| f64::NEG_INFINITY;
        let dispersion = InitialDispersion::Scale {
            scale: vec![1e-4; 2],
            floor: 1e-13,
        };

        let result = EnsembleState::initialize(
            array![1.0, 1.0].view(),
            8,
            &dispersion,
            &zero_density,
            &(),
            &mut rng,
        );
        assert!(matches!(
            result,
            Err(GwmcError::Initialization { walker: 0, .. })
        ));
    }

    #[test]
    fn from_positions_reports_first_bad_walker() {
        let positive_only = |x: ArrayView1<f64>, _: &()| {
            if x[0] > 0.0 {
                0.0
            } else {
                f64::NEG_INFINITY
            }
        };
        let positions = array![[1.0], [2.0], [-1.0], [3.0]];
        let result = EnsembleState::from_positions(positions, &positive_only, &());
        assert_eq!(
            result.unwrap_err(),
            GwmcError::Initialization {
                walker: 2,
                value: f64::NEG_INFINITY
            }
        );
    }

    #[test]
    fn accept_and_reject_bookkeeping() {
        let positions = array![[0.0, 1.0], [2.0, 3.0], [4.0, 5.0]];
        let mut state = EnsembleState::from_positions(positions, &standard_normal, &()).unwrap();

        state.accept(1, array![0.0, 0.0], 0.0);
        state.reject(2);

        assert_eq!(state.position(1), array![0.0, 0.0]);
        assert_eq!(state.log_densities()[1], 0.0);
        assert_eq!(state.accepted(), array![false, true, false]);
        assert!(is_close!(state.acceptance_rate(), 1.0 / 3.0));

        let snapshot = state.snapshot(MoveKind::Stretch);
        assert_eq!(snapshot.positions, state.positions());
        assert!(snapshot.first_non_finite().is_none());
        assert!(is_close!(snapshot.acceptance_rate(), 1.0 / 3.0));
    }
}
