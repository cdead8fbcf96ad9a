//! Ensemble moves.
//!
//! Both moves share a single contract: given a walker's current position and
//! a set of complementary walkers, produce a proposal together with the log
//! of any proposal-density correction. Acceptance is the same Metropolis
//! step for both and lives in [`update_walker`].

mod stretch;
mod walk;

pub use stretch::StretchMove;
pub use walk::WalkMove;

use crate::ensemble::EnsembleState;
use crate::errors::{GwmcError, GwmcResult};
use crate::posterior::LogDensity;
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Which move produced a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MoveKind {
    Stretch,
    Walk,
}

/// A proposed position and its log acceptance correction.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub position: Array1<f64>,
    /// `(M - 1) ln z` for the stretch move, zero for the walk move
    pub log_correction: f64,
}

/// The walkers a proposal for one walker may be built from.
///
/// Under the sequential scheme this is the live ensemble minus the walker
/// being updated; under the partitioned scheme it is the frozen other half.
#[derive(Debug, Clone, Copy)]
pub struct Complement<'a> {
    positions: ArrayView2<'a, f64>,
    exclude: Option<usize>,
}

impl<'a> Complement<'a> {
    /// Every row of `positions` is available.
    pub fn new(positions: ArrayView2<'a, f64>) -> Self {
        Self {
            positions,
            exclude: None,
        }
    }

    /// Every row of `positions` except `walker` is available.
    pub fn excluding(positions: ArrayView2<'a, f64>, walker: usize) -> Self {
        Self {
            positions,
            exclude: Some(walker),
        }
    }

    pub fn len(&self) -> usize {
        self.positions.nrows() - usize::from(self.exclude.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn row_index(&self, k: usize) -> usize {
        match self.exclude {
            Some(excluded) if k >= excluded => k + 1,
            _ => k,
        }
    }

    /// Pick one complementary walker uniformly at random.
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> ArrayView1<'_, f64> {
        let k = rng.gen_range(0..self.len());
        self.positions.row(self.row_index(k))
    }

    /// Pick `amount` distinct complementary walkers uniformly at random.
    pub fn choose_distinct<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        amount: usize,
    ) -> Vec<ArrayView1<'_, f64>> {
        rand::seq::index::sample(rng, self.len(), amount)
            .into_iter()
            .map(|k| self.positions.row(self.row_index(k)))
            .collect()
    }
}

/// A proposal mechanism for a single walker.
pub trait Move {
    fn kind(&self) -> MoveKind;

    fn propose<R: Rng + ?Sized>(
        &self,
        current: ArrayView1<f64>,
        complement: &Complement<'_>,
        rng: &mut R,
    ) -> Proposal;
}

/// The move applied in a particular cycle.
#[derive(Debug, Clone, Copy)]
pub enum CycleMove<'a> {
    Stretch(&'a StretchMove),
    Walk(&'a WalkMove),
}

impl Move for CycleMove<'_> {
    fn kind(&self) -> MoveKind {
        match self {
            CycleMove::Stretch(m) => m.kind(),
            CycleMove::Walk(m) => m.kind(),
        }
    }

    fn propose<R: Rng + ?Sized>(
        &self,
        current: ArrayView1<f64>,
        complement: &Complement<'_>,
        rng: &mut R,
    ) -> Proposal {
        match self {
            CycleMove::Stretch(m) => m.propose(current, complement, rng),
            CycleMove::Walk(m) => m.propose(current, complement, rng),
        }
    }
}

/// Metropolis acceptance in log space.
///
/// Accepts when `exp(log_ratio) >= u` without ever exponentiating a positive
/// log-ratio. Proposals with a log-ratio of negative infinity (zero posterior
/// density) are never accepted.
pub fn metropolis_accept(log_ratio: f64, u: f64) -> bool {
    if log_ratio >= 0.0 {
        true
    } else if log_ratio > f64::NEG_INFINITY {
        u <= log_ratio.exp()
    } else {
        false
    }
}

/// Evaluate a proposal for `walker` and decide whether to take it.
///
/// Returns the proposal's log-density and the acceptance decision. A `NaN`
/// log-density is a fatal error.
pub(crate) fn judge<P, C, R>(
    proposal: &Proposal,
    current_log_density: f64,
    posterior: &P,
    context: &C,
    rng: &mut R,
    cycle: usize,
    walker: usize,
) -> GwmcResult<(f64, bool)>
where
    P: LogDensity<C> + ?Sized,
    C: ?Sized,
    R: Rng + ?Sized,
{
    let log_density = posterior.log_density(proposal.position.view(), context);
    if log_density.is_nan() {
        return Err(GwmcError::RuntimeNonFinite {
            cycle,
            walker,
            value: log_density,
        });
    }

    let log_ratio = proposal.log_correction + log_density - current_log_density;
    let u: f64 = rng.gen();

    Ok((log_density, metropolis_accept(log_ratio, u)))
}

/// Update one walker in place against the live ensemble.
///
/// The complementary set is every other walker in its *current* state, so
/// walkers updated earlier in the same cycle are visible.
pub fn update_walker<M, P, C, R>(
    mv: &M,
    state: &mut EnsembleState,
    walker: usize,
    posterior: &P,
    context: &C,
    rng: &mut R,
    cycle: usize,
) -> GwmcResult<bool>
where
    M: Move + ?Sized,
    P: LogDensity<C> + ?Sized,
    C: ?Sized,
    R: Rng + ?Sized,
{
    let proposal = {
        let complement = Complement::excluding(state.positions(), walker);
        mv.propose(state.position(walker), &complement, rng)
    };

    let (log_density, accepted) = judge(
        &proposal,
        state.log_densities[walker],
        posterior,
        context,
        rng,
        cycle,
        walker,
    )?;

    if accepted {
        state.accept(walker, proposal.position, log_density);
    } else {
        state.reject(walker);
    }
    Ok(accepted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn metropolis_rule() {
        assert!(metropolis_accept(0.0, 0.999));
        assert!(metropolis_accept(1e6, 0.5));
        assert!(metropolis_accept(f64::INFINITY, 0.5));
        assert!(metropolis_accept((0.5f64).ln(), 0.49));
        assert!(!metropolis_accept((0.5f64).ln(), 0.51));
        assert!(!metropolis_accept(f64::NEG_INFINITY, 0.0));
        assert!(!metropolis_accept(f64::NAN, 0.0));
        assert!(!metropolis_accept(-1e6, 0.0 + f64::MIN_POSITIVE));
    }

    #[test]
    fn complement_excludes_walker() {
        let positions = array![[0.0], [1.0], [2.0], [3.0]];
        let complement = Complement::excluding(positions.view(), 2);
        assert_eq!(complement.len(), 3);

        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..200 {
            assert_ne!(complement.choose(&mut rng)[0], 2.0);
        }

        let picked: Vec<f64> = complement
            .choose_distinct(&mut rng, 3)
            .iter()
            .map(|row| row[0])
            .collect();
        let mut sorted = picked.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(sorted, vec![0.0, 1.0, 3.0]);
    }

    #[test]
    fn complement_without_exclusion() {
        let positions = array![[0.0], [1.0]];
        let complement = Complement::new(positions.view());
        assert_eq!(complement.len(), 2);
        assert!(!complement.is_empty());
    }

    #[test]
    fn nan_log_density_is_fatal() {
        let positions = array![[0.0], [1.0], [2.0]];
        let ok_then_nan = |x: ArrayView1<f64>, _: &()| if x[0] <= 2.0 { 0.0 } else { f64::NAN };
        let mut state = EnsembleState::from_positions(positions, &ok_then_nan, &()).unwrap();
        let walk = WalkMove::new(2).unwrap();

        // Walk proposals around the ensemble eventually leave [0, 2]
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut failure = None;
        for cycle in 1..=200 {
            for walker in 0..3 {
                if let Err(e) = update_walker(&walk, &mut state, walker, &ok_then_nan, &(), &mut rng, cycle) {
                    failure = Some(e);
                    break;
                }
            }
            if failure.is_some() {
                break;
            }
        }

        assert!(matches!(
            failure,
            Some(GwmcError::RuntimeNonFinite { value, .. }) if value.is_nan()
        ));
    }

    #[test]
    fn zero_density_proposals_are_rejected() {
        let positions = array![[0.1], [0.5], [0.9]];
        let unit_interval = |x: ArrayView1<f64>, _: &()| {
            if (0.0..=1.0).contains(&x[0]) {
                0.0
            } else {
                f64::NEG_INFINITY
            }
        };
        let mut state = EnsembleState::from_positions(positions, &unit_interval, &()).unwrap();
        let stretch = StretchMove::new(4.0).unwrap();

        let mut rng = ChaCha8Rng::seed_from_u64(5);
        for cycle in 1..=500 {
            for walker in 0..3 {
                update_walker(&stretch, &mut state, walker, &unit_interval, &(), &mut rng, cycle)
                    .unwrap();
            }
            assert!(state.positions().iter().all(|x| (0.0..=1.0).contains(x)));
            assert!(state.log_densities().iter().all(|lp| *lp == 0.0));
        }
    }
}
