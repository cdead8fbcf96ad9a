use super::{Complement, Move, MoveKind, Proposal};
use crate::errors::{GwmcError, GwmcResult};
use ndarray::{Array1, ArrayView1};
use rand::Rng;
use rand_distr::StandardNormal;

/// The walk move of Goodman & Weare (2010).
///
/// A proposal is the current position plus a random combination of the
/// deviations of `sample_size` complementary walkers from their own mean:
///
/// `W = Σᵢ zᵢ (Xᵢ - X̄) / √S`, with `zᵢ ~ N(0, 1)`.
///
/// The proposal is symmetric, so no correction term enters the acceptance
/// ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkMove {
    /// Number of complementary walkers S used per proposal
    pub sample_size: usize,
}

impl WalkMove {
    pub fn new(sample_size: usize) -> GwmcResult<Self> {
        if sample_size == 0 {
            return Err(GwmcError::Configuration(
                "Walk move sample size must be at least 1".to_string(),
            ));
        }
        Ok(Self { sample_size })
    }
}

impl Move for WalkMove {
    fn kind(&self) -> MoveKind {
        MoveKind::Walk
    }

    fn propose<R: Rng + ?Sized>(
        &self,
        current: ArrayView1<f64>,
        complement: &Complement<'_>,
        rng: &mut R,
    ) -> Proposal {
        let size = self.sample_size.min(complement.len());
        let chosen = complement.choose_distinct(rng, size);

        let n_dim = current.len();
        let mut mean = Array1::<f64>::zeros(n_dim);
        for walker in &chosen {
            mean += walker;
        }
        mean /= size as f64;

        let mut step = Array1::<f64>::zeros(n_dim);
        for walker in &chosen {
            let weight: f64 = rng.sample(StandardNormal);
            step.scaled_add(weight, &(walker - &mean));
        }
        step /= (size as f64).sqrt();

        Proposal {
            position: &current + &step,
            log_correction: 0.0,
        }
    }
}
