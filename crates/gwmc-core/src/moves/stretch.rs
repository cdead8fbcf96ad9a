use super::{Complement, Move, MoveKind, Proposal};
use crate::errors::{GwmcError, GwmcResult};
use ndarray::ArrayView1;
use rand::Rng;

/// Configuration for the stretch move proposal.
///
/// The stretch move is parameterized by a scale parameter `a` that controls
/// the proposal distribution. The default value of 2.0 is recommended by
/// Goodman & Weare (2010).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StretchMove {
    /// Scale parameter for the stretch move (typically 2.0)
    pub a: f64,
}

impl Default for StretchMove {
    fn default() -> Self {
        Self { a: 2.0 }
    }
}

impl StretchMove {
    /// Create a new stretch move with custom scale parameter.
    ///
    /// # Arguments
    ///
    /// * `a` - Scale parameter, must be > 1.0. Recommended value is 2.0.
    pub fn new(a: f64) -> GwmcResult<Self> {
        if !(a > 1.0 && a.is_finite()) {
            return Err(GwmcError::Configuration(format!(
                "Stretch move scale parameter must be > 1.0, got {}",
                a
            )));
        }
        Ok(Self { a })
    }

    /// Sample a stretch factor z from the proposal distribution g(z).
    ///
    /// The distribution is g(z) ∝ 1/sqrt(z) for z in [1/a, a], which can be
    /// sampled by drawing u ~ Uniform(0,1) and setting z = ((a-1)*u + 1)^2 / a.
    pub fn sample_z<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let u: f64 = rng.gen();

        ((self.a - 1.0) * u + 1.0).powi(2) / self.a
    }

    /// Log of the proposal-density correction, `(n_dim - 1) ln z`.
    pub fn log_correction(z: f64, n_dim: usize) -> f64 {
        (n_dim as f64 - 1.0) * z.ln()
    }
}

impl Move for StretchMove {
    fn kind(&self) -> MoveKind {
        MoveKind::Stretch
    }

    /// Propose `y = c + z (x - c)` where `x` is the current position and `c`
    /// a complementary walker chosen uniformly at random.
    ///
    /// The complementary walker is drawn before the stretch factor.
    fn propose<R: Rng + ?Sized>(
        &self,
        current: ArrayView1<f64>,
        complement: &Complement<'_>,
        rng: &mut R,
    ) -> Proposal {
        let other = complement.choose(rng);
        let z = self.sample_z(rng);

        let position = &other + &((&current - &other) * z);

        Proposal {
            position,
            log_correction: Self::log_correction(z, current.len()),
        }
    }
}
