//! The log-density contract consumed by the sampler.
//!
//! The sampler never looks inside the posterior: it hands over a position and
//! an opaque caller context and receives an unnormalised log-density back.

use ndarray::ArrayView1;

/// An unnormalised log-density over an M-dimensional real parameter space.
///
/// `C` is an auxiliary context (data, hyper-parameters, ...) that is threaded
/// unchanged from the sampler entry point to every evaluation.
///
/// Implementations return `f64::NEG_INFINITY` where the density is zero.
/// Returning `NaN` is a contract violation and aborts a run.
///
/// Any `Fn(ArrayView1<f64>, &C) -> f64` closure implements this trait:
///
/// ```
/// use gwmc_core::posterior::LogDensity;
/// use ndarray::{array, ArrayView1};
///
/// let gaussian = |x: ArrayView1<f64>, sigma: &f64| -0.5 * x.dot(&x) / (sigma * sigma);
/// let lp = gaussian.log_density(array![1.0, 1.0].view(), &2.0);
/// assert_eq!(lp, -0.25);
/// ```
pub trait LogDensity<C: ?Sized> {
    /// Evaluate the log-density at `position`.
    fn log_density(&self, position: ArrayView1<f64>, context: &C) -> f64;
}

impl<C: ?Sized, F> LogDensity<C> for F
where
    F: Fn(ArrayView1<f64>, &C) -> f64,
{
    fn log_density(&self, position: ArrayView1<f64>, context: &C) -> f64 {
        self(position, context)
    }
}
