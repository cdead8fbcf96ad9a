//! Affine-invariant ensemble MCMC sampling
//!
//! `gwmc` draws samples from an unnormalised log-density with the ensemble
//! sampler of Goodman & Weare (2010). The sampling engine lives in
//! `gwmc-core` and is re-exported here; convergence summaries are in
//! [`diagnostics`].
//!
//! ```
//! use gwmc::{sample, SamplerConfig, Verbosity};
//! use ndarray::{array, ArrayView1};
//!
//! let config = SamplerConfig::new(1000)
//!     .with_walkers(10)
//!     .with_seed(7)
//!     .with_verbosity(Verbosity::Silent);
//! let samples = sample(|x: ArrayView1<f64>, _: &()| -0.5 * x.dot(&x), array![0.0].view(), config, ())
//!     .unwrap();
//!
//! let diagnostics = gwmc::diagnostics::Diagnostics::from_samples(&samples);
//! assert_eq!(diagnostics.acceptance_fraction.len(), 10);
//! ```

pub use gwmc_core::*;
pub use gwmc_diagnostics as diagnostics;
