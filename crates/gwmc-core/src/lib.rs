//! Affine-invariant ensemble MCMC sampling
//!
//! This crate implements the ensemble sampler of Goodman & Weare (2010): a set
//! of walkers explores an unnormalised log-density using stretch moves and,
//! optionally, walk moves built from the positions of the other walkers.
//!
//! # Module Organisation
//!
//! - `posterior`: the [`LogDensity`] trait implemented by target densities
//! - `config`: run configuration, TOML loading and cycle planning
//! - `ensemble`: walker state and initial dispersion
//! - `moves`: stretch and walk proposals and the Metropolis decision
//! - `scheduler`: the burn-in/production cycle loop and cancellation
//! - `output`: trimming, thinning and flattening recorded cycles
//! - `progress`: verbosity levels and progress reporters
//! - `sampler`: the [`EnsembleSampler`] entry point

pub mod config;
pub mod ensemble;
pub mod errors;
pub mod moves;
pub mod output;
pub mod posterior;
pub mod progress;
pub mod sampler;
pub mod scheduler;

pub use config::{CyclePlan, SamplerConfig, UpdateScheme};
pub use ensemble::{CycleSnapshot, EnsembleState, InitialDispersion};
pub use errors::{GwmcError, GwmcResult};
pub use moves::{MoveKind, StretchMove, WalkMove};
pub use output::{SampleSet, Samples};
pub use posterior::LogDensity;
pub use progress::{LogReporter, NullReporter, ProgressInfo, ProgressReporter, Verbosity};
pub use sampler::{sample, EnsembleSampler, PartialRun, RunOutcome};
pub use scheduler::CancelToken;
