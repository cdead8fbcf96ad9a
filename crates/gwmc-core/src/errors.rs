use thiserror::Error;

/// Errors raised while configuring or running the ensemble sampler.
///
/// Every variant except [`GwmcError::ConfigFile`] corresponds to a fatal
/// condition: no partial sample set is ever returned alongside an error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GwmcError {
    #[error("Invalid sampler configuration: {0}")]
    Configuration(String),
    #[error("Walker {walker} has a non-finite initial log-density ({value}). All initial walkers must lie inside the support of the posterior; move the start vector or reduce the initial dispersion.")]
    Initialization { walker: usize, value: f64 },
    #[error("Walker {walker} reached a non-finite log-density ({value}) in cycle {cycle}. The ensemble state is corrupted and the run was aborted.")]
    RuntimeNonFinite {
        cycle: usize,
        walker: usize,
        value: f64,
    },
    #[error("Unable to load sampler configuration: {0}")]
    ConfigFile(String),
}

/// Convenience type for `Result<T, GwmcError>`.
pub type GwmcResult<T> = Result<T, GwmcError>;
