//! Sampler configuration and validation.
//!
//! A [`SamplerConfig`] holds every user-facing option of a run. It is plain
//! data (serialisable to and from TOML) and is only checked against the
//! problem dimension in [`SamplerConfig::plan`], which turns it into a
//! [`CyclePlan`].

use crate::ensemble::{cholesky_lower, InitialDispersion};
use crate::errors::{GwmcError, GwmcResult};
use crate::progress::Verbosity;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Minimum number of production cycles a run must keep.
pub const MIN_KEEP_CYCLES: usize = 10;

/// Default per-dimension scale factor applied to the squared start values.
pub const DEFAULT_INIT_SCALE: f64 = 1e-4;

/// Default lower bound on the diagonal of a scale-derived initial covariance.
pub const DEFAULT_INIT_FLOOR: f64 = 1e-13;

/// How walkers are visited within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateScheme {
    /// Walkers are updated one after another in index order. Complementary
    /// walkers are drawn from the live ensemble, so a walker may be paired
    /// with one that already moved earlier in the same cycle.
    #[default]
    Sequential,
    /// The ensemble is split into two halves and each half is updated against
    /// the frozen positions of the other. Proposals within a half are
    /// evaluated in parallel.
    Partitioned,
}

/// Options controlling an ensemble run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Number of production samples requested (across all walkers).
    pub n_samples: usize,
    /// Ensemble size N. Must exceed the number of dimensions.
    #[serde(default = "default_n_walkers")]
    pub n_walkers: usize,
    /// Number of samples (across all walkers) discarded as burn-in.
    #[serde(default = "default_burn_in")]
    pub burn_in: usize,
    /// Progress reporting interval, in percent of the total number of cycles.
    #[serde(default = "default_progress_interval")]
    pub progress_interval: usize,
    #[serde(default)]
    pub verbosity: Verbosity,
    /// Keep only every `thin`-th production cycle.
    #[serde(default)]
    pub thin: Option<usize>,
    /// Per-dimension scale factors for the initial dispersion.
    #[serde(default)]
    pub init_scale: Option<Vec<f64>>,
    /// Explicit initial covariance. Takes precedence over `init_scale`.
    #[serde(default)]
    pub init_covariance: Option<Array2<f64>>,
    /// Lower bound applied to scale-derived initial variances.
    #[serde(default = "default_init_floor")]
    pub init_floor: f64,
    /// Every `walk_move_rate`-th cycle uses the walk move. 0 disables it.
    #[serde(default)]
    pub walk_move_rate: usize,
    /// Stretch move scale parameter `a`. Must be greater than 1.
    #[serde(default = "default_stretch_scale")]
    pub stretch_scale: f64,
    /// Complementary sample size of the walk move (defaults to M + 1).
    #[serde(default)]
    pub walk_sample_size: Option<usize>,
    /// Flatten the walker dimension of the returned positions.
    #[serde(default = "default_merge_walkers")]
    pub merge_walkers: bool,
    #[serde(default)]
    pub update_scheme: UpdateScheme,
    /// Seed for the run's random source. A fresh entropy seed is used if absent.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Parameter names, one per dimension.
    #[serde(default)]
    pub param_names: Option<Vec<String>>,
}

fn default_n_walkers() -> usize {
    100
}

fn default_burn_in() -> usize {
    2000
}

fn default_progress_interval() -> usize {
    5
}

fn default_init_floor() -> f64 {
    DEFAULT_INIT_FLOOR
}

fn default_stretch_scale() -> f64 {
    2.0
}

fn default_merge_walkers() -> bool {
    true
}

/// Cycle counts and resolved move parameters derived from a validated configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CyclePlan {
    pub n_walkers: usize,
    pub n_dim: usize,
    /// Production cycles, `ceil(n_samples / n_walkers)`.
    pub keep_cycles: usize,
    /// Burn-in cycles, `ceil(burn_in / n_walkers)`.
    pub burn_in_cycles: usize,
    /// Thinning interval (1 when thinning is disabled).
    pub thin: usize,
    /// Complementary sample size used by the walk move.
    pub walk_sample_size: usize,
}

impl CyclePlan {
    pub fn total_cycles(&self) -> usize {
        self.keep_cycles + self.burn_in_cycles
    }

    /// Number of production cycles that survive thinning.
    pub fn retained_cycles(&self) -> usize {
        self.keep_cycles / self.thin
    }

    /// Number of samples in the final output.
    pub fn retained_samples(&self) -> usize {
        self.retained_cycles() * self.n_walkers
    }
}

impl SamplerConfig {
    /// Create a configuration requesting `n_samples` production samples with
    /// every other option at its default.
    pub fn new(n_samples: usize) -> Self {
        Self {
            n_samples,
            n_walkers: default_n_walkers(),
            burn_in: default_burn_in(),
            progress_interval: default_progress_interval(),
            verbosity: Verbosity::default(),
            thin: None,
            init_scale: None,
            init_covariance: None,
            init_floor: default_init_floor(),
            walk_move_rate: 0,
            stretch_scale: default_stretch_scale(),
            walk_sample_size: None,
            merge_walkers: default_merge_walkers(),
            update_scheme: UpdateScheme::default(),
            seed: None,
            param_names: None,
        }
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> GwmcResult<Self> {
        toml::from_str(text).map_err(|e| GwmcError::ConfigFile(e.to_string()))
    }

    /// Read a configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> GwmcResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| GwmcError::ConfigFile(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Serialise the configuration to TOML text.
    pub fn to_toml_string(&self) -> GwmcResult<String> {
        toml::to_string(self).map_err(|e| GwmcError::ConfigFile(e.to_string()))
    }

    pub fn with_walkers(mut self, n_walkers: usize) -> Self {
        self.n_walkers = n_walkers;
        self
    }

    pub fn with_burn_in(mut self, burn_in: usize) -> Self {
        self.burn_in = burn_in;
        self
    }

    pub fn with_thin(mut self, thin: usize) -> Self {
        self.thin = Some(thin);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn with_walk_moves(mut self, rate: usize, sample_size: Option<usize>) -> Self {
        self.walk_move_rate = rate;
        self.walk_sample_size = sample_size;
        self
    }

    pub fn with_stretch_scale(mut self, a: f64) -> Self {
        self.stretch_scale = a;
        self
    }

    pub fn with_update_scheme(mut self, scheme: UpdateScheme) -> Self {
        self.update_scheme = scheme;
        self
    }

    pub fn with_merge_walkers(mut self, merge: bool) -> Self {
        self.merge_walkers = merge;
        self
    }

    pub fn with_init_scale(mut self, scale: Vec<f64>) -> Self {
        self.init_scale = Some(scale);
        self
    }

    pub fn with_init_covariance(mut self, covariance: Array2<f64>) -> Self {
        self.init_covariance = Some(covariance);
        self
    }

    pub fn with_param_names(mut self, names: Vec<String>) -> Self {
        self.param_names = Some(names);
        self
    }

    /// Validate the configuration for an `n_dim`-dimensional problem and
    /// derive the cycle plan.
    ///
    /// The walk-move sample size defaults to `n_dim + 1` and is clamped into
    /// `[n_dim + 1, n_walkers - 1]` (or into the complementary half under the
    /// partitioned scheme). The lower bound is closed because `n_dim + 1` is
    /// the smallest integer greater than `n_dim`; the upper bound includes
    /// every complementary walker. With `n_walkers = n_dim + 1` the size falls
    /// back to `n_walkers - 1 = n_dim`.
    pub fn plan(&self, n_dim: usize) -> GwmcResult<CyclePlan> {
        if n_dim == 0 {
            return Err(GwmcError::Configuration(
                "Start vector must have at least one dimension".to_string(),
            ));
        }
        if self.n_walkers <= n_dim {
            return Err(GwmcError::Configuration(format!(
                "Number of walkers ({}) must exceed the number of dimensions ({})",
                self.n_walkers, n_dim
            )));
        }
        if self.update_scheme == UpdateScheme::Partitioned && self.n_walkers < 4 {
            return Err(GwmcError::Configuration(format!(
                "The partitioned update scheme needs at least 4 walkers, got {}",
                self.n_walkers
            )));
        }
        if !(self.stretch_scale > 1.0 && self.stretch_scale.is_finite()) {
            return Err(GwmcError::Configuration(format!(
                "Stretch move scale parameter must be > 1.0, got {}",
                self.stretch_scale
            )));
        }
        if !(1..=100).contains(&self.progress_interval) {
            return Err(GwmcError::Configuration(format!(
                "Progress interval must be a percentage in 1..=100, got {}",
                self.progress_interval
            )));
        }

        let keep_cycles = self.n_samples.div_ceil(self.n_walkers);
        if keep_cycles < MIN_KEEP_CYCLES {
            return Err(GwmcError::Configuration(format!(
                "Requested {} samples with {} walkers gives {} production cycles; at least {} are required",
                self.n_samples, self.n_walkers, keep_cycles, MIN_KEEP_CYCLES
            )));
        }
        let burn_in_cycles = self.burn_in.div_ceil(self.n_walkers);

        let thin = self.thin.unwrap_or(1);
        if thin == 0 || thin > keep_cycles {
            return Err(GwmcError::Configuration(format!(
                "Thinning interval must be in 1..={} for {} production cycles, got {}",
                keep_cycles, keep_cycles, thin
            )));
        }

        if let InitialDispersion::Covariance(covariance) = self.dispersion(n_dim)? {
            cholesky_lower(&covariance)?;
        }

        if let Some(names) = &self.param_names {
            if names.len() != n_dim {
                return Err(GwmcError::Configuration(format!(
                    "Got {} parameter names for {} dimensions",
                    names.len(),
                    n_dim
                )));
            }
        }

        let complement_size = match self.update_scheme {
            UpdateScheme::Sequential => self.n_walkers - 1,
            UpdateScheme::Partitioned => self.n_walkers / 2,
        };
        let requested = self.walk_sample_size.unwrap_or(n_dim + 1);
        let walk_sample_size = requested.max(n_dim + 1).min(complement_size);

        Ok(CyclePlan {
            n_walkers: self.n_walkers,
            n_dim,
            keep_cycles,
            burn_in_cycles,
            thin,
            walk_sample_size,
        })
    }

    /// The initial dispersion requested by this configuration.
    ///
    /// An explicit covariance wins over per-dimension scales.
    pub fn dispersion(&self, n_dim: usize) -> GwmcResult<InitialDispersion> {
        if let Some(covariance) = &self.init_covariance {
            if covariance.dim() != (n_dim, n_dim) {
                return Err(GwmcError::Configuration(format!(
                    "Initial covariance has shape {:?}, expected ({}, {})",
                    covariance.dim(),
                    n_dim,
                    n_dim
                )));
            }
            return Ok(InitialDispersion::Covariance(covariance.clone()));
        }

        let scale = match &self.init_scale {
            Some(scale) => {
                if scale.len() != n_dim {
                    return Err(GwmcError::Configuration(format!(
                        "Initial scale has {} entries, expected {}",
                        scale.len(),
                        n_dim
                    )));
                }
                if let Some(bad) = scale.iter().find(|s| !(**s > 0.0 && s.is_finite())) {
                    return Err(GwmcError::Configuration(format!(
                        "Initial scale entries must be positive and finite, got {}",
                        bad
                    )));
                }
                scale.clone()
            }
            None => vec![DEFAULT_INIT_SCALE; n_dim],
        };

        if !(self.init_floor > 0.0 && self.init_floor.is_finite()) {
            return Err(GwmcError::Configuration(format!(
                "Initial variance floor must be positive, got {}",
                self.init_floor
            )));
        }

        Ok(InitialDispersion::Scale {
            scale,
            floor: self.init_floor,
        })
    }

    /// Parameter names for an `n_dim`-dimensional problem.
    pub fn resolved_param_names(&self, n_dim: usize) -> Vec<String> {
        match &self.param_names {
            Some(names) => names.clone(),
            None => (0..n_dim).map(|i| format!("x{}", i)).collect(),
        }
    }
}
