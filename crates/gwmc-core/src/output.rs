//! Turning the cycle history of a run into a sample set.
//!
//! Flattened collections are cycle-major: sample `i` comes from cycle
//! `i / n_walkers` and walker `i % n_walkers`. Merged positions and the
//! log-density vector always share this ordering.

use crate::config::CyclePlan;
use crate::ensemble::CycleSnapshot;
use crate::moves::MoveKind;
use indexmap::IndexMap;
use ndarray::{Array1, Array2, Array3, ArrayView, Axis, Dimension};
use serde::{Deserialize, Serialize};

/// Identifies the algorithm that produced a [`SampleSet`].
pub const METHOD_NAME: &str = "affine-invariant ensemble";

/// Overall acceptance rates below this value trigger an advisory.
pub const LOW_ACCEPTANCE_THRESHOLD: f64 = 0.05;

/// Retained walker positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "layout", content = "values", rename_all = "kebab-case")]
pub enum Samples {
    /// Shape (n_cycles * n_walkers, n_dim), cycle-major
    Merged(Array2<f64>),
    /// Shape (n_cycles, n_walkers, n_dim)
    PerWalker(Array3<f64>),
}

impl Samples {
    pub fn is_merged(&self) -> bool {
        matches!(self, Samples::Merged(_))
    }
}

/// The result of an ensemble run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleSet {
    pub positions: Samples,

    /// Log-density of every retained sample, cycle-major
    pub log_densities: Array1<f64>,

    /// Acceptance flags: shape (n_cycles, n_walkers)
    pub accepted: Array2<bool>,

    /// Mean acceptance of each retained cycle
    pub cycle_acceptance: Array1<f64>,

    /// Move used in each retained cycle
    pub moves: Vec<MoveKind>,

    /// Mean of all retained acceptance flags
    pub acceptance_rate: f64,

    pub method: String,

    pub walker_count: usize,

    pub n_dim: usize,

    pub param_names: Vec<String>,
}

impl SampleSet {
    /// Number of retained cycles.
    pub fn n_cycles(&self) -> usize {
        self.accepted.nrows()
    }

    /// Number of retained samples (cycles times walkers).
    pub fn n_samples(&self) -> usize {
        self.log_densities.len()
    }

    /// Positions as a (n_samples, n_dim) array regardless of layout.
    pub fn flat_positions(&self) -> Array2<f64> {
        match &self.positions {
            Samples::Merged(flat) => flat.clone(),
            Samples::PerWalker(cube) => flatten(cube),
        }
    }

    /// Positions as a (n_cycles, n_walkers, n_dim) array regardless of layout.
    pub fn walker_positions(&self) -> Array3<f64> {
        match &self.positions {
            Samples::PerWalker(cube) => cube.clone(),
            Samples::Merged(flat) => {
                let mut cube = Array3::zeros((self.n_cycles(), self.walker_count, self.n_dim));
                for (i, sample) in flat.outer_iter().enumerate() {
                    cube.slice_mut(ndarray::s![i / self.walker_count, i % self.walker_count, ..])
                        .assign(&sample);
                }
                cube
            }
        }
    }

    /// Map from parameter name to every retained value of that parameter.
    pub fn to_param_map(&self) -> IndexMap<String, Array1<f64>> {
        let flat = self.flat_positions();
        let mut map = IndexMap::new();

        for (i, name) in self.param_names.iter().enumerate() {
            map.insert(name.clone(), flat.column(i).to_owned());
        }

        map
    }

    /// Advisory text when the overall acceptance rate is suspiciously low.
    pub fn low_acceptance_advisory(&self) -> Option<String> {
        if self.n_cycles() > 0 && self.acceptance_rate < LOW_ACCEPTANCE_THRESHOLD {
            Some(format!(
                "Low acceptance rate ({:.3} < {}); consider a smaller stretch scale, more burn-in, or a better start vector",
                self.acceptance_rate, LOW_ACCEPTANCE_THRESHOLD
            ))
        } else {
            None
        }
    }
}

fn flatten(cube: &Array3<f64>) -> Array2<f64> {
    let (n_cycles, n_walkers, n_dim) = cube.dim();
    let mut flat = Array2::zeros((n_cycles * n_walkers, n_dim));

    for (i, cycle) in cube.outer_iter().enumerate() {
        for (j, walker) in cycle.outer_iter().enumerate() {
            flat.row_mut(i * n_walkers + j).assign(&walker);
        }
    }

    flat
}

/// Trims, thins and reshapes a cycle history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputAssembler {
    pub burn_in_cycles: usize,
    pub thin: usize,
    pub merge_walkers: bool,
}

impl OutputAssembler {
    pub fn new(burn_in_cycles: usize, thin: usize, merge_walkers: bool) -> Self {
        Self {
            burn_in_cycles,
            thin: thin.max(1),
            merge_walkers,
        }
    }

    pub fn from_plan(plan: &CyclePlan, merge_walkers: bool) -> Self {
        Self::new(plan.burn_in_cycles, plan.thin, merge_walkers)
    }

    /// Snapshots that survive burn-in removal and thinning.
    ///
    /// Of the production cycles, the `thin`-th, `2 * thin`-th, ... are kept.
    pub fn retained<'a>(
        &self,
        snapshots: &'a [CycleSnapshot],
    ) -> impl Iterator<Item = &'a CycleSnapshot> {
        snapshots
            .iter()
            .skip(self.burn_in_cycles)
            .skip(self.thin - 1)
            .step_by(self.thin)
    }

    /// Build the sample set from a full cycle history.
    pub fn assemble(&self, snapshots: &[CycleSnapshot], param_names: Vec<String>) -> SampleSet {
        let retained: Vec<&CycleSnapshot> = self.retained(snapshots).collect();
        let n_cycles = retained.len();
        let (n_walkers, n_dim) = retained
            .first()
            .copied()
            .or(snapshots.first())
            .map(|s| s.positions.dim())
            .unwrap_or((0, param_names.len()));

        let mut cube = Array3::zeros((n_cycles, n_walkers, n_dim));
        let mut log_densities = Array1::zeros(n_cycles * n_walkers);
        let mut accepted = Array2::from_elem((n_cycles, n_walkers), false);
        let mut moves = Vec::with_capacity(n_cycles);

        for (i, snapshot) in retained.iter().enumerate() {
            cube.index_axis_mut(Axis(0), i).assign(&snapshot.positions);
            log_densities
                .slice_mut(ndarray::s![i * n_walkers..(i + 1) * n_walkers])
                .assign(&snapshot.log_densities);
            accepted.row_mut(i).assign(&snapshot.accepted);
            moves.push(snapshot.move_kind);
        }

        let cycle_acceptance: Array1<f64> = accepted.outer_iter().map(mean_flag).collect();
        let acceptance_rate = mean_flag(accepted.view());

        let positions = if self.merge_walkers {
            Samples::Merged(flatten(&cube))
        } else {
            Samples::PerWalker(cube)
        };

        SampleSet {
            positions,
            log_densities,
            accepted,
            cycle_acceptance,
            moves,
            acceptance_rate,
            method: METHOD_NAME.to_string(),
            walker_count: n_walkers,
            n_dim,
            param_names,
        }
    }
}

fn mean_flag<D: Dimension>(flags: ArrayView<bool, D>) -> f64 {
    if flags.is_empty() {
        return 0.0;
    }
    flags.iter().filter(|&&a| a).count() as f64 / flags.len() as f64
}
