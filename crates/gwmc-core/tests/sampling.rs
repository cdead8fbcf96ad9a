//! End-to-end sampling scenarios.
//!
//! These tests run the full sampler against simple targets and check the
//! shape of the output and the error paths.

use gwmc_core::{
    sample, EnsembleSampler, GwmcError, MoveKind, NullReporter, SampleSet, SamplerConfig,
    Samples, Verbosity,
};
use ndarray::{array, Array1, Array2, ArrayView1};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Gaussian defined by its mean and precision matrix.
struct Gaussian {
    mean: Array1<f64>,
    precision: Array2<f64>,
}

impl Gaussian {
    fn log_density(&self, x: ArrayView1<f64>) -> f64 {
        let d = &x - &self.mean;
        -0.5 * d.dot(&self.precision.dot(&d))
    }
}

fn gaussian_log_density(x: ArrayView1<f64>, target: &Gaussian) -> f64 {
    target.log_density(x)
}

fn standard_normal(x: ArrayView1<f64>, _: &()) -> f64 {
    -0.5 * x.dot(&x)
}

fn quiet(n_samples: usize) -> SamplerConfig {
    SamplerConfig::new(n_samples)
        .with_verbosity(Verbosity::Silent)
        .with_seed(2010)
}

mod output_shape {
    use super::*;

    #[test]
    fn test_correlated_gaussian_from_origin() {
        let target = Gaussian {
            mean: Array1::zeros(3),
            precision: array![[2.0, -0.5, 0.0], [-0.5, 1.5, 0.3], [0.0, 0.3, 1.0]],
        };
        let config = quiet(10_000).with_walkers(100).with_burn_in(1000);

        let set = sample(
            gaussian_log_density,
            array![0.0, 0.0, 0.0].view(),
            config,
            target,
        )
        .unwrap();

        match &set.positions {
            Samples::Merged(flat) => assert_eq!(flat.dim(), (10_000, 3)),
            Samples::PerWalker(_) => panic!("Expected merged samples"),
        }
        assert_eq!(set.log_densities.len(), 10_000);
        assert!(set.log_densities.iter().all(|lp| lp.is_finite()));
        assert!(set.acceptance_rate > 0.0 && set.acceptance_rate < 1.0);
        assert_eq!(set.walker_count, 100);
        assert_eq!(set.method, "affine-invariant ensemble");
    }

    #[test]
    fn test_sample_count_rounds_up_to_whole_cycles() {
        let config = quiet(1005).with_walkers(10).with_burn_in(0);
        let set = sample(standard_normal, array![0.0].view(), config, ()).unwrap();

        assert_eq!(set.n_cycles(), 101);
        assert_eq!(set.n_samples(), 1010);
    }

    #[test]
    fn test_thinning_keeps_every_fifth_cycle() {
        let config = quiet(500).with_walkers(10).with_burn_in(100).with_thin(5);
        let set = sample(standard_normal, array![0.0, 1.0].view(), config, ()).unwrap();

        assert_eq!(set.n_cycles(), 10);
        assert_eq!(set.n_samples(), 100);
        assert_eq!(set.flat_positions().dim(), (100, 2));
    }

    #[test]
    fn test_unmerged_layout_matches_merged() {
        let merged = sample(standard_normal, array![0.3, 0.3].view(), quiet(400).with_walkers(8), ())
            .unwrap();
        let per_walker = sample(
            standard_normal,
            array![0.3, 0.3].view(),
            quiet(400).with_walkers(8).with_merge_walkers(false),
            (),
        )
        .unwrap();

        match &per_walker.positions {
            Samples::PerWalker(cube) => assert_eq!(cube.dim(), (50, 8, 2)),
            Samples::Merged(_) => panic!("Expected per-walker samples"),
        }
        assert_eq!(merged.flat_positions(), per_walker.flat_positions());
        assert_eq!(merged.log_densities, per_walker.log_densities);
    }

    #[test]
    fn test_walk_moves_every_fifth_cycle() {
        let config = quiet(200)
            .with_walkers(10)
            .with_burn_in(0)
            .with_walk_moves(5, None);
        let set = sample(standard_normal, array![0.0, 0.0].view(), config, ()).unwrap();

        assert_eq!(set.moves.len(), 20);
        let walk_cycles: Vec<usize> = set
            .moves
            .iter()
            .enumerate()
            .filter(|(_, kind)| **kind == MoveKind::Walk)
            .map(|(i, _)| i + 1)
            .collect();
        assert_eq!(walk_cycles, vec![5, 10, 15, 20]);
        assert_eq!(
            set.moves.iter().filter(|k| **k == MoveKind::Stretch).count(),
            16
        );
    }

    #[test]
    fn test_named_parameters() {
        let config = quiet(1000)
            .with_walkers(10)
            .with_param_names(vec!["slope".to_string(), "intercept".to_string()]);
        let set = sample(standard_normal, array![1.0, 2.0].view(), config, ()).unwrap();

        let params = set.to_param_map();
        assert_eq!(params.keys().collect::<Vec<_>>(), vec!["slope", "intercept"]);
        assert_eq!(params["slope"].len(), 1000);
    }

    #[test]
    fn test_result_serialises() {
        let set = sample(standard_normal, array![0.0].view(), quiet(100).with_walkers(10), ())
            .unwrap();
        let json = serde_json::to_string(&set).unwrap();
        let back: SampleSet = serde_json::from_str(&json).unwrap();

        assert_eq!(back.n_samples(), set.n_samples());
        assert_eq!(back.moves, set.moves);
        assert_eq!(back.param_names, set.param_names);
    }
}

mod configuration {
    use super::*;

    #[test]
    fn test_walkers_one_more_than_dimension_accepted() {
        let config = quiet(40).with_walkers(4).with_burn_in(0);
        let set = sample(standard_normal, array![0.1, 0.2, 0.3].view(), config, ()).unwrap();
        assert_eq!(set.n_samples(), 40);
    }

    #[test]
    fn test_walkers_equal_to_dimension_rejected() {
        let config = quiet(40).with_walkers(3);
        let result = sample(standard_normal, array![0.1, 0.2, 0.3].view(), config, ());
        assert!(matches!(result, Err(GwmcError::Configuration(_))));
    }

    #[test]
    fn test_fewer_than_ten_cycles_rejected() {
        let ok = sample(standard_normal, array![0.0].view(), quiet(91).with_walkers(10), ());
        assert!(ok.is_ok());

        let result = sample(standard_normal, array![0.0].view(), quiet(90).with_walkers(10), ());
        assert!(matches!(result, Err(GwmcError::Configuration(_))));
    }

    #[test]
    fn test_bad_stretch_scale_rejected() {
        let config = quiet(1000).with_walkers(10).with_stretch_scale(1.0);
        let result = sample(standard_normal, array![0.0].view(), config, ());
        assert!(matches!(result, Err(GwmcError::Configuration(_))));
    }

    #[test]
    fn test_bad_init_scale_rejected() {
        let wrong_length = quiet(1000).with_walkers(10).with_init_scale(vec![1.0]);
        let result = sample(standard_normal, array![0.0, 0.0].view(), wrong_length, ());
        assert!(matches!(result, Err(GwmcError::Configuration(_))));

        let negative = quiet(1000).with_walkers(10).with_init_scale(vec![1.0, -1.0]);
        let result = sample(standard_normal, array![0.0, 0.0].view(), negative, ());
        assert!(matches!(result, Err(GwmcError::Configuration(_))));
    }

    #[test]
    fn test_run_from_toml() {
        let config = SamplerConfig::from_toml_str(
            r#"
n_samples = 1000
n_walkers = 20
burn_in = 200
verbosity = "silent"
seed = 11
walk_move_rate = 4
"#,
        )
        .unwrap();

        let set = sample(standard_normal, array![0.0, 0.0].view(), config, ()).unwrap();
        assert_eq!(set.n_samples(), 1000);
        assert_eq!(set.moves.iter().filter(|k| **k == MoveKind::Walk).count(), 13);
    }
}

mod failures {
    use super::*;

    #[test]
    fn test_zero_density_everywhere_fails_initialisation() {
        let nowhere = |_: ArrayView1<f64>, _: &()| f64::NEG_INFINITY;
        let result = sample(nowhere, array![0.0, 0.0].view(), quiet(1000).with_walkers(10), ());

        assert!(matches!(
            result,
            Err(GwmcError::Initialization { walker: 0, value }) if value == f64::NEG_INFINITY
        ));
    }

    #[test]
    fn test_nan_after_five_production_cycles_aborts() {
        // 10 seeding evaluations, 2 burn-in cycles and 5 production cycles
        let budget = 10 + 10 * (2 + 5);
        let calls = AtomicUsize::new(0);
        let failing = |x: ArrayView1<f64>, _: &()| -> f64 {
            if calls.fetch_add(1, Ordering::Relaxed) < budget {
                -0.5 * x.dot(&x)
            } else {
                f64::NAN
            }
        };
        let config = quiet(1000).with_walkers(10).with_burn_in(20);

        let result = sample(failing, array![0.0].view(), config, ());
        match result {
            Err(GwmcError::RuntimeNonFinite { cycle, walker, value }) => {
                assert_eq!(cycle, 8);
                assert_eq!(walker, 0);
                assert!(value.is_nan());
            }
            other => panic!("Expected a runtime failure, got {:?}", other),
        }
    }

    #[test]
    fn test_infinite_density_after_five_production_cycles_aborts() {
        let budget = 10 + 10 * (2 + 5);
        let calls = AtomicUsize::new(0);
        let failing = |x: ArrayView1<f64>, _: &()| -> f64 {
            if calls.fetch_add(1, Ordering::Relaxed) < budget {
                -0.5 * x.dot(&x)
            } else {
                f64::INFINITY
            }
        };
        let config = quiet(1000).with_walkers(10).with_burn_in(20);

        let result = sample(failing, array![0.0].view(), config, ());
        assert!(matches!(
            result,
            Err(GwmcError::RuntimeNonFinite { cycle: 8, .. })
        ));
    }
}

mod reproducibility {
    use super::*;

    #[test]
    fn test_same_seed_same_samples() {
        let config = quiet(2000).with_walkers(20).with_walk_moves(4, None);
        let a = sample(standard_normal, array![0.5, 0.5, 0.5].view(), config.clone(), ()).unwrap();
        let b = sample(standard_normal, array![0.5, 0.5, 0.5].view(), config, ()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_same_random_source_same_samples() {
        let sampler = EnsembleSampler::new(standard_normal, (), quiet(1000).with_walkers(10));
        let run = |seed: u64| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            sampler
                .run_with(array![0.0, 1.0].view(), &mut rng, &mut NullReporter)
                .unwrap()
        };

        assert_eq!(run(99), run(99));
        assert_ne!(run(99).log_densities, run(100).log_densities);
    }
}
