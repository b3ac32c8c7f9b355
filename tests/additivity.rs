//! Structural guarantees of the additive ensemble.
//!
//! - the prediction is exactly `bias + Σ group contributions`
//! - a group's contribution depends only on that group's features
//! - moving one of a group's own features across a split changes it
//! - features outside every group never influence the output

use ndarray::{array, Array1, Array2, Axis};
use proptest::prelude::*;

use nodegam::inference::{hard_leaf, Predictor};
use nodegam::oblivious_tree;
use nodegam::repr::{Ensemble, FeatureGroup, GroupId};
use nodegam::testing::{random_ensemble, random_tree, RandomEnsembleParams};
use nodegam::{Parallelism, SelectionFn, Temperature};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

const N_FEATURES: usize = 4;

fn arb_row() -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-3.0f32..3.0, N_FEATURES)
}

fn arb_temperature() -> impl Strategy<Value = Temperature> {
    prop_oneof![
        Just(Temperature::HARD),
        (0.01f32..2.0).prop_map(|t| Temperature::new(t).unwrap()),
    ]
}

fn arb_selection() -> impl Strategy<Value = SelectionFn> {
    prop_oneof![Just(SelectionFn::Softmax), Just(SelectionFn::Sparsemax)]
}

fn ensemble(seed: u64, selection: SelectionFn, temperature: Temperature, n_outputs: usize) -> Ensemble {
    random_ensemble(&RandomEnsembleParams {
        n_features: N_FEATURES,
        pairs: vec![[0, 1], [2, 3]],
        trees_per_group: 2,
        depth: 3,
        n_outputs,
        selection,
        temperature,
        seed,
    })
    .unwrap()
}

proptest! {
    #[test]
    fn total_is_bias_plus_group_sum(
        seed in 0u64..1000,
        row in arb_row(),
        selection in arb_selection(),
        temperature in arb_temperature(),
        n_outputs in 1usize..3,
    ) {
        let e = ensemble(seed, selection, temperature, n_outputs);
        let row = Array1::from(row);
        let d = e.forward(row.view());

        let mut expected = e.bias().to_vec();
        for g in 0..e.n_groups() {
            for (acc, &c) in expected.iter_mut().zip(d.contributions().row(g)) {
                *acc += c;
            }
        }
        prop_assert_eq!(d.total(), expected);
        prop_assert_eq!(e.forward_total(row.view()), d.total());
    }

    #[test]
    fn batch_matches_single_row(seed in 0u64..1000, rows in prop::collection::vec(arb_row(), 1..40)) {
        let e = ensemble(seed, SelectionFn::Softmax, Temperature::default(), 2);
        let x = Array2::from_shape_vec((rows.len(), N_FEATURES), rows.concat()).unwrap();
        let predictor = Predictor::new(&e).with_block_size(7);
        let raw = predictor.predict_raw(x.view(), Parallelism::Parallel);
        let contrib = predictor.predict_contributions(x.view(), Parallelism::Sequential);
        for (i, row) in x.outer_iter().enumerate() {
            let d = e.forward(row);
            prop_assert_eq!(raw.row(i).to_vec(), d.total());
            prop_assert_eq!(contrib.index_axis(Axis(0), i), d.contributions());
        }
    }

    #[test]
    fn group_contribution_ignores_foreign_features(
        seed in 0u64..1000,
        row in arb_row(),
        other in arb_row(),
        temperature in arb_temperature(),
    ) {
        let e = ensemble(seed, SelectionFn::Softmax, temperature, 1);
        let row = Array1::from(row);
        let base = e.forward(row.view());
        for (g, group) in e.groups().iter().enumerate() {
            // Overwrite every feature the group does not read.
            let mut perturbed = Array1::from(other.clone());
            for &f in group.features() {
                perturbed[f] = row[f];
            }
            let d = e.forward(perturbed.view());
            prop_assert_eq!(
                d.group(GroupId(g as u32)),
                base.group(GroupId(g as u32)),
                "group {} changed when only foreign features moved", group
            );
        }
    }

    #[test]
    fn group_contribution_follows_own_features(
        seed in 0u64..1000,
        row in arb_row(),
        depth in 1usize..4,
        group in 0usize..6,
    ) {
        let e = random_ensemble(&RandomEnsembleParams {
            n_features: N_FEATURES,
            pairs: vec![[0, 1], [2, 3]],
            trees_per_group: 1,
            depth,
            temperature: Temperature::HARD,
            seed,
            ..Default::default()
        })
        .unwrap();
        let id = GroupId(group as u32);
        let features = e.groups()[group].features().to_vec();
        let tree = e.trees_in_group(id).next().unwrap();

        // Feature read at the root and its threshold.
        let logits = tree.level_logits(0);
        let position = (0..logits.len()).fold(0, |best, i| if logits[i] > logits[best] { i } else { best });
        let feature = features[position];
        let threshold = tree.thresholds()[0];

        let mut below = Array1::from(row);
        below[feature] = threshold - 1.0;
        let mut above = below.clone();
        above[feature] = threshold + 1.0;

        let gathered = |x: &Array1<f32>| features.iter().map(|&f| x[f]).collect::<Vec<_>>();
        let (leaf_below, leaf_above) = (hard_leaf(tree, &gathered(&below)), hard_leaf(tree, &gathered(&above)));
        prop_assert_ne!(leaf_below, leaf_above);

        let (d_below, d_above) = (e.forward(below.view()), e.forward(above.view()));
        prop_assert_eq!(d_below.group(id), tree.leaf(leaf_below));
        prop_assert_eq!(d_above.group(id), tree.leaf(leaf_above));
        prop_assert_ne!(d_below.group(id), d_above.group(id), "group {} ignored feature {}", id, feature);
    }

    #[test]
    fn pair_only_model_ignores_unpaired_feature(seed in 0u64..1000, row in arb_row(), x2 in -100.0f32..100.0) {
        let groups = FeatureGroup::enumerate(3, &[[0, 1]]).unwrap();
        let pair = GroupId(3);
        let mut e = Ensemble::new(3, 1, groups).unwrap().with_temperature(Temperature::new(0.5).unwrap());
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        for _ in 0..3 {
            e.bind(random_tree(&mut rng, 2, 3, 1).unwrap(), pair).unwrap();
        }

        let base = array![row[0], row[1], row[2]];
        let moved = array![row[0], row[1], x2];
        prop_assert_eq!(e.forward_total(base.view()), e.forward_total(moved.view()));
    }
}

#[test]
fn depth_two_hard_traversal_reaches_expected_leaves() {
    let tree = oblivious_tree! {
        levels = [([0.0], -0.5, 0.0), ([0.0], 2.0, 0.0)];
        leaves = [[10.0], [20.0], [30.0], [40.0]];
    }
    .unwrap();
    let mut e = Ensemble::new(1, 1, vec![FeatureGroup::Single(0)]).unwrap();
    e.bind(tree.clone(), GroupId(0)).unwrap();

    for (x, leaf) in [(-1.0f32, 0usize), (0.0, 2), (1.0, 2), (5.0, 3)] {
        assert_eq!(hard_leaf(&tree, &[x]), leaf, "x = {x}");
        assert_eq!(e.forward_total(array![x].view()), vec![tree.leaf(leaf)[0]]);
    }
}

#[test]
fn value_on_threshold_goes_right() {
    let tree = oblivious_tree! { levels = [([0.0], 1.5, 0.0)]; leaves = [[0.0], [1.0]] }.unwrap();
    assert_eq!(hard_leaf(&tree, &[1.5]), 1);
    assert_eq!(hard_leaf(&tree, &[1.4999]), 0);
}

#[test]
fn hard_routing_breaks_ties_toward_lowest_index() {
    // Both pair features have equal logits; feature 0 (value -1) must be read.
    let tree = oblivious_tree! { levels = [([0.3, 0.3], 0.0, 0.0)]; leaves = [[1.0], [2.0]] }.unwrap();
    assert_eq!(hard_leaf(&tree, &[-1.0, 1.0]), 0);
    assert_eq!(hard_leaf(&tree, &[1.0, -1.0]), 1);
}
