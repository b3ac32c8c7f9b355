//! End-to-end training, evaluation and persistence through [`NodeGamModel`].

use ndarray::Array2;

use nodegam::model::{NodeGamConfig, NodeGamModel};
use nodegam::repr::ModelMode;
use nodegam::testing::data::{
    additive_targets, binary_labels, interaction_targets, random_features, split_indices, take_rows, Shape,
};
use nodegam::training::EvalSet;
use nodegam::{AnnealingSchedule, Metric, Objective, TaskKind};

fn regression_data(seed: u64) -> (Array2<f32>, Array2<f32>) {
    let x = random_features(400, 3, seed, -2.0, 2.0);
    let shapes = [Shape::Step { at: 0.0, height: 1.5 }, Shape::Sine { scale: 1.0 }, Shape::Zero];
    let y = additive_targets(x.view(), &shapes, 0.5, 0.05, seed + 1);
    (x, y)
}

fn quick_config(max_epochs: usize) -> NodeGamConfig {
    NodeGamConfig::builder()
        .depth(2)
        .learning_rate(0.05)
        .annealing(AnnealingSchedule::linear(1.0, 0.1, 60))
        .batch_size(64)
        .max_epochs(max_epochs)
        .n_threads(1)
        .build()
        .unwrap()
}

#[test]
fn regression_training_reduces_loss() {
    let (x, y) = regression_data(1);
    let config = NodeGamConfig { n_trees: Some(6), ..quick_config(10) };
    let model = NodeGamModel::train(x.view(), y.view(), &[], config).unwrap();

    let report = model.report().unwrap();
    let losses = report.loss_curve();
    assert_eq!(losses.len(), 10);
    assert!(losses[9] < losses[0], "loss went from {} to {}", losses[0], losses[9]);

    assert_eq!(model.meta().task, TaskKind::Regression);
    assert_eq!(model.meta().metric, Metric::Rmse);
    assert_eq!(model.ensemble().n_trees(), 6);
    assert_eq!(model.ensemble().trees_per_group(), vec![2, 2, 2]);

    let rmse = model.evaluate("train", x.view(), y.view()).unwrap();
    assert_eq!(rmse.metric, "rmse");
    assert!(rmse.value.is_finite());
}

#[test]
fn early_stopping_keeps_best_validation_epoch() {
    let (x, y) = regression_data(3);
    let (train_idx, valid_idx) = split_indices(x.nrows(), 0.25, 4);
    let (x_train, y_train) = (take_rows(x.view(), &train_idx), take_rows(y.view(), &train_idx));
    let (x_valid, y_valid) = (take_rows(x.view(), &valid_idx), take_rows(y.view(), &valid_idx));

    let config = NodeGamConfig { early_stopping_rounds: Some(3), ..quick_config(30) };
    let valid = [EvalSet::new("valid", x_valid.view(), y_valid.view())];
    let model = NodeGamModel::train(x_train.view(), y_train.view(), &valid, config).unwrap();

    let report = model.report().unwrap();
    let best = report.best_epoch.unwrap();
    assert_eq!(model.meta().best_epoch, Some(best));
    let valid_curve: Vec<f64> = report
        .history
        .iter()
        .map(|r| r.metrics.iter().find(|m| m.dataset == "valid").unwrap().value)
        .collect();
    let min = valid_curve.iter().copied().fold(f64::INFINITY, f64::min);
    assert_eq!(valid_curve[best], min);

    let restored = model.evaluate("valid", x_valid.view(), y_valid.view()).unwrap();
    approx::assert_relative_eq!(restored.value, min, max_relative = 1e-4);
}

#[test]
fn binary_classification_predicts_probabilities() {
    let x = random_features(300, 2, 8, -1.0, 1.0);
    let y = binary_labels(x.view(), &[Shape::Linear { slope: 2.0 }, Shape::Step { at: 0.3, height: -1.0 }], 0.2);
    let config = NodeGamConfig { objective: Objective::logistic(), ..quick_config(5) };
    let model = NodeGamModel::train(x.view(), y.view(), &[], config).unwrap();

    assert_eq!(model.meta().task, TaskKind::BinaryClassification);
    let p = model.predict(x.view()).unwrap();
    assert_eq!(p.dim(), (300, 1));
    assert!(p.iter().all(|&v| (0.0..=1.0).contains(&v)));
}

#[test]
fn ga2m_learns_interaction() {
    let x = random_features(400, 3, 11, -1.0, 1.0);
    let y = interaction_targets(x.view(), [0, 1], 2.0);
    let config = NodeGamConfig { mode: ModelMode::Ga2m { pairs: vec![[0, 1]] }, ..quick_config(10) };
    let model = NodeGamModel::train(x.view(), y.view(), &[], config).unwrap();

    assert!(model.ensemble().has_pairs());
    assert_eq!(model.ensemble().n_groups(), 4);
    let losses = model.report().unwrap().loss_curve();
    assert!(losses.last().unwrap() < &losses[0]);
}

#[test]
fn invalid_config_is_rejected_before_training() {
    let (x, y) = regression_data(5);
    let config = NodeGamConfig::builder().depth(0).build();
    assert!(config.is_err());

    let config = NodeGamConfig { mode: ModelMode::Ga2m { pairs: vec![[0, 7]] }, ..quick_config(3) };
    let err = NodeGamModel::train(x.view(), y.view(), &[], config).unwrap_err();
    assert!(matches!(err, nodegam::Error::Training(_)), "{err}");
}

#[test]
fn persisted_model_predicts_identically() {
    let (x, y) = regression_data(9);
    let config = NodeGamConfig { mode: ModelMode::Ga2m { pairs: vec![[1, 2]] }, ..quick_config(3) };
    let model = NodeGamModel::train(x.view(), y.view(), &[], config)
        .unwrap()
        .with_feature_names(vec!["a".into(), "b".into(), "c".into()])
        .unwrap();

    let json = model.to_json().unwrap();
    let loaded = NodeGamModel::from_json(&json).unwrap();

    assert!(loaded.ensemble().is_sealed());
    assert_eq!(loaded.meta(), model.meta());
    assert_eq!(loaded.schema(), model.schema());
    assert_eq!(loaded.report().unwrap().history.len(), 3);
    assert_eq!(loaded.predict(x.view()).unwrap(), model.predict(x.view()).unwrap());
    assert_eq!(
        loaded.predict_contributions(x.view()).unwrap(),
        model.predict_contributions(x.view()).unwrap()
    );
    assert_eq!(loaded.schema().feature(1).unwrap().display_name(), "b");
}
