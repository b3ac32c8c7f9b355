//! Synthetic datasets with known additive structure.
//!
//! Every generator is seeded and uses [`Xoshiro256PlusPlus`], so datasets
//! are identical across platforms and runs.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;

/// Uniform features in `[min, max]`, shape `[rows, cols]`.
pub fn random_features(rows: usize, cols: usize, seed: u64, min: f32, max: f32) -> Array2<f32> {
    assert!(max >= min);
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let width = max - min;
    Array2::from_shape_fn((rows, cols), |_| min + rng.gen::<f32>() * width)
}

/// One-dimensional shape used to build additive targets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Shape {
    /// `height` where `x >= at`, zero below.
    Step { at: f32, height: f32 },
    Linear { slope: f32 },
    Sine { scale: f32 },
    Zero,
}

impl Shape {
    pub fn eval(self, x: f32) -> f32 {
        match self {
            Self::Step { at, height } => {
                if x >= at {
                    height
                } else {
                    0.0
                }
            }
            Self::Linear { slope } => slope * x,
            Self::Sine { scale } => (scale * x).sin(),
            Self::Zero => 0.0,
        }
    }
}

/// Additive regression targets `bias + Σ shapes[j](x_j) + noise`, shape `[rows, 1]`.
pub fn additive_targets(
    features: ArrayView2<'_, f32>,
    shapes: &[Shape],
    bias: f32,
    noise: f32,
    seed: u64,
) -> Array2<f32> {
    assert_eq!(features.ncols(), shapes.len());
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let y: Array1<f32> = features
        .outer_iter()
        .map(|row| {
            let clean: f32 = bias + row.iter().zip(shapes).map(|(&x, s)| s.eval(x)).sum::<f32>();
            if noise > 0.0 {
                clean + (rng.gen::<f32>() * 2.0 - 1.0) * noise
            } else {
                clean
            }
        })
        .collect();
    y.insert_axis(Axis(1))
}

/// Targets driven by a single pairwise interaction `scale · x_a · x_b`, shape `[rows, 1]`.
pub fn interaction_targets(features: ArrayView2<'_, f32>, pair: [usize; 2], scale: f32) -> Array2<f32> {
    let y: Array1<f32> = features.outer_iter().map(|row| scale * row[pair[0]] * row[pair[1]]).collect();
    y.insert_axis(Axis(1))
}

/// Binary {0, 1} labels: `1` where the additive score is positive.
pub fn binary_labels(features: ArrayView2<'_, f32>, shapes: &[Shape], bias: f32) -> Array2<f32> {
    additive_targets(features, shapes, bias, 0.0, 0).mapv(|s| if s > 0.0 { 1.0 } else { 0.0 })
}

/// Deterministic train/valid split indices.
///
/// Returns `(train_idx, valid_idx)`.
pub fn split_indices(rows: usize, valid_fraction: f32, seed: u64) -> (Vec<usize>, Vec<usize>) {
    assert!((0.0..1.0).contains(&valid_fraction));
    let mut idx: Vec<usize> = (0..rows).collect();
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    idx.shuffle(&mut rng);

    let valid_len = ((rows as f32) * valid_fraction).round() as usize;
    let valid_len = valid_len.min(rows);
    let (valid, train) = idx.split_at(valid_len);
    (train.to_vec(), valid.to_vec())
}

/// Rows of `data` at `idx`.
pub fn take_rows(data: ArrayView2<'_, f32>, idx: &[usize]) -> Array2<f32> {
    data.select(Axis(0), idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn features_are_reproducible_and_bounded() {
        let a = random_features(50, 3, 7, -2.0, 2.0);
        let b = random_features(50, 3, 7, -2.0, 2.0);
        assert_eq!(a, b);
        assert!(a.iter().all(|&v| (-2.0..=2.0).contains(&v)));
    }

    #[test]
    fn additive_targets_sum_shapes() {
        let x = ndarray::array![[1.0f32, 0.5], [-1.0, 2.0]];
        let shapes = [Shape::Step { at: 0.0, height: 3.0 }, Shape::Linear { slope: 2.0 }];
        let y = additive_targets(x.view(), &shapes, 0.5, 0.0, 0);
        assert_eq!(y.column(0).to_vec(), vec![4.5, 4.5]);
    }

    #[test]
    fn split_covers_every_row_once() {
        let (train, valid) = split_indices(100, 0.2, 3);
        assert_eq!(valid.len(), 20);
        let mut all: Vec<usize> = train.into_iter().chain(valid).collect();
        all.sort_unstable();
        assert_eq!(all, (0..100).collect::<Vec<_>>());
    }
}
