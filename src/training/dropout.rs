//! Group dropout: random per-row masks over feature-group contributions.
//!
//! A dropped group contributes nothing to that row's training prediction;
//! kept groups are rescaled by `1 / (1 - rate)` so the expected total is
//! unchanged. Masks are only drawn during training. Inference never drops.

use ndarray::{Array2, ArrayView1, ArrayView2};
use rand::Rng;

/// Per-row group scales for one mini-batch, `[n_rows, n_groups]`.
///
/// Each entry is `0` (dropped) or `1 / (1 - rate)` (kept).
#[derive(Debug, Clone, PartialEq)]
pub struct GroupMask {
    scales: Array2<f32>,
}

impl GroupMask {
    /// Draw a mask row by row, group by group, from `rng`.
    ///
    /// `rate` must be in `[0, 1)`.
    pub fn sample<R: Rng>(rng: &mut R, n_rows: usize, n_groups: usize, rate: f32) -> Self {
        let keep_scale = 1.0 / (1.0 - rate);
        let mut scales = Array2::zeros((n_rows, n_groups));
        for s in scales.iter_mut() {
            if rng.gen::<f32>() >= rate {
                *s = keep_scale;
            }
        }
        Self { scales }
    }

    #[cfg(test)]
    pub(crate) fn from_scales(scales: Array2<f32>) -> Self {
        Self { scales }
    }

    #[inline]
    pub fn n_rows(&self) -> usize {
        self.scales.nrows()
    }

    /// Scales of the `i`-th row of the batch.
    #[inline]
    pub fn row(&self, i: usize) -> ArrayView1<'_, f32> {
        self.scales.row(i)
    }

    #[inline]
    pub fn scales(&self) -> ArrayView2<'_, f32> {
        self.scales.view()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    #[test]
    fn entries_are_zero_or_rescaled() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let mask = GroupMask::sample(&mut rng, 50, 4, 0.25);
        assert_eq!(mask.scales().dim(), (50, 4));
        assert!(mask.scales().iter().all(|&s| s == 0.0 || s == 1.0 / 0.75));
        let dropped = mask.scales().iter().filter(|&&s| s == 0.0).count();
        assert!((20..80).contains(&dropped), "dropped {dropped} of 200");
    }

    #[test]
    fn zero_rate_keeps_everything() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
        let mask = GroupMask::sample(&mut rng, 10, 3, 0.0);
        assert!(mask.scales().iter().all(|&s| s == 1.0));
    }

    #[test]
    fn same_seed_same_mask() {
        let draw = |seed| GroupMask::sample(&mut Xoshiro256PlusPlus::seed_from_u64(seed), 8, 5, 0.5);
        assert_eq!(draw(11), draw(11));
        assert_ne!(draw(11), draw(12));
    }
}
