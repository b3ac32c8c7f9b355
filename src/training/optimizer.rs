//! Adam optimizer over a flat parameter sequence.
//!
//! Parameters and gradients are visited in the same fixed order
//! ([`Ensemble::params`](crate::repr::Ensemble::params) and
//! [`EnsembleGrad::params`](super::EnsembleGrad::params)), so the moment
//! buffers are plain vectors indexed by position.

/// Adam with bias correction and optional decoupled weight decay.
#[derive(Clone, Debug)]
pub struct Adam {
    beta1: f32,
    beta2: f32,
    eps: f32,
    weight_decay: f32,
    t: u64,
    m: Vec<f32>,
    v: Vec<f32>,
}

impl Adam {
    pub fn new(n_params: usize) -> Self {
        Self {
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.0,
            t: 0,
            m: vec![0.0; n_params],
            v: vec![0.0; n_params],
        }
    }

    /// Decoupled weight decay; negative or non-finite values disable it.
    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = if weight_decay.is_finite() && weight_decay > 0.0 { weight_decay } else { 0.0 };
        self
    }

    /// Number of steps taken.
    #[inline]
    pub fn n_steps(&self) -> u64 {
        self.t
    }

    #[inline]
    pub fn n_params(&self) -> usize {
        self.m.len()
    }

    /// Apply one update.
    ///
    /// `params` and `grads` must yield exactly `n_params` values each, in
    /// matching order.
    pub fn step<'p, 'g>(
        &mut self,
        params: impl IntoIterator<Item = &'p mut f32>,
        grads: impl IntoIterator<Item = &'g f32>,
        lr: f32,
    ) {
        self.t += 1;
        let t = self.t as i32;
        let bias1 = (1.0 - self.beta1.powi(t)).max(1e-12);
        let bias2 = (1.0 - self.beta2.powi(t)).max(1e-12);
        let decay = lr * self.weight_decay;

        let mut count = 0;
        for (((p, &g), m), v) in params
            .into_iter()
            .zip(grads)
            .zip(self.m.iter_mut())
            .zip(self.v.iter_mut())
        {
            *m = self.beta1 * *m + (1.0 - self.beta1) * g;
            *v = self.beta2 * *v + (1.0 - self.beta2) * g * g;
            if decay > 0.0 {
                *p -= decay * *p;
            }
            let m_hat = *m / bias1;
            let v_hat = *v / bias2;
            *p -= lr * m_hat / (v_hat.sqrt() + self.eps);
            count += 1;
        }
        debug_assert_eq!(count, self.m.len(), "parameter count changed between steps");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn first_step_moves_by_lr() {
        // with bias correction the first step has magnitude ~lr per parameter
        let mut adam = Adam::new(2);
        let mut params = vec![1.0f32, -1.0];
        adam.step(params.iter_mut(), [0.5f32, -3.0].iter(), 0.1);
        assert_abs_diff_eq!(params[0], 0.9, epsilon = 1e-5);
        assert_abs_diff_eq!(params[1], -0.9, epsilon = 1e-5);
        assert_eq!(adam.n_steps(), 1);
    }

    #[test]
    fn minimizes_quadratic() {
        let mut adam = Adam::new(1);
        let mut x = vec![5.0f32];
        for _ in 0..2000 {
            let g = [2.0 * (x[0] - 2.0)];
            adam.step(x.iter_mut(), g.iter(), 0.05);
        }
        assert_abs_diff_eq!(x[0], 2.0, epsilon = 1e-2);
    }

    #[test]
    fn weight_decay_shrinks_without_gradient() {
        let mut adam = Adam::new(1).with_weight_decay(0.5);
        let mut x = vec![1.0f32];
        adam.step(x.iter_mut(), [0.0f32].iter(), 0.1);
        assert_abs_diff_eq!(x[0], 0.95, epsilon = 1e-6);
    }
}
