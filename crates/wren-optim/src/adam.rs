// Adam
//
// Per variable, with g the accumulated gradient, t the step count and
// lr already divided by the batch size:
//
//   m = b1 * m + (1 - b1) * g
//   v = b2 * v + (1 - b2) * g^2
//   data -= lr * m_hat / (sqrt(v_hat) + eps)
//
// where m_hat = m / (1 - b1^t) and v_hat = v / (1 - b2^t). Moments start at
// zero the first time a variable is updated.

use wren_core::{Result, Tensor};
use wren_graph::{NodeId, Variable};

use crate::slots::Slots;
use crate::Optimizer;

#[derive(Debug, Clone, Copy)]
pub struct AdamConfig {
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
        }
    }
}

impl AdamConfig {
    pub fn with_learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_betas(mut self, beta1: f32, beta2: f32) -> Self {
        self.beta1 = beta1;
        self.beta2 = beta2;
        self
    }

    pub fn with_epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Adam {
    config: AdamConfig,
    t: i32,
    m: Slots,
    v: Slots,
}

impl Default for Adam {
    fn default() -> Self {
        Self::with_config(AdamConfig::default())
    }
}

impl Adam {
    pub fn new(learning_rate: f32) -> Self {
        Self::with_config(AdamConfig::default().with_learning_rate(learning_rate))
    }

    pub fn with_config(config: AdamConfig) -> Self {
        Self {
            config,
            t: 0,
            m: Slots::default(),
            v: Slots::default(),
        }
    }

    pub fn config(&self) -> &AdamConfig {
        &self.config
    }

    /// Completed steps.
    pub fn timestep(&self) -> i32 {
        self.t
    }

    /// First moment of a variable, once it has been updated.
    pub fn first_moment(&self, id: NodeId) -> Option<&Tensor> {
        self.m.get(id)
    }

    pub fn second_moment(&self, id: NodeId) -> Option<&Tensor> {
        self.v.get(id)
    }

    pub fn reset(&mut self) {
        self.t = 0;
        self.m.clear();
        self.v.clear();
    }
}

impl Optimizer for Adam {
    fn learning_rate(&self) -> f32 {
        self.config.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: f32) {
        self.config.learning_rate = learning_rate;
    }

    fn begin_step(&mut self) {
        self.t = self.t.saturating_add(1);
    }

    fn update(&mut self, id: NodeId, var: &mut Variable, grad_scale: f32) -> Result<()> {
        let AdamConfig {
            learning_rate: lr,
            beta1: b1,
            beta2: b2,
            epsilon: eps,
        } = self.config;
        let m_hat_scale = 1.0 / (1.0 - b1.powi(self.t.max(1)));
        let v_hat_scale = 1.0 / (1.0 - b2.powi(self.t.max(1)));

        let m = self.m.get_or_zeros(id, var.data());
        let v = self.v.get_or_zeros(id, var.data());
        let lr = lr * grad_scale;
        let (data, grad) = var.data_and_grad();
        for (((d, g), m), v) in data.iter_mut().zip(grad).zip(m.iter_mut()).zip(v.iter_mut()) {
            *m = b1 * *m + (1.0 - b1) * g;
            *v = b2 * *v + (1.0 - b2) * g * g;
            *d -= lr * (*m * m_hat_scale) / ((*v * v_hat_scale).sqrt() + eps);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wren_graph::{Graph, Session};

    #[test]
    fn test_first_step_moves_by_learning_rate() {
        let mut g = Graph::new();
        let w = g.variable(Tensor::from_vec(vec![1.0, -1.0], 2).unwrap());
        let c = g.constant(Tensor::from_vec(vec![2.0, -3.0], 2).unwrap());
        let wc = g.mul(w, c);
        let loss = g.sum(wc);

        let mut opt = Adam::default();
        let mut s = Session::default();
        opt.step(&mut s, &mut g, loss, 1).unwrap();

        // m_hat = g and v_hat = g^2 after one step
        let data = g.get_variable(w).unwrap().data().to_vec();
        assert!((data[0] - 0.9).abs() < 1e-5);
        assert!((data[1] + 0.9).abs() < 1e-5);
        assert_eq!(opt.timestep(), 1);
        let m = opt.first_moment(w).unwrap().to_vec();
        assert!((m[0] - 0.2).abs() < 1e-6);
        assert!((opt.second_moment(w).unwrap().as_slice()[1] - 0.009).abs() < 1e-6);
    }

    #[test]
    fn test_moments_are_created_lazily() {
        let mut g = Graph::new();
        let a = g.variable(Tensor::ones(3));
        let b = g.variable(Tensor::ones(2));
        let loss = g.sum(a);

        let mut opt = Adam::default();
        let mut s = Session::default();
        opt.step(&mut s, &mut g, loss, 1).unwrap();
        assert_eq!(opt.first_moment(a).unwrap().dims(), &[3]);
        assert!(opt.first_moment(b).is_none());
    }
}
