// Stochastic gradient descent
//
// With g the accumulated gradient and b the batch size:
//
//   lr_t = lr / (1 + decay * iterations)
//
//   plain:     data -= lr_t / b * g
//   momentum:  v = mu * v - lr_t / b * g
//              data += v                        (classical)
//              data += mu * v - lr_t / b * g    (Nesterov)
//
// `iterations` counts completed steps, so the first step uses lr unchanged.

use wren_core::Result;
use wren_graph::{NodeId, Variable};

use crate::slots::Slots;
use crate::Optimizer;

#[derive(Debug, Clone, Copy)]
pub struct SgdConfig {
    pub learning_rate: f32,
    pub momentum: f32,
    pub decay: f32,
    pub nesterov: bool,
}

impl Default for SgdConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            momentum: 0.0,
            decay: 0.0,
            nesterov: false,
        }
    }
}

impl SgdConfig {
    pub fn with_learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_momentum(mut self, momentum: f32) -> Self {
        self.momentum = momentum;
        self
    }

    pub fn with_decay(mut self, decay: f32) -> Self {
        self.decay = decay;
        self
    }

    pub fn with_nesterov(mut self, nesterov: bool) -> Self {
        self.nesterov = nesterov;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Sgd {
    config: SgdConfig,
    iterations: u64,
    current_lr: f32,
    velocity: Slots,
}

impl Sgd {
    pub fn new(learning_rate: f32) -> Self {
        Self::with_config(SgdConfig::default().with_learning_rate(learning_rate))
    }

    pub fn with_config(config: SgdConfig) -> Self {
        Self {
            current_lr: config.learning_rate,
            config,
            iterations: 0,
            velocity: Slots::default(),
        }
    }

    pub fn config(&self) -> &SgdConfig {
        &self.config
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Forget velocities and the decay schedule.
    pub fn reset(&mut self) {
        self.iterations = 0;
        self.velocity.clear();
    }
}

impl Optimizer for Sgd {
    fn learning_rate(&self) -> f32 {
        self.config.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: f32) {
        self.config.learning_rate = learning_rate;
    }

    fn begin_step(&mut self) {
        self.current_lr =
            self.config.learning_rate / (1.0 + self.config.decay * self.iterations as f32);
        self.iterations += 1;
    }

    fn update(&mut self, id: NodeId, var: &mut Variable, grad_scale: f32) -> Result<()> {
        let step = self.current_lr * grad_scale;
        let mu = self.config.momentum;

        if mu == 0.0 {
            let (data, grad) = var.data_and_grad();
            for (d, g) in data.iter_mut().zip(grad) {
                *d -= step * g;
            }
            return Ok(());
        }

        let velocity = self.velocity.get_or_zeros(id, var.data());
        let nesterov = self.config.nesterov;
        let (data, grad) = var.data_and_grad();
        for ((d, v), g) in data.iter_mut().zip(velocity.iter_mut()).zip(grad) {
            *v = mu * *v - step * g;
            if nesterov {
                *d += mu * *v - step * g;
            } else {
                *d += *v;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wren_core::Tensor;
    use wren_graph::{Graph, Session};

    // loss = sum(w), so every gradient element is 1
    fn sum_graph(init: f32) -> (Graph, NodeId, NodeId) {
        let mut g = Graph::new();
        let w = g.variable(Tensor::full(1, init));
        let loss = g.sum(w);
        (g, w, loss)
    }

    fn run_steps(opt: &mut Sgd, steps: usize) -> f32 {
        let (mut g, w, loss) = sum_graph(0.0);
        let mut s = Session::default();
        for _ in 0..steps {
            opt.step(&mut s, &mut g, loss, 1).unwrap();
        }
        g.get_variable(w).unwrap().data().as_slice()[0]
    }

    #[test]
    fn test_classical_momentum() {
        let mut opt = Sgd::with_config(SgdConfig::default().with_learning_rate(1.0).with_momentum(0.9));
        // v1 = -1, v2 = -1.9
        assert!((run_steps(&mut opt, 2) + 2.9).abs() < 1e-6);
    }

    #[test]
    fn test_nesterov_momentum() {
        let mut opt = Sgd::with_config(
            SgdConfig::default()
                .with_learning_rate(1.0)
                .with_momentum(0.9)
                .with_nesterov(true),
        );
        // -1.9 then -2.71
        assert!((run_steps(&mut opt, 2) + 4.61).abs() < 1e-5);
    }

    #[test]
    fn test_inverse_time_decay() {
        let mut opt = Sgd::with_config(SgdConfig::default().with_learning_rate(1.0).with_decay(1.0));
        assert!((run_steps(&mut opt, 2) + 1.5).abs() < 1e-6);
        assert_eq!(opt.iterations(), 2);
        opt.reset();
        assert_eq!(opt.iterations(), 0);
    }
}
