// RMSprop
//
//   h = rho * h + (1 - rho) * g^2
//   data -= (lr / batch_size) * g / (eps + sqrt(h))
//
// with g the accumulated gradient.

use wren_core::Result;
use wren_graph::{NodeId, Variable};

use crate::slots::Slots;
use crate::Optimizer;

#[derive(Debug, Clone, Copy)]
pub struct RmsPropConfig {
    pub learning_rate: f32,
    pub rho: f32,
    pub epsilon: f32,
}

impl Default for RmsPropConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.001,
            rho: 0.9,
            epsilon: 1e-7,
        }
    }
}

impl RmsPropConfig {
    pub fn with_learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_rho(mut self, rho: f32) -> Self {
        self.rho = rho;
        self
    }
}

#[derive(Debug, Clone)]
pub struct RmsProp {
    config: RmsPropConfig,
    mean_square: Slots,
}

impl RmsProp {
    pub fn new(learning_rate: f32) -> Self {
        Self::with_config(RmsPropConfig::default().with_learning_rate(learning_rate))
    }

    pub fn with_config(config: RmsPropConfig) -> Self {
        Self {
            config,
            mean_square: Slots::default(),
        }
    }

    pub fn reset(&mut self) {
        self.mean_square.clear();
    }
}

impl Optimizer for RmsProp {
    fn learning_rate(&self) -> f32 {
        self.config.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: f32) {
        self.config.learning_rate = learning_rate;
    }

    fn update(&mut self, id: NodeId, var: &mut Variable, grad_scale: f32) -> Result<()> {
        let RmsPropConfig {
            learning_rate: lr,
            rho,
            epsilon: eps,
        } = self.config;
        let h = self.mean_square.get_or_zeros(id, var.data());
        let lr = lr * grad_scale;
        let (data, grad) = var.data_and_grad();
        for ((d, g), h) in data.iter_mut().zip(grad).zip(h.iter_mut()) {
            *h = rho * *h + (1.0 - rho) * g * g;
            *d -= lr * g / (eps + h.sqrt());
        }
        Ok(())
    }
}
