// Adagrad: h += g^2, data -= (lr / batch_size) * g / (eps + sqrt(h)).

use wren_core::Result;
use wren_graph::{NodeId, Variable};

use crate::slots::Slots;
use crate::Optimizer;

#[derive(Debug, Clone, Copy)]
pub struct AdagradConfig {
    pub learning_rate: f32,
    pub epsilon: f32,
}

impl Default for AdagradConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            epsilon: 1e-7,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Adagrad {
    config: AdagradConfig,
    accumulators: Slots,
}

impl Adagrad {
    pub fn new(learning_rate: f32) -> Self {
        Self::with_config(AdagradConfig {
            learning_rate,
            ..AdagradConfig::default()
        })
    }

    pub fn with_config(config: AdagradConfig) -> Self {
        Self {
            config,
            accumulators: Slots::default(),
        }
    }

    pub fn reset(&mut self) {
        self.accumulators.clear();
    }
}

impl Optimizer for Adagrad {
    fn learning_rate(&self) -> f32 {
        self.config.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: f32) {
        self.config.learning_rate = learning_rate;
    }

    fn update(&mut self, id: NodeId, var: &mut Variable, grad_scale: f32) -> Result<()> {
        let AdagradConfig {
            learning_rate: lr,
            epsilon: eps,
        } = self.config;
        let h = self.accumulators.get_or_zeros(id, var.data());
        let lr = lr * grad_scale;
        let (data, grad) = var.data_and_grad();
        for ((d, g), h) in data.iter_mut().zip(grad).zip(h.iter_mut()) {
            *h += g * g;
            *d -= lr * g / (eps + h.sqrt());
        }
        Ok(())
    }
}
