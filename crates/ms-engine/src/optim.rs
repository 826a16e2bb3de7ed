// Adam optimizer over the parameter slots a model exposes

use crate::model::Model;

/// Adam with L2 weight decay folded into the gradient.
#[derive(Debug, Clone)]
pub struct Adam {
    lr: f64,
    beta1: f64,
    beta2: f64,
    eps: f64,
    weight_decay: f64,
    step: i32,
    first_moment: Vec<Vec<f64>>,
    second_moment: Vec<Vec<f64>>,
}

impl Adam {
    pub fn new(lr: f64, weight_decay: f64) -> Self {
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay,
            step: 0,
            first_moment: Vec::new(),
            second_moment: Vec::new(),
        }
    }

    pub fn steps_taken(&self) -> usize {
        self.step.max(0) as usize
    }

    /// Apply one update from the gradients currently accumulated in `model`.
    pub fn step(&mut self, model: &mut dyn Model) {
        let mut slots = model.parameters();

        // Moments are sized lazily on the first step.
        if self.first_moment.len() != slots.len() {
            self.first_moment = slots.iter().map(|s| vec![0.0; s.value.len()]).collect();
            self.second_moment = self.first_moment.clone();
        }

        self.step = self.step.saturating_add(1);
        let bias1 = 1.0 - self.beta1.powi(self.step);
        let bias2 = 1.0 - self.beta2.powi(self.step);

        for ((slot, m), v) in slots
            .iter_mut()
            .zip(self.first_moment.iter_mut())
            .zip(self.second_moment.iter_mut())
        {
            for i in 0..slot.value.len() {
                let g = slot.grad[i] + self.weight_decay * slot.value[i];
                m[i] = self.beta1 * m[i] + (1.0 - self.beta1) * g;
                v[i] = self.beta2 * v[i] + (1.0 - self.beta2) * g * g;
                let m_hat = m[i] / bias1;
                let v_hat = v[i] / bias2;
                slot.value[i] -= self.lr * m_hat / (v_hat.sqrt() + self.eps);
            }
        }
    }
}
