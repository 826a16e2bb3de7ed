//! Regression model: a representation sub-model feeding a projection sub-model.

use ms_types::TrainingError;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// One trainable parameter tensor with its accumulated gradient.
pub struct ParamSlot<'a> {
    pub value: &'a mut [f64],
    pub grad: &'a mut [f64],
}

/// A differentiable model over fixed-width input rows, one scalar output per row.
pub trait Model: Send {
    fn input_dim(&self) -> usize;

    /// Training-mode forward pass. Caches activations for [`Model::backward`].
    fn forward(&mut self, inputs: &[Vec<f64>]) -> Result<Vec<f64>, TrainingError>;

    /// Inference without caching or gradient bookkeeping.
    fn predict(&self, inputs: &[Vec<f64>]) -> Result<Vec<f64>, TrainingError>;

    /// Accumulate parameter gradients for the last forward pass.
    fn backward(&mut self, grad_output: &[f64]) -> Result<(), TrainingError>;

    fn parameters(&mut self) -> Vec<ParamSlot<'_>>;

    fn zero_grad(&mut self) {
        for slot in self.parameters() {
            slot.grad.fill(0.0);
        }
    }

    fn num_parameters(&mut self) -> usize {
        self.parameters().iter().map(|s| s.value.len()).sum()
    }
}

/// Fully connected layer, weights stored row-major as `out x in`.
#[derive(Debug, Clone)]
struct Dense {
    fan_in: usize,
    fan_out: usize,
    weights: Vec<f64>,
    bias: Vec<f64>,
    weight_grad: Vec<f64>,
    bias_grad: Vec<f64>,
}

impl Dense {
    fn new(fan_in: usize, fan_out: usize, rng: &mut ChaCha8Rng) -> Self {
        let bound = 1.0 / (fan_in.max(1) as f64).sqrt();
        let weights = (0..fan_in * fan_out)
            .map(|_| rng.gen_range(-bound..=bound))
            .collect();
        let bias = (0..fan_out).map(|_| rng.gen_range(-bound..=bound)).collect();
        Self {
            fan_in,
            fan_out,
            weights,
            bias,
            weight_grad: vec![0.0; fan_in * fan_out],
            bias_grad: vec![0.0; fan_out],
        }
    }

    fn forward(&self, inputs: &[Vec<f64>]) -> Vec<Vec<f64>> {
        inputs
            .iter()
            .map(|x| {
                (0..self.fan_out)
                    .map(|o| {
                        let row = &self.weights[o * self.fan_in..(o + 1) * self.fan_in];
                        self.bias[o] + row.iter().zip(x).map(|(w, v)| w * v).sum::<f64>()
                    })
                    .collect()
            })
            .collect()
    }

    fn slots(&mut self) -> [ParamSlot<'_>; 2] {
        [
            ParamSlot {
                value: &mut self.weights,
                grad: &mut self.weight_grad,
            },
            ParamSlot {
                value: &mut self.bias,
                grad: &mut self.bias_grad,
            },
        ]
    }

    /// Accumulate gradients and return the gradient with respect to the inputs.
    fn backward(&mut self, inputs: &[Vec<f64>], grad_out: &[Vec<f64>]) -> Vec<Vec<f64>> {
        let mut grad_in = vec![vec![0.0; self.fan_in]; inputs.len()];
        for ((x, g), gi) in inputs.iter().zip(grad_out).zip(grad_in.iter_mut()) {
            for o in 0..self.fan_out {
                if g[o] == 0.0 {
                    continue;
                }
                self.bias_grad[o] += g[o];
                let offset = o * self.fan_in;
                for i in 0..self.fan_in {
                    self.weight_grad[offset + i] += g[o] * x[i];
                    gi[i] += g[o] * self.weights[offset + i];
                }
            }
        }
        grad_in
    }
}

/// Layer inputs and pre-activations from the last training forward pass.
#[derive(Debug, Clone, Default)]
struct MlpCache {
    inputs: Vec<Vec<Vec<f64>>>,
    pre_activations: Vec<Vec<Vec<f64>>>,
}

/// Stack of dense layers with ReLU between them.
#[derive(Debug, Clone)]
pub struct Mlp {
    layers: Vec<Dense>,
    relu_last: bool,
    cache: MlpCache,
}

impl Mlp {
    /// `widths` lists the output width of each layer in order.
    fn new(input_dim: usize, widths: &[usize], relu_last: bool, rng: &mut ChaCha8Rng) -> Self {
        let mut layers = Vec::with_capacity(widths.len());
        let mut fan_in = input_dim;
        for &width in widths {
            layers.push(Dense::new(fan_in, width, rng));
            fan_in = width;
        }
        Self {
            layers,
            relu_last,
            cache: MlpCache::default(),
        }
    }

    fn output_dim(&self, input_dim: usize) -> usize {
        self.layers.last().map(|l| l.fan_out).unwrap_or(input_dim)
    }

    fn activates(&self, layer: usize) -> bool {
        layer + 1 < self.layers.len() || self.relu_last
    }

    fn infer(&self, inputs: &[Vec<f64>]) -> Vec<Vec<f64>> {
        let mut x = inputs.to_vec();
        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.forward(&x);
            if self.activates(i) {
                relu_in_place(&mut x);
            }
        }
        x
    }

    fn forward_train(&mut self, inputs: &[Vec<f64>]) -> Vec<Vec<f64>> {
        let mut cache = MlpCache::default();
        let mut x = inputs.to_vec();
        for (i, layer) in self.layers.iter().enumerate() {
            let z = layer.forward(&x);
            cache.inputs.push(x);
            x = z.clone();
            if self.activates(i) {
                relu_in_place(&mut x);
            }
            cache.pre_activations.push(z);
        }
        self.cache = cache;
        x
    }

    fn backward(&mut self, grad_out: Vec<Vec<f64>>) -> Vec<Vec<f64>> {
        let mut grad = grad_out;
        for i in (0..self.layers.len()).rev() {
            if self.activates(i) {
                for (g_row, z_row) in grad.iter_mut().zip(&self.cache.pre_activations[i]) {
                    for (g, z) in g_row.iter_mut().zip(z_row) {
                        if *z <= 0.0 {
                            *g = 0.0;
                        }
                    }
                }
            }
            grad = self.layers[i].backward(&self.cache.inputs[i], &grad);
        }
        grad
    }

    fn slots(&mut self) -> Vec<ParamSlot<'_>> {
        self.layers.iter_mut().flat_map(Dense::slots).collect()
    }
}

fn relu_in_place(x: &mut [Vec<f64>]) {
    for row in x {
        for v in row.iter_mut() {
            if *v < 0.0 {
                *v = 0.0;
            }
        }
    }
}

/// Representation MLP (ReLU on every layer) followed by a projection MLP to one output.
#[derive(Debug, Clone)]
pub struct MolecularModel {
    input_dim: usize,
    repr: Mlp,
    proj: Mlp,
}

impl MolecularModel {
    pub fn new(input_dim: usize, repr_hidden: &[usize], proj_hidden: &[usize], seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let repr = Mlp::new(input_dim, repr_hidden, true, &mut rng);
        let repr_dim = repr.output_dim(input_dim);
        let mut proj_widths = proj_hidden.to_vec();
        proj_widths.push(1);
        let proj = Mlp::new(repr_dim, &proj_widths, false, &mut rng);
        Self {
            input_dim,
            repr,
            proj,
        }
    }

    fn check_inputs(&self, inputs: &[Vec<f64>]) -> Result<(), TrainingError> {
        match inputs.iter().find(|row| row.len() != self.input_dim) {
            Some(row) => Err(TrainingError::ShapeMismatch {
                expected: self.input_dim,
                actual: row.len(),
            }),
            None => Ok(()),
        }
    }
}

impl Model for MolecularModel {
    fn input_dim(&self) -> usize {
        self.input_dim
    }

    fn forward(&mut self, inputs: &[Vec<f64>]) -> Result<Vec<f64>, TrainingError> {
        self.check_inputs(inputs)?;
        let hidden = self.repr.forward_train(inputs);
        let out = self.proj.forward_train(&hidden);
        Ok(out.into_iter().map(|row| row[0]).collect())
    }

    fn predict(&self, inputs: &[Vec<f64>]) -> Result<Vec<f64>, TrainingError> {
        self.check_inputs(inputs)?;
        let out = self.proj.infer(&self.repr.infer(inputs));
        Ok(out.into_iter().map(|row| row[0]).collect())
    }

    fn backward(&mut self, grad_output: &[f64]) -> Result<(), TrainingError> {
        let batch = self.proj.cache.inputs.first().map(Vec::len).unwrap_or(0);
        if grad_output.len() != batch {
            return Err(TrainingError::ShapeMismatch {
                expected: batch,
                actual: grad_output.len(),
            });
        }
        let grad = grad_output.iter().map(|g| vec![*g]).collect();
        let grad_hidden = self.proj.backward(grad);
        self.repr.backward(grad_hidden);
        Ok(())
    }

    fn parameters(&mut self) -> Vec<ParamSlot<'_>> {
        let mut slots = self.repr.slots();
        slots.extend(self.proj.slots());
        slots
    }
}
