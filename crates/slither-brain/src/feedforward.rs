//! Fixed-topology feedforward brain evolved by weight perturbation.

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use slither_core::{INPUT_SIZE, Network, OUTPUT_SIZE};

const HIDDEN_SIZE: usize = 16;

/// One dense layer: `outputs x inputs` weights plus per-output biases.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Layer {
    inputs: usize,
    outputs: usize,
    weights: Vec<f32>,
    biases: Vec<f32>,
}

impl Layer {
    fn random(inputs: usize, outputs: usize, rng: &mut dyn RngCore) -> Self {
        let mut weights = Vec::with_capacity(inputs * outputs);
        for _ in 0..inputs * outputs {
            weights.push(rng.random_range(-1.0..1.0));
        }
        let mut biases = Vec::with_capacity(outputs);
        for _ in 0..outputs {
            biases.push(rng.random_range(-1.0..1.0));
        }
        Self {
            inputs,
            outputs,
            weights,
            biases,
        }
    }

    fn forward(&self, input: &[f32], output: &mut Vec<f32>) {
        output.clear();
        for o in 0..self.outputs {
            let row = &self.weights[o * self.inputs..(o + 1) * self.inputs];
            let mut acc = self.biases[o];
            for (weight, value) in row.iter().zip(input) {
                acc += weight * value;
            }
            output.push(logistic(acc));
        }
    }
}

fn logistic(value: f32) -> f32 {
    1.0 / (1.0 + (-value).exp())
}

fn gaussian(rng: &mut dyn RngCore) -> f32 {
    const TWO_PI: f32 = std::f32::consts::TAU;
    let u1 = (rng.random::<f32>()).clamp(f32::MIN_POSITIVE, 1.0);
    let u2 = rng.random::<f32>();
    (-2.0 * u1.ln()).sqrt() * (TWO_PI * u2).cos()
}

/// Dense 8-16-4 network with logistic activations throughout.
///
/// Raw board coordinates go in unnormalized; the sign structure of the food
/// offsets carries enough signal for evolution to latch onto.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedForwardBrain {
    layers: Vec<Layer>,
    #[serde(skip)]
    scratch: Vec<f32>,
}

impl FeedForwardBrain {
    /// Static identifier used in logs and summaries.
    pub const KIND: &'static str = "feedforward.evolved";

    /// Construct a randomly initialized brain.
    #[must_use]
    pub fn random(rng: &mut dyn RngCore) -> Self {
        Self {
            layers: vec![
                Layer::random(INPUT_SIZE, HIDDEN_SIZE, rng),
                Layer::random(HIDDEN_SIZE, OUTPUT_SIZE, rng),
            ],
            scratch: Vec::new(),
        }
    }

    /// Perturb each weight and bias with probability `rate` by gaussian noise
    /// of standard deviation `scale`.
    pub fn mutate(&mut self, rng: &mut dyn RngCore, rate: f32, scale: f32) {
        let sigma = scale.max(1e-5);
        for layer in &mut self.layers {
            for weight in &mut layer.weights {
                if rng.random::<f32>() < rate {
                    *weight += gaussian(rng) * sigma;
                }
            }
            for bias in &mut layer.biases {
                if rng.random::<f32>() < rate {
                    *bias += gaussian(rng) * sigma;
                }
            }
        }
    }

    /// Uniform per-parameter crossover of two parents.
    #[must_use]
    pub fn crossover(&self, other: &Self, rng: &mut dyn RngCore) -> Self {
        let mut child = self.clone();
        for (child_layer, other_layer) in child.layers.iter_mut().zip(&other.layers) {
            for (weight, other_weight) in
                child_layer.weights.iter_mut().zip(&other_layer.weights)
            {
                if rng.random::<f32>() < 0.5 {
                    *weight = *other_weight;
                }
            }
            for (bias, other_bias) in child_layer.biases.iter_mut().zip(&other_layer.biases) {
                if rng.random::<f32>() < 0.5 {
                    *bias = *other_bias;
                }
            }
        }
        child
    }

    fn evaluate(&mut self, inputs: &[f32; INPUT_SIZE]) -> [f32; OUTPUT_SIZE] {
        let mut current: Vec<f32> = inputs.to_vec();
        for layer in &self.layers {
            layer.forward(&current, &mut self.scratch);
            std::mem::swap(&mut current, &mut self.scratch);
        }
        let mut outputs = [0.0; OUTPUT_SIZE];
        for (slot, value) in outputs.iter_mut().zip(&current) {
            *slot = *value;
        }
        outputs
    }
}

impl Network for FeedForwardBrain {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn activate(&mut self, inputs: &[f32; INPUT_SIZE]) -> [f32; OUTPUT_SIZE] {
        self.evaluate(inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    #[test]
    fn random_brain_has_expected_shape() {
        let mut rng = SmallRng::seed_from_u64(0xDEADBEEF);
        let brain = FeedForwardBrain::random(&mut rng);
        assert_eq!(brain.layers.len(), 2);
        assert_eq!(brain.layers[0].weights.len(), INPUT_SIZE * HIDDEN_SIZE);
        assert_eq!(brain.layers[1].weights.len(), HIDDEN_SIZE * OUTPUT_SIZE);
        assert_eq!(brain.layers[1].biases.len(), OUTPUT_SIZE);
    }

    #[test]
    fn activation_is_bounded_and_deterministic() {
        let mut rng = SmallRng::seed_from_u64(123);
        let mut brain = FeedForwardBrain::random(&mut rng);
        let inputs = [300.0, 300.0, 30.0, -60.0, 300.0, 300.0, 15.0, 300.0];
        let first = brain.activate(&inputs);
        let second = brain.activate(&inputs);
        assert_eq!(first, second);
        assert!(first.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn mutation_with_full_rate_changes_weights() {
        let mut rng = SmallRng::seed_from_u64(456);
        let mut brain = FeedForwardBrain::random(&mut rng);
        let original = brain.clone();
        brain.mutate(&mut rng, 1.0, 0.5);
        assert_ne!(brain, original);
    }

    #[test]
    fn zero_rate_mutation_is_identity() {
        let mut rng = SmallRng::seed_from_u64(9);
        let mut brain = FeedForwardBrain::random(&mut rng);
        let original = brain.clone();
        brain.mutate(&mut rng, 0.0, 0.5);
        assert_eq!(brain, original);
    }

    #[test]
    fn crossover_takes_parameters_from_both_parents() {
        let mut rng = SmallRng::seed_from_u64(789);
        let parent_a = FeedForwardBrain::random(&mut rng);
        let parent_b = FeedForwardBrain::random(&mut rng);
        let child = parent_a.crossover(&parent_b, &mut rng);
        let from_a = child.layers[0]
            .weights
            .iter()
            .zip(&parent_a.layers[0].weights)
            .filter(|(c, p)| c == p)
            .count();
        let from_b = child.layers[0]
            .weights
            .iter()
            .zip(&parent_b.layers[0].weights)
            .filter(|(c, p)| c == p)
            .count();
        assert!(from_a > 0, "child must inherit from the first parent");
        assert!(from_b > 0, "child must inherit from the second parent");
    }
}
