use crate::activations::Activation;
use duet_helpers::Float;
use ndarray::{Array1, Array2, ArrayView1};
use rand::Rng;

/// A fully-connected layer computing `z = W·x + b`, `a = act(z)`.
///
/// Weights are stored output-major (`output_size` x `input_size`).
#[derive(Debug, Clone)]
pub struct DenseLayer<F: Float> {
    pub weights: Array2<F>,
    pub bias: Array1<F>,
    pub activation: Activation,
}

impl<F: Float> DenseLayer<F> {
    /// He-uniform initialization (`U(-sqrt(6/fan_in), sqrt(6/fan_in))`) with
    /// a small positive bias, drawn from the supplied RNG.
    pub fn new<R: Rng>(
        input_size: usize,
        output_size: usize,
        activation: Activation,
        rng: &mut R,
    ) -> Self {
        let limit = (F::from(6.0).unwrap() / F::from(input_size).unwrap()).sqrt();
        let weights =
            Array2::from_shape_fn((output_size, input_size), |_| rng.random_range(-limit..limit));
        let bias = Array1::from_elem(output_size, F::from(0.01).unwrap());
        Self {
            weights,
            bias,
            activation,
        }
    }

    pub fn input_size(&self) -> usize {
        self.weights.ncols()
    }

    pub fn output_size(&self) -> usize {
        self.weights.nrows()
    }

    /// Forward pass returning pre-activations and activations.
    pub fn forward(&self, input: ArrayView1<F>) -> (Array1<F>, Array1<F>) {
        let z = self.weights.dot(&input) + &self.bias;
        let a = z.mapv(|v| self.activation.apply(v));
        (z, a)
    }

    /// Propagate the pre-activation gradient to the previous layer: `W^T·dz`.
    pub fn backpropagate(&self, dz: &Array1<F>) -> Array1<F> {
        self.weights.t().dot(dz)
    }

    /// SGD step: `W -= lr * dz ⊗ input`, `b -= lr * dz`.
    pub fn update(&mut self, input: ArrayView1<F>, dz: &Array1<F>, lr: F) {
        self.bias.scaled_add(-lr, dz);
        for (mut row, &d) in self.weights.rows_mut().into_iter().zip(dz.iter()) {
            row.scaled_add(-lr * d, &input);
        }
    }
}
