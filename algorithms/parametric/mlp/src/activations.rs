use duet_helpers::Float;
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Element-wise activation functions for trunk layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    ReLU,
    Sigmoid,
    Tanh,
    Linear,
}

impl Activation {
    pub fn apply<F: Float>(self, x: F) -> F {
        match self {
            Activation::ReLU => x.max(F::zero()),
            Activation::Sigmoid => sigmoid(x),
            Activation::Tanh => x.tanh(),
            Activation::Linear => x,
        }
    }

    pub fn derivative<F: Float>(self, x: F) -> F {
        match self {
            Activation::ReLU => {
                if x > F::zero() {
                    F::one()
                } else {
                    F::zero()
                }
            }
            Activation::Sigmoid => {
                let s = sigmoid(x);
                s * (F::one() - s)
            }
            Activation::Tanh => {
                let t = x.tanh();
                F::one() - t * t
            }
            Activation::Linear => F::one(),
        }
    }
}

/// Activations applied to a whole head output vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputActivation {
    /// Normalized distribution over the head's classes.
    Softmax,
    /// Independent per-unit probabilities.
    Sigmoid,
}

impl OutputActivation {
    pub fn apply<F: Float>(self, logits: &Array1<F>) -> Array1<F> {
        match self {
            OutputActivation::Softmax => softmax(logits),
            OutputActivation::Sigmoid => logits.mapv(sigmoid),
        }
    }
}

fn sigmoid<F: Float>(x: F) -> F {
    F::one() / (F::one() + (-x).exp())
}

/// Numerically stable softmax: shift by the row maximum before exponentiating.
fn softmax<F: Float>(logits: &Array1<F>) -> Array1<F> {
    let max = logits.iter().cloned().fold(F::neg_infinity(), F::max);
    let exps = logits.mapv(|v| (v - max).exp());
    let sum = exps.sum();
    exps / sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_relu() {
        assert_eq!(Activation::ReLU.apply(-1.5f64), 0.0);
        assert_eq!(Activation::ReLU.apply(2.0f64), 2.0);
        assert_eq!(Activation::ReLU.derivative(-1.0f64), 0.0);
        assert_eq!(Activation::ReLU.derivative(1.0f64), 1.0);
    }

    #[test]
    fn test_sigmoid_midpoint() {
        assert_abs_diff_eq!(Activation::Sigmoid.apply(0.0f64), 0.5);
        assert_abs_diff_eq!(Activation::Sigmoid.derivative(0.0f64), 0.25);
    }

    #[test]
    fn test_softmax_normalizes() {
        let out = OutputActivation::Softmax.apply(&array![1.0f64, 2.0, 3.0]);
        assert_abs_diff_eq!(out.sum(), 1.0, epsilon = 1e-12);
        assert!(out[2] > out[1] && out[1] > out[0]);
    }

    #[test]
    fn test_softmax_is_shift_stable() {
        let small = OutputActivation::Softmax.apply(&array![1.0f64, 2.0]);
        let large = OutputActivation::Softmax.apply(&array![1001.0f64, 1002.0]);
        assert_abs_diff_eq!(small[0], large[0], epsilon = 1e-12);
        assert!(large.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn test_output_sigmoid_is_element_wise() {
        let out = OutputActivation::Sigmoid.apply(&array![0.0f64, 0.0]);
        assert_abs_diff_eq!(out[0], 0.5);
        assert_abs_diff_eq!(out[1], 0.5);
    }
}
