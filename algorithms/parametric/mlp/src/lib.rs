//! Feed-forward network with a shared dense trunk and independent output
//! heads, trained by per-sample SGD with validation-based early stopping.

use duet_helpers::Float;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

mod activations;
mod layer;

pub use activations::{Activation, OutputActivation};
pub use layer::DenseLayer;

/// Errors that can occur while building, training, or persisting a model.
#[derive(Debug, Clone, PartialEq)]
pub enum MlpError {
    /// A training or evaluation set has no samples.
    EmptyDataSet,
    /// The model was configured without any output head.
    NoHeads,
    /// A feature or target dimension disagrees with the model.
    MismatchedDimensions { expected: usize, actual: usize },
    /// Invalid hyperparameters or head configuration.
    InvalidConfig(String),
    /// Failure reading or writing a model file.
    Io(String),
    /// A model file could not be encoded or decoded.
    Format(String),
}

impl Display for MlpError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            MlpError::EmptyDataSet => write!(f, "data set is empty"),
            MlpError::NoHeads => write!(f, "model has no output heads"),
            MlpError::MismatchedDimensions { expected, actual } => {
                write!(f, "dimension mismatch: expected {}, got {}", expected, actual)
            }
            MlpError::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
            MlpError::Io(msg) => write!(f, "io error: {}", msg),
            MlpError::Format(msg) => write!(f, "model format error: {}", msg),
        }
    }
}

impl Error for MlpError {}

impl From<std::io::Error> for MlpError {
    fn from(err: std::io::Error) -> Self {
        MlpError::Io(err.to_string())
    }
}

/// Per-head training losses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Loss {
    /// `-Σ t·ln(p)` against a softmax distribution.
    CategoricalCrossentropy,
    /// Mean of `-(t·ln(p) + (1-t)·ln(1-p))` over independent sigmoid units.
    BinaryCrossentropy,
}

impl Loss {
    fn compute<F: Float>(self, predicted: &Array1<F>, target: ArrayView1<F>) -> F {
        let eps = F::from(1e-12).unwrap();
        let one = F::one();
        match self {
            Loss::CategoricalCrossentropy => predicted
                .iter()
                .zip(target.iter())
                .map(|(&p, &t)| -t * p.max(eps).min(one - eps).ln())
                .sum(),
            Loss::BinaryCrossentropy => {
                let total: F = predicted
                    .iter()
                    .zip(target.iter())
                    .map(|(&p, &t)| {
                        let p = p.max(eps).min(one - eps);
                        -(t * p.ln() + (one - t) * (one - p).ln())
                    })
                    .sum();
                total / F::from(predicted.len()).unwrap()
            }
        }
    }

    /// Gradient of the loss with respect to the head's pre-activations.
    ///
    /// Both canonical pairings (softmax with categorical cross-entropy,
    /// sigmoid with binary cross-entropy) reduce to `predicted - target`,
    /// up to the mean normalization of the binary loss.
    fn output_delta<F: Float>(self, predicted: &Array1<F>, target: ArrayView1<F>) -> Array1<F> {
        let diff: Array1<F> = predicted
            .iter()
            .zip(target.iter())
            .map(|(&p, &t)| p - t)
            .collect();
        match self {
            Loss::CategoricalCrossentropy => diff,
            Loss::BinaryCrossentropy => {
                let n = F::from(predicted.len()).unwrap();
                diff.mapv(|d| d / n)
            }
        }
    }
}

/// Configuration of one output head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadSpec {
    pub name: String,
    pub units: usize,
    pub activation: OutputActivation,
    pub loss: Loss,
}

impl HeadSpec {
    /// A softmax head trained with categorical cross-entropy.
    pub fn softmax(name: &str, units: usize) -> Self {
        Self {
            name: name.to_string(),
            units,
            activation: OutputActivation::Softmax,
            loss: Loss::CategoricalCrossentropy,
        }
    }

    /// A sigmoid head trained with binary cross-entropy.
    pub fn sigmoid(name: &str, units: usize) -> Self {
        Self {
            name: name.to_string(),
            units,
            activation: OutputActivation::Sigmoid,
            loss: Loss::BinaryCrossentropy,
        }
    }

    fn validate(&self) -> Result<(), MlpError> {
        if self.units == 0 {
            return Err(MlpError::InvalidConfig(format!(
                "head '{}' has zero units",
                self.name
            )));
        }
        let paired = matches!(
            (self.activation, self.loss),
            (OutputActivation::Softmax, Loss::CategoricalCrossentropy)
                | (OutputActivation::Sigmoid, Loss::BinaryCrossentropy)
        );
        if !paired {
            return Err(MlpError::InvalidConfig(format!(
                "head '{}' pairs {:?} with {:?}",
                self.name, self.activation, self.loss
            )));
        }
        Ok(())
    }
}

/// The forward contract shared by every model representation: one
/// probability matrix per head, in head order.
pub trait Model<F: Float> {
    fn predict(&self, features: ArrayView2<F>) -> Result<Vec<Array2<F>>, MlpError>;
    fn head_names(&self) -> Vec<&str>;
}

#[derive(Debug, Clone)]
struct Head<F: Float> {
    spec: HeadSpec,
    layer: DenseLayer<F>,
}

/// A multi-layer perceptron with a shared trunk and independent output
/// heads.
#[derive(Debug, Clone)]
pub struct MultiHeadMlp<F: Float> {
    trunk: Vec<DenseLayer<F>>,
    heads: Vec<Head<F>>,
    input_size: usize,
}

/// Declarative construction of a `MultiHeadMlp`; `build` hands the layer
/// graph to the same representation the direct constructor produces.
#[derive(Debug, Clone)]
pub struct MlpBuilder {
    input_size: usize,
    hidden: Vec<usize>,
    activation: Activation,
    heads: Vec<HeadSpec>,
}

impl MlpBuilder {
    pub fn new(input_size: usize) -> Self {
        Self {
            input_size,
            hidden: Vec::new(),
            activation: Activation::ReLU,
            heads: Vec::new(),
        }
    }

    /// Append a hidden trunk layer.
    pub fn hidden(mut self, units: usize) -> Self {
        self.hidden.push(units);
        self
    }

    /// Activation used by every trunk layer.
    pub fn activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    /// Append an output head.
    pub fn head(mut self, spec: HeadSpec) -> Self {
        self.heads.push(spec);
        self
    }

    pub fn build<F: Float>(self, seed: u64) -> Result<MultiHeadMlp<F>, MlpError> {
        MultiHeadMlp::new(self.input_size, &self.hidden, self.activation, self.heads, seed)
    }
}

/// Hyperparameters for `MultiHeadMlp::fit`.
#[derive(Debug, Clone)]
pub struct TrainingConfig<F: Float> {
    /// Initial SGD step size.
    pub learning_rate: F,
    /// Multiplicative learning-rate decay applied after each epoch.
    pub decay: F,
    /// Maximum number of passes over the training data.
    pub epochs: u32,
    /// Consecutive epochs without validation improvement before stopping.
    pub patience: u32,
    /// Minimum decrease of the validation loss that counts as improvement.
    pub min_delta: F,
    /// Restore the parameters of the best-observed epoch after training.
    pub restore_best_weights: bool,
    /// Seed for weight shuffling order; initialization has its own seed.
    pub seed: u64,
}

impl<F: Float> Default for TrainingConfig<F> {
    fn default() -> Self {
        Self {
            learning_rate: F::from(0.05).unwrap(),
            decay: F::from(0.99).unwrap(),
            epochs: 30,
            patience: 5,
            min_delta: F::from(1e-4).unwrap(),
            restore_best_weights: true,
            seed: 42,
        }
    }
}

/// Losses recorded at the end of one epoch.
#[derive(Debug, Clone)]
pub struct EpochRecord<F> {
    pub epoch: u32,
    /// Mean composite training loss over the epoch's samples.
    pub train_loss: F,
    /// Composite validation loss (sum of per-head means).
    pub val_loss: F,
    /// Per-head mean validation losses, in head order.
    pub head_val_losses: Vec<F>,
}

/// Outcome of a training run.
#[derive(Debug, Clone)]
pub struct TrainResult<F> {
    pub history: Vec<EpochRecord<F>>,
    /// Epoch (0-based) with the lowest validation loss; ties keep the
    /// earliest epoch.
    pub best_epoch: u32,
    pub best_val_loss: F,
    pub stopped_early: bool,
}

impl<F: Float> MultiHeadMlp<F> {
    /// Create a model with the given trunk widths and output heads.
    ///
    /// All parameters are initialized from `seed`; the same seed always
    /// produces the same model.
    ///
    /// # Errors
    ///
    /// Returns `MlpError::NoHeads` without at least one head, and
    /// `MlpError::InvalidConfig` for zero-sized layers or a head whose
    /// activation and loss are not a canonical pairing.
    pub fn new(
        input_size: usize,
        hidden: &[usize],
        activation: Activation,
        heads: Vec<HeadSpec>,
        seed: u64,
    ) -> Result<Self, MlpError> {
        if input_size == 0 {
            return Err(MlpError::InvalidConfig("input size is zero".to_string()));
        }
        if heads.is_empty() {
            return Err(MlpError::NoHeads);
        }
        for spec in &heads {
            spec.validate()?;
        }
        if hidden.iter().any(|&units| units == 0) {
            return Err(MlpError::InvalidConfig(
                "hidden layer has zero units".to_string(),
            ));
        }

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let mut trunk = Vec::with_capacity(hidden.len());
        let mut prev = input_size;
        for &units in hidden {
            trunk.push(DenseLayer::new(prev, units, activation, &mut rng));
            prev = units;
        }
        let heads = heads
            .into_iter()
            .map(|spec| {
                let layer = DenseLayer::new(prev, spec.units, Activation::Linear, &mut rng);
                Head { spec, layer }
            })
            .collect();
        Ok(Self {
            trunk,
            heads,
            input_size,
        })
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn num_heads(&self) -> usize {
        self.heads.len()
    }

    /// Forward pass for a single feature vector, one output per head.
    pub fn predict_sample(&self, input: ArrayView1<F>) -> Result<Vec<Array1<F>>, MlpError> {
        if input.len() != self.input_size {
            return Err(MlpError::MismatchedDimensions {
                expected: self.input_size,
                actual: input.len(),
            });
        }
        Ok(self.forward_heads(input))
    }

    fn forward_heads(&self, input: ArrayView1<F>) -> Vec<Array1<F>> {
        let mut current = input.to_owned();
        for layer in &self.trunk {
            let (_, a) = layer.forward(current.view());
            current = a;
        }
        self.heads
            .iter()
            .map(|head| {
                let (z, _) = head.layer.forward(current.view());
                head.spec.activation.apply(&z)
            })
            .collect()
    }

    /// One SGD step on a single sample; returns its composite loss.
    fn sgd_step(&mut self, input: ArrayView1<F>, targets: &[Array2<F>], row: usize, lr: F) -> F {
        // Forward, caching pre-activations and activations for backprop.
        let mut trunk_zs: Vec<Array1<F>> = Vec::with_capacity(self.trunk.len());
        let mut trunk_activations: Vec<Array1<F>> = Vec::with_capacity(self.trunk.len() + 1);
        trunk_activations.push(input.to_owned());
        let mut current = input.to_owned();
        for layer in &self.trunk {
            let (z, a) = layer.forward(current.view());
            trunk_zs.push(z);
            trunk_activations.push(a.clone());
            current = a;
        }
        let trunk_out = current;

        // Heads: composite loss and the summed delta flowing into the trunk.
        let mut loss = F::zero();
        let mut delta: Array1<F> = Array1::zeros(trunk_out.len());
        for (head, target) in self.heads.iter_mut().zip(targets) {
            let (z, _) = head.layer.forward(trunk_out.view());
            let predicted = head.spec.activation.apply(&z);
            let t = target.row(row);
            loss += head.spec.loss.compute(&predicted, t);
            let dz = head.spec.loss.output_delta(&predicted, t);
            delta = delta + head.layer.backpropagate(&dz);
            head.layer.update(trunk_out.view(), &dz, lr);
        }

        // Trunk, output to input; delta is propagated before the update.
        for idx in (0..self.trunk.len()).rev() {
            let activation = self.trunk[idx].activation;
            let dz: Array1<F> = delta
                .iter()
                .zip(trunk_zs[idx].iter())
                .map(|(&d, &z)| d * activation.derivative(z))
                .collect();
            let next_delta = self.trunk[idx].backpropagate(&dz);
            self.trunk[idx].update(trunk_activations[idx].view(), &dz, lr);
            delta = next_delta;
        }
        loss
    }

    /// Per-head mean losses over a data set.
    fn head_losses(&self, features: ArrayView2<F>, targets: &[Array2<F>]) -> Vec<F> {
        let mut sums = vec![F::zero(); self.heads.len()];
        for (row, input) in features.rows().into_iter().enumerate() {
            for (h, predicted) in self.forward_heads(input).into_iter().enumerate() {
                sums[h] += self.heads[h].spec.loss.compute(&predicted, targets[h].row(row));
            }
        }
        let n = F::from(features.nrows()).unwrap();
        sums.into_iter().map(|s| s / n).collect()
    }

    fn check_dataset(
        &self,
        features: ArrayView2<F>,
        targets: &[Array2<F>],
    ) -> Result<(), MlpError> {
        if features.nrows() == 0 {
            return Err(MlpError::EmptyDataSet);
        }
        if features.ncols() != self.input_size {
            return Err(MlpError::MismatchedDimensions {
                expected: self.input_size,
                actual: features.ncols(),
            });
        }
        if targets.len() != self.heads.len() {
            return Err(MlpError::InvalidConfig(format!(
                "{} target sets for {} heads",
                targets.len(),
                self.heads.len()
            )));
        }
        for (head, target) in self.heads.iter().zip(targets) {
            if target.nrows() != features.nrows() {
                return Err(MlpError::MismatchedDimensions {
                    expected: features.nrows(),
                    actual: target.nrows(),
                });
            }
            if target.ncols() != head.spec.units {
                return Err(MlpError::MismatchedDimensions {
                    expected: head.spec.units,
                    actual: target.ncols(),
                });
            }
        }
        Ok(())
    }

    /// Train with per-sample SGD and early stopping on the validation loss.
    ///
    /// Targets are one-hot matrices aligned with the feature rows, one per
    /// head. Samples are revisited in a freshly shuffled order each epoch
    /// (deterministic in `config.seed`). Training stops after
    /// `config.patience` consecutive epochs without the validation loss
    /// improving by more than `config.min_delta`; the parameters of the
    /// best-observed epoch are restored unless `restore_best_weights` is
    /// off.
    pub fn fit(
        &mut self,
        features: ArrayView2<F>,
        targets: &[Array2<F>],
        val_features: ArrayView2<F>,
        val_targets: &[Array2<F>],
        config: &TrainingConfig<F>,
    ) -> Result<TrainResult<F>, MlpError> {
        self.check_dataset(features, targets)?;
        self.check_dataset(val_features, val_targets)?;
        if config.epochs == 0 {
            return Err(MlpError::InvalidConfig("epochs is zero".to_string()));
        }

        let n = features.nrows();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(config.seed);
        let mut indices: Vec<usize> = (0..n).collect();
        let mut lr = config.learning_rate;

        let mut history = Vec::new();
        let mut best_val_loss = F::infinity();
        let mut best_epoch = 0u32;
        let mut best_weights: Option<(Vec<DenseLayer<F>>, Vec<Head<F>>)> = None;
        let mut epochs_without_improvement = 0u32;
        let mut stopped_early = false;

        for epoch in 0..config.epochs {
            indices.shuffle(&mut rng);
            let mut total = F::zero();
            for &i in &indices {
                total += self.sgd_step(features.row(i), targets, i, lr);
            }
            let train_loss = total / F::from(n).unwrap();

            let head_val_losses = self.head_losses(val_features, val_targets);
            let val_loss: F = head_val_losses.iter().copied().sum();
            println!(
                "epoch {:>3}: train loss {:.6}, val loss {:.6}",
                epoch + 1,
                train_loss,
                val_loss
            );
            history.push(EpochRecord {
                epoch,
                train_loss,
                val_loss,
                head_val_losses,
            });

            if best_val_loss - val_loss > config.min_delta {
                best_val_loss = val_loss;
                best_epoch = epoch;
                epochs_without_improvement = 0;
                if config.restore_best_weights {
                    best_weights = Some((self.trunk.clone(), self.heads.clone()));
                }
            } else {
                epochs_without_improvement += 1;
                if epochs_without_improvement >= config.patience {
                    stopped_early = true;
                    break;
                }
            }
            lr = lr * config.decay;
        }

        if let Some((trunk, heads)) = best_weights {
            self.trunk = trunk;
            self.heads = heads;
        }
        Ok(TrainResult {
            history,
            best_epoch,
            best_val_loss,
            stopped_early,
        })
    }

    /// Scalar metrics over a data set, ordered as: composite loss, per-head
    /// losses, per-head accuracies.
    pub fn evaluate(
        &self,
        features: ArrayView2<F>,
        targets: &[Array2<F>],
    ) -> Result<Vec<F>, MlpError> {
        self.check_dataset(features, targets)?;
        let losses = self.head_losses(features, targets);
        let mut correct = vec![0usize; self.heads.len()];
        for (row, input) in features.rows().into_iter().enumerate() {
            for (h, predicted) in self.forward_heads(input).into_iter().enumerate() {
                if argmax(predicted.view()) == argmax(targets[h].row(row)) {
                    correct[h] += 1;
                }
            }
        }
        let n = F::from(features.nrows()).unwrap();
        let mut scalars = vec![losses.iter().copied().sum()];
        scalars.extend(losses);
        scalars.extend(correct.into_iter().map(|c| F::from(c).unwrap() / n));
        Ok(scalars)
    }

    /// Save the model as gzipped JSON.
    pub fn save(&self, path: &Path) -> Result<(), MlpError> {
        let dto = ModelDto::from_model(self);
        let json = serde_json::to_vec(&dto).map_err(|e| MlpError::Format(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(&json)?;
        encoder.finish()?;
        Ok(())
    }

    /// Load a model saved with [`MultiHeadMlp::save`].
    pub fn load(path: &Path) -> Result<Self, MlpError> {
        let file = File::open(path)?;
        let mut decoder = GzDecoder::new(file);
        let mut buf = Vec::new();
        decoder.read_to_end(&mut buf)?;
        let dto: ModelDto =
            serde_json::from_slice(&buf).map_err(|e| MlpError::Format(e.to_string()))?;
        dto.into_model()
    }
}

impl<F: Float> Model<F> for MultiHeadMlp<F> {
    fn predict(&self, features: ArrayView2<F>) -> Result<Vec<Array2<F>>, MlpError> {
        if features.ncols() != self.input_size {
            return Err(MlpError::MismatchedDimensions {
                expected: self.input_size,
                actual: features.ncols(),
            });
        }
        let mut outputs: Vec<Array2<F>> = self
            .heads
            .iter()
            .map(|head| Array2::zeros((features.nrows(), head.spec.units)))
            .collect();
        for (row, input) in features.rows().into_iter().enumerate() {
            for (h, predicted) in self.forward_heads(input).into_iter().enumerate() {
                outputs[h].row_mut(row).assign(&predicted);
            }
        }
        Ok(outputs)
    }

    fn head_names(&self) -> Vec<&str> {
        self.heads.iter().map(|head| head.spec.name.as_str()).collect()
    }
}

impl<F: Float> Display for MultiHeadMlp<F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut sizes = vec![self.input_size];
        sizes.extend(self.trunk.iter().map(|layer| layer.output_size()));
        write!(f, "MultiHeadMlp {:?} -> {{", sizes)?;
        for (i, head) in self.heads.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", head.spec.name, head.spec.units)?;
        }
        write!(f, "}}")
    }
}

fn argmax<F: Float>(row: ArrayView1<F>) -> usize {
    let mut best = 0;
    for (i, &v) in row.iter().enumerate() {
        if v > row[best] {
            best = i;
        }
    }
    best
}

// ============ Persistence DTOs ============

#[derive(Debug, Serialize, Deserialize)]
struct LayerDto {
    weights: Vec<Vec<f64>>, // [output_size][input_size]
    bias: Vec<f64>,
    activation: Activation,
}

#[derive(Debug, Serialize, Deserialize)]
struct HeadDto {
    name: String,
    units: usize,
    activation: OutputActivation,
    loss: Loss,
    layer: LayerDto,
}

#[derive(Debug, Serialize, Deserialize)]
struct ModelDto {
    input_size: usize,
    trunk: Vec<LayerDto>,
    heads: Vec<HeadDto>,
}

fn sanitize(x: f64) -> f64 {
    if x.is_finite() {
        x
    } else {
        0.0
    }
}

impl LayerDto {
    fn from_layer<F: Float>(layer: &DenseLayer<F>) -> Self {
        Self {
            weights: layer
                .weights
                .rows()
                .into_iter()
                .map(|row| {
                    row.iter()
                        .map(|&w| sanitize(w.to_f64().unwrap_or(0.0)))
                        .collect()
                })
                .collect(),
            bias: layer
                .bias
                .iter()
                .map(|&b| sanitize(b.to_f64().unwrap_or(0.0)))
                .collect(),
            activation: layer.activation,
        }
    }

    fn into_layer<F: Float>(self) -> Result<DenseLayer<F>, MlpError> {
        let rows = self.weights.len();
        let cols = self.weights.first().map_or(0, Vec::len);
        if rows == 0 || cols == 0 || self.bias.len() != rows {
            return Err(MlpError::Format("layer shape is inconsistent".to_string()));
        }
        let mut weights = Array2::zeros((rows, cols));
        for (i, row) in self.weights.iter().enumerate() {
            if row.len() != cols {
                return Err(MlpError::Format("ragged weight matrix".to_string()));
            }
            for (j, &w) in row.iter().enumerate() {
                weights[(i, j)] = F::from(w).unwrap();
            }
        }
        let bias = self.bias.iter().map(|&b| F::from(b).unwrap()).collect();
        Ok(DenseLayer {
            weights,
            bias,
            activation: self.activation,
        })
    }
}

impl ModelDto {
    fn from_model<F: Float>(model: &MultiHeadMlp<F>) -> Self {
        Self {
            input_size: model.input_size,
            trunk: model.trunk.iter().map(LayerDto::from_layer).collect(),
            heads: model
                .heads
                .iter()
                .map(|head| HeadDto {
                    name: head.spec.name.clone(),
                    units: head.spec.units,
                    activation: head.spec.activation,
                    loss: head.spec.loss,
                    layer: LayerDto::from_layer(&head.layer),
                })
                .collect(),
        }
    }

    fn into_model<F: Float>(self) -> Result<MultiHeadMlp<F>, MlpError> {
        if self.heads.is_empty() {
            return Err(MlpError::NoHeads);
        }
        let trunk = self
            .trunk
            .into_iter()
            .map(LayerDto::into_layer)
            .collect::<Result<Vec<_>, _>>()?;
        let heads = self
            .heads
            .into_iter()
            .map(|dto| {
                let spec = HeadSpec {
                    name: dto.name,
                    units: dto.units,
                    activation: dto.activation,
                    loss: dto.loss,
                };
                spec.validate()?;
                let layer = dto.layer.into_layer()?;
                if layer.output_size() != spec.units {
                    return Err(MlpError::Format(format!(
                        "head '{}' layer does not match its unit count",
                        spec.name
                    )));
                }
                Ok(Head { spec, layer })
            })
            .collect::<Result<Vec<_>, MlpError>>()?;
        Ok(MultiHeadMlp {
            trunk,
            heads,
            input_size: self.input_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Axis};

    fn two_head_model(seed: u64) -> MultiHeadMlp<f64> {
        MlpBuilder::new(2)
            .hidden(8)
            .activation(Activation::ReLU)
            .head(HeadSpec::softmax("cluster", 2))
            .head(HeadSpec::sigmoid("flag", 2))
            .build(seed)
            .unwrap()
    }

    /// Two well-separated point clouds; both heads predict the cloud.
    fn toy_dataset() -> (Array2<f64>, Vec<Array2<f64>>) {
        let mut features = Vec::new();
        let mut labels = Vec::new();
        for i in 0..20 {
            let offset = 0.01 * i as f64;
            features.push([0.1 + offset, 0.2 + offset]);
            labels.push(0usize);
            features.push([0.9 - offset, 0.8 - offset]);
            labels.push(1usize);
        }
        let n = features.len();
        let flat: Vec<f64> = features.iter().flatten().copied().collect();
        let features = Array2::from_shape_vec((n, 2), flat).unwrap();
        let onehot = duet_helpers::one_hot::<f64>(&labels, 2).unwrap();
        (features, vec![onehot.clone(), onehot])
    }

    #[test]
    fn test_builder_requires_heads() {
        let result = MlpBuilder::new(4).hidden(8).build::<f64>(0);
        assert_eq!(result.unwrap_err(), MlpError::NoHeads);
    }

    #[test]
    fn test_builder_rejects_unpaired_head() {
        let spec = HeadSpec {
            name: "bad".to_string(),
            units: 2,
            activation: OutputActivation::Softmax,
            loss: Loss::BinaryCrossentropy,
        };
        let result = MlpBuilder::new(4).head(spec).build::<f64>(0);
        assert!(matches!(result, Err(MlpError::InvalidConfig(_))));
    }

    #[test]
    fn test_builder_rejects_zero_sizes() {
        let result = MlpBuilder::new(0)
            .head(HeadSpec::softmax("digit", 10))
            .build::<f64>(0);
        assert!(matches!(result, Err(MlpError::InvalidConfig(_))));

        let result = MlpBuilder::new(4)
            .hidden(0)
            .head(HeadSpec::softmax("digit", 10))
            .build::<f64>(0);
        assert!(matches!(result, Err(MlpError::InvalidConfig(_))));
    }

    #[test]
    fn test_predict_shapes_and_distributions() {
        let model = two_head_model(3);
        let features = Array2::zeros((5, 2));
        let outputs = model.predict(features.view()).unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].dim(), (5, 2));
        assert_eq!(outputs[1].dim(), (5, 2));
        // Softmax rows are distributions.
        for row in outputs[0].axis_iter(Axis(0)) {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-9);
        }
        // Sigmoid rows are per-unit probabilities.
        assert!(outputs[1].iter().all(|&p| (0.0..=1.0).contains(&p)));
    }

    #[test]
    fn test_predict_rejects_wrong_width() {
        let model = two_head_model(3);
        let features = Array2::zeros((5, 3));
        assert_eq!(
            model.predict(features.view()).unwrap_err(),
            MlpError::MismatchedDimensions {
                expected: 2,
                actual: 3
            }
        );
    }

    #[test]
    fn test_same_seed_same_model() {
        let a = two_head_model(11);
        let b = two_head_model(11);
        let c = two_head_model(12);
        let input = array![[0.3, 0.7]];
        let ya = a.predict(input.view()).unwrap();
        let yb = b.predict(input.view()).unwrap();
        let yc = c.predict(input.view()).unwrap();
        assert_eq!(ya[0], yb[0]);
        assert_ne!(ya[0], yc[0]);
    }

    #[test]
    fn test_fit_reduces_training_loss() {
        let (features, targets) = toy_dataset();
        let mut model = two_head_model(5);
        let config = TrainingConfig {
            epochs: 40,
            patience: 40,
            learning_rate: 0.5,
            ..TrainingConfig::default()
        };
        let result = model
            .fit(
                features.view(),
                &targets,
                features.view(),
                &targets,
                &config,
            )
            .unwrap();
        let first = result.history.first().unwrap().train_loss;
        let last = result.history.last().unwrap().train_loss;
        assert!(
            last < first,
            "training loss should decrease: {} -> {}",
            first,
            last
        );
    }

    #[test]
    fn test_fit_is_seed_deterministic() {
        let (features, targets) = toy_dataset();
        let config = TrainingConfig {
            epochs: 5,
            ..TrainingConfig::default()
        };
        let mut a = two_head_model(5);
        let mut b = two_head_model(5);
        let ra = a
            .fit(features.view(), &targets, features.view(), &targets, &config)
            .unwrap();
        let rb = b
            .fit(features.view(), &targets, features.view(), &targets, &config)
            .unwrap();
        assert_eq!(ra.history.len(), rb.history.len());
        for (ea, eb) in ra.history.iter().zip(&rb.history) {
            assert_eq!(ea.train_loss, eb.train_loss);
            assert_eq!(ea.val_loss, eb.val_loss);
        }
    }

    #[test]
    fn test_early_stopping_respects_patience() {
        let (features, targets) = toy_dataset();
        let mut model = two_head_model(5);
        // A zero learning rate freezes the parameters, so the validation
        // loss never improves after the first epoch's baseline.
        let config = TrainingConfig {
            epochs: 50,
            patience: 2,
            learning_rate: 0.0,
            ..TrainingConfig::default()
        };
        let result = model
            .fit(
                features.view(),
                &targets,
                features.view(),
                &targets,
                &config,
            )
            .unwrap();
        assert!(result.stopped_early);
        assert_eq!(result.best_epoch, 0);
        // Baseline epoch plus `patience` non-improving epochs.
        assert_eq!(result.history.len(), 3);
    }

    #[test]
    fn test_restore_best_weights() {
        let (features, targets) = toy_dataset();
        let mut model = two_head_model(5);
        // An oversized learning rate makes later epochs worse; restoring
        // must bring the validation loss back to the best epoch's value.
        let config = TrainingConfig {
            epochs: 12,
            patience: 12,
            learning_rate: 8.0,
            decay: 1.0,
            restore_best_weights: true,
            ..TrainingConfig::default()
        };
        let result = model
            .fit(
                features.view(),
                &targets,
                features.view(),
                &targets,
                &config,
            )
            .unwrap();
        let scalars = model.evaluate(features.view(), &targets).unwrap();
        assert_abs_diff_eq!(scalars[0], result.best_val_loss, epsilon = 1e-9);
    }

    #[test]
    fn test_fit_rejects_misaligned_targets() {
        let (features, targets) = toy_dataset();
        let mut model = two_head_model(5);
        let config = TrainingConfig::default();

        // Too few target sets.
        let result = model.fit(
            features.view(),
            &targets[..1],
            features.view(),
            &targets,
            &config,
        );
        assert!(matches!(result, Err(MlpError::InvalidConfig(_))));

        // Wrong target width.
        let wide = vec![Array2::zeros((features.nrows(), 3)), targets[1].clone()];
        let result = model.fit(features.view(), &wide, features.view(), &targets, &config);
        assert!(matches!(
            result,
            Err(MlpError::MismatchedDimensions { .. })
        ));

        // Empty training set.
        let empty = Array2::zeros((0, 2));
        let empty_targets = vec![Array2::zeros((0, 2)), Array2::zeros((0, 2))];
        let result = model.fit(
            empty.view(),
            &empty_targets,
            features.view(),
            &targets,
            &config,
        );
        assert_eq!(result.unwrap_err(), MlpError::EmptyDataSet);
    }

    #[test]
    fn test_evaluate_scalar_ordering() {
        let (features, targets) = toy_dataset();
        let model = two_head_model(5);
        let scalars = model.evaluate(features.view(), &targets).unwrap();
        // Composite loss, two head losses, two head accuracies.
        assert_eq!(scalars.len(), 5);
        assert_abs_diff_eq!(scalars[0], scalars[1] + scalars[2], epsilon = 1e-12);
        assert!((0.0..=1.0).contains(&scalars[3]));
        assert!((0.0..=1.0).contains(&scalars[4]));
    }

    #[test]
    fn test_save_load_round_trip() {
        let (features, targets) = toy_dataset();
        let mut model = two_head_model(9);
        let config = TrainingConfig {
            epochs: 3,
            ..TrainingConfig::default()
        };
        model
            .fit(
                features.view(),
                &targets,
                features.view(),
                &targets,
                &config,
            )
            .unwrap();

        let path = std::env::temp_dir().join("duet-mlp-round-trip.json.gz");
        model.save(&path).unwrap();
        let restored: MultiHeadMlp<f64> = MultiHeadMlp::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(restored.head_names(), model.head_names());
        let before = model.predict(features.view()).unwrap();
        let after = restored.predict(features.view()).unwrap();
        for (b, a) in before.iter().zip(&after) {
            assert_eq!(b, a);
        }
    }

    #[test]
    fn test_display_lists_heads() {
        let model = two_head_model(1);
        let text = model.to_string();
        assert!(text.contains("cluster: 2"));
        assert!(text.contains("flag: 2"));
    }
}
