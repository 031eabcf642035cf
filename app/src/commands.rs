use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use duet::metrics::{evaluate_heads, HeadEval};
use duet::mlp::{Activation, HeadSpec, MlpBuilder, Model, MultiHeadMlp, TrainingConfig};
use duet::mnist_idx::Mnist;
use duet::{one_hot, parity_classes, DIGIT_CLASSES, PARITY_CLASSES};
use ndarray::{Array2, ArrayView2};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "duet-train",
    about = "Train and evaluate a two-headed digit/parity classifier"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model and report per-head test metrics
    Train(TrainArgs),
    /// Evaluate a saved model on the test partition
    Eval(EvalArgs),
}

#[derive(Args)]
struct DataArgs {
    /// Directory holding the four gzipped IDX files
    #[arg(long, conflicts_with = "synthetic")]
    data_dir: Option<PathBuf>,

    /// Use a small synthetic dataset instead of files on disk
    #[arg(long)]
    synthetic: bool,

    /// Seed for the synthetic dataset
    #[arg(long, default_value_t = 42)]
    data_seed: u64,
}

#[derive(Args)]
struct TrainArgs {
    #[command(flatten)]
    data: DataArgs,

    /// Hidden layer widths of the shared trunk
    #[arg(long, value_delimiter = ',', default_values_t = vec![128, 64])]
    hidden: Vec<usize>,

    /// Initial SGD learning rate
    #[arg(long, default_value_t = 0.05)]
    learning_rate: f64,

    /// Per-epoch learning-rate decay factor
    #[arg(long, default_value_t = 0.99)]
    decay: f64,

    /// Maximum number of training epochs
    #[arg(long, default_value_t = 30)]
    epochs: u32,

    /// Epochs without validation improvement before stopping
    #[arg(long, default_value_t = 5)]
    patience: u32,

    /// Minimum validation-loss decrease that counts as improvement
    #[arg(long, default_value_t = 1e-4)]
    min_delta: f64,

    /// Fraction of the training pool carved off for validation
    #[arg(long, default_value_t = 0.1)]
    val_fraction: f64,

    /// Seed for weight initialization and shuffling
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Save the trained model here (gzipped JSON)
    #[arg(long)]
    save: Option<PathBuf>,
}

#[derive(Args)]
struct EvalArgs {
    #[command(flatten)]
    data: DataArgs,

    /// Model file produced by `train --save`
    model: PathBuf,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args) => train(args),
            Commands::Eval(args) => eval(args),
        }
    }
}

fn load_data(args: &DataArgs) -> Result<Mnist<f64>> {
    if args.synthetic {
        Ok(Mnist::synthetic(500, 100, args.data_seed))
    } else if let Some(dir) = &args.data_dir {
        Mnist::load(dir).with_context(|| format!("loading dataset from {}", dir.display()))
    } else {
        bail!("pass --data-dir <DIR> or --synthetic");
    }
}

/// One-hot target matrices for both heads, in head order.
fn head_targets(digits: &[u8]) -> Result<Vec<Array2<f64>>> {
    let digit_classes: Vec<usize> = digits.iter().map(|&d| d as usize).collect();
    let digit_targets = one_hot(&digit_classes, DIGIT_CLASSES)?;
    let parity_targets = one_hot(&parity_classes(digits), PARITY_CLASSES)?;
    Ok(vec![digit_targets, parity_targets])
}

fn train(args: TrainArgs) -> Result<()> {
    let data = load_data(&args.data)?;
    let split = data.split_validation(args.val_fraction)?;

    let mut builder =
        MlpBuilder::new(split.train_features.ncols()).activation(Activation::ReLU);
    for &units in &args.hidden {
        builder = builder.hidden(units);
    }
    let mut model: MultiHeadMlp<f64> = builder
        .head(HeadSpec::softmax("digit", DIGIT_CLASSES))
        .head(HeadSpec::sigmoid("parity", PARITY_CLASSES))
        .build(args.seed)?;
    println!("{}", model);
    println!(
        "training on {} samples, validating on {}",
        split.train_features.nrows(),
        split.val_features.nrows()
    );

    let train_targets = head_targets(&split.train_labels)?;
    let val_targets = head_targets(&split.val_labels)?;
    let config = TrainingConfig {
        learning_rate: args.learning_rate,
        decay: args.decay,
        epochs: args.epochs,
        patience: args.patience,
        min_delta: args.min_delta,
        restore_best_weights: true,
        seed: args.seed,
    };
    let result = model.fit(
        split.train_features.view(),
        &train_targets,
        split.val_features.view(),
        &val_targets,
        &config,
    )?;
    println!(
        "finished after {} epochs (best epoch {}, val loss {:.6}{})",
        result.history.len(),
        result.best_epoch + 1,
        result.best_val_loss,
        if result.stopped_early {
            ", stopped early"
        } else {
            ""
        }
    );

    report(&model, split.test_features.view(), &split.test_labels)?;

    if let Some(path) = &args.save {
        model.save(path)?;
        println!("model saved to {}", path.display());
    }
    Ok(())
}

fn eval(args: EvalArgs) -> Result<()> {
    let data = load_data(&args.data)?;
    let model: MultiHeadMlp<f64> = MultiHeadMlp::load(&args.model)
        .with_context(|| format!("loading model from {}", args.model.display()))?;
    report(&model, data.test_features.view(), &data.test_labels)
}

/// Run inference and print one classification report per head.
fn report(model: &MultiHeadMlp<f64>, features: ArrayView2<f64>, digits: &[u8]) -> Result<()> {
    let outputs = model.predict(features)?;
    let digit_truth: Vec<usize> = digits.iter().map(|&d| d as usize).collect();
    let parity_truth = parity_classes(digits);
    let reports = evaluate_heads(&[
        HeadEval {
            name: "digit",
            scores: outputs[0].view(),
            truth: &digit_truth,
        },
        HeadEval {
            name: "parity",
            scores: outputs[1].view(),
            truth: &parity_truth,
        },
    ])?;
    for report in &reports {
        println!("\n{}", report);
    }
    Ok(())
}
