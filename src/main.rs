// This is a simple example showing how to use the duet library
use duet::metrics::{evaluate_heads, HeadEval};
use duet::mlp::{Activation, HeadSpec, MlpBuilder, Model, TrainingConfig};
use duet::mnist_idx::Mnist;
use duet::{one_hot, parity_classes, DIGIT_CLASSES, PARITY_CLASSES};
use ndarray::Array2;

fn main() {
    println!("duet library example");

    // A small synthetic dataset keeps the example self-contained.
    let data: Mnist<f64> = Mnist::synthetic(200, 40, 7);
    let split = data.split_validation(0.2).expect("validation split");

    let mut model = MlpBuilder::new(split.train_features.ncols())
        .hidden(32)
        .activation(Activation::ReLU)
        .head(HeadSpec::softmax("digit", DIGIT_CLASSES))
        .head(HeadSpec::sigmoid("parity", PARITY_CLASSES))
        .build(7)
        .expect("model construction");

    let train_targets = head_targets(&split.train_labels);
    let val_targets = head_targets(&split.val_labels);
    let config = TrainingConfig {
        epochs: 10,
        ..TrainingConfig::default()
    };
    model
        .fit(
            split.train_features.view(),
            &train_targets,
            split.val_features.view(),
            &val_targets,
            &config,
        )
        .expect("training");

    let outputs = model.predict(split.test_features.view()).expect("inference");
    let digit_truth: Vec<usize> = split.test_labels.iter().map(|&d| d as usize).collect();
    let parity_truth = parity_classes(&split.test_labels);
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
    ])
    .expect("evaluation");
    for report in &reports {
        println!("\n{}", report);
    }
}

fn head_targets(digits: &[u8]) -> Vec<Array2<f64>> {
    let digit_classes: Vec<usize> = digits.iter().map(|&d| d as usize).collect();
    vec![
        one_hot(&digit_classes, DIGIT_CLASSES).expect("digit targets"),
        one_hot(&parity_classes(digits), PARITY_CLASSES).expect("parity targets"),
    ]
}
