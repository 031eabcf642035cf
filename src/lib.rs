//! Two-headed digit/parity classification over MNIST-style data.
//!
//! Re-exports the workspace crates behind one front door:
//!
//! - [`duet_helpers`]: the `Float` trait, parity derivation, one-hot encoding
//! - [`mlp`]: shared-trunk multi-head perceptron with early stopping
//! - [`metrics`]: confusion matrices and per-head classification reports
//! - [`mnist_idx`]: gzipped IDX loading, normalization, validation split

pub use duet_helpers::{
    derive_parity, one_hot, parity_classes, Float, LabelError, Parity, DIGIT_CLASSES,
    PARITY_CLASSES,
};

pub use metrics;
pub use mlp;
pub use mnist_idx;
