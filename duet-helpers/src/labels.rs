use crate::Float;
use ndarray::Array2;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Errors that can occur when encoding labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelError {
    /// A class index was at or beyond the declared class count.
    OutOfRange { label: usize, num_classes: usize },
}

impl Display for LabelError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LabelError::OutOfRange { label, num_classes } => write!(
                f,
                "label {} is out of range for {} classes",
                label, num_classes
            ),
        }
    }
}

impl Error for LabelError {}

/// Parity of a digit label, derived as `digit % 2 == 0`.
///
/// The class indices match the usual integer encoding of the predicate:
/// odd maps to 0 and even maps to 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Parity {
    Odd,
    Even,
}

impl Parity {
    /// Derive the parity of a single digit. Pure and total.
    pub fn from_digit(digit: u8) -> Self {
        if digit % 2 == 0 {
            Parity::Even
        } else {
            Parity::Odd
        }
    }

    pub fn is_even(self) -> bool {
        matches!(self, Parity::Even)
    }

    /// Class index used by the parity head: odd = 0, even = 1.
    pub fn class_index(self) -> usize {
        match self {
            Parity::Odd => 0,
            Parity::Even => 1,
        }
    }
}

impl Display for Parity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Parity::Odd => write!(f, "odd"),
            Parity::Even => write!(f, "even"),
        }
    }
}

/// Derive the parity label for every digit, preserving order.
pub fn derive_parity(digits: &[u8]) -> Vec<Parity> {
    digits.iter().map(|&d| Parity::from_digit(d)).collect()
}

/// Parity labels as class indices, ready for one-hot encoding.
pub fn parity_classes(digits: &[u8]) -> Vec<usize> {
    digits
        .iter()
        .map(|&d| Parity::from_digit(d).class_index())
        .collect()
}

/// One-hot encode class indices into an N x `num_classes` matrix.
///
/// Row i is a unit vector with a single 1 at column `labels[i]`.
///
/// # Errors
///
/// Returns `LabelError::OutOfRange` if any label is >= `num_classes`.
pub fn one_hot<F: Float>(labels: &[usize], num_classes: usize) -> Result<Array2<F>, LabelError> {
    let mut encoded = Array2::zeros((labels.len(), num_classes));
    for (row, &label) in labels.iter().enumerate() {
        if label >= num_classes {
            return Err(LabelError::OutOfRange { label, num_classes });
        }
        encoded[(row, label)] = F::one();
    }
    Ok(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argmax(row: &[f64]) -> usize {
        let mut best = 0;
        for (i, &v) in row.iter().enumerate() {
            if v > row[best] {
                best = i;
            }
        }
        best
    }

    #[test]
    fn test_parity_full_digit_range() {
        // The full specification of the derivation, not a sample.
        for digit in 0u8..=9 {
            let parity = Parity::from_digit(digit);
            assert_eq!(parity.is_even(), digit % 2 == 0, "digit {}", digit);
        }
    }

    #[test]
    fn test_parity_class_indices() {
        assert_eq!(Parity::from_digit(4).class_index(), 1);
        assert_eq!(Parity::from_digit(7).class_index(), 0);
        assert_eq!(parity_classes(&[0, 1, 2, 3]), vec![1, 0, 1, 0]);
    }

    #[test]
    fn test_derive_parity_preserves_order_and_length() {
        let digits = [3, 8, 5, 0, 9];
        let parities = derive_parity(&digits);
        assert_eq!(parities.len(), digits.len());
        for (d, p) in digits.iter().zip(&parities) {
            assert_eq!(p.is_even(), d % 2 == 0);
        }
    }

    #[test]
    fn test_one_hot_round_trip() {
        for num_classes in 1..=10 {
            for label in 0..num_classes {
                let encoded: Array2<f64> = one_hot(&[label], num_classes).unwrap();
                let row: Vec<f64> = encoded.row(0).to_vec();
                assert_eq!(argmax(&row), label);
                assert_eq!(row.iter().sum::<f64>(), 1.0);
            }
        }
    }

    #[test]
    fn test_one_hot_last_class() {
        let encoded: Array2<f64> = one_hot(&[9], 10).unwrap();
        assert_eq!(
            encoded.row(0).to_vec(),
            vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0]
        );
    }

    #[test]
    fn test_one_hot_rejects_out_of_range() {
        let result: Result<Array2<f64>, _> = one_hot(&[10], 10);
        assert_eq!(
            result.unwrap_err(),
            LabelError::OutOfRange {
                label: 10,
                num_classes: 10
            }
        );
    }

    #[test]
    fn test_one_hot_row_invariants() {
        let labels = [2usize, 0, 1, 1];
        let encoded: Array2<f32> = one_hot(&labels, 3).unwrap();
        assert_eq!(encoded.dim(), (4, 3));
        for (i, row) in encoded.rows().into_iter().enumerate() {
            assert_eq!(row.sum(), 1.0);
            assert_eq!(row[labels[i]], 1.0);
        }
    }
}
