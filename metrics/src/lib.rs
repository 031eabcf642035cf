//! Per-head evaluation of multi-output classifiers: predicted-class
//! extraction, confusion matrices, and classification reports.

use duet_helpers::Float;
use ndarray::{Array2, ArrayView2};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Errors that can occur while evaluating predictions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// Prediction and ground-truth row counts disagree.
    RowCountMismatch { predictions: usize, labels: usize },
    /// A score row has no entries to take an argmax over.
    EmptyScoreRow { row: usize },
    /// A ground-truth label is at or beyond the head's class count.
    LabelOutOfRange { label: usize, num_classes: usize },
}

impl Display for EvalError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            EvalError::RowCountMismatch {
                predictions,
                labels,
            } => write!(
                f,
                "prediction rows ({}) and label rows ({}) disagree",
                predictions, labels
            ),
            EvalError::EmptyScoreRow { row } => {
                write!(f, "score row {} is empty", row)
            }
            EvalError::LabelOutOfRange { label, num_classes } => write!(
                f,
                "ground-truth label {} is out of range for {} classes",
                label, num_classes
            ),
        }
    }
}

impl Error for EvalError {}

/// Collapse a matrix of per-class scores to predicted class indices.
///
/// The predicted class for a row is the index of its maximum score; ties
/// are broken by the lowest index.
///
/// # Errors
///
/// Returns `EvalError::EmptyScoreRow` if the matrix has rows but no columns.
pub fn predicted_classes<F: Float>(scores: ArrayView2<F>) -> Result<Vec<usize>, EvalError> {
    if scores.nrows() > 0 && scores.ncols() == 0 {
        return Err(EvalError::EmptyScoreRow { row: 0 });
    }
    let classes = scores
        .rows()
        .into_iter()
        .map(|row| {
            let mut best = 0;
            for (i, &v) in row.iter().enumerate() {
                if v > row[best] {
                    best = i;
                }
            }
            best
        })
        .collect();
    Ok(classes)
}

/// A K x K table of true-class vs predicted-class counts.
///
/// Cell (t, p) counts the samples whose true class is t and whose predicted
/// class is p, so the diagonal holds the correct predictions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfusionMatrix {
    counts: Array2<u64>,
}

impl ConfusionMatrix {
    /// Build the matrix by counting aligned (true, predicted) pairs.
    ///
    /// # Errors
    ///
    /// Returns `EvalError::RowCountMismatch` if the sequences differ in
    /// length, and `EvalError::LabelOutOfRange` if any entry is at or beyond
    /// `num_classes`.
    pub fn from_pairs(
        truth: &[usize],
        predicted: &[usize],
        num_classes: usize,
    ) -> Result<Self, EvalError> {
        if truth.len() != predicted.len() {
            return Err(EvalError::RowCountMismatch {
                predictions: predicted.len(),
                labels: truth.len(),
            });
        }
        let mut counts = Array2::zeros((num_classes, num_classes));
        for (&t, &p) in truth.iter().zip(predicted) {
            for &label in [t, p].iter() {
                if label >= num_classes {
                    return Err(EvalError::LabelOutOfRange { label, num_classes });
                }
            }
            counts[(t, p)] += 1;
        }
        Ok(Self { counts })
    }

    pub fn num_classes(&self) -> usize {
        self.counts.nrows()
    }

    pub fn counts(&self) -> ArrayView2<u64> {
        self.counts.view()
    }

    /// Per-class ground-truth counts (row sums).
    pub fn support(&self) -> Vec<u64> {
        self.counts
            .rows()
            .into_iter()
            .map(|row| row.sum())
            .collect()
    }

    /// Per-class predicted counts (column sums).
    pub fn predicted_counts(&self) -> Vec<u64> {
        self.counts
            .columns()
            .into_iter()
            .map(|col| col.sum())
            .collect()
    }

    /// Number of correct predictions (diagonal sum).
    pub fn trace(&self) -> u64 {
        (0..self.num_classes()).map(|i| self.counts[(i, i)]).sum()
    }

    /// Total number of counted samples.
    pub fn total(&self) -> u64 {
        self.counts.sum()
    }

    /// Fraction of correct predictions; zero for an empty matrix.
    pub fn accuracy<F: Float>(&self) -> F {
        let total = self.total();
        if total == 0 {
            return F::zero();
        }
        F::from(self.trace()).unwrap() / F::from(total).unwrap()
    }
}

impl Display for ConfusionMatrix {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let width = self
            .counts
            .iter()
            .map(|c| c.to_string().len())
            .max()
            .unwrap_or(1)
            .max(2);
        for row in self.counts.rows() {
            write!(f, "[")?;
            for (i, c) in row.iter().enumerate() {
                if i > 0 {
                    write!(f, " ")?;
                }
                write!(f, "{:>width$}", c, width = width)?;
            }
            writeln!(f, "]")?;
        }
        Ok(())
    }
}

/// Precision/recall/F1 for a single class.
///
/// A metric whose denominator is zero is reported as `None` ("undefined")
/// instead of dividing by zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassMetrics<F> {
    pub precision: Option<F>,
    pub recall: Option<F>,
    pub f1: Option<F>,
    pub support: u64,
}

/// Macro and support-weighted averages across classes.
///
/// Undefined per-class values are excluded from the macro mean; weighted
/// averages sum `metric * support` over defined classes and divide by the
/// total support.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportAverages<F> {
    pub macro_precision: Option<F>,
    pub macro_recall: Option<F>,
    pub macro_f1: Option<F>,
    pub weighted_precision: Option<F>,
    pub weighted_recall: Option<F>,
    pub weighted_f1: Option<F>,
}

/// Evaluation summary for one output head.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationReport<F: Float> {
    pub name: String,
    pub accuracy: F,
    pub log_loss: F,
    pub confusion: ConfusionMatrix,
    pub per_class: Vec<ClassMetrics<F>>,
    pub averages: ReportAverages<F>,
}

/// One head's predictions and aligned ground truth.
#[derive(Debug, Clone, Copy)]
pub struct HeadEval<'a, F: Float> {
    pub name: &'a str,
    pub scores: ArrayView2<'a, F>,
    pub truth: &'a [usize],
}

fn per_class_metrics<F: Float>(confusion: &ConfusionMatrix) -> Vec<ClassMetrics<F>> {
    let support = confusion.support();
    let predicted = confusion.predicted_counts();
    (0..confusion.num_classes())
        .map(|class| {
            let tp = confusion.counts()[(class, class)];
            let precision = ratio::<F>(tp, predicted[class]);
            let recall = ratio::<F>(tp, support[class]);
            let f1 = match (precision, recall) {
                (Some(p), Some(r)) if p + r > F::zero() => {
                    Some(F::from(2.0).unwrap() * p * r / (p + r))
                }
                _ => None,
            };
            ClassMetrics {
                precision,
                recall,
                f1,
                support: support[class],
            }
        })
        .collect()
}

fn ratio<F: Float>(numerator: u64, denominator: u64) -> Option<F> {
    if denominator == 0 {
        None
    } else {
        Some(F::from(numerator).unwrap() / F::from(denominator).unwrap())
    }
}

fn averages<F: Float>(per_class: &[ClassMetrics<F>]) -> ReportAverages<F> {
    let total_support: u64 = per_class.iter().map(|m| m.support).sum();
    let macro_mean = |select: fn(&ClassMetrics<F>) -> Option<F>| {
        let defined: Vec<F> = per_class.iter().filter_map(select).collect();
        if defined.is_empty() {
            None
        } else {
            Some(defined.iter().copied().sum::<F>() / F::from(defined.len()).unwrap())
        }
    };
    let weighted_mean = |select: fn(&ClassMetrics<F>) -> Option<F>| {
        if total_support == 0 {
            return None;
        }
        let weighted: F = per_class
            .iter()
            .filter_map(|m| select(m).map(|v| v * F::from(m.support).unwrap()))
            .sum();
        Some(weighted / F::from(total_support).unwrap())
    };
    ReportAverages {
        macro_precision: macro_mean(|m| m.precision),
        macro_recall: macro_mean(|m| m.recall),
        macro_f1: macro_mean(|m| m.f1),
        weighted_precision: weighted_mean(|m| m.precision),
        weighted_recall: weighted_mean(|m| m.recall),
        weighted_f1: weighted_mean(|m| m.f1),
    }
}

fn mean_log_loss<F: Float>(scores: ArrayView2<F>, truth: &[usize]) -> F {
    if truth.is_empty() {
        return F::zero();
    }
    let eps = F::from(1e-12).unwrap();
    let one = F::one();
    let total: F = truth
        .iter()
        .enumerate()
        .map(|(row, &class)| {
            let p = scores[(row, class)].max(eps).min(one - eps);
            -p.ln()
        })
        .sum();
    total / F::from(truth.len()).unwrap()
}

/// Evaluate one head: scores (N x K, probability-like) against ground truth.
///
/// The class count is the score matrix's column count. The report is a pure
/// function of the inputs; evaluating the same pair twice yields an
/// identical report.
///
/// # Errors
///
/// Returns `EvalError::RowCountMismatch` if score and truth row counts
/// disagree, `EvalError::EmptyScoreRow` if score rows are empty, and
/// `EvalError::LabelOutOfRange` if a ground-truth label exceeds the class
/// count.
pub fn evaluate<F: Float>(
    name: &str,
    scores: ArrayView2<F>,
    truth: &[usize],
) -> Result<EvaluationReport<F>, EvalError> {
    if scores.nrows() != truth.len() {
        return Err(EvalError::RowCountMismatch {
            predictions: scores.nrows(),
            labels: truth.len(),
        });
    }
    let predicted = predicted_classes(scores)?;
    let confusion = ConfusionMatrix::from_pairs(truth, &predicted, scores.ncols())?;
    let per_class = per_class_metrics(&confusion);
    let averages = averages(&per_class);
    Ok(EvaluationReport {
        name: name.to_string(),
        accuracy: confusion.accuracy(),
        log_loss: mean_log_loss(scores, truth),
        confusion,
        per_class,
        averages,
    })
}

/// Evaluate several heads over the same sample set, one report per head.
///
/// All heads must describe the same number of samples; any error aborts the
/// whole evaluation and no partial result is returned.
pub fn evaluate_heads<F: Float>(
    heads: &[HeadEval<'_, F>],
) -> Result<Vec<EvaluationReport<F>>, EvalError> {
    if let Some(first) = heads.first() {
        for head in heads {
            if head.scores.nrows() != first.scores.nrows() {
                return Err(EvalError::RowCountMismatch {
                    predictions: head.scores.nrows(),
                    labels: first.scores.nrows(),
                });
            }
        }
    }
    heads
        .iter()
        .map(|head| evaluate(head.name, head.scores, head.truth))
        .collect()
}

fn fmt_metric<F: Float>(value: Option<F>) -> String {
    match value {
        Some(v) => format!("{:>9.4}", v),
        None => format!("{:>9}", "undefined"),
    }
}

impl<F: Float> Display for EvaluationReport<F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "head '{}': accuracy {:.4}, log loss {:.4}, {} samples",
            self.name,
            self.accuracy,
            self.log_loss,
            self.confusion.total()
        )?;
        writeln!(
            f,
            "{:>12} {:>9} {:>9} {:>9} {:>9}",
            "class", "precision", "recall", "f1-score", "support"
        )?;
        for (class, m) in self.per_class.iter().enumerate() {
            writeln!(
                f,
                "{:>12} {} {} {} {:>9}",
                class,
                fmt_metric(m.precision),
                fmt_metric(m.recall),
                fmt_metric(m.f1),
                m.support
            )?;
        }
        writeln!(
            f,
            "{:>12} {} {} {} {:>9}",
            "macro avg",
            fmt_metric(self.averages.macro_precision),
            fmt_metric(self.averages.macro_recall),
            fmt_metric(self.averages.macro_f1),
            self.confusion.total()
        )?;
        writeln!(
            f,
            "{:>12} {} {} {} {:>9}",
            "weighted avg",
            fmt_metric(self.averages.weighted_precision),
            fmt_metric(self.averages.weighted_recall),
            fmt_metric(self.averages.weighted_f1),
            self.confusion.total()
        )?;
        writeln!(f, "confusion matrix (rows: true, cols: predicted)")?;
        write!(f, "{}", self.confusion)
    }
}
