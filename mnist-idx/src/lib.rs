//! MNIST-style dataset loading: gzipped IDX parsing, feature normalization,
//! and train/validation/test partitioning.

use byteorder::{BigEndian, ReadBytesExt};
use duet_helpers::Float;
use flate2::read::GzDecoder;
use ndarray::{s, Array2};
use rand::Rng;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;

/// Image side length; features are flattened `IMAGE_SIDE * IMAGE_SIDE` rows.
pub const IMAGE_SIDE: usize = 28;
/// Length of a flattened feature vector.
pub const NUM_FEATURES: usize = IMAGE_SIDE * IMAGE_SIDE;

const LABEL_MAGIC: i32 = 2049;
const IMAGE_MAGIC: i32 = 2051;

/// Errors that can occur while loading or partitioning a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataError {
    /// Reading a file failed.
    Io(String),
    /// The file contents do not describe a valid dataset.
    Format(String),
    /// The requested validation split cannot be carved.
    InvalidSplit(String),
}

impl Display for DataError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DataError::Io(msg) => write!(f, "io error: {}", msg),
            DataError::Format(msg) => write!(f, "format error: {}", msg),
            DataError::InvalidSplit(msg) => write!(f, "invalid split: {}", msg),
        }
    }
}

impl Error for DataError {}

impl From<std::io::Error> for DataError {
    fn from(err: std::io::Error) -> Self {
        DataError::Io(err.to_string())
    }
}

/// One decoded IDX file: dimension sizes from the header plus raw payload.
#[derive(Debug)]
struct IdxFile {
    sizes: Vec<u32>,
    data: Vec<u8>,
}

fn read_idx(path: &Path) -> Result<IdxFile, DataError> {
    let file =
        File::open(path).map_err(|e| DataError::Io(format!("{}: {}", path.display(), e)))?;
    let mut gz = GzDecoder::new(file);
    let mut contents = Vec::new();
    gz.read_to_end(&mut contents)
        .map_err(|e| DataError::Io(format!("{}: {}", path.display(), e)))?;

    let mut reader = Cursor::new(&contents);
    let magic = reader.read_i32::<BigEndian>().map_err(|e| {
        DataError::Format(format!("{}: truncated header: {}", path.display(), e))
    })?;
    let dims = match magic {
        LABEL_MAGIC => 1,
        IMAGE_MAGIC => 3,
        other => {
            return Err(DataError::Format(format!(
                "{}: unexpected magic {}",
                path.display(),
                other
            )))
        }
    };
    let mut sizes = Vec::with_capacity(dims);
    for _ in 0..dims {
        let size = reader.read_u32::<BigEndian>().map_err(|e| {
            DataError::Format(format!("{}: truncated header: {}", path.display(), e))
        })?;
        sizes.push(size);
    }
    let mut data = Vec::new();
    reader
        .read_to_end(&mut data)
        .map_err(|e| DataError::Io(format!("{}: {}", path.display(), e)))?;
    Ok(IdxFile { sizes, data })
}

/// Flatten image bytes to N x `NUM_FEATURES` features rescaled to [0, 1].
fn image_features<F: Float>(idx: &IdxFile, path: &Path) -> Result<Array2<F>, DataError> {
    let &[n, rows, cols] = &idx.sizes[..] else {
        return Err(DataError::Format(format!(
            "{}: image header has {} dimensions",
            path.display(),
            idx.sizes.len()
        )));
    };
    if (rows as usize, cols as usize) != (IMAGE_SIDE, IMAGE_SIDE) {
        return Err(DataError::Format(format!(
            "{}: expected {}x{} images, got {}x{}",
            path.display(),
            IMAGE_SIDE,
            IMAGE_SIDE,
            rows,
            cols
        )));
    }
    let n = n as usize;
    if idx.data.len() != n * NUM_FEATURES {
        return Err(DataError::Format(format!(
            "{}: payload holds {} bytes for {} images",
            path.display(),
            idx.data.len(),
            n
        )));
    }
    let scale = F::from(255.0).unwrap();
    let pixels: Vec<F> = idx
        .data
        .iter()
        .map(|&b| F::from(b).unwrap() / scale)
        .collect();
    Array2::from_shape_vec((n, NUM_FEATURES), pixels)
        .map_err(|e| DataError::Format(format!("{}: {}", path.display(), e)))
}

/// Digit labels, validated to the 0-9 range.
fn digit_labels(idx: &IdxFile, path: &Path) -> Result<Vec<u8>, DataError> {
    let &[n] = &idx.sizes[..] else {
        return Err(DataError::Format(format!(
            "{}: label header has {} dimensions",
            path.display(),
            idx.sizes.len()
        )));
    };
    if idx.data.len() != n as usize {
        return Err(DataError::Format(format!(
            "{}: payload holds {} labels, header says {}",
            path.display(),
            idx.data.len(),
            n
        )));
    }
    if let Some(&bad) = idx.data.iter().find(|&&label| label > 9) {
        return Err(DataError::Format(format!(
            "{}: label {} is not a digit",
            path.display(),
            bad
        )));
    }
    Ok(idx.data.clone())
}

/// A dataset with train and test partitions.
#[derive(Debug, Clone)]
pub struct Mnist<F: Float> {
    pub train_features: Array2<F>,
    pub train_labels: Vec<u8>,
    pub test_features: Array2<F>,
    pub test_labels: Vec<u8>,
}

/// A dataset with a validation partition carved out of the training pool.
#[derive(Debug, Clone)]
pub struct Split<F: Float> {
    pub train_features: Array2<F>,
    pub train_labels: Vec<u8>,
    pub val_features: Array2<F>,
    pub val_labels: Vec<u8>,
    pub test_features: Array2<F>,
    pub test_labels: Vec<u8>,
}

impl<F: Float> Mnist<F> {
    /// Load the four standard gzipped IDX files from `dir`.
    ///
    /// # Errors
    ///
    /// Returns `DataError::Io` for unreadable files and `DataError::Format`
    /// for malformed contents, mismatched image/label counts, or labels
    /// outside the digit range.
    pub fn load(dir: &Path) -> Result<Self, DataError> {
        let (train_features, train_labels) = load_partition(
            &dir.join("train-images-idx3-ubyte.gz"),
            &dir.join("train-labels-idx1-ubyte.gz"),
        )?;
        let (test_features, test_labels) = load_partition(
            &dir.join("t10k-images-idx3-ubyte.gz"),
            &dir.join("t10k-labels-idx1-ubyte.gz"),
        )?;
        Ok(Self {
            train_features,
            train_labels,
            test_features,
            test_labels,
        })
    }

    /// Deterministic synthetic stand-in for the real dataset: each digit
    /// lights up its own band of pixels, plus seeded noise. Digits cycle
    /// 0-9 so every class is represented.
    pub fn synthetic(n_train: usize, n_test: usize, seed: u64) -> Self {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let (train_features, train_labels) = synthetic_partition(n_train, &mut rng);
        let (test_features, test_labels) = synthetic_partition(n_test, &mut rng);
        Self {
            train_features,
            train_labels,
            test_features,
            test_labels,
        }
    }

    /// Carve the validation partition from the head of the training pool,
    /// before any shuffling, so the three partitions are disjoint.
    ///
    /// # Errors
    ///
    /// Returns `DataError::InvalidSplit` if `fraction` is outside
    /// (0.0, 0.5] or the training pool cannot spare a validation sample.
    pub fn split_validation(self, fraction: f64) -> Result<Split<F>, DataError> {
        if !(fraction > 0.0 && fraction <= 0.5) {
            return Err(DataError::InvalidSplit(format!(
                "fraction must be in (0.0, 0.5], got {}",
                fraction
            )));
        }
        let n = self.train_features.nrows();
        if n < 2 {
            return Err(DataError::InvalidSplit(format!(
                "training pool of {} cannot be split",
                n
            )));
        }
        let val_count = ((n as f64) * fraction).ceil() as usize;
        let val_count = val_count.clamp(1, n - 1);

        let val_features = self.train_features.slice(s![..val_count, ..]).to_owned();
        let train_features = self.train_features.slice(s![val_count.., ..]).to_owned();
        let val_labels = self.train_labels[..val_count].to_vec();
        let train_labels = self.train_labels[val_count..].to_vec();
        Ok(Split {
            train_features,
            train_labels,
            val_features,
            val_labels,
            test_features: self.test_features,
            test_labels: self.test_labels,
        })
    }
}

fn load_partition<F: Float>(
    images_path: &Path,
    labels_path: &Path,
) -> Result<(Array2<F>, Vec<u8>), DataError> {
    let features = image_features(&read_idx(images_path)?, images_path)?;
    let labels = digit_labels(&read_idx(labels_path)?, labels_path)?;
    if features.nrows() != labels.len() {
        return Err(DataError::Format(format!(
            "{} images but {} labels",
            features.nrows(),
            labels.len()
        )));
    }
    Ok((features, labels))
}

fn synthetic_partition<F: Float, R: Rng>(n: usize, rng: &mut R) -> (Array2<F>, Vec<u8>) {
    let band_width = NUM_FEATURES / 10;
    let mut features = Array2::zeros((n, NUM_FEATURES));
    let mut labels = Vec::with_capacity(n);
    for i in 0..n {
        let digit = (i % 10) as u8;
        labels.push(digit);
        let band = digit as usize * band_width;
        for j in 0..NUM_FEATURES {
            let base = if (band..band + band_width).contains(&j) {
                0.9
            } else {
                0.05
            };
            let noise: f64 = rng.random_range(-0.05..0.05);
            features[(i, j)] = F::from((base + noise).clamp(0.0, 1.0)).unwrap();
        }
    }
    (features, labels)
}
