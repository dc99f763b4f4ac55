//! Data pipeline: in-memory/whitespace-text datasets and a batching loader.

use std::path::Path;

use thiserror::Error;

use crate::shape::Shape;
use crate::tensor::{Float, Tensor};

#[derive(Error, Debug)]
pub enum DataError {
    #[error("failed to read dataset file {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },
    #[error("malformed numeric field on line {line} of {path}: {field:?}")]
    MalformedField { path: String, line: usize, field: String },
    #[error("row count mismatch: {x_path} has {x_rows} rows, {y_path} has {y_rows} rows")]
    RowCountMismatch { x_path: String, y_path: String, x_rows: usize, y_rows: usize },
    #[error("feature row {line} of {path} has {got} values, expected {expected}")]
    FeatureWidthMismatch { path: String, line: usize, got: usize, expected: usize },
    #[error("sample {index} in batch has {got} features, expected {expected}")]
    BatchFeatureWidthMismatch { index: usize, got: usize, expected: usize },
    #[error(transparent)]
    Tensor(#[from] crate::tensor::TensorError),
}

pub type DataResult<T> = Result<T, DataError>;

/// Dataset: indexed collection of (input, target) pairs. Targets are class
/// labels, matching the whitespace-text format's single unsigned-int `y`
/// column.
pub trait Dataset {
    fn len(&self) -> usize;
    fn get(&self, index: usize) -> Option<(Tensor, usize)>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory dataset from a vec of (input, label) pairs. Cheap to clone:
/// each sample's tensor is a shared, ref-counted handle, so `Clone` only
/// copies the `Vec` spine and a handful of `Rc` bumps, not tensor data.
#[derive(Clone)]
pub struct InMemoryDataset {
    samples: Vec<(Tensor, usize)>,
}

impl InMemoryDataset {
    pub fn new(samples: Vec<(Tensor, usize)>) -> Self {
        InMemoryDataset { samples }
    }

    /// Load a whitespace-delimited `x`/`y` file pair (§6): each `x` line is
    /// a whitespace-separated row of floats, each `y` line a single
    /// unsigned integer label. Row counts must match.
    pub fn from_text_files(x_path: impl AsRef<Path>, y_path: impl AsRef<Path>) -> DataResult<Self> {
        let x_path_str = x_path.as_ref().display().to_string();
        let y_path_str = y_path.as_ref().display().to_string();

        let x_text = std::fs::read_to_string(&x_path).map_err(|e| DataError::Io {
            path: x_path_str.clone(),
            source: e,
        })?;
        let y_text = std::fs::read_to_string(&y_path).map_err(|e| DataError::Io {
            path: y_path_str.clone(),
            source: e,
        })?;

        let mut rows: Vec<Vec<Float>> = Vec::new();
        let mut width = None;
        for (line_no, line) in x_text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let mut values = Vec::new();
            for field in line.split_whitespace() {
                let v: Float = field.parse().map_err(|_| DataError::MalformedField {
                    path: x_path_str.clone(),
                    line: line_no + 1,
                    field: field.to_string(),
                })?;
                values.push(v);
            }
            match width {
                None => width = Some(values.len()),
                Some(w) if w != values.len() => {
                    return Err(DataError::FeatureWidthMismatch {
                        path: x_path_str.clone(),
                        line: line_no + 1,
                        got: values.len(),
                        expected: w,
                    });
                }
                _ => {}
            }
            rows.push(values);
        }

        let mut labels: Vec<usize> = Vec::new();
        for (line_no, line) in y_text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let label: usize = line.trim().parse().map_err(|_| DataError::MalformedField {
                path: y_path_str.clone(),
                line: line_no + 1,
                field: line.trim().to_string(),
            })?;
            labels.push(label);
        }

        if rows.len() != labels.len() {
            return Err(DataError::RowCountMismatch {
                x_path: x_path_str,
                y_path: y_path_str,
                x_rows: rows.len(),
                y_rows: labels.len(),
            });
        }

        tracing::info!(samples = rows.len(), "loaded whitespace-text dataset");

        let width = width.unwrap_or(0);
        let mut samples = Vec::with_capacity(rows.len());
        for (values, label) in rows.into_iter().zip(labels.into_iter()) {
            let shape = Shape::new(vec![width])?;
            let tensor = Tensor::from_vec(shape, values)?;
            samples.push((tensor, label));
        }
        Ok(InMemoryDataset::new(samples))
    }
}

impl Dataset for InMemoryDataset {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn get(&self, index: usize) -> Option<(Tensor, usize)> {
        self.samples.get(index).cloned()
    }
}

/// A batch: stacked feature tensor `[batch, features]` plus its label
/// vector, in dataset order.
pub struct Batch {
    pub inputs: Tensor,
    pub labels: Vec<usize>,
}

/// Iterates a dataset in fixed-size batches (no shuffling — the caller
/// shuffles indices ahead of time if desired). The final partial batch, if
/// any, is still yielded.
pub struct DataLoader<D: Dataset> {
    dataset: D,
    batch_size: usize,
    index: usize,
}

impl<D: Dataset> DataLoader<D> {
    pub fn new(dataset: D, batch_size: usize) -> Self {
        DataLoader { dataset, batch_size, index: 0 }
    }

    pub fn reset(&mut self) {
        self.index = 0;
    }

    pub fn next_batch(&mut self) -> DataResult<Option<Batch>> {
        let start = self.index;
        if start >= self.dataset.len() {
            return Ok(None);
        }
        let end = (start + self.batch_size).min(self.dataset.len());
        let mut labels = Vec::with_capacity(end - start);
        let mut flat = Vec::new();
        let mut feature_width = None;
        for i in start..end {
            let (x, y) = self.dataset.get(i).expect("index within dataset length");
            let w = x.size();
            match feature_width {
                None => feature_width = Some(w),
                Some(existing) if existing != w => {
                    return Err(DataError::BatchFeatureWidthMismatch { index: i, got: w, expected: existing });
                }
                _ => {}
            }
            for j in 0..w {
                flat.push(x.get_unchecked(j));
            }
            labels.push(y);
        }
        self.index = end;
        let width = feature_width.unwrap_or(0);
        let shape = Shape::new(vec![labels.len(), width])?;
        let inputs = Tensor::from_vec(shape, flat)?;
        Ok(Some(Batch { inputs, labels }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_batches_respect_batch_size() {
        let samples = (0..5)
            .map(|i| {
                let t = Tensor::from_vec(Shape::new(vec![2]).unwrap(), vec![i as Float, -(i as Float)]).unwrap();
                (t, i % 2)
            })
            .collect();
        let mut loader = DataLoader::new(InMemoryDataset::new(samples), 2);

        let b1 = loader.next_batch().unwrap().unwrap();
        assert_eq!(b1.labels.len(), 2);
        assert_eq!(b1.inputs.shape().dims(), &[2, 2]);

        let b2 = loader.next_batch().unwrap().unwrap();
        assert_eq!(b2.labels.len(), 2);

        let b3 = loader.next_batch().unwrap().unwrap();
        assert_eq!(b3.labels.len(), 1);

        assert!(loader.next_batch().unwrap().is_none());
    }

    #[test]
    fn text_file_loader_parses_rows_and_labels() {
        let dir = std::env::temp_dir();
        let x_path = dir.join("tensorlane_test_x.txt");
        let y_path = dir.join("tensorlane_test_y.txt");
        std::fs::write(&x_path, "1.0 2.0 3.0\n4.0 5.0 6.0\n").unwrap();
        std::fs::write(&y_path, "0\n1\n").unwrap();

        let dataset = InMemoryDataset::from_text_files(&x_path, &y_path).unwrap();
        assert_eq!(dataset.len(), 2);
        let (x0, y0) = dataset.get(0).unwrap();
        assert_eq!(x0.get_unchecked(0), 1.0);
        assert_eq!(y0, 0);

        std::fs::remove_file(&x_path).ok();
        std::fs::remove_file(&y_path).ok();
    }

    #[test]
    fn row_count_mismatch_is_an_error() {
        let dir = std::env::temp_dir();
        let x_path = dir.join("tensorlane_test_mismatch_x.txt");
        let y_path = dir.join("tensorlane_test_mismatch_y.txt");
        std::fs::write(&x_path, "1.0 2.0\n3.0 4.0\n").unwrap();
        std::fs::write(&y_path, "0\n").unwrap();

        let err = InMemoryDataset::from_text_files(&x_path, &y_path).unwrap_err();
        assert!(matches!(err, DataError::RowCountMismatch { .. }));

        std::fs::remove_file(&x_path).ok();
        std::fs::remove_file(&y_path).ok();
    }
}
