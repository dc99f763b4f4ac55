//! Named-parameter checkpoint format: a JSON map from variable name to its
//! shape and data, human-inspectable and distinct from (and layered above)
//! [`crate::tensor::Tensor::serialize`]'s raw binary wire format.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shape::Shape;
use crate::tensor::Float;
use crate::variable::Variable;

#[derive(Error, Debug)]
pub enum StateIoError {
    #[error("I/O error reading/writing state dict at {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },
    #[error("malformed state dict JSON at {path}: {source}")]
    Json { path: String, #[source] source: serde_json::Error },
    #[error("state dict is missing variable {0:?}")]
    MissingVariable(String),
    #[error("variable {name:?} shape mismatch: checkpoint has {checkpoint:?}, model has {model:?}")]
    ShapeMismatch { name: String, checkpoint: Vec<usize>, model: Vec<usize> },
    #[error(transparent)]
    Tensor(#[from] crate::tensor::TensorError),
}

pub type StateIoResult<T> = Result<T, StateIoError>;

#[derive(Serialize, Deserialize)]
struct VariableState {
    shape: Vec<usize>,
    data: Vec<Float>,
}

/// A name -> [`Variable`] mapping, in save/load order.
pub type StateDict<'a> = Vec<(&'a str, &'a Variable)>;

/// Serialize a named collection of variables as a JSON state dict.
pub fn save_state_dict(path: impl AsRef<Path>, variables: &StateDict) -> StateIoResult<()> {
    let path_str = path.as_ref().display().to_string();
    let mut map: BTreeMap<&str, VariableState> = BTreeMap::new();
    for (name, var) in variables {
        let data: Vec<Float> = (0..var.tensor.size()).map(|i| var.tensor.get_unchecked(i)).collect();
        map.insert(name, VariableState { shape: var.tensor.shape().dims().to_vec(), data });
    }
    let file = File::create(&path).map_err(|e| StateIoError::Io { path: path_str.clone(), source: e })?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, &map).map_err(|e| StateIoError::Json { path: path_str, source: e })?;
    tracing::info!(count = variables.len(), "saved state dict");
    Ok(())
}

/// Load a JSON state dict and write each entry's tensor into the matching
/// variable by name. Fails if a variable is missing from the checkpoint or
/// its checkpoint shape disagrees with the live variable's shape.
pub fn load_state_dict(path: impl AsRef<Path>, variables: &StateDict) -> StateIoResult<()> {
    let path_str = path.as_ref().display().to_string();
    let file = File::open(&path).map_err(|e| StateIoError::Io { path: path_str.clone(), source: e })?;
    let reader = BufReader::new(file);
    let map: BTreeMap<String, VariableState> =
        serde_json::from_reader(reader).map_err(|e| StateIoError::Json { path: path_str, source: e })?;

    for (name, var) in variables {
        let entry = map.get(*name).ok_or_else(|| StateIoError::MissingVariable((*name).to_string()))?;
        if entry.shape != var.tensor.shape().dims() {
            return Err(StateIoError::ShapeMismatch {
                name: (*name).to_string(),
                checkpoint: entry.shape.clone(),
                model: var.tensor.shape().dims().to_vec(),
            });
        }
        for (i, &v) in entry.data.iter().enumerate() {
            var.tensor.set_unchecked(i, v);
        }
        var.tensor.wrap_for_broadcasting();
    }
    tracing::info!(count = variables.len(), "loaded state dict");
    Ok(())
}
