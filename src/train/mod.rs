//! Training loop: zero_grad -> forward -> loss -> backward -> optimizer
//! step, driven batch-by-batch over a [`crate::data::DataLoader`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::{DataError, DataLoader, Dataset};
use crate::expr::ExprNode;
use crate::nn::{Module, SoftmaxCrossEntropy};
use crate::optimizer::{Optimizer, OptimizerError};
use crate::tensor::Float;
use crate::variable::Variable;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error(transparent)]
    Optimizer(#[from] OptimizerError),
    #[error(transparent)]
    Data(#[from] DataError),
}

pub type TrainResult<T> = Result<T, TrainError>;

/// A training run's hyperparameters: epoch count, batch size, and an
/// optional piecewise learning-rate schedule (epoch index -> new lr,
/// applied at the start of that epoch; the optimizer's own config supplies
/// the starting lr).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrainConfig {
    pub epochs: usize,
    pub batch_size: usize,
    #[serde(default)]
    pub lr_schedule: Vec<(usize, Float)>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig { epochs: 10, batch_size: 32, lr_schedule: Vec::new() }
    }
}

/// Result of one batch step.
#[derive(Debug, Clone, Copy)]
pub struct TrainStepResult {
    pub loss: Float,
    pub correct: usize,
    pub total: usize,
}

/// Result of a full epoch.
#[derive(Debug, Clone, Copy)]
pub struct EpochResult {
    pub avg_loss: Float,
    pub accuracy: Float,
    pub num_batches: usize,
}

/// Drives a classification model through softmax-cross-entropy training:
/// per batch, builds the expression graph fresh (cheap — it owns no
/// tensor data, only shares `Variable` handles), runs the loss's fused
/// forward+backward, and steps the optimizer.
pub struct Trainer<M, O> {
    pub model: M,
    pub optimizer: O,
    pub config: TrainConfig,
}

impl<M: Module, O: Optimizer> Trainer<M, O> {
    pub fn new(model: M, optimizer: O, config: TrainConfig) -> Self {
        Trainer { model, optimizer, config }
    }

    /// One batch: `inputs` shape `[batch, features]`, one label per row.
    pub fn step_batch(&mut self, inputs: &crate::tensor::Tensor, labels: &[usize]) -> TrainResult<TrainStepResult> {
        let span = tracing::info_span!("train_step", batch = labels.len());
        let _enter = span.enter();

        let input_var = Variable::constant(inputs.clone());
        let expr = self.model.forward(ExprNode::leaf(input_var));

        let ce = SoftmaxCrossEntropy::new(&expr, labels);
        let correct = ce.predictions.iter().zip(labels.iter()).filter(|(p, y)| *p == *y).count();

        for var in self.model.parameters() {
            var.zero_grad();
        }
        ce.backward(labels);

        let params = self.model.parameters();
        self.optimizer.step(&params, labels.len())?;

        Ok(TrainStepResult { loss: ce.loss, correct, total: labels.len() })
    }

    /// Drive `self.config.epochs` epochs over `dataset`, applying any
    /// piecewise learning-rate schedule at the start of the matching epoch
    /// (epoch indices are 0-based). Returns every epoch's result in order.
    pub fn fit<D: Dataset + Clone>(&mut self, dataset: &D) -> TrainResult<Vec<EpochResult>> {
        let mut results = Vec::with_capacity(self.config.epochs);
        for epoch in 0..self.config.epochs {
            if let Some(&(_, lr)) = self.config.lr_schedule.iter().find(|(e, _)| *e == epoch) {
                tracing::info!(epoch, lr, "applying learning-rate schedule");
                self.optimizer.set_lr(lr);
            }
            let result = self.run_epoch(dataset.clone())?;
            results.push(result);
        }
        Ok(results)
    }

    /// Run one epoch over `dataset`, in fixed-size batches (no shuffling —
    /// shuffle sample order ahead of time if desired).
    pub fn run_epoch<D: Dataset>(&mut self, dataset: D) -> TrainResult<EpochResult> {
        let span = tracing::info_span!("train_epoch");
        let _enter = span.enter();

        let mut loader = DataLoader::new(dataset, self.config.batch_size);
        let mut total_loss = 0.0;
        let mut total_correct = 0;
        let mut total_examples = 0;
        let mut num_batches = 0;
        while let Some(batch) = loader.next_batch()? {
            let r = self.step_batch(&batch.inputs, &batch.labels)?;
            total_loss += r.loss;
            total_correct += r.correct;
            total_examples += r.total;
            num_batches += 1;
        }

        let avg_loss = if num_batches > 0 { total_loss / num_batches as Float } else { 0.0 };
        let accuracy = if total_examples > 0 { total_correct as Float / total_examples as Float } else { 0.0 };
        tracing::info!(avg_loss, accuracy, num_batches, "epoch complete");
        Ok(EpochResult { avg_loss, accuracy, num_batches })
    }
}
