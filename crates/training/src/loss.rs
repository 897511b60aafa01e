//! Training criteria: the determinant-based DMI loss and cross-entropy.
//!
//! DMI works on the whole batch at once: it builds `M = Yᵀ · softmax(logits)`
//! (`Y` one-hot targets, shape `[classes, classes]`) and returns
//! `-ln(|det M| + 0.001)`. It is not decomposable per sample, so batch class
//! composition matters: any class absent from the batch zeroes a row of `M`,
//! `det M` becomes 0, and the loss saturates at `-ln(0.001)`.

use burn::nn::loss::CrossEntropyLossConfig;
use burn::tensor::activation::softmax;
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use clap::ValueEnum;
use serde::Deserialize;
use thiserror::Error;

/// Stabiliser added to `|det M|` before the logarithm.
pub const DMI_EPSILON: f64 = 0.001;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LossError {
    #[error("cannot compute a loss over an empty batch")]
    EmptyBatch,
    #[error("logits batch size {logits} does not match targets batch size {targets}")]
    ShapeMismatch { logits: usize, targets: usize },
    #[error("target {target} at position {index} is outside [0, {num_classes})")]
    TargetOutOfRange {
        index: usize,
        target: i64,
        num_classes: usize,
    },
    #[error("determinant requires a square matrix, got {rows}x{cols}")]
    NotSquare { rows: usize, cols: usize },
}

#[derive(ValueEnum, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Criterion {
    /// Determinant-based mutual-information loss.
    #[default]
    Dmi,
    /// Standard softmax cross-entropy.
    CrossEntropy,
}

impl Criterion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Criterion::Dmi => "dmi",
            Criterion::CrossEntropy => "cross-entropy",
        }
    }

    /// Scalar loss (shape `[1]`) for `logits` `[batch, classes]` and `targets` `[batch]`.
    pub fn forward<B: Backend>(
        &self,
        logits: Tensor<B, 2>,
        targets: Tensor<B, 1, Int>,
    ) -> Result<Tensor<B, 1>, LossError> {
        match self {
            Criterion::Dmi => dmi_loss(logits, targets),
            Criterion::CrossEntropy => {
                let [_, classes] = logits.dims();
                check_targets(&logits, &targets, classes)?;
                let loss = CrossEntropyLossConfig::new().init(&logits.device());
                Ok(loss.forward(logits, targets))
            }
        }
    }
}

pub fn dmi_loss<B: Backend>(
    logits: Tensor<B, 2>,
    targets: Tensor<B, 1, Int>,
) -> Result<Tensor<B, 1>, LossError> {
    let [_, classes] = logits.dims();
    let y = one_hot(&logits, targets, classes)?;
    let probs = softmax(logits, 1);
    let mat = y.transpose().matmul(probs);
    let det = determinant(mat)?;
    Ok(det.abs().add_scalar(DMI_EPSILON).log().neg())
}

/// One-hot encode `targets` into a `[batch, num_classes]` float matrix on the logits' device.
fn one_hot<B: Backend>(
    logits: &Tensor<B, 2>,
    targets: Tensor<B, 1, Int>,
    num_classes: usize,
) -> Result<Tensor<B, 2>, LossError> {
    let labels = check_targets(logits, &targets, num_classes)?;
    let batch = labels.len();
    let mut buf = vec![0.0f32; batch * num_classes];
    for (row, &label) in labels.iter().enumerate() {
        buf[row * num_classes + label as usize] = 1.0;
    }
    Ok(Tensor::from_data(
        TensorData::new(buf, [batch, num_classes]),
        &logits.device(),
    ))
}

fn check_targets<B: Backend>(
    logits: &Tensor<B, 2>,
    targets: &Tensor<B, 1, Int>,
    num_classes: usize,
) -> Result<Vec<i64>, LossError> {
    let [batch, _] = logits.dims();
    let [n_targets] = targets.dims();
    if batch == 0 || n_targets == 0 {
        return Err(LossError::EmptyBatch);
    }
    if batch != n_targets {
        return Err(LossError::ShapeMismatch {
            logits: batch,
            targets: n_targets,
        });
    }
    let labels: Vec<i64> = targets.to_data().iter::<i64>().collect();
    if let Some((index, &target)) = labels
        .iter()
        .enumerate()
        .find(|(_, t)| **t < 0 || **t as usize >= num_classes)
    {
        return Err(LossError::TargetOutOfRange {
            index,
            target,
            num_classes,
        });
    }
    Ok(labels)
}

/// Determinant of a square matrix, shape `[1]`.
///
/// Gaussian elimination with partial pivoting, expressed in tensor ops so that the
/// result stays differentiable on autodiff backends. Each step folds the pivot into
/// the running product and replaces the matrix with its trailing Schur complement.
/// A column whose pivot candidates are all zero makes the determinant exactly zero.
///
/// Pivot selection reads each column back to the host, so an `n x n` input costs `n`
/// device-to-host transfers. Cheap on NdArray, a pipeline stall per column on WGPU.
pub fn determinant<B: Backend>(matrix: Tensor<B, 2>) -> Result<Tensor<B, 1>, LossError> {
    let [rows, cols] = matrix.dims();
    if rows != cols {
        return Err(LossError::NotSquare { rows, cols });
    }
    let device = matrix.device();
    let mut det = Tensor::<B, 1>::ones([1], &device);
    let mut negate = false;
    let mut m = matrix;

    for n in (1..=rows).rev() {
        let column: Vec<f32> = m
            .clone()
            .slice([0..n, 0..1])
            .into_data()
            .iter::<f32>()
            .collect();
        let (pivot_row, pivot_abs) = column
            .iter()
            .map(|v| v.abs())
            .enumerate()
            .fold((0usize, -1.0f32), |best, (i, v)| if v > best.1 { (i, v) } else { best });

        if pivot_abs <= 0.0 {
            // Multiply by the (zero) entry rather than a constant to keep the graph connected.
            let zero = m.slice([pivot_row..pivot_row + 1, 0..1]).reshape([1]);
            return Ok(det * zero);
        }

        if pivot_row != 0 {
            let mut order: Vec<i64> = (0..n as i64).collect();
            order.swap(0, pivot_row);
            let index = Tensor::<B, 1, Int>::from_data(TensorData::new(order, [n]), &device);
            m = m.select(0, index);
            negate = !negate;
        }

        let pivot = m.clone().slice([0..1, 0..1]);
        det = det * pivot.clone().reshape([1]);
        if n == 1 {
            break;
        }

        let pivot_row_rest = m.clone().slice([0..1, 1..n]);
        let factors = m.clone().slice([1..n, 0..1]).matmul(pivot.recip());
        m = m.slice([1..n, 1..n]) - factors.matmul(pivot_row_rest);
    }

    Ok(if negate { det.neg() } else { det })
}
