//! Per-phase loss/accuracy bookkeeping and best-validation tracking.

use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};
use std::fmt;

/// One pass over a split within an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Val,
    Train,
}

impl Phase {
    /// Phases run in this order every epoch: validation first, then training.
    pub const ORDER: [Phase; 2] = [Phase::Val, Phase::Train];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Val => "val",
            Phase::Train => "train",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accumulates `loss * batch_size` and correct-prediction counts over a phase.
#[derive(Debug, Clone)]
pub struct PhaseMetrics {
    phase: Phase,
    running_loss: f64,
    correct: u64,
    samples: usize,
    batches: usize,
}

impl PhaseMetrics {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            running_loss: 0.0,
            correct: 0,
            samples: 0,
            batches: 0,
        }
    }

    pub fn record(&mut self, batch_loss: f64, batch_size: usize, correct: u64) {
        self.running_loss += batch_loss * batch_size as f64;
        self.correct += correct;
        self.samples += batch_size;
        self.batches += 1;
    }

    /// Normalise by the split's dataset size (not by the samples seen).
    pub fn finish(&self, dataset_size: usize) -> PhaseSummary {
        let (mean_loss, accuracy) = if dataset_size == 0 {
            (0.0, 0.0)
        } else {
            (
                self.running_loss / dataset_size as f64,
                self.correct as f64 / dataset_size as f64,
            )
        };
        PhaseSummary {
            phase: self.phase,
            running_loss: self.running_loss,
            mean_loss,
            accuracy,
            correct: self.correct,
            samples: self.samples,
            batches: self.batches,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseSummary {
    pub phase: Phase,
    /// Sum of `loss * batch_size` over the phase.
    pub running_loss: f64,
    pub mean_loss: f64,
    pub accuracy: f64,
    pub correct: u64,
    pub samples: usize,
    pub batches: usize,
}

/// Number of rows whose argmax matches the target.
pub fn count_correct<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> u64 {
    let [batch, _] = logits.dims();
    let preds = logits.argmax(1).reshape([batch]);
    let hits: Vec<i64> = preds
        .equal(targets)
        .int()
        .into_data()
        .iter::<i64>()
        .collect();
    hits.into_iter().filter(|&h| h != 0).count() as u64
}

/// Lowest validation running loss seen so far.
///
/// Ties count as improvements, so an equal loss triggers another checkpoint write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestValidLoss {
    best: f64,
}

impl Default for BestValidLoss {
    fn default() -> Self {
        Self::new(f64::INFINITY)
    }
}

impl BestValidLoss {
    pub fn new(initial: f64) -> Self {
        Self { best: initial }
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    /// Returns the previous best when `loss <= best` and adopts `loss`.
    pub fn observe(&mut self, loss: f64) -> Option<f64> {
        if loss <= self.best {
            let previous = self.best;
            self.best = loss;
            Some(previous)
        } else {
            None
        }
    }
}
