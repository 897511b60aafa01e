//! Fine-tuning of product-image classifiers with a determinant-based (DMI) loss.
//!
//! Each epoch runs a validation pass and then a training pass; the model is
//! checkpointed to `model_<ARCH>.pt` whenever the validation running loss does
//! not exceed the best seen so far.

pub mod checkpoint;
pub mod config;
pub mod loss;
pub mod metrics;
pub mod scheduler;
pub mod trainer;
pub mod util;

pub use checkpoint::{load_checkpoint, save_checkpoint, CheckpointError};
pub use config::{ConfigError, TrainConfig};
pub use loss::{determinant, dmi_loss, Criterion, LossError};
pub use metrics::{count_correct, BestValidLoss, Phase, PhaseMetrics, PhaseSummary};
pub use models::{ArchKind, ProductClassifier, ProductClassifierConfig, NUM_CLASSES};
pub use scheduler::{CosineWarmRestarts, LrScheduler};
pub use trainer::{evaluate, train, EpochReport, PhaseLoaders, TrainOptions, TrainOutcome};
pub use util::{run_train, TrainArgs, TrainRun};
/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;
