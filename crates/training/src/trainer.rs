//! Epoch loop: validation first, then training, checkpointing on validation improvement.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use burn::module::AutodiffModule;
use burn::optim::{GradientsParams, Optimizer};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;
use models::ProductClassifier;
use product_dataset::ProductLoader;

use crate::checkpoint::save_checkpoint;
use crate::loss::Criterion;
use crate::metrics::{count_correct, BestValidLoss, Phase, PhaseMetrics, PhaseSummary};
use crate::scheduler::LrScheduler;

/// The two split loaders driven by [`train`].
pub struct PhaseLoaders {
    pub train: ProductLoader,
    pub val: ProductLoader,
}

impl PhaseLoaders {
    pub fn get(&self, phase: Phase) -> &ProductLoader {
        match phase {
            Phase::Train => &self.train,
            Phase::Val => &self.val,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrainOptions {
    pub num_epochs: usize,
    /// Overwritten every time the validation loss improves.
    pub checkpoint_path: PathBuf,
    pub synchronous: bool,
}

#[derive(Debug, Clone)]
pub struct EpochReport {
    pub epoch: usize,
    pub val: PhaseSummary,
    pub train: PhaseSummary,
    pub checkpoint_saved: bool,
    /// Learning rate after the epoch's last optimizer step.
    pub lr: f64,
}

pub struct TrainOutcome<B: AutodiffBackend> {
    pub model: ProductClassifier<B>,
    pub valid_loss_min: f64,
    pub history: Vec<EpochReport>,
}

#[allow(clippy::too_many_arguments)]
pub fn train<B, O, S>(
    mut model: ProductClassifier<B>,
    loaders: &PhaseLoaders,
    criterion: Criterion,
    optim: &mut O,
    scheduler: &mut S,
    valid_loss_min: f64,
    opts: &TrainOptions,
    device: &B::Device,
) -> anyhow::Result<TrainOutcome<B>>
where
    B: AutodiffBackend,
    O: Optimizer<ProductClassifier<B>, B>,
    S: LrScheduler,
{
    let mut best = BestValidLoss::new(valid_loss_min);
    let mut history = Vec::with_capacity(opts.num_epochs);

    for epoch in 0..opts.num_epochs {
        log::info!("Epoch {}/{}", epoch, opts.num_epochs);
        log::info!("{}", "-".repeat(10));
        let started = Instant::now();

        let mut val_summary = None;
        let mut train_summary = None;
        let mut checkpoint_saved = false;

        for phase in Phase::ORDER {
            let summary = match phase {
                Phase::Val => evaluate(&model.valid(), loaders.get(phase), criterion, epoch, device)?,
                Phase::Train => {
                    let (next, summary) = train_phase(
                        model,
                        loaders.get(phase),
                        criterion,
                        optim,
                        scheduler,
                        epoch,
                        opts.synchronous,
                        device,
                    )?;
                    model = next;
                    summary
                }
            };
            log::info!(
                "{} Loss: {:.4} Acc: {:.4}",
                phase,
                summary.mean_loss,
                summary.accuracy
            );

            match phase {
                Phase::Val => {
                    if let Some(previous) = best.observe(summary.running_loss) {
                        log::info!(
                            "Validation loss decreased ({:.6} --> {:.6}).  Saving model ...",
                            previous,
                            summary.running_loss
                        );
                        save_checkpoint::<B, _>(&model, &opts.checkpoint_path).with_context(|| {
                            format!("saving checkpoint {}", opts.checkpoint_path.display())
                        })?;
                        checkpoint_saved = true;
                    }
                    val_summary = Some(summary);
                }
                Phase::Train => train_summary = Some(summary),
            }
        }

        if let (Some(val), Some(train)) = (val_summary, train_summary) {
            log::debug!(
                "epoch {epoch} done in {:.1}s (best val running loss {:.6})",
                started.elapsed().as_secs_f32(),
                best.best()
            );
            history.push(EpochReport {
                epoch,
                val,
                train,
                checkpoint_saved,
                lr: scheduler.lr(),
            });
        }
    }

    Ok(TrainOutcome {
        model,
        valid_loss_min: best.best(),
        history,
    })
}

/// One pass over `loader` without gradients. Shared by the val phase and the eval binary.
pub fn evaluate<B: Backend>(
    model: &ProductClassifier<B>,
    loader: &ProductLoader,
    criterion: Criterion,
    epoch: usize,
    device: &B::Device,
) -> anyhow::Result<PhaseSummary> {
    let mut metrics = PhaseMetrics::new(Phase::Val);
    let mut iter = loader.iter(epoch);
    while let Some(batch) = iter.next_batch::<B>(device)? {
        let batch_size = batch.len();
        let logits = model.forward(batch.images);
        let correct = count_correct(logits.clone(), batch.targets.clone());
        let loss = criterion.forward(logits, batch.targets)?;
        metrics.record(scalar(loss), batch_size, correct);
    }
    log::debug!("val decode avg {:.2} ms/batch", iter.avg_load_ms());
    Ok(metrics.finish(loader.len()))
}

#[allow(clippy::too_many_arguments)]
fn train_phase<B, O, S>(
    mut model: ProductClassifier<B>,
    loader: &ProductLoader,
    criterion: Criterion,
    optim: &mut O,
    scheduler: &mut S,
    epoch: usize,
    synchronous: bool,
    device: &B::Device,
) -> anyhow::Result<(ProductClassifier<B>, PhaseSummary)>
where
    B: AutodiffBackend,
    O: Optimizer<ProductClassifier<B>, B>,
    S: LrScheduler,
{
    let mut metrics = PhaseMetrics::new(Phase::Train);
    let mut iter = loader.iter(epoch);
    while let Some(batch) = iter.next_batch::<B>(device)? {
        let batch_size = batch.len();
        let logits = model.forward(batch.images);
        let correct = count_correct(logits.clone().detach(), batch.targets.clone());
        let loss = criterion.forward(logits, batch.targets)?;
        let loss_detached = loss.clone().detach();

        let grads = GradientsParams::from_grads(loss.backward(), &model);
        model = optim.step(scheduler.lr(), model, grads);
        scheduler.step();
        if synchronous {
            B::sync(device);
        }

        metrics.record(scalar(loss_detached), batch_size, correct);
    }
    log::debug!("train decode avg {:.2} ms/batch", iter.avg_load_ms());
    Ok((model, metrics.finish(loader.len())))
}

fn scalar<B: Backend>(loss: Tensor<B, 1>) -> f64 {
    loss.into_data()
        .to_vec::<f32>()
        .unwrap_or_default()
        .into_iter()
        .next()
        .map(f64::from)
        .unwrap_or(f64::NAN)
}
