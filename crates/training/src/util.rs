use std::path::PathBuf;

use anyhow::Context;
use burn::backend::Autodiff;
use burn::optim::AdamConfig;
use burn::tensor::backend::Backend;
use clap::{Args, Parser, ValueEnum};
use models::{ArchKind, ProductClassifier, ProductClassifierConfig, NUM_CLASSES};
use product_dataset::{LoaderConfig, Manifest, ProductLoader, Split, TransformConfig, TransformPipeline};

use crate::checkpoint::load_checkpoint;
use crate::config::TrainConfig;
use crate::loss::Criterion;
use crate::scheduler::CosineWarmRestarts;
use crate::trainer::{train, EpochReport, PhaseLoaders, TrainOptions};
use crate::TrainBackend;

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum BackendKind {
    NdArray,
    Wgpu,
}

/// Flags shared by `train` and `eval` that override the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// TOML config file (defaults to $PRODUCT_TRAIN_CONFIG, then ./product-train.toml).
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Training manifest CSV (`filename,category[,path]`).
    #[arg(long)]
    pub train_manifest: Option<PathBuf>,
    /// Validation manifest CSV.
    #[arg(long)]
    pub val_manifest: Option<PathBuf>,
    /// Root holding `<category:02>/<filename>` image folders.
    #[arg(long)]
    pub image_root: Option<PathBuf>,
    /// Directory receiving `model_<ARCH>.pt`.
    #[arg(long)]
    pub checkpoint_dir: Option<PathBuf>,
    /// Number of epochs.
    #[arg(long)]
    pub epochs: Option<usize>,
    /// Peak learning rate.
    #[arg(long)]
    pub lr: Option<f64>,
    /// Optimizer steps per cosine restart cycle.
    #[arg(long)]
    pub restart_period: Option<usize>,
    /// Image decoding threads per loader.
    #[arg(long)]
    pub num_workers: Option<usize>,
    /// Square input size (defaults per architecture).
    #[arg(long)]
    pub image_size: Option<u32>,
    /// Seed for shuffling and augmentation.
    #[arg(long)]
    pub seed: Option<u64>,
    /// Training criterion.
    #[arg(long, value_enum)]
    pub loss: Option<Criterion>,
    /// Block on the device after every optimizer step.
    #[arg(long)]
    pub synchronous: bool,
    /// Disable train-split augmentation.
    #[arg(long)]
    pub no_augment: bool,
}

impl ConfigOverrides {
    pub fn resolve(&self) -> anyhow::Result<TrainConfig> {
        let mut cfg = TrainConfig::load(self.config.as_deref())?;
        self.apply(&mut cfg);
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply(&self, cfg: &mut TrainConfig) {
        if let Some(v) = &self.train_manifest {
            cfg.train_manifest = v.clone();
        }
        if let Some(v) = &self.val_manifest {
            cfg.val_manifest = v.clone();
        }
        if let Some(v) = &self.image_root {
            cfg.image_root = v.clone();
        }
        if let Some(v) = &self.checkpoint_dir {
            cfg.checkpoint_dir = v.clone();
        }
        if let Some(v) = self.epochs {
            cfg.epochs = v;
        }
        if let Some(v) = self.lr {
            cfg.learning_rate = v;
        }
        if let Some(v) = self.restart_period {
            cfg.restart_period = v;
        }
        if let Some(v) = self.num_workers {
            cfg.num_workers = v;
        }
        if self.image_size.is_some() {
            cfg.image_size = self.image_size;
        }
        if self.seed.is_some() {
            cfg.seed = self.seed;
        }
        if let Some(v) = self.loss {
            cfg.loss = v;
        }
        cfg.synchronous |= self.synchronous;
        if self.no_augment {
            cfg.augment = false;
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "train",
    about = "Fine-tune a product classifier (val-then-train each epoch, checkpoint on val improvement)"
)]
pub struct TrainArgs {
    /// Architecture variant: B1NS, B5NS, B6NS or B7NS.
    #[arg(value_enum, ignore_case = true)]
    pub arch: ArchKind,
    /// Samples per batch.
    #[arg(value_parser = clap::value_parser!(u64).range(1..))]
    pub batch_size: u64,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    /// Initialise weights from this checkpoint.
    #[arg(long)]
    pub resume: Option<PathBuf>,
    /// Best validation running loss to beat (e.g. when resuming).
    #[arg(long)]
    pub valid_loss_min: Option<f64>,
    #[command(flatten)]
    pub overrides: ConfigOverrides,
}

/// What a finished run leaves behind.
#[derive(Debug, Clone)]
pub struct TrainRun {
    pub valid_loss_min: f64,
    pub checkpoint_path: PathBuf,
    pub history: Vec<EpochReport>,
}

type ADBackend = Autodiff<TrainBackend>;

pub fn run_train(args: TrainArgs) -> anyhow::Result<TrainRun> {
    validate_backend_choice(args.backend)?;
    let cfg = args.overrides.resolve()?;
    let batch_size = args.batch_size as usize;

    let device = <ADBackend as Backend>::Device::default();
    log::info!("device: {device:?}");

    let model = ProductClassifier::<ADBackend>::new(ProductClassifierConfig::new(args.arch), &device);
    let model = match &args.resume {
        Some(path) => load_checkpoint::<ADBackend, _>(model, path, &device)
            .with_context(|| format!("resuming from {}", path.display()))?,
        None => model,
    };
    log::info!("{}", model.describe());

    let loaders = PhaseLoaders {
        train: build_loader(Split::Train, args.arch, batch_size, &cfg)?,
        val: build_loader(Split::Val, args.arch, batch_size, &cfg)?,
    };

    let mut optim = AdamConfig::new().init::<ADBackend, ProductClassifier<ADBackend>>();
    let mut scheduler =
        CosineWarmRestarts::new(cfg.learning_rate, cfg.restart_period, cfg.min_learning_rate);
    let opts = TrainOptions {
        num_epochs: cfg.epochs,
        checkpoint_path: cfg.checkpoint_dir.join(args.arch.checkpoint_file_name()),
        synchronous: cfg.synchronous,
    };
    log::info!(
        "training {} for {} epochs: batch_size={} lr={} restart_period={} loss={} checkpoint={}",
        args.arch,
        opts.num_epochs,
        batch_size,
        cfg.learning_rate,
        cfg.restart_period,
        cfg.loss.as_str(),
        opts.checkpoint_path.display()
    );

    let outcome = train(
        model,
        &loaders,
        cfg.loss,
        &mut optim,
        &mut scheduler,
        args.valid_loss_min.unwrap_or(f64::INFINITY),
        &opts,
        &device,
    )?;
    log::info!("best val running loss: {:.6}", outcome.valid_loss_min);

    Ok(TrainRun {
        valid_loss_min: outcome.valid_loss_min,
        checkpoint_path: opts.checkpoint_path,
        history: outcome.history,
    })
}

/// Load one split's manifest and wrap it in a loader with the split's transform.
pub fn build_loader(
    split: Split,
    arch: ArchKind,
    batch_size: usize,
    cfg: &TrainConfig,
) -> anyhow::Result<ProductLoader> {
    let manifest_path = match split {
        Split::Train => &cfg.train_manifest,
        Split::Val => &cfg.val_manifest,
    };
    let manifest = Manifest::load(manifest_path, &cfg.image_root, NUM_CLASSES)
        .with_context(|| format!("loading {split} manifest {}", manifest_path.display()))?;
    if manifest.is_empty() {
        anyhow::bail!("{split} manifest {} contains no samples", manifest_path.display());
    }
    let present = manifest.class_counts(NUM_CLASSES).iter().filter(|&&c| c > 0).count();
    log::info!(
        "{split}: {} samples, {present}/{NUM_CLASSES} classes present",
        manifest.len()
    );

    let size = cfg.image_size.unwrap_or(arch.spec().input_size);
    let transform = match split {
        Split::Train if cfg.augment => TransformConfig::train(size),
        _ => TransformConfig::val(size),
    }
    .with_seed(cfg.seed);
    let loader = ProductLoader::new(
        split,
        manifest,
        TransformPipeline::new(transform),
        LoaderConfig::for_split(split, batch_size, cfg.num_workers, cfg.seed),
    )?;
    Ok(loader)
}

pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            log::warn!("built with backend-wgpu; running on the WGPU backend despite --backend ndarray");
        }
        _ => {}
    }
    Ok(())
}
