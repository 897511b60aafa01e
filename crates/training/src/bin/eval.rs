use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use product_dataset::Split;
use training::util::{build_loader, validate_backend_choice, BackendKind, ConfigOverrides};
use training::{
    evaluate, load_checkpoint, ArchKind, ProductClassifier, ProductClassifierConfig, TrainBackend,
};

#[derive(Parser, Debug)]
#[command(
    name = "eval",
    about = "Evaluate a product classifier checkpoint on the validation manifest (loss/accuracy)"
)]
struct Args {
    /// Architecture variant: B1NS, B5NS, B6NS or B7NS.
    #[arg(value_enum, ignore_case = true)]
    arch: ArchKind,
    /// Samples per batch.
    #[arg(value_parser = clap::value_parser!(u64).range(1..))]
    batch_size: u64,
    /// Checkpoint to load (defaults to <checkpoint-dir>/model_<ARCH>.pt).
    #[arg(long)]
    checkpoint: Option<PathBuf>,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    backend: BackendKind,
    #[command(flatten)]
    overrides: ConfigOverrides,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    validate_backend_choice(args.backend)?;
    let cfg = args.overrides.resolve()?;

    let device = <TrainBackend as burn::tensor::backend::Backend>::Device::default();
    let ckpt = args
        .checkpoint
        .clone()
        .unwrap_or_else(|| cfg.checkpoint_dir.join(args.arch.checkpoint_file_name()));
    let model = ProductClassifier::<TrainBackend>::new(ProductClassifierConfig::new(args.arch), &device);
    let model = load_checkpoint::<TrainBackend, _>(model, &ckpt, &device)
        .with_context(|| format!("loading checkpoint {}", ckpt.display()))?;
    log::info!("{}", model.describe());

    let loader = build_loader(Split::Val, args.arch, args.batch_size as usize, &cfg)?;
    let summary = evaluate(&model, &loader, cfg.loss, 0, &device)?;

    println!(
        "Eval complete: loss={:.4}, acc={:.4} (correct={}, samples={}, checkpoint={})",
        summary.mean_loss,
        summary.accuracy,
        summary.correct,
        summary.samples,
        ckpt.display()
    );
    Ok(())
}
