use std::fs;
use std::path::Path;

use burn::backend::Autodiff;
use burn::module::AutodiffModule;
use burn::optim::AdamConfig;
use product_dataset::{LoaderConfig, Manifest, ProductLoader, Split, TransformConfig, TransformPipeline};
use training::{
    evaluate, train, ArchKind, Criterion, CosineWarmRestarts, LrScheduler, PhaseLoaders,
    ProductClassifier, ProductClassifierConfig, TrainOptions, NUM_CLASSES,
};

type B = burn_ndarray::NdArray<f32>;
type AD = Autodiff<B>;

fn write_split(root: &Path, name: &str, labels: &[u32]) -> ProductLoader {
    let mut csv = String::from("filename,category\n");
    for (i, label) in labels.iter().enumerate() {
        let dir = root.join(format!("{label:02}"));
        fs::create_dir_all(&dir).unwrap();
        let file = format!("{name}_{i}.png");
        image::RgbImage::from_fn(8, 8, |x, y| {
            image::Rgb([(*label as u8) * 12, x as u8 * 25 + i as u8, y as u8 * 25])
        })
        .save(dir.join(&file))
        .unwrap();
        csv.push_str(&format!("{file},{label}\n"));
    }
    let manifest_path = root.join(format!("{name}.csv"));
    fs::write(&manifest_path, csv).unwrap();

    let split = if name == "train" { Split::Train } else { Split::Val };
    let manifest = Manifest::load(&manifest_path, root, NUM_CLASSES).unwrap();
    ProductLoader::new(
        split,
        manifest,
        TransformPipeline::new(TransformConfig::val(16).with_seed(Some(3))),
        LoaderConfig::for_split(split, 2, 1, Some(3)),
    )
    .unwrap()
}

fn loaders(root: &Path) -> PhaseLoaders {
    PhaseLoaders {
        train: write_split(root, "train", &[0, 1, 2, 3, 4]),
        val: write_split(root, "val", &[0, 1, 2]),
    }
}

#[test]
fn scheduler_steps_once_per_training_batch() {
    let tmp = tempfile::tempdir().unwrap();
    let loaders = loaders(tmp.path());
    let device = Default::default();

    let model = ProductClassifier::<AD>::new(ProductClassifierConfig::new(ArchKind::B1Ns), &device);
    let mut optim = AdamConfig::new().init::<AD, ProductClassifier<AD>>();
    let mut scheduler = CosineWarmRestarts::new(1e-3, 10, 0.0);
    let opts = TrainOptions {
        num_epochs: 2,
        checkpoint_path: tmp.path().join(ArchKind::B1Ns.checkpoint_file_name()),
        synchronous: false,
    };

    let outcome = train(
        model,
        &loaders,
        Criterion::CrossEntropy,
        &mut optim,
        &mut scheduler,
        f64::INFINITY,
        &opts,
        &device,
    )
    .unwrap();

    // 5 samples at batch size 2 is 3 steps per epoch.
    assert_eq!(outcome.history[0].train.batches, 3);
    assert_eq!(scheduler.steps(), 6);
    assert_eq!(outcome.history[0].lr, scheduler.lr_at(3));
    assert_eq!(outcome.history[1].lr, scheduler.lr());
    assert_ne!(outcome.history[0].lr, outcome.history[1].lr);
}

#[test]
fn first_validation_sees_untrained_weights() {
    let tmp = tempfile::tempdir().unwrap();
    let loaders = loaders(tmp.path());
    let device = Default::default();

    let model = ProductClassifier::<AD>::new(ProductClassifierConfig::new(ArchKind::B1Ns), &device);
    let initial = evaluate(&model.valid(), &loaders.val, Criterion::CrossEntropy, 0, &device).unwrap();

    let mut optim = AdamConfig::new().init::<AD, ProductClassifier<AD>>();
    let mut scheduler = CosineWarmRestarts::new(1e-2, 2000, 0.0);
    let opts = TrainOptions {
        num_epochs: 2,
        checkpoint_path: tmp.path().join(ArchKind::B1Ns.checkpoint_file_name()),
        synchronous: true,
    };
    let outcome = train(
        model,
        &loaders,
        Criterion::CrossEntropy,
        &mut optim,
        &mut scheduler,
        f64::INFINITY,
        &opts,
        &device,
    )
    .unwrap();

    assert_eq!(outcome.history[0].val.running_loss, initial.running_loss);
    assert_eq!(outcome.history[0].val.correct, initial.correct);
    assert!(outcome.history[0].checkpoint_saved);
    // The second validation runs after a training pass, so the weights have moved.
    assert_ne!(outcome.history[1].val.running_loss, initial.running_loss);
}
