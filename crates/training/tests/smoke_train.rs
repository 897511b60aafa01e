use std::fs;
use std::path::Path;

use burn::tensor::Tensor;
use clap::Parser;
use training::{load_checkpoint, run_train, ArchKind, ProductClassifier, ProductClassifierConfig, TrainArgs};

type B = burn_ndarray::NdArray<f32>;

/// Writes two 8x8 PNGs per split under `<root>/<category:02>/` plus the manifests.
fn write_dataset(root: &Path) {
    for (split, labels) in [("train", [3u32, 17]), ("test", [3u32, 17])] {
        let mut csv = String::from("filename,category\n");
        for (i, label) in labels.iter().enumerate() {
            let dir = root.join("images").join(format!("{label:02}"));
            fs::create_dir_all(&dir).unwrap();
            let file = format!("{split}_{i}.png");
            image::RgbImage::from_fn(8, 8, |x, y| image::Rgb([(*label as u8) * 10, x as u8 * 30, y as u8 * 30]))
                .save(dir.join(&file))
                .unwrap();
            csv.push_str(&format!("{file},{label}\n"));
        }
        fs::write(root.join(format!("fold0_{split}.csv")), csv).unwrap();
    }
}

fn args_for(root: &Path, extra: &[&str]) -> TrainArgs {
    let config = root.join("product-train.toml");
    fs::write(
        &config,
        format!(
            "[data]\nroot = \"{}\"\nimage_root = \"{}\"\nimage_size = 16\nnum_workers = 1\n\n[train]\nseed = 7\n",
            root.display(),
            root.join("images").display()
        ),
    )
    .unwrap();
    let config = config.display().to_string();
    let ckpt_dir = root.join("ckpt").display().to_string();
    let mut argv = vec![
        "train",
        "B1NS",
        "2",
        "--config",
        config.as_str(),
        "--epochs",
        "1",
        "--checkpoint-dir",
        ckpt_dir.as_str(),
    ];
    argv.extend_from_slice(extra);
    TrainArgs::parse_from(argv)
}

#[test]
fn one_epoch_writes_checkpoint_and_finite_best() {
    let tmp = tempfile::tempdir().unwrap();
    write_dataset(tmp.path());

    let run = run_train(args_for(tmp.path(), &[])).expect("training run");
    assert!(run.valid_loss_min < f64::INFINITY);
    assert_eq!(run.checkpoint_path, tmp.path().join("ckpt").join("model_B1NS.pt"));
    assert!(run.checkpoint_path.exists());

    assert_eq!(run.history.len(), 1);
    let epoch = &run.history[0];
    assert!(epoch.checkpoint_saved);
    assert_eq!(epoch.val.samples, 2);
    assert_eq!(epoch.train.batches, 1);
    assert!((0.0..=1.0).contains(&epoch.val.accuracy));

    let device = Default::default();
    let model = ProductClassifier::<B>::new(ProductClassifierConfig::new(ArchKind::B1Ns), &device);
    let model = load_checkpoint::<B, _>(model, &run.checkpoint_path, &device).unwrap();
    let logits = model.forward(Tensor::<B, 4>::zeros([1, 3, 16, 16], &device));
    assert_eq!(logits.dims(), [1, 42]);
}

#[test]
fn resumed_best_loss_suppresses_checkpoint() {
    let tmp = tempfile::tempdir().unwrap();
    write_dataset(tmp.path());

    let run = run_train(args_for(tmp.path(), &["--valid-loss-min=-1000", "--loss", "cross-entropy"]))
        .expect("training run");
    assert_eq!(run.valid_loss_min, -1000.0);
    assert!(!run.history[0].checkpoint_saved);
    assert!(!run.checkpoint_path.exists());
}

#[test]
fn missing_manifest_fails_the_run() {
    let tmp = tempfile::tempdir().unwrap();
    let missing = tmp.path().join("absent.csv").display().to_string();
    let args = args_for(tmp.path(), &["--train-manifest", missing.as_str()]);
    assert!(run_train(args).is_err());
}
