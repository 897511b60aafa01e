use burn_ndarray::NdArray;
use product_dataset::{
    DatasetError, LoaderConfig, Manifest, ProductLoader, Split, TransformConfig, TransformPipeline,
};
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

type B = NdArray<f32>;

/// Writes `labels.len()` tiny PNGs in the category-folder layout plus a manifest.
fn synthetic_split(root: &Path, name: &str, labels: &[u32]) -> Result<PathBuf, Box<dyn Error>> {
    let mut csv = String::from("filename,category\n");
    for (i, label) in labels.iter().enumerate() {
        let dir = root.join(format!("{label:02}"));
        fs::create_dir_all(&dir)?;
        let file = format!("{name}_{i}.png");
        let img = image::RgbImage::from_fn(6, 5, |x, y| {
            image::Rgb([(*label as u8).wrapping_mul(5), x as u8 * 20, y as u8 * 30])
        });
        img.save(dir.join(&file))?;
        csv.push_str(&format!("{file},{label}\n"));
    }
    let manifest = root.join(format!("{name}.csv"));
    fs::write(&manifest, csv)?;
    Ok(manifest)
}

fn loader(root: &Path, manifest: &Path, split: Split, batch_size: usize, seed: u64) -> ProductLoader {
    let manifest = Manifest::load(manifest, root, 42).expect("manifest");
    let transform = match split {
        Split::Train => TransformConfig::train(8),
        Split::Val => TransformConfig::val(8),
    }
    .with_seed(Some(seed));
    ProductLoader::new(
        split,
        manifest,
        TransformPipeline::new(transform),
        LoaderConfig::for_split(split, batch_size, 2, Some(seed)),
    )
    .expect("loader")
}

#[test]
fn manifest_resolves_category_folders() {
    let tmp = tempfile::tempdir().unwrap();
    let path = synthetic_split(tmp.path(), "val", &[3, 41]).unwrap();
    let manifest = Manifest::load(&path, tmp.path(), 42).unwrap();
    assert_eq!(manifest.len(), 2);
    assert_eq!(manifest.rows[0].image, tmp.path().join("03").join("val_0.png"));
    assert_eq!(manifest.rows[1].label, 41);
    let counts = manifest.class_counts(42);
    assert_eq!(counts[3], 1);
    assert_eq!(counts.iter().sum::<usize>(), 2);
}

#[test]
fn manifest_rejects_out_of_range_category() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("bad.csv");
    fs::write(&path, "filename,category\na.png,1\nb.png,42\n").unwrap();
    match Manifest::load(&path, tmp.path(), 42) {
        Err(DatasetError::Validation { row, .. }) => assert_eq!(row, 2),
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn missing_manifest_is_an_error() {
    let tmp = tempfile::tempdir().unwrap();
    assert!(Manifest::load(&tmp.path().join("nope.csv"), tmp.path(), 42).is_err());
}

#[test]
fn val_batches_keep_natural_order_and_short_tail() {
    let tmp = tempfile::tempdir().unwrap();
    let labels = [0, 1, 2, 3, 4];
    let path = synthetic_split(tmp.path(), "val", &labels).unwrap();
    let loader = loader(tmp.path(), &path, Split::Val, 2, 7);
    assert_eq!(loader.len(), 5);
    assert_eq!(loader.num_batches(), 3);

    let device = Default::default();
    let mut iter = loader.iter(0);
    assert_eq!(iter.order(), &[0, 1, 2, 3, 4]);
    let mut seen = Vec::new();
    let mut sizes = Vec::new();
    while let Some(batch) = iter.next_batch::<B>(&device).unwrap() {
        assert_eq!(&batch.images.dims()[1..], &[3, 8, 8]);
        sizes.push(batch.len());
        seen.extend(batch.targets.into_data().iter::<i64>());
    }
    assert_eq!(sizes, vec![2, 2, 1]);
    assert_eq!(seen, vec![0, 1, 2, 3, 4]);
}

#[test]
fn train_shuffle_is_seeded_per_epoch() {
    let tmp = tempfile::tempdir().unwrap();
    let labels: Vec<u32> = (0..8).collect();
    let path = synthetic_split(tmp.path(), "train", &labels).unwrap();
    let loader = loader(tmp.path(), &path, Split::Train, 3, 11);

    let first = loader.iter(0).order().to_vec();
    let again = loader.iter(0).order().to_vec();
    assert_eq!(first, again);

    let mut sorted = first.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, (0..8).collect::<Vec<_>>());

    let device = Default::default();
    let mut iter = loader.iter(1);
    let expected: Vec<i64> = iter.order().iter().map(|&i| labels[i] as i64).collect();
    let mut seen = Vec::new();
    while let Some(batch) = iter.next_batch::<B>(&device).unwrap() {
        seen.extend(batch.targets.into_data().iter::<i64>());
    }
    assert_eq!(seen, expected);
}

#[test]
fn zero_batch_size_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let path = synthetic_split(tmp.path(), "val", &[1]).unwrap();
    let manifest = Manifest::load(&path, tmp.path(), 42).unwrap();
    let res = ProductLoader::new(
        Split::Val,
        manifest,
        TransformPipeline::new(TransformConfig::val(8)),
        LoaderConfig::for_split(Split::Val, 0, 1, None),
    );
    assert!(res.is_err());
}
