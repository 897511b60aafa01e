//! Image transformation and augmentation pipeline.

use crate::types::{DatasetError, DatasetResult, ManifestRow, ProductSample};
use image::imageops::FilterType;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

/// ImageNet channel means (RGB, 0..1 scale).
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet channel standard deviations (RGB, 0..1 scale).
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];
/// Eigenvalues of the ImageNet RGB covariance, used for PCA lighting noise.
pub const IMAGENET_PCA_EIGVAL: [f32; 3] = [0.2175, 0.0188, 0.0045];
/// Eigenvectors (columns) of the ImageNet RGB covariance.
pub const IMAGENET_PCA_EIGVEC: [[f32; 3]; 3] = [
    [-0.5675, 0.7192, 0.4009],
    [-0.5808, -0.0045, -0.8140],
    [-0.5836, -0.6948, 0.4203],
];

#[derive(Debug, Clone)]
pub struct TransformConfig {
    /// Resize every image to this (width, height).
    pub target_size: (u32, u32),
    /// Probability of a horizontal flip.
    pub flip_horizontal_prob: f32,
    /// Probability of a brightness/contrast jitter.
    pub color_jitter_prob: f32,
    /// Max jitter scale for brightness/contrast.
    pub color_jitter_strength: f32,
    /// Std-dev of the PCA lighting coefficients; 0 disables it.
    pub lighting_std: f32,
    /// Apply ImageNet mean/std normalisation.
    pub normalize: bool,
    /// Seed for per-sample deterministic augmentation.
    pub seed: Option<u64>,
}

impl TransformConfig {
    /// Augmenting pipeline used for the training split.
    pub fn train(size: u32) -> Self {
        Self {
            target_size: (size, size),
            flip_horizontal_prob: 0.5,
            color_jitter_prob: 0.5,
            color_jitter_strength: 0.2,
            lighting_std: 0.1,
            normalize: true,
            seed: None,
        }
    }

    /// Deterministic pipeline used for validation: resize + normalise only.
    pub fn val(size: u32) -> Self {
        Self {
            flip_horizontal_prob: 0.0,
            color_jitter_prob: 0.0,
            color_jitter_strength: 0.0,
            lighting_std: 0.0,
            ..Self::train(size)
        }
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }
}

#[derive(Debug, Clone)]
pub struct TransformPipeline {
    cfg: TransformConfig,
}

impl TransformPipeline {
    pub fn new(cfg: TransformConfig) -> Self {
        Self { cfg }
    }

    pub fn describe(&self) -> String {
        let (w, h) = self.cfg.target_size;
        format!(
            "target_size={}x{} flip_p={:.2} color_jitter_p={:.2} strength={:.2} lighting_std={:.3} normalize={} seed={}",
            w,
            h,
            self.cfg.flip_horizontal_prob,
            self.cfg.color_jitter_prob,
            self.cfg.color_jitter_strength,
            self.cfg.lighting_std,
            self.cfg.normalize,
            self.cfg
                .seed
                .map(|s| s.to_string())
                .unwrap_or_else(|| "none".to_string())
        )
    }

    /// Decode `row` from disk and run the pipeline on it.
    pub fn load(&self, row: &ManifestRow, index: usize, epoch: usize) -> DatasetResult<ProductSample> {
        let img = image::open(&row.image)
            .map_err(|source| DatasetError::Image {
                path: row.image.clone(),
                source,
            })?
            .to_rgb8();
        self.apply(img, row.label, index, epoch)
    }

    pub fn apply(
        &self,
        img: image::RgbImage,
        label: u32,
        index: usize,
        epoch: usize,
    ) -> DatasetResult<ProductSample> {
        // Seeded per (epoch, sample) when a seed is set, thread-local otherwise.
        let mut rng_local;
        let mut seeded_rng;
        let rng: &mut dyn rand::RngCore = if let Some(seed) = self.cfg.seed {
            let mixed = seed ^ ((epoch as u64) << 32) ^ index as u64;
            seeded_rng = rand::rngs::StdRng::seed_from_u64(mixed);
            &mut seeded_rng
        } else {
            rng_local = rand::rng();
            &mut rng_local
        };

        let (w, h) = self.cfg.target_size;
        if w == 0 || h == 0 {
            return Err(DatasetError::Other(format!(
                "target size must be non-zero, got {w}x{h}"
            )));
        }
        let mut img = if img.dimensions() == (w, h) {
            img
        } else {
            image::imageops::resize(&img, w, h, FilterType::Triangle)
        };

        maybe_hflip(&mut img, self.cfg.flip_horizontal_prob, rng);
        maybe_jitter(
            &mut img,
            self.cfg.color_jitter_prob,
            self.cfg.color_jitter_strength,
            rng,
        );

        let mut image_chw = to_chw(&img);
        apply_lighting(&mut image_chw, self.cfg.lighting_std, rng)?;
        if self.cfg.normalize {
            normalize_chw(&mut image_chw);
        }

        Ok(ProductSample {
            image_chw,
            width: w,
            height: h,
            label,
        })
    }
}

fn to_chw(img: &image::RgbImage) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let plane = (width * height) as usize;
    let mut image_chw = vec![0.0f32; plane * 3];
    for (x, y, pixel) in img.enumerate_pixels() {
        let base = (y * width + x) as usize;
        image_chw[base] = pixel[0] as f32 / 255.0;
        image_chw[plane + base] = pixel[1] as f32 / 255.0;
        image_chw[2 * plane + base] = pixel[2] as f32 / 255.0;
    }
    image_chw
}

pub(crate) fn normalize_chw(image_chw: &mut [f32]) {
    let plane = image_chw.len() / 3;
    for (c, channel) in image_chw.chunks_mut(plane).enumerate().take(3) {
        for v in channel.iter_mut() {
            *v = (*v - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        }
    }
}

/// AlexNet-style PCA lighting: shifts each channel by `eigvec · (alpha * eigval)`.
pub(crate) fn apply_lighting(
    image_chw: &mut [f32],
    std: f32,
    rng: &mut dyn rand::RngCore,
) -> DatasetResult<()> {
    if std <= 0.0 {
        return Ok(());
    }
    let normal = Normal::new(0.0f32, std)
        .map_err(|e| DatasetError::Other(format!("invalid lighting std {std}: {e}")))?;
    let alpha: [f32; 3] = [normal.sample(rng), normal.sample(rng), normal.sample(rng)];
    let plane = image_chw.len() / 3;
    for (c, channel) in image_chw.chunks_mut(plane).enumerate().take(3) {
        let shift: f32 = (0..3)
            .map(|k| IMAGENET_PCA_EIGVEC[c][k] * alpha[k] * IMAGENET_PCA_EIGVAL[k])
            .sum();
        for v in channel.iter_mut() {
            *v += shift;
        }
    }
    Ok(())
}

pub(crate) fn maybe_hflip(img: &mut image::RgbImage, prob: f32, rng: &mut dyn rand::RngCore) {
    if prob <= 0.0 {
        return;
    }
    if rng.random_range(0.0..1.0) < prob {
        image::imageops::flip_horizontal_in_place(img);
    }
}

pub(crate) fn maybe_jitter(
    img: &mut image::RgbImage,
    prob: f32,
    strength: f32,
    rng: &mut dyn rand::RngCore,
) {
    if prob <= 0.0 || strength <= 0.0 {
        return;
    }
    if rng.random_range(0.0..1.0) >= prob {
        return;
    }
    let bright = 1.0 + rng.random_range(-strength..strength);
    let contrast = 1.0 + rng.random_range(-strength..strength);
    for pixel in img.pixels_mut() {
        for c in 0..3 {
            let v = pixel[c] as f32 / 255.0;
            let mut v = (v - 0.5) * contrast + 0.5;
            v *= bright;
            pixel[c] = (v.clamp(0.0, 1.0) * 255.0) as u8;
        }
    }
}
