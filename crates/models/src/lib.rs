//! Burn classifier architectures for product-image fine-tuning.
//!
//! The crate exposes one module, [`ProductClassifier`], whose backbone is an
//! EfficientNet-shaped conv stack (output stride 32, swish activations) and whose
//! final layer is a `Linear(feature_width, num_classes)` classifier. The variant is
//! chosen through [`ArchKind`], which maps each tag to a fixed [`ArchSpec`] table
//! entry instead of a chain of string comparisons.
//!
//! These are pure Burn modules; the `training` crate owns loss, optimisation and
//! checkpointing.

use burn::module::{Ignored, Module};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d};
use burn::tensor::activation::silu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use clap::ValueEnum;
use std::fmt;

/// Number of product categories the classifier head predicts.
pub const NUM_CLASSES: usize = 42;

/// Static description of one architecture variant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArchSpec {
    /// Width of the pooled feature vector fed to the classifier.
    pub feature_width: usize,
    /// Square input resolution the variant was designed for.
    pub input_size: u32,
    /// Dropout applied before the classifier.
    pub dropout: f64,
    pub stem_channels: usize,
    /// Output channels of each strided stage after the stem.
    pub stage_channels: &'static [usize],
}

const B1NS: ArchSpec = ArchSpec {
    feature_width: 1280,
    input_size: 240,
    dropout: 0.2,
    stem_channels: 32,
    stage_channels: &[16, 24, 40, 80],
};

const B5NS: ArchSpec = ArchSpec {
    feature_width: 2048,
    input_size: 456,
    dropout: 0.4,
    stem_channels: 48,
    stage_channels: &[24, 40, 64, 128],
};

const B6NS: ArchSpec = ArchSpec {
    feature_width: 2304,
    input_size: 528,
    dropout: 0.5,
    stem_channels: 56,
    stage_channels: &[32, 40, 72, 144],
};

const B7NS: ArchSpec = ArchSpec {
    feature_width: 2560,
    input_size: 600,
    dropout: 0.5,
    stem_channels: 64,
    stage_channels: &[32, 48, 80, 160],
};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchKind {
    #[value(name = "B1NS")]
    B1Ns,
    #[value(name = "B5NS")]
    B5Ns,
    #[value(name = "B6NS")]
    B6Ns,
    #[value(name = "B7NS")]
    B7Ns,
}

impl ArchKind {
    pub const ALL: [ArchKind; 4] = [
        ArchKind::B1Ns,
        ArchKind::B5Ns,
        ArchKind::B6Ns,
        ArchKind::B7Ns,
    ];

    pub fn spec(self) -> &'static ArchSpec {
        match self {
            ArchKind::B1Ns => &B1NS,
            ArchKind::B5Ns => &B5NS,
            ArchKind::B6Ns => &B6NS,
            ArchKind::B7Ns => &B7NS,
        }
    }

    pub fn feature_width(self) -> usize {
        self.spec().feature_width
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ArchKind::B1Ns => "B1NS",
            ArchKind::B5Ns => "B5NS",
            ArchKind::B6Ns => "B6NS",
            ArchKind::B7Ns => "B7NS",
        }
    }

    /// Checkpoint file name used for this architecture (`model_<ARCH>.pt`).
    pub fn checkpoint_file_name(self) -> String {
        format!("model_{}.pt", self.as_str())
    }
}

impl fmt::Display for ArchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ProductClassifierConfig {
    pub arch: ArchKind,
    pub num_classes: usize,
    /// Overrides the variant's default dropout when set.
    pub dropout: Option<f64>,
}

impl ProductClassifierConfig {
    pub fn new(arch: ArchKind) -> Self {
        Self {
            arch,
            num_classes: NUM_CLASSES,
            dropout: None,
        }
    }
}

#[derive(Debug, Module)]
pub struct ProductClassifier<B: Backend> {
    stem: Conv2d<B>,
    stages: Vec<Conv2d<B>>,
    head: Conv2d<B>,
    pool: AdaptiveAvgPool2d,
    dropout: Dropout,
    classifier: Linear<B>,
    arch: Ignored<ArchKind>,
}

fn strided_conv<B: Backend>(channels: [usize; 2], device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new(channels, [3, 3])
        .with_stride([2, 2])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .init(device)
}

impl<B: Backend> ProductClassifier<B> {
    pub fn new(cfg: ProductClassifierConfig, device: &B::Device) -> Self {
        let spec = cfg.arch.spec();
        let stem = strided_conv([3, spec.stem_channels], device);

        let mut stages = Vec::with_capacity(spec.stage_channels.len());
        let mut in_channels = spec.stem_channels;
        for &out_channels in spec.stage_channels {
            stages.push(strided_conv([in_channels, out_channels], device));
            in_channels = out_channels;
        }

        let head = Conv2dConfig::new([in_channels, spec.feature_width], [1, 1])
            .with_padding(PaddingConfig2d::Valid)
            .init(device);
        let pool = AdaptiveAvgPool2dConfig::new([1, 1]).init();
        let dropout = DropoutConfig::new(cfg.dropout.unwrap_or(spec.dropout)).init();
        let classifier = LinearConfig::new(spec.feature_width, cfg.num_classes.max(1)).init(device);

        Self {
            stem,
            stages,
            head,
            pool,
            dropout,
            classifier,
            arch: Ignored(cfg.arch),
        }
    }

    pub fn arch(&self) -> ArchKind {
        self.arch.0
    }

    /// Pooled backbone features, shape `[batch, feature_width]`.
    pub fn features(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = silu(self.stem.forward(images));
        for stage in &self.stages {
            x = silu(stage.forward(x));
        }
        let x = silu(self.head.forward(x));
        let x = self.pool.forward(x);
        let [batch, width, _, _] = x.dims();
        x.reshape([batch, width])
    }

    /// Class logits, shape `[batch, num_classes]`.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.features(images);
        let x = self.dropout.forward(x);
        self.classifier.forward(x)
    }

    /// Human-readable architecture summary logged at start-up.
    pub fn describe(&self) -> String {
        let arch = self.arch();
        let spec = arch.spec();
        let mut channels = vec![spec.stem_channels];
        channels.extend_from_slice(spec.stage_channels);
        let [in_features, out_features] = self.classifier.weight.dims();
        format!(
            "ProductClassifier(arch={} stem+stages={:?} head=1x1->{} pool=avg dropout={:.2} classifier=Linear({}, {}) params={})",
            arch,
            channels,
            spec.feature_width,
            self.dropout.prob,
            in_features,
            out_features,
            self.num_params()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn arch_table_matches_classifier_widths() {
        let widths: Vec<usize> = ArchKind::ALL.iter().map(|a| a.feature_width()).collect();
        assert_eq!(widths, vec![1280, 2048, 2304, 2560]);
    }

    #[test]
    fn arch_parses_case_insensitively() {
        assert_eq!(ArchKind::from_str("B6NS", true), Ok(ArchKind::B6Ns));
        assert_eq!(ArchKind::from_str("b7ns", true), Ok(ArchKind::B7Ns));
        assert!(ArchKind::from_str("B0", true).is_err());
    }

    #[test]
    fn checkpoint_name_uses_arch_tag() {
        assert_eq!(ArchKind::B5Ns.checkpoint_file_name(), "model_B5NS.pt");
    }

    #[test]
    fn forward_produces_class_logits() {
        let device = Default::default();
        let model = ProductClassifier::<B>::new(ProductClassifierConfig::new(ArchKind::B1Ns), &device);
        let images = Tensor::<B, 4>::zeros([2, 3, 16, 16], &device);
        assert_eq!(model.features(images.clone()).dims(), [2, 1280]);
        assert_eq!(model.forward(images).dims(), [2, NUM_CLASSES]);
        assert!(model.describe().contains("Linear(1280, 42)"));
    }
}
