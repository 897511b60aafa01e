//! Dataset loading and Burn-compatible batching for product-image classification.
//!
//! This crate provides:
//! - CSV manifest loading (`filename,category[,path]`) with category validation
//! - A resize/augment/normalise transform pipeline
//! - Per-epoch batch iteration with parallel decoding

pub mod aug;
pub mod batch;
pub mod manifest;
pub mod types;

pub use aug::{TransformConfig, TransformPipeline};
pub use batch::{BatchIter, LoaderConfig, ProductBatch, ProductLoader};
pub use manifest::Manifest;
pub use types::*;
