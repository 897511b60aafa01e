//! Core types and error definitions for product_dataset.

use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, DatasetError>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("csv error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("manifest validation failed at {path} (row {row}): {msg}")]
    Validation {
        path: PathBuf,
        row: usize,
        msg: String,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to start loader worker pool: {0}")]
    WorkerPool(String),
    #[error("{0}")]
    Other(String),
}

/// Which split a loader serves. Only `Train` applies augmentation and shuffling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Split {
    Train,
    Val,
}

impl Split {
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One resolved manifest entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRow {
    pub image: PathBuf,
    pub label: u32,
}

/// A decoded, transformed sample ready for batching.
#[derive(Debug, Clone)]
pub struct ProductSample {
    /// Image in CHW layout, normalised with ImageNet mean/std.
    pub image_chw: Vec<f32>,
    pub width: u32,
    pub height: u32,
    pub label: u32,
}

// Raw CSV record; `path` is optional and overrides the category-folder layout.
#[derive(Debug, Deserialize)]
pub(crate) struct ManifestRecord {
    pub(crate) filename: String,
    pub(crate) category: i64,
    #[serde(default)]
    pub(crate) path: Option<String>,
}
