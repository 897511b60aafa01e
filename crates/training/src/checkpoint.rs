//! Model checkpoint save/load.
//!
//! Records are written with Burn's binary recorder at full precision. The file name
//! is used exactly as given (`model_<ARCH>.pt`); writes go through a sibling temp
//! file and a rename so an interrupted save never leaves a truncated checkpoint.

use burn::module::Module;
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::backend::Backend;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode/decode checkpoint {path}: {msg}")]
    Record { path: PathBuf, msg: String },
}

type CheckpointRecorder = BinBytesRecorder<FullPrecisionSettings>;

pub fn save_checkpoint<B: Backend, M: Module<B>>(model: &M, path: &Path) -> Result<(), CheckpointError> {
    let recorder = CheckpointRecorder::default();
    let bytes = Recorder::<B>::record(&recorder, model.clone().into_record(), ()).map_err(|e| {
        CheckpointError::Record {
            path: path.to_path_buf(),
            msg: e.to_string(),
        }
    })?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| CheckpointError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes).map_err(|source| CheckpointError::Io {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, path).map_err(|source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    log::debug!("wrote checkpoint {}", path.display());
    Ok(())
}

/// Load weights from `path` into `model`, returning the updated module.
pub fn load_checkpoint<B: Backend, M: Module<B>>(
    model: M,
    path: &Path,
    device: &B::Device,
) -> Result<M, CheckpointError> {
    let bytes = fs::read(path).map_err(|source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let recorder = CheckpointRecorder::default();
    let record = Recorder::<B>::load(&recorder, bytes, device).map_err(|e| CheckpointError::Record {
        path: path.to_path_buf(),
        msg: e.to_string(),
    })?;
    Ok(model.load_record(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Tensor;
    use burn_ndarray::NdArray;
    use models::{ArchKind, ProductClassifier, ProductClassifierConfig};

    type B = NdArray<f32>;

    #[test]
    fn checkpoint_roundtrip_preserves_weights() {
        let device = Default::default();
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(ArchKind::B1Ns.checkpoint_file_name());

        let model = ProductClassifier::<B>::new(ProductClassifierConfig::new(ArchKind::B1Ns), &device);
        save_checkpoint::<B, _>(&model, &path).unwrap();
        assert!(path.exists());
        assert!(!tmp.path().join("model_B1NS.pt.tmp").exists());

        let fresh = ProductClassifier::<B>::new(ProductClassifierConfig::new(ArchKind::B1Ns), &device);
        let loaded = load_checkpoint::<B, _>(fresh, &path, &device).unwrap();
        let input = Tensor::<B, 4>::ones([1, 3, 16, 16], &device);
        let a: Vec<f32> = model.forward(input.clone()).into_data().iter::<f32>().collect();
        let b: Vec<f32> = loaded.forward(input).into_data().iter::<f32>().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn missing_checkpoint_is_io_error() {
        let device = Default::default();
        let tmp = tempfile::tempdir().unwrap();
        let model = ProductClassifier::<B>::new(ProductClassifierConfig::new(ArchKind::B1Ns), &device);
        let err = load_checkpoint::<B, _>(model, &tmp.path().join("missing.pt"), &device).unwrap_err();
        assert!(matches!(err, CheckpointError::Io { .. }));
    }
}
