//! CSV manifest loading (`filename,category[,path]`).

use crate::types::{DatasetError, DatasetResult, ManifestRecord, ManifestRow};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Manifest {
    pub path: PathBuf,
    pub rows: Vec<ManifestRow>,
}

impl Manifest {
    /// Load and validate a manifest.
    ///
    /// Rows without a `path` column resolve to `<image_root>/<category:02>/<filename>`;
    /// a relative `path` is taken relative to `image_root`. Categories outside
    /// `[0, num_classes)` are rejected.
    pub fn load(path: &Path, image_root: &Path, num_classes: usize) -> DatasetResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|source| DatasetError::Csv {
                path: path.to_path_buf(),
                source,
            })?;

        let mut rows = Vec::new();
        for (row, record) in reader.deserialize::<ManifestRecord>().enumerate() {
            let record = record.map_err(|source| DatasetError::Csv {
                path: path.to_path_buf(),
                source,
            })?;
            rows.push(resolve_row(record, image_root, num_classes).map_err(|msg| {
                DatasetError::Validation {
                    path: path.to_path_buf(),
                    row: row + 1,
                    msg,
                }
            })?);
        }

        Ok(Self {
            path: path.to_path_buf(),
            rows,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Per-class sample counts, indexed by category.
    pub fn class_counts(&self, num_classes: usize) -> Vec<usize> {
        let mut counts = vec![0usize; num_classes];
        for row in &self.rows {
            if let Some(c) = counts.get_mut(row.label as usize) {
                *c += 1;
            }
        }
        counts
    }
}

fn resolve_row(
    record: ManifestRecord,
    image_root: &Path,
    num_classes: usize,
) -> Result<ManifestRow, String> {
    if record.filename.trim().is_empty() {
        return Err("empty filename".to_string());
    }
    if record.category < 0 || record.category as usize >= num_classes {
        return Err(format!(
            "category {} outside [0, {num_classes})",
            record.category
        ));
    }
    let label = record.category as u32;
    let image = match record.path.as_deref().map(str::trim) {
        Some(p) if !p.is_empty() => {
            let p = PathBuf::from(p);
            if p.is_absolute() {
                p
            } else {
                image_root.join(p)
            }
        }
        _ => image_root
            .join(format!("{label:02}"))
            .join(&record.filename),
    };
    Ok(ManifestRow { image, label })
}
