//! Batch iteration for the train and val splits.

use crate::aug::TransformPipeline;
use crate::manifest::Manifest;
use crate::types::{DatasetError, DatasetResult, ManifestRow, ProductSample, Split};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct ProductBatch<B: Backend> {
    /// Normalised images, shape `[batch, 3, height, width]`.
    pub images: Tensor<B, 4>,
    /// Class indices, shape `[batch]`.
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> ProductBatch<B> {
    pub fn len(&self) -> usize {
        self.targets.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub batch_size: usize,
    /// Reshuffle the sample order at the start of every epoch.
    pub shuffle: bool,
    /// Seed for the per-epoch shuffle.
    pub seed: Option<u64>,
    /// Decoder threads per loader.
    pub num_workers: usize,
}

impl LoaderConfig {
    pub fn for_split(split: Split, batch_size: usize, num_workers: usize, seed: Option<u64>) -> Self {
        Self {
            batch_size,
            shuffle: split == Split::Train,
            seed,
            num_workers,
        }
    }
}

/// Owns one split's manifest rows, transform pipeline, and decoder pool.
pub struct ProductLoader {
    split: Split,
    rows: Arc<Vec<ManifestRow>>,
    pipeline: TransformPipeline,
    cfg: LoaderConfig,
    pool: rayon::ThreadPool,
}

impl ProductLoader {
    pub fn new(
        split: Split,
        manifest: Manifest,
        pipeline: TransformPipeline,
        cfg: LoaderConfig,
    ) -> DatasetResult<Self> {
        if cfg.batch_size == 0 {
            return Err(DatasetError::Other("batch size must be at least 1".to_string()));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(cfg.num_workers.max(1))
            .thread_name(move |i| format!("{split}-loader-{i}"))
            .build()
            .map_err(|e| DatasetError::WorkerPool(e.to_string()))?;
        log::debug!(
            "{split} loader: {} samples from {} ({})",
            manifest.len(),
            manifest.path.display(),
            pipeline.describe()
        );
        Ok(Self {
            split,
            rows: Arc::new(manifest.rows),
            pipeline,
            cfg,
            pool,
        })
    }

    /// Number of samples in the split (the denominator for phase metrics).
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn num_batches(&self) -> usize {
        self.rows.len().div_ceil(self.cfg.batch_size)
    }

    /// Start a pass over the split for `epoch`.
    pub fn iter(&self, epoch: usize) -> BatchIter<'_> {
        let mut order: Vec<usize> = (0..self.rows.len()).collect();
        if self.cfg.shuffle {
            let mut rng = match self.cfg.seed {
                Some(seed) => rand::rngs::StdRng::seed_from_u64(seed.wrapping_add(epoch as u64)),
                None => rand::rngs::StdRng::from_rng(&mut rand::rng()),
            };
            order.shuffle(&mut rng);
        }
        let now = Instant::now();
        BatchIter {
            loader: self,
            order,
            cursor: 0,
            epoch,
            processed_batches: 0,
            processed_samples: 0,
            total_load_time: Duration::ZERO,
            started: now,
        }
    }

    fn load_indices(&self, indices: &[usize], epoch: usize) -> DatasetResult<Vec<ProductSample>> {
        self.pool.install(|| {
            indices
                .par_iter()
                .map(|&i| self.pipeline.load(&self.rows[i], i, epoch))
                .collect()
        })
    }
}

/// One epoch's pass over a [`ProductLoader`].
pub struct BatchIter<'a> {
    loader: &'a ProductLoader,
    order: Vec<usize>,
    cursor: usize,
    epoch: usize,
    processed_batches: usize,
    processed_samples: usize,
    total_load_time: Duration,
    started: Instant,
}

impl BatchIter<'_> {
    /// Sample indices in the order this pass yields them.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn next_batch<B: Backend>(
        &mut self,
        device: &B::Device,
    ) -> DatasetResult<Option<ProductBatch<B>>> {
        if self.cursor >= self.order.len() {
            return Ok(None);
        }
        let end = (self.cursor + self.loader.cfg.batch_size).min(self.order.len());
        let t_load = Instant::now();
        let samples = self
            .loader
            .load_indices(&self.order[self.cursor..end], self.epoch)?;
        self.cursor = end;
        let load_elapsed = t_load.elapsed();

        let batch = assemble::<B>(&samples, device)?;

        self.processed_batches += 1;
        self.processed_samples += samples.len();
        self.total_load_time += load_elapsed;
        log::debug!(
            "[{}] epoch={} batch={}/{} samples={}/{} load_ms={:.2} elapsed={:.1}s",
            self.loader.split,
            self.epoch,
            self.processed_batches,
            self.loader.num_batches(),
            self.processed_samples,
            self.order.len(),
            load_elapsed.as_secs_f64() * 1000.0,
            self.started.elapsed().as_secs_f32()
        );
        Ok(Some(batch))
    }

    /// Mean decode time per batch so far, in milliseconds.
    pub fn avg_load_ms(&self) -> f64 {
        if self.processed_batches == 0 {
            return 0.0;
        }
        self.total_load_time.as_secs_f64() * 1000.0 / self.processed_batches as f64
    }
}

fn assemble<B: Backend>(samples: &[ProductSample], device: &B::Device) -> DatasetResult<ProductBatch<B>> {
    let first = samples
        .first()
        .ok_or_else(|| DatasetError::Other("cannot assemble an empty batch".to_string()))?;
    let (width, height) = (first.width, first.height);

    let mut images_buf = Vec::with_capacity(samples.len() * first.image_chw.len());
    let mut labels = Vec::with_capacity(samples.len());
    for sample in samples {
        if (sample.width, sample.height) != (width, height) {
            return Err(DatasetError::Other(format!(
                "batch contains varying image sizes: {}x{} vs {}x{}",
                sample.width, sample.height, width, height
            )));
        }
        images_buf.extend_from_slice(&sample.image_chw);
        labels.push(sample.label as i64);
    }

    let batch_len = samples.len();
    let images = Tensor::<B, 1>::from_floats(images_buf.as_slice(), device).reshape([
        batch_len,
        3,
        height as usize,
        width as usize,
    ]);
    let targets = Tensor::<B, 1, Int>::from_data(TensorData::new(labels, [batch_len]), device);
    Ok(ProductBatch { images, targets })
}
