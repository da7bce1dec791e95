use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{ensure, Context, Result};
use log::info;
use serde::{Deserialize, Serialize};

/// Where and how often samples are flushed to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSettings {
    /// Number of samples per batch file.
    pub batch_size: usize,
    /// Directory that receives the batch files.
    pub sample_path: PathBuf,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            sample_path: PathBuf::from("./rto_samples"),
        }
    }
}

/// One flushed chunk of samples, one row per sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFile {
    pub batch_id: usize,
    pub dim: usize,
    pub samples: Vec<Vec<f64>>,
}

fn batch_path(dir: &Path, batch_id: usize) -> PathBuf {
    dir.join(format!("batch_{:04}.json", batch_id))
}

/// Buffers samples in memory and writes them out in fixed-size batches.
#[derive(Debug)]
pub struct BatchWriter {
    settings: BatchSettings,
    dim: usize,
    buffer: Vec<Vec<f64>>,
    next_batch: usize,
}

impl BatchWriter {
    pub fn new(settings: BatchSettings, dim: usize) -> Result<Self> {
        ensure!(settings.batch_size > 0, "batch size must be positive");
        fs::create_dir_all(&settings.sample_path)
            .with_context(|| format!("Failed to create sample directory: {:?}", settings.sample_path))?;
        Ok(Self {
            buffer: Vec::with_capacity(settings.batch_size),
            settings,
            dim,
            next_batch: 0,
        })
    }

    pub fn settings(&self) -> &BatchSettings {
        &self.settings
    }

    /// Number of batch files written so far.
    pub fn batches_written(&self) -> usize {
        self.next_batch
    }

    /// Buffer a sample, flushing when the batch is full.
    pub fn add(&mut self, sample: &[f64]) -> Result<Option<PathBuf>> {
        ensure!(
            sample.len() == self.dim,
            "sample of length {} does not match batch dimension {}",
            sample.len(),
            self.dim
        );
        self.buffer.push(sample.to_vec());
        if self.buffer.len() >= self.settings.batch_size {
            return self.flush();
        }
        Ok(None)
    }

    /// Write the buffered samples, if any, and start a new batch.
    pub fn flush(&mut self) -> Result<Option<PathBuf>> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        let batch = BatchFile {
            batch_id: self.next_batch,
            dim: self.dim,
            samples: std::mem::take(&mut self.buffer),
        };
        let path = batch_path(&self.settings.sample_path, batch.batch_id);
        let contents = serde_json::to_string(&batch).context("Failed to serialize sample batch")?;
        fs::write(&path, contents).with_context(|| format!("Failed to write sample batch: {:?}", path))?;
        info!("flushed {} samples to {:?}", batch.samples.len(), path);
        self.next_batch += 1;
        Ok(Some(path))
    }
}

/// Load every batch file in `dir`, ordered by batch index.
pub fn read_batches(dir: &Path) -> Result<Vec<BatchFile>> {
    let entries = fs::read_dir(dir).with_context(|| format!("Failed to read sample directory: {:?}", dir))?;
    let mut batches = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_batch = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with("batch_") && name.ends_with(".json"));
        if !is_batch {
            continue;
        }
        let contents =
            fs::read_to_string(&path).with_context(|| format!("Failed to read sample batch: {:?}", path))?;
        let batch: BatchFile =
            serde_json::from_str(&contents).with_context(|| format!("Malformed sample batch: {:?}", path))?;
        batches.push(batch);
    }
    batches.sort_by_key(|batch| batch.batch_id);
    Ok(batches)
}
