use std::{collections::BTreeMap, fmt::Debug, mem, path::Path};

use anyhow::{Context, Result};
use log::{debug, info};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::{
    checkpoint::{Checkpoint, HistoryRecord, Metadata, SamplerHistory, StateValue},
    error::RtoError,
    samples::Samples,
    storage::{BatchSettings, BatchWriter},
};

/// Name of the state entry holding the current point.
pub const CURRENT_POINT: &str = "current_point";

/// Settings shared by every sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SamplerSettings {
    /// Seed of the sampler's random number generator. The generator is
    /// reseeded on every (re-)initialization.
    pub seed: u64,
}

/// Result of a single transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub point: Vec<f64>,
    pub acceptance: f64,
}

/// The algorithm specific part of a sampler. The lifecycle around it is
/// handled by [`Sampler`].
pub trait SamplerKernel: Debug {
    type Target;

    /// Tag stored in checkpoints.
    const NAME: &'static str;

    /// Entries [`SamplerKernel::state`] has to provide after `precompute`.
    const STATE_KEYS: &'static [&'static str] = &[];

    /// Reject targets the algorithm cannot handle.
    fn validate_target(&self, target: &Self::Target) -> crate::Result<()>;

    /// Prepare everything that only depends on the target.
    fn precompute(&mut self, target: &Self::Target) -> crate::Result<()>;

    fn dim(&self, target: &Self::Target) -> usize;

    fn default_initial_point(&self, target: &Self::Target) -> Vec<f64> {
        vec![0.; self.dim(target)]
    }

    fn step<R: Rng + ?Sized>(
        &mut self,
        target: &Self::Target,
        current: &[f64],
        rng: &mut R,
    ) -> crate::Result<Step>;

    /// Adapt parameters during warmup. `round` counts tuning calls.
    fn tune(&mut self, _interval: usize, _round: usize) {}

    /// Additional state entries besides the current point.
    fn state(&self) -> BTreeMap<String, StateValue> {
        BTreeMap::new()
    }

    /// Check that `value` could be restored under `key`, without touching
    /// the kernel. By default it must replace an entry of the same kind
    /// and length.
    fn check_state_value(&self, key: &str, value: &StateValue) -> crate::Result<()> {
        let state = self.state();
        let Some(current) = state.get(key) else {
            return Err(RtoError::UnknownStateKey {
                sampler: Self::NAME.into(),
                key: key.to_string(),
            });
        };
        match (current, value) {
            (StateValue::Vector(current), StateValue::Vector(value)) if current.len() != value.len() => {
                Err(RtoError::dim("restored state vector", current.len(), value.len()))
            }
            _ if mem::discriminant(current) != mem::discriminant(value) => {
                Err(RtoError::InvalidStateValue { key: key.to_string() })
            }
            _ => Ok(()),
        }
    }

    fn set_state_value(&mut self, key: &str, _value: &StateValue) -> crate::Result<()> {
        Err(RtoError::UnknownStateKey {
            sampler: Self::NAME.into(),
            key: key.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Initialized,
    Sampling,
    Warmup,
}

type Callback = Box<dyn FnMut(&[f64], usize)>;

/// Drives a [`SamplerKernel`] through initialization, sampling, warmup and
/// checkpointing.
///
/// Not meant to be shared between threads; every step is a blocking solve.
pub struct Sampler<K: SamplerKernel> {
    kernel: K,
    target: Option<K::Target>,
    settings: SamplerSettings,
    rng: ChaCha8Rng,
    initial_point: Option<Vec<f64>>,
    current_point: Option<Vec<f64>>,
    history: Option<SamplerHistory>,
    callback: Option<Callback>,
    phase: Phase,
}

impl<K: SamplerKernel> Debug for Sampler<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("kernel", &self.kernel)
            .field("settings", &self.settings)
            .field("phase", &self.phase)
            .field("draws", &self.history.as_ref().map(SamplerHistory::len))
            .finish_non_exhaustive()
    }
}

impl<K: SamplerKernel> Sampler<K> {
    pub fn new(kernel: K, settings: SamplerSettings) -> Self {
        Self {
            kernel,
            target: None,
            settings,
            rng: ChaCha8Rng::seed_from_u64(settings.seed),
            initial_point: None,
            current_point: None,
            history: None,
            callback: None,
            phase: Phase::Uninitialized,
        }
    }

    pub fn with_target(kernel: K, target: K::Target, settings: SamplerSettings) -> crate::Result<Self> {
        let mut sampler = Self::new(kernel, settings);
        sampler.set_target(target)?;
        Ok(sampler)
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub fn target(&self) -> Option<&K::Target> {
        self.target.as_ref()
    }

    pub fn settings(&self) -> &SamplerSettings {
        &self.settings
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Validate and install a new target, then re-initialize.
    pub fn set_target(&mut self, target: K::Target) -> crate::Result<()> {
        self.kernel.validate_target(&target)?;
        self.target = Some(target);
        self.initialize()
    }

    /// Reset the chain to its initial point with an empty history.
    pub fn initialize(&mut self) -> crate::Result<()> {
        let target = self.target.as_ref().ok_or(RtoError::MissingTarget)?;
        self.kernel.precompute(target)?;
        let state = self.kernel.state();
        if let Some(key) = K::STATE_KEYS.iter().find(|key| !state.contains_key(**key)) {
            return Err(RtoError::IncompleteInitialization((*key).into()));
        }
        let dim = self.kernel.dim(target);
        let point = match &self.initial_point {
            Some(point) => point.clone(),
            None => self.kernel.default_initial_point(target),
        };
        if point.len() != dim {
            return Err(RtoError::dim("initial point", dim, point.len()));
        }
        self.current_point = Some(point);
        self.history = Some(SamplerHistory::default());
        self.rng = ChaCha8Rng::seed_from_u64(self.settings.seed);
        self.phase = Phase::Initialized;
        debug!("initialized {} sampler in dimension {}", K::NAME, dim);
        Ok(())
    }

    /// Start future chains from `point` instead of the default.
    pub fn set_initial_point(&mut self, point: Vec<f64>) -> crate::Result<()> {
        if let Some(target) = &self.target {
            let dim = self.kernel.dim(target);
            if point.len() != dim {
                return Err(RtoError::dim("initial point", dim, point.len()));
            }
        }
        self.initial_point = Some(point);
        if self.target.is_some() {
            self.initialize()?;
        }
        Ok(())
    }

    /// Called with every recorded point and its index in the history.
    pub fn set_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&[f64], usize) + 'static,
    {
        self.callback = Some(Box::new(callback));
    }

    pub fn current_point(&self) -> crate::Result<&[f64]> {
        self.current_point
            .as_deref()
            .ok_or_else(|| RtoError::IncompleteInitialization(CURRENT_POINT.into()))
    }

    fn history_mut(&mut self) -> crate::Result<&mut SamplerHistory> {
        self.history
            .as_mut()
            .ok_or_else(|| RtoError::IncompleteInitialization("history".into()))
    }

    /// One transition. The new point replaces the current one but is not
    /// recorded in the history.
    pub fn step(&mut self) -> crate::Result<Step> {
        let target = self.target.as_ref().ok_or(RtoError::MissingTarget)?;
        let current = self
            .current_point
            .as_deref()
            .ok_or_else(|| RtoError::IncompleteInitialization(CURRENT_POINT.into()))?;
        let step = self.kernel.step(target, current, &mut self.rng)?;
        self.current_point = Some(step.point.clone());
        Ok(step)
    }

    fn record(&mut self, step: Step) -> crate::Result<()> {
        let index = self.history_mut()?.len();
        if let Some(callback) = self.callback.as_mut() {
            callback(&step.point, index);
        }
        self.history_mut()?.push(step.point, step.acceptance);
        Ok(())
    }

    fn run<F>(&mut self, n: usize, phase: Phase, mut after_step: F) -> Result<()>
    where
        F: FnMut(&mut Self, usize, &[f64]) -> Result<()>,
    {
        self.history_mut()?;
        self.phase = phase;
        let outcome = (0..n).try_for_each(|index| {
            let step = self.step()?;
            after_step(self, index, &step.point)?;
            self.record(step)?;
            Ok(())
        });
        self.phase = Phase::Initialized;
        outcome
    }

    /// Draw `n` samples, appending them to the history.
    pub fn sample(&mut self, n: usize) -> Result<&mut Self> {
        self.run(n, Phase::Sampling, |_, _, _| Ok(()))
            .with_context(|| format!("Failed to draw {} samples with {}", n, K::NAME))?;
        Ok(self)
    }

    /// Draw `n` samples and also write them to batch files. The last,
    /// possibly partial, batch is flushed before returning.
    pub fn sample_batched(&mut self, n: usize, batch: BatchSettings) -> Result<usize> {
        let dim = self.current_point()?.len();
        let mut writer = BatchWriter::new(batch, dim)?;
        self.run(n, Phase::Sampling, |_, _, point| writer.add(point).map(|_| ()))
            .with_context(|| format!("Failed to draw {} samples with {}", n, K::NAME))?;
        writer.flush()?;
        Ok(writer.batches_written())
    }

    /// Draw `n` warmup samples, calling the kernel's `tune` every
    /// `max(⌈tune_freq · n⌉, 1)` steps.
    pub fn warmup(&mut self, n: usize, tune_freq: f64) -> Result<&mut Self> {
        let interval = ((tune_freq * n as f64).ceil() as usize).max(1);
        self.run(n, Phase::Warmup, |sampler, index, _| {
            if (index + 1) % interval == 0 {
                sampler.kernel.tune(interval, index / interval);
            }
            Ok(())
        })
        .with_context(|| format!("Failed to run {} warmup steps with {}", n, K::NAME))?;
        Ok(self)
    }

    pub fn get_state(&self) -> crate::Result<Checkpoint> {
        let mut state = self.kernel.state();
        state.insert(CURRENT_POINT.into(), StateValue::Vector(self.current_point()?.to_vec()));
        Ok(Checkpoint {
            metadata: self.metadata(),
            state,
        })
    }

    /// Restore a checkpoint. Nothing changes unless every entry is valid.
    pub fn set_state(&mut self, checkpoint: &Checkpoint) -> crate::Result<()> {
        self.check_metadata(&checkpoint.metadata)?;
        let dim = match (&self.current_point, &self.target) {
            (Some(current), _) => Some(current.len()),
            (None, Some(target)) => Some(self.kernel.dim(target)),
            (None, None) => None,
        };
        let mut point = None;
        for (key, value) in &checkpoint.state {
            if key != CURRENT_POINT {
                self.kernel.check_state_value(key, value)?;
                continue;
            }
            let restored = value
                .as_vector()
                .ok_or_else(|| RtoError::InvalidStateValue { key: key.clone() })?;
            if let Some(dim) = dim.filter(|dim| *dim != restored.len()) {
                return Err(RtoError::dim("restored current point", dim, restored.len()));
            }
            point = Some(restored.to_vec());
        }

        for (key, value) in checkpoint.state.iter().filter(|(key, _)| *key != CURRENT_POINT) {
            self.kernel.set_state_value(key, value)?;
        }
        if point.is_some() {
            self.current_point = point;
        }
        Ok(())
    }

    pub fn get_history(&self) -> crate::Result<HistoryRecord> {
        let history = self
            .history
            .clone()
            .ok_or_else(|| RtoError::IncompleteInitialization("history".into()))?;
        Ok(HistoryRecord {
            metadata: self.metadata(),
            history,
        })
    }

    pub fn set_history(&mut self, record: HistoryRecord) -> crate::Result<()> {
        self.check_metadata(&record.metadata)?;
        let history = record.history;
        if history.samples.len() != history.acceptance.len() {
            return Err(RtoError::dim("acceptance history", history.samples.len(), history.acceptance.len()));
        }
        if let Some(dim) = self.current_point.as_ref().map(Vec::len) {
            if let Some(bad) = history.samples.iter().find(|s| s.len() != dim) {
                return Err(RtoError::dim("restored sample", dim, bad.len()));
            }
        }
        self.history = Some(history);
        Ok(())
    }

    /// Forget state and history and start over from the initial point.
    pub fn reset(&mut self) -> crate::Result<()> {
        self.current_point = None;
        self.history = None;
        self.phase = Phase::Uninitialized;
        if self.target.is_some() {
            self.initialize()?;
        }
        Ok(())
    }

    pub fn save_checkpoint(&self, path: &Path) -> Result<()> {
        self.get_state()?.save(path)
    }

    pub fn load_checkpoint(&mut self, path: &Path) -> Result<()> {
        let checkpoint = Checkpoint::load(path)?;
        self.set_state(&checkpoint)
            .with_context(|| format!("Failed to restore checkpoint: {:?}", path))?;
        info!("restored {} state from {:?}", K::NAME, path);
        Ok(())
    }

    /// Copy of all recorded draws.
    pub fn get_samples(&self) -> crate::Result<Samples> {
        let dim = self.current_point()?.len();
        let history = self
            .history
            .as_ref()
            .ok_or_else(|| RtoError::IncompleteInitialization("history".into()))?;
        Samples::from_points(dim, &history.samples)
    }

    fn metadata(&self) -> Metadata {
        Metadata {
            sampler_type: K::NAME.into(),
        }
    }

    fn check_metadata(&self, metadata: &Metadata) -> crate::Result<()> {
        if metadata.sampler_type != K::NAME {
            return Err(RtoError::CheckpointTypeMismatch {
                expected: K::NAME.into(),
                found: metadata.sampler_type.clone(),
            });
        }
        Ok(())
    }
}
