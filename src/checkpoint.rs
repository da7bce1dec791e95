use std::{collections::BTreeMap, fs, path::Path};

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub sampler_type: String,
}

/// A single entry of the sampler state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl StateValue {
    pub fn as_vector(&self) -> Option<&[f64]> {
        match self {
            StateValue::Vector(values) => Some(values),
            StateValue::Scalar(_) => None,
        }
    }
}

/// The minimal state needed to resume a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Checkpoint {
    pub metadata: Metadata,
    pub state: BTreeMap<String, StateValue>,
}

impl Checkpoint {
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize checkpoint")?;
        fs::write(path, contents).with_context(|| format!("Failed to write checkpoint: {:?}", path))?;
        info!("wrote {} checkpoint to {:?}", self.metadata.sampler_type, path);
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("Failed to read checkpoint: {:?}", path))?;
        serde_json::from_str(&contents).with_context(|| format!("Malformed checkpoint: {:?}", path))
    }
}

/// Every accepted point and its acceptance indicator, in draw order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SamplerHistory {
    pub samples: Vec<Vec<f64>>,
    pub acceptance: Vec<f64>,
}

impl SamplerHistory {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub(crate) fn push(&mut self, point: Vec<f64>, acceptance: f64) {
        self.samples.push(point);
        self.acceptance.push(acceptance);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HistoryRecord {
    pub metadata: Metadata,
    pub history: SamplerHistory,
}
