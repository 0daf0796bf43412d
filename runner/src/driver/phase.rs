use crate::{cluster::AdaptivePolicy, sampling::DEFAULT_CHUNK_BYTES};
use serde::{Deserialize, Serialize};

/// How large the chunks of a workload are
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ChunkPolicy {
    /// the same chunk size for every workload
    Fixed {
        #[serde(default = "default_chunk_bytes")]
        bytes: f64,
    },
    /// `min(size / divisor, maximum)`, an empirical heuristic for larger workloads
    Scaled {
        #[serde(default = "default_divisor")]
        divisor: f64,
        #[serde(default = "default_maximum")]
        maximum: f64,
    },
}

fn default_chunk_bytes() -> f64 {
    DEFAULT_CHUNK_BYTES
}

fn default_divisor() -> f64 {
    1000.0
}

fn default_maximum() -> f64 {
    500e6
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self::Fixed {
            bytes: default_chunk_bytes(),
        }
    }
}

impl ChunkPolicy {
    pub fn scaled() -> Self {
        Self::Scaled {
            divisor: default_divisor(),
            maximum: default_maximum(),
        }
    }

    pub fn chunk_bytes(&self, size_bytes: f64) -> f64 {
        match self {
            Self::Fixed { bytes } => *bytes,
            Self::Scaled { divisor, maximum } => (size_bytes / divisor).min(*maximum),
        }
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        let positive = |value: f64| value.is_finite() && value > 0.0;

        match self {
            Self::Fixed { bytes } if !positive(*bytes) => Err("bytes must be positive"),
            Self::Scaled { divisor, .. } if !positive(*divisor) => Err("divisor must be positive"),
            Self::Scaled { maximum, .. } if !positive(*maximum) => Err("maximum must be positive"),
            _ => Ok(()),
        }
    }
}

/// Absolute or relative worker count of a resize request
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum ScaleTarget {
    Workers { workers: usize },
    Factor { factor: f64 },
}

impl ScaleTarget {
    /// worker count to request given the `current` one, never below one
    pub fn resolve(&self, current: usize) -> usize {
        match self {
            Self::Workers { workers } => *workers,
            Self::Factor { factor } => ((current as f64 * factor).round() as usize).max(1),
        }
    }
}

/// Request issued to the cluster before a phase runs its workloads
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ClusterAction {
    Scale(ScaleTarget),
    Adapt(AdaptivePolicy),
    /// stop adaptive scaling and keep the current size
    Fixed,
}

/// A named round of workloads, optionally preceded by a cluster action and a settle time
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Phase {
    pub name: String,
    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub action: Option<ClusterAction>,
    // seconds to wait after the action
    #[serde(default)]
    pub settle: f64,
    #[serde(default)]
    pub sizes: Vec<f64>,
    // overrides `sampling.chunking`
    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub chunking: Option<ChunkPolicy>,
}

impl Phase {
    pub fn new(name: &str, sizes: Vec<f64>) -> Self {
        Self {
            name: name.to_string(),
            action: None,
            settle: 0.0,
            sizes,
            chunking: None,
        }
    }
}
