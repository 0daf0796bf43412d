use crate::{
    cluster::ClusterError,
    driver::{ChunkPolicy, ClusterAction, Phase, ScaleTarget},
    sampling::SeedPolicy,
};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path, path::PathBuf};
use thiserror::Error;
use tracing::{error, warn};

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Cluster not supported: {0}")]
    UnsupportedCluster(String),
    #[error("Cluster failed to load")]
    FailedLoadCluster(#[from] ClusterError),
    #[error("Invalid cluster.parameter.{name}: {reason}")]
    InvalidParameter { name: String, reason: &'static str },
    #[error("Failed to read config file")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config file")]
    ParseError(#[from] serde_yaml::Error),
    #[error("Config failed preflight checks")]
    PreflightFailed,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct RunnerConfig {
    // cluster the experiments are dispatched to
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub sampling: SamplingConfig,
    // phases run strictly in the given order
    pub experiments: Vec<Phase>,
    // reports are written here in addition to the log, if set
    #[serde(default)]
    pub output: Option<PathBuf>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    // Name of the selected cluster, see Clusters::load for the selection proccess
    pub name: String,
    // cluster specific parameters, e.g., `workers`, `srun`, `args`, `timeout`
    pub parameter: Option<BTreeMap<String, serde_yaml::Value>>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SamplingConfig {
    // chunk size policy for phases without their own
    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub chunking: ChunkPolicy,
    // fixed seed for reproducible runs
    #[serde(default)]
    pub seed: Option<u64>,
}

impl SamplingConfig {
    pub fn seed_policy(&self) -> SeedPolicy {
        SeedPolicy::from(self.seed)
    }
}

impl ClusterConfig {
    pub fn local(workers: usize) -> Self {
        Self {
            name: String::from("local"),
            parameter: Some(BTreeMap::from([(
                String::from("workers"),
                serde_yaml::Value::from(workers as u64),
            )])),
        }
    }

    fn get(&self, key: &str) -> Option<&serde_yaml::Value> {
        self.parameter
            .as_ref()
            .and_then(|parameters| parameters.get(key))
    }

    fn invalid(key: &str, reason: &'static str) -> ConfigErrors {
        ConfigErrors::InvalidParameter {
            name: key.to_string(),
            reason,
        }
    }

    pub fn usize_parameter(&self, key: &str) -> Result<Option<usize>, ConfigErrors> {
        self.get(key)
            .map(|value| {
                value
                    .as_u64()
                    .and_then(|number| usize::try_from(number).ok())
                    .ok_or_else(|| Self::invalid(key, "must be a natural number"))
            })
            .transpose()
    }

    pub fn f64_parameter(&self, key: &str) -> Result<Option<f64>, ConfigErrors> {
        self.get(key)
            .map(|value| {
                value
                    .as_f64()
                    .ok_or_else(|| Self::invalid(key, "must be a number"))
            })
            .transpose()
    }

    pub fn str_parameter(&self, key: &str) -> Result<Option<&str>, ConfigErrors> {
        self.get(key)
            .map(|value| {
                value
                    .as_str()
                    .ok_or_else(|| Self::invalid(key, "must be a string"))
            })
            .transpose()
    }

    pub fn strings_parameter(&self, key: &str) -> Result<Option<Vec<String>>, ConfigErrors> {
        self.get(key)
            .map(|value| {
                value
                    .as_sequence()
                    .and_then(|values| {
                        values
                            .iter()
                            .map(|value| value.as_str().map(str::to_string))
                            .collect::<Option<Vec<_>>>()
                    })
                    .ok_or_else(|| Self::invalid(key, "must be a list of strings"))
            })
            .transpose()
    }
}

fn check_chunking(scope: &str, chunking: &ChunkPolicy) -> bool {
    match chunking.validate() {
        Ok(()) => false,
        Err(reason) => {
            error!("{scope}.chunking is invalid: {reason}");
            true
        }
    }
}

impl RunnerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        let content = fs::read_to_string(path)?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigErrors> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Check the whole config, returns true if any error was found.
    /// Every problem is logged instead of stopping at the first one.
    pub fn preflight_checks(&self) -> bool {
        let mut contains_error = false;

        match self.cluster.name.to_lowercase().as_str() {
            "local" | "slurm" => {}
            name => {
                error!("cluster.name ({name}) is not supported, please use `local` or `slurm`");
                contains_error = true;
            }
        }

        if let Ok(Some(0)) = self.cluster.usize_parameter("workers") {
            error!("cluster.parameter.workers must be at least one");
            contains_error = true;
        }

        contains_error |= check_chunking("sampling", &self.sampling.chunking);

        if self.experiments.is_empty() {
            error!("No experiment was defined, nothing to run");
            contains_error = true;
        }

        for name in self
            .experiments
            .iter()
            .map(|phase| phase.name.as_str())
            .sorted()
            .group_by(|name| *name)
            .into_iter()
            .filter_map(|(name, group)| (group.count() > 1).then_some(name))
        {
            warn!("Experiment {name} is defined more than once, reports will be hard to tell apart");
        }

        for phase in self.experiments.iter() {
            let name = &phase.name;

            if phase.sizes.is_empty() {
                warn!("Experiment {name} has no sizes and will only apply its action");
            }

            for size in phase.sizes.iter() {
                if !(size.is_finite() && *size > 0.0) {
                    error!("Experiment {name} contains size {size}, sizes must be positive");
                    contains_error = true;
                }
            }

            if !(phase.settle.is_finite() && phase.settle >= 0.0) {
                error!("Experiment {name}.settle cannot be negative");
                contains_error = true;
            }

            if let Some(ref chunking) = phase.chunking {
                contains_error |= check_chunking(&format!("experiments.{name}"), chunking);
            }

            match phase.action {
                Some(ClusterAction::Scale(ScaleTarget::Workers { workers: 0 })) => {
                    error!("Experiment {name} scales to zero workers");
                    contains_error = true;
                }
                Some(ClusterAction::Scale(ScaleTarget::Factor { factor }))
                    if !(factor.is_finite() && factor > 0.0) =>
                {
                    error!("Experiment {name} scales by {factor}, the factor must be positive");
                    contains_error = true;
                }
                Some(ClusterAction::Adapt(ref policy)) => {
                    if let Err(e) = policy.validate() {
                        error!("Experiment {name}.action.adapt is invalid: {e}");
                        contains_error = true;
                    }
                }
                _ => {}
            }
        }

        contains_error
    }
}
