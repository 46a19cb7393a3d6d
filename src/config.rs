//! Structure of run configuration files.
//!
//! A run configuration is a single JSON document with three top level
//! sections: `PathInfo`, `TrialProperties`, and a `Components` table naming
//! every independently evolved part of the agent's controller. Components are
//! declared explicitly; there is no reserved-keyword filtering of the top
//! level namespace.

use crate::error::RunError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A terrain condition: a list of `[x, y, z, angle]` box descriptors
/// handed verbatim to the simulator.
pub type Terrain = Vec<[f64; 4]>;

/// The flat terrain descriptor substituted for every trial when
/// [TerrainMode::FixedFlat] is active.
pub fn flat_terrain() -> Terrain {
    vec![[0.0, 0.0, 0.0, 0.0]]
}

/// Everything a run needs to know, parsed once at startup and read-only for
/// the lifetime of the run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunConfig {
    #[serde(rename = "PathInfo")]
    pub path_info: PathInfo,

    #[serde(rename = "TrialProperties")]
    pub trial_properties: TrialProperties,

    /// One entry per evolved component, keyed by component name.
    #[serde(rename = "Components")]
    pub components: BTreeMap<String, ComponentSpec>,
}

impl RunConfig {
    /// Load and validate a run configuration from a JSON file.
    ///
    /// Any failure here is fatal: a run without a valid configuration
    /// must not proceed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RunError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .map_err(|err| RunError::Config(format!("cannot read {path:?}: {err}")))?;
        let config: RunConfig = serde_json::from_str(&data)
            .map_err(|err| RunError::Config(format!("cannot parse {path:?}: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), RunError> {
        let trial = &self.trial_properties;
        if trial.generation_count == 0 {
            return Err(RunError::Config("generationCount must be at least 1".into()));
        }
        if trial.generation_size == 0 {
            return Err(RunError::Config("generationSize must be at least 1".into()));
        }
        if trial.processes == 0 {
            return Err(RunError::Config("processes must be at least 1".into()));
        }
        if self.components.is_empty() {
            return Err(RunError::Config("at least one component is required".into()));
        }
        for (name, spec) in &self.components {
            if spec.population_size == 0 {
                return Err(RunError::Config(format!(
                    "component {name:?}: PopulationSize must be at least 1"
                )));
            }
            match &spec.algorithm {
                AlgorithmSpec::MonteCarlo { min, max } => {
                    if !(min <= max) {
                        return Err(RunError::Config(format!(
                            "component {name:?}: sampling range is inverted"
                        )));
                    }
                }
                AlgorithmSpec::Evolution { mutation_sigma, .. } => {
                    if !(*mutation_sigma > 0.0) {
                        return Err(RunError::Config(format!(
                            "component {name:?}: mutationSigma must be positive"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Root of the trial directory tree: the resource prefix joined with the
    /// configured trial path.
    pub fn trial_directory(&self) -> PathBuf {
        Path::new(&self.path_info.resource_prefix).join(&self.path_info.trial_path)
    }
}

/// Filesystem layout of a run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PathInfo {
    /// Directory for this run's artifacts, relative to the resource prefix.
    pub trial_path: String,

    /// Filename prefix shared by every artifact this run writes.
    pub file_name: String,

    /// The simulator program that evaluates one member per invocation.
    pub executable: String,

    /// Optional directory of pre-built member files used to warm-start the
    /// run. Missing or invalid directories are tolerated.
    #[serde(default)]
    pub seed_directory: Option<PathBuf>,

    /// Prefix of the resource tree that trial paths are resolved against.
    #[serde(default = "default_resource_prefix")]
    pub resource_prefix: String,
}

fn default_resource_prefix() -> String {
    "../../../resources/src/".to_string()
}

/// Properties of the generation loop and of each simulation trial.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrialProperties {
    /// Number of generations to evolve.
    pub generation_count: usize,

    /// Number of members assembled per generation.
    pub generation_size: usize,

    /// Duration of one simulation trial, in simulator time units.
    pub trial_length: f64,

    /// Terrain conditions to evaluate each member under.
    /// One trial job is dispatched per member per entry.
    pub terrains: Vec<Terrain>,

    /// How the configured terrains are applied, see [TerrainMode].
    #[serde(default)]
    pub terrain_mode: TerrainMode,

    /// Upper bound on concurrently running simulator processes.
    #[serde(default = "default_processes")]
    pub processes: usize,

    /// Name of the score aggregation method, passed through to analysis.
    #[serde(default)]
    pub score_method: String,

    /// Name of the fitness function, passed through to analysis.
    #[serde(default)]
    pub fitness_function: String,
}

fn default_processes() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Policy for choosing the terrain descriptor of each trial job.
#[derive(Serialize, Deserialize, Debug, Default, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TerrainMode {
    /// Substitute [flat_terrain()] for every trial, regardless of what the
    /// `terrains` list contains. The number of jobs per member still follows
    /// the length of the list. This reproduces the historical behavior and
    /// is the default.
    #[default]
    FixedFlat,

    /// Use the configured terrain descriptors as given.
    Configured,
}

/// Declaration of one evolved component.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ComponentSpec {
    /// Number of candidates produced per generation for this component.
    #[serde(rename = "PopulationSize")]
    pub population_size: usize,

    /// Controller topology. A component with zero internal states is
    /// structural: its parameters are a plain `[instances][outputs]` grid
    /// rather than a neural weight vector.
    #[serde(rename = "NeuralNetwork")]
    pub network: NetworkSpec,

    /// Which learning algorithm produces this component's populations.
    #[serde(rename = "Algorithm", default)]
    pub algorithm: AlgorithmSpec,
}

impl ComponentSpec {
    pub fn is_neural(&self) -> bool {
        self.network.states > 0
    }
}

/// Neural network topology of a component.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub struct NetworkSpec {
    #[serde(rename = "numberOfStates")]
    pub states: usize,

    #[serde(rename = "numberOfInstances")]
    pub instances: usize,

    #[serde(rename = "numberOfOutputs")]
    pub outputs: usize,

    #[serde(rename = "numberOfHidden")]
    pub hidden: usize,
}

impl NetworkSpec {
    /// Length of the flat weight vector of a neural component:
    /// input-to-hidden plus hidden-to-output, with one bias per unit.
    pub fn weight_count(&self) -> usize {
        (self.states + 1) * self.hidden + (self.hidden + 1) * self.outputs
    }
}

/// Learning algorithm selection, one entry per component in the
/// configuration file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
#[serde(deny_unknown_fields)]
pub enum AlgorithmSpec {
    /// Sample every parameter uniformly at random, ignoring history.
    #[serde(alias = "montecarlo")]
    MonteCarlo {
        /// Inclusive lower bound of sampled parameters.
        #[serde(default = "default_range_min")]
        min: f64,

        /// Inclusive upper bound of sampled parameters.
        #[serde(default = "default_range_max")]
        max: f64,
    },

    /// Truncation selection on mean score plus gaussian mutation.
    #[serde(alias = "evolution")]
    Evolution {
        /// Fraction of the previous population kept as parents, in (0, 1].
        #[serde(default = "default_elite_fraction")]
        elite_fraction: f64,

        /// Standard deviation of the gaussian mutation noise.
        #[serde(default = "default_mutation_sigma")]
        mutation_sigma: f64,
    },
}

impl Default for AlgorithmSpec {
    fn default() -> Self {
        AlgorithmSpec::MonteCarlo {
            min: default_range_min(),
            max: default_range_max(),
        }
    }
}

fn default_range_min() -> f64 {
    -1.0
}

fn default_range_max() -> f64 {
    1.0
}

fn default_elite_fraction() -> f64 {
    0.5
}

fn default_mutation_sigma() -> f64 {
    0.1
}
