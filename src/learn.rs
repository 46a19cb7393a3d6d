//! The population generator and its pluggable learning algorithms.
//!
//! For each component, every generation: build the empty parameter template
//! from the component's declared topology, hand it to the configured learning
//! algorithm together with the previous generation, then post-process the raw
//! population into [Candidate]s with paramIDs, empty score lists, and
//! file-backed neural weight vectors.

use crate::config::{AlgorithmSpec, ComponentSpec, NetworkSpec};
use crate::error::RunError;
use crate::evo::{Candidate, CandidateParams, Generation, param_id};
use crate::store::TrialStore;
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Shape of an unfilled candidate, derived from the component topology.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Template {
    /// Zero internal states: a plain `[instances][outputs]` value grid.
    Structural { instances: usize, outputs: usize },

    /// A flat weight vector of [NetworkSpec::weight_count] parameters.
    Neural {
        states: usize,
        hidden: usize,
        outputs: usize,
        weight_count: usize,
    },
}

impl Template {
    pub fn from_network(network: &NetworkSpec) -> Self {
        if network.states == 0 {
            Template::Structural {
                instances: network.instances,
                outputs: network.outputs,
            }
        } else {
            Template::Neural {
                states: network.states,
                hidden: network.hidden,
                outputs: network.outputs,
                weight_count: network.weight_count(),
            }
        }
    }

    /// Fill the template with values drawn from a closure.
    fn fill(&self, mut draw: impl FnMut() -> f64) -> CandidateParams {
        match *self {
            Template::Structural { instances, outputs } => CandidateParams::Structural {
                values: (0..instances)
                    .map(|_| (0..outputs).map(|_| draw()).collect())
                    .collect(),
            },
            Template::Neural {
                states,
                hidden,
                outputs,
                weight_count,
            } => CandidateParams::Neural {
                weights: (0..weight_count).map(|_| draw()).collect(),
                states,
                hidden,
                actions: outputs,
                weights_file: None,
            },
        }
    }
}

/// A learning algorithm turns a component specification and the previous
/// generation into a raw candidate population of exactly
/// `spec.population_size` parameter sets.
pub trait LearningAlgorithm {
    fn generate(
        &self,
        component: &str,
        spec: &ComponentSpec,
        template: &Template,
        previous: &Generation,
    ) -> Result<Vec<CandidateParams>, RunError>;
}

/// Select the learning algorithm implementation named by the configuration.
pub fn learning_algorithm(spec: &AlgorithmSpec) -> Result<Box<dyn LearningAlgorithm>, RunError> {
    match *spec {
        AlgorithmSpec::MonteCarlo { min, max } => Ok(Box::new(MonteCarlo { min, max })),
        AlgorithmSpec::Evolution {
            elite_fraction,
            mutation_sigma,
        } => {
            let noise = Normal::new(0.0, mutation_sigma)
                .map_err(|err| RunError::Config(format!("invalid mutationSigma: {err}")))?;
            Ok(Box::new(Evolution {
                elite_fraction,
                noise,
            }))
        }
    }
}

/// Uniform random sampling within a fixed range, independent of history.
pub struct MonteCarlo {
    pub min: f64,
    pub max: f64,
}

impl LearningAlgorithm for MonteCarlo {
    fn generate(
        &self,
        _component: &str,
        spec: &ComponentSpec,
        template: &Template,
        _previous: &Generation,
    ) -> Result<Vec<CandidateParams>, RunError> {
        let rng = &mut rand::rng();
        Ok((0..spec.population_size)
            .map(|_| template.fill(|| rng.random_range(self.min..=self.max)))
            .collect())
    }
}

/// Truncation selection on mean trial score plus gaussian mutation.
///
/// Falls back to uniform random initialization when there is no previous
/// generation to learn from.
pub struct Evolution {
    elite_fraction: f64,
    noise: Normal<f64>,
}

impl Evolution {
    fn mutate(&self, parent: &CandidateParams, rng: &mut impl Rng) -> CandidateParams {
        match parent {
            CandidateParams::Structural { values } => CandidateParams::Structural {
                values: values
                    .iter()
                    .map(|row| row.iter().map(|v| v + self.noise.sample(rng)).collect())
                    .collect(),
            },
            CandidateParams::Neural {
                weights,
                states,
                hidden,
                actions,
                ..
            } => CandidateParams::Neural {
                weights: weights.iter().map(|w| w + self.noise.sample(rng)).collect(),
                states: *states,
                hidden: *hidden,
                actions: *actions,
                // The child gets its own weight file when persisted.
                weights_file: None,
            },
        }
    }
}

impl LearningAlgorithm for Evolution {
    fn generate(
        &self,
        component: &str,
        spec: &ComponentSpec,
        template: &Template,
        previous: &Generation,
    ) -> Result<Vec<CandidateParams>, RunError> {
        let rng = &mut rand::rng();
        if previous.is_empty() {
            return Ok((0..spec.population_size)
                .map(|_| template.fill(|| rng.random_range(-1.0..=1.0)))
                .collect());
        }
        let mut parents = previous.component_population(component)?;
        parents.sort_by(|a, b| b.mean_score().total_cmp(&a.mean_score()));
        let elites = ((parents.len() as f64 * self.elite_fraction).ceil() as usize)
            .clamp(1, parents.len());
        parents.truncate(elites);
        Ok((0..spec.population_size)
            .map(|index| self.mutate(&parents[index % parents.len()].params, rng))
            .collect())
    }
}

/// Produce the labeled candidate population for one component.
///
/// Assigns paramIDs from the generation/population arithmetic, initializes
/// empty score lists, and serializes every neural weight vector to its own
/// `.nnw` file under the trial directory, recording the relative path on the
/// candidate.
pub fn generate_population(
    component: &str,
    spec: &ComponentSpec,
    previous: &Generation,
    generation_id: i64,
    store: &TrialStore,
) -> Result<Vec<Candidate>, RunError> {
    let template = Template::from_network(&spec.network);
    let algorithm = learning_algorithm(&spec.algorithm)?;
    let raw = algorithm.generate(component, spec, &template, previous)?;
    debug_assert_eq!(raw.len(), spec.population_size);

    let mut population = Vec::with_capacity(raw.len());
    for (index, mut params) in raw.into_iter().enumerate() {
        if let CandidateParams::Neural {
            weights,
            weights_file,
            ..
        } = &mut params
        {
            let relative = store.weights_relative_path(component, generation_id, index);
            store.write_weights(&relative, weights)?;
            *weights_file = Some(relative);
        }
        population.push(Candidate {
            param_id: param_id(spec.population_size, generation_id, index),
            population_index: index,
            generation_id,
            params,
            scores: Vec::new(),
        });
    }
    Ok(population)
}
