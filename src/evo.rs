//! The generation and population data model.
//!
//! A run evolves a set of named components. Each generation, the learning
//! algorithms produce a candidate population per component, the assembler
//! samples one candidate per component into each member, and every member is
//! evaluated by one external simulation trial per terrain condition.

use crate::error::RunError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Generation index of an externally supplied seed generation. The first
/// generation produced by the run itself is numbered 0.
pub const SEED_GENERATION_ID: i64 = -1;

/// Sequence number of a candidate within the run, unique per component type.
///
/// Pure arithmetic over the component's population size: candidates of
/// generation `g` occupy the half-open block
/// `[population_size * g, population_size * (g + 1))`.
pub fn param_id(population_size: usize, generation_id: i64, population_index: usize) -> i64 {
    population_size as i64 * generation_id + population_index as i64
}

/// One concrete parameter instantiation of a component.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Run-wide sequence number, see [param_id].
    #[serde(rename = "paramID")]
    pub param_id: i64,

    /// Index of this candidate within its generation's population.
    #[serde(rename = "populationID")]
    pub population_index: usize,

    /// Generation this candidate was produced in.
    #[serde(rename = "generationID")]
    pub generation_id: i64,

    /// The parameter values themselves.
    pub params: CandidateParams,

    /// Trial scores attached after evaluation, in collection order.
    #[serde(default)]
    pub scores: Vec<f64>,
}

impl Candidate {
    /// Mean trial score, or negative infinity if this candidate has never
    /// been scored.
    pub fn mean_score(&self) -> f64 {
        if self.scores.is_empty() {
            f64::NEG_INFINITY
        } else {
            self.scores.iter().sum::<f64>() / self.scores.len() as f64
        }
    }
}

/// Parameter values of a candidate.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum CandidateParams {
    /// A plain `[instances][outputs]` grid of values, for components that
    /// declare zero internal states.
    Structural { values: Vec<Vec<f64>> },

    /// A flat weight vector plus its topology, for neural components.
    Neural {
        weights: Vec<f64>,

        #[serde(rename = "numStates")]
        states: usize,

        #[serde(rename = "numHidden")]
        hidden: usize,

        #[serde(rename = "numActions")]
        actions: usize,

        /// Relative path of the serialized weight file, filled in when the
        /// candidate is persisted.
        #[serde(rename = "neuralFilename", default)]
        weights_file: Option<String>,
    },
}

/// One simulated agent configuration: exactly one candidate per active
/// component.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Member {
    /// Unique within its generation, not globally.
    #[serde(rename = "memberID")]
    pub member_id: usize,

    #[serde(rename = "generationID")]
    pub generation_id: i64,

    /// Component name to sampled candidate.
    pub components: BTreeMap<String, Candidate>,

    /// File path this member was saved to or loaded from, or None if it has
    /// not touched the file system.
    #[serde(skip)]
    pub path: Option<PathBuf>,
}

impl Member {
    pub fn new(member_id: usize, generation_id: i64) -> Self {
        Self {
            member_id,
            generation_id,
            components: BTreeMap::new(),
            path: None,
        }
    }

    /// Load a previously saved member file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RunError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)?;
        let mut member: Member = serde_json::from_str(&data)?;
        member.path = Some(path.into());
        Ok(member)
    }
}

/// An ordered collection of members sharing one generation index.
///
/// Instantiated empty, populated append-only, then treated as immutable once
/// its trials are dispatched. The completed generation becomes the "previous
/// generation" input to the next iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub id: i64,
    pub members: Vec<Member>,
}

impl Generation {
    pub fn new(id: i64) -> Self {
        Self { id, members: Vec::new() }
    }

    pub fn add_member(&mut self, member: Member) {
        self.members.push(member);
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Generation index for the generation derived from this one.
    ///
    /// Policy, pinned by tests: an empty previous generation (no seed was
    /// imported, or the seed directory was empty) yields -1, so an unseeded
    /// run numbers its first produced generation -1 and its second 0.
    /// paramIDs stay unique because the -1 block precedes the 0 block.
    pub fn next_id(&self) -> i64 {
        if self.is_empty() { SEED_GENERATION_ID } else { self.id + 1 }
    }

    /// Extract this generation's candidates for one component, in member
    /// order. Fails if any member lacks the component, which indicates
    /// corrupted lineage and is not repaired here.
    pub fn component_population(&self, component: &str) -> Result<Vec<&Candidate>, RunError> {
        let mut population = Vec::with_capacity(self.members.len());
        for member in &self.members {
            let candidate =
                member.components.get(component).ok_or_else(|| RunError::MissingComponent {
                    component: component.to_string(),
                    member_id: member.member_id,
                    generation_id: self.id,
                })?;
            population.push(candidate);
        }
        Ok(population)
    }

    /// Assemble a full generation from per-component candidate populations.
    ///
    /// Each of the `size` members receives one candidate per component,
    /// chosen uniformly at random with replacement, independently per
    /// component and per member. A member's fitness therefore reflects a
    /// novel combination even when candidates are shared between members.
    pub fn assemble(
        populations: &BTreeMap<String, Vec<Candidate>>,
        generation_id: i64,
        size: usize,
    ) -> Self {
        let rng = &mut rand::rng();
        let mut generation = Generation::new(generation_id);
        for member_id in 0..size {
            let mut member = Member::new(member_id, generation_id);
            for (name, population) in populations {
                let pick = rng.random_range(0..population.len());
                member.components.insert(name.clone(), population[pick].clone());
            }
            generation.add_member(member);
        }
        generation
    }
}

/// Load an externally supplied directory of pre-built members as the seed
/// generation (ID -1).
///
/// A missing or invalid directory is tolerated: the run proceeds from an
/// empty seed generation. An unreadable or unparsable file inside a valid
/// directory is an error.
pub fn import_seed(seed_directory: Option<&Path>) -> Result<Generation, RunError> {
    let mut generation = Generation::new(SEED_GENERATION_ID);
    let Some(directory) = seed_directory else {
        return Ok(generation);
    };
    if !directory.is_dir() {
        log::warn!("seed directory {directory:?} is not a readable directory, starting unseeded");
        return Ok(generation);
    }
    for entry in directory.read_dir()? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let member = Member::load(entry.path())?;
        log::info!("imported seed member {} from {:?}", member.member_id, entry.path());
        generation.add_member(member);
    }
    Ok(generation)
}
