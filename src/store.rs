//! The trial-scoped artifact store.
//!
//! Every artifact a run writes lives under one trial directory:
//!
//! ```text
//! {resourcePrefix}/{trialPath}/
//!     {fileName}_{generationID}_{memberID}.json      member descriptions
//!     NeuralNet/
//!         {fileName}_{component}_{gen}_{index}.nnw   neural weight vectors
//!     OutputMembers/                                 post-processing exports
//!     summary.txt                                    run summary
//! ```
//!
//! Writers never lock: filenames are derived deterministically from the
//! component, generation, and population or member index, so no two writers
//! ever touch the same file.

use crate::config::RunConfig;
use crate::error::RunError;
use crate::evo::{Generation, Member};
use std::path::{Path, PathBuf};

pub const NEURAL_NET_DIRECTORY: &str = "NeuralNet";
pub const OUTPUT_MEMBERS_DIRECTORY: &str = "OutputMembers";
pub const SUMMARY_FILE: &str = "summary.txt";

/// Reads and writes member descriptions and neural weight files under the
/// trial directory.
#[derive(Debug, Clone)]
pub struct TrialStore {
    trial_directory: PathBuf,
    file_prefix: String,
}

impl TrialStore {
    /// Create the store and its directory layout.
    pub fn new(config: &RunConfig) -> Result<Self, RunError> {
        let this = Self {
            trial_directory: config.trial_directory(),
            file_prefix: config.path_info.file_name.clone(),
        };
        for directory in [
            this.trial_directory.clone(),
            this.trial_directory.join(NEURAL_NET_DIRECTORY),
            this.trial_directory.join(OUTPUT_MEMBERS_DIRECTORY),
        ] {
            std::fs::create_dir_all(&directory).map_err(|source| RunError::Artifact {
                path: directory.clone(),
                source,
            })?;
        }
        Ok(this)
    }

    pub fn trial_directory(&self) -> &Path {
        &self.trial_directory
    }

    /// Basename of a member description file.
    pub fn member_filename(&self, generation_id: i64, member_id: usize) -> String {
        format!("{}_{}_{}.json", self.file_prefix, generation_id, member_id)
    }

    /// Basename of a neural weight file.
    pub fn weights_filename(&self, component: &str, generation_id: i64, index: usize) -> String {
        format!("{}_{}_{}_{}.nnw", self.file_prefix, component, generation_id, index)
    }

    /// Path of a weight file relative to the trial directory, as recorded on
    /// the candidate and resolved by the simulator.
    pub fn weights_relative_path(&self, component: &str, generation_id: i64, index: usize) -> String {
        format!(
            "{}/{}",
            NEURAL_NET_DIRECTORY,
            self.weights_filename(component, generation_id, index)
        )
    }

    /// Persist one fully assembled member. Records the path on the member
    /// and returns the basename, which trial jobs reference.
    pub fn save_member(&self, member: &mut Member) -> Result<String, RunError> {
        let basename = self.member_filename(member.generation_id, member.member_id);
        let path = self.trial_directory.join(&basename);
        let json = serde_json::to_string_pretty(member)?;
        std::fs::write(&path, json).map_err(|source| RunError::Artifact {
            path: path.clone(),
            source,
        })?;
        member.path = Some(path);
        Ok(basename)
    }

    /// Persist every member of a generation, in member order.
    pub fn save_generation(&self, generation: &mut Generation) -> Result<(), RunError> {
        for member in &mut generation.members {
            self.save_member(member)?;
        }
        Ok(())
    }

    /// Serialize a weight vector as comma-joined plain text, no trailing
    /// newline. `relative` is a path under the trial directory.
    pub fn write_weights(&self, relative: &str, weights: &[f64]) -> Result<(), RunError> {
        let path = self.trial_directory.join(relative);
        let text = weights.iter().map(f64::to_string).collect::<Vec<_>>().join(",");
        std::fs::write(&path, text).map_err(|source| RunError::Artifact { path, source })
    }

    /// Re-parse a comma-joined weight file.
    pub fn read_weights(&self, relative: &str) -> Result<Vec<f64>, RunError> {
        let path = self.trial_directory.join(relative);
        let text = std::fs::read_to_string(&path)
            .map_err(|source| RunError::Artifact { path: path.clone(), source })?;
        text.split(',')
            .map(|field| field.trim().parse::<f64>())
            .collect::<Result<Vec<f64>, _>>()
            .map_err(|err| RunError::Artifact {
                path,
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, err),
            })
    }

    /// Append-or-create the run summary file.
    pub fn write_summary(&self, text: &str) -> Result<(), RunError> {
        use std::io::Write;
        let path = self.trial_directory.join(SUMMARY_FILE);
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| RunError::Artifact { path: path.clone(), source })?;
        writeln!(file, "{text}").map_err(|source| RunError::Artifact { path, source })
    }
}
