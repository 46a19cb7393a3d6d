//! Evolutionary search over controller parameters for simulated robotic
//! agents. Each generation, pluggable learning algorithms produce candidate
//! populations per controller component, members are assembled by sampling
//! across those populations and persisted to the trial directory, and one
//! external simulation trial per member and terrain condition feeds scores
//! back as the seed for the next generation.

pub mod config;
pub mod error;
pub mod evo;
pub mod jobs;
pub mod learn;
pub mod run;
pub mod store;

pub use config::RunConfig;
pub use error::RunError;
pub use evo::{Candidate, Generation, Member};
pub use run::TrialRun;
