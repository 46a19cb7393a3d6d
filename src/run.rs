//! The run controller.
//!
//! Drives the generation loop end to end: import the seed generation, then
//! for each generation derive per-component populations, assemble members,
//! persist them, dispatch the trial batch, collect scores, and promote the
//! scored generation to be the next iteration's "previous". There is no
//! partial-generation recovery: a fatal error inside one generation aborts
//! the whole run.

use crate::config::RunConfig;
use crate::error::RunError;
use crate::evo::{self, Candidate, Generation};
use crate::jobs::{self, Scheduler};
use crate::learn;
use crate::store::TrialStore;
use std::collections::BTreeMap;

fn timestamp() -> String {
    use chrono::{SecondsFormat, Utc};
    let rfc3339 = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, false);
    // Replace the 'T' separator with a space.
    rfc3339.replacen('T', " ", 1)
}

/// One evolutionary run over an immutable configuration.
pub struct TrialRun {
    config: RunConfig,
    store: TrialStore,
    scheduler: Scheduler,
}

impl TrialRun {
    /// Set up the trial directory layout and the scheduler.
    pub fn new(config: RunConfig) -> Result<Self, RunError> {
        let store = TrialStore::new(&config)?;
        let scheduler = Scheduler::new(config.trial_properties.processes);
        Ok(Self {
            config,
            store,
            scheduler,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn store(&self) -> &TrialStore {
        &self.store
    }

    /// Run the configured number of generations and return the final scored
    /// generation.
    pub fn run(&self) -> Result<Generation, RunError> {
        let trial = &self.config.trial_properties;
        self.store.write_summary(&format!(
            "{} run started: {} generations of {} members, {} workers",
            timestamp(),
            trial.generation_count,
            trial.generation_size,
            trial.processes,
        ))?;

        let seed_directory = self.config.path_info.seed_directory.as_deref();
        let mut previous = evo::import_seed(seed_directory)?;
        log::info!("seed generation holds {} members", previous.members.len());

        for _ in 0..trial.generation_count {
            let mut active = self.next_generation(&previous)?;
            let failures = self.evaluate(&mut active)?;
            self.store.write_summary(&format!(
                "{} generation {}: {} members, {} failed trials, best score {}",
                timestamp(),
                active.id,
                active.members.len(),
                failures,
                best_score(&active),
            ))?;
            previous = active;
        }

        self.store
            .write_summary(&format!("{} run finished", timestamp()))?;
        Ok(previous)
    }

    /// Derive the next generation from the previous one: per-component
    /// candidate populations, then member assembly.
    fn next_generation(&self, previous: &Generation) -> Result<Generation, RunError> {
        let generation_id = previous.next_id();
        log::info!("deriving generation {generation_id}");
        let mut populations = BTreeMap::new();
        for (name, spec) in &self.config.components {
            let population =
                learn::generate_population(name, spec, previous, generation_id, &self.store)?;
            populations.insert(name.clone(), population);
        }
        Ok(Generation::assemble(
            &populations,
            generation_id,
            self.config.trial_properties.generation_size,
        ))
    }

    /// Persist every member, dispatch the full trial batch, block on the
    /// barrier, and attach the collected scores. Returns the number of
    /// failed trials.
    fn evaluate(&self, generation: &mut Generation) -> Result<usize, RunError> {
        self.store.save_generation(generation)?;
        let jobs = jobs::build_jobs(generation, &self.config, &self.store);
        log::info!(
            "dispatching {} trials for generation {}",
            jobs.len(),
            generation.id
        );
        let batch: Vec<_> = jobs.into_iter().map(|job| move || job.run()).collect();
        let outcomes = self.scheduler.run_batch(batch)?;
        let failures = outcomes.iter().filter(|o| o.error.is_some()).count();
        jobs::attach_scores(generation, outcomes);
        Ok(failures)
    }
}

/// Best mean candidate score in a generation, or negative infinity if
/// nothing was scored.
pub fn best_score(generation: &Generation) -> f64 {
    generation
        .members
        .iter()
        .flat_map(|member| member.components.values())
        .map(Candidate::mean_score)
        .fold(f64::NEG_INFINITY, f64::max)
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use crate::evo::{CandidateParams, Member, SEED_GENERATION_ID, param_id};
    use crate::store::NEURAL_NET_DIRECTORY;
    use std::path::Path;

    fn fake_simulator(dir: &Path, score: f64) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("simulator.sh");
        std::fs::write(&path, format!("#!/bin/sh\necho {score}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_str().unwrap().to_string()
    }

    fn test_config(dir: &Path, score: f64) -> RunConfig {
        let mut config: RunConfig = serde_json::from_str(crate::config::tests::EXAMPLE).unwrap();
        config.path_info.resource_prefix = dir.to_str().unwrap().to_string();
        config.path_info.executable = fake_simulator(dir, score);
        config.path_info.seed_directory = None;
        config
    }

    fn seed_member(config: &RunConfig) -> Member {
        let mut member = Member::new(0, SEED_GENERATION_ID);
        member.components.insert(
            "leg".to_string(),
            Candidate {
                param_id: param_id(3, SEED_GENERATION_ID, 0),
                population_index: 0,
                generation_id: SEED_GENERATION_ID,
                params: CandidateParams::Structural {
                    values: vec![vec![0.0; 2]; 4],
                },
                scores: vec![1.0],
            },
        );
        member.components.insert(
            "brain".to_string(),
            Candidate {
                param_id: param_id(3, SEED_GENERATION_ID, 0),
                population_index: 0,
                generation_id: SEED_GENERATION_ID,
                params: CandidateParams::Neural {
                    weights: vec![0.5; config.components["brain"].network.weight_count()],
                    states: 2,
                    hidden: 2,
                    actions: 1,
                    weights_file: None,
                },
                scores: vec![1.0],
            },
        );
        member
    }

    /// The full seeded scenario: two components, two generations, four
    /// members each, every trial succeeding.
    #[test]
    fn seeded_run_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path(), 1.5);

        // Write one pre-built member into a seed directory.
        let seed_dir = dir.path().join("seeds");
        std::fs::create_dir(&seed_dir).unwrap();
        let member = seed_member(&config);
        std::fs::write(
            seed_dir.join("seed_member.json"),
            serde_json::to_string(&member).unwrap(),
        )
        .unwrap();
        config.path_info.seed_directory = Some(seed_dir);

        let run = TrialRun::new(config).unwrap();
        let last = run.run().unwrap();

        // Seeded: produced generations are numbered 0 then 1.
        assert_eq!(last.id, 1);
        assert_eq!(last.members.len(), 4);
        for member in &last.members {
            assert_eq!(member.components.len(), 2);
            let brain = &member.components["brain"];
            // paramIDs of generation 1 brains start at 3 * 1.
            assert!((3..6).contains(&brain.param_id));
            let CandidateParams::Neural { weights, weights_file, .. } = &brain.params else {
                panic!("expected neural params");
            };
            assert_eq!(weights.len(), 9);
            // Every trial succeeded, so every candidate was scored.
            assert_eq!(brain.scores, vec![1.5]);
            assert_eq!(member.components["leg"].scores, vec![1.5]);
            assert!(weights_file.is_some());
        }

        // Artifacts on disk: member files for both generations, one weight
        // file per brain candidate per generation.
        let trial_dir = run.store().trial_directory();
        for generation_id in [0, 1] {
            for member_id in 0..4 {
                assert!(trial_dir.join(format!("escape_{generation_id}_{member_id}.json")).is_file());
            }
            for index in 0..3 {
                let weights = run
                    .store()
                    .read_weights(&format!(
                        "{NEURAL_NET_DIRECTORY}/escape_brain_{generation_id}_{index}.nnw"
                    ))
                    .unwrap();
                assert_eq!(weights.len(), 9);
            }
        }
        assert!(trial_dir.join("summary.txt").is_file());
        assert_eq!(best_score(&last), 1.5);
    }

    /// Unseeded runs keep the historical numbering: the first produced
    /// generation shares the seed's -1, the second is 0.
    #[test]
    fn unseeded_run_keeps_legacy_numbering() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), 2.0);
        let run = TrialRun::new(config).unwrap();
        let last = run.run().unwrap();
        assert_eq!(last.id, 0);
        // Generation -1 artifacts exist alongside generation 0.
        let trial_dir = run.store().trial_directory();
        assert!(trial_dir.join("escape_-1_0.json").is_file());
        assert!(trial_dir.join("escape_0_0.json").is_file());
        for member in &last.members {
            assert!((0..3).contains(&member.components["brain"].param_id));
        }
    }

    /// A failing simulator degrades the data but not the run.
    #[test]
    fn failing_trials_leave_partial_scores() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path(), 0.0);
        config.path_info.executable = "/no/such/simulator".to_string();
        config.trial_properties.generation_count = 1;
        let run = TrialRun::new(config).unwrap();
        let last = run.run().unwrap();
        assert_eq!(last.members.len(), 4);
        for member in &last.members {
            for candidate in member.components.values() {
                assert!(candidate.scores.is_empty());
            }
        }
        assert_eq!(best_score(&last), f64::NEG_INFINITY);
    }
}
