//! Trial dispatch and collection.
//!
//! Every member of a generation gets one trial job per configured terrain
//! condition. The whole batch is submitted to a worker pool at once and the
//! dispatcher blocks until every job has completed or failed; nothing in the
//! next generation is derived before this barrier clears.
//!
//! Each trial runs the simulator as a local subprocess:
//!
//! ```text
//! {executable} {resourcePrefix} {trialPath} {memberFile} {trialLength} {terrainJson}
//! ```
//!
//! The simulator prints one score per line on stdout. A job that exits
//! abnormally or prints no scores is recorded as failed and the batch
//! continues; its member keeps whatever partial scores it obtained.

use crate::config::{RunConfig, Terrain, TerrainMode, flat_terrain};
use crate::error::RunError;
use crate::evo::Generation;
use crate::store::TrialStore;
use serde::{Deserialize, Serialize};
use std::process::Command;

/// The job description handed to the execution engine, all simple scalar
/// fields plus the nested numeric terrain descriptor.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobArgs {
    /// Basename of the member description file.
    pub filename: String,

    pub resource_prefix: String,

    /// The trial path, relative to the resource prefix.
    pub path: String,

    pub executable: String,

    /// Trial duration in simulator time units.
    pub length: f64,

    pub terrain: Terrain,
}

/// One pending simulation trial.
#[derive(Debug, Clone)]
pub struct TrialJob {
    /// Member this trial evaluates, by memberID within its generation.
    pub member_id: usize,

    pub args: JobArgs,
}

impl TrialJob {
    /// The full command line invocation of the simulator.
    /// All arguments are passed as strings.
    pub fn command(&self) -> Vec<String> {
        vec![
            self.args.executable.clone(),
            self.args.resource_prefix.clone(),
            self.args.path.clone(),
            self.args.filename.clone(),
            self.args.length.to_string(),
            serde_json::to_string(&self.args.terrain).unwrap_or_default(),
        ]
    }

    /// Run the simulator to completion and record the outcome.
    /// Never fails the batch: errors are captured on the outcome.
    pub fn run(self) -> JobOutcome {
        let member_id = self.member_id;
        match self.execute() {
            Ok(scores) => JobOutcome {
                member_id,
                scores,
                error: None,
            },
            Err(error) => JobOutcome {
                member_id,
                scores: Vec::new(),
                error: Some(error),
            },
        }
    }

    fn execute(&self) -> Result<Vec<f64>, String> {
        let command = self.command();
        let output = Command::new(&command[0])
            .args(&command[1..])
            .output()
            .map_err(|err| format!("cannot run {:?}: {err}", command[0]))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("{:?} {}: {}", command[0], output.status, stderr.trim()));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let scores: Vec<f64> = stdout
            .lines()
            .filter_map(|line| line.trim().parse::<f64>().ok())
            .collect();
        if scores.is_empty() {
            return Err(format!("{:?} produced no scores", command[0]));
        }
        Ok(scores)
    }
}

/// Result of one trial job, success or failure.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub member_id: usize,

    /// Scores reported by the simulator, empty on failure.
    pub scores: Vec<f64>,

    /// Why this trial produced no usable result, if it didn't.
    pub error: Option<String>,
}

/// Submit-all/await-all worker pool for trial jobs.
///
/// Jobs run on at most `workers` threads. [Scheduler::run_batch] is a
/// synchronous barrier: it returns only once every submitted job has
/// produced an outcome.
#[derive(Debug, Copy, Clone)]
pub struct Scheduler {
    workers: usize,
}

impl Scheduler {
    pub fn new(workers: usize) -> Self {
        Self { workers }
    }

    /// Run a batch of jobs and block until all of them complete.
    ///
    /// Returns exactly one outcome per job, in completion order. An error
    /// here means the execution engine itself is unusable, which is fatal to
    /// the run; individual job failures are reported on their outcomes.
    pub fn run_batch<F>(&self, jobs: Vec<F>) -> Result<Vec<JobOutcome>, RunError>
    where
        F: FnOnce() -> JobOutcome + Send + 'static,
    {
        if self.workers == 0 {
            return Err(RunError::Dispatch("worker limit is zero".into()));
        }
        let expected = jobs.len();
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<F>();
        let (outcome_tx, outcome_rx) = crossbeam_channel::unbounded();
        for job in jobs {
            job_tx
                .send(job)
                .map_err(|_| RunError::Dispatch("job channel closed".into()))?;
        }
        drop(job_tx);

        let mut handles = Vec::new();
        for _ in 0..self.workers.min(expected) {
            let job_rx = job_rx.clone();
            let outcome_tx = outcome_tx.clone();
            handles.push(std::thread::spawn(move || {
                while let Ok(job) = job_rx.recv() {
                    if outcome_tx.send(job()).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(job_rx);
        drop(outcome_tx);

        let outcomes: Vec<JobOutcome> = outcome_rx.iter().collect();
        for handle in handles {
            let _ = handle.join();
        }
        if outcomes.len() != expected {
            return Err(RunError::Dispatch(format!(
                "expected {expected} trial outcomes, received {}",
                outcomes.len()
            )));
        }
        Ok(outcomes)
    }
}

/// Build the job batch for a persisted generation: one job per member per
/// configured terrain condition.
///
/// Under [TerrainMode::FixedFlat] the flat terrain descriptor is substituted
/// for every job while the job count still follows the configured list.
pub fn build_jobs(generation: &Generation, config: &RunConfig, store: &TrialStore) -> Vec<TrialJob> {
    let trial = &config.trial_properties;
    let mut jobs = Vec::with_capacity(generation.members.len() * trial.terrains.len());
    for member in &generation.members {
        let filename = store.member_filename(member.generation_id, member.member_id);
        for terrain in &trial.terrains {
            let terrain = match trial.terrain_mode {
                TerrainMode::FixedFlat => flat_terrain(),
                TerrainMode::Configured => terrain.clone(),
            };
            jobs.push(TrialJob {
                member_id: member.member_id,
                args: JobArgs {
                    filename: filename.clone(),
                    resource_prefix: config.path_info.resource_prefix.clone(),
                    path: config.path_info.trial_path.clone(),
                    executable: config.path_info.executable.clone(),
                    length: trial.trial_length,
                    terrain,
                },
            });
        }
    }
    jobs
}

/// Attach completed trial outcomes back onto the generation: each score is
/// appended to every component candidate of the evaluated member. Failed
/// jobs are logged and leave their member's scores incomplete.
pub fn attach_scores(generation: &mut Generation, outcomes: Vec<JobOutcome>) {
    for outcome in outcomes {
        if let Some(error) = &outcome.error {
            log::warn!(
                "trial failed for generation {} member {}: {error}",
                generation.id,
                outcome.member_id
            );
            continue;
        }
        let Some(member) = generation
            .members
            .iter_mut()
            .find(|member| member.member_id == outcome.member_id)
        else {
            log::warn!("trial outcome for unknown member {}", outcome.member_id);
            continue;
        };
        for candidate in member.components.values_mut() {
            candidate.scores.extend_from_slice(&outcome.scores);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evo::{Candidate, CandidateParams, Member, param_id};
    use std::time::Duration;

    fn outcome(member_id: usize, score: f64) -> JobOutcome {
        JobOutcome {
            member_id,
            scores: vec![score],
            error: None,
        }
    }

    #[test]
    fn barrier_returns_every_outcome() {
        // More jobs than workers: the barrier must still release only after
        // all eight results are in.
        let scheduler = Scheduler::new(3);
        let jobs: Vec<_> = (0..8)
            .map(|member_id| {
                move || {
                    std::thread::sleep(Duration::from_millis(5));
                    outcome(member_id, member_id as f64)
                }
            })
            .collect();
        let outcomes = scheduler.run_batch(jobs).unwrap();
        assert_eq!(outcomes.len(), 8);
        let mut seen: Vec<usize> = outcomes.iter().map(|o| o.member_id).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn zero_workers_is_fatal() {
        let scheduler = Scheduler::new(0);
        let jobs = vec![|| outcome(0, 1.0)];
        assert!(matches!(scheduler.run_batch(jobs), Err(RunError::Dispatch(_))));
    }

    #[test]
    fn empty_batch() {
        let scheduler = Scheduler::new(4);
        let jobs: Vec<fn() -> JobOutcome> = vec![];
        assert!(scheduler.run_batch(jobs).unwrap().is_empty());
    }

    #[cfg(unix)]
    fn fake_simulator(dir: &std::path::Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("simulator.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_str().unwrap().to_string()
    }

    fn job(member_id: usize, executable: &str) -> TrialJob {
        TrialJob {
            member_id,
            args: JobArgs {
                filename: "escape_0_0.json".to_string(),
                resource_prefix: ".".to_string(),
                path: "trial".to_string(),
                executable: executable.to_string(),
                length: 100.0,
                terrain: flat_terrain(),
            },
        }
    }

    #[cfg(unix)]
    #[test]
    fn trial_job_parses_scores() {
        let dir = tempfile::tempdir().unwrap();
        let simulator = fake_simulator(dir.path(), "echo starting up\necho 1.5\necho -2.25");
        let outcome = job(0, &simulator).run();
        assert_eq!(outcome.error, None);
        assert_eq!(outcome.scores, vec![1.5, -2.25]);
    }

    #[cfg(unix)]
    #[test]
    fn trial_job_failure_is_recorded_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let simulator = fake_simulator(dir.path(), "echo doomed >&2\nexit 3");
        let outcome = job(1, &simulator).run();
        assert!(outcome.scores.is_empty());
        assert!(outcome.error.unwrap().contains("doomed"));
        // A missing executable is also a per-job failure.
        let outcome = job(2, "/no/such/simulator").run();
        assert!(outcome.error.is_some());
    }

    #[cfg(unix)]
    #[test]
    fn trial_job_no_scores_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let simulator = fake_simulator(dir.path(), "echo nothing numeric here");
        let outcome = job(0, &simulator).run();
        assert!(outcome.error.unwrap().contains("no scores"));
    }

    fn member_with(name: &str, member_id: usize) -> Member {
        let mut member = Member::new(member_id, 0);
        member.components.insert(
            name.to_string(),
            Candidate {
                param_id: param_id(3, 0, 0),
                population_index: 0,
                generation_id: 0,
                params: CandidateParams::Structural { values: vec![vec![0.0]] },
                scores: vec![],
            },
        );
        member
    }

    #[test]
    fn build_jobs_substitutes_flat_terrain() {
        let dir = tempfile::tempdir().unwrap();
        let mut config: RunConfig = serde_json::from_str(crate::config::tests::EXAMPLE).unwrap();
        config.path_info.resource_prefix = dir.path().to_str().unwrap().to_string();
        config.trial_properties.terrains = vec![
            vec![[1.0, 2.0, 3.0, 4.0]],
            vec![[5.0, 6.0, 7.0, 8.0]],
        ];
        let store = TrialStore::new(&config).unwrap();
        let mut generation = Generation::new(0);
        generation.add_member(member_with("leg", 0));
        generation.add_member(member_with("leg", 1));

        let jobs = build_jobs(&generation, &config, &store);
        assert_eq!(jobs.len(), 4); // 2 members x 2 terrain conditions
        assert!(jobs.iter().all(|job| job.args.terrain == flat_terrain()));
        assert_eq!(jobs[0].args.filename, "escape_0_0.json");

        config.trial_properties.terrain_mode = TerrainMode::Configured;
        let jobs = build_jobs(&generation, &config, &store);
        assert_eq!(jobs[0].args.terrain, vec![[1.0, 2.0, 3.0, 4.0]]);
        assert_eq!(jobs[1].args.terrain, vec![[5.0, 6.0, 7.0, 8.0]]);
    }

    #[test]
    fn attach_scores_tolerates_failures() {
        let mut generation = Generation::new(0);
        generation.add_member(member_with("leg", 0));
        generation.add_member(member_with("leg", 1));
        let outcomes = vec![
            outcome(0, 4.5),
            JobOutcome {
                member_id: 1,
                scores: vec![],
                error: Some("simulator crashed".to_string()),
            },
        ];
        attach_scores(&mut generation, outcomes);
        assert_eq!(generation.members[0].components["leg"].scores, vec![4.5]);
        assert!(generation.members[1].components["leg"].scores.is_empty());
    }

    #[test]
    fn job_args_wire_format() {
        let job = job(0, "./AppEscapeT6");
        let json = serde_json::to_string(&job.args).unwrap();
        assert_eq!(
            json,
            r#"{"filename":"escape_0_0.json","resourcePrefix":".","path":"trial","executable":"./AppEscapeT6","length":100.0,"terrain":[[0.0,0.0,0.0,0.0]]}"#
        );
    }
}
