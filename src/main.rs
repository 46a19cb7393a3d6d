use evo_trials::{RunConfig, TrialRun, run::best_score};

fn main() {
    env_logger::init();

    let mut args = std::env::args();
    let program = args.next().unwrap_or_else(|| "evo-trials".to_string());
    let Some(config_path) = args.next() else {
        eprintln!("usage: {program} <config.json>");
        std::process::exit(2);
    };

    // A run without a valid configuration must not start.
    let config = match RunConfig::load(&config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };

    let run = match TrialRun::new(config) {
        Ok(run) => run,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };
    match run.run() {
        Ok(generation) => {
            println!(
                "finished at generation {} with best score {}",
                generation.id,
                best_score(&generation)
            );
        }
        Err(err) => {
            eprintln!("run aborted: {err}");
            std::process::exit(1);
        }
    }
}
