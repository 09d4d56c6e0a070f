use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use sigrl_api::{NullReporter, Reporter, Runner, SummaryReporter, Tuner};
use sigrl_core::{
    config::{ConfigFile, Metric},
    rng,
};
use sigrl_env::{EnvFactory, Simulator};
use std::path::{Path, PathBuf};
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "sigrl")]
#[command(about = "Traffic signal control experiments", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// trace, debug, info, warn or error
    #[arg(long, global = true, default_value = "info")]
    log_level: Level,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every configured agent, then report and save models
    Run {
        #[arg(long)]
        config: PathBuf,

        /// Run every agent without learning
        #[arg(long)]
        evaluate: bool,

        #[arg(long)]
        seed: Option<u64>,

        /// native or sumo
        #[arg(long, default_value = "native")]
        simulator: Simulator,
    },
    /// Random search over QL hyperparameters, ranked by one metric
    Tune {
        #[arg(long)]
        config: PathBuf,

        #[arg(long, default_value_t = 20)]
        trials: usize,

        /// Metric the trials are ranked by
        #[arg(long, default_value = "system_mean_waiting_time")]
        metric: Metric,

        #[arg(long, default_value = "outputs/tune")]
        output: PathBuf,

        #[arg(long)]
        seed: Option<u64>,

        /// native or sumo
        #[arg(long, default_value = "native")]
        simulator: Simulator,
    },
    /// Parse and validate a configuration file
    Validate {
        #[arg(long)]
        config: PathBuf,
    },
}

fn load(path: &Path) -> Result<ConfigFile> {
    ConfigFile::load(path).with_context(|| format!("loading config {}", path.display()))
}

fn run(config: &Path, evaluate: bool, seed: Option<u64>, simulator: Simulator) -> Result<()> {
    let file = load(config)?;
    if let Some(seed) = seed {
        rng::set_seed(seed);
    }
    let factory = EnvFactory::new(file.experiment.environment.clone(), simulator)
        .context("building the environment factory")?;
    let reporter: Box<dyn Reporter> = match &file.report {
        Some(report) => Box::new(SummaryReporter::from_config(report)),
        None => Box::new(NullReporter),
    };
    let mut runner = Runner::new(file.experiment, factory, reporter)?.force_evaluate(evaluate);
    let report = runner.run();

    for outcome in &report.outcomes {
        match &outcome.error {
            None => info!(
                agent = %outcome.name,
                telemetry = ?outcome.telemetry_dir,
                model = ?outcome.model,
                "done"
            ),
            Some(err) => error!(agent = %outcome.name, %err, "failed"),
        }
    }
    info!(rendered = report.rendered.len(), "reports written");
    if report.all_failed() {
        bail!("every agent failed");
    }
    Ok(())
}

fn tune(
    config: &Path,
    trials: usize,
    metric: Metric,
    output: &Path,
    seed: Option<u64>,
    simulator: Simulator,
) -> Result<()> {
    let file = load(config)?;
    if let Some(seed) = seed {
        rng::set_seed(seed);
    }
    let factory = EnvFactory::new(file.experiment.environment.clone(), simulator)
        .context("building the environment factory")?;
    let ranked = Tuner::new(file.experiment, factory, output, metric)?.run(trials)?;
    for (place, trial) in ranked.iter().enumerate() {
        match trial.score {
            Some(score) => info!(
                place = place + 1,
                trial = %trial.name,
                alpha = ?trial.params.alpha,
                gamma = ?trial.params.gamma,
                decay = ?trial.params.decay,
                %metric,
                score,
                "ranked"
            ),
            None => warn!(trial = %trial.name, "failed"),
        }
    }
    if ranked.iter().all(|trial| trial.score.is_none()) {
        bail!("every trial failed");
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Command::Run {
            config,
            evaluate,
            seed,
            simulator,
        } => run(&config, evaluate, seed, simulator),
        Command::Tune {
            config,
            trials,
            metric,
            output,
            seed,
            simulator,
        } => tune(&config, trials, metric, &output, seed, simulator),
        Command::Validate { config } => {
            let file = load(&config)?;
            info!(
                instances = file.experiment.instances.len(),
                profile = %file.experiment.environment.traffic_profile,
                "configuration is valid"
            );
            Ok(())
        }
    }
}
