use crate::{builder::AgentBuilder, report::Reporter};
use sigrl_agents::{TrafficAgent, artifact::model_artifact_path};
use sigrl_core::{
    agents::Agent,
    config::{AgentSpec, ExperimentConfig},
    env_builder::EnvBuilderTrait,
    error::{Error, Result},
    telemetry::list_episode_artifacts,
};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Group label of the final render over the last episode of every agent.
pub const LAST_EPISODES_LABEL: &str = "last_episodes";

#[derive(Debug)]
pub struct AgentOutcome {
    pub name: String,
    /// Directory holding the agent's episode artifacts, if the run completed.
    pub telemetry_dir: Option<PathBuf>,
    pub model: Option<PathBuf>,
    pub error: Option<Error>,
}

impl AgentOutcome {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            telemetry_dir: None,
            model: None,
            error: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Default)]
pub struct ExperimentReport {
    pub outcomes: Vec<AgentOutcome>,
    pub rendered: Vec<PathBuf>,
}

impl ExperimentReport {
    pub fn failures(&self) -> impl Iterator<Item = &AgentOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.succeeded())
    }

    pub fn all_failed(&self) -> bool {
        self.outcomes.iter().all(|outcome| !outcome.succeeded())
    }
}

/// Runs every configured instance in order, one session each.
///
/// A failing agent is logged and recorded in its [`AgentOutcome`]; the next
/// instance still runs.
pub struct Runner<F: EnvBuilderTrait, R: Reporter> {
    config: ExperimentConfig,
    factory: F,
    reporter: R,
    force_evaluate: bool,
}

impl<F: EnvBuilderTrait, R: Reporter> Runner<F, R> {
    pub fn new(config: ExperimentConfig, factory: F, reporter: R) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            factory,
            reporter,
            force_evaluate: false,
        })
    }

    /// Run every agent without learning, whatever its `Mode`.
    pub fn force_evaluate(mut self, force_evaluate: bool) -> Self {
        self.force_evaluate = force_evaluate;
        self
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    fn run_agent(
        &self,
        name: &str,
        spec: &AgentSpec,
        telemetry_dir: &Path,
    ) -> Result<(TrafficAgent<F::Env>, PathBuf)> {
        let mut agent = AgentBuilder::new(&self.factory).build(name, spec)?;
        let learn = spec.learns() && !self.force_evaluate;
        let dir = agent.run(learn, telemetry_dir)?;
        Ok((agent, dir))
    }

    fn render(&mut self, files: &[PathBuf], label: &str, rendered: &mut Vec<PathBuf>) {
        match self.reporter.render(files, label) {
            Ok(paths) => rendered.extend(paths),
            Err(err) => warn!(label, %err, "report failed"),
        }
    }

    pub fn run(&mut self) -> ExperimentReport {
        let telemetry_dir = self.config.telemetry_dir();
        let instances: Vec<(String, AgentSpec)> = self
            .config
            .instances
            .iter()
            .map(|(name, spec)| (name.clone(), spec.clone()))
            .collect();
        let mut report = ExperimentReport::default();
        let mut finished = vec![];
        let mut last_episodes = vec![];

        for (name, spec) in &instances {
            info!(agent = %name, kind = %spec.kind(), "starting agent");
            let mut outcome = AgentOutcome::new(name);
            let run = self
                .run_agent(name, spec, &telemetry_dir)
                .and_then(|(agent, dir)| Ok((agent, list_episode_artifacts(&dir, name)?, dir)));
            match run {
                Ok((agent, files, dir)) => {
                    info!(agent = %name, episodes = files.len(), dir = %dir.display(), "agent finished");
                    self.render(&files, name, &mut report.rendered);
                    last_episodes.extend(files.last().cloned());
                    outcome.telemetry_dir = Some(dir);
                    finished.push((report.outcomes.len(), agent));
                }
                Err(err) => {
                    error!(agent = %name, %err, "agent failed");
                    outcome.error = Some(err);
                }
            }
            report.outcomes.push(outcome);
        }

        if !last_episodes.is_empty() {
            self.render(&last_episodes, LAST_EPISODES_LABEL, &mut report.rendered);
        }

        for (index, agent) in finished {
            if !agent.persists_state() {
                continue;
            }
            let outcome = &mut report.outcomes[index];
            let path = model_artifact_path(&self.config.model_root, &outcome.name);
            match agent.save(&path) {
                Ok(()) => outcome.model = Some(path),
                Err(err) => {
                    error!(agent = %outcome.name, %err, "saving model failed");
                    outcome.error = Some(err);
                }
            }
        }
        report
    }
}
