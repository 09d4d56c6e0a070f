use crate::{
    agents::{Backend, Transition},
    env::{Env, SnapShot},
    error::Result,
    rng,
    telemetry::{agent_dir, clear_episode_artifacts, episode_artifact_path},
};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeSummary {
    pub episode: usize,
    pub steps: usize,
    pub total_reward: f32,
    pub artifact: PathBuf,
}

pub trait EpisodeHooks {
    fn post_step_hook(&mut self, _snapshot: &SnapShot) -> Result<()> {
        Ok(())
    }

    fn post_episode_hook(&mut self, _summary: &EpisodeSummary) -> Result<()> {
        Ok(())
    }
}

/// Logs one line per finished episode.
pub struct LoggerEpisodeHook {
    agent: String,
    runs: usize,
}

impl LoggerEpisodeHook {
    pub fn new(agent: impl Into<String>, runs: usize) -> Self {
        Self {
            agent: agent.into(),
            runs,
        }
    }
}

impl EpisodeHooks for LoggerEpisodeHook {
    fn post_episode_hook(&mut self, summary: &EpisodeSummary) -> Result<()> {
        info!(
            agent = %self.agent,
            "episode: {:>3}/{:<3} steps: {:<5} total reward: {:<8.2} avg reward per step: {:.4}",
            summary.episode + 1,
            self.runs,
            summary.steps,
            summary.total_reward,
            summary.total_reward / summary.steps.max(1) as f32
        );
        Ok(())
    }
}

/// What a batch of episodes is and where its artifacts go.
#[derive(Debug, Clone, Copy)]
pub struct EpisodePlan<'a> {
    pub agent: &'a str,
    pub runs: usize,
    pub learn: bool,
    pub output_root: &'a Path,
}

impl EpisodePlan<'_> {
    pub fn output_dir(&self) -> PathBuf {
        agent_dir(self.output_root, self.agent)
    }
}

/// Reset, step until the session signals the end, flush exactly one artifact.
///
/// The loop has no step cap of its own: it ends only on `terminated || truncated`.
pub fn run_episode<E, B, H>(
    session: &mut E,
    backend: &mut B,
    hooks: &mut H,
    learn: bool,
    episode: usize,
    artifact: &Path,
) -> Result<EpisodeSummary>
where
    E: Env + ?Sized,
    B: Backend + ?Sized,
    H: EpisodeHooks + ?Sized,
{
    let seed = rng::next_seed();
    let mut state = session.reset(seed)?;
    debug!(episode, seed, "session reset");
    backend.begin_episode(&state)?;

    let mut steps = 0;
    let mut total_reward = 0.;
    loop {
        let action = backend.act(&state, learn)?;
        let snapshot = session.step(action)?;
        if learn {
            backend.learn(Transition {
                state: &state,
                action,
                reward: snapshot.reward,
                next_state: &snapshot.state,
                terminated: snapshot.terminated,
                truncated: snapshot.truncated,
            })?;
        }
        hooks.post_step_hook(&snapshot)?;
        steps += 1;
        total_reward += snapshot.reward;
        let done = snapshot.is_done();
        state = snapshot.state;
        if done {
            break;
        }
    }

    session.save_telemetry(artifact)?;
    let summary = EpisodeSummary {
        episode,
        steps,
        total_reward,
        artifact: artifact.to_path_buf(),
    };
    hooks.post_episode_hook(&summary)?;
    Ok(summary)
}

/// Runs `plan.runs` episodes back to back and resets the session once more after the last one.
/// Artifacts an earlier run left for the same agent are removed first, so the output directory
/// ends up holding exactly this run's episodes. Closing the session is left to the owner.
pub fn run_episodes<E, B, H>(
    session: &mut E,
    backend: &mut B,
    hooks: &mut H,
    plan: EpisodePlan<'_>,
) -> Result<Vec<EpisodeSummary>>
where
    E: Env + ?Sized,
    B: Backend + ?Sized,
    H: EpisodeHooks + ?Sized,
{
    let stale = clear_episode_artifacts(&plan.output_dir(), plan.agent)?;
    if stale > 0 {
        debug!(agent = plan.agent, stale, "removed artifacts of an earlier run");
    }
    let mut summaries = Vec::with_capacity(plan.runs);
    for episode in 0..plan.runs {
        let artifact = episode_artifact_path(plan.output_root, plan.agent, episode);
        summaries.push(run_episode(
            session, backend, hooks, plan.learn, episode, &artifact,
        )?);
    }
    session.reset(rng::next_seed())?;
    Ok(summaries)
}
