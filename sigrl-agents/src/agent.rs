use crate::{
    BackendKind,
    artifact::{Hyperparameters, ModelArtifact},
};
use sigrl_core::{
    agents::{Agent, Backend},
    config::{AgentKind, AgentSpec},
    env::Env,
    episode::{EpisodePlan, LoggerEpisodeHook, run_episodes},
    error::{Error, Result},
};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

enum Lifecycle {
    Unbound,
    Initialized {
        hyperparameters: Hyperparameters,
        backend: BackendKind,
    },
}

/// The agent contract over any [`BackendKind`] and any session type.
pub struct TrafficAgent<E: Env> {
    name: String,
    spec: AgentSpec,
    session: Option<E>,
    lifecycle: Lifecycle,
    evaluate_only: bool,
}

impl<E: Env> TrafficAgent<E> {
    /// A fresh agent bound to `session`. The backend is built on first use.
    pub fn new(name: impl Into<String>, spec: AgentSpec, session: E) -> Self {
        Self {
            name: name.into(),
            spec,
            session: Some(session),
            lifecycle: Lifecycle::Unbound,
            evaluate_only: false,
        }
    }

    /// An agent with no session bound. It cannot initialize or run until it gets one.
    pub fn unbound(name: impl Into<String>, spec: AgentSpec) -> Self {
        Self {
            name: name.into(),
            spec,
            session: None,
            lifecycle: Lifecycle::Unbound,
            evaluate_only: false,
        }
    }

    pub fn spec(&self) -> &AgentSpec {
        &self.spec
    }

    pub fn kind(&self) -> AgentKind {
        self.spec.kind()
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Initialized { .. })
    }

    pub fn is_evaluate_only(&self) -> bool {
        self.evaluate_only
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Whether [`Agent::save`] writes anything.
    pub fn persists_state(&self) -> bool {
        self.kind() != AgentKind::FixedCycle
    }

    pub fn backend(&self) -> Option<&BackendKind> {
        match &self.lifecycle {
            Lifecycle::Unbound => None,
            Lifecycle::Initialized { backend, .. } => Some(backend),
        }
    }

    pub fn backend_mut(&mut self) -> Option<&mut BackendKind> {
        match &mut self.lifecycle {
            Lifecycle::Unbound => None,
            Lifecycle::Initialized { backend, .. } => Some(backend),
        }
    }

    pub fn exploration_rate(&self) -> Option<f64> {
        self.backend().and_then(Backend::exploration_rate)
    }

    /// Rebuilds the backend from `artifact` against the bound session and marks the agent
    /// evaluate-only. On failure the bound session is closed.
    pub fn restore(&mut self, artifact: ModelArtifact, origin: &Path) -> Result<()> {
        let restored = self.restore_bound(artifact, origin);
        if let Err(err) = &restored {
            debug!(agent = %self.name, %err, "restore failed, closing session");
            if let Err(close_err) = self.release_session() {
                warn!(agent = %self.name, err = %close_err, "closing the session failed");
            }
        }
        restored
    }

    fn restore_bound(&mut self, artifact: ModelArtifact, origin: &Path) -> Result<()> {
        let Some(session) = &self.session else {
            return Err(Error::configuration(format!(
                "agent `{}` has no session to load against",
                self.name
            )));
        };
        artifact.expect_kind(self.spec.kind(), &self.name, origin)?;
        let mut backend = BackendKind::build(
            &artifact.hyperparameters,
            &session.env_description(),
            self.spec.runs,
        )?;
        backend.restore(artifact.state)?;
        self.lifecycle = Lifecycle::Initialized {
            hyperparameters: artifact.hyperparameters,
            backend,
        };
        self.evaluate_only = true;
        info!(agent = %self.name, path = %origin.display(), "model loaded, evaluate only");
        Ok(())
    }

    fn release_session(&mut self) -> Result<()> {
        match self.session.take() {
            Some(mut session) => {
                session.close()?;
                debug!(agent = %self.name, "session closed");
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn run_bound(&mut self, learn: bool, output_root: &Path) -> Result<PathBuf> {
        if learn && self.evaluate_only {
            return Err(Error::configuration(format!(
                "agent `{}` was loaded from a model and is evaluate-only",
                self.name
            )));
        }
        self.initialize()?;
        let (Some(session), Lifecycle::Initialized { backend, .. }) =
            (self.session.as_mut(), &mut self.lifecycle)
        else {
            return Err(Error::state(format!(
                "agent `{}` lost its session or backend",
                self.name
            )));
        };
        let plan = EpisodePlan {
            agent: &self.name,
            runs: self.spec.runs,
            learn,
            output_root,
        };
        info!(agent = %self.name, kind = %self.spec.kind(), runs = plan.runs, learn, "running agent");
        let mut hooks = LoggerEpisodeHook::new(&self.name, plan.runs);
        run_episodes(session, backend, &mut hooks, plan)?;
        Ok(plan.output_dir())
    }
}

impl<E: Env> Agent for TrafficAgent<E> {
    type Session = E;

    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        let Some(session) = &self.session else {
            return Err(Error::configuration(format!(
                "agent `{}` has no session to initialize against",
                self.name
            )));
        };
        let hyperparameters = Hyperparameters::resolve(&self.spec.algorithm)?;
        let backend = BackendKind::build(
            &hyperparameters,
            &session.env_description(),
            self.spec.runs,
        )?;
        debug!(agent = %self.name, kind = %backend.kind(), "backend initialized");
        self.lifecycle = Lifecycle::Initialized {
            hyperparameters,
            backend,
        };
        Ok(())
    }

    fn run(&mut self, learn: bool, output_root: &Path) -> Result<PathBuf> {
        if self.session.is_none() {
            return Err(Error::configuration(format!(
                "agent `{}` has no session bound",
                self.name
            )));
        }
        let result = self.run_bound(learn, output_root);
        let closed = self.release_session();
        let dir = result?;
        closed?;
        Ok(dir)
    }

    fn save(&self, path: &Path) -> Result<()> {
        let Lifecycle::Initialized {
            hyperparameters,
            backend,
        } = &self.lifecycle
        else {
            return Err(Error::state(format!(
                "agent `{}` has no backend to save",
                self.name
            )));
        };
        if !self.persists_state() {
            return Ok(());
        }
        let artifact = ModelArtifact {
            kind: backend.kind(),
            hyperparameters: hyperparameters.clone(),
            state: backend.state()?,
        };
        artifact.write(path)?;
        info!(agent = %self.name, path = %path.display(), "model saved");
        Ok(())
    }

    fn load(&mut self, path: &Path, session: E) -> Result<()> {
        if !self.is_initialized() {
            discard(session, &self.name);
            return Err(Error::state(format!(
                "agent `{}` has no initialized backend to load into",
                self.name
            )));
        }
        if let Err(err) = self.release_session() {
            discard(session, &self.name);
            return Err(err);
        }
        self.session = Some(session);
        let artifact = match ModelArtifact::read(path) {
            Ok(artifact) => artifact,
            Err(err) => {
                self.release_session()?;
                return Err(err);
            }
        };
        self.restore(artifact, path)
    }
}

fn discard<E: Env>(mut session: E, agent: &str) {
    if let Err(err) = session.close() {
        warn!(agent, %err, "closing an unused session failed");
    }
}
