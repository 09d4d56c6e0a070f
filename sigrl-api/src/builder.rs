use sigrl_agents::{TrafficAgent, artifact::ModelArtifact};
use sigrl_core::{
    config::AgentSpec,
    env_builder::{EnvBuilderTrait, SignalTiming},
    error::Result,
};
use tracing::debug;

/// Turns configured instances into agents, each bound to a session of its own.
pub struct AgentBuilder<'a, F> {
    factory: &'a F,
}

impl<'a, F: EnvBuilderTrait> AgentBuilder<'a, F> {
    pub fn new(factory: &'a F) -> Self {
        Self { factory }
    }

    pub fn timing(spec: &AgentSpec) -> SignalTiming {
        if spec.kind().uses_fixed_timing() {
            SignalTiming::Fixed
        } else {
            SignalTiming::Adaptive
        }
    }

    /// Fresh agents start unbuilt; instances with a `Model` come back restored and
    /// evaluate-only. The model is read and checked before any session is built.
    pub fn build(&self, name: &str, spec: &AgentSpec) -> Result<TrafficAgent<F::Env>> {
        spec.validate(name)?;
        let artifact = match &spec.model {
            Some(model) => {
                let artifact = ModelArtifact::read(model)?;
                artifact.expect_kind(spec.kind(), name, model)?;
                Some((artifact, model))
            }
            None => None,
        };
        let timing = Self::timing(spec);
        let session = self.factory.build_env(timing)?;
        debug!(agent = name, ?timing, "session built");
        let mut agent = TrafficAgent::new(name, spec.clone(), session);
        if let Some((artifact, model)) = artifact {
            agent.restore(artifact, model)?;
        }
        Ok(agent)
    }
}
