pub mod intersection;
#[cfg(feature = "sumo")]
pub mod sumo;

use sigrl_core::{
    config::{EnvironmentConfig, TrafficProfile},
    env::Env,
    env_builder::{EnvBuilderTrait, SignalTiming},
    error::{Error, Result},
};
use std::str::FromStr;
use tracing::debug;

pub use intersection::IntersectionSession;
#[cfg(feature = "sumo")]
pub use sumo::SumoEnv;

/// Route definition of each traffic profile in the big intersection scenario.
pub fn route_file(profile: TrafficProfile) -> &'static str {
    match profile {
        TrafficProfile::Low => "big-intersection/BI_50_test.rou.xml",
        TrafficProfile::Medium => "big-intersection/BI_100_test.rou.xml",
        TrafficProfile::High => "big-intersection/BI_200_test.rou.xml",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Simulator {
    #[default]
    Native,
    Sumo,
}

impl FromStr for Simulator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "native" => Ok(Self::Native),
            "sumo" => Ok(Self::Sumo),
            other => Err(Error::configuration(format!(
                "unknown simulator `{other}` (expected native or sumo)"
            ))),
        }
    }
}

/// Builds one session per agent for a fixed set of environment parameters.
#[derive(Debug, Clone)]
pub struct EnvFactory {
    config: EnvironmentConfig,
    simulator: Simulator,
}

impl EnvFactory {
    pub fn new(config: EnvironmentConfig, simulator: Simulator) -> Result<Self> {
        config.validate()?;
        if simulator == Simulator::Sumo && !cfg!(feature = "sumo") {
            return Err(Error::configuration(
                "the sumo simulator needs sigrl-env built with the `sumo` feature",
            ));
        }
        Ok(Self { config, simulator })
    }

    /// Same as [`EnvFactory::new`] with the profile given by name.
    pub fn for_profile(
        profile: &str,
        mut config: EnvironmentConfig,
        simulator: Simulator,
    ) -> Result<Self> {
        config.traffic_profile = profile.parse()?;
        Self::new(config, simulator)
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    pub fn simulator(&self) -> Simulator {
        self.simulator
    }

    #[cfg(feature = "sumo")]
    fn build_sumo(&self, timing: SignalTiming) -> Result<Box<dyn Env>> {
        Ok(Box::new(SumoEnv::new(&self.config, timing)?))
    }

    #[cfg(not(feature = "sumo"))]
    fn build_sumo(&self, _timing: SignalTiming) -> Result<Box<dyn Env>> {
        Err(Error::configuration(
            "the sumo simulator needs sigrl-env built with the `sumo` feature",
        ))
    }
}

impl EnvBuilderTrait for EnvFactory {
    type Env = Box<dyn Env>;

    fn build_env(&self, timing: SignalTiming) -> Result<Self::Env> {
        debug!(
            profile = %self.config.traffic_profile,
            route = route_file(self.config.traffic_profile),
            ?timing,
            simulator = ?self.simulator,
            "building session"
        );
        match self.simulator {
            Simulator::Native => Ok(Box::new(IntersectionSession::new(&self.config, timing)?)),
            Simulator::Sumo => self.build_sumo(timing),
        }
    }
}
