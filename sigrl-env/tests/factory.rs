use anyhow::Result;
use sigrl_core::{
    config::{EnvironmentConfig, TrafficProfile},
    env::{Action, Env, SessionState},
    env_builder::{EnvBuilderTrait, SignalTiming},
};
use sigrl_env::{EnvFactory, Simulator, route_file};

fn environment() -> EnvironmentConfig {
    EnvironmentConfig {
        traffic_profile: TrafficProfile::Low,
        gui: false,
        num_seconds: 100,
        min_green: 5,
        max_green: 20,
        yellow_time: 2,
        delta_time: 5,
    }
}

#[test]
fn unknown_profile_is_rejected_before_any_session() {
    let err = EnvFactory::for_profile("extreme", environment(), Simulator::Native).unwrap_err();
    assert!(err.is_configuration());
}

#[test]
fn profiles_map_to_route_files() -> Result<()> {
    let factory = EnvFactory::for_profile("high", environment(), Simulator::Native)?;
    assert_eq!(factory.config().traffic_profile, TrafficProfile::High);
    assert_eq!(route_file(TrafficProfile::Low), "big-intersection/BI_50_test.rou.xml");
    assert_eq!(route_file(TrafficProfile::Medium), "big-intersection/BI_100_test.rou.xml");
    assert_eq!(route_file(TrafficProfile::High), "big-intersection/BI_200_test.rou.xml");
    Ok(())
}

#[test]
fn each_build_is_an_independent_session() -> Result<()> {
    let factory = EnvFactory::new(environment(), Simulator::Native)?;
    let mut first = factory.build_env(SignalTiming::Adaptive)?;
    let second = factory.build_env(SignalTiming::Fixed)?;
    first.reset(0)?;
    first.step(Action::Hold)?;
    first.close()?;
    assert_eq!(first.state(), SessionState::Closed);
    assert_eq!(second.state(), SessionState::Unopened);
    Ok(())
}

#[test]
fn boxed_session_flushes_telemetry() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let factory = EnvFactory::new(environment(), Simulator::Native)?;
    let mut session = factory.build_env(SignalTiming::Adaptive)?;
    session.reset(5)?;
    while !session.step(Action::Phase(1))?.is_done() {}
    let path = dir.path().join("s").join("s_ep0.csv");
    session.save_telemetry(&path)?;
    let rows = std::fs::read_to_string(&path)?.lines().count();
    assert_eq!(rows, 1 + 20);
    Ok(())
}

#[cfg(not(feature = "sumo"))]
#[test]
fn sumo_needs_the_feature() {
    assert!(
        EnvFactory::new(environment(), Simulator::Sumo)
            .unwrap_err()
            .is_configuration()
    );
}
