use anyhow::Result;
use sigrl_core::config::{AgentKind, ConfigFile, TrafficProfile};
use std::path::PathBuf;

fn sample(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../configs")
        .join(name)
}

#[test]
fn every_sample_config_validates() -> Result<()> {
    for name in ["fixed.yaml", "ql.yaml", "dqn.yaml", "sarsa.yaml", "evaluate.yaml"] {
        let file = ConfigFile::load(sample(name))?;
        assert!(file.report.is_some(), "{name}");
    }
    Ok(())
}

#[test]
fn evaluate_sample_loads_models_in_order() -> Result<()> {
    let file = ConfigFile::load(sample("evaluate.yaml"))?;
    let experiment = file.experiment;
    assert_eq!(experiment.environment.traffic_profile, TrafficProfile::High);
    let kinds: Vec<_> = experiment.instances.values().map(|spec| spec.kind()).collect();
    assert_eq!(
        kinds,
        [AgentKind::FixedCycle, AgentKind::TabularQ, AgentKind::LinearSarsa]
    );
    assert!(
        experiment
            .instances
            .values()
            .filter(|spec| spec.is_loaded())
            .all(|spec| !spec.learns())
    );
    Ok(())
}
