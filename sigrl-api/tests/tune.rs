use anyhow::Result;
use sigrl_api::{SearchSpace, Tuner, tune::TRIALS_FILE};
use sigrl_core::{
    config::{ConfigFile, ExperimentConfig, Metric},
    env_builder::SignalTiming,
    rng,
    test_utils::ScriptedSession,
};

fn experiment(instances: &str) -> Result<ExperimentConfig> {
    let yaml = format!(
        r#"
Agent_settings:
  Output_csv: unused/csv
  Output_model: unused/models
  Environment:
    Traffic_type: low
    Num_seconds: 300
    Min_green: 10
    Max_green: 50
    Yellow_time: 4
    Delta_time: 5
  Instances:
{instances}
"#
    );
    Ok(ConfigFile::from_yaml_str(&yaml)?.experiment)
}

fn scripted(_: SignalTiming) -> sigrl_core::Result<ScriptedSession> {
    Ok(ScriptedSession::new(4))
}

const QL: &str = r#"
    fixed:
      Agent_type: FIXED
      Runs: 1
    QL_1:
      Agent_type: QL
      Runs: 2
      Alpha: 0.1
      Gamma: 0.99
      Init_epsilon: 0.05
      Min_epsilon: 0.005
      Decay: 1.0"#;

#[test]
fn every_trial_is_scored_from_its_report() -> Result<()> {
    rng::set_seed(11);
    let dir = tempfile::tempdir()?;
    let tuner = Tuner::new(experiment(QL)?, scripted, dir.path(), Metric::SystemMeanWaitingTime)?
        .space(SearchSpace {
            alpha: 0.01..=0.2,
            ..Default::default()
        })?;
    let trials = tuner.run(3)?;

    assert_eq!(trials.len(), 3);
    for trial in &trials {
        assert_eq!(trial.score, Some(1.5), "{}", trial.name);
        let alpha = trial.params.alpha.unwrap();
        assert!((0.01..=0.2).contains(&alpha));
        assert_eq!(trial.params.init_epsilon, Some(0.05));
        let telemetry = dir.path().join("csv").join("low").join(&trial.name);
        assert_eq!(std::fs::read_dir(telemetry)?.count(), 2);
        assert!(
            dir.path()
                .join("reports")
                .join(format!("{}_last_values.yaml", trial.name))
                .exists()
        );
    }
    assert!(dir.path().join(TRIALS_FILE).exists());
    assert!(!dir.path().join("csv").join("low").join("fixed").exists());
    Ok(())
}

#[test]
fn tuning_needs_a_fresh_ql_instance() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let fixed_only = experiment("    fixed:\n      Agent_type: FIXED\n      Runs: 1")?;
    let Err(err) = Tuner::new(fixed_only, scripted, dir.path(), Metric::SystemMeanSpeed) else {
        panic!("a FIXED-only experiment has nothing to tune");
    };
    assert!(err.is_configuration());
    Ok(())
}
