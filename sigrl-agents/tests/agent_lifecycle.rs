use anyhow::Result;
use sigrl_agents::{
    TrafficAgent,
    artifact::{ModelArtifact, model_artifact_path},
};
use sigrl_core::{
    agents::{Agent, Backend},
    config::{
        AgentSpec, AlgorithmSpec, DecayingSarsaParams, DeepQParams, LinearSarsaParams, RunMode,
        TabularQParams,
    },
    env::Observation,
    error::Error,
    telemetry::list_episode_artifacts,
    test_utils::ScriptedSession,
};

fn ql_spec(runs: usize) -> AgentSpec {
    AgentSpec::new(
        runs,
        AlgorithmSpec::TabularQ(TabularQParams {
            alpha: Some(0.1),
            gamma: Some(0.99),
            init_epsilon: Some(0.05),
            min_epsilon: Some(0.005),
            decay: Some(1.0),
        }),
    )
}

fn loaded(spec: AgentSpec) -> AgentSpec {
    AgentSpec {
        model: Some("unused.model".into()),
        mode: Some(RunMode::Evaluate),
        ..spec
    }
}

#[test]
fn run_writes_one_artifact_per_episode_and_closes() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let session = ScriptedSession::new(6);
    let probe = session.probe();
    let mut agent = TrafficAgent::new("QL_1", ql_spec(3), session);
    let out = agent.run(true, dir.path())?;

    assert_eq!(out, dir.path().join("QL_1"));
    let files = list_episode_artifacts(&out, "QL_1")?;
    assert_eq!(files.len(), 3);
    assert_eq!(std::fs::read_dir(&out)?.count(), 3);
    assert_eq!(probe.resets(), 4);
    assert_eq!(probe.closes(), 1);
    assert_eq!(probe.steps(), 18);
    assert!(!agent.has_session());
    assert!(agent.exploration_rate().unwrap() >= 0.005);
    Ok(())
}

#[test]
fn run_without_session_is_a_configuration_error() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut agent = TrafficAgent::<ScriptedSession>::unbound("QL_1", ql_spec(1));
    assert!(agent.run(true, dir.path()).unwrap_err().is_configuration());

    let mut agent = TrafficAgent::new("QL_1", ql_spec(1), ScriptedSession::new(2));
    agent.run(true, dir.path())?;
    assert!(agent.run(true, dir.path()).unwrap_err().is_configuration());
    Ok(())
}

#[test]
fn save_before_initialize_is_a_state_error() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let agent = TrafficAgent::new("QL_1", ql_spec(1), ScriptedSession::new(2));
    let err = agent.save(&dir.path().join("QL_1.model")).unwrap_err();
    assert!(err.is_state());
    Ok(())
}

#[test]
fn initialize_is_idempotent() -> Result<()> {
    let mut agent = TrafficAgent::new("QL_1", ql_spec(1), ScriptedSession::new(2));
    agent.initialize()?;
    let before = agent.exploration_rate();
    agent.initialize()?;
    assert!(agent.is_initialized());
    assert_eq!(agent.exploration_rate(), before);
    Ok(())
}

#[test]
fn tabular_round_trip_acts_identically() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut trained = TrafficAgent::new("QL_1", ql_spec(5), ScriptedSession::new(10));
    trained.run(true, dir.path())?;
    let model = model_artifact_path(&dir.path().join("models"), "QL_1");
    trained.save(&model)?;

    let mut restored = TrafficAgent::new("QL_1", loaded(ql_spec(1)), ScriptedSession::new(10));
    restored.initialize()?;
    restored.load(&model, ScriptedSession::new(10))?;
    assert!(restored.is_evaluate_only());

    let (Some(a), Some(b)) = (trained.backend(), restored.backend()) else {
        panic!("both agents hold a backend");
    };
    assert_eq!(a.state()?, b.state()?);

    for i in 0..10 {
        let obs = Observation(vec![i as f32 / 10., (i % 2) as f32]);
        let expected = trained.backend_mut().unwrap().act(&obs, false)?;
        let actual = restored.backend_mut().unwrap().act(&obs, false)?;
        assert_eq!(expected, actual);
    }
    Ok(())
}

#[test]
fn loaded_agent_refuses_to_learn_and_still_closes() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut trained = TrafficAgent::new("QL_1", ql_spec(1), ScriptedSession::new(4));
    trained.run(true, dir.path())?;
    let model = dir.path().join("QL_1.model");
    trained.save(&model)?;

    let session = ScriptedSession::new(4);
    let probe = session.probe();
    let mut restored = TrafficAgent::new("QL_1", loaded(ql_spec(2)), ScriptedSession::new(4));
    restored.initialize()?;
    restored.load(&model, session)?;
    assert!(restored.run(true, dir.path()).unwrap_err().is_configuration());
    assert_eq!(probe.closes(), 1);
    assert_eq!(probe.steps(), 0);
    Ok(())
}

#[test]
fn loaded_agent_evaluates() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut trained = TrafficAgent::new("QL_1", ql_spec(1), ScriptedSession::new(4));
    trained.run(true, dir.path())?;
    let model = dir.path().join("QL_1.model");
    trained.save(&model)?;

    let mut restored = TrafficAgent::new("QL_1", loaded(ql_spec(2)), ScriptedSession::new(4));
    restored.initialize()?;
    restored.load(&model, ScriptedSession::new(4))?;
    let epsilon = restored.exploration_rate();
    let out = restored.run(false, &dir.path().join("eval"))?;
    assert_eq!(list_episode_artifacts(&out, "QL_1")?.len(), 2);
    assert_eq!(restored.exploration_rate(), epsilon);
    Ok(())
}

#[test]
fn kind_mismatch_on_load_is_a_configuration_error() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut trained = TrafficAgent::new("QL_1", ql_spec(1), ScriptedSession::new(3));
    trained.run(true, dir.path())?;
    let model = dir.path().join("QL_1.model");
    trained.save(&model)?;

    let sarsa = loaded(AgentSpec::new(
        1,
        AlgorithmSpec::LinearSarsa(LinearSarsaParams::default()),
    ));
    let session = ScriptedSession::new(3);
    let probe = session.probe();
    let mut agent = TrafficAgent::new("S", sarsa, session);
    let err = agent.restore(ModelArtifact::read(&model)?, &model).unwrap_err();
    assert!(err.is_configuration(), "{err}");
    assert!(!agent.is_initialized());
    assert!(!agent.has_session());
    assert_eq!(probe.closes(), 1);
    Ok(())
}

#[test]
fn missing_model_file_is_an_io_error() -> Result<()> {
    let first = ScriptedSession::new(3);
    let first_probe = first.probe();
    let mut agent = TrafficAgent::new("QL_1", loaded(ql_spec(1)), first);
    agent.initialize()?;
    let offered = ScriptedSession::new(3);
    let offered_probe = offered.probe();
    let err = agent
        .load(std::path::Path::new("/nonexistent/QL_1.model"), offered)
        .unwrap_err();
    assert!(matches!(err, Error::Io { .. }));
    assert_eq!(first_probe.closes(), 1);
    assert_eq!(offered_probe.closes(), 1);
    assert!(!agent.has_session());
    Ok(())
}

#[test]
fn load_before_initialize_is_a_state_error() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut trained = TrafficAgent::new("QL_1", ql_spec(1), ScriptedSession::new(3));
    trained.run(true, dir.path())?;
    let model = dir.path().join("QL_1.model");
    trained.save(&model)?;

    let offered = ScriptedSession::new(3);
    let probe = offered.probe();
    let mut agent = TrafficAgent::new("QL_1", loaded(ql_spec(1)), ScriptedSession::new(3));
    let err = agent.load(&model, offered).unwrap_err();
    assert!(err.is_state(), "{err}");
    assert!(!agent.is_initialized());
    assert!(!agent.is_evaluate_only());
    assert_eq!(probe.closes(), 1);
    Ok(())
}

#[test]
fn load_replaces_the_backend_and_rebinds_the_session() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut trained = TrafficAgent::new("QL_1", ql_spec(3), ScriptedSession::new(6));
    trained.run(true, dir.path())?;
    let model = dir.path().join("QL_1.model");
    trained.save(&model)?;

    let first = ScriptedSession::new(6);
    let first_probe = first.probe();
    let mut agent = TrafficAgent::new("QL_1", loaded(ql_spec(1)), first);
    agent.initialize()?;
    let offered = ScriptedSession::new(6);
    let offered_probe = offered.probe();
    agent.load(&model, offered)?;

    assert_eq!(first_probe.closes(), 1);
    assert_eq!(offered_probe.closes(), 0);
    assert!(agent.is_evaluate_only());
    let (Some(a), Some(b)) = (trained.backend(), agent.backend()) else {
        panic!("both agents hold a backend");
    };
    assert_eq!(a.state()?, b.state()?);
    agent.run(false, &dir.path().join("eval"))?;
    assert_eq!(offered_probe.resets(), 2);
    assert_eq!(first_probe.resets(), 0);
    Ok(())
}

#[test]
fn fixed_cycle_save_writes_nothing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut agent = TrafficAgent::new(
        "fixed",
        AgentSpec::new(2, AlgorithmSpec::FixedCycle),
        ScriptedSession::new(3),
    );
    let out = agent.run(false, dir.path())?;
    assert_eq!(list_episode_artifacts(&out, "fixed")?.len(), 2);
    let model = dir.path().join("fixed.model");
    agent.save(&model)?;
    assert!(!model.exists());
    assert!(!agent.persists_state());
    Ok(())
}

#[test]
fn session_failure_still_closes_the_session() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let session = ScriptedSession::new(5).failing_at(3);
    let probe = session.probe();
    let mut agent = TrafficAgent::new("QL_1", ql_spec(2), session);
    let err = agent.run(true, dir.path()).unwrap_err();
    assert!(matches!(err, Error::Session(_)));
    assert_eq!(probe.closes(), 1);
    Ok(())
}

#[test]
fn sarsa_variants_and_dqn_complete_runs() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let sarsa = LinearSarsaParams {
        alpha: Some(0.01),
        gamma: Some(0.9),
        epsilon: Some(0.1),
        fourier_order: Some(3),
        lambda: Some(0.9),
    };
    let specs = [
        ("SARSA", AlgorithmSpec::LinearSarsa(sarsa.clone())),
        (
            "SARSA_decay",
            AlgorithmSpec::DecayingLinearSarsa(DecayingSarsaParams {
                sarsa,
                decay: Some(0.9),
                min_epsilon: None,
            }),
        ),
        (
            "DQN",
            AlgorithmSpec::DeepQ(DeepQParams {
                alpha: Some(0.001),
                gamma: Some(0.9),
                init_epsilon: Some(1.0),
                final_epsilon: Some(0.05),
                exp_fraction: Some(0.5),
                batch_size: Some(4),
                buffer_size: Some(64),
                target_update: Some(5),
                hidden_layers: Some(vec![8]),
            }),
        ),
    ];
    for (name, algorithm) in specs {
        let mut agent =
            TrafficAgent::new(name, AgentSpec::new(2, algorithm), ScriptedSession::new(8));
        let out = agent.run(true, dir.path())?;
        assert_eq!(list_episode_artifacts(&out, name)?.len(), 2);
        let model = dir.path().join(format!("{name}.model"));
        agent.save(&model)?;

        let mut spec = agent.spec().clone();
        spec.model = Some(model.clone());
        spec.mode = Some(RunMode::Evaluate);
        let session = ScriptedSession::new(8);
        let probe = session.probe();
        let mut restored = TrafficAgent::new(name, spec, ScriptedSession::new(8));
        restored.initialize()?;
        restored.load(&model, session)?;
        assert_eq!(restored.exploration_rate(), agent.exploration_rate());
        restored.run(false, &dir.path().join("eval"))?;
        assert_eq!(restored.exploration_rate(), agent.exploration_rate());
        assert_eq!(probe.closes(), 1);
    }
    Ok(())
}
