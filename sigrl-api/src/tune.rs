//! Random search over tabular-Q hyperparameters.
//!
//! Every trial is a one-agent experiment run by [`Runner`] with a [`SummaryReporter`]; the
//! trial's score is read back from the last-values export of that report.

use crate::{
    report::{SummaryReporter, last_values_path, read_last_values},
    runner::Runner,
};
use indexmap::IndexMap;
use rand::Rng;
use serde::Serialize;
use sigrl_core::{
    config::{AgentKind, AgentSpec, AlgorithmSpec, ExperimentConfig, Metric, TabularQParams},
    env_builder::EnvBuilderTrait,
    error::{Error, IoContext, Result},
    rng,
};
use std::{
    cmp::Ordering,
    ops::RangeInclusive,
    path::{Path, PathBuf},
};
use tracing::{info, warn};

pub const TRIALS_FILE: &str = "trials.yaml";

#[derive(Debug, Clone, PartialEq)]
pub struct SearchSpace {
    pub alpha: RangeInclusive<f64>,
    pub gamma: RangeInclusive<f64>,
    pub decay: RangeInclusive<f64>,
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self {
            alpha: 0.0001..=0.1,
            gamma: 0.75..=0.999,
            decay: 0.9..=0.9999,
        }
    }
}

impl SearchSpace {
    pub fn validate(&self) -> Result<()> {
        for (key, range) in [
            ("alpha", &self.alpha),
            ("gamma", &self.gamma),
            ("decay", &self.decay),
        ] {
            if range.is_empty() || *range.start() < 0. || *range.end() > 1. {
                return Err(Error::configuration(format!(
                    "{key} search range {range:?} is empty or outside [0, 1]"
                )));
            }
        }
        if *self.alpha.start() <= 0. {
            return Err(Error::configuration("alpha search range must start above 0"));
        }
        Ok(())
    }

    fn sample(&self, template: &TabularQParams, rng: &mut impl Rng) -> TabularQParams {
        TabularQParams {
            alpha: Some(rng.random_range(self.alpha.clone())),
            gamma: Some(rng.random_range(self.gamma.clone())),
            decay: Some(rng.random_range(self.decay.clone())),
            ..template.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trial {
    pub name: String,
    #[serde(flatten)]
    pub params: TabularQParams,
    /// Mean over the trial's episodes of the objective's final-step value. `None` when the
    /// trial failed.
    pub score: Option<f64>,
}

/// Mean of `metric` over every series of a last-values export.
pub fn score_last_values(path: &Path, metric: Metric) -> Result<f64> {
    let last_values = read_last_values(path)?;
    let values: Vec<f64> = last_values
        .values()
        .filter_map(|series| series.get(metric.column()).copied())
        .collect();
    if values.is_empty() {
        return Err(Error::io(
            path,
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("no {metric} values"),
            ),
        ));
    }
    Ok(values.iter().sum::<f64>() / values.len() as f64)
}

/// Best first; failed trials last, in the order they ran.
pub fn rank(trials: &mut [Trial], metric: Metric) {
    trials.sort_by(|a, b| match (a.score, b.score) {
        (Some(a), Some(b)) if metric.higher_is_better() => b.total_cmp(&a),
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}

pub struct Tuner<F> {
    base: ExperimentConfig,
    template: TabularQParams,
    runs: usize,
    factory: F,
    space: SearchSpace,
    metric: Metric,
    output: PathBuf,
}

impl<F: EnvBuilderTrait + Clone> Tuner<F> {
    /// Trials take `Runs`, `Init_epsilon` and `Min_epsilon` from the first QL instance of `base`
    /// that trains from scratch, and the environment from `base` itself. Everything a trial
    /// writes goes under `output`.
    pub fn new(
        base: ExperimentConfig,
        factory: F,
        output: impl Into<PathBuf>,
        metric: Metric,
    ) -> Result<Self> {
        base.validate()?;
        let (runs, template) = base
            .instances
            .values()
            .filter(|spec| spec.kind() == AgentKind::TabularQ && !spec.is_loaded())
            .find_map(|spec| match &spec.algorithm {
                AlgorithmSpec::TabularQ(params) => Some((spec.runs, params.clone())),
                _ => None,
            })
            .ok_or_else(|| {
                Error::configuration("tuning needs a QL instance that trains from scratch")
            })?;
        Ok(Self {
            base,
            template,
            runs,
            factory,
            space: SearchSpace::default(),
            metric,
            output: output.into(),
        })
    }

    pub fn space(mut self, space: SearchSpace) -> Result<Self> {
        space.validate()?;
        self.space = space;
        Ok(self)
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    fn reports_dir(&self) -> PathBuf {
        self.output.join("reports")
    }

    fn run_trial(&self, name: &str, params: &TabularQParams) -> Result<f64> {
        let mut config = self.base.clone();
        config.telemetry_root = self.output.join("csv");
        config.model_root = self.output.join("models");
        config.instances = IndexMap::from([(
            name.to_owned(),
            AgentSpec::new(self.runs, AlgorithmSpec::TabularQ(params.clone())),
        )]);
        let reporter = SummaryReporter::new(self.reports_dir(), vec![self.metric]);
        let report = Runner::new(config, self.factory.clone(), reporter)?.run();
        if let Some(err) = report.outcomes.into_iter().find_map(|outcome| outcome.error) {
            return Err(err);
        }
        let last_values = last_values_path(&self.reports_dir(), name);
        if !report.rendered.contains(&last_values) {
            return Err(Error::io(
                &last_values,
                std::io::Error::new(std::io::ErrorKind::NotFound, "trial report was not rendered"),
            ));
        }
        score_last_values(&last_values, self.metric)
    }

    fn write_trials(&self, trials: &[Trial]) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.output).with_path(&self.output)?;
        let path = self.output.join(TRIALS_FILE);
        let content = serde_yaml::to_string(trials)
            .map_err(|err| Error::io(&path, std::io::Error::other(err)))?;
        std::fs::write(&path, content).with_path(&path)?;
        Ok(path)
    }

    /// Runs `trials` sampled configurations and returns them ranked, best first. The ranking
    /// is also written to `<output>/trials.yaml`.
    pub fn run(&self, trials: usize) -> Result<Vec<Trial>> {
        let mut rng = rng::fork();
        let mut results = Vec::with_capacity(trials);
        for index in 0..trials {
            let name = format!("trial_{index}");
            let params = self.space.sample(&self.template, &mut rng);
            let score = match self.run_trial(&name, &params) {
                Ok(score) => {
                    info!(
                        trial = %name,
                        alpha = ?params.alpha,
                        gamma = ?params.gamma,
                        decay = ?params.decay,
                        metric = %self.metric,
                        score,
                        "trial finished"
                    );
                    Some(score)
                }
                Err(err) => {
                    warn!(trial = %name, %err, "trial failed");
                    None
                }
            };
            results.push(Trial {
                name,
                params,
                score,
            });
        }
        rank(&mut results, self.metric);
        self.write_trials(&results)?;
        Ok(results)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};

    fn trial(name: &str, score: Option<f64>) -> Trial {
        Trial {
            name: name.to_owned(),
            params: TabularQParams::default(),
            score,
        }
    }

    fn names(trials: &[Trial]) -> Vec<&str> {
        trials.iter().map(|trial| trial.name.as_str()).collect()
    }

    #[test]
    fn samples_stay_inside_the_space() {
        let space = SearchSpace::default();
        let template = TabularQParams {
            init_epsilon: Some(0.05),
            min_epsilon: Some(0.005),
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..50 {
            let params = space.sample(&template, &mut rng);
            assert!(space.alpha.contains(&params.alpha.unwrap()));
            assert!(space.gamma.contains(&params.gamma.unwrap()));
            assert!(space.decay.contains(&params.decay.unwrap()));
            assert_eq!(params.init_epsilon, Some(0.05));
            assert_eq!(params.min_epsilon, Some(0.005));
        }
    }

    #[test]
    fn bad_spaces_are_rejected() {
        let zero_alpha = SearchSpace {
            alpha: 0.0..=0.1,
            ..Default::default()
        };
        assert!(zero_alpha.validate().unwrap_err().is_configuration());
        let inverted = SearchSpace {
            gamma: 0.9..=0.5,
            ..Default::default()
        };
        assert!(inverted.validate().unwrap_err().is_configuration());
        SearchSpace::default().validate().unwrap();
    }

    #[test]
    fn ranking_follows_the_metric_direction() {
        let mut trials = vec![
            trial("a", Some(3.)),
            trial("failed", None),
            trial("b", Some(1.)),
            trial("c", Some(2.)),
        ];
        rank(&mut trials, Metric::SystemMeanWaitingTime);
        assert_eq!(names(&trials), ["b", "c", "a", "failed"]);
        rank(&mut trials, Metric::SystemMeanSpeed);
        assert_eq!(names(&trials), ["a", "c", "b", "failed"]);
    }

    #[test]
    fn score_is_the_mean_over_series() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("t_last_values.yaml");
        std::fs::write(
            &path,
            "t_ep0:\n  system_mean_speed: 4.0\nt_ep1:\n  system_mean_speed: 8.0\n",
        )?;
        assert_eq!(score_last_values(&path, Metric::SystemMeanSpeed)?, 6.);
        assert!(matches!(
            score_last_values(&path, Metric::SystemTotalStopped),
            Err(Error::Io { .. })
        ));
        Ok(())
    }
}
