use rand::{Rng, rngs::StdRng};
use serde::{Deserialize, Serialize};

/// Index of the largest value, lowest index on ties.
pub fn greedy(values: &[f64]) -> usize {
    let mut best = 0;
    for (idx, value) in values.iter().enumerate().skip(1) {
        if *value > values[best] {
            best = idx;
        }
    }
    best
}

/// Epsilon greedy with geometric decay after every choice, floored at `min_epsilon`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpsilonGreedy {
    pub epsilon: f64,
    pub min_epsilon: f64,
    pub decay: f64,
}

impl EpsilonGreedy {
    pub fn new(epsilon: f64, min_epsilon: f64, decay: f64) -> Self {
        Self {
            epsilon,
            min_epsilon,
            decay,
        }
    }

    /// A fixed rate that never decays.
    pub fn constant(epsilon: f64) -> Self {
        Self::new(epsilon, epsilon, 1.)
    }

    pub fn choose(&mut self, values: &[f64], rng: &mut StdRng) -> usize {
        let action = if rng.random::<f64>() < self.epsilon {
            rng.random_range(0..values.len())
        } else {
            greedy(values)
        };
        self.epsilon = (self.epsilon * self.decay).max(self.min_epsilon);
        action
    }
}

/// Linear interpolation from `start` to `end` over the first `fraction` of `total_steps`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearSchedule {
    pub start: f64,
    pub end: f64,
    pub fraction: f64,
    pub total_steps: usize,
}

impl LinearSchedule {
    pub fn value(&self, step: usize) -> f64 {
        let horizon = self.fraction * self.total_steps as f64;
        if horizon <= 0. {
            return self.end;
        }
        let progress = (step as f64 / horizon).min(1.);
        self.start + progress * (self.end - self.start)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn greedy_breaks_ties_low() {
        assert_eq!(greedy(&[1., 3., 3.]), 1);
        assert_eq!(greedy(&[0., 0.]), 0);
    }

    #[test]
    fn epsilon_never_drops_below_floor() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut policy = EpsilonGreedy::new(0.5, 0.1, 0.5);
        for _ in 0..20 {
            policy.choose(&[0., 1.], &mut rng);
            assert!(policy.epsilon >= 0.1);
        }
        assert_eq!(policy.epsilon, 0.1);
    }

    #[test]
    fn schedule_reaches_end_and_stays() {
        let schedule = LinearSchedule {
            start: 1.,
            end: 0.1,
            fraction: 0.5,
            total_steps: 100,
        };
        assert_eq!(schedule.value(0), 1.);
        assert!((schedule.value(25) - 0.55).abs() < 1e-12);
        assert!((schedule.value(50) - 0.1).abs() < 1e-12);
        assert!((schedule.value(500) - 0.1).abs() < 1e-12);
    }
}
