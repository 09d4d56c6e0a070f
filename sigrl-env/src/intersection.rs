//! Single four-approach intersection with a two phase signal, simulated one second at a time.
//!
//! Vehicles spawn upstream, drive to the stop line in a fixed time, and queue there until their
//! approach is green. A green approach discharges at saturation flow. Phase 0 serves north/south,
//! phase 1 serves east/west.

use rand::{Rng, SeedableRng, rngs::StdRng};
use sigrl_core::{
    config::{EnvironmentConfig, TrafficProfile},
    env::{Action, Env, EnvironmentDescription, Observation, SessionState, SnapShot, Space},
    env_builder::SignalTiming,
    error::{Error, Result},
    telemetry::TelemetryRecord,
};
use std::collections::VecDeque;
use tracing::debug;

pub const NUM_PHASES: usize = 2;
pub const NUM_APPROACHES: usize = 4;
pub const OBSERVATION_SIZE: usize = NUM_PHASES + 1 + 2 * NUM_APPROACHES;

/// Seconds from spawning to reaching the stop line.
const TRAVEL_TIME: u32 = 10;
/// m/s
const FREE_SPEED: f64 = 13.89;
/// Vehicles per second leaving a green approach.
const SATURATION_FLOW: f64 = 0.5;
/// Vehicles an approach holds before density saturates at 1.
const LANE_CAPACITY: f32 = 40.;

/// Arrival probability per approach per simulated second.
pub fn arrival_rate(profile: TrafficProfile) -> f64 {
    match profile {
        TrafficProfile::Low => 0.05,
        TrafficProfile::Medium => 0.10,
        TrafficProfile::High => 0.20,
    }
}

fn serves(phase: usize, approach: usize) -> bool {
    // approaches are N, S, E, W
    match phase {
        0 => approach < 2,
        _ => approach >= 2,
    }
}

#[derive(Debug, Default)]
struct Approach {
    /// Arrival time at the stop line of every vehicle still driving.
    moving: VecDeque<u32>,
    /// Seconds waited so far by every queued vehicle, front first.
    queue: VecDeque<u32>,
    discharge_credit: f64,
}

impl Approach {
    fn vehicles(&self) -> usize {
        self.moving.len() + self.queue.len()
    }

    fn waiting_time(&self) -> u64 {
        self.queue.iter().map(|w| *w as u64).sum()
    }
}

#[derive(Debug)]
struct Signal {
    green_phase: usize,
    next_phase: usize,
    yellow_remaining: u32,
    time_since_last_change: u32,
}

impl Signal {
    fn new() -> Self {
        Self {
            green_phase: 0,
            next_phase: 0,
            yellow_remaining: 0,
            time_since_last_change: 0,
        }
    }

    fn is_yellow(&self) -> bool {
        self.yellow_remaining > 0
    }

    fn start_switch(&mut self, phase: usize, yellow_time: u32) {
        self.next_phase = phase;
        self.yellow_remaining = yellow_time;
        self.time_since_last_change = 0;
    }

    fn tick(&mut self) {
        self.time_since_last_change += 1;
        if self.yellow_remaining > 0 {
            self.yellow_remaining -= 1;
            if self.yellow_remaining == 0 {
                self.green_phase = self.next_phase;
            }
        }
    }
}

pub struct IntersectionSession {
    profile: TrafficProfile,
    num_seconds: u32,
    min_green: u32,
    max_green: u32,
    yellow_time: u32,
    delta_time: u32,
    timing: SignalTiming,
    state: SessionState,
    rng: StdRng,
    sim_time: u32,
    step: usize,
    signal: Signal,
    approaches: [Approach; NUM_APPROACHES],
    last_waiting_time: u64,
    records: Vec<TelemetryRecord>,
}

impl IntersectionSession {
    pub fn new(config: &EnvironmentConfig, timing: SignalTiming) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            profile: config.traffic_profile,
            num_seconds: config.num_seconds,
            min_green: config.min_green,
            max_green: config.max_green,
            yellow_time: config.yellow_time,
            delta_time: config.delta_time,
            timing,
            state: SessionState::Unopened,
            rng: StdRng::seed_from_u64(0),
            sim_time: 0,
            step: 0,
            signal: Signal::new(),
            approaches: Default::default(),
            last_waiting_time: 0,
            records: Vec::new(),
        })
    }

    pub fn profile(&self) -> TrafficProfile {
        self.profile
    }

    pub fn timing(&self) -> SignalTiming {
        self.timing
    }

    pub fn sim_time(&self) -> u32 {
        self.sim_time
    }

    pub fn green_phase(&self) -> usize {
        self.signal.green_phase
    }

    fn fixed_green(&self) -> u32 {
        (self.min_green + self.max_green) / 2
    }

    fn may_switch(&self) -> bool {
        !self.signal.is_yellow()
            && self.signal.time_since_last_change >= self.yellow_time + self.min_green
    }

    fn apply_action(&mut self, action: Action) -> Result<()> {
        let requested = match (self.timing, action) {
            (SignalTiming::Fixed, _) | (_, Action::Hold) => return Ok(()),
            (SignalTiming::Adaptive, Action::Phase(phase)) => phase,
        };
        if requested >= NUM_PHASES {
            return Err(Error::Session(format!(
                "phase {requested} out of range, the intersection has {NUM_PHASES} phases"
            )));
        }
        if requested != self.signal.green_phase && self.may_switch() {
            self.signal.start_switch(requested, self.yellow_time);
        }
        Ok(())
    }

    /// Switches forced by the program rather than by the agent.
    fn enforce_program(&mut self) {
        if self.signal.is_yellow() {
            return;
        }
        let green_elapsed = self.signal.time_since_last_change;
        let limit = match self.timing {
            SignalTiming::Fixed => self.fixed_green() + self.yellow_time,
            SignalTiming::Adaptive => self.max_green + self.yellow_time,
        };
        if green_elapsed >= limit {
            let other = (self.signal.green_phase + 1) % NUM_PHASES;
            self.signal.start_switch(other, self.yellow_time);
        }
    }

    fn tick(&mut self) {
        let now = self.sim_time;
        let rate = arrival_rate(self.profile);
        let green = (!self.signal.is_yellow()).then_some(self.signal.green_phase);
        for (idx, approach) in self.approaches.iter_mut().enumerate() {
            if self.rng.random_bool(rate) {
                approach.moving.push_back(now + TRAVEL_TIME);
            }
            while approach.moving.front().is_some_and(|eta| *eta <= now) {
                approach.moving.pop_front();
                approach.queue.push_back(0);
            }
            if green.is_some_and(|phase| serves(phase, idx)) {
                approach.discharge_credit += SATURATION_FLOW;
                while approach.discharge_credit >= 1. && !approach.queue.is_empty() {
                    approach.queue.pop_front();
                    approach.discharge_credit -= 1.;
                }
                if approach.queue.is_empty() {
                    approach.discharge_credit = approach.discharge_credit.min(1.);
                }
            } else {
                approach.discharge_credit = 0.;
            }
            for waited in approach.queue.iter_mut() {
                *waited += 1;
            }
        }
        self.signal.tick();
        self.enforce_program();
        self.sim_time += 1;
    }

    fn total_waiting_time(&self) -> u64 {
        self.approaches.iter().map(Approach::waiting_time).sum()
    }

    fn observation(&self) -> Observation {
        let mut obs = Vec::with_capacity(OBSERVATION_SIZE);
        for phase in 0..NUM_PHASES {
            obs.push(if phase == self.signal.green_phase { 1. } else { 0. });
        }
        obs.push(if self.may_switch() { 1. } else { 0. });
        for approach in &self.approaches {
            obs.push((approach.vehicles() as f32 / LANE_CAPACITY).min(1.));
        }
        for approach in &self.approaches {
            obs.push((approach.queue.len() as f32 / LANE_CAPACITY).min(1.));
        }
        Observation(obs)
    }

    fn record(&self) -> TelemetryRecord {
        let stopped: usize = self.approaches.iter().map(|a| a.queue.len()).sum();
        let moving: usize = self.approaches.iter().map(|a| a.moving.len()).sum();
        let vehicles = stopped + moving;
        let waiting = self.total_waiting_time() as f64;
        let (mean_waiting, mean_speed) = if vehicles == 0 {
            (0., 0.)
        } else {
            (
                waiting / vehicles as f64,
                FREE_SPEED * moving as f64 / vehicles as f64,
            )
        };
        TelemetryRecord {
            step: self.step,
            system_total_stopped: stopped as f64,
            system_total_waiting_time: waiting,
            system_mean_waiting_time: mean_waiting,
            system_mean_speed: mean_speed,
        }
    }
}

impl Env for IntersectionSession {
    fn reset(&mut self, seed: u64) -> Result<Observation> {
        if self.state == SessionState::Closed {
            return Err(Error::state("reset on a closed intersection session"));
        }
        self.rng = StdRng::seed_from_u64(seed);
        self.sim_time = 0;
        self.step = 0;
        self.signal = Signal::new();
        self.approaches = Default::default();
        self.last_waiting_time = 0;
        self.records.clear();
        self.state = SessionState::Active;
        Ok(self.observation())
    }

    fn step(&mut self, action: Action) -> Result<SnapShot> {
        match self.state {
            SessionState::Active => {}
            SessionState::Unopened => {
                return Err(Error::state("step on an intersection session that was never reset"));
            }
            SessionState::Closed => return Err(Error::state("step on a closed intersection session")),
        }
        self.apply_action(action)?;
        for _ in 0..self.delta_time {
            self.tick();
        }
        let waiting = self.total_waiting_time();
        let reward = (self.last_waiting_time as f64 - waiting as f64) / 100.;
        self.last_waiting_time = waiting;
        let info = self.record();
        self.records.push(info);
        self.step += 1;
        Ok(SnapShot {
            state: self.observation(),
            reward: reward as f32,
            terminated: false,
            truncated: self.sim_time >= self.num_seconds,
            info,
        })
    }

    fn env_description(&self) -> EnvironmentDescription {
        EnvironmentDescription::new(
            Space::unit_box(OBSERVATION_SIZE),
            Space::Discrete(NUM_PHASES),
        )
        .with_max_episode_steps(self.num_seconds.div_ceil(self.delta_time) as usize)
    }

    fn telemetry(&self) -> &[TelemetryRecord] {
        &self.records
    }

    fn close(&mut self) -> Result<()> {
        if self.state != SessionState::Closed {
            debug!(profile = %self.profile, sim_time = self.sim_time, "intersection session closed");
        }
        self.state = SessionState::Closed;
        Ok(())
    }

    fn state(&self) -> SessionState {
        self.state
    }
}
