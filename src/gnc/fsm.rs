use chrono::TimeDelta;
use log::{debug, error, info, warn};
use statig::prelude::*;

use super::{
    ConfigError, check_at_least, check_greater,
    ada::{Apogee, ApogeeDetector},
    pyro::{ActuationError, FireOutcome, PyroActuationController, PyroChannel},
    state::{FlightState, SharedFlightState},
};
use crate::utils::time::Clock;

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionConfig {
    pub launch_threshold_m: f64,
    pub launch_window_m: f64,
    pub apogee_threshold_m: f64,
    pub apogee_buffer_depth: usize,
    /// Consecutive samples with a decreasing climb rate needed to declare
    /// coasting. 0 disables the coasting phase.
    pub coast_confirm_samples: usize,
    pub settle_delay: TimeDelta,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            launch_threshold_m: 5.0,
            launch_window_m: 20.0,
            apogee_threshold_m: 5.0,
            apogee_buffer_depth: 10,
            coast_confirm_samples: 3,
            settle_delay: TimeDelta::milliseconds(50),
        }
    }
}

impl DetectionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_at_least("launch_threshold_m", self.launch_threshold_m, 0.0)?;
        check_greater("launch_window_m", self.launch_window_m, 0.0)?;
        check_greater("apogee_threshold_m", self.apogee_threshold_m, 0.0)?;

        if self.apogee_buffer_depth == 0 {
            return Err(ConfigError::Zero("apogee_buffer_depth"));
        }

        if self.settle_delay < TimeDelta::zero() {
            return Err(ConfigError::OutOfRange {
                name: "settle_delay",
                value: self.settle_delay.num_milliseconds() as f64,
                expected: ">= 0 ms".to_string(),
            });
        }

        Ok(())
    }
}

/// Tells burnout apart from climb: the per sample climb of the filtered
/// altitude must shrink on several consecutive samples.
#[derive(Debug, Clone, Default)]
struct CoastDetector {
    confirm: usize,
    last_altitude: Option<f64>,
    last_rate: Option<f64>,
    streak: usize,
}

impl CoastDetector {
    fn new(confirm: usize) -> Self {
        Self {
            confirm,
            ..Default::default()
        }
    }

    fn observe(&mut self, altitude: f64) -> bool {
        let rate = self.last_altitude.map(|last| altitude - last);

        if let (Some(rate), Some(last_rate)) = (rate, self.last_rate) {
            if rate < last_rate {
                self.streak += 1;
            } else {
                self.streak = 0;
            }
        }

        self.last_altitude = Some(altitude);
        self.last_rate = rate;

        self.confirm > 0 && self.streak >= self.confirm
    }

    fn restart(&mut self) {
        self.streak = 0;
    }

    fn reset(&mut self) {
        *self = Self::new(self.confirm);
    }
}

/// What the flight phases act on: the pyro channels, and the clock timing
/// settle delays and charge pulses.
pub struct Effectors {
    pub pyro: PyroActuationController,
    pub clock: Box<dyn Clock>,
}

/// One filtered altitude, dispatched to the current flight phase.
struct Tick {
    altitude_m: f64,
}

/// Flight phase sequencer, driven by the filtered altitude.
///
/// The machine only moves forward. Drogue and main deployment are requested
/// on entry of their deploy states; the pyro latches make repeated requests
/// harmless.
pub struct FlightStateMachine {
    machine: StateMachine<FlightPhases>,
    blank: FlightPhases,
    shared: SharedFlightState,
}

impl FlightStateMachine {
    pub fn new(config: DetectionConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let shared = SharedFlightState::default();
        let blank = FlightPhases {
            ada: ApogeeDetector::new(config.apogee_buffer_depth, config.apogee_threshold_m)?,
            coast: CoastDetector::new(config.coast_confirm_samples),
            phase: FlightState::default(),
            shared: shared.clone(),
            config,
        };

        Ok(Self {
            machine: blank.clone().state_machine(),
            blank,
            shared,
        })
    }

    pub fn state(&self) -> FlightState {
        self.shared.load()
    }

    /// Read handle for other tasks.
    pub fn shared_state(&self) -> SharedFlightState {
        self.shared.clone()
    }

    pub fn apogee(&self) -> Option<Apogee> {
        self.machine.ada.apogee()
    }

    /// Evaluates one filtered altitude sample and returns the state the
    /// machine settled in.
    ///
    /// Apogee, drogue deploy and main deploy are evaluated again on the
    /// sample that entered them, so the apogee cascade completes within a
    /// single sample.
    pub fn step(&mut self, altitude: f64, effectors: &mut Effectors) -> FlightState {
        let tick = Tick {
            altitude_m: altitude,
        };

        loop {
            let before = self.state();
            self.machine.handle_with_context(&tick, effectors);
            let after = self.state();

            if after == before || !settles_on_entry(after) {
                return after;
            }
        }
    }

    /// Back to the pad for a new flight.
    pub fn reset(&mut self) {
        self.machine = self.blank.clone().state_machine();
        self.shared.store(FlightState::PreFlightGround);
    }
}

fn settles_on_entry(state: FlightState) -> bool {
    matches!(
        state,
        FlightState::Apogee | FlightState::DrogueDeploy | FlightState::MainDeploy
    )
}

fn deploy(channel: PyroChannel, effectors: &mut Effectors) {
    let Effectors { pyro, clock } = effectors;

    match pyro.fire(channel, clock.as_mut()) {
        Ok(FireOutcome::Fired(_)) => {}
        Ok(FireOutcome::AlreadyLatched) => debug!("{channel} already fired"),
        Err(e @ ActuationError::Unarmed(_)) => warn!("{e}"),
        Err(e) => error!("{e}"),
    }
}

#[derive(Clone)]
struct FlightPhases {
    config: DetectionConfig,
    phase: FlightState,
    shared: SharedFlightState,
    ada: ApogeeDetector,
    coast: CoastDetector,
}

#[state_machine(
    initial = "State::pre_flight_ground()",
    state(derive(Debug)),
    superstate(derive(Debug))
)]
impl FlightPhases {
    #[superstate]
    fn on_ground() -> Response<State> {
        Handled
    }

    #[state(superstate = "on_ground")]
    fn pre_flight_ground(&mut self, event: &Tick) -> Response<State> {
        let altitude = event.altitude_m;
        let launch = self.config.launch_threshold_m;

        self.ada.warm_up(altitude);
        self.coast.observe(altitude);

        if altitude > launch && altitude < launch + self.config.launch_window_m {
            self.coast.restart();
            Transition(State::powered_flight())
        } else {
            Super
        }
    }

    #[superstate]
    fn in_flight() -> Response<State> {
        Handled
    }

    #[action]
    fn enter_powered_flight(&mut self, context: &mut Effectors) {
        self.enter(FlightState::PoweredFlight, context);
    }

    #[state(superstate = "in_flight", entry_action = "enter_powered_flight")]
    fn powered_flight(&mut self, event: &Tick) -> Response<State> {
        let coasting = self.coast.observe(event.altitude_m);

        if self.ada.update(event.altitude_m).is_some() {
            Transition(State::apogee())
        } else if coasting {
            Transition(State::coasting())
        } else {
            Super
        }
    }

    #[action]
    fn enter_coasting(&mut self, context: &mut Effectors) {
        self.enter(FlightState::Coasting, context);
    }

    #[state(superstate = "in_flight", entry_action = "enter_coasting")]
    fn coasting(&mut self, event: &Tick) -> Response<State> {
        if self.ada.update(event.altitude_m).is_some() {
            Transition(State::apogee())
        } else {
            Super
        }
    }

    #[action]
    fn enter_apogee(&mut self, context: &mut Effectors) {
        if let Some(apogee) = self.ada.apogee() {
            info!(
                "Apogee at {:.1} m (dropped {:.1} m over the window)",
                apogee.altitude_m, apogee.drop_m
            );
        }

        self.enter(FlightState::Apogee, context);
    }

    #[state(superstate = "in_flight", entry_action = "enter_apogee")]
    fn apogee() -> Response<State> {
        Transition(State::drogue_deploy())
    }

    #[action]
    fn enter_drogue_deploy(&mut self, context: &mut Effectors) {
        self.enter(FlightState::DrogueDeploy, context);
        deploy(PyroChannel::Drogue, context);
    }

    #[state(superstate = "in_flight", entry_action = "enter_drogue_deploy")]
    fn drogue_deploy(context: &mut Effectors) -> Response<State> {
        // Only fires if the entry pulse was interrupted
        if !context.pyro.latch().drogue_fired() && context.pyro.is_armed() {
            deploy(PyroChannel::Drogue, context);
        }

        Transition(State::drogue_descent())
    }

    #[superstate]
    fn descent(&mut self, context: &mut Effectors, event: &Tick) -> Response<State> {
        let launch = self.config.launch_threshold_m;

        if event.altitude_m < launch {
            if !context.pyro.latch().main_fired() {
                warn!("Below {launch} m with the main chute not deployed");
            }

            Transition(State::post_flight_ground())
        } else {
            Handled
        }
    }

    #[action]
    fn enter_drogue_descent(&mut self, context: &mut Effectors) {
        self.enter(FlightState::DrogueDescent, context);
    }

    #[state(superstate = "descent", entry_action = "enter_drogue_descent")]
    fn drogue_descent(&mut self, context: &mut Effectors, event: &Tick) -> Response<State> {
        if !context.pyro.latch().drogue_fired() && context.pyro.is_armed() {
            deploy(PyroChannel::Drogue, context);
        }

        let altitude = event.altitude_m;
        let below_apogee = self
            .ada
            .apogee()
            .is_some_and(|apogee| altitude <= apogee.altitude_m);

        if altitude >= self.config.launch_threshold_m
            && below_apogee
            && !context.pyro.latch().main_fired()
        {
            Transition(State::main_deploy())
        } else {
            Super
        }
    }

    #[action]
    fn enter_main_deploy(&mut self, context: &mut Effectors) {
        self.enter(FlightState::MainDeploy, context);
        deploy(PyroChannel::Main, context);
    }

    #[state(superstate = "descent", entry_action = "enter_main_deploy")]
    fn main_deploy(&mut self, context: &mut Effectors, event: &Tick) -> Response<State> {
        // Retries until a pulse goes out, the latch makes it a no-op after
        if context.pyro.is_armed() {
            deploy(PyroChannel::Main, context);
        }

        let launch = self.config.launch_threshold_m;

        if context.pyro.latch().main_fired() && event.altitude_m > launch {
            Transition(State::main_descent())
        } else {
            Super
        }
    }

    #[action]
    fn enter_main_descent(&mut self, context: &mut Effectors) {
        self.enter(FlightState::MainDescent, context);
    }

    #[state(superstate = "descent", entry_action = "enter_main_descent")]
    fn main_descent() -> Response<State> {
        Super
    }

    #[action]
    fn enter_post_flight_ground(&mut self, context: &mut Effectors) {
        self.enter(FlightState::PostFlightGround, context);
    }

    #[state(superstate = "on_ground", entry_action = "enter_post_flight_ground")]
    fn post_flight_ground() -> Response<State> {
        Super
    }
}

impl FlightPhases {
    fn enter(&mut self, next: FlightState, effectors: &mut Effectors) {
        debug_assert!(next > self.phase);

        info!("{} -> {}", self.phase, next);

        self.phase = next;
        self.shared.store(next);

        effectors.clock.delay(self.config.settle_delay);
    }
}
