use std::panic::{self, AssertUnwindSafe};

use chrono::TimeDelta;
use log::{error, warn};

use crate::{
    gnc::{
        AltitudeEstimator, ArmingSwitch, ConfigError, DeploymentLatch, Effectors, FlightState,
        FlightStateMachine, PyroActuationController, PyroDriver, SharedFlightState,
    },
    parameters::Parameters,
    utils::time::{Clock, Instant},
};

/// Read only view of the flight computer, shareable with any task.
#[derive(Debug, Clone)]
pub struct FlightStatus {
    state: SharedFlightState,
    latch: DeploymentLatch,
}

impl FlightStatus {
    pub fn state(&self) -> FlightState {
        self.state.load()
    }

    pub fn drogue_fired(&self) -> bool {
        self.latch.drogue_fired()
    }

    pub fn main_fired(&self) -> bool {
        self.latch.main_fired()
    }

    pub fn shared_state(&self) -> SharedFlightState {
        self.state.clone()
    }
}

/// The state evaluation pipeline: estimator, flight state machine and pyro
/// controller, driven by raw altitudes from live sensors or a replay.
pub struct FlightComputerCore {
    estimator: AltitudeEstimator,
    fsm: FlightStateMachine,
    effectors: Effectors,
    samples: u64,
    bad_readings: u64,
    faults: u64,
}

impl FlightComputerCore {
    pub fn new(
        estimator: AltitudeEstimator,
        fsm: FlightStateMachine,
        pyro: PyroActuationController,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            estimator,
            fsm,
            effectors: Effectors { pyro, clock },
            samples: 0,
            bad_readings: 0,
            faults: 0,
        }
    }

    pub fn from_parameters(
        params: &Parameters,
        driver: Box<dyn PyroDriver>,
        arming: ArmingSwitch,
        clock: Box<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(
            params.estimator()?,
            FlightStateMachine::new(params.detection())?,
            PyroActuationController::new(driver, arming, params.pyro_pulse()),
            clock,
        ))
    }

    /// Feeds one raw altitude through the pipeline and returns the resulting
    /// state.
    ///
    /// A non finite reading is a sensor failure: the estimate is held and the
    /// state machine is not stepped. A panic during evaluation is contained
    /// and the machine holds its state.
    pub fn process_altitude(&mut self, raw_m: f64) -> FlightState {
        if !raw_m.is_finite() {
            self.bad_readings += 1;

            if self.bad_readings.is_power_of_two() {
                warn!(
                    "Discarding non finite altitude, holding {:.1} m ({} bad readings)",
                    self.estimator.estimate(),
                    self.bad_readings
                );
            }

            return self.fsm.state();
        }

        self.samples += 1;

        let Self {
            estimator,
            fsm,
            effectors,
            ..
        } = self;

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let filtered = estimator.update(raw_m);
            fsm.step(filtered, effectors)
        }));

        match result {
            Ok(state) => state,
            Err(_) => {
                self.faults += 1;
                error!(
                    "State evaluation failed, holding {} ({} faults)",
                    self.fsm.state(),
                    self.faults
                );
                self.fsm.state()
            }
        }
    }

    /// Runs a recorded altitude sequence, one sample per `period`, and
    /// returns the state after each sample.
    pub fn replay(
        &mut self,
        altitudes: impl IntoIterator<Item = f64>,
        period: TimeDelta,
    ) -> Vec<FlightState> {
        altitudes
            .into_iter()
            .map(|a| {
                let state = self.process_altitude(a);
                self.effectors.clock.delay(period);
                state
            })
            .collect()
    }

    pub fn status(&self) -> FlightStatus {
        FlightStatus {
            state: self.fsm.shared_state(),
            latch: self.effectors.pyro.latch().clone(),
        }
    }

    pub fn state(&self) -> FlightState {
        self.fsm.state()
    }

    pub fn estimate(&self) -> f64 {
        self.estimator.estimate()
    }

    pub fn now(&self) -> Instant {
        self.effectors.clock.monotonic()
    }

    pub fn advance(&mut self, duration: TimeDelta) {
        self.effectors.clock.delay(duration);
    }

    /// Valid altitudes processed so far.
    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn bad_readings(&self) -> u64 {
        self.bad_readings
    }

    pub fn faults(&self) -> u64 {
        self.faults
    }

    /// Clears the estimator, the state machine and the deployment latches
    /// before a new flight. Never called mid flight.
    pub fn arm_for_flight(&mut self) {
        self.estimator.reset();
        self.fsm.reset();
        self.effectors.pyro.rearm();
        self.samples = 0;
        self.bad_readings = 0;
        self.faults = 0;
    }
}
