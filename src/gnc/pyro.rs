use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use chrono::TimeDelta;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;

use crate::utils::time::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum PyroChannel {
    Drogue,
    Main,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum ActuationEvent {
    DrogueFired,
    MainFired,
}

impl From<PyroChannel> for ActuationEvent {
    fn from(value: PyroChannel) -> Self {
        match value {
            PyroChannel::Drogue => ActuationEvent::DrogueFired,
            PyroChannel::Main => ActuationEvent::MainFired,
        }
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct DriverError(pub String);

#[derive(Debug, Error)]
pub enum ActuationError {
    #[error("Pyro is not armed, refusing to fire the {0} charge")]
    Unarmed(PyroChannel),

    #[error("Ignition driver failure on the {channel} channel")]
    Driver {
        channel: PyroChannel,
        #[source]
        source: DriverError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    Fired(ActuationEvent),
    /// The channel already fired during this flight, nothing was done.
    AlreadyLatched,
}

/// Ignition hardware. Implemented by the board support layer.
pub trait PyroDriver: Send {
    fn energize(&mut self, channel: PyroChannel) -> Result<(), DriverError>;

    fn de_energize(&mut self, channel: PyroChannel) -> Result<(), DriverError>;
}

/// Driver for benches and replays: logs the pin edges, touches no hardware.
#[derive(Debug, Default)]
pub struct DryRunDriver;

impl PyroDriver for DryRunDriver {
    fn energize(&mut self, channel: PyroChannel) -> Result<(), DriverError> {
        info!("[dry run] {channel} ignition channel HIGH");
        Ok(())
    }

    fn de_energize(&mut self, channel: PyroChannel) -> Result<(), DriverError> {
        info!("[dry run] {channel} ignition channel LOW");
        Ok(())
    }
}

/// Arming state, owned by the hardware configuration. The pyro controller only
/// reads it.
#[derive(Debug, Clone, Default)]
pub struct ArmingSwitch {
    armed: Arc<AtomicBool>,
}

impl ArmingSwitch {
    pub fn new(armed: bool) -> Self {
        ArmingSwitch {
            armed: Arc::new(AtomicBool::new(armed)),
        }
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::Release);
    }

    pub fn disarm(&self) {
        self.armed.store(false, Ordering::Release);
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }
}

/// One-way fired flags, one per channel. Cleared only when re-arming for a
/// new flight.
#[derive(Debug, Clone, Default)]
pub struct DeploymentLatch {
    drogue_fired: Arc<AtomicBool>,
    main_fired: Arc<AtomicBool>,
}

impl DeploymentLatch {
    fn flag(&self, channel: PyroChannel) -> &AtomicBool {
        match channel {
            PyroChannel::Drogue => &self.drogue_fired,
            PyroChannel::Main => &self.main_fired,
        }
    }

    pub fn is_set(&self, channel: PyroChannel) -> bool {
        self.flag(channel).load(Ordering::Acquire)
    }

    pub fn drogue_fired(&self) -> bool {
        self.is_set(PyroChannel::Drogue)
    }

    pub fn main_fired(&self) -> bool {
        self.is_set(PyroChannel::Main)
    }

    fn set(&self, channel: PyroChannel) {
        self.flag(channel).store(true, Ordering::Release);
    }

    fn reset(&self) {
        self.drogue_fired.store(false, Ordering::Release);
        self.main_fired.store(false, Ordering::Release);
    }
}

/// Turns a deploy state entry into exactly one charge pulse per channel and
/// flight.
pub struct PyroActuationController {
    driver: Box<dyn PyroDriver>,
    arming: ArmingSwitch,
    latch: DeploymentLatch,
    pulse: TimeDelta,
}

impl PyroActuationController {
    pub fn new(driver: Box<dyn PyroDriver>, arming: ArmingSwitch, pulse: TimeDelta) -> Self {
        Self {
            driver,
            arming,
            latch: DeploymentLatch::default(),
            pulse,
        }
    }

    /// Fires `channel` unless it already fired this flight.
    ///
    /// Blocks the caller for the charge pulse duration. The latch is set once
    /// the pulse has been issued, even if releasing the channel fails, so a
    /// charge is never pulsed twice.
    pub fn fire(
        &mut self,
        channel: PyroChannel,
        clock: &mut dyn Clock,
    ) -> Result<FireOutcome, ActuationError> {
        if self.latch.is_set(channel) {
            return Ok(FireOutcome::AlreadyLatched);
        }

        if !self.arming.is_armed() {
            return Err(ActuationError::Unarmed(channel));
        }

        self.driver
            .energize(channel)
            .map_err(|source| ActuationError::Driver { channel, source })?;

        clock.delay(self.pulse);

        let released = self.driver.de_energize(channel);
        self.latch.set(channel);

        let event = ActuationEvent::from(channel);
        info!("{event} ({} ms pulse)", self.pulse.num_milliseconds());

        if let Err(source) = released {
            warn!("{channel} channel may still be energized: {source}");
            return Err(ActuationError::Driver { channel, source });
        }

        Ok(FireOutcome::Fired(event))
    }

    pub fn is_armed(&self) -> bool {
        self.arming.is_armed()
    }

    pub fn latch(&self) -> &DeploymentLatch {
        &self.latch
    }

    /// Clears both latches for a new flight.
    pub fn rearm(&mut self) {
        self.latch.reset();
    }
}
