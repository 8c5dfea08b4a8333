pub mod ada;
pub mod estimator;
pub mod fsm;
pub mod pyro;
pub mod state;

use thiserror::Error;

pub use ada::{AltitudeWindow, Apogee, ApogeeDetector};
pub use estimator::{AltitudeEstimator, FilteredAltitude};
pub use fsm::{DetectionConfig, Effectors, FlightStateMachine};
pub use pyro::{
    ActuationError, ActuationEvent, ArmingSwitch, DeploymentLatch, FireOutcome,
    PyroActuationController, PyroChannel, PyroDriver,
};
pub use state::{FlightState, SharedFlightState};

/// Rejected construction parameters of a GNC component. Always fatal: no
/// flight may start with an invalid pipeline.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("'{name}' is {value}, expected a finite value {expected}")]
    OutOfRange {
        name: &'static str,
        value: f64,
        expected: String,
    },

    #[error("'{0}' must not be zero")]
    Zero(&'static str),
}

pub(crate) fn check_greater(name: &'static str, value: f64, min: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > min {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name,
            value,
            expected: format!("> {min}"),
        })
    }
}

pub(crate) fn check_at_least(name: &'static str, value: f64, min: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= min {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name,
            value,
            expected: format!(">= {min}"),
        })
    }
}
