use super::{ConfigError, check_at_least, check_greater};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilteredAltitude {
    pub estimate: f64,
    pub error_covariance: f64,
}

impl Default for FilteredAltitude {
    fn default() -> Self {
        FilteredAltitude {
            estimate: 0.0,
            error_covariance: 1.0,
        }
    }
}

/// Scalar Kalman filter over barometric altitude, with a random walk process
/// model (one state, one measurement).
///
/// Its output is the only altitude the flight state machine ever sees.
#[derive(Debug, Clone)]
pub struct AltitudeEstimator {
    state: FilteredAltitude,
    initial: FilteredAltitude,
    process_variance: f64,
    measurement_variance: f64,
}

impl AltitudeEstimator {
    pub fn new(
        process_variance: f64,
        measurement_variance: f64,
        initial: FilteredAltitude,
    ) -> Result<Self, ConfigError> {
        check_at_least("process_variance", process_variance, 0.0)?;
        check_greater("measurement_variance", measurement_variance, 0.0)?;
        check_at_least("initial_estimate", initial.estimate, f64::MIN)?;
        check_at_least("initial_covariance", initial.error_covariance, 0.0)?;

        // With no process noise and a certain initial state the gain would be
        // stuck at zero forever
        check_greater(
            "initial_covariance + process_variance",
            initial.error_covariance + process_variance,
            0.0,
        )?;

        Ok(Self {
            state: initial,
            initial,
            process_variance,
            measurement_variance,
        })
    }

    pub fn update(&mut self, raw: f64) -> f64 {
        let predicted_covariance = self.state.error_covariance + self.process_variance;
        let gain = predicted_covariance / (predicted_covariance + self.measurement_variance);

        self.state.estimate += gain * (raw - self.state.estimate);
        self.state.error_covariance = (1.0 - gain) * predicted_covariance;

        self.state.estimate
    }

    pub fn estimate(&self) -> f64 {
        self.state.estimate
    }

    pub fn state(&self) -> FilteredAltitude {
        self.state
    }

    /// Back to the initial state. Only done when arming for a new flight.
    pub fn reset(&mut self) {
        self.state = self.initial;
    }
}
