pub mod barometer;
pub mod datatypes;
pub mod gps;
pub mod imu;
pub mod profile;
pub mod replay;

use chrono::TimeDelta;
use rand_distr::Normal;
use thiserror::Error;

use crate::utils::time::Instant;

pub use datatypes::{GpsFix, RawSample, SensorReading};
pub use profile::FlightProfile;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SensorError {
    #[error("{sensor} read failed: {reason}")]
    ReadFailed { sensor: String, reason: String },

    #[error("{sensor} returned an out of range value ({value})")]
    OutOfRange { sensor: String, value: f64 },
}

/// A source of readings sampled at a fixed period.
///
/// Hardware drivers implement this outside of this crate. `Ok(None)` means
/// the source is exhausted and its task should stop.
pub trait SensorProducer: Send {
    fn name(&self) -> &str;

    fn period(&self) -> TimeDelta;

    fn sample(&mut self, t: Instant) -> Result<Option<SensorReading>, SensorError>;
}

/// Zero mean gaussian noise with standard deviation `std`.
///
/// `Normal::new` accepts a negative deviation, so the range is checked here.
pub(crate) fn gaussian_noise(std: f64, sensor: &str) -> Result<Normal<f64>, SensorError> {
    let out_of_range = || SensorError::OutOfRange {
        sensor: sensor.to_string(),
        value: std,
    };

    if !(std.is_finite() && std >= 0.0) {
        return Err(out_of_range());
    }

    Normal::new(0.0, std).map_err(|_| out_of_range())
}
