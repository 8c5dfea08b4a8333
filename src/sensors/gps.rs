use chrono::TimeDelta;

use super::{FlightProfile, GpsFix, SensorError, SensorProducer, SensorReading};
use crate::utils::time::Instant;

/// GPS receiver reporting a vertical flight over the launch site. Fixes are
/// only available once the receiver has locked.
#[derive(Debug)]
pub struct SimulatedGps {
    profile: FlightProfile,
    latitude_deg: f64,
    longitude_deg: f64,
    base_altitude_m: f64,
    lock_time: TimeDelta,
    period: TimeDelta,
}

impl SimulatedGps {
    pub fn new(
        profile: FlightProfile,
        site: GpsFix,
        lock_time: TimeDelta,
        period: TimeDelta,
    ) -> Self {
        Self {
            profile,
            latitude_deg: site.latitude_deg,
            longitude_deg: site.longitude_deg,
            base_altitude_m: site.altitude_m,
            lock_time,
            period,
        }
    }
}

impl SensorProducer for SimulatedGps {
    fn name(&self) -> &str {
        "gps"
    }

    fn period(&self) -> TimeDelta {
        self.period
    }

    fn sample(&mut self, t: Instant) -> Result<Option<SensorReading>, SensorError> {
        if t.elapsed() < self.lock_time {
            return Err(SensorError::ReadFailed {
                sensor: self.name().to_string(),
                reason: "no fix".to_string(),
            });
        }

        Ok(Some(SensorReading::Gps(GpsFix {
            latitude_deg: self.latitude_deg,
            longitude_deg: self.longitude_deg,
            altitude_m: self.base_altitude_m + self.profile.altitude_m(t.elapsed_seconds()),
        })))
    }
}
