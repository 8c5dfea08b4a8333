use crate::utils::time::{Instant, MissionTime};
use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsFix {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub altitude_m: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorReading {
    /// Barometric altitude above the launch site. Replayed altitudes carry no
    /// pressure.
    Altitude {
        pressure_pa: Option<f64>,
        altitude_m: f64,
    },
    Imu {
        acceleration_m_s2: [f64; 3],
        angular_rate_rad_s: [f64; 3],
    },
    Gps(GpsFix),
}

impl SensorReading {
    pub fn altitude_m(&self) -> Option<f64> {
        if let SensorReading::Altitude { altitude_m, .. } = self {
            Some(*altitude_m)
        } else {
            None
        }
    }
}

/// One reading, stamped by the producer task that sampled it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSample {
    /// Per producer, increases by one for every sample sent.
    pub seq: u64,
    pub t: Instant,
    pub reading: SensorReading,
}

impl Display for RawSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] #{} {:?}", MissionTime(self.t), self.seq, self.reading)
    }
}
