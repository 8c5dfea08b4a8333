use chrono::TimeDelta;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use rand_xoshiro::Xoshiro256PlusPlus;

use super::{FlightProfile, SensorError, SensorProducer, SensorReading, gaussian_noise};
use crate::utils::time::Instant;

/// IMU mounted along the vehicle axis, body z pointing up. Only the axial
/// specific force follows the profile, the other axes read pure noise.
#[derive(Debug)]
pub struct SimulatedImu {
    profile: FlightProfile,
    acc_noise: Normal<f64>,
    gyro_noise: Normal<f64>,
    rng: Xoshiro256PlusPlus,
    period: TimeDelta,
}

impl SimulatedImu {
    pub fn new(
        profile: FlightProfile,
        acc_noise_m_s2: f64,
        gyro_noise_rad_s: f64,
        period: TimeDelta,
        seed: u64,
    ) -> Result<Self, SensorError> {
        Ok(Self {
            profile,
            acc_noise: gaussian_noise(acc_noise_m_s2, "imu accelerometer noise")?,
            gyro_noise: gaussian_noise(gyro_noise_rad_s, "imu gyroscope noise")?,
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
            period,
        })
    }
}

impl SensorProducer for SimulatedImu {
    fn name(&self) -> &str {
        "imu"
    }

    fn period(&self) -> TimeDelta {
        self.period
    }

    fn sample(&mut self, t: Instant) -> Result<Option<SensorReading>, SensorError> {
        let axial = self.profile.specific_force_m_s2(t.elapsed_seconds());

        let acc = [0.0, 0.0, axial].map(|a| a + self.acc_noise.sample(&mut self.rng));
        let gyro = [0.0; 3].map(|w: f64| w + self.gyro_noise.sample(&mut self.rng));

        Ok(Some(SensorReading::Imu {
            acceleration_m_s2: acc,
            angular_rate_rad_s: gyro,
        }))
    }
}
