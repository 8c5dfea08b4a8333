use chrono::TimeDelta;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rand_xoshiro::Xoshiro256PlusPlus;

use super::{
    FlightProfile, SensorError, SensorProducer, SensorReading, gaussian_noise, profile::G0,
};
use crate::utils::time::Instant;

/// International Standard Atmosphere, troposphere layer only.
#[derive(Debug, Clone)]
pub struct AtmosphereIsa {
    pressure_0: f64,
    temperature_0: f64,
    g_0: f64,
    specific_gas_constant: f64,
    a: f64,
}

impl Default for AtmosphereIsa {
    fn default() -> Self {
        AtmosphereIsa {
            pressure_0: 101325.0,
            temperature_0: 288.15,
            g_0: G0,
            specific_gas_constant: 287.052874,
            a: -0.0065,
        }
    }
}

impl AtmosphereIsa {
    /// Standard atmosphere with a different sea level pressure (QNH).
    pub fn with_reference_pressure(pressure_0: f64) -> Self {
        AtmosphereIsa {
            pressure_0,
            ..Default::default()
        }
    }

    pub fn temperature_k(&self, alt_m: f64) -> f64 {
        self.temperature_0 + self.a * alt_m
    }

    pub fn pressure_pa(&self, alt_m: f64) -> f64 {
        let exponent = -self.g_0 / (self.a * self.specific_gas_constant);
        (self.temperature_k(alt_m) / self.temperature_0).powf(exponent) * self.pressure_0
    }

    /// Inverse of [`AtmosphereIsa::pressure_pa`].
    pub fn altitude_m(&self, pressure_pa: f64) -> f64 {
        let exponent = -self.a * self.specific_gas_constant / self.g_0;
        self.temperature_0 / self.a * ((pressure_pa / self.pressure_0).powf(exponent) - 1.0)
    }
}

/// Converts static pressure into altitude above the launch site.
#[derive(Debug, Clone)]
pub struct Barometer {
    atmosphere: AtmosphereIsa,
    base_altitude_m: f64,
}

impl Barometer {
    pub fn new(atmosphere: AtmosphereIsa, base_altitude_m: f64) -> Self {
        Self {
            atmosphere,
            base_altitude_m,
        }
    }

    pub fn altitude_agl_m(&self, pressure_pa: f64) -> f64 {
        self.atmosphere.altitude_m(pressure_pa) - self.base_altitude_m
    }

    pub fn pressure_pa(&self, altitude_agl_m: f64) -> f64 {
        self.atmosphere
            .pressure_pa(altitude_agl_m + self.base_altitude_m)
    }
}

/// Barometer following a [`FlightProfile`], with gaussian pressure noise and
/// random read failures.
#[derive(Debug)]
pub struct SimulatedBarometer {
    profile: FlightProfile,
    barometer: Barometer,
    noise: Normal<f64>,
    dropout_probability: f64,
    rng: Xoshiro256PlusPlus,
    period: TimeDelta,
}

impl SimulatedBarometer {
    pub fn new(
        profile: FlightProfile,
        barometer: Barometer,
        noise_pa: f64,
        dropout_probability: f64,
        period: TimeDelta,
        seed: u64,
    ) -> Result<Self, SensorError> {
        let noise = gaussian_noise(noise_pa, "barometer noise")?;

        if !(0.0..=1.0).contains(&dropout_probability) {
            return Err(SensorError::OutOfRange {
                sensor: "barometer dropout probability".to_string(),
                value: dropout_probability,
            });
        }

        Ok(Self {
            profile,
            barometer,
            noise,
            dropout_probability,
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
            period,
        })
    }
}

impl SensorProducer for SimulatedBarometer {
    fn name(&self) -> &str {
        "barometer"
    }

    fn period(&self) -> TimeDelta {
        self.period
    }

    fn sample(&mut self, t: Instant) -> Result<Option<SensorReading>, SensorError> {
        if self.rng.random_bool(self.dropout_probability) {
            return Err(SensorError::ReadFailed {
                sensor: self.name().to_string(),
                reason: "no response on the bus".to_string(),
            });
        }

        let truth = self.profile.altitude_m(t.elapsed_seconds());
        let pressure_pa = self.barometer.pressure_pa(truth) + self.noise.sample(&mut self.rng);

        Ok(Some(SensorReading::Altitude {
            pressure_pa: Some(pressure_pa),
            altitude_m: self.barometer.altitude_agl_m(pressure_pa),
        }))
    }
}
