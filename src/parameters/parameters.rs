use std::{
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    channels,
    gnc::{AltitudeEstimator, ConfigError, DetectionConfig, FilteredAltitude},
    mode::ModeSignal,
    sensors::{FlightProfile, GpsFix},
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Cannot read parameter file '{path}'")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Error deserializing parameters")]
    Deserialize(#[from] toml::de::Error),

    #[error("Invalid parameter '{path}': {reason}")]
    Invalid { path: String, reason: String },

    #[error("Invalid GNC parameters")]
    Gnc(#[from] ConfigError),
}

fn invalid(path: &str, reason: impl Into<String>) -> Error {
    Error::Invalid {
        path: path.to_string(),
        reason: reason.into(),
    }
}

fn ms(v: u64) -> TimeDelta {
    i64::try_from(v)
        .ok()
        .and_then(TimeDelta::try_milliseconds)
        .unwrap_or(TimeDelta::MAX)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EstimatorParams {
    pub process_variance: f64,
    pub measurement_variance: f64,
    pub initial_estimate: f64,
    pub initial_covariance: f64,
}

impl Default for EstimatorParams {
    fn default() -> Self {
        Self {
            process_variance: 0.01,
            measurement_variance: 0.5,
            initial_estimate: 0.0,
            initial_covariance: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectionParams {
    pub launch_threshold_m: f64,
    pub launch_window_m: f64,
    pub apogee_threshold_m: f64,
    pub apogee_buffer_depth: usize,
    pub coast_confirm_samples: usize,
}

impl Default for DetectionParams {
    fn default() -> Self {
        let d = DetectionConfig::default();

        Self {
            launch_threshold_m: d.launch_threshold_m,
            launch_window_m: d.launch_window_m,
            apogee_threshold_m: d.apogee_threshold_m,
            apogee_buffer_depth: d.apogee_buffer_depth,
            coast_confirm_samples: d.coast_confirm_samples,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimingParams {
    pub settle_delay_ms: u64,
    /// Silence on the state evaluation channel before a stall warning.
    pub stall_warning_ms: u64,
}

impl Default for TimingParams {
    fn default() -> Self {
        Self {
            settle_delay_ms: 50,
            stall_warning_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PyroParams {
    pub pulse_ms: u64,
    /// Arming switch position in flight mode.
    pub armed: bool,
}

impl Default for PyroParams {
    fn default() -> Self {
        Self {
            pulse_ms: 1000,
            armed: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelParams {
    pub state_eval: usize,
    pub logging: usize,
    pub transmission: usize,
    pub debug: usize,
    pub debug_enabled: bool,
}

impl Default for ChannelParams {
    fn default() -> Self {
        Self {
            state_eval: 10,
            logging: 10,
            transmission: 10,
            debug: 10,
            debug_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModeParams {
    pub signal: ModeSignal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryParams {
    pub log_interval_ms: u64,
    pub transmit_interval_ms: u64,
}

impl Default for TelemetryParams {
    fn default() -> Self {
        Self {
            log_interval_ms: 10,
            transmit_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SensorParams {
    pub seed: u64,
    pub reference_pressure_pa: f64,
    pub base_altitude_m: f64,
    pub latitude_deg: f64,
    pub longitude_deg: f64,

    pub baro_period_ms: u64,
    pub baro_noise_pa: f64,
    pub baro_dropout_probability: f64,

    pub imu_period_ms: u64,
    pub acc_noise_m_s2: f64,
    pub gyro_noise_rad_s: f64,

    pub gps_period_ms: u64,
    pub gps_lock_ms: u64,

    pub profile: FlightProfile,
}

impl Default for SensorParams {
    fn default() -> Self {
        Self {
            seed: 0,
            reference_pressure_pa: 101325.0,
            base_altitude_m: 0.0,
            latitude_deg: 0.0,
            longitude_deg: 0.0,
            baro_period_ms: 50,
            baro_noise_pa: 6.0,
            baro_dropout_probability: 0.0,
            imu_period_ms: 20,
            acc_noise_m_s2: 0.05,
            gyro_noise_rad_s: 0.002,
            gps_period_ms: 1000,
            gps_lock_ms: 0,
            profile: FlightProfile::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReplayParams {
    pub file: PathBuf,
    pub sample_period_ms: u64,
    /// Pace the replay on the wall clock through the threaded pipeline instead
    /// of stepping it synchronously on simulated time.
    pub realtime: bool,
}

impl Default for ReplayParams {
    fn default() -> Self {
        Self {
            file: PathBuf::from("config/replay_flight.csv"),
            sample_period_ms: 50,
            realtime: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaqParams {
    /// Upload source. Standard input when not set.
    pub input: Option<PathBuf>,
    pub output: PathBuf,
}

impl Default for DaqParams {
    fn default() -> Self {
        Self {
            input: None,
            output: PathBuf::from("data/test_data.csv"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Parameters {
    pub estimator: EstimatorParams,
    pub detection: DetectionParams,
    pub timing: TimingParams,
    pub pyro: PyroParams,
    pub channels: ChannelParams,
    pub mode: ModeParams,
    pub telemetry: TelemetryParams,
    pub sensors: SensorParams,
    pub replay: ReplayParams,
    pub daq: DaqParams,
}

impl Parameters {
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let toml_str = fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse_str(&toml_str)
    }

    /// Parses and validates a parameter document. Missing sections and keys
    /// take their default value.
    pub fn parse_str(toml_str: &str) -> Result<Self, Error> {
        let params: Parameters = toml::from_str(toml_str)?;
        params.validate()?;

        Ok(params)
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.estimator()?;
        self.detection().validate()?;

        for (name, capacity) in [
            ("channels.state_eval", self.channels.state_eval),
            ("channels.logging", self.channels.logging),
            ("channels.transmission", self.channels.transmission),
            ("channels.debug", self.channels.debug),
        ] {
            if capacity == 0 {
                return Err(invalid(name, "channel capacity must be at least 1"));
            }
        }

        for (name, period) in [
            ("timing.stall_warning_ms", self.timing.stall_warning_ms),
            ("pyro.pulse_ms", self.pyro.pulse_ms),
            ("sensors.baro_period_ms", self.sensors.baro_period_ms),
            ("sensors.imu_period_ms", self.sensors.imu_period_ms),
            ("sensors.gps_period_ms", self.sensors.gps_period_ms),
            ("replay.sample_period_ms", self.replay.sample_period_ms),
        ] {
            if period == 0 {
                return Err(invalid(name, "must be greater than zero"));
            }
        }

        for (name, std) in [
            ("sensors.baro_noise_pa", self.sensors.baro_noise_pa),
            ("sensors.acc_noise_m_s2", self.sensors.acc_noise_m_s2),
            ("sensors.gyro_noise_rad_s", self.sensors.gyro_noise_rad_s),
        ] {
            if !(std.is_finite() && std >= 0.0) {
                return Err(invalid(name, format!("{std} is not a standard deviation")));
            }
        }

        if !(0.0..=1.0).contains(&self.sensors.baro_dropout_probability) {
            return Err(invalid(
                "sensors.baro_dropout_probability",
                "must be between 0 and 1",
            ));
        }

        if !(self.sensors.reference_pressure_pa.is_finite()
            && self.sensors.reference_pressure_pa > 0.0)
        {
            return Err(invalid("sensors.reference_pressure_pa", "must be positive"));
        }

        let profile = &self.sensors.profile;
        for (name, v) in [
            ("sensors.profile.burn_time_s", profile.burn_time_s),
            (
                "sensors.profile.burn_acceleration_m_s2",
                profile.burn_acceleration_m_s2,
            ),
            (
                "sensors.profile.drogue_descent_rate_m_s",
                profile.drogue_descent_rate_m_s,
            ),
            (
                "sensors.profile.main_descent_rate_m_s",
                profile.main_descent_rate_m_s,
            ),
        ] {
            if !(v.is_finite() && v > 0.0) {
                return Err(invalid(name, "must be positive"));
            }
        }

        Ok(())
    }

    pub fn estimator(&self) -> Result<AltitudeEstimator, ConfigError> {
        AltitudeEstimator::new(
            self.estimator.process_variance,
            self.estimator.measurement_variance,
            FilteredAltitude {
                estimate: self.estimator.initial_estimate,
                error_covariance: self.estimator.initial_covariance,
            },
        )
    }

    pub fn detection(&self) -> DetectionConfig {
        DetectionConfig {
            launch_threshold_m: self.detection.launch_threshold_m,
            launch_window_m: self.detection.launch_window_m,
            apogee_threshold_m: self.detection.apogee_threshold_m,
            apogee_buffer_depth: self.detection.apogee_buffer_depth,
            coast_confirm_samples: self.detection.coast_confirm_samples,
            settle_delay: ms(self.timing.settle_delay_ms),
        }
    }

    pub fn pyro_pulse(&self) -> TimeDelta {
        ms(self.pyro.pulse_ms)
    }

    pub fn stall_warning(&self) -> TimeDelta {
        ms(self.timing.stall_warning_ms)
    }

    pub fn replay_period(&self) -> TimeDelta {
        ms(self.replay.sample_period_ms)
    }

    pub fn launch_site(&self) -> GpsFix {
        GpsFix {
            latitude_deg: self.sensors.latitude_deg,
            longitude_deg: self.sensors.longitude_deg,
            altitude_m: self.sensors.base_altitude_m,
        }
    }

    pub fn baro_period(&self) -> TimeDelta {
        ms(self.sensors.baro_period_ms)
    }

    pub fn imu_period(&self) -> TimeDelta {
        ms(self.sensors.imu_period_ms)
    }

    pub fn gps_period(&self) -> TimeDelta {
        ms(self.sensors.gps_period_ms)
    }

    /// Fan-out consumers, state evaluation first.
    pub fn consumers(&self) -> Vec<(&'static str, NonZeroUsize)> {
        let c = &self.channels;
        let mut consumers = vec![
            (channels::gnc::STATE_EVAL, c.state_eval),
            (channels::telemetry::LOGGING, c.logging),
            (channels::telemetry::TRANSMISSION, c.transmission),
        ];

        if c.debug_enabled {
            consumers.push((channels::telemetry::DEBUG, c.debug));
        }

        // Zero capacities are rejected by validate()
        consumers
            .into_iter()
            .filter_map(|(name, cap)| NonZeroUsize::new(cap).map(|cap| (name, cap)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::mode::{OperatingMode, PinLevel};

    const PARAMS: &str = r#"
[estimator]
process_variance = 0.02
measurement_variance = 0.4

[detection]
apogee_buffer_depth = 20

[timing]
settle_delay_ms = 10

[channels]
debug_enabled = true

[mode]
signal = { type = "fixed", mode = "replay" }

[sensors.profile]
burn_time_s = 4.0
"#;

    #[test]
    fn test_parse() {
        let params = Parameters::parse_str(PARAMS).unwrap();

        assert_eq!(params.estimator.process_variance, 0.02);
        assert_eq!(params.estimator.initial_covariance, 1.0);
        assert_eq!(params.detection().apogee_buffer_depth, 20);
        assert_eq!(params.detection().launch_threshold_m, 5.0);
        assert_eq!(params.detection().settle_delay, TimeDelta::milliseconds(10));
        assert_eq!(
            params.mode.signal,
            ModeSignal::Fixed {
                mode: OperatingMode::Replay
            }
        );
        assert_eq!(params.sensors.profile.burn_time_s, 4.0);
        assert_eq!(params.pyro_pulse(), TimeDelta::milliseconds(1000));

        let names: Vec<&str> = params.consumers().iter().map(|(n, _)| *n).collect();
        assert_eq!(
            names,
            vec![
                "/gnc/state_eval",
                "/telemetry/logging",
                "/telemetry/transmission",
                "/telemetry/debug"
            ]
        );
    }

    #[test]
    fn test_defaults() {
        let params = Parameters::parse_str("").unwrap();

        assert_eq!(params, Parameters::default());
        assert_eq!(
            params.mode.signal,
            ModeSignal::Pins {
                run: PinLevel::Low,
                test: PinLevel::High
            }
        );
        assert_eq!(params.consumers().len(), 3);
    }

    #[test]
    fn test_invalid() {
        for doc in [
            "[detection]\napogee_buffer_depth = 0",
            "[estimator]\nmeasurement_variance = 0.0",
            "[estimator]\nprocess_variance = -0.1",
            "[channels]\nlogging = 0",
            "[replay]\nsample_period_ms = 0",
            "[sensors]\nbaro_dropout_probability = 1.5",
            "[detection]\nlaunch_window_m = 0.0",
        ] {
            assert!(Parameters::parse_str(doc).is_err(), "accepted: {doc}");
        }

        assert!(matches!(
            Parameters::parse_str("[detection]\napogee_buffer_depht = 3"),
            Err(Error::Deserialize(_))
        ));
        assert!(matches!(
            Parameters::parse_str("[channels]\nstate_eval = 0"),
            Err(Error::Invalid { .. })
        ));
    }

    #[test]
    fn test_shipped_params() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/params.toml");
        Parameters::from_file(&path).unwrap();
    }
}
