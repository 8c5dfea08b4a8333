use std::fmt::Display;

use chrono::TimeDelta;

use crate::{
    gnc::{FlightState, SharedFlightState},
    mode::OperatingMode,
    sensors::{GpsFix, RawSample, SensorReading},
    utils::time::{Instant, MissionTime},
};

/// Latest sample of every kind, annotated with the flight state at the time
/// the packet was assembled.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryPacket {
    pub record_number: u64,
    pub t: Instant,
    pub mode: OperatingMode,
    pub state: FlightState,
    pub altitude_m: Option<f64>,
    pub pressure_pa: Option<f64>,
    pub acceleration_m_s2: Option<[f64; 3]>,
    pub angular_rate_rad_s: Option<[f64; 3]>,
    pub gps: Option<GpsFix>,
}

impl Display for TelemetryPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "#{} [{}] {} {}",
            self.record_number,
            MissionTime(self.t),
            self.mode,
            self.state
        )?;

        if let Some(alt) = self.altitude_m {
            write!(f, " alt={alt:.1}m")?;
        }
        if let Some(acc) = self.acceleration_m_s2 {
            write!(f, " acc=[{:.2}, {:.2}, {:.2}]", acc[0], acc[1], acc[2])?;
        }
        if let Some(gps) = self.gps {
            write!(
                f,
                " gps=({:.6}, {:.6}, {:.1}m)",
                gps.latitude_deg, gps.longitude_deg, gps.altitude_m
            )?;
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
struct Snapshot {
    altitude_m: Option<f64>,
    pressure_pa: Option<f64>,
    acceleration_m_s2: Option<[f64; 3]>,
    angular_rate_rad_s: Option<[f64; 3]>,
    gps: Option<GpsFix>,
}

/// Builds telemetry packets from the sample stream of one consumer.
pub struct TelemetryAssembler {
    mode: OperatingMode,
    state: SharedFlightState,
    latest: Snapshot,
    record_number: u64,
    min_interval: TimeDelta,
    last_emit: Option<Instant>,
}

impl TelemetryAssembler {
    /// At most one packet is emitted per `min_interval` of sample time. Zero
    /// emits a packet for every sample.
    pub fn new(mode: OperatingMode, state: SharedFlightState, min_interval: TimeDelta) -> Self {
        Self {
            mode,
            state,
            latest: Snapshot::default(),
            record_number: 0,
            min_interval,
            last_emit: None,
        }
    }

    pub fn push(&mut self, sample: &RawSample) -> Option<TelemetryPacket> {
        match sample.reading {
            SensorReading::Altitude {
                pressure_pa,
                altitude_m,
            } => {
                self.latest.altitude_m = Some(altitude_m);
                self.latest.pressure_pa = pressure_pa;
            }
            SensorReading::Imu {
                acceleration_m_s2,
                angular_rate_rad_s,
            } => {
                self.latest.acceleration_m_s2 = Some(acceleration_m_s2);
                self.latest.angular_rate_rad_s = Some(angular_rate_rad_s);
            }
            SensorReading::Gps(fix) => self.latest.gps = Some(fix),
        }

        if let Some(last) = self.last_emit {
            if sample.t.duration_since(&last) < self.min_interval {
                return None;
            }
        }

        self.last_emit = Some(sample.t);
        self.record_number += 1;

        Some(TelemetryPacket {
            record_number: self.record_number,
            t: sample.t,
            mode: self.mode,
            state: self.state.load(),
            altitude_m: self.latest.altitude_m,
            pressure_pa: self.latest.pressure_pa,
            acceleration_m_s2: self.latest.acceleration_m_s2,
            angular_rate_rad_s: self.latest.angular_rate_rad_s,
            gps: self.latest.gps,
        })
    }

    pub fn records(&self) -> u64 {
        self.record_number
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn sample(seq: u64, ms: i64, reading: SensorReading) -> RawSample {
        RawSample {
            seq,
            t: Instant::from_elapsed(TimeDelta::milliseconds(ms)),
            reading,
        }
    }

    fn altitude(altitude_m: f64) -> SensorReading {
        SensorReading::Altitude {
            pressure_pa: None,
            altitude_m,
        }
    }

    #[test]
    fn test_latest_samples_merged() {
        let state = SharedFlightState::default();
        let mut asm =
            TelemetryAssembler::new(OperatingMode::Flight, state.clone(), TimeDelta::zero());

        asm.push(&sample(0, 0, altitude(3.0))).unwrap();
        state.store(FlightState::PoweredFlight);

        let packet = asm
            .push(&sample(
                0,
                10,
                SensorReading::Imu {
                    acceleration_m_s2: [0.0, 0.0, 70.0],
                    angular_rate_rad_s: [0.0; 3],
                },
            ))
            .unwrap();

        assert_eq!(packet.record_number, 2);
        assert_eq!(packet.state, FlightState::PoweredFlight);
        assert_eq!(packet.altitude_m, Some(3.0));
        assert_eq!(packet.acceleration_m_s2, Some([0.0, 0.0, 70.0]));
        assert_eq!(packet.gps, None);
        assert_eq!(
            packet.to_string(),
            "#2 [00:00.010] flight PoweredFlight alt=3.0m acc=[0.00, 0.00, 70.00]"
        );
    }

    #[test]
    fn test_min_interval_decimation() {
        let mut asm = TelemetryAssembler::new(
            OperatingMode::Replay,
            SharedFlightState::default(),
            TimeDelta::milliseconds(100),
        );

        let emitted: Vec<u64> = (0..10)
            .filter_map(|i| asm.push(&sample(i, i as i64 * 40, altitude(i as f64))))
            .map(|p| p.record_number)
            .collect();

        // Samples at 0, 120, 240 and 360 ms
        assert_eq!(emitted, vec![1, 2, 3, 4]);
        assert_eq!(asm.records(), 4);
    }
}
