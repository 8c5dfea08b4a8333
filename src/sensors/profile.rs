use serde::{Deserialize, Serialize};

pub const G0: f64 = 9.80665;

/// Open loop vertical trajectory used by the simulated sensors: constant
/// thrust, ballistic coast, then fixed descent rates under drogue and main.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FlightProfile {
    /// Time on the pad before ignition.
    pub pad_time_s: f64,
    pub burn_time_s: f64,
    /// Net vertical acceleration during the burn.
    pub burn_acceleration_m_s2: f64,
    pub drogue_descent_rate_m_s: f64,
    pub main_altitude_m: f64,
    pub main_descent_rate_m_s: f64,
}

impl Default for FlightProfile {
    fn default() -> Self {
        Self {
            pad_time_s: 2.0,
            burn_time_s: 2.5,
            burn_acceleration_m_s2: 60.0,
            drogue_descent_rate_m_s: 30.0,
            main_altitude_m: 250.0,
            main_descent_rate_m_s: 7.0,
        }
    }
}

impl FlightProfile {
    fn burnout(&self) -> (f64, f64) {
        let v = self.burn_acceleration_m_s2 * self.burn_time_s;
        let h = 0.5 * self.burn_acceleration_m_s2 * self.burn_time_s.powi(2);
        (v, h)
    }

    pub fn apogee_time_s(&self) -> f64 {
        let (v_bo, _) = self.burnout();
        self.pad_time_s + self.burn_time_s + v_bo / G0
    }

    pub fn apogee_m(&self) -> f64 {
        let (v_bo, h_bo) = self.burnout();
        h_bo + v_bo * v_bo / (2.0 * G0)
    }

    fn main_time_s(&self) -> f64 {
        let drogue_leg = (self.apogee_m() - self.main_altitude_m).max(0.0);
        self.apogee_time_s() + drogue_leg / self.drogue_descent_rate_m_s
    }

    pub fn landing_time_s(&self) -> f64 {
        let main_leg = self.apogee_m().min(self.main_altitude_m);
        self.main_time_s() + main_leg / self.main_descent_rate_m_s
    }

    /// True altitude above the pad at `t_s` seconds after power on.
    pub fn altitude_m(&self, t_s: f64) -> f64 {
        let (v_bo, h_bo) = self.burnout();
        let t_ignition = self.pad_time_s;
        let t_burnout = t_ignition + self.burn_time_s;
        let t_apogee = self.apogee_time_s();
        let t_main = self.main_time_s();

        if t_s <= t_ignition {
            0.0
        } else if t_s <= t_burnout {
            0.5 * self.burn_acceleration_m_s2 * (t_s - t_ignition).powi(2)
        } else if t_s <= t_apogee {
            let dt = t_s - t_burnout;
            h_bo + v_bo * dt - 0.5 * G0 * dt * dt
        } else if t_s <= t_main {
            self.apogee_m() - self.drogue_descent_rate_m_s * (t_s - t_apogee)
        } else {
            let start = self.apogee_m().min(self.main_altitude_m);
            (start - self.main_descent_rate_m_s * (t_s - t_main)).max(0.0)
        }
    }

    /// Vertical specific force sensed by an accelerometer.
    pub fn specific_force_m_s2(&self, t_s: f64) -> f64 {
        let t_ignition = self.pad_time_s;
        let t_burnout = t_ignition + self.burn_time_s;

        if t_s > t_ignition && t_s <= t_burnout {
            self.burn_acceleration_m_s2 + G0
        } else if t_s > t_burnout && t_s <= self.apogee_time_s() {
            0.0
        } else {
            // Resting on the pad, or descending at terminal velocity
            G0
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn test_profile_phases() {
        let p = FlightProfile::default();

        assert_eq!(p.altitude_m(0.0), 0.0);
        assert_eq!(p.altitude_m(p.pad_time_s), 0.0);

        // Continuous at every phase boundary
        for t in [
            p.pad_time_s + p.burn_time_s,
            p.apogee_time_s(),
            p.main_time_s(),
        ] {
            assert_relative_eq!(p.altitude_m(t - 1e-9), p.altitude_m(t + 1e-9), epsilon = 1e-4);
        }

        assert_relative_eq!(p.altitude_m(p.apogee_time_s()), p.apogee_m(), epsilon = 1e-9);
        assert!(p.altitude_m(p.apogee_time_s() + 1.0) < p.apogee_m());
        assert_relative_eq!(p.altitude_m(p.main_time_s()), p.main_altitude_m, epsilon = 1e-9);
        assert_eq!(p.altitude_m(p.landing_time_s() + 10.0), 0.0);
    }

    #[test]
    fn test_low_apogee_skips_drogue_leg() {
        let p = FlightProfile {
            burn_acceleration_m_s2: 10.0,
            burn_time_s: 1.0,
            main_altitude_m: 1000.0,
            ..Default::default()
        };

        assert!(p.apogee_m() < p.main_altitude_m);
        assert_relative_eq!(p.main_time_s(), p.apogee_time_s());
        assert_relative_eq!(
            p.landing_time_s() - p.apogee_time_s(),
            p.apogee_m() / p.main_descent_rate_m_s
        );
    }
}
