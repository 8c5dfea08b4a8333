//! Apogee detection.
//!
//! A single sample derivative of the barometric altitude is far too noisy to
//! trigger a pyro charge on. Instead the current filtered altitude is compared
//! against the one recorded `depth` samples earlier, which gives a stable trend
//! over a window of a few seconds at O(1) cost per sample.

use ringbuffer::{AllocRingBuffer, RingBuffer};

use super::{ConfigError, check_greater};

/// Fixed capacity window over the last filtered altitudes. Once full, each
/// push evicts the oldest value.
#[derive(Debug, Clone)]
pub struct AltitudeWindow {
    buf: AllocRingBuffer<f64>,
}

impl AltitudeWindow {
    pub fn new(depth: usize) -> Result<Self, ConfigError> {
        if depth == 0 {
            return Err(ConfigError::Zero("apogee_buffer_depth"));
        }

        Ok(Self {
            buf: AllocRingBuffer::new(depth),
        })
    }

    pub fn push(&mut self, sample: f64) {
        self.buf.push(sample);
    }

    pub fn is_full(&self) -> bool {
        self.buf.is_full()
    }

    /// The value the next push will evict, recorded `depth` pushes ago once
    /// the window is full.
    pub fn peek_oldest(&self) -> Option<f64> {
        self.buf.front().copied()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.buf.capacity()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Apogee {
    /// Estimated peak altitude, halfway between the window ends.
    pub altitude_m: f64,
    /// Altitude lost over the window when apogee was declared.
    pub drop_m: f64,
}

#[derive(Debug, Clone)]
pub struct ApogeeDetector {
    window: AltitudeWindow,
    threshold_m: f64,
    apogee: Option<Apogee>,
}

impl ApogeeDetector {
    pub fn new(depth: usize, threshold_m: f64) -> Result<Self, ConfigError> {
        check_greater("apogee_threshold_m", threshold_m, 0.0)?;

        Ok(Self {
            window: AltitudeWindow::new(depth)?,
            threshold_m,
            apogee: None,
        })
    }

    /// Records a sample without evaluating the apogee rule.
    pub fn warm_up(&mut self, sample: f64) {
        self.window.push(sample);
    }

    /// Evaluates the apogee rule against `sample`, then records it.
    ///
    /// Returns the apogee only on the sample that latches it. No apogee is
    /// declared before the window is full, and never more than once.
    pub fn update(&mut self, sample: f64) -> Option<Apogee> {
        let mut declared = None;

        if self.apogee.is_none() && self.window.is_full() {
            if let Some(oldest) = self.window.peek_oldest() {
                let drop_m = oldest - sample;

                if drop_m >= self.threshold_m {
                    let apogee = Apogee {
                        altitude_m: oldest - drop_m / 2.0,
                        drop_m,
                    };

                    self.apogee = Some(apogee);
                    declared = Some(apogee);
                }
            }
        }

        self.window.push(sample);

        declared
    }

    pub fn apogee(&self) -> Option<Apogee> {
        self.apogee
    }

    pub fn is_latched(&self) -> bool {
        self.apogee.is_some()
    }

    pub fn window(&self) -> &AltitudeWindow {
        &self.window
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.apogee = None;
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn test_window_eviction() {
        let mut w = AltitudeWindow::new(4).unwrap();

        for v in [1.0, 2.0, 3.0, 4.0] {
            assert!(!w.is_full());
            w.push(v);
        }

        assert!(w.is_full());
        assert_eq!(w.peek_oldest(), Some(1.0));

        w.push(5.0);
        assert_eq!(w.len(), 4);
        assert_eq!(w.peek_oldest(), Some(2.0));
    }

    #[test]
    fn test_zero_depth() {
        assert_eq!(
            AltitudeWindow::new(0).unwrap_err(),
            ConfigError::Zero("apogee_buffer_depth")
        );
        assert!(ApogeeDetector::new(10, 0.0).is_err());
    }

    #[test]
    fn test_no_apogee_before_window_full() {
        let mut ada = ApogeeDetector::new(10, 5.0).unwrap();

        // Steep drop, but the window is cold
        for v in [100.0, 90.0, 80.0, 70.0, 60.0, 50.0, 40.0, 30.0, 20.0, 10.0] {
            assert_eq!(ada.update(v), None);
        }

        assert_eq!(
            ada.update(0.0),
            Some(Apogee {
                altitude_m: 50.0,
                drop_m: 100.0
            })
        );
    }

    #[test]
    fn test_apogee_declared_once() {
        let depth = 10;
        let mut trace: Vec<f64> = (0..=20).map(|i| i as f64 * 50.0).collect();
        trace.extend((1..=60).map(|i| 1000.0 - i as f64 * 3.0));

        let mut ada = ApogeeDetector::new(depth, 5.0).unwrap();

        let declared: Vec<(usize, Apogee)> = trace
            .iter()
            .enumerate()
            .filter_map(|(i, v)| ada.update(*v).map(|a| (i, a)))
            .collect();

        let expected = (depth..trace.len())
            .find(|&i| trace[i - depth] - trace[i] >= 5.0)
            .unwrap();

        assert_eq!(declared.len(), 1);
        assert_eq!(declared[0].0, expected);

        let oldest = trace[expected - depth];
        let drop = oldest - trace[expected];
        assert_relative_eq!(declared[0].1.altitude_m, oldest - drop / 2.0);
        assert!(ada.is_latched());
    }

    #[test]
    fn test_warm_up_fills_window() {
        let mut ada = ApogeeDetector::new(3, 5.0).unwrap();

        ada.warm_up(20.0);
        ada.warm_up(20.0);
        ada.warm_up(20.0);

        assert!(ada.window().is_full());
        assert!(ada.update(10.0).is_some());

        ada.reset();
        assert!(!ada.is_latched());
        assert!(ada.window().is_empty());
    }
}
