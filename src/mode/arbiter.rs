use log::info;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OperatingMode {
    /// Receive test altitude sequences into storage. Pyro stays disarmed.
    Daq,
    /// Run a recorded altitude sequence through the flight pipeline.
    Replay,
    Flight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinLevel {
    Low,
    High,
}

/// Where the operating mode comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModeSignal {
    /// RUN and TEST jumper pins, both pulled up.
    Pins { run: PinLevel, test: PinLevel },
    Fixed { mode: OperatingMode },
}

impl Default for ModeSignal {
    fn default() -> Self {
        ModeSignal::Pins {
            run: PinLevel::Low,
            test: PinLevel::High,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModeError {
    #[error("Mode jumper missing: RUN and TEST pins are both high")]
    NoJumper,
}

/// Decides the operating mode, once, at startup.
#[derive(Debug, Clone)]
pub struct ModeArbiter {
    signal: ModeSignal,
    forced: Option<OperatingMode>,
}

impl ModeArbiter {
    pub fn new(signal: ModeSignal) -> Self {
        Self {
            signal,
            forced: None,
        }
    }

    /// Ignore the signal and run in `mode` (command line override).
    pub fn force(mut self, mode: Option<OperatingMode>) -> Self {
        self.forced = mode;
        self
    }

    pub fn resolve(&self) -> Result<OperatingMode, ModeError> {
        let mode = match (self.forced, self.signal) {
            (Some(mode), _) => {
                info!("Operating mode forced to {mode}");
                return Ok(mode);
            }
            (None, ModeSignal::Fixed { mode }) => mode,
            (None, ModeSignal::Pins { run, test }) => Self::from_pins(run, test)?,
        };

        info!("Operating mode: {mode}");
        Ok(mode)
    }

    pub fn from_pins(run: PinLevel, test: PinLevel) -> Result<OperatingMode, ModeError> {
        match (run, test) {
            (PinLevel::Low, PinLevel::High) => Ok(OperatingMode::Flight),
            (PinLevel::High, PinLevel::Low) => Ok(OperatingMode::Replay),
            (PinLevel::Low, PinLevel::Low) => Ok(OperatingMode::Daq),
            (PinLevel::High, PinLevel::High) => Err(ModeError::NoJumper),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_pins() {
        use PinLevel::*;

        assert_eq!(ModeArbiter::from_pins(Low, High), Ok(OperatingMode::Flight));
        assert_eq!(ModeArbiter::from_pins(High, Low), Ok(OperatingMode::Replay));
        assert_eq!(ModeArbiter::from_pins(Low, Low), Ok(OperatingMode::Daq));
        assert_eq!(ModeArbiter::from_pins(High, High), Err(ModeError::NoJumper));
    }

    #[test]
    fn test_resolve() {
        let jumperless = ModeSignal::Pins {
            run: PinLevel::High,
            test: PinLevel::High,
        };

        assert!(ModeArbiter::new(jumperless).resolve().is_err());
        assert_eq!(
            ModeArbiter::new(jumperless)
                .force(Some(OperatingMode::Daq))
                .resolve(),
            Ok(OperatingMode::Daq)
        );
        assert_eq!(
            ModeArbiter::new(ModeSignal::Fixed {
                mode: OperatingMode::Replay
            })
            .resolve(),
            Ok(OperatingMode::Replay)
        );
        assert_eq!(
            ModeArbiter::new(ModeSignal::default()).resolve(),
            Ok(OperatingMode::Flight)
        );
    }

    #[test]
    fn test_mode_names() {
        assert_eq!(OperatingMode::from_str("replay"), Ok(OperatingMode::Replay));
        assert_eq!(OperatingMode::Daq.to_string(), "daq");

        #[derive(Deserialize)]
        struct Doc {
            signal: ModeSignal,
        }

        let text = r#"signal = { type = "pins", run = "high", test = "low" }"#;
        let doc: Doc = toml::from_str(text).unwrap();
        assert_eq!(
            doc.signal,
            ModeSignal::Pins {
                run: PinLevel::High,
                test: PinLevel::Low
            }
        );
    }
}
