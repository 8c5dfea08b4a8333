use log::{Level, log};
use thiserror::Error;

use super::TelemetryPacket;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Telemetry sink '{sink}' failed: {reason}")]
pub struct SinkError {
    pub sink: String,
    pub reason: String,
}

/// Destination of assembled packets: storage writer, radio link.
pub trait TelemetrySink: Send {
    fn write(&mut self, packet: &TelemetryPacket) -> Result<(), SinkError>;

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Writes packets to the log.
#[derive(Debug, Clone)]
pub struct LogSink {
    label: String,
    level: Level,
}

impl LogSink {
    pub fn new(label: &str, level: Level) -> Self {
        Self {
            label: label.to_string(),
            level,
        }
    }
}

impl TelemetrySink for LogSink {
    fn write(&mut self, packet: &TelemetryPacket) -> Result<(), SinkError> {
        log!(self.level, "[{}] {packet}", self.label);
        Ok(())
    }
}
