mod consumer;
mod packet;
mod sink;

pub use consumer::{ConsumerReport, TelemetryConsumer};
pub use packet::{TelemetryAssembler, TelemetryPacket};
pub use sink::{LogSink, SinkError, TelemetrySink};
