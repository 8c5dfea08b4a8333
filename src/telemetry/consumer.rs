use log::{debug, warn};

use super::{TelemetryAssembler, TelemetrySink};
use crate::{
    sensors::RawSample,
    utils::ringchannel::{ChannelStats, Receiver},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerReport {
    pub packets: u64,
    pub sink_errors: u64,
    pub channel: ChannelStats,
}

/// Best effort consumer: turns its share of the sample stream into packets
/// for one sink. Sink failures are counted and never stop the consumer.
pub struct TelemetryConsumer {
    rx: Receiver<RawSample>,
    assembler: TelemetryAssembler,
    sink: Box<dyn TelemetrySink>,
}

impl TelemetryConsumer {
    pub fn new(
        rx: Receiver<RawSample>,
        assembler: TelemetryAssembler,
        sink: Box<dyn TelemetrySink>,
    ) -> Self {
        Self {
            rx,
            assembler,
            sink,
        }
    }

    pub fn name(&self) -> &str {
        self.rx.name()
    }

    /// Runs until every producer is gone.
    pub fn run(mut self) -> ConsumerReport {
        let mut sink_errors = 0u64;

        while let Ok(sample) = self.rx.recv() {
            let Some(packet) = self.assembler.push(&sample) else {
                continue;
            };

            if let Err(e) = self.sink.write(&packet) {
                sink_errors += 1;

                if sink_errors.is_power_of_two() {
                    warn!("{e} ({sink_errors} failed writes)");
                }
            }
        }

        if let Err(e) = self.sink.flush() {
            warn!("{e}");
        }

        debug!("Consumer '{}' done", self.rx.name());

        ConsumerReport {
            packets: self.assembler.records(),
            sink_errors,
            channel: self.rx.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        num::NonZeroUsize,
        sync::{Arc, Mutex},
        thread,
    };

    use chrono::TimeDelta;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        gnc::SharedFlightState,
        mode::OperatingMode,
        sensors::SensorReading,
        telemetry::{SinkError, TelemetryPacket},
        utils::{ringchannel::fanout, time::Instant},
    };

    struct FlakySink {
        written: Arc<Mutex<Vec<u64>>>,
    }

    impl TelemetrySink for FlakySink {
        fn write(&mut self, packet: &TelemetryPacket) -> Result<(), SinkError> {
            if packet.record_number % 2 == 0 {
                return Err(SinkError {
                    sink: "flaky".to_string(),
                    reason: "link busy".to_string(),
                });
            }

            self.written.lock().unwrap().push(packet.record_number);
            Ok(())
        }
    }

    #[test]
    fn test_consumer_runs_until_closed() {
        let capacity = NonZeroUsize::new(16).unwrap();
        let (tx, mut rx) = fanout::<RawSample>(&[("/telemetry/transmission", capacity)]);
        let written = Arc::new(Mutex::new(vec![]));

        let consumer = TelemetryConsumer::new(
            rx.remove(0),
            TelemetryAssembler::new(
                OperatingMode::Flight,
                SharedFlightState::default(),
                TimeDelta::zero(),
            ),
            Box::new(FlakySink {
                written: written.clone(),
            }),
        );
        assert_eq!(consumer.name(), "/telemetry/transmission");

        for seq in 0..5 {
            tx.send(RawSample {
                seq,
                t: Instant::from_elapsed(TimeDelta::milliseconds(seq as i64)),
                reading: SensorReading::Altitude {
                    pressure_pa: None,
                    altitude_m: 1.0,
                },
            });
        }

        let handle = thread::spawn(move || consumer.run());
        drop(tx);

        let report = handle.join().unwrap();

        assert_eq!(report.packets, 5);
        assert_eq!(report.sink_errors, 2);
        assert_eq!(report.channel.delivered, 5);
        assert_eq!(*written.lock().unwrap(), vec![1, 3, 5]);
    }
}
