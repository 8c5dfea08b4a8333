use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use log::{debug, info, warn};

use crate::{
    sensors::{RawSample, SensorProducer},
    utils::{ringchannel::Sender, time::Clock},
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskReport {
    pub name: String,
    pub samples: u64,
    pub failures: u64,
    pub overruns: u64,
    /// Sum over all consumers of the samples they had no room for.
    pub drops: u64,
}

/// Samples one producer on a fixed period and publishes every reading to the
/// fan-out.
///
/// Deadlines advance by exactly one period per tick, so the time spent
/// sampling does not accumulate as drift. A tick that ends past its deadline
/// counts as an overrun and the schedule restarts from the current time
/// instead of bursting to catch up.
pub struct PeriodicTask {
    producer: Box<dyn SensorProducer>,
    tx: Sender<RawSample>,
    clock: Box<dyn Clock>,
    running: Arc<AtomicBool>,
}

impl PeriodicTask {
    pub fn new(
        producer: Box<dyn SensorProducer>,
        tx: Sender<RawSample>,
        clock: Box<dyn Clock>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            producer,
            tx,
            clock,
            running,
        }
    }

    pub fn name(&self) -> &str {
        self.producer.name()
    }

    /// Runs until the source is exhausted or `running` is cleared.
    pub fn run(mut self) -> TaskReport {
        let period = self.producer.period();
        let mut report = TaskReport {
            name: self.producer.name().to_string(),
            ..Default::default()
        };

        info!(
            "Sampling '{}' every {} ms",
            report.name,
            period.num_milliseconds()
        );

        let mut deadline = self.clock.monotonic();

        while self.running.load(Ordering::Acquire) {
            let t = self.clock.monotonic();

            match self.producer.sample(t) {
                Ok(Some(reading)) => {
                    let dropped = self.tx.send(RawSample {
                        seq: report.samples,
                        t,
                        reading,
                    });

                    report.samples += 1;
                    report.drops += dropped as u64;
                }
                Ok(None) => {
                    info!("'{}' source exhausted", report.name);
                    break;
                }
                Err(e) => {
                    report.failures += 1;

                    if report.failures.is_power_of_two() {
                        warn!("{e} ({} failures so far)", report.failures);
                    }
                }
            }

            deadline += period;
            let now = self.clock.monotonic();

            if now > deadline {
                report.overruns += 1;
                debug!(
                    "'{}' overran its period by {} us",
                    report.name,
                    now.duration_since(&deadline).num_microseconds().unwrap_or(i64::MAX)
                );
                deadline = now;
            } else {
                self.clock.delay(deadline.duration_since(&now));
            }
        }

        report
    }
}
