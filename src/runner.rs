use std::{
    collections::HashMap,
    fmt::Display,
    fs::File,
    io::{self, BufRead, BufReader},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

pub use anyhow::Result;
use anyhow::{Context, anyhow};
use chrono::TimeDelta;
use log::{Level, info, warn};

use crate::{
    channels,
    computer::{FlightComputerCore, FlightStatus},
    gnc::{ArmingSwitch, FlightState, PyroDriver, pyro::DryRunDriver},
    mode::{CsvTestDataStore, DaqSession, DaqSummary, OperatingMode},
    nodes::{PeriodicTask, TaskReport, ThreadedExecutor},
    parameters::Parameters,
    sensors::{
        RawSample, SensorProducer,
        barometer::{AtmosphereIsa, Barometer, SimulatedBarometer},
        gps::SimulatedGps,
        imu::SimulatedImu,
        replay::{ReplayProducer, read_altitude_csv},
    },
    telemetry::{ConsumerReport, LogSink, TelemetryAssembler, TelemetryConsumer, TelemetrySink},
    utils::{
        ringchannel::{ChannelError, Receiver, Sender, fanout},
        time::{MissionTime, SimulatedClock, WallClock},
    },
};

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub mode: OperatingMode,
    pub final_state: Option<FlightState>,
    pub drogue_fired: bool,
    pub main_fired: bool,
    pub samples: u64,
    /// Times the altitude stream went silent for longer than the stall period.
    pub stalls: u64,
    pub tasks: Vec<TaskReport>,
    pub consumers: Vec<ConsumerReport>,
    pub daq: Option<DaqSummary>,
}

impl RunSummary {
    fn new(mode: OperatingMode) -> Self {
        Self {
            mode,
            final_state: None,
            drogue_fired: false,
            main_fired: false,
            samples: 0,
            stalls: 0,
            tasks: vec![],
            consumers: vec![],
            daq: None,
        }
    }

    fn with_core(mut self, core: &FlightComputerCore) -> Self {
        let status = core.status();

        self.final_state = Some(status.state());
        self.drogue_fired = status.drogue_fired();
        self.main_fired = status.main_fired();
        self.samples = core.samples();
        self
    }
}

impl Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Run summary ({} mode)", self.mode)?;

        if let Some(state) = self.final_state {
            write!(
                f,
                "\n  final state: {state}, altitudes: {}, drogue fired: {}, main fired: {}",
                self.samples, self.drogue_fired, self.main_fired
            )?;
        }

        if self.stalls > 0 {
            write!(f, "\n  altitude stalls: {}", self.stalls)?;
        }

        for t in &self.tasks {
            write!(
                f,
                "\n  producer '{}': {} samples, {} failures, {} overruns, {} drops",
                t.name, t.samples, t.failures, t.overruns, t.drops
            )?;
        }

        for c in &self.consumers {
            write!(
                f,
                "\n  consumer '{}': {} delivered, {} dropped, {} packets, {} sink errors",
                c.channel.name, c.channel.delivered, c.channel.dropped, c.packets, c.sink_errors
            )?;
        }

        if let Some(daq) = &self.daq {
            write!(
                f,
                "\n  upload: {} lines, {} stored, {} rejected",
                daq.lines, daq.stored, daq.rejected
            )?;
        }

        Ok(())
    }
}

/// Behavior of one operating mode, selected once at startup.
pub trait ModeStrategy {
    fn mode(&self) -> OperatingMode;

    fn run(self: Box<Self>) -> Result<RunSummary>;
}

/// Everything outside the decision pipeline: ignition hardware, arming and
/// telemetry destinations.
pub struct Collaborators {
    pub driver: Box<dyn PyroDriver>,
    pub arming: ArmingSwitch,
    /// Sink of each telemetry consumer, by consumer name. Consumers without a
    /// sink write to the log.
    pub sinks: Sinks,
}

pub type Sinks = HashMap<&'static str, Box<dyn TelemetrySink>>;

impl Collaborators {
    /// Host setup: dry run ignition, log sinks. Only flight mode follows the
    /// configured arming switch.
    pub fn host(params: &Parameters, mode: OperatingMode) -> Self {
        let armed = match mode {
            OperatingMode::Flight => params.pyro.armed,
            OperatingMode::Replay => true,
            OperatingMode::Daq => false,
        };

        Self {
            driver: Box::new(DryRunDriver),
            arming: ArmingSwitch::new(armed),
            sinks: HashMap::new(),
        }
    }
}

fn take_sink(sinks: &mut Sinks, consumer: &str) -> Box<dyn TelemetrySink> {
    if let Some(sink) = sinks.remove(consumer) {
        return sink;
    }

    match consumer {
        channels::telemetry::TRANSMISSION => Box::new(LogSink::new("radio", Level::Info)),
        channels::telemetry::DEBUG => Box::new(LogSink::new("debug", Level::Debug)),
        _ => Box::new(LogSink::new("log", Level::Trace)),
    }
}

fn consumer_interval(params: &Parameters, consumer: &str) -> TimeDelta {
    match consumer {
        channels::telemetry::LOGGING => {
            TimeDelta::milliseconds(params.telemetry.log_interval_ms as i64)
        }
        channels::telemetry::TRANSMISSION => {
            TimeDelta::milliseconds(params.telemetry.transmit_interval_ms as i64)
        }
        _ => TimeDelta::zero(),
    }
}

fn spawn_consumers(
    params: &Parameters,
    mode: OperatingMode,
    status: &FlightStatus,
    receivers: Vec<Receiver<RawSample>>,
    sinks: &mut Sinks,
) -> Result<Vec<JoinHandle<ConsumerReport>>> {
    let mut handles = vec![];

    for rx in receivers {
        let name = rx.name().to_string();

        let consumer = TelemetryConsumer::new(
            rx,
            TelemetryAssembler::new(
                mode,
                status.shared_state(),
                consumer_interval(params, &name),
            ),
            take_sink(sinks, &name),
        );

        handles.push(
            thread::Builder::new()
                .name(name.trim_start_matches('/').replace('/', "-"))
                .spawn(move || consumer.run())?,
        );
    }

    Ok(handles)
}

fn join_consumers(handles: Vec<JoinHandle<ConsumerReport>>) -> Result<Vec<ConsumerReport>> {
    handles
        .into_iter()
        .map(|h| h.join().map_err(|_| anyhow!("Telemetry consumer panicked")))
        .collect()
}

/// Consumer feeding the flight computer. Warns, without acting, when no
/// altitude arrives for longer than `stall`.
struct StateEvaluator {
    rx: Receiver<RawSample>,
    core: FlightComputerCore,
    stall: TimeDelta,
    stalls: u64,
}

impl StateEvaluator {
    fn new(rx: Receiver<RawSample>, core: FlightComputerCore, stall: TimeDelta) -> Self {
        Self {
            rx,
            core,
            stall,
            stalls: 0,
        }
    }

    fn run(mut self) -> Self {
        let timeout = self.stall.to_std().unwrap_or(Duration::from_secs(1));
        let mut last_altitude = self.core.now();
        let mut stalled = false;

        loop {
            match self.rx.recv_timeout(timeout) {
                Ok(sample) => {
                    if let Some(altitude) = sample.reading.altitude_m() {
                        if stalled {
                            info!("Altitude samples resumed at {}", MissionTime(sample.t));
                            stalled = false;
                        }

                        self.core.process_altitude(altitude);
                        last_altitude = self.core.now();
                        continue;
                    }
                }
                Err(ChannelError::Timeout) => {}
                Err(_) => break,
            }

            let silence = self.core.now().duration_since(&last_altitude);
            if !stalled && silence >= self.stall {
                warn!(
                    "No altitude sample for {} ms, holding {}",
                    silence.num_milliseconds(),
                    self.core.state()
                );
                stalled = true;
                self.stalls += 1;
            }
        }

        self
    }
}

/// Live pipeline: one periodic task per producer, one thread per consumer,
/// connected by the fan-out.
fn run_pipeline(
    params: &Parameters,
    mode: OperatingMode,
    producers: Vec<Box<dyn SensorProducer>>,
    collaborators: Collaborators,
    running: Arc<AtomicBool>,
) -> Result<RunSummary> {
    let Collaborators {
        driver,
        arming,
        mut sinks,
    } = collaborators;
    let clock = WallClock::new();

    let core =
        FlightComputerCore::from_parameters(params, driver, arming, Box::new(clock.clone()))?;

    let status = core.status();

    let (tx, mut receivers): (Sender<RawSample>, _) = fanout(&params.consumers());
    let state_rx = receivers.remove(0);

    let evaluator = StateEvaluator::new(state_rx, core, params.stall_warning());
    let evaluator = thread::Builder::new()
        .name("state-eval".to_string())
        .spawn(move || evaluator.run())?;

    let consumers = spawn_consumers(params, mode, &status, receivers, &mut sinks)?;

    let tasks = producers
        .into_iter()
        .map(|p| PeriodicTask::new(p, tx.clone(), Box::new(clock.clone()), running.clone()))
        .collect();
    let exec = ThreadedExecutor::run(tasks)?;

    // Producers hold the only senders from now on
    drop(tx);

    while running.load(Ordering::Acquire) && !exec.is_finished() {
        if status.state() == FlightState::PostFlightGround {
            info!("Landed");
            running.store(false, Ordering::Release);
            break;
        }

        thread::sleep(Duration::from_millis(100));
    }

    let tasks = exec.join()?;
    let evaluator = evaluator
        .join()
        .map_err(|_| anyhow!("State evaluation thread panicked"))?;

    let mut summary = RunSummary::new(mode).with_core(&evaluator.core);
    summary.stalls = evaluator.stalls;
    summary.tasks = tasks;
    summary.consumers = join_consumers(consumers)?;

    Ok(summary)
}

pub struct FlightStrategy {
    params: Parameters,
    collaborators: Collaborators,
    running: Arc<AtomicBool>,
}

impl FlightStrategy {
    pub fn new(params: Parameters, collaborators: Collaborators, running: Arc<AtomicBool>) -> Self {
        Self {
            params,
            collaborators,
            running,
        }
    }

    fn producers(&self) -> Result<Vec<Box<dyn SensorProducer>>> {
        let s = &self.params.sensors;
        let barometer = Barometer::new(
            AtmosphereIsa::with_reference_pressure(s.reference_pressure_pa),
            s.base_altitude_m,
        );

        Ok(vec![
            Box::new(SimulatedBarometer::new(
                s.profile.clone(),
                barometer,
                s.baro_noise_pa,
                s.baro_dropout_probability,
                self.params.baro_period(),
                s.seed,
            )?),
            Box::new(SimulatedImu::new(
                s.profile.clone(),
                s.acc_noise_m_s2,
                s.gyro_noise_rad_s,
                self.params.imu_period(),
                s.seed.wrapping_add(1),
            )?),
            Box::new(SimulatedGps::new(
                s.profile.clone(),
                self.params.launch_site(),
                TimeDelta::milliseconds(s.gps_lock_ms as i64),
                self.params.gps_period(),
            )),
        ])
    }
}

impl ModeStrategy for FlightStrategy {
    fn mode(&self) -> OperatingMode {
        OperatingMode::Flight
    }

    fn run(self: Box<Self>) -> Result<RunSummary> {
        if !self.collaborators.arming.is_armed() {
            warn!("Pyro is disarmed, charges will not fire");
        }

        let producers = self.producers()?;

        run_pipeline(
            &self.params,
            OperatingMode::Flight,
            producers,
            self.collaborators,
            self.running,
        )
    }
}

pub struct ReplayStrategy {
    params: Parameters,
    altitudes: Vec<f64>,
    collaborators: Collaborators,
    running: Arc<AtomicBool>,
}

impl ReplayStrategy {
    pub fn new(
        params: Parameters,
        altitudes: Vec<f64>,
        collaborators: Collaborators,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            params,
            altitudes,
            collaborators,
            running,
        }
    }

    /// Steps the flight computer on simulated time, one sample per period.
    /// The same samples are offered to the telemetry consumers.
    fn run_stepped(self) -> Result<RunSummary> {
        let period = self.params.replay_period();
        let Collaborators {
            driver,
            arming,
            mut sinks,
        } = self.collaborators;

        let mut core = FlightComputerCore::from_parameters(
            &self.params,
            driver,
            arming,
            Box::new(SimulatedClock::default()),
        )?;

        let status = core.status();

        let telemetry: Vec<_> = self
            .params
            .consumers()
            .into_iter()
            .filter(|(name, _)| *name != channels::gnc::STATE_EVAL)
            .collect();
        let (tx, receivers) = fanout::<RawSample>(&telemetry);
        let consumers = spawn_consumers(
            &self.params,
            OperatingMode::Replay,
            &status,
            receivers,
            &mut sinks,
        )?;

        let mut producer = ReplayProducer::new(self.altitudes, period);
        let mut seq = 0;

        while self.running.load(Ordering::Acquire) {
            let t = core.now();
            let Some(reading) = producer.sample(t)? else {
                break;
            };

            tx.send(RawSample { seq, t, reading });
            seq += 1;

            if let Some(altitude) = reading.altitude_m() {
                core.process_altitude(altitude);
            }

            core.advance(period);
        }

        drop(tx);

        let mut summary = RunSummary::new(OperatingMode::Replay).with_core(&core);
        summary.consumers = join_consumers(consumers)?;

        Ok(summary)
    }
}

impl ModeStrategy for ReplayStrategy {
    fn mode(&self) -> OperatingMode {
        OperatingMode::Replay
    }

    fn run(self: Box<Self>) -> Result<RunSummary> {
        info!("Replaying {} altitude samples", self.altitudes.len());

        if self.params.replay.realtime {
            let producer = ReplayProducer::new(self.altitudes, self.params.replay_period());

            run_pipeline(
                &self.params,
                OperatingMode::Replay,
                vec![Box::new(producer)],
                self.collaborators,
                self.running,
            )
        } else {
            self.run_stepped()
        }
    }
}

pub struct DaqStrategy {
    input: Box<dyn BufRead>,
    session: DaqSession,
}

impl DaqStrategy {
    pub fn new(input: Box<dyn BufRead>, session: DaqSession) -> Self {
        Self { input, session }
    }
}

impl ModeStrategy for DaqStrategy {
    fn mode(&self) -> OperatingMode {
        OperatingMode::Daq
    }

    fn run(mut self: Box<Self>) -> Result<RunSummary> {
        info!("Waiting for test data upload, one altitude per line");

        let mut summary = RunSummary::new(OperatingMode::Daq);
        summary.daq = Some(self.session.ingest(&mut self.input)?);

        Ok(summary)
    }
}

/// Host wiring of the strategy for `mode`.
pub fn build_strategy(
    mode: OperatingMode,
    params: Parameters,
    running: Arc<AtomicBool>,
) -> Result<Box<dyn ModeStrategy>> {
    let collaborators = Collaborators::host(&params, mode);

    Ok(match mode {
        OperatingMode::Flight => Box::new(FlightStrategy::new(params, collaborators, running)),
        OperatingMode::Replay => {
            let altitudes = read_altitude_csv(&params.replay.file)?;
            Box::new(ReplayStrategy::new(params, altitudes, collaborators, running))
        }
        OperatingMode::Daq => {
            let input: Box<dyn BufRead> = match &params.daq.input {
                Some(path) => Box::new(BufReader::new(File::open(path).with_context(|| {
                    format!("Cannot open upload file '{}'", path.display())
                })?)),
                None => Box::new(io::stdin().lock()),
            };
            let store = CsvTestDataStore::create(&params.daq.output)?;

            Box::new(DaqStrategy::new(input, DaqSession::new(Box::new(store))))
        }
    })
}

#[cfg(test)]
mod tests {
    use std::{num::NonZeroUsize, sync::Mutex};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        gnc::{
            AltitudeEstimator, DetectionConfig, FilteredAltitude, FlightStateMachine,
            PyroActuationController,
        },
        sensors::SensorReading,
        telemetry::{SinkError, TelemetryPacket},
        utils::time::Instant,
    };

    #[derive(Clone, Default)]
    struct MemorySink(Arc<Mutex<Vec<TelemetryPacket>>>);

    impl TelemetrySink for MemorySink {
        fn write(&mut self, packet: &TelemetryPacket) -> Result<(), SinkError> {
            self.0.lock().unwrap().push(packet.clone());
            Ok(())
        }
    }

    fn flight_trace() -> Vec<f64> {
        let mut trace = vec![0.0, 0.0, 2.0, 10.0, 50.0, 200.0, 500.0, 800.0, 1000.0];
        trace.extend((0..=20).map(|i| 995.0 - 45.0 * i as f64));
        trace.extend([10.0, 3.0]);
        trace
    }

    fn replay_params() -> Parameters {
        Parameters::parse_str(
            r#"
[estimator]
process_variance = 1.0
measurement_variance = 0.01
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_stepped_replay() {
        let params = replay_params();
        let sink = MemorySink::default();

        let mut collaborators = Collaborators::host(&params, OperatingMode::Replay);
        collaborators
            .sinks
            .insert(channels::telemetry::TRANSMISSION, Box::new(sink.clone()));

        let strategy = Box::new(ReplayStrategy::new(
            params,
            flight_trace(),
            collaborators,
            Arc::new(AtomicBool::new(true)),
        ));
        assert_eq!(strategy.mode(), OperatingMode::Replay);

        let summary = strategy.run().unwrap();

        assert_eq!(summary.final_state, Some(FlightState::PostFlightGround));
        assert!(summary.drogue_fired);
        assert!(summary.main_fired);
        assert_eq!(summary.samples, flight_trace().len() as u64);
        assert_eq!(summary.consumers.len(), 2);

        let packets = sink.0.lock().unwrap();
        assert!(!packets.is_empty());
        assert!(packets.windows(2).all(|w| w[0].record_number < w[1].record_number));
        assert!(packets.iter().all(|p| p.mode == OperatingMode::Replay));
    }

    #[test]
    fn test_realtime_replay_through_fanout() {
        let mut params = replay_params();
        params.replay.realtime = true;
        params.replay.sample_period_ms = 5;
        params.pyro.pulse_ms = 5;
        params.timing.settle_delay_ms = 1;
        params.channels.state_eval = 64;

        let collaborators = Collaborators::host(&params, OperatingMode::Replay);
        let summary = Box::new(ReplayStrategy::new(
            params,
            flight_trace(),
            collaborators,
            Arc::new(AtomicBool::new(true)),
        ))
        .run()
        .unwrap();

        assert_eq!(summary.final_state, Some(FlightState::PostFlightGround));
        assert!(summary.drogue_fired && summary.main_fired);
        assert_eq!(summary.tasks.len(), 1);
        assert_eq!(summary.tasks[0].samples, flight_trace().len() as u64);
    }

    #[test]
    fn test_daq_strategy() {
        let path = std::env::temp_dir()
            .join(format!("n4-runner-daq-{}", std::process::id()))
            .join("out.csv");
        let store = CsvTestDataStore::create(&path).unwrap();

        let summary = Box::new(DaqStrategy::new(
            Box::new("altitude\n1\n2\nbad\n3\n".as_bytes()),
            DaqSession::new(Box::new(store)),
        ))
        .run()
        .unwrap();

        assert_eq!(summary.final_state, None);
        assert_eq!(
            summary.daq,
            Some(DaqSummary {
                lines: 5,
                stored: 3,
                rejected: 1
            })
        );
        assert_eq!(read_altitude_csv(&path).unwrap(), vec![1.0, 2.0, 3.0]);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    fn imu_sample(seq: u64) -> RawSample {
        RawSample {
            seq,
            t: Instant::ZERO,
            reading: SensorReading::Imu {
                acceleration_m_s2: [0.0, 0.0, 9.8],
                angular_rate_rad_s: [0.0; 3],
            },
        }
    }

    fn altitude_sample(seq: u64, altitude_m: f64) -> RawSample {
        RawSample {
            seq,
            t: Instant::ZERO,
            reading: SensorReading::Altitude {
                pressure_pa: None,
                altitude_m,
            },
        }
    }

    #[test]
    fn test_altitude_stall_holds_state() {
        let core = FlightComputerCore::new(
            AltitudeEstimator::new(1.0, 0.01, FilteredAltitude::default()).unwrap(),
            FlightStateMachine::new(DetectionConfig::default()).unwrap(),
            PyroActuationController::new(
                Box::new(DryRunDriver),
                ArmingSwitch::new(true),
                TimeDelta::milliseconds(5),
            ),
            Box::new(WallClock::new()),
        );
        let status = core.status();

        let capacity = NonZeroUsize::new(64).unwrap();
        let (tx, mut rx) = fanout(&[(channels::gnc::STATE_EVAL, capacity)]);

        tx.send(altitude_sample(0, 0.0));
        tx.send(altitude_sample(1, 10.0));

        let evaluator = StateEvaluator::new(rx.remove(0), core, TimeDelta::milliseconds(20));
        let evaluator = thread::spawn(move || evaluator.run());

        // Only IMU samples, then nothing at all, well past the stall period
        for seq in 0..6 {
            tx.send(imu_sample(seq));
            thread::sleep(Duration::from_millis(10));
        }
        thread::sleep(Duration::from_millis(60));

        assert_eq!(status.state(), FlightState::PoweredFlight);
        assert!(!status.drogue_fired() && !status.main_fired());

        tx.send(altitude_sample(2, 50.0));
        tx.send(altitude_sample(3, 100.0));
        drop(tx);

        let evaluator = evaluator.join().unwrap();

        assert_eq!(evaluator.stalls, 1);
        assert_eq!(evaluator.core.samples(), 4);
        assert!(evaluator.core.estimate() > 90.0);
        assert_eq!(evaluator.core.state(), FlightState::PoweredFlight);
        assert!(!evaluator.core.status().drogue_fired());
    }

    #[test]
    fn test_daq_never_arms() {
        let params = Parameters::default();

        assert!(!Collaborators::host(&params, OperatingMode::Daq).arming.is_armed());
        assert!(Collaborators::host(&params, OperatingMode::Flight).arming.is_armed());
    }
}
