pub mod arbiter;
pub mod daq;

pub use arbiter::{ModeArbiter, ModeError, ModeSignal, OperatingMode, PinLevel};
pub use daq::{CsvTestDataStore, DaqError, DaqSession, DaqSummary, TestDataStore};
