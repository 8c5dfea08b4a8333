mod executor;
mod periodic;

pub use executor::ThreadedExecutor;
pub use periodic::{PeriodicTask, TaskReport};
