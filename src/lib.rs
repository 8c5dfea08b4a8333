pub mod channels;
pub mod computer;
pub mod gnc;
pub mod mode;
pub mod nodes;
pub mod parameters;
pub mod runner;
pub mod sensors;
pub mod telemetry;
pub mod utils;
