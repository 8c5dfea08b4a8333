#[allow(clippy::module_inception)]
mod parameters;

pub use parameters::*;
