pub mod gnc {
    pub const STATE_EVAL: &str = "/gnc/state_eval";
}

pub mod telemetry {
    pub const LOGGING: &str = "/telemetry/logging";
    pub const TRANSMISSION: &str = "/telemetry/transmission";
    pub const DEBUG: &str = "/telemetry/debug";
}
