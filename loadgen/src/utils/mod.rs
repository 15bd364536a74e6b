pub mod env;
pub mod telemetry;

#[cfg(target_family = "unix")]
pub mod os;
