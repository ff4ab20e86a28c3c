pub mod cleanup;
pub mod collector;
pub mod native;
pub mod ops;
pub mod platform;
pub mod process;
pub mod snapshot;
pub mod telemetry;
