pub mod calculation;
pub mod config;
pub mod error;
pub mod telemetry;
