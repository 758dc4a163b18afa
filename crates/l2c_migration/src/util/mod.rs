pub mod conditions;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod metrics;
pub mod telemetry;
