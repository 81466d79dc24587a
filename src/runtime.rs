//! Runtime glue that wires configuration, fatal error capture, telemetry, and
//! the service runner.

pub mod config;
pub mod fatal;
pub mod runner;
pub mod telemetry;
