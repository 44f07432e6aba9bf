//! DC Activity core library.
//!
//! Foreground-program detection with throttling and hysteresis, plus a small
//! single-threaded HTTP endpoint exposing the result as JSON:
//! - Clock and process query provider seams
//! - Telemetry state and the detection poller
//! - Bounded JSON encoding
//! - HTTP exposition server with listener recovery
//! - Periodic driver, configuration, logging and exit codes
//!
//! The binary entry point is in `main.rs`.

pub mod clock;
pub mod config;
pub mod daemon;
pub mod encode;
pub mod exit_codes;
pub mod http;
pub mod logging;
pub mod provider;
pub mod telemetry;
