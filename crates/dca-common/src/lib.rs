//! DC Activity common types, IDs, and errors.
//!
//! This crate provides foundational types shared across dca-core modules:
//! - Process and program identity types with fixed-width hex rendering
//! - Platform result codes retained for diagnostics
//! - Common error types

pub mod error;
pub mod id;

pub use error::{Error, ErrorCategory, Result};
pub use id::{ProcessId, ProgramId, ResultCode};

/// Service name reported in every telemetry document.
pub const SERVICE_NAME: &str = "SwitchDCActivity";
