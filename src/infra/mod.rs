//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod flags;
pub mod fs;
pub mod telemetry;
