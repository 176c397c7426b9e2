//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod http;
pub mod providers;
pub mod telemetry;
pub mod transform;
