//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod fetcher;
pub mod http;
pub mod telemetry;
