//! Infrastructure adapters and runtime bootstrap.

pub mod cache;
pub mod descriptors;
pub mod error;
pub mod http;
pub mod renderer;
pub mod telemetry;
