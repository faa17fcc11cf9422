//! Tracing setup shared by the lookout binaries.

mod subscriber;

pub use subscriber::{LogFormat, init_tracing, init_tracing_with};
