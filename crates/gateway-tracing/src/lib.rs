//! Tracing setup shared by the gateway binaries: subscriber and OTLP
//! initialisation plus span builders for request and upstream attempts.

pub mod config;
pub mod otlp;
pub mod spans;

pub use config::{LogFormat, OtlpProtocol, TracingConfig};
pub use otlp::{init_tracing, TracingGuard};
