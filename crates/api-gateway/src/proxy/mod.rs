//! Proxy core: request building, transport, retrying executor, response relay.

pub mod correlation;
pub mod executor;
pub mod relay;
pub mod request;
pub mod transport;
