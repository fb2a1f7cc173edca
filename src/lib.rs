//! cmppd: a CMPP 3.0 SMS gateway.
//!
//! Bridges an internal HTTP submission API to a carrier SMSC over one
//! long-lived, authenticated CMPP session. Submit acknowledgements arrive
//! asynchronously and are correlated through a persistent pending table;
//! all traffic lands in newest-first logs with filtered retrieval.

pub mod bootstrap;
pub mod codec;
pub mod config;
pub mod http;
pub mod pipeline;
pub mod session;
pub mod store;
pub mod telemetry;
