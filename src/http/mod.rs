//! HTTP front-end: submission endpoint, traffic queries and health.

mod handlers;
mod server;

pub use server::{serve, HttpState};
