//! Submission pipeline: bounded ingress channel, local validation and
//! hand-off to the session manager.

pub mod validation;
mod worker;

pub use worker::{channel, PipelineConfig, SubmitQueue, SubmitWorker, Submission};
