//! Tracing setup and protocol counters.

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Tracing configuration.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Log level used when `RUST_LOG` is unset.
    pub log_level: String,

    /// JSON log format.
    pub json_logs: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Initialize the global subscriber.
pub fn init_tracing(config: &TracingConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_target(true))
            .init();
    } else {
        subscriber.with(fmt::layer().with_target(true)).init();
    }

    info!(
        log_level = %config.log_level,
        json_logs = config.json_logs,
        "tracing initialized"
    );

    Ok(())
}

/// Counter helpers so call sites stay one line.
pub mod counters {
    use metrics::counter;

    pub fn frame_sent(command: &'static str) {
        counter!("cmppd.frames.sent", "command" => command).increment(1);
    }

    pub fn frame_received(command: &'static str) {
        counter!("cmppd.frames.received", "command" => command).increment(1);
    }

    pub fn reconnect() {
        counter!("cmppd.session.reconnects").increment(1);
    }

    pub fn heartbeat_sent() {
        counter!("cmppd.session.heartbeats").increment(1);
    }

    pub fn submit_sent() {
        counter!("cmppd.submits.sent").increment(1);
    }

    pub fn submit_completed(accepted: bool) {
        let outcome = if accepted { "accepted" } else { "failed" };
        counter!("cmppd.submits.completed", "outcome" => outcome).increment(1);
    }

    pub fn deliver_received() {
        counter!("cmppd.delivers.received").increment(1);
    }

    pub fn correlation_miss() {
        counter!("cmppd.submits.correlation_misses").increment(1);
    }
}
