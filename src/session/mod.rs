//! CMPP session layer: one authenticated TCP connection and the manager
//! that keeps it alive.

mod manager;
#[allow(clippy::module_inception)]
mod session;

pub use manager::{ManagerState, SessionManager};
pub use session::{CmppConfig, Session};

use thiserror::Error;

use crate::codec::{CodecError, Command};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec: {0}")]
    Codec(#[from] CodecError),

    #[error("connect timed out")]
    ConnectTimeout,

    #[error("smsc rejected connect: status {0}")]
    Handshake(u32),

    #[error("expected connect response, got {}", .0.name())]
    UnexpectedFrame(Command),

    #[error("session not ready")]
    NotReady,

    #[error("session closed")]
    Closed,

    #[error("store: {0}")]
    Store(#[source] anyhow::Error),
}
