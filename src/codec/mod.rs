//! CMPP 3.0 wire codec.
//!
//! Length-prefixed binary frames over TCP. Each frame carries a 12-byte
//! header (total length, command id, sequence id, all big-endian) followed
//! by a command-specific body. The command set handled here is closed:
//! connect, submit, deliver, active-test and terminate, each with its
//! response.

mod command;
mod frames;
mod wire;

pub use command::Command;
pub use frames::{
    ActiveTestReq, ActiveTestResp, ConnectReq, ConnectResp, DeliverReq, DeliverResp, Frame,
    SubmitReq, SubmitResp, TerminateReq, TerminateResp,
};
pub use wire::{CmppCodec, Packet};

use thiserror::Error;

/// CMPP protocol version byte carried in connect frames.
pub const VERSION_30: u8 = 0x30;

/// Header: total length (4) + command id (4) + sequence id (4).
pub const HEADER_LEN: usize = 12;

/// Upper bound on a single frame. A submit with one destination and a
/// full body stays well under this.
pub const MAX_FRAME_LEN: usize = 4096;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown command id {0:#010x}")]
    UnknownCommand(u32),

    #[error("malformed frame: {0}")]
    Malformed(&'static str),

    #[error("frame of {0} bytes exceeds maximum")]
    FrameTooLarge(u32),
}
