//! Frame bodies for the CMPP commands the gateway speaks.

use chrono::Local;
use md5::{Digest, Md5};

use super::{Command, VERSION_30};

/// Connect request (handshake). The authenticator is
/// `MD5(source_addr ++ 9 zero bytes ++ password ++ timestamp)` where the
/// timestamp is the local time rendered as `MMDDHHMMSS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectReq {
    pub source_addr: String,
    pub authenticator_source: [u8; 16],
    pub version: u8,
    pub timestamp: u32,
}

impl ConnectReq {
    pub fn new(user: &str, password: &str) -> Self {
        let stamp = Local::now().format("%m%d%H%M%S").to_string();
        let mut hasher = Md5::new();
        hasher.update(user.as_bytes());
        hasher.update([0u8; 9]);
        hasher.update(password.as_bytes());
        hasher.update(stamp.as_bytes());
        Self {
            source_addr: user.to_string(),
            authenticator_source: hasher.finalize().into(),
            version: VERSION_30,
            // MMDDHHMMSS is at most 1231235959, which fits in u32
            timestamp: stamp.parse().unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectResp {
    pub status: u32,
    pub authenticator_ismg: [u8; 16],
    pub version: u8,
}

impl ConnectResp {
    pub fn accepted() -> Self {
        Self {
            status: 0,
            authenticator_ismg: [0u8; 16],
            version: VERSION_30,
        }
    }
}

/// Submit request (mobile-terminated message).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReq {
    pub msg_id: u64,
    pub pk_total: u8,
    pub pk_number: u8,
    pub registered_delivery: u8,
    pub msg_level: u8,
    pub service_id: String,
    pub fee_user_type: u8,
    pub fee_terminal_id: String,
    pub fee_terminal_type: u8,
    pub tp_pid: u8,
    pub tp_udhi: u8,
    pub msg_fmt: u8,
    pub msg_src: String,
    pub fee_type: String,
    pub fee_code: String,
    pub valid_time: String,
    pub at_time: String,
    pub src_id: String,
    pub dest_usr_tl: u8,
    pub dest_terminal_id: Vec<String>,
    pub dest_terminal_type: u8,
    pub msg_content: Vec<u8>,
    pub link_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitResp {
    pub msg_id: u64,
    pub result: u32,
}

/// Deliver request (mobile-originated message or status report).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverReq {
    pub msg_id: u64,
    pub dest_id: String,
    pub service_id: String,
    pub tp_pid: u8,
    pub tp_udhi: u8,
    pub msg_fmt: u8,
    pub src_terminal_id: String,
    pub src_terminal_type: u8,
    pub registered_delivery: u8,
    pub msg_content: Vec<u8>,
    pub link_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliverResp {
    pub msg_id: u64,
    pub result: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveTestReq;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveTestResp {
    pub reserved: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminateReq;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminateResp;

/// The closed set of frames the gateway exchanges with the SMSC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Connect(ConnectReq),
    ConnectResp(ConnectResp),
    Submit(SubmitReq),
    SubmitResp(SubmitResp),
    Deliver(DeliverReq),
    DeliverResp(DeliverResp),
    ActiveTest(ActiveTestReq),
    ActiveTestResp(ActiveTestResp),
    Terminate(TerminateReq),
    TerminateResp(TerminateResp),
}

impl Frame {
    pub fn command(&self) -> Command {
        match self {
            Frame::Connect(_) => Command::Connect,
            Frame::ConnectResp(_) => Command::ConnectResp,
            Frame::Submit(_) => Command::Submit,
            Frame::SubmitResp(_) => Command::SubmitResp,
            Frame::Deliver(_) => Command::Deliver,
            Frame::DeliverResp(_) => Command::DeliverResp,
            Frame::ActiveTest(_) => Command::ActiveTest,
            Frame::ActiveTestResp(_) => Command::ActiveTestResp,
            Frame::Terminate(_) => Command::Terminate,
            Frame::TerminateResp(_) => Command::TerminateResp,
        }
    }
}
