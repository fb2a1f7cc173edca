//! Frame encoding and decoding over a byte stream.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::frames::*;
use super::{CodecError, Command, Frame, HEADER_LEN, MAX_FRAME_LEN};

const LINK_ID_LEN: usize = 20;

/// One frame on the wire: sequence identifier plus body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub seq: u32,
    pub frame: Frame,
}

/// Stateless codec for `tokio_util::codec::Framed`.
#[derive(Debug, Default)]
pub struct CmppCodec;

impl CmppCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Encoder<Packet> for CmppCodec {
    type Error = CodecError;

    fn encode(&mut self, pkt: Packet, dst: &mut BytesMut) -> Result<(), CodecError> {
        let mut body = BytesMut::new();
        encode_body(&pkt.frame, &mut body);

        let total = HEADER_LEN + body.len();
        dst.reserve(total);
        dst.put_u32(total as u32);
        dst.put_u32(pkt.frame.command().id());
        dst.put_u32(pkt.seq);
        dst.extend_from_slice(&body);
        Ok(())
    }
}

impl Decoder for CmppCodec {
    type Item = Packet;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, CodecError> {
        if src.len() < 4 {
            return Ok(None);
        }

        let total = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if total < HEADER_LEN {
            return Err(CodecError::Malformed("frame shorter than header"));
        }
        if total > MAX_FRAME_LEN {
            return Err(CodecError::FrameTooLarge(total as u32));
        }
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let mut raw = src.split_to(total);
        raw.advance(4);
        let command_id = raw.get_u32();
        let seq = raw.get_u32();

        let command =
            Command::from_id(command_id).ok_or(CodecError::UnknownCommand(command_id))?;
        let frame = decode_body(command, &mut raw)?;
        Ok(Some(Packet { seq, frame }))
    }
}

fn encode_body(frame: &Frame, dst: &mut BytesMut) {
    match frame {
        Frame::Connect(f) => {
            put_fixed(dst, &f.source_addr, 6);
            dst.put_slice(&f.authenticator_source);
            dst.put_u8(f.version);
            dst.put_u32(f.timestamp);
        }
        Frame::ConnectResp(f) => {
            dst.put_u32(f.status);
            dst.put_slice(&f.authenticator_ismg);
            dst.put_u8(f.version);
        }
        Frame::Submit(f) => {
            dst.put_u64(f.msg_id);
            dst.put_u8(f.pk_total);
            dst.put_u8(f.pk_number);
            dst.put_u8(f.registered_delivery);
            dst.put_u8(f.msg_level);
            put_fixed(dst, &f.service_id, 10);
            dst.put_u8(f.fee_user_type);
            put_fixed(dst, &f.fee_terminal_id, 32);
            dst.put_u8(f.fee_terminal_type);
            dst.put_u8(f.tp_pid);
            dst.put_u8(f.tp_udhi);
            dst.put_u8(f.msg_fmt);
            put_fixed(dst, &f.msg_src, 6);
            put_fixed(dst, &f.fee_type, 2);
            put_fixed(dst, &f.fee_code, 6);
            put_fixed(dst, &f.valid_time, 17);
            put_fixed(dst, &f.at_time, 17);
            put_fixed(dst, &f.src_id, 21);
            dst.put_u8(f.dest_terminal_id.len() as u8);
            for dest in &f.dest_terminal_id {
                put_fixed(dst, dest, 32);
            }
            dst.put_u8(f.dest_terminal_type);
            dst.put_u8(f.msg_content.len() as u8);
            dst.put_slice(&f.msg_content);
            put_fixed(dst, &f.link_id, LINK_ID_LEN);
        }
        Frame::SubmitResp(f) => {
            dst.put_u64(f.msg_id);
            dst.put_u32(f.result);
        }
        Frame::Deliver(f) => {
            dst.put_u64(f.msg_id);
            put_fixed(dst, &f.dest_id, 21);
            put_fixed(dst, &f.service_id, 10);
            dst.put_u8(f.tp_pid);
            dst.put_u8(f.tp_udhi);
            dst.put_u8(f.msg_fmt);
            put_fixed(dst, &f.src_terminal_id, 32);
            dst.put_u8(f.src_terminal_type);
            dst.put_u8(f.registered_delivery);
            dst.put_u8(f.msg_content.len() as u8);
            dst.put_slice(&f.msg_content);
            put_fixed(dst, &f.link_id, LINK_ID_LEN);
        }
        Frame::DeliverResp(f) => {
            dst.put_u64(f.msg_id);
            dst.put_u32(f.result);
        }
        Frame::ActiveTest(_) | Frame::Terminate(_) | Frame::TerminateResp(_) => {}
        Frame::ActiveTestResp(f) => {
            dst.put_u8(f.reserved);
        }
    }
}

fn decode_body(command: Command, b: &mut BytesMut) -> Result<Frame, CodecError> {
    let frame = match command {
        Command::Connect => {
            ensure(b, 6 + 16 + 1 + 4)?;
            let source_addr = get_fixed(b, 6);
            let mut authenticator_source = [0u8; 16];
            b.copy_to_slice(&mut authenticator_source);
            let version = b.get_u8();
            let timestamp = b.get_u32();
            Frame::Connect(ConnectReq {
                source_addr,
                authenticator_source,
                version,
                timestamp,
            })
        }
        Command::ConnectResp => {
            ensure(b, 4 + 16 + 1)?;
            let status = b.get_u32();
            let mut authenticator_ismg = [0u8; 16];
            b.copy_to_slice(&mut authenticator_ismg);
            let version = b.get_u8();
            Frame::ConnectResp(ConnectResp {
                status,
                authenticator_ismg,
                version,
            })
        }
        Command::Submit => {
            ensure(b, 129)?;
            let msg_id = b.get_u64();
            let pk_total = b.get_u8();
            let pk_number = b.get_u8();
            let registered_delivery = b.get_u8();
            let msg_level = b.get_u8();
            let service_id = get_fixed(b, 10);
            let fee_user_type = b.get_u8();
            let fee_terminal_id = get_fixed(b, 32);
            let fee_terminal_type = b.get_u8();
            let tp_pid = b.get_u8();
            let tp_udhi = b.get_u8();
            let msg_fmt = b.get_u8();
            let msg_src = get_fixed(b, 6);
            let fee_type = get_fixed(b, 2);
            let fee_code = get_fixed(b, 6);
            let valid_time = get_fixed(b, 17);
            let at_time = get_fixed(b, 17);
            let src_id = get_fixed(b, 21);
            let dest_usr_tl = b.get_u8() as usize;
            ensure(b, dest_usr_tl * 32 + 2)?;
            let mut dest_terminal_id = Vec::with_capacity(dest_usr_tl);
            for _ in 0..dest_usr_tl {
                dest_terminal_id.push(get_fixed(b, 32));
            }
            let dest_terminal_type = b.get_u8();
            let _msg_length = b.get_u8();
            let msg_content = get_tail_content(b);
            let link_len = b.remaining().min(LINK_ID_LEN);
            let link_id = get_fixed(b, link_len);
            Frame::Submit(SubmitReq {
                msg_id,
                pk_total,
                pk_number,
                registered_delivery,
                msg_level,
                service_id,
                fee_user_type,
                fee_terminal_id,
                fee_terminal_type,
                tp_pid,
                tp_udhi,
                msg_fmt,
                msg_src,
                fee_type,
                fee_code,
                valid_time,
                at_time,
                src_id,
                dest_usr_tl: dest_usr_tl as u8,
                dest_terminal_id,
                dest_terminal_type,
                msg_content,
                link_id,
            })
        }
        Command::SubmitResp => {
            ensure(b, 12)?;
            Frame::SubmitResp(SubmitResp {
                msg_id: b.get_u64(),
                result: b.get_u32(),
            })
        }
        Command::Deliver => {
            ensure(b, 77)?;
            let msg_id = b.get_u64();
            let dest_id = get_fixed(b, 21);
            let service_id = get_fixed(b, 10);
            let tp_pid = b.get_u8();
            let tp_udhi = b.get_u8();
            let msg_fmt = b.get_u8();
            let src_terminal_id = get_fixed(b, 32);
            let src_terminal_type = b.get_u8();
            let registered_delivery = b.get_u8();
            let _msg_length = b.get_u8();
            let msg_content = get_tail_content(b);
            let link_len = b.remaining().min(LINK_ID_LEN);
            let link_id = get_fixed(b, link_len);
            Frame::Deliver(DeliverReq {
                msg_id,
                dest_id,
                service_id,
                tp_pid,
                tp_udhi,
                msg_fmt,
                src_terminal_id,
                src_terminal_type,
                registered_delivery,
                msg_content,
                link_id,
            })
        }
        Command::DeliverResp => {
            ensure(b, 12)?;
            Frame::DeliverResp(DeliverResp {
                msg_id: b.get_u64(),
                result: b.get_u32(),
            })
        }
        Command::ActiveTest => Frame::ActiveTest(ActiveTestReq),
        Command::ActiveTestResp => {
            let reserved = if b.has_remaining() { b.get_u8() } else { 0 };
            Frame::ActiveTestResp(ActiveTestResp { reserved })
        }
        Command::Terminate => Frame::Terminate(TerminateReq),
        Command::TerminateResp => Frame::TerminateResp(TerminateResp),
    };
    Ok(frame)
}

fn ensure(b: &BytesMut, need: usize) -> Result<(), CodecError> {
    if b.remaining() < need {
        return Err(CodecError::Malformed("body truncated"));
    }
    Ok(())
}

/// Message content sits between the fixed head and the trailing link id.
/// The length is derived from the framing rather than the one-byte
/// `msg_length` field, which cannot express bodies over 255 bytes.
fn get_tail_content(b: &mut BytesMut) -> Vec<u8> {
    let len = b.remaining().saturating_sub(LINK_ID_LEN);
    let mut content = vec![0u8; len];
    b.copy_to_slice(&mut content);
    content
}

fn put_fixed(dst: &mut BytesMut, s: &str, len: usize) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(len);
    dst.put_slice(&bytes[..n]);
    if n < len {
        dst.put_bytes(0, len - n);
    }
}

fn get_fixed(b: &mut BytesMut, len: usize) -> String {
    let mut raw = vec![0u8; len];
    b.copy_to_slice(&mut raw);
    let end = raw.iter().position(|&v| v == 0).unwrap_or(len);
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(pkt: Packet) -> BytesMut {
        let mut codec = CmppCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(pkt, &mut buf).unwrap();
        buf
    }

    #[test]
    fn submit_survives_the_wire() {
        let req = SubmitReq {
            msg_id: 0,
            pk_total: 1,
            pk_number: 1,
            registered_delivery: 0,
            msg_level: 1,
            service_id: "svc001".into(),
            fee_user_type: 0,
            fee_terminal_id: String::new(),
            fee_terminal_type: 0,
            tp_pid: 0,
            tp_udhi: 0,
            msg_fmt: 0,
            msg_src: "900001".into(),
            fee_type: "01".into(),
            fee_code: "000000".into(),
            valid_time: String::new(),
            at_time: String::new(),
            src_id: "10657999".into(),
            dest_usr_tl: 1,
            dest_terminal_id: vec!["13800138000".into()],
            dest_terminal_type: 0,
            msg_content: b"hello".to_vec(),
            link_id: String::new(),
        };

        let mut buf = encode(Packet {
            seq: 7,
            frame: Frame::Submit(req.clone()),
        });

        let decoded = CmppCodec::new().decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.seq, 7);
        match decoded.frame {
            Frame::Submit(got) => {
                assert_eq!(got.src_id, "10657999");
                assert_eq!(got.dest_terminal_id, vec!["13800138000".to_string()]);
                assert_eq!(got.msg_content, b"hello");
                assert_eq!(got.fee_type, "01");
            }
            other => panic!("expected submit, got {:?}", other.command()),
        }
    }

    #[test]
    fn partial_frame_waits_for_more() {
        let buf = encode(Packet {
            seq: 1,
            frame: Frame::ActiveTest(ActiveTestReq),
        });

        let mut partial = BytesMut::from(&buf[..buf.len() - 1]);
        assert!(CmppCodec::new().decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&buf[buf.len() - 1..]);
        let pkt = CmppCodec::new().decode(&mut partial).unwrap().unwrap();
        assert_eq!(pkt.frame.command(), Command::ActiveTest);
    }

    #[test]
    fn unknown_command_is_an_error() {
        let mut buf = BytesMut::new();
        buf.put_u32(12);
        buf.put_u32(0x0000_0003);
        buf.put_u32(1);

        match CmppCodec::new().decode(&mut buf) {
            Err(CodecError::UnknownCommand(0x0000_0003)) => {}
            other => panic!("expected unknown command error, got {other:?}"),
        }
    }

    #[test]
    fn oversized_length_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32(1 << 20);
        buf.put_u32(Command::ActiveTest.id());
        buf.put_u32(1);

        assert!(matches!(
            CmppCodec::new().decode(&mut buf),
            Err(CodecError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn deliver_content_longer_than_length_byte() {
        // 300-byte body wraps the one-byte msg_length field; the decoder
        // must recover the full content from the framing.
        let content = vec![b'x'; 300];
        let deliver = DeliverReq {
            msg_id: 99,
            dest_id: "10657".into(),
            service_id: "svc".into(),
            tp_pid: 0,
            tp_udhi: 0,
            msg_fmt: 0,
            src_terminal_id: "13800138000".into(),
            src_terminal_type: 0,
            registered_delivery: 0,
            msg_content: content.clone(),
            link_id: String::new(),
        };

        let mut buf = encode(Packet {
            seq: 3,
            frame: Frame::Deliver(deliver),
        });
        let decoded = CmppCodec::new().decode(&mut buf).unwrap().unwrap();
        match decoded.frame {
            Frame::Deliver(got) => assert_eq!(got.msg_content, content),
            other => panic!("expected deliver, got {:?}", other.command()),
        }
    }
}
