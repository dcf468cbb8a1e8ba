use crate::{Error, SessionId};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Header addresses a message to the client or to the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub session_id: SessionId,
    pub command: i32,
    pub request_id: i32,
}

impl Header {
    pub const ENCODED_LEN: usize = 12;

    pub fn new(session_id: SessionId, command: i32, request_id: i32) -> Self {
        Self {
            session_id,
            command,
            request_id,
        }
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_i32(self.session_id as i32);
        buf.put_i32(self.command);
        buf.put_i32(self.request_id);
    }

    pub fn decode<B: Buf>(buf: &mut B) -> Option<Self> {
        if buf.remaining() < Self::ENCODED_LEN {
            return None;
        }
        Some(Self {
            session_id: buf.get_i32() as SessionId,
            command: buf.get_i32(),
            request_id: buf.get_i32(),
        })
    }
}

/// Commands understood by the runtime.
pub mod runtime_command {
    pub const INVOKE: i32 = 0x01;
    pub const RESULT: i32 = 0x02;
    pub const ERROR: i32 = 0x04;
    pub const INTERNAL_JDBC: i32 = 0x08;
    pub const DESTROY: i32 = 0x10;
    pub const END_TRANSACTION: i32 = 0x20;
    pub const COMPILE: i32 = 0x80;
}

/// Commands sent back to the originating client.
pub mod client_command {
    pub const CALLBACK: i32 = 0x01;
    pub const END_CALLBACK: i32 = 0x02;
    pub const FREE_QUERY_HANDLERS: i32 = 0x03;
}

/// Encode a request frame: a four-byte big-endian length, the Header, and the payload.
pub fn encode_request(header: &Header, payload: &[u8], buf: &mut BytesMut) {
    let length = Header::ENCODED_LEN + payload.len();
    buf.reserve(4 + length);
    buf.put_u32(length as u32);
    header.encode(buf);
    buf.put_slice(payload);
}

/// Encode a response frame: a four-byte big-endian length and the payload.
pub fn encode_response(payload: &[u8], buf: &mut BytesMut) {
    buf.reserve(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
}

/// Largest frame payload accepted from the runtime.
pub const MAX_FRAME_LEN: usize = 64 << 20;

/// Split one complete length-prefixed frame from the front of `buf`.
/// Returns None if `buf` holds only a partial frame, leaving it untouched.
/// A length prefix beyond MAX_FRAME_LEN is an error.
pub fn split_frame(buf: &mut BytesMut) -> Result<Option<Bytes>, Error> {
    let Some(prefix) = buf.get(0..4) else {
        return Ok(None);
    };
    let length = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;

    if length > MAX_FRAME_LEN {
        return Err(Error::Network(format!(
            "frame of {length} bytes exceeds the maximum of {MAX_FRAME_LEN}"
        )));
    }
    if buf.len() < 4 + length {
        return Ok(None);
    }
    buf.advance(4);
    Ok(Some(buf.split_to(length).freeze()))
}

/// Pack a list of i32 values as a count-prefixed payload.
pub fn pack_i32s(values: &[i32]) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + 4 * values.len());
    buf.put_i32(values.len() as i32);
    for v in values {
        buf.put_i32(*v);
    }
    buf.freeze()
}
