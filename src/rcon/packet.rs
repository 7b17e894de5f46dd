use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::error::RconError;

/// Client → server: authenticate with the body as credential.
pub const SERVERDATA_AUTH: i32 = 3;
/// Server → client: authentication verdict. Shares the value of EXECCOMMAND.
pub const SERVERDATA_AUTH_RESPONSE: i32 = 2;
/// Client → server: run the body as a console command.
pub const SERVERDATA_EXECCOMMAND: i32 = 2;
/// Server → client: command output.
pub const SERVERDATA_RESPONSE_VALUE: i32 = 0;

/// Request id the server uses to signal a rejected credential.
pub const AUTH_FAILED_ID: i32 = -1;

/// `request_id` + `type` + the two trailing NUL bytes.
const HEADER_AND_TERMINATOR: usize = 10;
const MIN_PACKET_LENGTH: i32 = HEADER_AND_TERMINATOR as i32;
/// Upper bound on a declared frame length; anything larger is treated as garbage.
pub const MAX_PACKET_LENGTH: i32 = 64 * 1024;
/// Longest command body servers reliably accept in one outgoing packet.
pub const MAX_COMMAND_LENGTH: usize = 1446;

/// One RCON frame: `[i32 length][i32 request_id][i32 type][body][0x00][0x00]`,
/// little-endian. `length` counts every byte after itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub request_id: i32,
    pub kind: i32,
    pub body: String,
}

impl Packet {
    pub fn auth(request_id: i32, credential: &str) -> Self {
        Self {
            request_id,
            kind: SERVERDATA_AUTH,
            body: credential.to_string(),
        }
    }

    pub fn exec(request_id: i32, command: &str) -> Self {
        Self {
            request_id,
            kind: SERVERDATA_EXECCOMMAND,
            body: command.to_string(),
        }
    }

    pub fn response(request_id: i32, body: impl Into<String>) -> Self {
        Self {
            request_id,
            kind: SERVERDATA_RESPONSE_VALUE,
            body: body.into(),
        }
    }

    pub fn auth_response(request_id: i32) -> Self {
        Self {
            request_id,
            kind: SERVERDATA_AUTH_RESPONSE,
            body: String::new(),
        }
    }
}

impl Drop for Packet {
    fn drop(&mut self) {
        if self.kind == SERVERDATA_AUTH {
            zeroize::Zeroize::zeroize(&mut self.body);
        }
    }
}

/// Length-prefixed framing for [`Packet`]s over a byte stream.
///
/// The same codec serves both directions, which lets tests run a mock
/// server on the other half of an in-memory pipe.
#[derive(Debug, Default, Clone, Copy)]
pub struct RconCodec;

impl Decoder for RconCodec {
    type Item = Packet;
    type Error = RconError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, RconError> {
        if src.len() < 4 {
            return Ok(None);
        }

        let length = i32::from_le_bytes([src[0], src[1], src[2], src[3]]);
        if !(MIN_PACKET_LENGTH..=MAX_PACKET_LENGTH).contains(&length) {
            return Err(RconError::MalformedResponse(format!(
                "declared packet length {} outside {}..={}",
                length, MIN_PACKET_LENGTH, MAX_PACKET_LENGTH
            )));
        }

        let frame_len = 4 + length as usize;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(4);
        let mut frame = src.split_to(length as usize);
        let request_id = frame.get_i32_le();
        let kind = frame.get_i32_le();

        let body_len = frame.len() - 2;
        if frame[body_len..] != [0, 0] {
            return Err(RconError::MalformedResponse(
                "packet is not terminated by two NUL bytes".to_string(),
            ));
        }

        let body = String::from_utf8_lossy(&frame[..body_len]).into_owned();

        Ok(Some(Packet {
            request_id,
            kind,
            body,
        }))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Packet>, RconError> {
        match self.decode(buf)? {
            Some(packet) => Ok(Some(packet)),
            None if buf.is_empty() => Ok(None),
            None => Err(RconError::ConnectionReset(format!(
                "connection closed with {} bytes of a partial packet",
                buf.len()
            ))),
        }
    }
}

impl Encoder<Packet> for RconCodec {
    type Error = RconError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<(), RconError> {
        let body = packet.body.as_bytes();
        if body.contains(&0) {
            return Err(RconError::Unknown(
                "packet body must not contain NUL bytes".to_string(),
            ));
        }

        let length = body.len() + HEADER_AND_TERMINATOR;
        if length > MAX_PACKET_LENGTH as usize {
            return Err(RconError::Unknown(format!(
                "packet body of {} bytes is too large",
                body.len()
            )));
        }

        dst.reserve(4 + length);
        dst.put_i32_le(length as i32);
        dst.put_i32_le(packet.request_id);
        dst.put_i32_le(packet.kind);
        dst.put_slice(body);
        dst.put_u8(0);
        dst.put_u8(0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(packet: Packet) -> BytesMut {
        let mut buf = BytesMut::new();
        RconCodec.encode(packet, &mut buf).unwrap();
        buf
    }

    #[test]
    fn auth_packet_is_bit_exact() {
        let buf = encode(Packet::auth(7, "pw"));
        let expected: &[u8] = &[
            12, 0, 0, 0, // length = 4 + 4 + 2 + 2
            7, 0, 0, 0, // request id
            3, 0, 0, 0, // SERVERDATA_AUTH
            b'p', b'w', 0, 0,
        ];
        assert_eq!(&buf[..], expected);
    }

    #[test]
    fn negative_ids_are_little_endian_twos_complement() {
        let mut buf = BytesMut::from(&[10u8, 0, 0, 0, 0xff, 0xff, 0xff, 0xff, 2, 0, 0, 0, 0, 0][..]);
        let packet = RconCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(packet.request_id, AUTH_FAILED_ID);
        assert_eq!(packet.kind, SERVERDATA_AUTH_RESPONSE);
        assert!(packet.body.is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_frames_wait_for_more_bytes() {
        let full = encode(Packet::response(5, "There are 0/20 players online:"));
        let mut buf = BytesMut::from(&full[..9]);
        assert!(RconCodec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&full[9..]);
        let packet = RconCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(packet.body, "There are 0/20 players online:");
    }

    #[test]
    fn back_to_back_frames_decode_separately() {
        let mut buf = encode(Packet::response(1, "a"));
        buf.extend_from_slice(&encode(Packet::response(1, "b")));

        assert_eq!(RconCodec.decode(&mut buf).unwrap().unwrap().body, "a");
        assert_eq!(RconCodec.decode(&mut buf).unwrap().unwrap().body, "b");
        assert!(RconCodec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn rejects_impossible_lengths() {
        let mut buf = BytesMut::from(&[3u8, 0, 0, 0, 1, 2, 3][..]);
        let err = RconCodec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, RconError::MalformedResponse(_)));

        // An HTTP server on the RCON port answers with text.
        let mut buf = BytesMut::from(&b"HTTP/1.1 400 Bad Request\r\n"[..]);
        let err = RconCodec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, RconError::MalformedResponse(_)));
    }

    #[test]
    fn rejects_missing_terminator() {
        let mut buf = BytesMut::from(&[10u8, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, b'x', b'y'][..]);
        let err = RconCodec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, RconError::MalformedResponse(_)));
    }

    #[test]
    fn truncated_stream_is_a_reset() {
        let full = encode(Packet::response(1, "hello"));
        let mut buf = BytesMut::from(&full[..6]);
        let err = RconCodec.decode_eof(&mut buf).unwrap_err();
        assert!(matches!(err, RconError::ConnectionReset(_)));
    }

    #[test]
    fn refuses_to_encode_nul_in_body() {
        let mut buf = BytesMut::new();
        let err = RconCodec.encode(Packet::exec(1, "say a\0b"), &mut buf).unwrap_err();
        assert!(matches!(err, RconError::Unknown(_)));
        assert!(buf.is_empty());
    }
}
