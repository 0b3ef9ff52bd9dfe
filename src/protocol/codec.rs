//! Frame codec for an RTSP control connection (RFC 2326 §4, §10.12).
//!
//! A single TCP connection carries two kinds of frames once interleaved
//! transport is in use: plain RTSP text messages, and `$`-prefixed binary
//! frames carrying RTP/RTCP payloads for a negotiated channel. This module
//! decodes both off the same byte stream and lets the caller distinguish
//! them, the way `scottlamb`'s `Framed<TcpStream, Codec>` client splits a
//! connection into a typed item stream instead of hand-rolling
//! `BufReader::read_line` (see the teacher's `transport::tcp::Connection::run`,
//! which only knew how to read text lines).

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{ParseErrorKind, RtspError};
use crate::protocol::request::{MAX_BODY_LEN, MAX_HEADER_LINES, MAX_HEADER_LINE_LEN};

/// One frame read off an interleaved RTSP connection.
#[derive(Debug, Clone)]
pub enum Frame {
    /// A complete RTSP request or response, header + body, still as raw text.
    Message(String),
    /// A `$`-framed binary RTP/RTCP packet on the given channel (RFC 2326 §10.12).
    Interleaved { channel: u8, payload: Vec<u8> },
}

/// Maximum interleaved payload length ($-frame length field is 16 bits, but
/// we cap well below that to bound memory use per spec §4.4).
pub const MAX_INTERLEAVED_LEN: usize = 32 * 1024;

/// Stateful decoder for the mixed text/binary RTSP stream.
///
/// Holds no buffered frame state between calls beyond what `BytesMut`
/// itself retains — `tokio_util::codec::Framed` owns the read buffer.
#[derive(Debug, Default)]
pub struct RtspCodec {
    content_length: Option<usize>,
}

impl Decoder for RtspCodec {
    type Item = Frame;
    type Error = RtspError;

    fn decode(&mut self, src: &mut BytesMut) -> std::result::Result<Option<Frame>, RtspError> {
        if src.is_empty() {
            return Ok(None);
        }

        if src[0] == b'$' {
            if src.len() < 4 {
                return Ok(None);
            }
            let channel = src[1];
            let len = u16::from_be_bytes([src[2], src[3]]) as usize;
            if len > MAX_INTERLEAVED_LEN {
                return Err(RtspError::Parse {
                    kind: ParseErrorKind::InvalidInterleavedFrame,
                });
            }
            if src.len() < 4 + len {
                src.reserve(4 + len - src.len());
                return Ok(None);
            }
            src.advance(4);
            let payload = src.split_to(len).to_vec();
            return Ok(Some(Frame::Interleaved { channel, payload }));
        }

        // Text message: look for the blank-line header terminator.
        let header_end = find_subslice(src, b"\r\n\r\n")
            .map(|i| i + 4)
            .or_else(|| find_subslice(src, b"\n\n").map(|i| i + 2));

        let Some(header_end) = header_end else {
            if src.len() > MAX_HEADER_LINES * MAX_HEADER_LINE_LEN {
                return Err(RtspError::Parse {
                    kind: ParseErrorKind::HeaderLineTooLong,
                });
            }
            return Ok(None);
        };

        let content_length = match self.content_length {
            Some(len) => len,
            None => {
                let head = std::str::from_utf8(&src[..header_end])
                    .map_err(|_| RtspError::Parse {
                        kind: ParseErrorKind::InvalidHeader,
                    })?
                    .to_ascii_lowercase();
                let len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if len > MAX_BODY_LEN {
                    return Err(RtspError::Parse {
                        kind: ParseErrorKind::BodyTooLarge,
                    });
                }
                self.content_length = Some(len);
                len
            }
        };

        if src.len() < header_end + content_length {
            return Ok(None);
        }

        let total = header_end + content_length;
        let frame = src.split_to(total);
        self.content_length = None;
        let text = String::from_utf8_lossy(&frame).into_owned();
        Ok(Some(Frame::Message(text)))
    }
}

impl Encoder<Frame> for RtspCodec {
    type Error = RtspError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> std::result::Result<(), RtspError> {
        match item {
            Frame::Message(text) => dst.put_slice(text.as_bytes()),
            Frame::Interleaved { channel, payload } => {
                if payload.len() > MAX_INTERLEAVED_LEN {
                    return Err(RtspError::PacketTooLarge(payload.len()));
                }
                dst.put_u8(b'$');
                dst.put_u8(channel);
                dst.put_u16(payload.len() as u16);
                dst.put_slice(&payload);
            }
        }
        Ok(())
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_simple_message() {
        let mut codec = RtspCodec::default();
        let mut buf = BytesMut::from("OPTIONS rtsp://x RTSP/1.0\r\nCSeq: 1\r\n\r\n");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        match frame {
            Frame::Message(text) => assert!(text.starts_with("OPTIONS")),
            _ => panic!("expected message frame"),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn waits_for_body_by_content_length() {
        let mut codec = RtspCodec::default();
        let mut buf = BytesMut::from(
            "ANNOUNCE rtsp://x RTSP/1.0\r\nCSeq: 1\r\nContent-Length: 5\r\n\r\nv=0\r\n",
        );
        assert!(codec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn incomplete_body_returns_none() {
        let mut codec = RtspCodec::default();
        let mut buf =
            BytesMut::from("ANNOUNCE rtsp://x RTSP/1.0\r\nContent-Length: 10\r\n\r\nv=0");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn decodes_interleaved_frame() {
        let mut codec = RtspCodec::default();
        let mut buf = BytesMut::new();
        buf.put_u8(b'$');
        buf.put_u8(0);
        buf.put_u16(4);
        buf.put_slice(&[1, 2, 3, 4]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        match frame {
            Frame::Interleaved { channel, payload } => {
                assert_eq!(channel, 0);
                assert_eq!(payload, vec![1, 2, 3, 4]);
            }
            _ => panic!("expected interleaved frame"),
        }
    }

    #[test]
    fn partial_interleaved_header_returns_none() {
        let mut codec = RtspCodec::default();
        let mut buf = BytesMut::from(&b"$\x00\x00"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn encode_interleaved_round_trips() {
        let mut codec = RtspCodec::default();
        let mut buf = BytesMut::new();
        codec
            .encode(
                Frame::Interleaved {
                    channel: 2,
                    payload: vec![9, 9],
                },
                &mut buf,
            )
            .unwrap();
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        match frame {
            Frame::Interleaved { channel, payload } => {
                assert_eq!(channel, 2);
                assert_eq!(payload, vec![9, 9]);
            }
            _ => panic!("expected interleaved frame"),
        }
    }

    #[test]
    fn oversized_interleaved_frame_rejected() {
        let mut codec = RtspCodec::default();
        let mut buf = BytesMut::new();
        buf.put_u8(b'$');
        buf.put_u8(0);
        buf.put_u16(u16::MAX);
        assert!(codec.decode(&mut buf).is_err());
    }
}
