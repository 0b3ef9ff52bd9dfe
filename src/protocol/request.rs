//! RTSP request parsing/building (RFC 2326 §6).

use crate::error::{ParseErrorKind, Result, RtspError};
use crate::protocol::header::Headers;

/// RTSP request method (RFC 2326 §6.1, plus RECORD/ANNOUNCE/SET_PARAMETER
/// which the teacher's server-only subset didn't need).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Options,
    Describe,
    Announce,
    Setup,
    Play,
    Record,
    Pause,
    Teardown,
    GetParameter,
    SetParameter,
    Redirect,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Options => "OPTIONS",
            Method::Describe => "DESCRIBE",
            Method::Announce => "ANNOUNCE",
            Method::Setup => "SETUP",
            Method::Play => "PLAY",
            Method::Record => "RECORD",
            Method::Pause => "PAUSE",
            Method::Teardown => "TEARDOWN",
            Method::GetParameter => "GET_PARAMETER",
            Method::SetParameter => "SET_PARAMETER",
            Method::Redirect => "REDIRECT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "OPTIONS" => Method::Options,
            "DESCRIBE" => Method::Describe,
            "ANNOUNCE" => Method::Announce,
            "SETUP" => Method::Setup,
            "PLAY" => Method::Play,
            "RECORD" => Method::Record,
            "PAUSE" => Method::Pause,
            "TEARDOWN" => Method::Teardown,
            "GET_PARAMETER" => Method::GetParameter,
            "SET_PARAMETER" => Method::SetParameter,
            "REDIRECT" => Method::Redirect,
            _ => return None,
        })
    }
}

/// Framing bounds enforced while parsing a text message (spec §4.2).
pub const MAX_HEADER_LINES: usize = 64;
pub const MAX_HEADER_LINE_LEN: usize = 4096;
pub const MAX_BODY_LEN: usize = 8 * 1024 * 1024;

/// A parsed RTSP request (RFC 2326 §6).
#[derive(Debug, Clone)]
pub struct RtspRequest {
    pub method: Method,
    /// Raw method token, preserved for extension/unknown methods that still
    /// need to flow through to a 501 response.
    pub method_raw: String,
    /// Request-URI, e.g. `rtsp://host:port/stream/trackID=0`, or `*`.
    pub uri: String,
    pub version: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl RtspRequest {
    /// Build a request with no body.
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        RtspRequest {
            method,
            method_raw: method.as_str().to_string(),
            uri: uri.into(),
            version: "RTSP/1.0".to_string(),
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// Parse the header section of a request (start line + headers, no
    /// body). The caller is responsible for reading `Content-Length` bytes
    /// separately once framing has located the body (see
    /// [`crate::protocol::codec`]).
    pub fn parse_head(raw: &str) -> Result<Self> {
        let mut lines = raw.split("\r\n").flat_map(|l| l.split('\n'));

        let request_line = lines.next().ok_or(RtspError::Parse {
            kind: ParseErrorKind::EmptyMessage,
        })?;
        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(RtspError::Parse {
                kind: ParseErrorKind::InvalidStartLine,
            });
        }

        let method_raw = parts[0].to_string();
        let uri = parts[1].to_string();
        let version = parts[2].to_string();
        let method = Method::parse(&method_raw);

        if version != "RTSP/1.0" {
            tracing::warn!(version, "client sent non-RTSP/1.0 version");
        }

        let mut headers = Headers::new();
        let mut count = 0usize;
        for line in lines {
            if line.is_empty() {
                break;
            }
            if line.len() > MAX_HEADER_LINE_LEN {
                return Err(RtspError::Parse {
                    kind: ParseErrorKind::HeaderLineTooLong,
                });
            }
            count += 1;
            if count > MAX_HEADER_LINES {
                return Err(RtspError::Parse {
                    kind: ParseErrorKind::TooManyHeaders,
                });
            }
            let colon = line.find(':').ok_or(RtspError::Parse {
                kind: ParseErrorKind::InvalidHeader,
            })?;
            headers.push(line[..colon].trim(), line[colon + 1..].trim());
        }

        Ok(RtspRequest {
            method: method.unwrap_or(Method::Options),
            method_raw,
            uri,
            version,
            headers,
            body: Vec::new(),
        })
    }

    /// Convenience: parse a complete buffer (head + already-known-length
    /// body) in one call — used by tests and by simple, non-streaming
    /// callers.
    pub fn parse(raw: &str) -> Result<Self> {
        let header_end = raw
            .find("\r\n\r\n")
            .map(|i| i + 4)
            .or_else(|| raw.find("\n\n").map(|i| i + 2));
        match header_end {
            Some(idx) => {
                let mut req = Self::parse_head(&raw[..idx])?;
                req.body = raw.as_bytes()[idx..].to_vec();
                Ok(req)
            }
            None => Self::parse_head(raw),
        }
    }

    pub fn cseq(&self) -> Option<u32> {
        self.headers.cseq()
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn content_length(&self) -> Option<usize> {
        self.headers
            .get("Content-Length")
            .and_then(|v| v.parse().ok())
    }

    /// Serialize to the wire format.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = format!("{} {} {}\r\n", self.method_raw, self.uri, self.version);
        for (name, value) in self.headers.iter() {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        if !self.body.is_empty() {
            out.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        }
        out.push_str("\r\n");
        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_options_request() {
        let raw = "OPTIONS rtsp://localhost:8554/test RTSP/1.0\r\nCSeq: 1\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.method, Method::Options);
        assert_eq!(req.uri, "rtsp://localhost:8554/test");
        assert_eq!(req.cseq(), Some(1));
    }

    #[test]
    fn parse_setup_with_transport() {
        let raw = "SETUP rtsp://localhost:8554/test/trackID=0 RTSP/1.0\r\n\
                   CSeq: 3\r\n\
                   Transport: RTP/AVP;unicast;client_port=8000-8001\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.method, Method::Setup);
        assert_eq!(
            req.get_header("Transport"),
            Some("RTP/AVP;unicast;client_port=8000-8001")
        );
    }

    #[test]
    fn parse_empty_request_errors() {
        assert!(RtspRequest::parse("").is_err());
    }

    #[test]
    fn parse_invalid_start_line_errors() {
        assert!(RtspRequest::parse("JUST_A_METHOD\r\n\r\n").is_err());
    }

    #[test]
    fn header_lookup_case_insensitive() {
        let raw = "OPTIONS rtsp://localhost RTSP/1.0\r\ncseq: 42\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.get_header("CSeq"), Some("42"));
    }

    #[test]
    fn parse_with_body() {
        let sdp = "v=0\r\n";
        let raw = format!(
            "ANNOUNCE rtsp://cam/stream RTSP/1.0\r\nCSeq: 1\r\nContent-Length: {}\r\n\r\n{}",
            sdp.len(),
            sdp
        );
        let req = RtspRequest::parse(&raw).unwrap();
        assert_eq!(req.method, Method::Announce);
        assert_eq!(req.body, sdp.as_bytes());
    }

    #[test]
    fn serialize_round_trip() {
        let mut req = RtspRequest::new(Method::Options, "rtsp://x/stream");
        req.headers.set("CSeq", "1");
        let bytes = req.serialize();
        let text = String::from_utf8(bytes).unwrap();
        let reparsed = RtspRequest::parse(&text).unwrap();
        assert_eq!(reparsed.method, Method::Options);
        assert_eq!(reparsed.cseq(), Some(1));
    }

    #[test]
    fn too_many_header_lines_rejected() {
        let mut raw = String::from("OPTIONS rtsp://x/y RTSP/1.0\r\n");
        for i in 0..(MAX_HEADER_LINES + 1) {
            raw.push_str(&format!("X-Test-{i}: v\r\n"));
        }
        raw.push_str("\r\n");
        assert!(RtspRequest::parse(&raw).is_err());
    }
}
