//! RTSP response parsing/building (RFC 2326 §7).

use crate::error::{ParseErrorKind, Result, RtspError};
use crate::protocol::header::Headers;
use crate::protocol::request::{MAX_HEADER_LINES, MAX_HEADER_LINE_LEN};

/// RTSP status code, paired with its canonical reason phrase (RFC 2326 §7.1.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(200);
    pub const FOUND: StatusCode = StatusCode(302);
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    pub const UNAUTHORIZED: StatusCode = StatusCode(401);
    pub const FORBIDDEN: StatusCode = StatusCode(403);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const METHOD_NOT_ALLOWED: StatusCode = StatusCode(405);
    pub const REQUEST_TIMEOUT: StatusCode = StatusCode(408);
    pub const UNSUPPORTED_MEDIA_TYPE: StatusCode = StatusCode(415);
    pub const SESSION_NOT_FOUND: StatusCode = StatusCode(454);
    pub const METHOD_NOT_VALID_IN_STATE: StatusCode = StatusCode(455);
    pub const UNSUPPORTED_TRANSPORT: StatusCode = StatusCode(461);
    pub const INTERNAL_SERVER_ERROR: StatusCode = StatusCode(500);
    pub const NOT_IMPLEMENTED: StatusCode = StatusCode(501);
    pub const SERVICE_UNAVAILABLE: StatusCode = StatusCode(503);
    pub const RTSP_VERSION_NOT_SUPPORTED: StatusCode = StatusCode(505);

    pub fn reason(self) -> &'static str {
        match self.0 {
            200 => "OK",
            302 => "Found",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            408 => "Request Timeout",
            415 => "Unsupported Media Type",
            454 => "Session Not Found",
            455 => "Method Not Valid in This State",
            461 => "Unsupported Transport",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            503 => "Service Unavailable",
            505 => "RTSP Version Not Supported",
            _ => "Unknown",
        }
    }

    pub fn is_success(self) -> bool {
        (200..300).contains(&self.0)
    }

    pub fn is_redirect(self) -> bool {
        (300..400).contains(&self.0)
    }
}

/// A parsed or built RTSP response (RFC 2326 §7).
#[derive(Debug, Clone)]
pub struct RtspResponse {
    pub version: String,
    pub status: StatusCode,
    pub reason: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl RtspResponse {
    /// Start building a response with the canonical reason phrase for `status`.
    pub fn new(status: StatusCode) -> Self {
        RtspResponse {
            version: "RTSP/1.0".to_string(),
            reason: status.reason().to_string(),
            status,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    pub fn with_cseq(mut self, cseq: u32) -> Self {
        self.headers.set("CSeq", cseq.to_string());
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.set(name, value.into());
        self
    }

    pub fn with_body(mut self, content_type: &str, body: Vec<u8>) -> Self {
        self.headers.set("Content-Type", content_type);
        self.headers.set("Content-Length", body.len().to_string());
        self.body = body;
        self
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

    pub fn parse_head(raw: &str) -> Result<Self> {
        let mut lines = raw.split("\r\n").flat_map(|l| l.split('\n'));

        let status_line = lines.next().ok_or(RtspError::Parse {
            kind: ParseErrorKind::EmptyMessage,
        })?;
        let parts: Vec<&str> = status_line.splitn(3, ' ').collect();
        if parts.len() < 2 {
            return Err(RtspError::Parse {
                kind: ParseErrorKind::InvalidStartLine,
            });
        }
        let version = parts[0].to_string();
        let code: u16 = parts[1].parse().map_err(|_| RtspError::Parse {
            kind: ParseErrorKind::InvalidStartLine,
        })?;
        let reason = parts.get(2).copied().unwrap_or("").to_string();

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

        Ok(RtspResponse {
            version,
            status: StatusCode(code),
            reason,
            headers,
            body: Vec::new(),
        })
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let header_end = raw
            .find("\r\n\r\n")
            .map(|i| i + 4)
            .or_else(|| raw.find("\n\n").map(|i| i + 2));
        match header_end {
            Some(idx) => {
                let mut resp = Self::parse_head(&raw[..idx])?;
                resp.body = raw.as_bytes()[idx..].to_vec();
                Ok(resp)
            }
            None => Self::parse_head(raw),
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = format!("{} {} {}\r\n", self.version, self.status.0, self.reason);
        for (name, value) in self.headers.iter() {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        if !self.body.is_empty() && self.headers.get("Content-Length").is_none() {
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
    fn build_ok_with_cseq() {
        let resp = RtspResponse::ok().with_cseq(7);
        let text = String::from_utf8(resp.serialize()).unwrap();
        assert!(text.starts_with("RTSP/1.0 200 OK\r\n"));
        assert!(text.contains("CSeq: 7"));
    }

    #[test]
    fn parse_ok_response() {
        let raw = "RTSP/1.0 200 OK\r\nCSeq: 2\r\nSession: 12345678;timeout=60\r\n\r\n";
        let resp = RtspResponse::parse(raw).unwrap();
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.cseq(), Some(2));
    }

    #[test]
    fn parse_session_not_found() {
        let raw = "RTSP/1.0 454 Session Not Found\r\nCSeq: 9\r\n\r\n";
        let resp = RtspResponse::parse(raw).unwrap();
        assert_eq!(resp.status.0, 454);
        assert!(!resp.status.is_success());
    }

    #[test]
    fn with_body_sets_content_length() {
        let resp = RtspResponse::ok().with_body("application/sdp", b"v=0\r\n".to_vec());
        assert_eq!(resp.get_header("Content-Length"), Some("5"));
    }

    #[test]
    fn redirect_status_detected() {
        let resp = RtspResponse::new(StatusCode::FOUND);
        assert!(resp.status.is_redirect());
    }

    #[test]
    fn serialize_round_trip_with_body() {
        let resp = RtspResponse::ok()
            .with_cseq(1)
            .with_body("application/sdp", b"v=0\r\n".to_vec());
        let text = String::from_utf8(resp.serialize()).unwrap();
        let reparsed = RtspResponse::parse(&text).unwrap();
        assert_eq!(reparsed.body, b"v=0\r\n");
    }

    #[test]
    fn parse_empty_response_errors() {
        assert!(RtspResponse::parse("").is_err());
    }
}
