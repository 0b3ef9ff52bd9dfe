//! Session Description Protocol model (RFC 4566), used to answer DESCRIBE
//! and to parse an ANNOUNCE body.
//!
//! The teacher crate only ever produced SDP text from a hardcoded H.264
//! template (`protocol::sdp::generate_sdp`); this module generalizes that
//! into a bidirectional `SessionDescription` that can marshal *and*
//! unmarshal, since a RECORD-capable server and a client driving DESCRIBE
//! both need to read SDP another party produced.

use crate::error::{ParseErrorKind, Result, RtspError};
use crate::format::Format;

/// One `m=` media section plus its associated attributes.
#[derive(Debug, Clone)]
pub struct MediaDescription {
    /// `audio` / `video` / `application`.
    pub media_type: String,
    pub port: u16,
    pub proto: String,
    pub format: Format,
    /// `a=control:` attribute, resolved against the session's `Content-Base`
    /// to obtain the per-media SETUP URL (spec §3).
    pub control: Option<String>,
    /// `a=sendonly` / `a=recvonly` / `a=sendrecv` (ONVIF back-channel, spec §4.10).
    pub direction: Option<String>,
}

/// A full SDP session description (RFC 4566 §5).
#[derive(Debug, Clone)]
pub struct SessionDescription {
    pub username: String,
    pub session_id: String,
    pub session_version: String,
    pub origin_addr: String,
    pub session_name: String,
    pub connection_addr: String,
    /// `a=control:` at the session level (resolved as the `Content-Base`).
    pub control: Option<String>,
    pub media: Vec<MediaDescription>,
}

impl SessionDescription {
    pub fn marshal(&self) -> String {
        let mut out = String::new();
        out.push_str("v=0\r\n");
        out.push_str(&format!(
            "o={} {} {} IN IP4 {}\r\n",
            self.username, self.session_id, self.session_version, self.origin_addr
        ));
        out.push_str(&format!("s={}\r\n", self.session_name));
        out.push_str(&format!("c=IN IP4 {}\r\n", self.connection_addr));
        out.push_str("t=0 0\r\n");
        if let Some(control) = &self.control {
            out.push_str(&format!("a=control:{control}\r\n"));
        }
        for media in &self.media {
            out.push_str(&format!(
                "m={} {} {} {}\r\n",
                media.media_type,
                media.port,
                media.proto,
                media.format.payload_type()
            ));
            out.push_str(&format!("a=rtpmap:{}\r\n", media.format.rtpmap()));
            if let Some(fmtp) = media.format.fmtp() {
                out.push_str(&format!(
                    "a=fmtp:{} {}\r\n",
                    media.format.payload_type(),
                    fmtp
                ));
            }
            if let Some(dir) = &media.direction {
                out.push_str(&format!("a={dir}\r\n"));
            }
            if let Some(control) = &media.control {
                out.push_str(&format!("a=control:{control}\r\n"));
            }
        }
        out
    }

    /// Parse an SDP body (lenient: unknown `a=` lines and absent optional
    /// fields are tolerated, since real-world ANNOUNCE bodies vary widely).
    pub fn unmarshal(body: &str) -> Result<Self> {
        let mut username = "-".to_string();
        let mut session_id = "0".to_string();
        let mut session_version = "0".to_string();
        let mut origin_addr = "0.0.0.0".to_string();
        let mut session_name = String::new();
        let mut connection_addr = "0.0.0.0".to_string();
        let mut session_control = None;

        let mut media: Vec<MediaDescription> = Vec::new();

        for line in body.lines() {
            let line = line.trim_end();
            if line.len() < 2 || line.as_bytes()[1] != b'=' {
                continue;
            }
            let (key, value) = (line.as_bytes()[0] as char, &line[2..]);
            match key {
                'o' => {
                    let parts: Vec<&str> = value.split_whitespace().collect();
                    if parts.len() >= 6 {
                        username = parts[0].to_string();
                        session_id = parts[1].to_string();
                        session_version = parts[2].to_string();
                        origin_addr = parts[5].to_string();
                    }
                }
                's' => session_name = value.to_string(),
                'c' => {
                    if let Some(addr) = value.split_whitespace().nth(2) {
                        connection_addr = addr.to_string();
                    }
                }
                'm' => {
                    let parts: Vec<&str> = value.split_whitespace().collect();
                    if parts.len() < 4 {
                        return Err(RtspError::Parse {
                            kind: ParseErrorKind::InvalidHeader,
                        });
                    }
                    let port: u16 = parts[1].parse().unwrap_or(0);
                    let pt: u8 = parts[3].parse().unwrap_or(0);
                    media.push(MediaDescription {
                        media_type: parts[0].to_string(),
                        port,
                        proto: parts[2].to_string(),
                        format: Format::from_payload_type(pt),
                        control: None,
                        direction: None,
                    });
                }
                'a' => {
                    if let Some(control) = value.strip_prefix("control:") {
                        match media.last_mut() {
                            Some(m) => m.control = Some(control.to_string()),
                            None => session_control = Some(control.to_string()),
                        }
                    } else if let Some(m) = media.last_mut() {
                        if value.starts_with("rtpmap:") {
                            if let Some(fmt) = Format::from_rtpmap(&value[7..]) {
                                m.format = fmt;
                            }
                        } else if matches!(value, "sendonly" | "recvonly" | "sendrecv") {
                            m.direction = Some(value.to_string());
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(SessionDescription {
            username,
            session_id,
            session_version,
            origin_addr,
            session_name,
            connection_addr,
            control: session_control,
            media,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::Format;

    fn sample() -> SessionDescription {
        SessionDescription {
            username: "-".to_string(),
            session_id: "1".to_string(),
            session_version: "1".to_string(),
            origin_addr: "192.168.1.10".to_string(),
            session_name: "stream".to_string(),
            connection_addr: "192.168.1.10".to_string(),
            control: Some("rtsp://192.168.1.10/stream".to_string()),
            media: vec![MediaDescription {
                media_type: "video".to_string(),
                port: 0,
                proto: "RTP/AVP".to_string(),
                format: Format::H264 { payload_type: 96 },
                control: Some("trackID=0".to_string()),
                direction: None,
            }],
        }
    }

    #[test]
    fn marshal_contains_media_section() {
        let text = sample().marshal();
        assert!(text.contains("m=video 0 RTP/AVP 96"));
        assert!(text.contains("a=control:trackID=0"));
    }

    #[test]
    fn unmarshal_round_trips_media_type_and_control() {
        let text = sample().marshal();
        let parsed = SessionDescription::unmarshal(&text).unwrap();
        assert_eq!(parsed.media.len(), 1);
        assert_eq!(parsed.media[0].media_type, "video");
        assert_eq!(parsed.media[0].control.as_deref(), Some("trackID=0"));
        assert_eq!(parsed.control.as_deref(), Some("rtsp://192.168.1.10/stream"));
    }

    #[test]
    fn unmarshal_invalid_media_line_errors() {
        assert!(SessionDescription::unmarshal("m=video\r\n").is_err());
    }

    #[test]
    fn unmarshal_picks_up_direction_attribute() {
        let body = "v=0\r\nm=audio 0 RTP/AVP 8\r\na=sendonly\r\n";
        let parsed = SessionDescription::unmarshal(body).unwrap();
        assert_eq!(parsed.media[0].direction.as_deref(), Some("sendonly"));
    }
}
