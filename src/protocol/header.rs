//! RTSP header set and the typed `Transport` header view (RFC 2326 §12).
//!
//! Headers are stored as an ordered, case-insensitively-looked-up list of
//! `(name, value)` pairs — the teacher's `RtspRequest::headers` vector plus
//! case-insensitive `get_header`, generalized into a reusable type shared by
//! requests and responses, with preserved insertion order on write (RFC
//! 2326 doesn't mandate header order, but camera firmware parsers are picky).

use std::fmt;

/// An ordered, case-insensitive header collection.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header, preserving write order. Does not deduplicate —
    /// callers that need single-valued semantics (CSeq, Session) should
    /// overwrite via [`set`](Self::set).
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Set a header, replacing any existing value(s) with the same
    /// case-insensitive name.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        self.entries.push((name, value.into()));
    }

    /// First value for a case-insensitive header name lookup.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for a case-insensitive header name (headers may repeat,
    /// e.g. multiple `WWW-Authenticate` challenges).
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Parsed `CSeq` header, if present and numeric.
    pub fn cseq(&self) -> Option<u32> {
        self.get("CSeq").and_then(|v| v.trim().parse().ok())
    }

    /// Session header value split into `(id, timeout_secs)`.
    pub fn session(&self) -> Option<(String, Option<u64>)> {
        let raw = self.get("Session")?;
        let mut parts = raw.split(';');
        let id = parts.next()?.trim().to_string();
        let timeout = parts.find_map(|p| {
            p.trim()
                .strip_prefix("timeout=")
                .and_then(|v| v.parse::<u64>().ok())
        });
        Some((id, timeout))
    }
}

#[derive(Debug, Default)]
pub struct HeadersIntoIter(std::vec::IntoIter<(String, String)>);

impl IntoIterator for Headers {
    type Item = (String, String);
    type IntoIter = HeadersIntoIter;
    fn into_iter(self) -> Self::IntoIter {
        HeadersIntoIter(self.entries.into_iter())
    }
}

impl Iterator for HeadersIntoIter {
    type Item = (String, String);
    fn next(&mut self) -> Option<Self::Item> {
        self.0.next()
    }
}

/// Transport carrier (RFC 2326 §12.39 `lower-transport`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Carrier {
    Udp,
    Tcp,
}

/// Delivery mode (RFC 2326 §12.39 `cast-type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Unicast,
    Multicast,
}

/// RTP profile (RFC 3551 / RFC 3711).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Avp,
    Savp,
}

/// Direction a SETUP negotiates for this media (RFC 2326 §12.39 `mode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Play,
    Record,
}

/// A fully parsed `Transport` header value (RFC 2326 §12.39, spec §3/§6).
///
/// Bit-exact encode/decode is required by spec §8's header round-trip
/// property; [`format`](Self::format) always emits carrier/delivery/profile
/// first, then the option bag in the canonical order used throughout this
/// module, and tolerant [`parse`](Self::parse) accepts any order and extra
/// whitespace on input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transport {
    pub carrier: Carrier,
    pub delivery: Delivery,
    pub profile: Profile,
    pub client_port: Option<(u16, u16)>,
    pub server_port: Option<(u16, u16)>,
    pub source: Option<String>,
    pub destination: Option<String>,
    pub ssrc: Option<u32>,
    pub interleaved: Option<(u8, u8)>,
    pub mode: Option<Mode>,
    pub ttl: Option<u8>,
}

impl Transport {
    /// A reasonable default for building a client SETUP request body.
    pub fn udp_unicast(client_port: (u16, u16)) -> Self {
        Transport {
            carrier: Carrier::Udp,
            delivery: Delivery::Unicast,
            profile: Profile::Avp,
            client_port: Some(client_port),
            server_port: None,
            source: None,
            destination: None,
            ssrc: None,
            interleaved: None,
            mode: None,
            ttl: None,
        }
    }

    pub fn tcp_interleaved(channels: (u8, u8)) -> Self {
        Transport {
            carrier: Carrier::Tcp,
            delivery: Delivery::Unicast,
            profile: Profile::Avp,
            client_port: None,
            server_port: None,
            source: None,
            destination: None,
            ssrc: None,
            interleaved: Some(channels),
            mode: None,
            ttl: None,
        }
    }

    /// Parse a `Transport` header value. Tolerates extra whitespace around
    /// `;` separators and a missing `client_port` on RECORD SETUPs (spec §4.1).
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.split(';').map(str::trim);
        let proto = parts.next()?;

        let (carrier, profile) = if proto.eq_ignore_ascii_case("RTP/AVP")
            || proto.eq_ignore_ascii_case("RTP/AVP/UDP")
        {
            (Carrier::Udp, Profile::Avp)
        } else if proto.eq_ignore_ascii_case("RTP/AVP/TCP") {
            (Carrier::Tcp, Profile::Avp)
        } else if proto.eq_ignore_ascii_case("RTP/SAVP") {
            (Carrier::Udp, Profile::Savp)
        } else if proto.eq_ignore_ascii_case("RTP/SAVP/TCP") {
            (Carrier::Tcp, Profile::Savp)
        } else {
            return None;
        };

        let mut t = Transport {
            carrier,
            delivery: Delivery::Unicast,
            profile,
            client_port: None,
            server_port: None,
            source: None,
            destination: None,
            ssrc: None,
            interleaved: None,
            mode: None,
            ttl: None,
        };

        for part in parts {
            if part.is_empty() {
                continue;
            }
            if part.eq_ignore_ascii_case("unicast") {
                t.delivery = Delivery::Unicast;
            } else if part.eq_ignore_ascii_case("multicast") {
                t.delivery = Delivery::Multicast;
            } else if let Some(v) = part.strip_prefix("client_port=") {
                t.client_port = parse_port_pair(v);
            } else if let Some(v) = part.strip_prefix("server_port=") {
                t.server_port = parse_port_pair(v);
            } else if let Some(v) = part.strip_prefix("source=") {
                t.source = Some(v.to_string());
            } else if let Some(v) = part.strip_prefix("destination=") {
                t.destination = Some(v.to_string());
            } else if let Some(v) = part.strip_prefix("ssrc=") {
                t.ssrc = u32::from_str_radix(v.trim(), 16).ok().or_else(|| v.parse().ok());
            } else if let Some(v) = part.strip_prefix("interleaved=") {
                let mut bounds = v.split('-');
                let a = bounds.next()?.parse().ok()?;
                let b = bounds.next().and_then(|s| s.parse().ok()).unwrap_or(a + 1);
                t.interleaved = Some((a, b));
            } else if let Some(v) = part.strip_prefix("mode=") {
                let v = v.trim_matches('"');
                if v.eq_ignore_ascii_case("PLAY") {
                    t.mode = Some(Mode::Play);
                } else if v.eq_ignore_ascii_case("RECORD") || v.eq_ignore_ascii_case("record") {
                    t.mode = Some(Mode::Record);
                }
            } else if let Some(v) = part.strip_prefix("ttl=") {
                t.ttl = v.parse().ok();
            }
        }

        Some(t)
    }

    /// Format back to the wire representation (RFC 2326 §12.39).
    pub fn format(&self) -> String {
        let mut s = String::new();
        s.push_str(match (self.carrier, self.profile) {
            (Carrier::Udp, Profile::Avp) => "RTP/AVP",
            (Carrier::Tcp, Profile::Avp) => "RTP/AVP/TCP",
            (Carrier::Udp, Profile::Savp) => "RTP/SAVP",
            (Carrier::Tcp, Profile::Savp) => "RTP/SAVP/TCP",
        });
        s.push(';');
        s.push_str(match self.delivery {
            Delivery::Unicast => "unicast",
            Delivery::Multicast => "multicast",
        });
        if let Some((a, b)) = self.client_port {
            s.push_str(&format!(";client_port={a}-{b}"));
        }
        if let Some((a, b)) = self.server_port {
            s.push_str(&format!(";server_port={a}-{b}"));
        }
        if let Some(src) = &self.source {
            s.push_str(&format!(";source={src}"));
        }
        if let Some(dst) = &self.destination {
            s.push_str(&format!(";destination={dst}"));
        }
        if let Some(ssrc) = self.ssrc {
            s.push_str(&format!(";ssrc={ssrc:08X}"));
        }
        if let Some((a, b)) = self.interleaved {
            s.push_str(&format!(";interleaved={a}-{b}"));
        }
        if let Some(mode) = self.mode {
            s.push_str(match mode {
                Mode::Play => ";mode=PLAY",
                Mode::Record => ";mode=record",
            });
        }
        if let Some(ttl) = self.ttl {
            s.push_str(&format!(";ttl={ttl}"));
        }
        s
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format())
    }
}

fn parse_port_pair(v: &str) -> Option<(u16, u16)> {
    let mut it = v.split('-');
    let a: u16 = it.next()?.parse().ok()?;
    let b: u16 = match it.next() {
        Some(s) => s.parse().ok()?,
        None => a + 1,
    };
    Some((a, b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_case_insensitive_lookup() {
        let mut h = Headers::new();
        h.push("CSeq", "5");
        assert_eq!(h.get("cseq"), Some("5"));
        assert_eq!(h.get("CSEQ"), Some("5"));
    }

    #[test]
    fn headers_set_replaces() {
        let mut h = Headers::new();
        h.push("Session", "a");
        h.set("Session", "b");
        assert_eq!(h.get_all("Session").count(), 1);
        assert_eq!(h.get("Session"), Some("b"));
    }

    #[test]
    fn session_header_splits_timeout() {
        let mut h = Headers::new();
        h.push("Session", "ABC123;timeout=60");
        let (id, timeout) = h.session().unwrap();
        assert_eq!(id, "ABC123");
        assert_eq!(timeout, Some(60));
    }

    #[test]
    fn transport_udp_unicast_round_trip() {
        let raw = "RTP/AVP;unicast;client_port=40000-40001";
        let t = Transport::parse(raw).unwrap();
        assert_eq!(t.carrier, Carrier::Udp);
        assert_eq!(t.client_port, Some((40000, 40001)));
        assert_eq!(t.format(), raw);
    }

    #[test]
    fn transport_tcp_interleaved_round_trip() {
        let raw = "RTP/AVP/TCP;unicast;interleaved=0-1";
        let t = Transport::parse(raw).unwrap();
        assert_eq!(t.carrier, Carrier::Tcp);
        assert_eq!(t.interleaved, Some((0, 1)));
        assert_eq!(t.format(), raw);
    }

    #[test]
    fn transport_multicast_with_ttl() {
        let raw = "RTP/AVP;multicast;destination=224.1.0.5;port=5004-5005;ttl=16";
        // `port=` (vs client_port/server_port) is a vendor variant; tolerate
        // it being ignored rather than rejecting the whole header.
        let t = Transport::parse(raw).unwrap();
        assert_eq!(t.delivery, Delivery::Multicast);
        assert_eq!(t.destination.as_deref(), Some("224.1.0.5"));
        assert_eq!(t.ttl, Some(16));
    }

    #[test]
    fn transport_record_mode_without_client_port() {
        let raw = "RTP/AVP/TCP;unicast;interleaved=2-3;mode=record";
        let t = Transport::parse(raw).unwrap();
        assert_eq!(t.mode, Some(Mode::Record));
        assert!(t.client_port.is_none());
    }

    #[test]
    fn transport_tolerant_whitespace() {
        let raw = "RTP/AVP ; unicast ; client_port=8000-8001";
        let t = Transport::parse(raw).unwrap();
        assert_eq!(t.client_port, Some((8000, 8001)));
    }
}
