//! Media format description (payload type, clock rate, SDP `rtpmap`/`fmtp`).
//!
//! The teacher crate hardcoded a single H.264 codec end to end (its
//! `Packetizer` trait in `media/mod.rs` assumed the server always knew how
//! to encode). This core is transport/session-only (spec §1 non-goal:
//! no encoding/packetization) so formats are carried opaquely — enough
//! to answer DESCRIBE and validate SETUP, not enough to packetize.

/// A negotiated RTP payload format (RFC 3551 static types, or a dynamic
/// type carried with an explicit `rtpmap`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Format {
    H264 { payload_type: u8 },
    H265 { payload_type: u8 },
    Aac { payload_type: u8, clock_rate: u32 },
    G711Mu,
    G711A,
    Opus { payload_type: u8 },
    /// Any other format, carried by its raw `rtpmap` encoding name/clock rate.
    Other {
        payload_type: u8,
        encoding: String,
        clock_rate: u32,
    },
}

impl Format {
    pub fn payload_type(&self) -> u8 {
        match self {
            Format::H264 { payload_type } => *payload_type,
            Format::H265 { payload_type } => *payload_type,
            Format::Aac { payload_type, .. } => *payload_type,
            Format::G711Mu => 0,
            Format::G711A => 8,
            Format::Opus { payload_type } => *payload_type,
            Format::Other { payload_type, .. } => *payload_type,
        }
    }

    pub fn clock_rate(&self) -> u32 {
        match self {
            Format::H264 { .. } | Format::H265 { .. } => 90_000,
            Format::Aac { clock_rate, .. } => *clock_rate,
            Format::G711Mu | Format::G711A => 8_000,
            Format::Opus { .. } => 48_000,
            Format::Other { clock_rate, .. } => *clock_rate,
        }
    }

    fn encoding_name(&self) -> &str {
        match self {
            Format::H264 { .. } => "H264",
            Format::H265 { .. } => "H265",
            Format::Aac { .. } => "mpeg4-generic",
            Format::G711Mu => "PCMU",
            Format::G711A => "PCMA",
            Format::Opus { .. } => "opus",
            Format::Other { encoding, .. } => encoding,
        }
    }

    /// `a=rtpmap:<pt> <encoding>/<clock-rate>` value, without the `a=` prefix.
    pub fn rtpmap(&self) -> String {
        format!(
            "{} {}/{}",
            self.payload_type(),
            self.encoding_name(),
            self.clock_rate()
        )
    }

    /// Optional `a=fmtp:<pt> <params>` value (codec-specific, no parsing of
    /// the parameter string itself — this core passes it through opaquely).
    pub fn fmtp(&self) -> Option<String> {
        match self {
            Format::H264 { .. } => Some("packetization-mode=1".to_string()),
            _ => None,
        }
    }

    /// Construct a format from just a static RFC 3551 payload type, falling
    /// back to a dynamic placeholder for anything not in the static table.
    pub fn from_payload_type(pt: u8) -> Self {
        match pt {
            0 => Format::G711Mu,
            8 => Format::G711A,
            96 => Format::H264 { payload_type: 96 },
            _ => Format::Other {
                payload_type: pt,
                encoding: "unknown".to_string(),
                clock_rate: 90_000,
            },
        }
    }

    /// Whether a packet's presentation and decode timestamps coincide, i.e.
    /// whether RTP timestamp order already matches output order for this
    /// format. Every `Format` must answer this (no reordering/B-frame
    /// buffering lives in this core — a session/transport layer only
    /// forwards bytes, it never reorders them), so formats that could in
    /// principle carry out-of-order frames still report `true` here: a
    /// caller that needs real reordering owns a decoder that does it.
    pub fn pts_equals_dts(&self, _packet: &[u8]) -> bool {
        true
    }

    /// Parse an `a=rtpmap` value body, e.g. `"96 H264/90000"`.
    pub fn from_rtpmap(value: &str) -> Option<Self> {
        let mut parts = value.split_whitespace();
        let pt: u8 = parts.next()?.parse().ok()?;
        let encoding_clock = parts.next()?;
        let mut it = encoding_clock.splitn(2, '/');
        let encoding = it.next()?;
        let clock_rate: u32 = it.next().and_then(|s| s.parse().ok()).unwrap_or(90_000);
        Some(match encoding {
            "H264" => Format::H264 { payload_type: pt },
            "H265" => Format::H265 { payload_type: pt },
            "mpeg4-generic" => Format::Aac {
                payload_type: pt,
                clock_rate,
            },
            "PCMU" => Format::G711Mu,
            "PCMA" => Format::G711A,
            "opus" => Format::Opus { payload_type: pt },
            other => Format::Other {
                payload_type: pt,
                encoding: other.to_string(),
                clock_rate,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn h264_rtpmap() {
        let f = Format::H264 { payload_type: 96 };
        assert_eq!(f.rtpmap(), "96 H264/90000");
        assert_eq!(f.fmtp().as_deref(), Some("packetization-mode=1"));
    }

    #[test]
    fn static_payload_types_resolve_clock_rate() {
        assert_eq!(Format::G711Mu.clock_rate(), 8_000);
        assert_eq!(Format::Opus { payload_type: 111 }.clock_rate(), 48_000);
    }

    #[test]
    fn rtpmap_round_trip() {
        let f = Format::Aac {
            payload_type: 97,
            clock_rate: 44_100,
        };
        let parsed = Format::from_rtpmap(&f.rtpmap()).unwrap();
        assert_eq!(parsed, f);
    }

    #[test]
    fn pts_equals_dts_defaults_true() {
        let f = Format::H264 { payload_type: 96 };
        assert!(f.pts_equals_dts(&[]));
    }

    #[test]
    fn unknown_encoding_preserved() {
        let parsed = Format::from_rtpmap("98 VP8/90000").unwrap();
        match parsed {
            Format::Other { encoding, .. } => assert_eq!(encoding, "VP8"),
            _ => panic!("expected Other"),
        }
    }
}
