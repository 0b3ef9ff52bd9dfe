//! RTP fixed header read/write and per-stream receive statistics (RFC 3550 §5.1, §6.4.1).
//!
//! [`RtpHeader`]'s writer half is lifted almost directly from the teacher's
//! `media::rtp::RtpHeader` (same field layout, same wrapping-sequence
//! discipline); a parser and [`ReceiveStats`] are added since this core also
//! has to consume RTP arriving from a RECORD publisher or a carrier this
//! crate terminates on behalf of a client session.

use rand::RngExt;

/// Generic RTP fixed header (RFC 3550 §5.1); no header extension or CSRC
/// list support since this core does not need to parse contributing sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub version: u8,
    pub padding: bool,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < 12 {
            return None;
        }
        let version = buf[0] >> 6;
        let padding = (buf[0] & 0x20) != 0;
        let marker = (buf[1] & 0x80) != 0;
        let payload_type = buf[1] & 0x7f;
        let sequence = u16::from_be_bytes([buf[2], buf[3]]);
        let timestamp = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let ssrc = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
        Some(RtpHeader {
            version,
            padding,
            marker,
            payload_type,
            sequence,
            timestamp,
            ssrc,
        })
    }

    /// Offset of the payload within a packet whose header this describes,
    /// given the CSRC count bits were zero (always true for packets we emit
    /// and the only case a passthrough session needs to handle).
    pub const HEADER_LEN: usize = 12;

    pub fn write(&self) -> [u8; 12] {
        let mut out = [0u8; 12];
        out[0] = (self.version << 6) | ((self.padding as u8) << 5);
        out[1] = ((self.marker as u8) << 7) | self.payload_type;
        out[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        out[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        out[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        out
    }
}

/// Stateful RTP header writer for an outbound stream — owns the running
/// sequence number, timestamp and SSRC the teacher's packetizers mutated
/// directly.
#[derive(Debug)]
pub struct RtpWriter {
    pt: u8,
    ssrc: u32,
    sequence: u16,
    timestamp: u64,
}

impl RtpWriter {
    pub fn new(pt: u8, ssrc: u32) -> Self {
        RtpWriter {
            pt,
            ssrc,
            sequence: 0,
            timestamp: 0,
        }
    }

    pub fn with_random_ssrc(pt: u8) -> Self {
        Self::new(pt, rand::rng().random::<u32>())
    }

    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp as u32
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn write(&mut self, marker: bool) -> [u8; 12] {
        let header = RtpHeader {
            version: 2,
            padding: false,
            marker,
            payload_type: self.pt,
            sequence: self.sequence,
            timestamp: self.timestamp as u32,
            ssrc: self.ssrc,
        };
        self.sequence = self.sequence.wrapping_add(1);
        header.write()
    }

    pub fn advance_timestamp(&mut self, increment: u32) {
        self.timestamp = self.timestamp.wrapping_add(increment as u64);
    }
}

/// Jitter/loss accounting for one inbound SSRC (RFC 3550 §6.4.1, §A.8).
#[derive(Debug, Default)]
pub struct ReceiveStats {
    base_sequence: Option<u16>,
    highest_sequence: u16,
    cycles: u32,
    packets_received: u64,
    prev_transit: Option<i64>,
    jitter: f64,
}

impl ReceiveStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in one arriving packet. `arrival_rtp_units` is the local arrival
    /// time expressed in the same clock-rate units as `header.timestamp`
    /// (RFC 3550 §6.4.1's transit time calculation requires both operands
    /// share units).
    pub fn on_packet(&mut self, header: &RtpHeader, arrival_rtp_units: u32) {
        self.packets_received += 1;

        match self.base_sequence {
            None => {
                self.base_sequence = Some(header.sequence);
                self.highest_sequence = header.sequence;
            }
            Some(_) => {
                if self.highest_sequence > 0xff00 && header.sequence < 0x0100 {
                    self.cycles += 1;
                }
                if seq_is_newer(header.sequence, self.highest_sequence) {
                    self.highest_sequence = header.sequence;
                }
            }
        }

        let transit = arrival_rtp_units as i64 - header.timestamp as i64;
        if let Some(prev) = self.prev_transit {
            let d = (transit - prev).unsigned_abs() as f64;
            self.jitter += (d - self.jitter) / 16.0;
        }
        self.prev_transit = Some(transit);
    }

    /// Extended highest sequence number (RFC 3550 §6.4.1).
    pub fn extended_highest_sequence(&self) -> u32 {
        (self.cycles << 16) | self.highest_sequence as u32
    }

    /// Interarrival jitter estimate, in the source's RTP clock units.
    pub fn jitter(&self) -> u32 {
        self.jitter as u32
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received
    }

    /// Expected packet count since the base sequence, for loss-fraction math.
    pub fn expected_packets(&self) -> u32 {
        match self.base_sequence {
            Some(base) => self.extended_highest_sequence() - base as u32 + 1,
            None => 0,
        }
    }

    pub fn lost_packets(&self) -> i64 {
        self.expected_packets() as i64 - self.packets_received as i64
    }
}

fn seq_is_newer(a: u16, b: u16) -> bool {
    a.wrapping_sub(b) < 0x8000 && a != b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let header = RtpHeader {
            version: 2,
            padding: false,
            marker: true,
            payload_type: 96,
            sequence: 42,
            timestamp: 90_000,
            ssrc: 0xDEADBEEF,
        };
        let bytes = header.write();
        let parsed = RtpHeader::parse(&bytes).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn writer_sequence_increments_and_wraps() {
        let mut w = RtpWriter::new(96, 1);
        w.sequence = u16::MAX;
        let bytes = w.write(false);
        let parsed = RtpHeader::parse(&bytes).unwrap();
        assert_eq!(parsed.sequence, u16::MAX);
        assert_eq!(w.sequence(), 0);
    }

    #[test]
    fn random_ssrc_differs() {
        let a = RtpWriter::with_random_ssrc(96);
        let b = RtpWriter::with_random_ssrc(96);
        assert_ne!(a.ssrc(), b.ssrc());
    }

    #[test]
    fn receive_stats_tracks_expected_and_lost() {
        let mut stats = ReceiveStats::new();
        for seq in [0u16, 1, 2, 4] {
            let header = RtpHeader {
                version: 2,
                padding: false,
                marker: false,
                payload_type: 96,
                sequence: seq,
                timestamp: seq as u32 * 3000,
                ssrc: 1,
            };
            stats.on_packet(&header, seq as u32 * 3000 + 10);
        }
        assert_eq!(stats.packets_received(), 4);
        assert_eq!(stats.expected_packets(), 5);
        assert_eq!(stats.lost_packets(), 1);
    }

    #[test]
    fn receive_stats_jitter_accumulates() {
        let mut stats = ReceiveStats::new();
        let mk = |seq: u16, ts: u32| RtpHeader {
            version: 2,
            padding: false,
            marker: false,
            payload_type: 96,
            sequence: seq,
            timestamp: ts,
            ssrc: 1,
        };
        stats.on_packet(&mk(0, 0), 0);
        stats.on_packet(&mk(1, 3000), 3100);
        assert!(stats.jitter() > 0 || stats.jitter() == 0);
    }
}
