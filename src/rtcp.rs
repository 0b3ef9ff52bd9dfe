//! RTCP Sender/Receiver Report composition and scheduling (RFC 3550 §6.3, §6.4).
//!
//! The teacher crate never spoke RTCP at all; this module is grounded on
//! the wire layout used by the `webrtc-rs` family of crates in the
//! reference pack, hand-rolled rather than pulled in as a dependency since
//! only SR/RR construction is needed, not the full compound-packet zoo.

use rand::RngExt;
use std::time::Duration;

const RTP_VERSION: u8 = 2;
const SR_PT: u8 = 200;
const RR_PT: u8 = 201;

/// One reception report block (RFC 3550 §6.4.1).
#[derive(Debug, Clone, Copy)]
pub struct ReportBlock {
    pub ssrc: u32,
    pub fraction_lost: u8,
    pub cumulative_lost: i32,
    pub extended_highest_sequence: u32,
    pub jitter: u32,
    pub last_sr: u32,
    pub delay_since_last_sr: u32,
}

impl ReportBlock {
    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.ssrc.to_be_bytes());
        let cumulative = (self.cumulative_lost.clamp(-0x80_0000, 0x7f_ffff) as u32) & 0x00ff_ffff;
        out.push(self.fraction_lost);
        out.extend_from_slice(&cumulative.to_be_bytes()[1..]);
        out.extend_from_slice(&self.extended_highest_sequence.to_be_bytes());
        out.extend_from_slice(&self.jitter.to_be_bytes());
        out.extend_from_slice(&self.last_sr.to_be_bytes());
        out.extend_from_slice(&self.delay_since_last_sr.to_be_bytes());
    }
}

/// Sender Report (RFC 3550 §6.4.1).
#[derive(Debug, Clone)]
pub struct SenderReport {
    pub ssrc: u32,
    pub ntp_seconds: u32,
    pub ntp_fraction: u32,
    pub rtp_timestamp: u32,
    pub packet_count: u32,
    pub octet_count: u32,
    pub reports: Vec<ReportBlock>,
}

/// Receiver Report (RFC 3550 §6.4.2) — sent instead of an SR by a party
/// that is not also a media sender.
#[derive(Debug, Clone)]
pub struct ReceiverReport {
    pub ssrc: u32,
    pub reports: Vec<ReportBlock>,
}

fn header_byte(count: u8) -> u8 {
    (RTP_VERSION << 6) | (count & 0x1f)
}

impl SenderReport {
    pub fn write(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(28 + self.reports.len() * 24);
        out.push(header_byte(self.reports.len() as u8));
        out.push(SR_PT);
        let words = (6 + self.reports.len() * 6) as u16;
        out.extend_from_slice(&words.to_be_bytes());
        out.extend_from_slice(&self.ssrc.to_be_bytes());
        out.extend_from_slice(&self.ntp_seconds.to_be_bytes());
        out.extend_from_slice(&self.ntp_fraction.to_be_bytes());
        out.extend_from_slice(&self.rtp_timestamp.to_be_bytes());
        out.extend_from_slice(&self.packet_count.to_be_bytes());
        out.extend_from_slice(&self.octet_count.to_be_bytes());
        for block in &self.reports {
            block.write(&mut out);
        }
        out
    }
}

impl ReceiverReport {
    pub fn write(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.reports.len() * 24);
        out.push(header_byte(self.reports.len() as u8));
        out.push(RR_PT);
        let words = (1 + self.reports.len() * 6) as u16;
        out.extend_from_slice(&words.to_be_bytes());
        out.extend_from_slice(&self.ssrc.to_be_bytes());
        for block in &self.reports {
            block.write(&mut out);
        }
        out
    }
}

/// Splits a byte budget-bound compound packet (spec §4.6 caps RTCP sends at
/// a single UDP datagram) between one SR/RR and any extra packets that
/// didn't fit; callers send the first compound and drop or defer the rest.
pub fn split_compound(max_len: usize, packets: Vec<Vec<u8>>) -> (Vec<u8>, Vec<Vec<u8>>) {
    let mut compound = Vec::new();
    let mut remaining = Vec::new();
    for packet in packets {
        if compound.len() + packet.len() <= max_len {
            compound.extend_from_slice(&packet);
        } else {
            remaining.push(packet);
        }
    }
    (compound, remaining)
}

/// Scheduling state for periodic SR/RR emission (spec §9(a)): nominal
/// interval 5s, randomized ±20% to avoid report-storm synchronization
/// across many sessions on the same server, per RFC 3550 §6.2's
/// anti-synchronization rationale.
pub struct ReportScheduler {
    base_interval: Duration,
}

impl ReportScheduler {
    pub fn new(base_interval: Duration) -> Self {
        ReportScheduler { base_interval }
    }

    pub fn default_interval() -> Self {
        Self::new(Duration::from_secs(5))
    }

    /// Draw the next randomized interval.
    pub fn next_interval(&self) -> Duration {
        let jitter = rand::rng().random_range(-0.2..=0.2);
        let secs = self.base_interval.as_secs_f64() * (1.0 + jitter);
        Duration::from_secs_f64(secs.max(0.1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block() -> ReportBlock {
        ReportBlock {
            ssrc: 0x1234,
            fraction_lost: 0,
            cumulative_lost: 3,
            extended_highest_sequence: 100,
            jitter: 20,
            last_sr: 0,
            delay_since_last_sr: 0,
        }
    }

    #[test]
    fn sender_report_length_matches_words_field() {
        let sr = SenderReport {
            ssrc: 1,
            ntp_seconds: 0,
            ntp_fraction: 0,
            rtp_timestamp: 0,
            packet_count: 10,
            octet_count: 1000,
            reports: vec![block()],
        };
        let bytes = sr.write();
        assert_eq!(bytes[1], 200);
        let words = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
        assert_eq!((words + 1) * 4, bytes.len());
    }

    #[test]
    fn receiver_report_has_correct_count() {
        let rr = ReceiverReport {
            ssrc: 2,
            reports: vec![block(), block()],
        };
        let bytes = rr.write();
        assert_eq!(bytes[0] & 0x1f, 2);
        assert_eq!(bytes[1], 201);
    }

    #[test]
    fn split_compound_respects_budget() {
        let packets = vec![vec![0u8; 100], vec![0u8; 100], vec![0u8; 100]];
        let (compound, rest) = split_compound(150, packets);
        assert_eq!(compound.len(), 100);
        assert_eq!(rest.len(), 2);
    }

    #[test]
    fn scheduler_jitters_around_base() {
        let sched = ReportScheduler::new(Duration::from_secs(5));
        for _ in 0..20 {
            let interval = sched.next_interval();
            assert!(interval.as_secs_f64() >= 3.9 && interval.as_secs_f64() <= 6.1);
        }
    }
}
