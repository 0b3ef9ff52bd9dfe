//! Network transport carriers for RTSP signaling and RTP/RTCP media
//! (spec §4.5): UDP unicast, UDP multicast, and TCP-interleaved.
//!
//! - **TCP** ([`tcp`]): the RTSP control connection; also optionally
//!   carries interleaved media via `$`-framing.
//! - **UDP** ([`udp`]): unicast RTP/RTCP port pairs allocated per session,
//!   plus refcounted multicast group membership.

pub mod tcp;
pub mod udp;

pub use tcp::{TcpCarrier, TcpCarrierReader, TcpCarrierWriter};
pub use udp::{MulticastGroups, PortAllocator, UdpPair};
