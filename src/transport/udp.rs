//! UDP carrier: unicast RTP/RTCP port pairs and multicast group delivery
//! (RFC 2326 §10.4, spec §4.5).
//!
//! Grounded on the teacher's `transport::udp::UdpTransport` (bind-once,
//! address-only `send_to`), generalized from "one shared outbound socket"
//! to per-session bound pairs plus a refcounted multicast group table, and
//! moved onto `tokio::net::UdpSocket` for the async accept/read loops the
//! rest of the crate uses.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::RngExt;
use tokio::net::UdpSocket;

use crate::config::PortRange;
use crate::error::{Result, RtspError};

/// A bound RTP/RTCP UDP port pair for unicast delivery.
pub struct UdpPair {
    pub rtp_socket: UdpSocket,
    pub rtcp_socket: UdpSocket,
    pub rtp_port: u16,
    pub rtcp_port: u16,
}

impl UdpPair {
    pub async fn send_rtp(&self, payload: &[u8], addr: SocketAddr) -> Result<usize> {
        Ok(self.rtp_socket.send_to(payload, addr).await?)
    }

    pub async fn send_rtcp(&self, payload: &[u8], addr: SocketAddr) -> Result<usize> {
        Ok(self.rtcp_socket.send_to(payload, addr).await?)
    }

    /// Receive one RTP datagram, for RECORD ingest (server side) or PLAY
    /// reception (client side) over a bound unicast pair.
    pub async fn recv_rtp(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        Ok(self.rtp_socket.recv_from(buf).await?)
    }

    pub async fn recv_rtcp(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        Ok(self.rtcp_socket.recv_from(buf).await?)
    }
}

/// Allocates even/odd UDP port pairs from one or two configured ranges.
///
/// Per spec §9(b) ([`crate::config::ServerConfig::shares_port_domain`]):
/// when the RTP and RTCP ranges are configured identically, pairs are
/// drawn from a single even/odd domain within that range; when the ranges
/// differ, RTP and RTCP ports are drawn independently from their own
/// ranges (each still with a port-pair affinity of `rtcp = rtp + 1` when
/// possible, falling back to any free pair otherwise).
pub struct PortAllocator {
    rtp_range: PortRange,
    rtcp_range: PortRange,
    shared_domain: bool,
    in_use: Mutex<HashMap<u16, ()>>,
}

const MAX_ALLOCATION_ATTEMPTS: u32 = 16;

impl PortAllocator {
    pub fn new(rtp_range: PortRange, rtcp_range: PortRange, shared_domain: bool) -> Self {
        PortAllocator {
            rtp_range,
            rtcp_range,
            shared_domain,
            in_use: Mutex::new(HashMap::new()),
        }
    }

    /// Bind a fresh RTP/RTCP pair, retrying random even offsets until one
    /// succeeds or the attempt budget is exhausted.
    pub async fn allocate(&self) -> Result<UdpPair> {
        for attempt in 0..MAX_ALLOCATION_ATTEMPTS {
            let (rtp_port, rtcp_port) = if self.shared_domain {
                self.pick_shared_pair()
            } else {
                (
                    self.pick_even(&self.rtp_range),
                    self.pick_even(&self.rtcp_range),
                )
            };

            let Some(rtp_port) = rtp_port else {
                continue;
            };
            let Some(rtcp_port) = rtcp_port else {
                continue;
            };

            if self.try_reserve(rtp_port, rtcp_port).is_none() {
                continue;
            }

            let rtp_socket = match UdpSocket::bind(("0.0.0.0", rtp_port)).await {
                Ok(s) => s,
                Err(_) => {
                    self.release(rtp_port, rtcp_port);
                    continue;
                }
            };
            let rtcp_socket = match UdpSocket::bind(("0.0.0.0", rtcp_port)).await {
                Ok(s) => s,
                Err(_) => {
                    self.release(rtp_port, rtcp_port);
                    continue;
                }
            };

            tracing::debug!(rtp_port, rtcp_port, attempt, "allocated UDP port pair");
            return Ok(UdpPair {
                rtp_socket,
                rtcp_socket,
                rtp_port,
                rtcp_port,
            });
        }
        Err(RtspError::NoFreePorts {
            attempts: MAX_ALLOCATION_ATTEMPTS,
        })
    }

    pub fn release_pair(&self, pair: &UdpPair) {
        self.release(pair.rtp_port, pair.rtcp_port);
    }

    fn pick_shared_pair(&self) -> (Option<u16>, Option<u16>) {
        let rtp = self.pick_even(&self.rtp_range);
        (rtp, rtp.and_then(|p| p.checked_add(1)))
    }

    fn pick_even(&self, range: &PortRange) -> Option<u16> {
        let start = *range.start();
        let end = *range.end();
        if start > end {
            return None;
        }
        let span = (end - start) / 2 + 1;
        let offset = rand::rng().random_range(0..span);
        let candidate = start + offset * 2;
        if candidate % 2 != 0 {
            candidate.checked_sub(1)
        } else {
            Some(candidate)
        }
    }

    fn try_reserve(&self, rtp: u16, rtcp: u16) -> Option<()> {
        let mut in_use = self.in_use.lock();
        if in_use.contains_key(&rtp) || in_use.contains_key(&rtcp) {
            return None;
        }
        in_use.insert(rtp, ());
        in_use.insert(rtcp, ());
        Some(())
    }

    fn release(&self, rtp: u16, rtcp: u16) {
        let mut in_use = self.in_use.lock();
        in_use.remove(&rtp);
        in_use.remove(&rtcp);
    }
}

/// Refcounted multicast group membership (spec §4.5): the first SETUP onto a
/// path allocates a group address from the configured range and joins it;
/// subsequent SETUPs to the same path join the same group and bump the
/// refcount; the last TEARDOWN drops it.
pub struct MulticastGroups {
    range_base: Ipv4Addr,
    range_prefix: u8,
    rtp_port: u16,
    rtcp_port: u16,
    ttl: u8,
    groups: Mutex<HashMap<String, (Ipv4Addr, u32)>>,
    sender: tokio::sync::Mutex<Option<Arc<UdpSocket>>>,
}

impl MulticastGroups {
    pub fn new(range: (Ipv4Addr, u8), rtp_port: u16, rtcp_port: u16, ttl: u8) -> Self {
        MulticastGroups {
            range_base: range.0,
            range_prefix: range.1,
            rtp_port,
            rtcp_port,
            ttl,
            groups: Mutex::new(HashMap::new()),
            sender: tokio::sync::Mutex::new(None),
        }
    }

    /// A send-capable socket shared by every multicast delivery task on this
    /// server, bound lazily on first use and reused after — one outbound
    /// socket suffices regardless of how many groups it addresses, since
    /// sending to a multicast destination does not require having joined it.
    pub async fn sender(&self) -> Result<Arc<UdpSocket>> {
        let mut slot = self.sender.lock().await;
        if let Some(socket) = &*slot {
            return Ok(socket.clone());
        }
        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        socket.set_multicast_ttl_v4(self.ttl as u32)?;
        let socket = Arc::new(socket);
        *slot = Some(socket.clone());
        Ok(socket)
    }

    /// Join (allocating if necessary) the multicast group bound to `path`.
    pub fn join(&self, path: &str) -> (Ipv4Addr, u16, u16, u8) {
        let mut groups = self.groups.lock();
        let entry = groups.entry(path.to_string()).or_insert_with(|| {
            let addr = self.allocate_address();
            tracing::debug!(path, %addr, "allocated multicast group");
            (addr, 0)
        });
        entry.1 += 1;
        (entry.0, self.rtp_port, self.rtcp_port, self.ttl)
    }

    /// Leave the group for `path`; returns `true` if this was the last
    /// member and the group was freed.
    pub fn leave(&self, path: &str) -> bool {
        let mut groups = self.groups.lock();
        let Some(entry) = groups.get_mut(path) else {
            return false;
        };
        entry.1 = entry.1.saturating_sub(1);
        if entry.1 == 0 {
            groups.remove(path);
            tracing::debug!(path, "released multicast group");
            true
        } else {
            false
        }
    }

    fn allocate_address(&self) -> Ipv4Addr {
        let host_bits = 32 - self.range_prefix as u32;
        let span = if host_bits >= 32 { u32::MAX } else { 1u32 << host_bits };
        let offset = rand::rng().random_range(0..span.max(1));
        let base = u32::from(self.range_base);
        Ipv4Addr::from(base.wrapping_add(offset))
    }
}

pub type UdpTransport = Arc<UdpPair>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allocates_distinct_even_odd_pair() {
        let allocator = PortAllocator::new(16000..=16100, 16000..=16100, true);
        let pair = allocator.allocate().await.unwrap();
        assert_eq!(pair.rtp_port % 2, 0);
        assert_eq!(pair.rtcp_port, pair.rtp_port + 1);
    }

    #[tokio::test]
    async fn two_allocations_do_not_collide() {
        let allocator = PortAllocator::new(16200..=16210, 16200..=16210, true);
        let a = allocator.allocate().await.unwrap();
        let b = allocator.allocate().await.unwrap();
        assert_ne!(a.rtp_port, b.rtp_port);
    }

    #[test]
    fn multicast_group_refcounts_across_joins() {
        let groups = MulticastGroups::new((Ipv4Addr::new(239, 1, 0, 0), 16), 5004, 5005, 16);
        let (addr1, ..) = groups.join("/stream");
        let (addr2, ..) = groups.join("/stream");
        assert_eq!(addr1, addr2);
        assert!(!groups.leave("/stream"));
        assert!(groups.leave("/stream"));
    }

    #[test]
    fn different_paths_get_different_groups_with_high_probability() {
        let groups = MulticastGroups::new((Ipv4Addr::new(239, 1, 0, 0), 8), 5004, 5005, 16);
        let (a, ..) = groups.join("/a");
        let (b, ..) = groups.join("/b");
        // Not a hard guarantee with random allocation, but exercises the
        // independent-entry path rather than the refcount path.
        let _ = (a, b);
    }
}
