//! Library-wide configuration (RFC 2326 §6 transport knobs plus operational
//! timeouts not carried on the wire).
//!
//! [`ServerConfig`] is carried by the protocol handlers the way the teacher
//! crate's `ServerConfig` is; it has grown the full set of knobs from the
//! spec's external-interface section rather than just the SDP origin fields.

use std::ops::RangeInclusive;
use std::time::Duration;

use crate::auth::Credentials;

/// A `first..=last` UDP port window used for RTP/RTCP allocation.
pub type PortRange = RangeInclusive<u16>;

/// TLS credentials for `rtsps://`. Handshake itself is a collaborator
/// outside this core's scope (spec §1); this type only carries the
/// configuration through to the transport layer.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    pub cert_pem_path: String,
    pub key_pem_path: String,
}

/// Apple QuickTime-style RTP-over-HTTP tunnel configuration (spec §6, §9(c)).
///
/// The exact chunked-encoding framing is an explicit Open Question in the
/// spec; this struct models the knobs an implementer would need to wire up
/// the tunnel, but [`crate::transport::TransportEngine`] does not yet
/// dial through it.
#[derive(Debug, Clone)]
pub struct HttpTunnelConfig {
    /// Path used for the long-poll GET carrying server→client bytes.
    pub get_path: String,
    /// Path used for the long-poll POST carrying client→server bytes.
    pub post_path: String,
    /// Shared `x-sessioncookie` value correlating the GET/POST pair.
    pub session_cookie: String,
}

/// Server-level configuration consulted by the protocol handlers.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Public host advertised in SDP `o=`/`c=` lines. When `None`, the host
    /// is inferred from the request URI or the client's socket address.
    pub public_host: Option<String>,
    /// Public RTSP port for URL-based headers (RTP-Info, Content-Base).
    pub public_port: Option<u16>,
    /// SDP origin username field (`o=<username> ...`).
    pub sdp_username: String,
    /// SDP origin session id field (`o=... <session-id> ...`).
    pub sdp_session_id: String,
    /// SDP origin session version field (`o=... ... <session-version> ...`).
    pub sdp_session_version: String,
    /// SDP session name (`s=`).
    pub sdp_session_name: String,

    /// Socket read timeout applied to every control-connection read.
    pub read_timeout: Duration,
    /// Socket write timeout applied to every control-connection write.
    pub write_timeout: Duration,
    /// Default session idle timeout (RFC 2326 §12.37); overridden by a
    /// client-supplied `Session: ...;timeout=N`.
    pub session_timeout: Duration,
    /// How long a UDP reader may go without an RTP packet after PLAY
    /// before the watchdog fires (client-side) / the session is reaped
    /// (server-side silence accounting).
    pub udp_read_timeout: Duration,

    /// Port window used to allocate server-side RTP ports (unicast UDP).
    pub udp_rtp_port_range: PortRange,
    /// Port window used to allocate server-side RTCP ports (unicast UDP).
    ///
    /// Per spec §9(b): when this equals [`udp_rtp_port_range`], RTP/RTCP
    /// are allocated as one contiguous even/odd pair from that range; when
    /// it differs, RTP and RTCP are allocated independently from their own
    /// ranges.
    pub udp_rtcp_port_range: PortRange,
    /// Multicast group address pool, e.g. `224.1.0.0/16`.
    pub multicast_ip_range: (std::net::Ipv4Addr, u8),
    /// Shared multicast RTP port.
    pub multicast_rtp_port: u16,
    /// Shared multicast RTCP port.
    pub multicast_rtcp_port: u16,
    /// Default multicast TTL when a client does not request one.
    pub multicast_ttl: u8,

    /// Per-reader bounded outbound queue depth before `WriteQueueFull`.
    pub write_queue_size: usize,

    /// Whether the client should request back-channel (ONVIF two-way
    /// audio) setup for `sendonly` medias it discovers via DESCRIBE.
    pub request_back_channels: bool,

    /// Optional TLS configuration for `rtsps://`.
    pub tls_config: Option<TlsConfig>,
    /// Optional RTP-over-HTTP tunnel configuration.
    pub http_tunnel: Option<HttpTunnelConfig>,

    /// Consecutive UDP-silence cycles before the client falls back to
    /// TCP-interleaved transport (spec §4.5).
    pub udp_fallback_threshold: u32,

    /// Digest realm advertised in `WWW-Authenticate` challenges. `None`
    /// disables server-side auth entirely (the default — an embedder opts
    /// in by setting this and [`required_credentials`](Self::required_credentials)).
    pub auth_realm: Option<String>,
    /// The single credential pair the server will accept. Real deployments
    /// with more than one user are expected to verify externally and only
    /// use this core's auth path for the single-camera/single-viewer case.
    pub required_credentials: Option<Credentials>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            public_host: None,
            public_port: None,
            sdp_username: "-".to_string(),
            sdp_session_id: "0".to_string(),
            sdp_session_version: "0".to_string(),
            sdp_session_name: "Stream".to_string(),

            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            session_timeout: Duration::from_secs(60),
            udp_read_timeout: Duration::from_secs(10),

            udp_rtp_port_range: 6000..=6999,
            udp_rtcp_port_range: 6000..=6999,
            multicast_ip_range: (std::net::Ipv4Addr::new(224, 1, 0, 0), 16),
            multicast_rtp_port: 5004,
            multicast_rtcp_port: 5005,
            multicast_ttl: 16,

            write_queue_size: 512,
            request_back_channels: false,

            tls_config: None,
            http_tunnel: None,

            udp_fallback_threshold: 2,

            auth_realm: None,
            required_credentials: None,
        }
    }
}

impl ServerConfig {
    /// Whether the two configured unicast ranges should be treated as a
    /// single contiguous even/odd allocation domain (spec §9(b)).
    pub fn shares_port_domain(&self) -> bool {
        self.udp_rtp_port_range == self.udp_rtcp_port_range
    }
}
