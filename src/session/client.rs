//! Client-side session state machine (RFC 2326 §3, spec §4.7).
//!
//! The teacher crate was server-only and had no client path at all. This
//! is grounded on `binbat-live777`'s client session (digest-retry-on-401
//! loop, TCP-interleaved SETUP request shape) and `scottlamb`'s
//! `Framed<TcpStream, Codec>` connection handling, rewritten against this
//! crate's own [`TcpCarrier`]/[`RtspRequest`]/[`RtspResponse`] types
//! instead of their `rtsp-types`/`digest_auth` dependencies.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use rand::RngExt;
use tokio::net::UdpSocket;

use crate::auth::{self, Challenge, Credentials};
use crate::error::{Result, RtspError};
use crate::protocol::{Frame, Method, RtspRequest, RtspResponse, StatusCode, Transport};
use crate::sdp::SessionDescription;
use crate::transport::TcpCarrier;
use crate::url::RtspUrl;

const MAX_REDIRECTS: u32 = 5;

/// Default watchdog window for client-side UDP liveness (spec §4.10): if no
/// RTP packet arrives within this long after PLAY, the session is declared
/// silent so the caller can fall back to TCP-interleaved.
const DEFAULT_UDP_SILENCE_TIMEOUT: Duration = Duration::from_secs(10);

/// A client-bound RTP/RTCP UDP receive pair (spec §4.5 unicast PLAY/RECORD).
/// Bound before SETUP is sent so the local port numbers are known and can be
/// carried in the `client_port` transport parameter.
pub struct ClientMediaSocket {
    rtp_socket: UdpSocket,
    rtcp_socket: UdpSocket,
    silence_timeout: Duration,
}

impl ClientMediaSocket {
    /// Bind a fresh RTP/RTCP port pair on ephemeral ports. Unlike the
    /// server's [`crate::transport::udp::PortAllocator`], a client has no
    /// even/odd affinity requirement to satisfy — it just needs two distinct
    /// local ports to hand the server in `client_port`.
    pub async fn bind() -> Result<Self> {
        let rtp_socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        let rtcp_socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        Ok(ClientMediaSocket {
            rtp_socket,
            rtcp_socket,
            silence_timeout: DEFAULT_UDP_SILENCE_TIMEOUT,
        })
    }

    pub fn with_silence_timeout(mut self, timeout: Duration) -> Self {
        self.silence_timeout = timeout;
        self
    }

    pub fn client_ports(&self) -> Result<(u16, u16)> {
        Ok((
            self.rtp_socket.local_addr()?.port(),
            self.rtcp_socket.local_addr()?.port(),
        ))
    }

    /// Receive one RTP datagram, failing with [`RtspError::UdpSilence`] if
    /// none arrives within the watchdog window (spec §4.10).
    pub async fn recv_rtp_timeout(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        match tokio::time::timeout(self.silence_timeout, self.rtp_socket.recv_from(buf)).await {
            Ok(received) => Ok(received?),
            Err(_) => Err(RtspError::UdpSilence(format!(
                "no RTP packet within {:?}",
                self.silence_timeout
            ))),
        }
    }

    pub async fn recv_rtcp(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        Ok(self.rtcp_socket.recv_from(buf).await?)
    }

    pub async fn send_rtp(&self, payload: &[u8], dest: SocketAddr) -> Result<usize> {
        Ok(self.rtp_socket.send_to(payload, dest).await?)
    }

    pub async fn send_rtcp(&self, payload: &[u8], dest: SocketAddr) -> Result<usize> {
        Ok(self.rtcp_socket.send_to(payload, dest).await?)
    }
}

/// Client-side session lifecycle (mirrors the server states the session
/// is driving it through).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientSessionState {
    Initial,
    Described,
    SetUp,
    Playing,
    Paused,
    Recording,
    TornDown,
}

/// Drives one RTSP session as a client: issues requests over a
/// [`TcpCarrier`], tracks `CSeq`/`Session`, retries once on a Digest
/// challenge, and follows redirects up to [`MAX_REDIRECTS`] hops.
pub struct ClientSession {
    carrier: TcpCarrier,
    url: RtspUrl,
    cseq: AtomicU32,
    session_id: Option<String>,
    credentials: Option<Credentials>,
    challenge: Option<Challenge>,
    state: ClientSessionState,
    /// Bound once [`setup_udp`](Self::setup_udp) negotiates UDP unicast
    /// transport; `None` for TCP-interleaved sessions, which read packets
    /// straight off `carrier` instead.
    media_socket: Option<ClientMediaSocket>,
    /// Server's unicast RTP/RTCP endpoint, learned from the SETUP response's
    /// `server_port`, so `send_rtp`/`send_rtcp` (RECORD) know where to send.
    server_addr: Option<SocketAddr>,
}

impl ClientSession {
    pub async fn connect(url: RtspUrl, credentials: Option<Credentials>) -> Result<Self> {
        let addr = format!("{}:{}", url.host, url.port);
        let stream = tokio::net::TcpStream::connect(&addr).await?;
        let peer_addr = stream.peer_addr()?;
        Ok(ClientSession {
            carrier: TcpCarrier::new(stream, peer_addr),
            url,
            cseq: AtomicU32::new(1),
            session_id: None,
            credentials,
            challenge: None,
            state: ClientSessionState::Initial,
            media_socket: None,
            server_addr: None,
        })
    }

    pub fn state(&self) -> ClientSessionState {
        self.state
    }

    fn next_cseq(&self) -> u32 {
        self.cseq.fetch_add(1, Ordering::SeqCst)
    }

    /// Send one request, transparently retrying once against a fresh
    /// Digest/Basic challenge on 401, and following a 302 redirect by
    /// reconnecting to the new host (spec §4.7).
    async fn roundtrip(&mut self, mut request: RtspRequest) -> Result<RtspResponse> {
        let mut redirects = 0;
        loop {
            let cseq = self.next_cseq();
            request.headers.set("CSeq", cseq.to_string());
            if let Some(session_id) = &self.session_id {
                request.headers.set("Session", session_id.clone());
            }
            if let (Some(challenge), Some(creds)) = (&self.challenge, &self.credentials) {
                let cnonce = format!("{:08x}", rand::rng().random::<u32>());
                let header = auth::authorize(
                    challenge,
                    creds,
                    request.method.as_str(),
                    &request.uri,
                    1,
                    &cnonce,
                );
                request.headers.set("Authorization", header);
            }

            self.carrier.send_message(
                String::from_utf8(request.serialize()).map_err(|_| RtspError::Parse {
                    kind: crate::error::ParseErrorKind::InvalidHeader,
                })?,
            )
            .await?;

            let frame = self
                .carrier
                .recv()
                .await
                .ok_or(RtspError::Cancelled("connection closed"))??;
            let text = match frame {
                Frame::Message(text) => text,
                Frame::Interleaved { .. } => {
                    return Err(RtspError::Cancelled("unexpected interleaved frame during handshake"));
                }
            };
            let response = RtspResponse::parse(&text)?;

            if response.status == StatusCode::UNAUTHORIZED && self.challenge.is_none() {
                let challenge = response
                    .headers
                    .get_all("WWW-Authenticate")
                    .find_map(Challenge::parse)
                    .ok_or(RtspError::AuthRequired)?;
                self.challenge = Some(challenge);
                continue;
            }

            if response.status.is_redirect() {
                redirects += 1;
                if redirects > MAX_REDIRECTS {
                    return Err(RtspError::TooManyRedirects(MAX_REDIRECTS));
                }
                if let Some(location) = response.get_header("Location") {
                    let new_url = RtspUrl::parse(location)?;
                    *self = ClientSession::connect(new_url, self.credentials.clone()).await?;
                    continue;
                }
            }

            return Ok(response);
        }
    }

    pub async fn describe(&mut self) -> Result<RtspResponse> {
        let request = RtspRequest::new(Method::Describe, self.url.format())
            .with_accept_sdp();
        let response = self.roundtrip(request).await?;
        if response.status.is_success() {
            self.state = ClientSessionState::Described;
        }
        Ok(response)
    }

    pub async fn setup(&mut self, media_url: &RtspUrl, transport_header: String) -> Result<RtspResponse> {
        let mut request = RtspRequest::new(Method::Setup, media_url.format());
        request.headers.set("Transport", transport_header);
        let response = self.roundtrip(request).await?;
        if response.status.is_success() {
            if let Some((id, timeout)) = response.headers.session() {
                self.session_id = Some(id);
                let _ = timeout;
            }
            self.state = ClientSessionState::SetUp;
        }
        Ok(response)
    }

    /// SETUP for UDP unicast delivery/ingest: binds a local RTP/RTCP pair,
    /// sends the `client_port` the server is asked to target, and records
    /// the server's `server_port` from the response so later
    /// [`send_rtp`](Self::send_rtp)/[`recv_packet`](Self::recv_packet) calls
    /// know the peer address (spec §4.5 unicast, §4.10 liveness).
    pub async fn setup_udp(&mut self, media_url: &RtspUrl) -> Result<RtspResponse> {
        let socket = ClientMediaSocket::bind().await?;
        let client_ports = socket.client_ports()?;
        let transport = Transport::udp_unicast(client_ports).format();
        let response = self.setup(media_url, transport).await?;
        if response.status.is_success() {
            if let Some(server_port) = response
                .get_header("Transport")
                .and_then(Transport::parse)
                .and_then(|t| t.server_port)
            {
                let host = self.url.host.clone();
                self.server_addr =
                    format!("{}:{}", host, server_port.0).parse::<SocketAddr>().ok();
            }
            self.media_socket = Some(socket);
        }
        Ok(response)
    }

    /// Receive one RTP packet over the negotiated UDP pair, applying the
    /// UDP-silence watchdog (spec §4.10): a caller that sees
    /// [`RtspError::UdpSilence`] should fall back to TCP-interleaved
    /// transport per [`crate::config::ServerConfig::udp_fallback_threshold`].
    pub async fn recv_packet(&mut self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        let socket = self
            .media_socket
            .as_ref()
            .ok_or_else(|| RtspError::TransportNotConfigured("no UDP media socket bound".to_string()))?;
        socket.recv_rtp_timeout(buf).await
    }

    /// Send one RTP packet to the server over the negotiated UDP pair
    /// (RECORD ingest driven by this client).
    pub async fn send_rtp(&mut self, payload: &[u8]) -> Result<usize> {
        let socket = self
            .media_socket
            .as_ref()
            .ok_or_else(|| RtspError::TransportNotConfigured("no UDP media socket bound".to_string()))?;
        let dest = self
            .server_addr
            .ok_or_else(|| RtspError::TransportNotConfigured("server RTP port unknown".to_string()))?;
        socket.send_rtp(payload, dest).await
    }

    /// Publish an SDP description to the server (RECORD direction, spec
    /// §4.7/§10.3) before SETUP.
    pub async fn announce(&mut self, description: &SessionDescription) -> Result<RtspResponse> {
        let mut request = RtspRequest::new(Method::Announce, self.url.format());
        request.headers.set("Content-Type", "application/sdp");
        request.body = description.marshal().into_bytes();
        let response = self.roundtrip(request).await?;
        if response.status.is_success() {
            self.state = ClientSessionState::Described;
        }
        Ok(response)
    }

    /// Start media ingest after SETUP has negotiated a RECORD-direction
    /// transport (spec §10.11).
    pub async fn record(&mut self) -> Result<RtspResponse> {
        let request = RtspRequest::new(Method::Record, self.url.format());
        let response = self.roundtrip(request).await?;
        if response.status.is_success() {
            self.state = ClientSessionState::Recording;
        }
        Ok(response)
    }

    pub async fn play(&mut self) -> Result<RtspResponse> {
        let request = RtspRequest::new(Method::Play, self.url.format());
        let response = self.roundtrip(request).await?;
        if response.status.is_success() {
            self.state = ClientSessionState::Playing;
        }
        Ok(response)
    }

    pub async fn pause(&mut self) -> Result<RtspResponse> {
        let request = RtspRequest::new(Method::Pause, self.url.format());
        let response = self.roundtrip(request).await?;
        if response.status.is_success() {
            self.state = ClientSessionState::Paused;
        }
        Ok(response)
    }

    pub async fn teardown(&mut self) -> Result<RtspResponse> {
        let request = RtspRequest::new(Method::Teardown, self.url.format());
        let response = self.roundtrip(request).await?;
        self.state = ClientSessionState::TornDown;
        Ok(response)
    }

    /// Keepalive (spec §4.9): issue GET_PARAMETER with no body on an
    /// interval shorter than the negotiated session timeout.
    pub async fn keepalive(&mut self) -> Result<RtspResponse> {
        let request = RtspRequest::new(Method::GetParameter, self.url.format());
        self.roundtrip(request).await
    }
}

trait RequestExt {
    fn with_accept_sdp(self) -> Self;
}

impl RequestExt for RtspRequest {
    fn with_accept_sdp(mut self) -> Self {
        self.headers.set("Accept", "application/sdp");
        self
    }
}

/// How often a client should send a keepalive relative to the server's
/// advertised session timeout (spec §4.9: well under half, so one dropped
/// keepalive doesn't risk expiry).
pub fn keepalive_interval(session_timeout: Duration) -> Duration {
    session_timeout / 3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keepalive_interval_is_a_third_of_timeout() {
        assert_eq!(
            keepalive_interval(Duration::from_secs(60)),
            Duration::from_secs(20)
        );
    }
}
