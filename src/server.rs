//! High-level RTSP server orchestrator (spec §4.8–§4.11).
//!
//! Generalizes the teacher's `Server` (one bound UDP socket, one shared
//! packetizer, a single blocking accept-loop thread) into a `tokio`
//! orchestrator: the accept loop and every connection are cooperative
//! tasks, transport is negotiated per session across all three carriers,
//! and media fan-out goes through [`crate::stream::StreamRegistry`]
//! instead of a single broadcast-capable UDP socket. Embedder callbacks go
//! through a [`ServerHandler`] instead of the registry being wired in by
//! hand, so ingest from a RECORDing client and delivery to a PLAYing one
//! share the same fan-out path.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use rand::RngExt;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::app::{DefaultHandler, ServerHandler};
use crate::auth::{self, Algorithm, Challenge};
pub use crate::config::ServerConfig;
use crate::error::{Result, RtspError};
use crate::protocol::{Method, RtspRequest, RtspResponse, StatusCode, Transport as TransportHeader};
use crate::rtcp::{ReceiverReport, ReportBlock, ReportScheduler, SenderReport};
use crate::rtp::{ReceiveStats, RtpHeader};
use crate::sdp::SessionDescription;
use crate::session::server::ServerSessionState;
use crate::session::{Direction, Session, SessionManager, SessionTransport};
use crate::stream::StreamRegistry;
use crate::transport::tcp::{self, TcpCarrier, TcpCarrierReader, TcpCarrierWriter};
use crate::transport::udp::{MulticastGroups, PortAllocator, UdpPair};
use crate::url::RtspUrl;

/// Information about a connected viewer (a session in the Playing state).
#[derive(Debug, Clone)]
pub struct Viewer {
    pub session_id: String,
    pub path: String,
    pub transport_family: Option<&'static str>,
}

/// Per-session RTP/RTCP accounting used to build Sender/Receiver Reports
/// (spec §4.6): a session is either a sender (PLAY: counts what it's sent)
/// or a receiver (RECORD: jitter/loss against what arrived), per its
/// [`Direction`].
struct SessionRtcp {
    ssrc: u32,
    packets_sent: AtomicU64,
    octets_sent: AtomicU64,
    receive_stats: Mutex<ReceiveStats>,
    started: Instant,
}

/// Shared state handed to every connection task.
struct Shared {
    config: Arc<ServerConfig>,
    sessions: SessionManager,
    streams: StreamRegistry,
    ports: PortAllocator,
    multicast: MulticastGroups,
    handler: Arc<dyn ServerHandler>,
    /// Bound unicast sockets keyed by session id, kept alive for as long as
    /// the session holds them so a delivery/ingest task can use them.
    udp_pairs: RwLock<HashMap<String, Arc<UdpPair>>>,
    rtcp_states: RwLock<HashMap<String, Arc<SessionRtcp>>>,
    /// Background delivery/ingest/RTCP-scheduler tasks spawned for a
    /// session, aborted together on PAUSE/TEARDOWN.
    tasks: RwLock<HashMap<String, Vec<tokio::task::AbortHandle>>>,
}

impl Shared {
    fn rtcp_state(&self, session_id: &str) -> Arc<SessionRtcp> {
        if let Some(existing) = self.rtcp_states.read().get(session_id) {
            return existing.clone();
        }
        let entry = Arc::new(SessionRtcp {
            ssrc: rand::rng().random::<u32>(),
            packets_sent: AtomicU64::new(0),
            octets_sent: AtomicU64::new(0),
            receive_stats: Mutex::new(ReceiveStats::new()),
            started: Instant::now(),
        });
        self.rtcp_states
            .write()
            .insert(session_id.to_string(), entry.clone());
        entry
    }

    fn note_sent(&self, session_id: &str, bytes: usize) {
        let state = self.rtcp_state(session_id);
        state.packets_sent.fetch_add(1, Ordering::Relaxed);
        state.octets_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Fold an inbound RTP packet into its session's receive-side
    /// accounting. `arrival_rtp_units` is approximated from wall-clock
    /// elapsed time assuming a 90kHz clock, since this ingest path doesn't
    /// carry the negotiated [`crate::format::Format`]'s real clock rate
    /// alongside the raw packet.
    fn record_receive(&self, session_id: &str, header: &RtpHeader) {
        let state = self.rtcp_state(session_id);
        let elapsed_units = (state.started.elapsed().as_millis() as u32).wrapping_mul(90);
        state.receive_stats.lock().on_packet(header, elapsed_units);
    }

    fn register_task(&self, session_id: &str, handle: tokio::task::AbortHandle) {
        self.tasks
            .write()
            .entry(session_id.to_string())
            .or_default()
            .push(handle);
    }

    fn abort_tasks(&self, session_id: &str) {
        if let Some(handles) = self.tasks.write().remove(session_id) {
            for handle in handles {
                handle.abort();
            }
        }
        self.rtcp_states.write().remove(session_id);
    }
}

/// High-level RTSP server orchestrator.
pub struct Server {
    bind_addr: String,
    shared: Arc<Shared>,
    running: Arc<AtomicBool>,
    shutdown_tx: Option<watch::Sender<bool>>,
    local_addr: Option<SocketAddr>,
}

impl Server {
    pub fn new(bind_addr: &str) -> Self {
        Self::with_config(bind_addr, ServerConfig::default())
    }

    pub fn with_config(bind_addr: &str, config: ServerConfig) -> Self {
        let streams = StreamRegistry::new(config.write_queue_size);
        let handler = Arc::new(DefaultHandler::new(streams.clone()));
        Self::with_handler(bind_addr, config, streams, handler)
    }

    /// Build a server whose DESCRIBE/ANNOUNCE/ingest callbacks go through a
    /// caller-supplied [`ServerHandler`] instead of [`DefaultHandler`]
    /// (spec §6): the embedder owns stream registration and sees every
    /// inbound RTP/RTCP packet directly.
    pub fn with_handler(
        bind_addr: &str,
        config: ServerConfig,
        streams: StreamRegistry,
        handler: Arc<dyn ServerHandler>,
    ) -> Self {
        let config = Arc::new(config);
        let ports = PortAllocator::new(
            config.udp_rtp_port_range.clone(),
            config.udp_rtcp_port_range.clone(),
            config.shares_port_domain(),
        );
        let multicast = MulticastGroups::new(
            config.multicast_ip_range,
            config.multicast_rtp_port,
            config.multicast_rtcp_port,
            config.multicast_ttl,
        );
        Server {
            bind_addr: bind_addr.to_string(),
            shared: Arc::new(Shared {
                sessions: SessionManager::new(),
                streams,
                ports,
                multicast,
                handler,
                udp_pairs: RwLock::new(HashMap::new()),
                rtcp_states: RwLock::new(HashMap::new()),
                tasks: RwLock::new(HashMap::new()),
                config,
            }),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx: None,
            local_addr: None,
        }
    }

    /// The bound control-connection address, available once [`start`](Self::start)
    /// has returned successfully — useful for tests that bind to port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Register a stream at `path` that DESCRIBE/SETUP/PLAY will serve.
    /// Only meaningful when the server is using [`DefaultHandler`] (the
    /// default) — a custom handler owns its own stream registration.
    pub fn add_stream(&self, path: &str, description: SessionDescription) -> Arc<crate::stream::Stream> {
        self.shared.streams.add(path, description)
    }

    pub fn set_default_stream(&self, path: &str) {
        self.shared.streams.set_default(path);
    }

    pub fn session_manager(&self) -> &SessionManager {
        &self.shared.sessions
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn start(&mut self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(RtspError::AlreadyRunning);
        }

        let listener = TcpListener::bind(&self.bind_addr).await?;
        self.local_addr = Some(listener.local_addr()?);
        let (tx, rx) = watch::channel(false);
        self.shutdown_tx = Some(tx);

        tracing::info!(addr = %self.bind_addr, "RTSP server listening");

        let shared = self.shared.clone();
        tokio::spawn(tcp::accept_loop(listener, rx.clone(), Arc::new(move |carrier| {
            let shared = shared.clone();
            async move {
                ServerConnection::new(carrier, shared).run().await;
            }
        })));

        let reap_shared = self.shared.clone();
        let mut reap_shutdown = rx;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(5));
            loop {
                tokio::select! {
                    _ = reap_shutdown.changed() => {
                        if *reap_shutdown.borrow() { break; }
                    }
                    _ = ticker.tick() => {
                        let expired = reap_shared.sessions.reap_expired();
                        for session in expired {
                            reap_shared.streams.unsubscribe_all(&session.id);
                            reap_shared.abort_tasks(&session.id);
                        }
                    }
                }
            }
        });

        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("server stopping");
    }

    pub fn viewers(&self) -> Vec<Viewer> {
        self.shared
            .sessions
            .playing()
            .into_iter()
            .map(|session| Viewer {
                session_id: session.id.clone(),
                path: session.path.clone(),
                transport_family: session.get_transport_family(),
            })
            .collect()
    }

    pub fn config(&self) -> Arc<ServerConfig> {
        self.shared.config.clone()
    }
}

/// Per-connection request dispatcher — generalizes the teacher's
/// `MethodHandler`, now covering the full play+record method set and
/// enforcing the session-state/path/transport invariants from spec §4.8.
struct ServerConnection {
    reader: TcpCarrierReader,
    writer: Arc<tokio::sync::Mutex<TcpCarrierWriter>>,
    peer: SocketAddr,
    shared: Arc<Shared>,
    owned_sessions: Vec<String>,
}

impl ServerConnection {
    fn new(carrier: TcpCarrier, shared: Arc<Shared>) -> Self {
        let peer = carrier.peer_addr;
        let (reader, writer) = carrier.split();
        ServerConnection {
            reader,
            writer: Arc::new(tokio::sync::Mutex::new(writer)),
            peer,
            shared,
            owned_sessions: Vec::new(),
        }
    }

    async fn run(mut self) {
        let peer = self.peer;
        loop {
            let frame = match self.reader.recv().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    tracing::warn!(%peer, error = %e, "frame decode error");
                    break;
                }
                None => break,
            };

            let text = match frame {
                crate::protocol::Frame::Message(text) => text,
                crate::protocol::Frame::Interleaved { channel, payload } => {
                    self.route_interleaved(channel, payload);
                    continue;
                }
            };

            let request = match RtspRequest::parse(&text) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(%peer, error = %e, "parse error");
                    continue;
                }
            };

            let response = self.dispatch(&request, peer).await;
            let cseq = request.cseq().unwrap_or(0);
            let response = response.with_cseq(cseq);

            let mut writer = self.writer.lock().await;
            if let Err(e) = writer
                .send_message(String::from_utf8_lossy(&response.serialize()).into_owned())
                .await
            {
                tracing::warn!(%peer, error = %e, "write error");
                break;
            }
        }

        for session_id in &self.owned_sessions {
            self.shared.streams.unsubscribe_all(session_id);
            self.shared.abort_tasks(session_id);
            self.release_transport(session_id);
        }
        self.shared.sessions.remove_many(&self.owned_sessions);
        tracing::info!(%peer, sessions_cleaned = self.owned_sessions.len(), "connection closed");
    }

    /// Route a `$`-framed interleaved packet arriving on the control
    /// connection (RFC 2326 §10.12) to whichever owned session bound that
    /// channel number during SETUP, and on to the embedder via
    /// [`ServerHandler::on_packet_rtp`]/[`ServerHandler::on_packet_rtcp`].
    /// This is the RECORD ingest and PLAY-side RTCP feedback path for
    /// TCP-interleaved transport — previously every interleaved frame
    /// arriving here was silently dropped.
    fn route_interleaved(&self, channel: u8, payload: Vec<u8>) {
        for session_id in &self.owned_sessions {
            let Ok(session) = self.shared.sessions.get(session_id) else {
                continue;
            };
            let transport = session.transport.read().clone();
            let Some(SessionTransport::TcpInterleaved {
                rtp_channel,
                rtcp_channel,
            }) = transport
            else {
                continue;
            };
            if channel == rtp_channel {
                if let Some(header) = RtpHeader::parse(&payload) {
                    self.shared.record_receive(&session.id, &header);
                }
                self.shared
                    .handler
                    .on_packet_rtp(&session.id, &session.path, 0, &payload);
                return;
            } else if channel == rtcp_channel {
                self.shared
                    .handler
                    .on_packet_rtcp(&session.id, &session.path, 0, &payload);
                return;
            }
        }
    }

    fn release_transport(&self, session_id: &str) {
        if let Some(pair) = self.shared.udp_pairs.write().remove(session_id) {
            self.shared.ports.release_pair(&pair);
        }
    }

    /// Server-side Digest challenge (RFC 2617/7616, spec §4.9/§6). Returns
    /// `Some(401)` when auth is configured and the request's `Authorization`
    /// header is missing or doesn't verify; `None` means the request may
    /// proceed. OPTIONS is exempt so capability discovery never requires
    /// credentials.
    fn authenticate(&self, request: &RtspRequest) -> Option<RtspResponse> {
        let realm = self.shared.config.auth_realm.as_ref()?;
        let creds = self.shared.config.required_credentials.as_ref()?;

        let challenge_response = || {
            let nonce = format!("{:016x}", rand::rng().random::<u64>());
            RtspResponse::new(StatusCode::UNAUTHORIZED).with_header(
                "WWW-Authenticate",
                format!("Digest realm=\"{realm}\", nonce=\"{nonce}\", qop=\"auth\", algorithm=MD5"),
            )
        };

        let Some(header) = request.get_header("Authorization") else {
            return Some(challenge_response());
        };
        let Some(parsed) = auth::DigestAuthorization::parse(header) else {
            return Some(challenge_response());
        };
        if parsed.username != creds.username || parsed.realm != *realm {
            return Some(challenge_response());
        }

        let challenge = Challenge::Digest {
            realm: realm.clone(),
            nonce: parsed.nonce.clone(),
            opaque: None,
            qop: Some("auth".to_string()),
            algorithm: Algorithm::Md5,
            stale: false,
        };
        match auth::verify_digest_response(
            &challenge,
            creds,
            request.method.as_str(),
            &parsed.uri,
            parsed.nc,
            &parsed.cnonce,
            &parsed.response,
        ) {
            Ok(()) => None,
            Err(_) => Some(challenge_response()),
        }
    }

    async fn dispatch(&mut self, request: &RtspRequest, peer: SocketAddr) -> RtspResponse {
        if request.cseq().is_none() {
            return RtspResponse::new(StatusCode::BAD_REQUEST);
        }

        if !matches!(request.method, Method::Options) {
            if let Some(challenge) = self.authenticate(request) {
                return challenge;
            }
        }

        match request.method {
            Method::Options => RtspResponse::ok().with_header(
                "Public",
                "OPTIONS, DESCRIBE, ANNOUNCE, SETUP, PLAY, RECORD, PAUSE, TEARDOWN, GET_PARAMETER, SET_PARAMETER",
            ),
            Method::Describe => self.handle_describe(request),
            Method::Announce => self.handle_announce(request),
            Method::Setup => self.handle_setup(request, peer).await,
            Method::Play => self.handle_transition(request, Method::Play),
            Method::Record => self.handle_transition(request, Method::Record),
            Method::Pause => self.handle_transition(request, Method::Pause),
            Method::Teardown => self.handle_teardown(request),
            Method::GetParameter | Method::SetParameter => self.handle_keepalive(request),
            Method::Redirect => RtspResponse::new(StatusCode::NOT_IMPLEMENTED),
        }
    }

    fn path_of(&self, uri: &str, strip_control: bool) -> String {
        match RtspUrl::parse(uri) {
            Ok(url) => {
                if strip_control {
                    url.base_path().to_string()
                } else {
                    url.path
                }
            }
            Err(_) => uri.to_string(),
        }
    }

    fn handle_describe(&self, request: &RtspRequest) -> RtspResponse {
        let path = self.path_of(&request.uri, false);
        match self.shared.handler.on_describe(&path) {
            Some(description) => {
                let sdp = description.marshal();
                RtspResponse::ok()
                    .with_header("Content-Base", format!("{}/", request.uri.trim_end_matches('/')))
                    .with_body("application/sdp", sdp.into_bytes())
            }
            None => RtspResponse::new(StatusCode::NOT_FOUND),
        }
    }

    fn handle_announce(&self, request: &RtspRequest) -> RtspResponse {
        let path = self.path_of(&request.uri, false);
        let body = String::from_utf8_lossy(&request.body);
        match SessionDescription::unmarshal(&body) {
            Ok(description) => {
                self.shared.handler.on_announce(&path, &description);
                RtspResponse::ok()
            }
            Err(_) => RtspResponse::new(StatusCode::BAD_REQUEST),
        }
    }

    async fn handle_setup(&mut self, request: &RtspRequest, peer: SocketAddr) -> RtspResponse {
        let path = self.path_of(&request.uri, true);

        let Some(transport_value) = request.get_header("Transport") else {
            return RtspResponse::new(StatusCode::UNSUPPORTED_TRANSPORT);
        };
        let Some(parsed) = TransportHeader::parse(transport_value) else {
            return RtspResponse::new(StatusCode::UNSUPPORTED_TRANSPORT);
        };

        let existing = request
            .headers
            .session()
            .and_then(|(id, _)| self.shared.sessions.get(&id).ok());

        let direction = if parsed.mode == Some(crate::protocol::Mode::Record) {
            Direction::Record
        } else {
            Direction::Play
        };

        let session = match existing {
            Some(session) => {
                if let Err(e) = session.check_path(&path) {
                    return error_response(e);
                }
                session
            }
            None => {
                let session = self.shared.sessions.create(&path, direction);
                self.owned_sessions.push(session.id.clone());
                session
            }
        };

        if session.state().validate(Method::Setup).is_err() {
            return RtspResponse::new(StatusCode::METHOD_NOT_VALID_IN_STATE);
        }

        let negotiated = match self.negotiate_transport(&parsed, peer, &path, &session.id).await {
            Ok(n) => n,
            Err(e) => return error_response(e),
        };

        if let Some(bound_family) = session.get_transport_family() {
            if bound_family != negotiated.family() {
                return error_response(RtspError::TransportMismatch {
                    session: session.id.clone(),
                    bound: bound_family.to_string(),
                    requested: negotiated.family().to_string(),
                });
            }
        }

        session.set_transport(negotiated.clone());
        session.set_state(ServerSessionState::Ready);
        session.touch();

        self.shared.handler.on_setup(&session.id, &path, session.direction);

        RtspResponse::ok()
            .with_header("Session", session.session_header_value())
            .with_header("Transport", render_transport(&parsed, &negotiated))
    }

    async fn negotiate_transport(
        &self,
        requested: &TransportHeader,
        peer: SocketAddr,
        path: &str,
        session_id: &str,
    ) -> Result<SessionTransport> {
        use crate::protocol::{Carrier, Delivery};

        match (requested.carrier, requested.delivery) {
            (Carrier::Tcp, _) => {
                let channels = requested.interleaved.ok_or(RtspError::TransportNotConfigured(
                    "TCP SETUP missing interleaved channels".to_string(),
                ))?;
                Ok(SessionTransport::TcpInterleaved {
                    rtp_channel: channels.0,
                    rtcp_channel: channels.1,
                })
            }
            (Carrier::Udp, Delivery::Multicast) => {
                let (group, rtp_port, rtcp_port, ttl) = self.shared.multicast.join(path);
                Ok(SessionTransport::UdpMulticast {
                    group,
                    rtp_port,
                    rtcp_port,
                    ttl,
                })
            }
            (Carrier::Udp, Delivery::Unicast) => {
                let client_ports = requested
                    .client_port
                    .ok_or(RtspError::TransportNotConfigured(
                        "unicast SETUP missing client_port".to_string(),
                    ))?;
                let pair = Arc::new(self.shared.ports.allocate().await?);
                let (rtp_port, rtcp_port) = (pair.rtp_port, pair.rtcp_port);
                self.shared
                    .udp_pairs
                    .write()
                    .insert(session_id.to_string(), pair);
                Ok(SessionTransport::UdpUnicast {
                    client_addr: peer,
                    client_rtp_port: client_ports.0,
                    client_rtcp_port: client_ports.1,
                    server_rtp_port: rtp_port,
                    server_rtcp_port: rtcp_port,
                })
            }
        }
    }

    fn handle_transition(&mut self, request: &RtspRequest, method: Method) -> RtspResponse {
        let Some((id, _)) = request.headers.session() else {
            return RtspResponse::new(StatusCode::SESSION_NOT_FOUND);
        };
        let session = match self.shared.sessions.get(&id) {
            Ok(s) => s,
            Err(e) => return error_response(e),
        };

        let path = self.path_of(&request.uri, true);
        if !path.is_empty() && path != "/" {
            if let Err(e) = session.check_path(&path) {
                return error_response(e);
            }
        }

        if let Err(e) = session.state().validate(method) {
            return error_response(e);
        }

        session.touch();
        let next_state = session.state().advance(method);
        session.set_state(next_state);

        match method {
            Method::Play => {
                self.spawn_delivery(session.clone());
                self.spawn_rtcp_scheduler(session.clone());
                self.shared.handler.on_play(&session.id, &session.path);
            }
            Method::Record => {
                self.spawn_ingest(session.clone());
                self.spawn_rtcp_scheduler(session.clone());
                self.shared.handler.on_record(&session.id, &session.path);
            }
            Method::Pause => {
                if let Ok(stream) = self.shared.streams.resolve(&session.path) {
                    stream.unsubscribe(&session.id);
                }
                self.shared.abort_tasks(&session.id);
                self.shared.handler.on_pause(&session.id, &session.path);
            }
            _ => {}
        }

        RtspResponse::ok().with_header("Session", session.session_header_value())
    }

    /// Dispatch a Playing session's delivery loop to the task matching its
    /// negotiated carrier (spec §4.5): UDP unicast, UDP multicast, or
    /// TCP-interleaved all subscribe to the same [`crate::stream::Stream`]
    /// and differ only in how a packet reaches the wire.
    fn spawn_delivery(&self, session: Arc<Session>) {
        let transport = session.transport.read().clone();
        match transport {
            Some(SessionTransport::UdpUnicast { .. }) => self.spawn_udp_delivery(session),
            Some(SessionTransport::UdpMulticast {
                group,
                rtp_port,
                rtcp_port,
                ..
            }) => self.spawn_multicast_delivery(session, group, rtp_port, rtcp_port),
            Some(SessionTransport::TcpInterleaved {
                rtp_channel,
                rtcp_channel,
            }) => self.spawn_tcp_delivery(session, rtp_channel, rtcp_channel),
            None => {}
        }
    }

    /// Dispatch a Recording session's ingest loop. TCP-interleaved ingest
    /// needs no task of its own — it flows through
    /// [`Self::route_interleaved`] as frames arrive on this same
    /// connection's read loop. Multicast RECORD ingest is out of scope:
    /// receiving multicast traffic needs a socket joined to the group,
    /// which this core does not bind (see `DESIGN.md`).
    fn spawn_ingest(&self, session: Arc<Session>) {
        let transport = session.transport.read().clone();
        if let Some(SessionTransport::UdpUnicast { .. }) = transport {
            self.spawn_udp_ingest(session);
        }
    }

    fn spawn_udp_delivery(&self, session: Arc<Session>) {
        let Some(pair) = self.shared.udp_pairs.read().get(&session.id).cloned() else {
            return;
        };
        let transport = session.transport.read().clone();
        let Some(SessionTransport::UdpUnicast {
            client_addr,
            client_rtp_port,
            client_rtcp_port,
            ..
        }) = transport
        else {
            return;
        };
        let Ok(stream) = self.shared.streams.resolve(&session.path) else {
            return;
        };

        let mut reader = stream.subscribe(&session.id);
        let rtp_addr = SocketAddr::new(client_addr.ip(), client_rtp_port);
        let rtcp_addr = SocketAddr::new(client_addr.ip(), client_rtcp_port);
        let shared = self.shared.clone();
        let session_id = session.id.clone();

        let handle = tokio::spawn(async move {
            while let Some(packet) = reader.recv().await {
                let addr = if packet.is_rtcp { rtcp_addr } else { rtp_addr };
                if !packet.is_rtcp {
                    shared.note_sent(&session_id, packet.payload.len());
                }
                let sent = if packet.is_rtcp {
                    pair.send_rtcp(&packet.payload, addr).await
                } else {
                    pair.send_rtp(&packet.payload, addr).await
                };
                if let Err(e) = sent {
                    tracing::warn!(session_id = %session_id, error = %e, "delivery send failed");
                    break;
                }
            }
        });
        self.shared.register_task(&session.id, handle.abort_handle());
    }

    /// TCP-interleaved delivery (RFC 2326 §10.12): packets published to the
    /// session's stream are `$`-framed onto the shared write half of this
    /// connection, serialized against the control response path by
    /// `self.writer`'s mutex.
    fn spawn_tcp_delivery(&self, session: Arc<Session>, rtp_channel: u8, rtcp_channel: u8) {
        let Ok(stream) = self.shared.streams.resolve(&session.path) else {
            return;
        };
        let mut reader = stream.subscribe(&session.id);
        let writer = self.writer.clone();
        let shared = self.shared.clone();
        let session_id = session.id.clone();

        let handle = tokio::spawn(async move {
            while let Some(packet) = reader.recv().await {
                let channel = if packet.is_rtcp { rtcp_channel } else { rtp_channel };
                if !packet.is_rtcp {
                    shared.note_sent(&session_id, packet.payload.len());
                }
                let payload = packet.payload.to_vec();
                let sent = {
                    let mut writer = writer.lock().await;
                    writer.send_interleaved(channel, payload).await
                };
                if let Err(e) = sent {
                    tracing::warn!(session_id = %session_id, error = %e, "interleaved delivery failed");
                    break;
                }
            }
        });
        self.shared.register_task(&session.id, handle.abort_handle());
    }

    /// Multicast delivery (spec §4.5): every subscriber to a path's session
    /// shares the same group address, so one publish fans out to every
    /// listening client without this core tracking them individually.
    fn spawn_multicast_delivery(&self, session: Arc<Session>, group: Ipv4Addr, rtp_port: u16, rtcp_port: u16) {
        let Ok(stream) = self.shared.streams.resolve(&session.path) else {
            return;
        };
        let mut reader = stream.subscribe(&session.id);
        let shared = self.shared.clone();
        let session_id = session.id.clone();
        let rtp_addr = SocketAddr::new(group.into(), rtp_port);
        let rtcp_addr = SocketAddr::new(group.into(), rtcp_port);

        let handle = tokio::spawn(async move {
            let socket = match shared.multicast.sender().await {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "multicast sender bind failed");
                    return;
                }
            };
            while let Some(packet) = reader.recv().await {
                let addr = if packet.is_rtcp { rtcp_addr } else { rtp_addr };
                if !packet.is_rtcp {
                    shared.note_sent(&session_id, packet.payload.len());
                }
                if let Err(e) = socket.send_to(&packet.payload, addr).await {
                    tracing::warn!(session_id = %session_id, error = %e, "multicast delivery failed");
                    break;
                }
            }
        });
        self.shared.register_task(&session.id, handle.abort_handle());
    }

    /// RECORD ingest over UDP unicast (spec §4.5/§4.6): reads arriving
    /// RTP/RTCP datagrams off the session's bound pair, folds RTP headers
    /// into receive-side stats, and hands every packet to the embedder via
    /// [`ServerHandler::on_packet_rtp`]/[`ServerHandler::on_packet_rtcp`].
    fn spawn_udp_ingest(&self, session: Arc<Session>) {
        let Some(pair) = self.shared.udp_pairs.read().get(&session.id).cloned() else {
            return;
        };
        let shared = self.shared.clone();
        let session_id = session.id.clone();
        let path = session.path.clone();

        let rtp_handle = {
            let pair = pair.clone();
            let shared = shared.clone();
            let session_id = session_id.clone();
            let path = path.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 2048];
                loop {
                    match pair.recv_rtp(&mut buf).await {
                        Ok((n, _addr)) => {
                            let payload = &buf[..n];
                            if let Some(header) = RtpHeader::parse(payload) {
                                shared.record_receive(&session_id, &header);
                            }
                            shared.handler.on_packet_rtp(&session_id, &path, 0, payload);
                        }
                        Err(e) => {
                            tracing::warn!(session_id = %session_id, error = %e, "RTP ingest recv failed");
                            break;
                        }
                    }
                }
            })
        };
        self.shared.register_task(&session.id, rtp_handle.abort_handle());

        let rtcp_handle = tokio::spawn(async move {
            let mut buf = vec![0u8; 2048];
            loop {
                match pair.recv_rtcp(&mut buf).await {
                    Ok((n, _addr)) => {
                        shared.handler.on_packet_rtcp(&session_id, &path, 0, &buf[..n]);
                    }
                    Err(_) => break,
                }
            }
        });
        self.shared.register_task(&session.id, rtcp_handle.abort_handle());
    }

    /// Periodic Sender/Receiver Report emission (spec §4.6/§9(a)): a
    /// Playing session is the media sender and emits SRs built from
    /// [`Shared::note_sent`]'s counters; a Recording session is the
    /// receiver and emits RRs built from [`ReceiveStats`] folded by
    /// [`Shared::record_receive`].
    fn spawn_rtcp_scheduler(&self, session: Arc<Session>) {
        let shared = self.shared.clone();
        let writer = self.writer.clone();
        let session_id = session.id.clone();
        let register_id = session_id.clone();

        let handle = tokio::spawn(async move {
            let scheduler = ReportScheduler::default_interval();
            loop {
                tokio::time::sleep(scheduler.next_interval()).await;

                let Ok(current) = shared.sessions.get(&session_id) else {
                    break;
                };
                if !matches!(
                    current.state(),
                    ServerSessionState::Playing | ServerSessionState::Recording
                ) {
                    break;
                }
                let Some(transport) = current.transport.read().clone() else {
                    break;
                };

                let state = shared.rtcp_state(&session_id);
                let report = match session.direction {
                    Direction::Play => {
                        let (ntp_seconds, ntp_fraction) = ntp_now();
                        SenderReport {
                            ssrc: state.ssrc,
                            ntp_seconds,
                            ntp_fraction,
                            rtp_timestamp: 0,
                            packet_count: state.packets_sent.load(Ordering::Relaxed) as u32,
                            octet_count: state.octets_sent.load(Ordering::Relaxed) as u32,
                            reports: vec![],
                        }
                        .write()
                    }
                    Direction::Record => {
                        let stats = state.receive_stats.lock();
                        ReceiverReport {
                            ssrc: state.ssrc,
                            reports: vec![ReportBlock {
                                ssrc: state.ssrc,
                                fraction_lost: 0,
                                cumulative_lost: stats.lost_packets() as i32,
                                extended_highest_sequence: stats.extended_highest_sequence(),
                                jitter: stats.jitter(),
                                last_sr: 0,
                                delay_since_last_sr: 0,
                            }],
                        }
                        .write()
                    }
                };

                let sent = match &transport {
                    SessionTransport::UdpUnicast {
                        client_addr,
                        client_rtcp_port,
                        ..
                    } => match { shared.udp_pairs.read().get(&session_id).cloned() } {
                        Some(pair) => pair
                            .send_rtcp(&report, SocketAddr::new(client_addr.ip(), *client_rtcp_port))
                            .await
                            .is_ok(),
                        None => false,
                    },
                    SessionTransport::UdpMulticast { group, rtcp_port, .. } => {
                        match shared.multicast.sender().await {
                            Ok(socket) => socket
                                .send_to(&report, SocketAddr::new((*group).into(), *rtcp_port))
                                .await
                                .is_ok(),
                            Err(_) => false,
                        }
                    }
                    SessionTransport::TcpInterleaved { rtcp_channel, .. } => {
                        let mut writer = writer.lock().await;
                        writer.send_interleaved(*rtcp_channel, report).await.is_ok()
                    }
                };
                if !sent {
                    break;
                }
            }
        });
        self.shared.register_task(&register_id, handle.abort_handle());
    }

    fn handle_teardown(&mut self, request: &RtspRequest) -> RtspResponse {
        let Some((id, _)) = request.headers.session() else {
            return RtspResponse::new(StatusCode::SESSION_NOT_FOUND);
        };
        if let Some(session) = self.shared.sessions.remove(&id) {
            self.shared.handler.on_teardown(&session.id, &session.path);
            self.shared.streams.unsubscribe_all(&session.id);
            self.shared.abort_tasks(&session.id);
            if session.get_transport_family() == Some("udp-multicast") {
                self.shared.multicast.leave(&session.path);
            }
            self.release_transport(&session.id);
            self.owned_sessions.retain(|s| s != &session.id);
        }
        RtspResponse::ok()
    }

    fn handle_keepalive(&self, request: &RtspRequest) -> RtspResponse {
        if let Some((id, _)) = request.headers.session() {
            if let Ok(session) = self.shared.sessions.get(&id) {
                session.touch();
            }
        }
        RtspResponse::ok()
    }
}

/// RFC 3550 §4's NTP timestamp (seconds since 1900, plus a fractional
/// second) taken from wall-clock time for Sender Report construction.
fn ntp_now() -> (u32, u32) {
    const NTP_UNIX_EPOCH_OFFSET: u64 = 2_208_988_800;
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let seconds = now.as_secs().wrapping_add(NTP_UNIX_EPOCH_OFFSET) as u32;
    let fraction = ((now.subsec_nanos() as u64) << 32) / 1_000_000_000;
    (seconds, fraction as u32)
}

fn error_response(error: RtspError) -> RtspResponse {
    let status = match &error {
        RtspError::SessionNotFound(_) => StatusCode::SESSION_NOT_FOUND,
        RtspError::SessionStateViolation { .. } => StatusCode::METHOD_NOT_VALID_IN_STATE,
        RtspError::PathMismatch { .. } | RtspError::TransportMismatch { .. } => {
            StatusCode::UNSUPPORTED_TRANSPORT
        }
        RtspError::TransportNotConfigured(_) => StatusCode::UNSUPPORTED_TRANSPORT,
        RtspError::AuthRequired | RtspError::AuthFailed(_) => StatusCode::UNAUTHORIZED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::warn!(error = %error, status = status.0, "request rejected");
    RtspResponse::new(status)
}

fn render_transport(requested: &TransportHeader, negotiated: &SessionTransport) -> String {
    let mut response = requested.clone();
    match negotiated {
        SessionTransport::UdpUnicast {
            server_rtp_port,
            server_rtcp_port,
            ..
        } => {
            response.server_port = Some((*server_rtp_port, *server_rtcp_port));
        }
        SessionTransport::UdpMulticast {
            group,
            rtp_port,
            rtcp_port,
            ttl,
        } => {
            response.destination = Some(group.to_string());
            response.server_port = Some((*rtp_port, *rtcp_port));
            response.ttl = Some(*ttl);
        }
        SessionTransport::TcpInterleaved {
            rtp_channel,
            rtcp_channel,
        } => {
            response.interleaved = Some((*rtp_channel, *rtcp_channel));
        }
    }
    response.format()
}
