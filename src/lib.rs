//! # rtsp — RTSP 1.0 session and transport core
//!
//! A Rust library for the session-management and transport-negotiation
//! layer of RTSP 1.0: parsing and building requests/responses, driving the
//! server- and client-side session state machines, negotiating UDP
//! unicast/multicast and TCP-interleaved transport, and moving RTP/RTCP
//! bytes between a publisher and any number of subscribed readers. Encoding,
//! packetization, and decoding of the media itself are out of scope — this
//! crate carries opaque payloads tagged with a [`format::Format`].
//!
//! ## Protocol references
//!
//! | RFC | Topic | How this crate uses it |
//! |-----|-------|----------------------|
//! | [RFC 2326](https://tools.ietf.org/html/rfc2326) | RTSP 1.0 | Request/response parsing, session lifecycle, transport negotiation |
//! | [RFC 3550](https://tools.ietf.org/html/rfc3550) | RTP/RTCP | Packet header format, jitter/loss accounting, Sender/Receiver Reports |
//! | [RFC 4566](https://tools.ietf.org/html/rfc4566) | SDP | Bidirectional session description marshal/unmarshal |
//! | [RFC 2617](https://tools.ietf.org/html/rfc2617) / [RFC 7616](https://tools.ietf.org/html/rfc7616) | Basic/Digest auth | Challenge parsing, response computation and verification |
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │  Server / ClientSession — orchestrators  │
//! │  StreamRegistry         — named streams  │
//! ├──────────────────────────────────────────┤
//! │  Protocol — RTSP parsing, SDP, Transport │
//! │  Session  — state machines, auth         │
//! ├──────────────────────────────────────────┤
//! │  Transport — TCP control + interleaved,  │
//! │              UDP unicast/multicast       │
//! │  Rtp/Rtcp  — wire header, reports        │
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use rtsp::Server;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut server = Server::new("0.0.0.0:8554");
//!     server.start().await.unwrap();
//! }
//! ```
//!
//! ## Crate layout
//!
//! - [`app`] — [`app::ServerHandler`], the embedder callback interface.
//! - [`server`] — High-level [`Server`] orchestrator and [`ServerConfig`].
//! - [`session`] — Server- and client-side session state machines, transport binding.
//! - [`stream`] — [`stream::Stream`] / [`stream::StreamRegistry`], the fan-out layer.
//! - [`protocol`] — RTSP request/response parsing, headers, interleaved framing.
//! - [`sdp`] — Session description marshal/unmarshal.
//! - [`format`] — Opaque media format tagging (payload type, clock rate, rtpmap/fmtp).
//! - [`rtp`] / [`rtcp`] — RTP header and receive-side stats; RTCP report construction.
//! - [`auth`] — Basic/Digest challenge-response (RFC 2617/7616).
//! - [`transport`] — TCP control connection and UDP port/multicast allocation.
//! - [`url`] — RTSP URL parsing and control-attribute resolution.
//! - [`config`] — Library-wide configuration.
//! - [`error`] — [`RtspError`] enum and [`Result`] alias.

pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod format;
pub mod protocol;
pub mod rtcp;
pub mod rtp;
pub mod sdp;
pub mod server;
pub mod session;
pub mod stream;
pub mod transport;
pub mod url;

pub use app::{DefaultHandler, ServerHandler};
pub use error::{Result, RtspError};
pub use server::{Server, ServerConfig, Viewer};
pub use session::client::ClientSession;
pub use session::{Direction, Session, SessionManager, SessionTransport};
pub use stream::{Stream, StreamRegistry};
pub use url::RtspUrl;
