//! Error types for the RTSP session and transport core.

use std::fmt;

/// Errors that can occur anywhere in the RTSP core.
///
/// Variants map to the error taxonomy of the library:
///
/// - **Protocol**: [`Parse`](Self::Parse), [`CSeqMissing`](Self::CSeqMissing) —
///   malformed or out-of-sequence RTSP messages.
/// - **Transport**: [`Io`](Self::Io), [`PortRangeExhausted`](Self::PortRangeExhausted),
///   [`NoFreePorts`](Self::NoFreePorts) — socket/port failures.
/// - **Session**: [`SessionNotFound`](Self::SessionNotFound),
///   [`SessionStateViolation`](Self::SessionStateViolation),
///   [`TransportNotConfigured`](Self::TransportNotConfigured),
///   [`TransportMismatch`](Self::TransportMismatch),
///   [`PathMismatch`](Self::PathMismatch).
/// - **Auth**: [`AuthRequired`](Self::AuthRequired), [`AuthFailed`](Self::AuthFailed).
/// - **Packet**: [`PacketTooLarge`](Self::PacketTooLarge), [`WriteQueueFull`](Self::WriteQueueFull).
/// - **Server**: [`NotStarted`](Self::NotStarted), [`AlreadyRunning`](Self::AlreadyRunning).
/// - **Stream**: [`StreamNotFound`](Self::StreamNotFound).
/// - **Cancellation**: [`Cancelled`](Self::Cancelled).
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No session with the given ID exists in the session table.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// A request targeted a session from a method not valid in its current state (RFC 2326 §11.3.6 / 455).
    #[error("method not valid in session state {state}: {method}")]
    SessionStateViolation { method: String, state: String },

    /// SETUP has not been completed for this session (no transport negotiated).
    #[error("transport not configured for session: {0}")]
    TransportNotConfigured(String),

    /// A later SETUP on a session requested a transport family that disagrees
    /// with the one bound on the session's first SETUP.
    #[error("transport family mismatch for session {session}: bound to {bound}, requested {requested}")]
    TransportMismatch {
        session: String,
        bound: String,
        requested: String,
    },

    /// A later SETUP, PLAY, RECORD, etc. used a path that disagrees with the
    /// session's bound path (DESCRIBE path for play, ANNOUNCE path for record).
    #[error("path mismatch for session {session}: bound to {bound}, requested {requested}")]
    PathMismatch {
        session: String,
        bound: String,
        requested: String,
    },

    /// Attempted to send media to a session that is not in a delivering state.
    #[error("session not in a playing/recording state: {0}")]
    SessionNotPlaying(String),

    /// [`Server::start`](crate::server::Server::start) has not been called yet.
    #[error("server not started")]
    NotStarted,

    /// [`Server::start`](crate::server::Server::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,

    /// Failed to parse an RTSP request or response message (RFC 2326 §4, §6, §7).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// A request arrived without a `CSeq` header (RFC 2326 §12.17).
    #[error("CSeq header missing")]
    CSeqMissing,

    /// Server-side UDP port allocation exhausted the configured range.
    #[error("port range exhausted")]
    PortRangeExhausted,

    /// Trial allocation of an even/odd UDP port pair failed after the retry budget.
    #[error("no free port pair found in range after {attempts} attempts")]
    NoFreePorts { attempts: u32 },

    /// No stream registered at the requested path.
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    /// A reader's outbound queue overflowed; the reader was disconnected.
    #[error("write queue full for reader {0}")]
    WriteQueueFull(String),

    /// An interleaved frame or RTCP compound packet exceeded its bound.
    #[error("packet too large: {0} bytes")]
    PacketTooLarge(usize),

    /// A text message exceeded a framing bound (RFC 2326 §4 practical limits).
    #[error("message too large: {0}")]
    MessageTooLarge(&'static str),

    /// The peer requires authentication and none/invalid credentials were supplied.
    #[error("authentication required")]
    AuthRequired,

    /// Authentication was retried with a fresh challenge and still rejected.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// A server redirected (302) more times than the hop budget allows.
    #[error("too many redirects (> {0})")]
    TooManyRedirects(u32),

    /// An operation was cancelled by session teardown, connection loss, or a deadline.
    #[error("cancelled: {0}")]
    Cancelled(&'static str),

    /// A response carried a status code the caller did not expect.
    #[error("unexpected RTSP status {status} for {method}: {reason}")]
    UnexpectedStatus {
        method: String,
        status: u16,
        reason: String,
    },

    /// No RTP/RTCP packet arrived over UDP within the configured watchdog
    /// window after PLAY (RFC 2326 §4.10-equivalent liveness handling).
    #[error("UDP silence: {0}")]
    UdpSilence(String),
}

/// Specific kind of RTSP parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no request/status line).
    EmptyMessage,
    /// The start line did not have the expected `Method URI Version` /
    /// `Version Status Reason` format.
    InvalidStartLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// Header count or size exceeded the framing bound (RFC 2326 §4).
    TooManyHeaders,
    /// A header line exceeded the per-line size bound.
    HeaderLineTooLong,
    /// The declared or actual body exceeded the size bound.
    BodyTooLarge,
    /// An interleaved (`$`-prefixed) frame header was truncated or malformed.
    InvalidInterleavedFrame,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::InvalidStartLine => write!(f, "invalid start line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::TooManyHeaders => write!(f, "too many headers"),
            Self::HeaderLineTooLong => write!(f, "header line too long"),
            Self::BodyTooLarge => write!(f, "body too large"),
            Self::InvalidInterleavedFrame => write!(f, "invalid interleaved frame"),
        }
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;
