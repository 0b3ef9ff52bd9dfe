//! Embedder callback interface (spec §6 "External interfaces").
//!
//! The teacher crate had no notion of a pluggable application layer — its
//! `Server` owned `MountRegistry` lookups directly in the dispatcher. This
//! module adds the seam a real embedder needs: a [`ServerHandler`] trait
//! with a default no-op body per method, grounded on
//! `webrtc-rs-rtc`'s `RTCHandler` (`rtc-shared/src/handler.rs`), which
//! takes the same approach — implementors override only the callbacks they
//! care about instead of filling in a full vtable. [`DefaultHandler`]
//! reproduces this crate's own prior behavior (DESCRIBE/ANNOUNCE against a
//! [`StreamRegistry`]) so `Server::new` keeps working with no handler
//! supplied, and additionally routes ingested RTP/RTCP into the same
//! registry's fan-out, unifying RECORD ingest and PLAY delivery through one
//! path.

use std::sync::Arc;

use crate::sdp::SessionDescription;
use crate::session::Direction;
use crate::stream::{StreamPacket, StreamRegistry};

/// Outcomes the RTSP core reports to an embedder as a session moves through
/// the control methods, and as payload bytes arrive. Every method has a
/// default no-op body; a handler overrides only what it needs.
pub trait ServerHandler: Send + Sync {
    /// Called on DESCRIBE. Returning `None` yields a 404; returning
    /// `Some(description)` answers with that SDP.
    fn on_describe(&self, _path: &str) -> Option<SessionDescription> {
        None
    }

    /// Called on ANNOUNCE, after the request body has parsed as valid SDP.
    fn on_announce(&self, _path: &str, _description: &SessionDescription) {}

    /// Called once a SETUP has successfully negotiated transport for a
    /// session, before the response is sent.
    fn on_setup(&self, _session_id: &str, _path: &str, _direction: Direction) {}

    /// Called when a session enters the Playing state.
    fn on_play(&self, _session_id: &str, _path: &str) {}

    /// Called when a session enters the Recording state.
    fn on_record(&self, _session_id: &str, _path: &str) {}

    /// Called when a session enters the Paused state.
    fn on_pause(&self, _session_id: &str, _path: &str) {}

    /// Called on TEARDOWN, before the session is removed.
    fn on_teardown(&self, _session_id: &str, _path: &str) {}

    /// Called for every inbound RTP packet (RECORD ingest, or RTP arriving
    /// on a back channel). `media_index` identifies which SDP media section
    /// the packet belongs to.
    fn on_packet_rtp(&self, _session_id: &str, _path: &str, _media_index: usize, _packet: &[u8]) {}

    /// Called for every inbound RTCP packet (receiver reports on a PLAY
    /// session's back channel, or RTCP accompanying a RECORD ingest).
    fn on_packet_rtcp(&self, _session_id: &str, _path: &str, _media_index: usize, _packet: &[u8]) {}
}

/// The handler [`crate::server::Server`] uses when none is supplied: DESCRIBE
/// and ANNOUNCE go straight to a [`StreamRegistry`], and any ingested
/// RTP/RTCP is published into the matching [`crate::stream::Stream`] — so a
/// RECORDing client's packets reach the same fan-out a PLAY subscriber reads
/// from, with no extra wiring required.
pub struct DefaultHandler {
    streams: StreamRegistry,
}

impl DefaultHandler {
    pub fn new(streams: StreamRegistry) -> Self {
        DefaultHandler { streams }
    }
}

impl ServerHandler for DefaultHandler {
    fn on_describe(&self, path: &str) -> Option<SessionDescription> {
        self.streams.resolve(path).ok().map(|s| s.description())
    }

    fn on_announce(&self, path: &str, description: &SessionDescription) {
        match self.streams.get(path) {
            Some(stream) => stream.set_description(description.clone()),
            None => {
                self.streams.add(path, description.clone());
            }
        }
    }

    fn on_packet_rtp(&self, _session_id: &str, path: &str, media_index: usize, packet: &[u8]) {
        if let Ok(stream) = self.streams.resolve(path) {
            stream.publish(StreamPacket {
                media_index,
                is_rtcp: false,
                payload: Arc::from(packet),
            });
        }
    }

    fn on_packet_rtcp(&self, _session_id: &str, path: &str, media_index: usize, packet: &[u8]) {
        if let Ok(stream) = self.streams.resolve(path) {
            stream.publish(StreamPacket {
                media_index,
                is_rtcp: true,
                payload: Arc::from(packet),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_description() -> SessionDescription {
        SessionDescription {
            username: "-".to_string(),
            session_id: "1".to_string(),
            session_version: "1".to_string(),
            origin_addr: "0.0.0.0".to_string(),
            session_name: "s".to_string(),
            connection_addr: "0.0.0.0".to_string(),
            control: None,
            media: vec![],
        }
    }

    #[test]
    fn default_handler_describe_reads_through_registry() {
        let streams = StreamRegistry::new(8);
        streams.add("/stream", sample_description());
        let handler = DefaultHandler::new(streams);
        assert!(handler.on_describe("/stream").is_some());
        assert!(handler.on_describe("/missing").is_none());
    }

    #[test]
    fn default_handler_announce_registers_new_stream() {
        let streams = StreamRegistry::new(8);
        let handler = DefaultHandler::new(streams.clone());
        handler.on_announce("/cam", &sample_description());
        assert!(streams.get("/cam").is_some());
    }

    #[tokio::test]
    async fn default_handler_ingest_publishes_to_subscriber() {
        let streams = StreamRegistry::new(8);
        let stream = streams.add("/cam", sample_description());
        let mut reader = stream.subscribe("viewer1");
        let handler = DefaultHandler::new(streams);
        handler.on_packet_rtp("rec1", "/cam", 0, &[1, 2, 3]);
        let packet = reader.recv().await.unwrap();
        assert_eq!(&*packet.payload, &[1, 2, 3]);
        assert!(!packet.is_rtcp);
    }
}
