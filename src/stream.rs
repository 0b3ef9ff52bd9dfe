//! Server-side stream registry and fan-out to N readers (spec §4.11).
//!
//! Generalizes the teacher's `Mount`/`MountRegistry` (one packetizer per
//! path, a plain `Vec<String>` of subscriber IDs with no actual delivery
//! queue) into a transport-agnostic fan-out: a [`Stream`] holds an SDP
//! description plus a bounded per-reader channel, and a slow reader is
//! dropped rather than allowed to back-pressure the whole stream — this
//! core does not encode or packetize media (spec §1 non-goal), so a
//! `Stream` only ever moves bytes a publisher handed it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::error::{Result, RtspError};
use crate::sdp::SessionDescription;

pub const DEFAULT_PATH: &str = "/stream";

/// One packet handed from a publisher to every subscribed reader: either an
/// RTP/RTCP datagram bound for a specific media index, or a compound RTCP
/// packet the scheduler produced.
#[derive(Debug, Clone)]
pub struct StreamPacket {
    pub media_index: usize,
    pub is_rtcp: bool,
    pub payload: Arc<[u8]>,
}

/// A reader's bounded inbox; the sending half is kept by [`Stream`], the
/// receiving half is handed to whatever drives that session's delivery
/// loop (a UDP send task or an interleaved-frame write task).
pub struct ReaderHandle {
    pub session_id: String,
    rx: mpsc::Receiver<StreamPacket>,
}

impl ReaderHandle {
    pub async fn recv(&mut self) -> Option<StreamPacket> {
        self.rx.recv().await
    }
}

struct Reader {
    tx: mpsc::Sender<StreamPacket>,
}

/// A named stream endpoint (e.g. `/stream`, `/camera1`): an SDP description
/// plus the set of currently-subscribed reader queues.
pub struct Stream {
    path: String,
    description: RwLock<SessionDescription>,
    readers: RwLock<HashMap<String, Reader>>,
    queue_size: usize,
}

impl Stream {
    pub fn new(path: &str, description: SessionDescription, queue_size: usize) -> Self {
        Stream {
            path: path.to_string(),
            description: RwLock::new(description),
            readers: RwLock::new(HashMap::new()),
            queue_size,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn description(&self) -> SessionDescription {
        self.description.read().clone()
    }

    pub fn set_description(&self, description: SessionDescription) {
        *self.description.write() = description;
    }

    /// Register a new reader (called on PLAY), returning the receiving end
    /// of its bounded queue.
    pub fn subscribe(&self, session_id: &str) -> ReaderHandle {
        let (tx, rx) = mpsc::channel(self.queue_size);
        self.readers
            .write()
            .insert(session_id.to_string(), Reader { tx });
        tracing::debug!(path = %self.path, session_id, "reader subscribed");
        ReaderHandle {
            session_id: session_id.to_string(),
            rx,
        }
    }

    pub fn unsubscribe(&self, session_id: &str) {
        if self.readers.write().remove(session_id).is_some() {
            tracing::debug!(path = %self.path, session_id, "reader unsubscribed");
        }
    }

    pub fn reader_count(&self) -> usize {
        self.readers.read().len()
    }

    /// Fan a packet out to every subscribed reader. A reader whose queue is
    /// full is dropped immediately rather than slowed down for — per spec
    /// §4.11, one stalled client must not stall the others.
    pub fn publish(&self, packet: StreamPacket) {
        let mut dropped = Vec::new();
        {
            let readers = self.readers.read();
            for (session_id, reader) in readers.iter() {
                if reader.tx.try_send(packet.clone()).is_err() {
                    dropped.push(session_id.clone());
                }
            }
        }
        if !dropped.is_empty() {
            let mut readers = self.readers.write();
            for session_id in dropped {
                readers.remove(&session_id);
                tracing::warn!(path = %self.path, session_id, "write queue full, reader dropped");
            }
        }
    }
}

/// Registry of named streams, keyed by path (spec §4.11), generalizing the
/// teacher's `MountRegistry` default-mount fallback.
#[derive(Clone)]
pub struct StreamRegistry {
    streams: Arc<RwLock<HashMap<String, Arc<Stream>>>>,
    default_path: Arc<RwLock<Option<String>>>,
    queue_size: usize,
}

impl StreamRegistry {
    pub fn new(queue_size: usize) -> Self {
        StreamRegistry {
            streams: Arc::new(RwLock::new(HashMap::new())),
            default_path: Arc::new(RwLock::new(None)),
            queue_size,
        }
    }

    pub fn add(&self, path: &str, description: SessionDescription) -> Arc<Stream> {
        let stream = Arc::new(Stream::new(path, description, self.queue_size));
        self.streams
            .write()
            .insert(path.to_string(), stream.clone());
        tracing::info!(path, "stream registered");
        stream
    }

    pub fn set_default(&self, path: &str) {
        *self.default_path.write() = Some(path.to_string());
    }

    pub fn get(&self, path: &str) -> Option<Arc<Stream>> {
        self.streams.read().get(path).cloned()
    }

    pub fn resolve(&self, path: &str) -> Result<Arc<Stream>> {
        self.get(path)
            .or_else(|| {
                let default = self.default_path.read();
                default.as_ref().and_then(|p| self.get(p))
            })
            .ok_or_else(|| RtspError::StreamNotFound(path.to_string()))
    }

    pub fn unsubscribe_all(&self, session_id: &str) {
        for stream in self.streams.read().values() {
            stream.unsubscribe(session_id);
        }
    }

    pub fn remove(&self, path: &str) -> Option<Arc<Stream>> {
        self.streams.write().remove(path)
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new(512)
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

    #[tokio::test]
    async fn subscribe_and_publish_delivers_to_reader() {
        let stream = Stream::new("/s", sample_description(), 4);
        let mut reader = stream.subscribe("sess1");
        stream.publish(StreamPacket {
            media_index: 0,
            is_rtcp: false,
            payload: Arc::from(vec![1, 2, 3]),
        });
        let packet = reader.recv().await.unwrap();
        assert_eq!(&*packet.payload, &[1, 2, 3]);
    }

    #[test]
    fn full_queue_drops_reader() {
        let stream = Stream::new("/s", sample_description(), 1);
        let _reader = stream.subscribe("sess1");
        for _ in 0..5 {
            stream.publish(StreamPacket {
                media_index: 0,
                is_rtcp: false,
                payload: Arc::from(vec![0u8]),
            });
        }
        assert_eq!(stream.reader_count(), 0);
    }

    #[test]
    fn registry_resolves_default_fallback() {
        let registry = StreamRegistry::new(8);
        registry.add("/stream", sample_description());
        registry.set_default("/stream");
        assert!(registry.resolve("/unknown").is_ok());
    }

    #[test]
    fn registry_unknown_without_default_errors() {
        let registry = StreamRegistry::new(8);
        assert!(registry.resolve("/unknown").is_err());
    }

    #[test]
    fn unsubscribe_all_clears_every_stream() {
        let registry = StreamRegistry::new(8);
        let s1 = registry.add("/a", sample_description());
        let s2 = registry.add("/b", sample_description());
        let _r1 = s1.subscribe("sess1");
        let _r2 = s2.subscribe("sess1");
        registry.unsubscribe_all("sess1");
        assert_eq!(s1.reader_count(), 0);
        assert_eq!(s2.reader_count(), 0);
    }
}
