//! TCP carrier: the RTSP control connection, and interleaved (`$`-framed)
//! RTP/RTCP when a session negotiates `RTP/AVP/TCP` (RFC 2326 §10.12).
//!
//! Grounded on the teacher's `transport::tcp::accept_loop`/`Connection`
//! (poll-based accept loop, one task per connection, session cleanup on
//! disconnect) but moved onto `tokio` so the accept loop is a cooperative
//! task rather than an OS thread per connection, and the per-connection
//! read loop is driven by [`crate::protocol::RtspCodec`] via
//! `tokio_util::codec::Framed` instead of `BufReader::read_line`, the way
//! `scottlamb`'s client wraps its `TcpStream` in `Framed<_, Codec>`.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::codec::Framed;

use crate::error::Result;
use crate::protocol::{Frame, RtspCodec};

/// A framed RTSP control connection, capable of carrying both text messages
/// and interleaved binary frames once SETUP negotiates TCP transport.
pub struct TcpCarrier {
    framed: Framed<TcpStream, RtspCodec>,
    pub peer_addr: SocketAddr,
}

impl TcpCarrier {
    pub fn new(stream: TcpStream, peer_addr: SocketAddr) -> Self {
        TcpCarrier {
            framed: Framed::new(stream, RtspCodec::default()),
            peer_addr,
        }
    }

    pub async fn recv(&mut self) -> Option<Result<Frame>> {
        self.framed.next().await
    }

    pub async fn send_message(&mut self, text: String) -> Result<()> {
        self.framed.send(Frame::Message(text)).await
    }

    pub async fn send_interleaved(&mut self, channel: u8, payload: Vec<u8>) -> Result<()> {
        self.framed.send(Frame::Interleaved { channel, payload }).await
    }

    /// Split into independent read/write halves so a delivery task can
    /// write interleaved frames (RFC 2326 §10.12) concurrently with the
    /// connection's own request-handling read loop, the way
    /// `Framed`'s `Sink`/`Stream` halves are meant to be driven from
    /// separate tasks.
    pub fn split(self) -> (TcpCarrierReader, TcpCarrierWriter) {
        let (sink, stream) = self.framed.split();
        (
            TcpCarrierReader { inner: stream },
            TcpCarrierWriter { inner: sink },
        )
    }
}

/// Read half of a split [`TcpCarrier`].
pub struct TcpCarrierReader {
    inner: SplitStream<Framed<TcpStream, RtspCodec>>,
}

impl TcpCarrierReader {
    pub async fn recv(&mut self) -> Option<Result<Frame>> {
        self.inner.next().await
    }
}

/// Write half of a split [`TcpCarrier`]. Typically wrapped in an
/// `Arc<tokio::sync::Mutex<_>>` so both the connection's response path and
/// an interleaved-delivery task can serialize writes onto the same socket.
pub struct TcpCarrierWriter {
    inner: SplitSink<Framed<TcpStream, RtspCodec>, Frame>,
}

impl TcpCarrierWriter {
    pub async fn send_message(&mut self, text: String) -> Result<()> {
        self.inner.send(Frame::Message(text)).await
    }

    pub async fn send_interleaved(&mut self, channel: u8, payload: Vec<u8>) -> Result<()> {
        self.inner.send(Frame::Interleaved { channel, payload }).await
    }
}

/// Accept loop for the RTSP control port. `on_connect` is spawned as its
/// own task per accepted connection; `shutdown` lets
/// [`crate::server::Server::stop`] end the loop without dropping
/// in-flight connections mid-response.
pub async fn accept_loop<F, Fut>(
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
    on_connect: Arc<F>,
) where
    F: Fn(TcpCarrier) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::debug!("TCP accept loop shutting down");
                    break;
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer_addr)) => {
                        tracing::info!(%peer_addr, "client connected");
                        let carrier = TcpCarrier::new(stream, peer_addr);
                        let handler = on_connect.clone();
                        tokio::spawn(async move {
                            handler(carrier).await;
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "TCP accept error");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn accept_loop_dispatches_connections_and_stops_on_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = watch::channel(false);
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let handle = tokio::spawn(accept_loop(
            listener,
            rx,
            Arc::new(move |_carrier: TcpCarrier| {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }),
        ));

        let _ = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        let _ = tokio::time::timeout(std::time::Duration::from_secs(1), handle).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
