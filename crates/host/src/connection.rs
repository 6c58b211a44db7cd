//! Framed request/response connection to a runtime process.
//!
//! A [`Connection`] multiplexes concurrent calls over one unix stream. Each
//! request is assigned a correlation id and parked in a pending map; a reader
//! task routes responses back by id. Any I/O error tears the connection down:
//! in-flight and subsequent calls all fail with
//! [`ProtocolError::ConnectionClosed`] until a new connection is established.

use crate::protocol::{read_frame, write_frame, Body, Frame, HostInfo, ProtocolError};
use peridot_types::Version;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type PendingMap = HashMap<u64, oneshot::Sender<Body>>;

struct Shared {
    next_id: AtomicU64,
    /// `None` once the connection is closed; dropping the parked senders
    /// fails every in-flight call.
    pending: parking_lot::Mutex<Option<PendingMap>>,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
}

impl Shared {
    fn register(&self, id: u64) -> Result<oneshot::Receiver<Body>, ProtocolError> {
        let (tx, rx) = oneshot::channel();
        match &mut *self.pending.lock() {
            Some(map) => {
                map.insert(id, tx);
                Ok(rx)
            }
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    fn complete(&self, id: u64, body: Body) {
        let sender = match &mut *self.pending.lock() {
            Some(map) => map.remove(&id),
            None => None,
        };
        match sender {
            Some(tx) => {
                let _ = tx.send(body);
            }
            None => debug!(id, "response for unknown or abandoned request"),
        }
    }

    /// Drop the pending map, failing all in-flight calls.
    fn fail_pending(&self) {
        self.pending.lock().take();
    }
}

/// A framed RPC connection over a unix stream socket.
pub struct Connection {
    shared: Arc<Shared>,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Wrap an accepted stream and spawn the reader task.
    pub fn new(stream: UnixStream) -> Self {
        let (read_half, write_half) = stream.into_split();

        let shared = Arc::new(Shared {
            next_id: AtomicU64::new(1),
            pending: parking_lot::Mutex::new(Some(HashMap::new())),
            writer: tokio::sync::Mutex::new(write_half),
        });

        let reader = tokio::spawn(reader_loop(read_half, shared.clone()));

        Self {
            shared,
            reader: parking_lot::Mutex::new(Some(reader)),
        }
    }

    /// Perform the initial handshake, returning the version the runtime
    /// reports.
    pub async fn init_host(
        &self,
        host_info: &HostInfo,
        timeout: Duration,
    ) -> Result<Version, ProtocolError> {
        let request = Body::InitHostRequest {
            host_info: host_info.clone(),
        };
        let response = tokio::time::timeout(timeout, self.call(request))
            .await
            .map_err(|_| ProtocolError::Timeout)??;

        match response {
            Body::InitHostResponse { version } => Ok(version),
            _ => Err(ProtocolError::UnexpectedResponse),
        }
    }

    /// Send a request and wait for the correlated response.
    ///
    /// Thread-safe; may be called concurrently. May suspend for as long as
    /// the runtime takes to process the request, so callers must not hold
    /// shared locks across it.
    pub async fn call(&self, body: Body) -> Result<Body, ProtocolError> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let rx = self.shared.register(id)?;

        let frame = Frame { id, body };
        {
            let mut writer = self.shared.writer.lock().await;
            if let Err(err) = write_frame(&mut *writer, &frame).await {
                self.shared.fail_pending();
                return Err(err);
            }
        }

        match rx.await {
            Ok(Body::Error { message }) => Err(ProtocolError::Remote(message)),
            Ok(response) => Ok(response),
            Err(_) => Err(ProtocolError::ConnectionClosed),
        }
    }

    /// Tear down the reader task and close the socket.
    pub async fn close(&self) {
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
        self.shared.fail_pending();

        let mut writer = self.shared.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
        self.shared.fail_pending();
    }
}

async fn reader_loop(mut read_half: OwnedReadHalf, shared: Arc<Shared>) {
    loop {
        match read_frame(&mut read_half).await {
            Ok(frame) => shared.complete(frame.id, frame.body),
            Err(err) => {
                warn!(err = %err, "runtime connection reader failed");
                shared.fail_pending();
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peridot_types::Namespace;

    /// Serve one scripted response on the runtime side of the socket.
    async fn respond_once(stream: &mut UnixStream, respond: impl FnOnce(Body) -> Body) {
        let frame = read_frame(stream).await.unwrap();
        let response = Frame {
            id: frame.id,
            body: respond(frame.body),
        };
        write_frame(stream, &response).await.unwrap();
    }

    #[tokio::test]
    async fn test_init_host_handshake() {
        let (host_side, mut runtime_side) = UnixStream::pair().unwrap();
        let conn = Connection::new(host_side);

        let server = tokio::spawn(async move {
            respond_once(&mut runtime_side, |body| {
                assert!(matches!(body, Body::InitHostRequest { .. }));
                Body::InitHostResponse {
                    version: Version::new(1, 2, 3),
                }
            })
            .await;
            runtime_side
        });

        let host_info = HostInfo {
            runtime_id: Namespace::from_raw([1; 32]),
        };
        let version = conn
            .init_host(&host_info, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(version, Version::new(1, 2, 3));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_calls_correlate() {
        let (host_side, mut runtime_side) = UnixStream::pair().unwrap();
        let conn = Arc::new(Connection::new(host_side));

        // Read both requests, answer them in reverse order.
        let server = tokio::spawn(async move {
            let first = read_frame(&mut runtime_side).await.unwrap();
            let second = read_frame(&mut runtime_side).await.unwrap();
            for frame in [second, first] {
                let response = Frame {
                    id: frame.id,
                    body: Body::AbortResponse,
                };
                write_frame(&mut runtime_side, &response).await.unwrap();
            }
            runtime_side
        });

        let c1 = conn.clone();
        let c2 = conn.clone();
        let (r1, r2) = tokio::join!(
            c1.call(Body::AbortRequest),
            c2.call(Body::AbortRequest)
        );
        assert!(matches!(r1.unwrap(), Body::AbortResponse));
        assert!(matches!(r2.unwrap(), Body::AbortResponse));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_remote_error_surfaces() {
        let (host_side, mut runtime_side) = UnixStream::pair().unwrap();
        let conn = Connection::new(host_side);

        tokio::spawn(async move {
            respond_once(&mut runtime_side, |_| Body::Error {
                message: "batch too large".into(),
            })
            .await;
            // Keep the runtime side open until the test finishes.
            tokio::time::sleep(Duration::from_secs(1)).await;
        });

        match conn.call(Body::AbortRequest).await {
            Err(ProtocolError::Remote(message)) => assert_eq!(message, "batch too large"),
            other => panic!("expected remote error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_peer_disconnect_fails_in_flight_and_later_calls() {
        let (host_side, mut runtime_side) = UnixStream::pair().unwrap();
        let conn = Connection::new(host_side);

        // The runtime side reads the request and dies without responding.
        tokio::spawn(async move {
            let _ = read_frame(&mut runtime_side).await;
            drop(runtime_side);
        });

        assert!(matches!(
            conn.call(Body::AbortRequest).await,
            Err(ProtocolError::ConnectionClosed)
        ));
        // Subsequent calls keep failing the same way.
        assert!(matches!(
            conn.call(Body::AbortRequest).await,
            Err(ProtocolError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_init_host_timeout() {
        let (host_side, _runtime_side) = UnixStream::pair().unwrap();
        let conn = Connection::new(host_side);

        let host_info = HostInfo {
            runtime_id: Namespace::from_raw([1; 32]),
        };
        let started = std::time::Instant::now();
        let result = conn
            .init_host(&host_info, Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(ProtocolError::Timeout)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
