//! Point-to-point delivery of length-delimited frames over TCP
//!
//! A [`FrameServer`] accepts connections from any number of peers and merges all frames it
//! receives into one stream. A [`FrameSender`] keeps one outgoing connection per destination
//! and writes frames to it, one writer at a time.

use crate::library::{BoxedError, EmptyResult};
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::{debug, instrument, trace, warn};

/// Default upper bound for the size of a single frame (32 MiB)
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 32 * 1024 * 1024;

const INBOUND_QUEUE_SIZE: usize = 256;

/// Errors specific to frame delivery
#[derive(Error, Debug)]
pub enum FrameError {
    /// Establishing the connection took longer than permitted
    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),
    /// The accept loop terminated
    #[error("frame server stopped accepting connections")]
    ServerClosed,
}

fn codec(max_frame_length: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(max_frame_length)
        .new_codec()
}

/// Aborts the wrapped task when dropped
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Listening socket that yields every frame received from any peer
pub struct FrameServer {
    listener: TcpListener,
    max_frame_length: usize,
}

impl FrameServer {
    /// Binds to the given address
    pub async fn bind(address: &str, max_frame_length: usize) -> io::Result<Self> {
        let listener = TcpListener::bind(address).await?;

        Ok(Self {
            listener,
            max_frame_length,
        })
    }

    /// Address the server is actually bound to
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Starts accepting connections and returns a stream of all received frames
    ///
    /// Connections are served until the stream is dropped. Frames from one connection are
    /// yielded in the order they were sent; no order is imposed across connections.
    pub fn into_stream(self) -> BoxStream<'static, Result<Vec<u8>, BoxedError>> {
        let (tx, rx) = mpsc::channel(INBOUND_QUEUE_SIZE);
        let accept_loop = tokio::spawn(accept_connections(
            self.listener,
            self.max_frame_length,
            tx,
        ));

        stream::unfold(
            (rx, AbortOnDrop(accept_loop)),
            |(mut rx, guard)| async move { rx.recv().await.map(|frame| (frame, (rx, guard))) },
        )
        .boxed()
    }
}

async fn accept_connections(
    listener: TcpListener,
    max_frame_length: usize,
    tx: mpsc::Sender<Result<Vec<u8>, BoxedError>>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(%peer, "Accepted frame connection");
                tokio::spawn(read_frames(stream, peer, max_frame_length, tx.clone()));
            }
            Err(e) => {
                warn!(?e, "Failed to accept frame connection");
                tx.send(Err(FrameError::ServerClosed.into())).await.ok();
                break;
            }
        }
    }
}

async fn read_frames(
    stream: TcpStream,
    peer: SocketAddr,
    max_frame_length: usize,
    tx: mpsc::Sender<Result<Vec<u8>, BoxedError>>,
) {
    let mut frames = FramedRead::new(stream, codec(max_frame_length));

    while let Some(frame) = frames.next().await {
        match frame {
            Ok(frame) => {
                trace!(%peer, size = frame.len(), "Received frame");
                if tx.send(Ok(frame.to_vec())).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                // A broken connection only affects frames from this peer
                warn!(%peer, ?e, "Dropping frame connection");
                break;
            }
        }
    }

    debug!(%peer, "Frame connection closed");
}

/// Writes frames to remote [`FrameServer`] instances
pub struct FrameSender {
    connections: Mutex<HashMap<String, FramedWrite<TcpStream, LengthDelimitedCodec>>>,
    max_frame_length: usize,
    connect_timeout: Duration,
}

impl FrameSender {
    /// Creates a new sender without opening any connections
    pub fn new(max_frame_length: usize, connect_timeout: Duration) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            max_frame_length,
            connect_timeout,
        }
    }

    async fn connect(
        &self,
        address: &str,
    ) -> Result<FramedWrite<TcpStream, LengthDelimitedCodec>, BoxedError> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| FrameError::ConnectTimeout(address.to_string()))??;

        stream.set_nodelay(true)?;

        Ok(FramedWrite::new(stream, codec(self.max_frame_length)))
    }

    /// Sends one frame to the server at `address`, connecting first if necessary
    ///
    /// A cached connection that turns out to be broken is replaced once before giving up.
    #[instrument(skip(self, payload), fields(size = payload.len()))]
    pub async fn send(&self, address: &str, payload: &[u8]) -> EmptyResult {
        let mut connections = self.connections.lock().await;
        let frame = Bytes::copy_from_slice(payload);

        if let Some(connection) = connections.get_mut(address) {
            match connection.send(frame.clone()).await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    debug!(?e, "Cached frame connection broken, reconnecting");
                    connections.remove(address);
                }
            }
        }

        let mut connection = self.connect(address).await?;
        connection.send(frame).await?;
        connections.insert(address.to_string(), connection);

        Ok(())
    }

    /// Closes all open connections
    pub async fn close(&self) {
        self.connections.lock().await.clear();
    }
}
