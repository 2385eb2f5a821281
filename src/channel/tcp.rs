//! Framed TCP channel and the echo server it talks to.
//!
//! Every frame is a little-endian `u32` length followed by a bincode payload.

use super::{Channel, RequestOptions, Response};
use crate::error::{CallError, DispatchError};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

/// Frames larger than this are treated as a protocol violation
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireRequest {
    id: u64,
    endpoint: String,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireResponse {
    id: u64,
    ok: bool,
    body: Vec<u8>,
    error: Option<String>,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Response, CallError>>>>>;

/// Read one length-prefixed bincode frame
async fn read_frame<R, T>(reader: &mut R) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let frame_len = u32::from_le_bytes(len_bytes) as usize;

    if frame_len > MAX_FRAME_LEN {
        return Err(anyhow!("Frame too large: {} bytes", frame_len));
    }

    let mut data = vec![0u8; frame_len];
    reader.read_exact(&mut data).await?;
    Ok(bincode::deserialize(&data)?)
}

/// Write one length-prefixed bincode frame
async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = bincode::serialize(value)?;
    let len = u32::try_from(bytes.len()).context("frame length exceeds u32")?;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

fn lock_pending(
    pending: &PendingMap,
) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Result<Response, CallError>>>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Fail every outstanding call with a connection error
fn fail_pending(pending: &PendingMap, reason: &str) {
    let drained: Vec<_> = lock_pending(pending).drain().collect();
    for (_, tx) in drained {
        let _ = tx.send(Err(CallError::Connection(reason.to_string())));
    }
}

/// Removes a call's pending entry if the caller gives up before the response
/// arrives (for example when its timeout fires).
struct PendingGuard {
    id: u64,
    pending: PendingMap,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        lock_pending(&self.pending).remove(&self.id);
    }
}

/// TCP channel multiplexing concurrent requests over one connection.
///
/// Requests are queued to a writer task; a reader task matches responses to
/// callers by request id, so responses may arrive in any order.
pub struct TcpChannel {
    name: String,
    peer: SocketAddr,
    outbound: mpsc::UnboundedSender<WireRequest>,
    pending: PendingMap,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
}

impl TcpChannel {
    /// Connect to `addr` and start the connection's reader and writer tasks
    pub async fn connect<A: ToSocketAddrs>(name: impl Into<String>, addr: A) -> Result<Self> {
        let name = name.into();
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("Failed to connect channel '{}'", name))?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let (mut read_half, mut write_half) = stream.into_split();

        let (outbound, mut queue) = mpsc::unbounded_channel::<WireRequest>();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        {
            let pending = pending.clone();
            let closed = closed.clone();
            let name = name.clone();
            tokio::spawn(async move {
                while let Some(request) = queue.recv().await {
                    let id = request.id;
                    if let Err(e) = write_frame(&mut write_half, &request).await {
                        warn!("Channel '{}' write failed: {}", name, e);
                        closed.store(true, Ordering::Release);
                        let waiter = lock_pending(&pending).remove(&id);
                        if let Some(tx) = waiter {
                            let _ = tx.send(Err(CallError::Connection(e.to_string())));
                        }
                        break;
                    }
                }
                debug!("Channel '{}' writer stopped", name);
            });
        }

        {
            let pending = pending.clone();
            let closed = closed.clone();
            let name = name.clone();
            tokio::spawn(async move {
                let reason = loop {
                    match read_frame::<_, WireResponse>(&mut read_half).await {
                        Ok(response) => {
                            if let Some(error) = &response.error {
                                debug!(
                                    "Channel '{}' request {} failed remotely: {}",
                                    name, response.id, error
                                );
                            }
                            let waiter = lock_pending(&pending).remove(&response.id);
                            match waiter {
                                Some(tx) => {
                                    let _ = tx.send(Ok(Response {
                                        ok: response.ok,
                                        body: response.body,
                                    }));
                                }
                                None => debug!(
                                    "Channel '{}' dropping late response {}",
                                    name, response.id
                                ),
                            }
                        }
                        Err(e) => break e.to_string(),
                    }
                };
                debug!("Channel '{}' closed: {}", name, reason);
                closed.store(true, Ordering::Release);
                fail_pending(&pending, &reason);
            });
        }

        debug!("Channel '{}' connected to {}", name, peer);
        Ok(Self {
            name,
            peer,
            outbound,
            pending,
            next_id: AtomicU64::new(1),
            closed,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Channel for TcpChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn check_dispatch(&self) -> Result<(), DispatchError> {
        if self.is_closed() {
            return Err(DispatchError::ChannelClosed(self.name.clone()));
        }
        Ok(())
    }

    async fn send(&self, options: &RequestOptions) -> Result<Response, CallError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            // The reader marks the channel closed before draining the pending
            // map, so a call registered under the lock is always drained.
            let mut pending = lock_pending(&self.pending);
            if self.is_closed() {
                return Err(CallError::Connection("connection closed".to_string()));
            }
            pending.insert(id, tx);
        }
        let _guard = PendingGuard {
            id,
            pending: self.pending.clone(),
        };

        let request = WireRequest {
            id,
            endpoint: options.endpoint.clone(),
            headers: options.headers.clone(),
            body: options.body.clone(),
        };
        self.outbound
            .send(request)
            .map_err(|_| CallError::Connection("writer task stopped".to_string()))?;

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(CallError::Connection("connection dropped".to_string())),
        }
    }
}

/// Accept connections and answer every request from the built-in endpoints:
/// `echo` returns the request body, `health` returns "OK", anything else is
/// answered with `ok == false`.
pub async fn serve_echo(listener: TcpListener) -> Result<()> {
    let local = listener.local_addr()?;
    debug!("Echo server listening on {}", local);

    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .context("Failed to accept connection")?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream).await {
                debug!("Connection from {} ended: {}", peer, e);
            }
        });
    }
}

async fn handle_connection(stream: TcpStream) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    loop {
        let request: WireRequest = read_frame(&mut reader).await?;
        let response = match request.endpoint.as_str() {
            "echo" => WireResponse {
                id: request.id,
                ok: true,
                body: request.body,
                error: None,
            },
            "health" => WireResponse {
                id: request.id,
                ok: true,
                body: b"OK".to_vec(),
                error: None,
            },
            other => WireResponse {
                id: request.id,
                ok: false,
                body: Vec::new(),
                error: Some(format!("no such endpoint: {}", other)),
            },
        };
        if let Err(e) = write_frame(&mut writer, &response).await {
            error!("Failed to write response {}: {}", response.id, e);
            return Err(e);
        }
    }
}
