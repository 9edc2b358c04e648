//! RPC client for a single agent connection

use crate::{ControlError, Result};
use async_trait::async_trait;
use faildctl_proto::{ErrorCode, ErrorDetails, Frame, FrameCodec, Message, Request, Response, Stats, Status};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type PendingRequests = Arc<Mutex<HashMap<Uuid, oneshot::Sender<Response>>>>;

/// Depth of the outgoing request queue
const MAX_IN_FLIGHT: usize = 32;

/// Transport settings for agent connections
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Deadline for a single request, `None` waits forever
    pub request_timeout: Option<Duration>,
    /// Deadline for establishing the TCP connection
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(30)),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    /// Set the per-request deadline
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the connect deadline
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// The four operations an agent exposes
#[async_trait]
pub trait FaildRpc: Send + Sync {
    /// Assign `vip` to the agent's loopback interface
    async fn init(&self, vip: &str) -> Result<Status>;

    /// Plug the agent's interface into faild
    async fn start(&self) -> Result<Status>;

    /// Unplug the agent's interface from faild
    async fn stop(&self) -> Result<Status>;

    /// Fetch connection and faild statistics
    async fn get_statistics(&self) -> Result<Stats>;
}

/// Opens RPC connections to agents
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to the agent listening on `addr`
    async fn connect(&self, addr: &str) -> Result<Arc<dyn FaildRpc>>;
}

/// Connects to agents over TCP
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    config: ClientConfig,
}

impl TcpConnector {
    /// Create a connector with the given transport settings
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, addr: &str) -> Result<Arc<dyn FaildRpc>> {
        let client: Arc<dyn FaildRpc> = Arc::new(AgentClient::connect(addr, self.config.clone()).await?);
        Ok(client)
    }
}

/// Client side of one agent connection.
///
/// Requests are correlated with responses by id, so any number of calls can be
/// in flight at once. A background task owns the socket; it exits when the
/// client is dropped or the agent closes the connection, and every waiting
/// call then fails with [`ControlError::Transport`].
pub struct AgentClient {
    pending: PendingRequests,
    message_tx: mpsc::Sender<Message>,
    request_timeout: Option<Duration>,
}

impl AgentClient {
    /// Connect to an agent over TCP
    pub async fn connect(addr: &str, config: ClientConfig) -> Result<Self> {
        let stream = timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ControlError::Timeout { duration: config.connect_timeout })?
            .map_err(|e| ControlError::Connection(format!("Failed to connect to {}: {}", addr, e)))?;
        stream.set_nodelay(true)?;

        info!("Connected to agent at {}", addr);
        let (reader, writer) = stream.into_split();
        Ok(Self::from_parts(reader, writer, config))
    }

    /// Build a client over an already established byte stream
    pub fn from_parts<R, W>(reader: R, writer: W, config: ClientConfig) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (message_tx, message_rx) = mpsc::channel(MAX_IN_FLIGHT);
        let pending: PendingRequests = Arc::new(Mutex::new(HashMap::new()));

        let handler = ConnectionHandler {
            reader,
            writer,
            codec: FrameCodec::new(),
            message_rx,
            pending: pending.clone(),
            streams: HashMap::new(),
            next_stream_id: 1,
        };
        tokio::spawn(handler.run());

        Self {
            pending,
            message_tx,
            request_timeout: config.request_timeout,
        }
    }

    /// Send a request and wait for the matching response
    pub async fn call(&self, request: Request) -> Result<Response> {
        let request_id = request.id();
        let (response_tx, response_rx) = oneshot::channel();
        self.pending.lock().insert(request_id, response_tx);

        if self.message_tx.send(Message::Request(request)).await.is_err() {
            self.pending.lock().remove(&request_id);
            return Err(ControlError::Transport("Connection closed".to_string()));
        }

        let response = match self.request_timeout {
            Some(duration) => match timeout(duration, response_rx).await {
                Ok(response) => response,
                Err(_) => {
                    self.pending.lock().remove(&request_id);
                    return Err(ControlError::Timeout { duration });
                }
            },
            None => response_rx.await,
        };

        response.map_err(|_| ControlError::Transport("Connection closed before response".to_string()))
    }

    /// Number of requests still waiting for a response
    pub fn pending_requests(&self) -> usize {
        self.pending.lock().len()
    }

    async fn call_status(&self, request: Request) -> Result<Status> {
        match self.call(request).await? {
            Response::Status { status, .. } if status.is_success() => Ok(status),
            Response::Status { status, .. } => Err(ControlError::Rejected(status)),
            Response::Error { error, .. } => Err(ControlError::Agent(error.to_string())),
            Response::Stats { .. } => Err(ControlError::Protocol("Unexpected response type".to_string())),
        }
    }
}

#[async_trait]
impl FaildRpc for AgentClient {
    async fn init(&self, vip: &str) -> Result<Status> {
        self.call_status(Request::init(vip)).await
    }

    async fn start(&self) -> Result<Status> {
        self.call_status(Request::start()).await
    }

    async fn stop(&self) -> Result<Status> {
        self.call_status(Request::stop()).await
    }

    async fn get_statistics(&self) -> Result<Stats> {
        match self.call(Request::get_statistics()).await? {
            Response::Stats { stats, .. } => Ok(stats),
            Response::Error { error, .. } => Err(ControlError::Agent(error.to_string())),
            Response::Status { .. } => Err(ControlError::Protocol("Unexpected response type".to_string())),
        }
    }
}

/// Owns the socket: writes queued requests, routes incoming responses
struct ConnectionHandler<R, W> {
    reader: R,
    writer: W,
    codec: FrameCodec,
    message_rx: mpsc::Receiver<Message>,
    pending: PendingRequests,
    /// Request id per stream id, for routing error frames
    streams: HashMap<u32, Uuid>,
    next_stream_id: u32,
}

impl<R, W> ConnectionHandler<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    async fn run(self) {
        let Self {
            mut reader,
            mut writer,
            mut codec,
            mut message_rx,
            pending,
            mut streams,
            mut next_stream_id,
        } = self;

        loop {
            tokio::select! {
                message = message_rx.recv() => {
                    let Some(message) = message else {
                        debug!("Client dropped, closing connection");
                        break;
                    };

                    let stream_id = next_stream_id;
                    next_stream_id = next_stream_id.wrapping_add(1).max(1);
                    let request_id = message.request_id();

                    let written = match message.to_frame(stream_id) {
                        Ok(frame) => codec.write_frame(&mut writer, &frame).await,
                        Err(e) => Err(e),
                    };
                    match written {
                        Ok(()) => track_stream(&mut streams, &pending, stream_id, request_id),
                        Err(e) => {
                            error!("Failed to send request {}: {}", request_id, e);
                            pending.lock().remove(&request_id);
                            break;
                        }
                    }
                }

                frame = codec.read_frame(&mut reader) => {
                    match frame {
                        Ok(Some(frame)) => route_frame(frame, &pending, &mut streams),
                        Ok(None) => {
                            info!("Agent closed the connection");
                            break;
                        }
                        Err(e) => {
                            error!("Failed to read frame: {}", e);
                            break;
                        }
                    }
                }
            }
        }

        // Close first so no request can be queued after the pending map is drained.
        // Dropping the senders wakes every waiting caller with an error.
        message_rx.close();
        let abandoned = std::mem::take(&mut *pending.lock());
        if !abandoned.is_empty() {
            warn!("Dropping {} pending requests", abandoned.len());
        }
    }
}

/// Remember which request a stream carries and forget streams whose caller
/// stopped waiting before the agent answered
fn track_stream(streams: &mut HashMap<u32, Uuid>, pending: &PendingRequests, stream_id: u32, request_id: Uuid) {
    {
        let pending = pending.lock();
        streams.retain(|_, id| pending.contains_key(id));
    }
    streams.insert(stream_id, request_id);
}

fn route_frame(frame: Frame, pending: &PendingRequests, streams: &mut HashMap<u32, Uuid>) {
    debug!("Received frame: stream_id={}, len={}", frame.stream_id, frame.payload.len());
    let request_id = streams.remove(&frame.stream_id);

    let response = if frame.is_error() {
        let Some(request_id) = request_id else {
            warn!("Error frame for unknown stream {}", frame.stream_id);
            return;
        };
        let details = rmp_serde::from_slice::<ErrorDetails>(&frame.payload).unwrap_or_else(|e| {
            ErrorDetails::new(ErrorCode::InternalError, format!("Undecodable error frame: {}", e))
        });
        Response::error(request_id, details)
    } else {
        match Message::from_frame(&frame) {
            Ok(Message::Response(response)) => response,
            Ok(Message::Request(_)) => {
                warn!("Received unexpected request from agent");
                return;
            }
            Err(e) => {
                error!("Failed to deserialize message: {}", e);
                return;
            }
        }
    };

    let request_id = response.request_id();
    match pending.lock().remove(&request_id) {
        Some(sender) => {
            if sender.send(response).is_err() {
                debug!("Caller for request {} went away", request_id);
            }
        }
        None => warn!("Received response for unknown request: {}", request_id),
    }
}
