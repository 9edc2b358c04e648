//! TCP server loop and request dispatch

use anyhow::{Context, Result};
use bytes::Bytes;
use faildctl_proto::{ErrorCode, ErrorDetails, Frame, FrameCodec, Message, Request, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Port the controller expects agents on
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:9000";

/// Handler trait for processing requests
#[async_trait::async_trait]
pub trait Handler: Send + Sync {
    /// Handle a request and return a response
    async fn handle(&self, request: Request) -> Result<Response>;
}

/// Accepts controller connections and serves each on its own task.
pub struct AgentServer {
    listener: TcpListener,
    handler: Arc<dyn Handler>,
}

impl AgentServer {
    /// Bind the listening socket
    pub async fn bind(addr: impl ToSocketAddrs, handler: Arc<dyn Handler>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .context("Failed to bind agent listener")?;
        Ok(Self { listener, handler })
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!("Agent listening on {}", self.local_addr()?);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Received shutdown signal, stopping agent server");
                    break;
                }

                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("Failed to accept connection: {}", e);
                            continue;
                        }
                    };
                    info!("Controller connected from {}", peer);

                    let handler = Arc::clone(&self.handler);
                    let shutdown = shutdown.child_token();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = shutdown.cancelled() => {}
                            result = serve_connection(stream, handler) => {
                                if let Err(e) = result {
                                    error!("Connection from {} failed: {}", peer, e);
                                }
                            }
                        }
                        debug!("Connection from {} closed", peer);
                    });
                }
            }
        }

        Ok(())
    }
}

/// Serve one controller connection until it closes.
///
/// Requests are handled concurrently; responses are written back in
/// completion order on the same connection.
pub async fn serve_connection(stream: TcpStream, handler: Arc<dyn Handler>) -> Result<()> {
    stream.set_nodelay(true).ok();
    let (mut reader, writer) = stream.into_split();
    let writer = Arc::new(Mutex::new(writer));
    let mut codec = FrameCodec::new();

    while let Some(frame) = codec.read_frame(&mut reader).await? {
        if frame.is_error() {
            warn!("Received error frame: stream_id={}", frame.stream_id);
            continue;
        }

        let request = match Message::from_frame(&frame) {
            Ok(Message::Request(request)) => request,
            Ok(Message::Response(_)) => {
                warn!("Received unexpected response message on agent");
                continue;
            }
            Err(e) => {
                error!("Failed to deserialize message: {}", e);
                let details = ErrorDetails::new(ErrorCode::InvalidRequest, format!("Invalid message format: {}", e));
                send_error_frame(&*writer, frame.stream_id, details).await?;
                continue;
            }
        };

        let handler = Arc::clone(&handler);
        let writer = Arc::clone(&writer);
        let stream_id = frame.stream_id;
        tokio::spawn(async move {
            let response = dispatch(handler.as_ref(), request).await;
            if let Err(e) = send_response(&*writer, stream_id, response).await {
                error!("Failed to send response: {}", e);
            }
        });
    }

    Ok(())
}

/// Run `request` through `handler`, turning handler failures into error responses
pub async fn dispatch(handler: &dyn Handler, request: Request) -> Response {
    let request_id = request.id();
    debug!("Handling {} request {}", request.operation(), request_id);

    match handler.handle(request).await {
        Ok(response) => response,
        Err(e) => {
            error!("Handler error for request {}: {}", request_id, e);
            Response::error(
                request_id,
                ErrorDetails::new(ErrorCode::InternalError, format!("Handler error: {}", e)),
            )
        }
    }
}

async fn send_response<W>(writer: &Mutex<W>, stream_id: u32, response: Response) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = Message::Response(response)
        .to_frame(stream_id)
        .context("Failed to serialize response message")?;

    let mut writer = writer.lock().await;
    FrameCodec::new()
        .write_frame(&mut *writer, &frame)
        .await
        .context("Failed to write response frame")?;

    debug!("Sent response: stream_id={}", stream_id);
    Ok(())
}

async fn send_error_frame<W>(writer: &Mutex<W>, stream_id: u32, details: ErrorDetails) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let payload = rmp_serde::to_vec(&details).context("Failed to serialize error details")?;
    let frame = Frame::error(stream_id, Bytes::from(payload));

    let mut writer = writer.lock().await;
    FrameCodec::new()
        .write_frame(&mut *writer, &frame)
        .await
        .context("Failed to write error frame")?;
    Ok(())
}
