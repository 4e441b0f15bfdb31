use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use scratchfs_types::errno;
use scratchfs_types::{Result, Status};

use crate::error::NetError;
use crate::message::{MESSAGE_HEADER_SIZE, MessageHeader, ReplyEnvelope};
use crate::service::ServiceRegistry;

/// The RPC server: accepts connections and dispatches framed requests to
/// the registered services.
pub struct RpcServer {
    registry: Arc<ServiceRegistry>,
}

/// A running server. Owns the accept-loop task; shutting down (or dropping)
/// the handle stops accepting new connections.
pub struct ServerHandle {
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl ServerHandle {
    /// The address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections.
    pub fn shutdown(self) {
        self.accept_task.abort();
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

impl RpcServer {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self { registry }
    }

    /// Bind `addr` and start serving in a background task.
    pub async fn start(self, addr: &str) -> Result<ServerHandle> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Status::with_message(errno::EBUSY, format!("bind {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| Status::with_message(errno::EBUSY, e.to_string()))?;
        debug!(%local_addr, "rpc server listening");

        let registry = self.registry;
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let registry = Arc::clone(&registry);
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(stream, registry).await {
                                debug!(%peer, error = %e, "connection closed");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                    }
                }
            }
        });

        Ok(ServerHandle {
            local_addr,
            accept_task,
        })
    }
}

/// Serve framed requests on one connection until the peer hangs up.
async fn serve_connection(
    mut stream: TcpStream,
    registry: Arc<ServiceRegistry>,
) -> std::result::Result<(), NetError> {
    loop {
        let mut header_buf = [0u8; MESSAGE_HEADER_SIZE];
        match stream.read_exact(&mut header_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        let header = MessageHeader::from_bytes(&header_buf);
        header.validate_size()?;

        let mut payload = vec![0u8; header.size as usize];
        stream.read_exact(&mut payload).await?;
        header.validate(&payload)?;

        let envelope = dispatch(&registry, &payload).await;
        let reply = match bincode::serialize(&envelope) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "failed to serialize reply envelope");
                return Ok(());
            }
        };
        let reply_header = MessageHeader::for_payload(&reply);
        stream.write_all(&reply_header.to_bytes()).await?;
        stream.write_all(&reply).await?;
        stream.flush().await?;
    }
}

/// Decode the service/method prefix and run the handler.
async fn dispatch(registry: &ServiceRegistry, payload: &[u8]) -> ReplyEnvelope {
    if payload.len() < 4 {
        return ReplyEnvelope {
            err: errno::EINVAL,
            message: Some("request shorter than its service/method prefix".to_string()),
            payload: Vec::new(),
        };
    }
    let service_id = u16::from_le_bytes([payload[0], payload[1]]);
    let method_id = u16::from_le_bytes([payload[2], payload[3]]);
    let body = Bytes::copy_from_slice(&payload[4..]);

    let Some(service) = registry.get(service_id) else {
        return ReplyEnvelope {
            err: errno::EINVAL,
            message: Some(format!("no service with id {service_id}")),
            payload: Vec::new(),
        };
    };

    match service.handle(method_id, body).await {
        Ok(response) => ReplyEnvelope {
            err: 0,
            message: None,
            payload: response.to_vec(),
        },
        Err(status) => {
            warn!(
                service = service.service_name(),
                method_id,
                %status,
                "dispatch failed"
            );
            ReplyEnvelope {
                err: status.code(),
                message: status.message().map(str::to_string),
                payload: Vec::new(),
            }
        }
    }
}
