use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{Duration, timeout};

use scratchfs_types::config::RPC_TIMEOUT_MS;
use scratchfs_types::errno;
use scratchfs_types::{Result, Status};

use crate::error::NetError;
use crate::message::{MESSAGE_HEADER_SIZE, MessageHeader, ReplyEnvelope};

/// An RPC client that sends one framed request per call and waits for the
/// reply.
///
/// The request body layout is `[service_id: u16 LE][method_id: u16 LE]
/// [payload...]`. Any transport failure (connect, send, receive, frame
/// validation, soft timeout) surfaces as `EBUSY`; a dispatch failure
/// reported by the server surfaces with the server's code.
#[derive(Debug, Clone)]
pub struct RpcClient {
    timeout: Duration,
}

impl RpcClient {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_millis(RPC_TIMEOUT_MS),
        }
    }

    /// Override the soft per-call timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Send an RPC to `addr` (a `<host>:<port>` authority) and wait for the
    /// reply payload.
    pub async fn call(
        &self,
        addr: &str,
        service_id: u16,
        method_id: u16,
        request: Bytes,
    ) -> Result<Bytes> {
        let call = self.call_inner(addr, service_id, method_id, request);
        match timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(Status::with_message(
                errno::EBUSY,
                format!("rpc to {addr} timed out"),
            )),
        }
    }

    async fn call_inner(
        &self,
        addr: &str,
        service_id: u16,
        method_id: u16,
        request: Bytes,
    ) -> Result<Bytes> {
        let transport_err =
            |e: NetError| Status::with_message(errno::EBUSY, format!("rpc to {addr}: {e}"));

        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|e| transport_err(e.into()))?;

        // Build the body: service id + method id + request payload.
        let mut body = BytesMut::with_capacity(4 + request.len());
        body.put_u16_le(service_id);
        body.put_u16_le(method_id);
        body.extend_from_slice(&request);
        let body = body.freeze();

        let header = MessageHeader::for_payload(&body);
        stream
            .write_all(&header.to_bytes())
            .await
            .map_err(|e| transport_err(e.into()))?;
        stream
            .write_all(&body)
            .await
            .map_err(|e| transport_err(e.into()))?;
        stream.flush().await.map_err(|e| transport_err(e.into()))?;

        // Read the reply frame.
        let mut header_buf = [0u8; MESSAGE_HEADER_SIZE];
        stream
            .read_exact(&mut header_buf)
            .await
            .map_err(|e| transport_err(e.into()))?;
        let reply_header = MessageHeader::from_bytes(&header_buf);
        reply_header.validate_size().map_err(transport_err)?;

        let mut reply = vec![0u8; reply_header.size as usize];
        stream
            .read_exact(&mut reply)
            .await
            .map_err(|e| transport_err(e.into()))?;
        reply_header.validate(&reply).map_err(transport_err)?;

        let envelope: ReplyEnvelope = bincode::deserialize(&reply).map_err(|e| {
            Status::with_message(errno::EBUSY, format!("rpc to {addr}: bad reply frame: {e}"))
        })?;

        if envelope.err != 0 {
            return Err(match envelope.message {
                Some(msg) => Status::with_message(envelope.err, msg),
                None => Status::new(envelope.err),
            });
        }
        Ok(Bytes::from(envelope.payload))
    }
}

impl Default for RpcClient {
    fn default() -> Self {
        Self::new()
    }
}
