//! Wire codec for the libp2p request/response behaviour.
//!
//! Every postbox protocol shares one libp2p stream protocol. The request
//! frame names the postbox protocol id so the receiving node can route it
//! to the right handler; the response frame carries a status byte so a
//! failing handler surfaces as a remote error.

use std::io;

use async_trait::async_trait;
use futures::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use libp2p::request_response;
use libp2p::StreamProtocol;
use serde::{Deserialize, Serialize};

use postbox_shared::codec::LENGTH_PREFIX;
use postbox_shared::constants::MAX_BULK_FRAME;

/// The single stream protocol all postbox requests travel over.
pub const RPC_PROTOCOL: StreamProtocol = StreamProtocol::new("/postbox/rpc/1.0.0");

/// Largest request or response body accepted on the wire.
const MAX_RPC_FRAME: usize = MAX_BULK_FRAME + 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub protocol: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcStatus {
    Ok,
    Failed,
    NoHandler,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub status: RpcStatus,
    pub payload: Vec<u8>,
    pub error: String,
}

impl RpcResponse {
    pub fn ok(payload: Vec<u8>) -> Self {
        Self {
            status: RpcStatus::Ok,
            payload,
            error: String::new(),
        }
    }

    pub fn failed(payload: Vec<u8>, error: String) -> Self {
        Self {
            status: RpcStatus::Failed,
            payload,
            error,
        }
    }

    pub fn no_handler(protocol: &str) -> Self {
        Self {
            status: RpcStatus::NoHandler,
            payload: Vec::new(),
            error: protocol.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RpcCodec;

#[async_trait]
impl request_response::Codec for RpcCodec {
    type Protocol = StreamProtocol;
    type Request = RpcRequest;
    type Response = RpcResponse;

    async fn read_request<T>(&mut self, _: &StreamProtocol, io: &mut T) -> io::Result<RpcRequest>
    where
        T: AsyncRead + Unpin + Send,
    {
        let body = read_frame(io).await?;
        decode(&body)
    }

    async fn read_response<T>(
        &mut self,
        _: &StreamProtocol,
        io: &mut T,
    ) -> io::Result<RpcResponse>
    where
        T: AsyncRead + Unpin + Send,
    {
        let body = read_frame(io).await?;
        decode(&body)
    }

    async fn write_request<T>(
        &mut self,
        _: &StreamProtocol,
        io: &mut T,
        req: RpcRequest,
    ) -> io::Result<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        write_frame(io, &encode(&req)?).await
    }

    async fn write_response<T>(
        &mut self,
        _: &StreamProtocol,
        io: &mut T,
        res: RpcResponse,
    ) -> io::Result<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        write_frame(io, &encode(&res)?).await
    }
}

fn encode<V: Serialize>(value: &V) -> io::Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn decode<V: serde::de::DeserializeOwned>(body: &[u8]) -> io::Result<V> {
    bincode::deserialize(body).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

async fn read_frame<T>(io: &mut T) -> io::Result<Vec<u8>>
where
    T: AsyncRead + Unpin + Send,
{
    let mut prefix = [0u8; LENGTH_PREFIX];
    io.read_exact(&mut prefix).await?;
    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_RPC_FRAME {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds {MAX_RPC_FRAME}"),
        ));
    }

    let mut body = vec![0u8; len];
    io.read_exact(&mut body).await?;
    Ok(body)
}

async fn write_frame<T>(io: &mut T, body: &[u8]) -> io::Result<()>
where
    T: AsyncWrite + Unpin + Send,
{
    if body.len() > MAX_RPC_FRAME {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds {MAX_RPC_FRAME}", body.len()),
        ));
    }
    io.write_all(&(body.len() as u32).to_be_bytes()).await?;
    io.write_all(body).await?;
    io.close().await
}
