//! Wire codec for node-to-node messages
//!
//! Frame format: [LEN: u32 big-endian][BODY: bincode]
//!
//! A request body is a [`RequestEnvelope`]; the reply body is a
//! [`ResponseEnvelope`] carrying either the handler's payload or its error
//! message, so a failing handler never tears down the connection.

use crate::cluster::node::Node;
use crate::common::{Error, Result};
use crate::transport::Action;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub action: Action,
    pub sender: Node,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseEnvelope {
    Ok(Vec<u8>),
    Err(String),
}

pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Bytes> {
    Ok(Bytes::from(bincode::serialize(value)?))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

pub async fn write_frame<W>(writer: &mut W, body: &[u8], max_frame_bytes: usize) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if body.len() > max_frame_bytes {
        return Err(Error::FrameTooLarge {
            size: body.len(),
            max: max_frame_bytes,
        });
    }
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame; `None` on a clean end of stream.
pub async fn read_frame<R>(reader: &mut R, max_frame_bytes: usize) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > max_frame_bytes {
        return Err(Error::FrameTooLarge {
            size: len,
            max: max_frame_bytes,
        });
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}
