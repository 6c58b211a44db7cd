//! Runtime wire protocol: length-prefixed SBOR frames over a unix stream.
//!
//! # Wire format
//!
//! ```text
//! [4-byte big-endian length][SBOR-encoded Frame { id, body }]
//! ```
//!
//! Every frame carries a correlation id so responses can be matched to
//! requests regardless of completion order.

use peridot_types::{Block, ComputedBatch, Hash, Namespace, RawBatch, Version};
use sbor::prelude::*;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame size, shared by both directions.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16 MiB

/// Information about the host environment, sent during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct HostInfo {
    /// The runtime namespace this host serves.
    pub runtime_id: Namespace,
}

/// A protocol message body.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub enum Body {
    /// Handshake request from the host.
    InitHostRequest { host_info: HostInfo },
    /// Handshake response carrying the version the runtime reports.
    InitHostResponse { version: Version },
    /// Execute a transaction batch against the given block.
    ExecuteBatchRequest {
        io_root: Hash,
        inputs: RawBatch,
        block: Block,
    },
    /// Result of batch execution.
    ExecuteBatchResponse { batch: ComputedBatch },
    /// Interrupt whatever the runtime is doing.
    AbortRequest,
    /// The runtime acknowledged the abort.
    AbortResponse,
    /// The runtime failed to service a request.
    Error { message: String },
}

/// A correlated protocol frame.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Frame {
    /// Correlation id matching a response to its request.
    pub id: u64,
    /// The message body.
    pub body: Body,
}

/// Errors from the wire protocol and connection layers.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("protocol I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("frame codec error")]
    Codec,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("unexpected response body")]
    UnexpectedResponse,

    #[error("request timed out")]
    Timeout,

    #[error("runtime error: {0}")]
    Remote(String),
}

/// Encode `frame` and write it as a length-prefixed message.
pub(crate) async fn write_frame<S: AsyncWrite + Unpin>(
    stream: &mut S,
    frame: &Frame,
) -> Result<(), ProtocolError> {
    let encoded = basic_encode(frame).map_err(|_| ProtocolError::Codec)?;
    if encoded.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(encoded.len()));
    }

    let len = encoded.len() as u32;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(&encoded).await?;
    stream.flush().await?;
    Ok(())
}

/// Read a length-prefixed frame and decode it.
pub(crate) async fn read_frame<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Frame, ProtocolError> {
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes) as usize;

    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(len));
    }

    let mut data = vec![0u8; len];
    stream.read_exact(&mut data).await?;

    basic_decode(&data).map_err(|_| ProtocolError::Codec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let frame = Frame {
            id: 7,
            body: Body::InitHostRequest {
                host_info: HostInfo {
                    runtime_id: Namespace::from_raw([5; 32]),
                },
            },
        };

        let mut buf = Vec::new();
        write_frame(&mut buf, &frame).await.unwrap();

        let decoded = read_frame(&mut buf.as_slice()).await.unwrap();
        assert_eq!(decoded, frame);
    }

    #[tokio::test]
    async fn test_read_frame_rejects_oversized_length() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_SIZE as u32 + 1).to_be_bytes());

        match read_frame(&mut buf.as_slice()).await {
            Err(ProtocolError::FrameTooLarge(_)) => {}
            other => panic!("expected FrameTooLarge, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_frame_truncated_input() {
        let frame = Frame {
            id: 1,
            body: Body::AbortRequest,
        };
        let mut buf = Vec::new();
        write_frame(&mut buf, &frame).await.unwrap();
        buf.truncate(buf.len() - 1);

        assert!(matches!(
            read_frame(&mut buf.as_slice()).await,
            Err(ProtocolError::Io(_))
        ));
    }
}
