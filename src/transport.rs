//! One logical, bidirectional connection carrying JSON objects.
//!
//! Over a byte stream each frame is a 4-byte big-endian length followed by
//! that many bytes of UTF-8 JSON. Delivery order says nothing about
//! completion order; correlation happens a layer up.

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::BridgeError;

/// Frames larger than this are refused in both directions.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Sending half of a connection. Cheap to clone.
#[derive(Clone, Debug)]
pub struct FrameSender {
    tx: mpsc::UnboundedSender<Value>,
}

impl FrameSender {
    pub fn send(&self, frame: Value) -> Result<(), BridgeError> {
        self.tx.send(frame).map_err(|_| BridgeError::Disconnected)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A connection: frames go out through `sender`, arrive on `inbound`.
/// `inbound` yields `None` once the peer is gone.
#[derive(Debug)]
pub struct Connection {
    pub sender: FrameSender,
    pub inbound: mpsc::UnboundedReceiver<Value>,
}

impl Connection {
    /// Two connected in-memory endpoints, for tests and the in-process demo host.
    pub fn memory_pair() -> (Connection, Connection) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            Connection {
                sender: FrameSender { tx: a_tx },
                inbound: b_rx,
            },
            Connection {
                sender: FrameSender { tx: b_tx },
                inbound: a_rx,
            },
        )
    }

    /// Wrap a byte stream (TCP socket, pipe) in framing tasks. The reader task
    /// ends on EOF or a framing error. The writer task skips frames it cannot
    /// encode and ends on an I/O error or once every sender is dropped.
    pub fn from_stream<S>(stream: S, label: &str) -> Connection
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Value>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Value>();

        let read_label = label.to_string();
        tokio::spawn(async move {
            loop {
                match read_frame(&mut reader).await {
                    Ok(Some(frame)) => {
                        if in_tx.send(frame).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!(peer = %read_label, "connection closed by peer");
                        break;
                    }
                    Err(FrameError::Json(e)) => {
                        warn!(peer = %read_label, error = %e, "dropping frame that is not valid JSON");
                    }
                    Err(e) => {
                        warn!(peer = %read_label, error = %e, "connection read failed");
                        break;
                    }
                }
            }
        });

        let write_label = label.to_string();
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                match write_frame(&mut writer, &frame).await {
                    Ok(()) => {}
                    // Nothing reached the stream; later frames still can.
                    Err(e @ (FrameError::TooLarge(_) | FrameError::Json(_))) => {
                        warn!(peer = %write_label, error = %e, "dropping frame that cannot be sent");
                    }
                    Err(e) => {
                        warn!(peer = %write_label, error = %e, "connection write failed");
                        break;
                    }
                }
            }
            let _ = writer.shutdown().await;
        });

        Connection {
            sender: FrameSender { tx: out_tx },
            inbound: in_rx,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame of {0} bytes exceeds limit")]
    TooLarge(usize),
}

impl From<FrameError> for BridgeError {
    fn from(e: FrameError) -> Self {
        BridgeError::Channel {
            message: e.to_string(),
        }
    }
}

/// Write one length-prefixed JSON frame.
pub async fn write_frame<W>(writer: &mut W, frame: &Value) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = serde_json::to_vec(frame)?;
    if bytes.len() > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(bytes.len()));
    }
    let len = u32::try_from(bytes.len()).map_err(|_| FrameError::TooLarge(bytes.len()))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed JSON frame. `Ok(None)` on a clean EOF between frames.
/// A body that is not JSON is consumed in full before the error is returned,
/// so the stream stays aligned on frame boundaries.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Value>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(len));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(serde_json::from_slice(&body)?))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn frames_cross_a_duplex_stream() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, &json!({ "type": "notify", "message": "hi" }))
            .await
            .unwrap();
        write_frame(&mut a, &json!({ "type": "close-plugin" })).await.unwrap();
        drop(a);

        let first = read_frame(&mut b).await.unwrap().unwrap();
        assert_eq!(first["message"], "hi");
        let second = read_frame(&mut b).await.unwrap().unwrap();
        assert_eq!(second["type"], "close-plugin");
        assert!(read_frame(&mut b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_json_keeps_stream_aligned() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let garbage = b"not json";
        a.write_all(&(garbage.len() as u32).to_be_bytes()).await.unwrap();
        a.write_all(garbage).await.unwrap();
        write_frame(&mut a, &json!({ "ok": true })).await.unwrap();
        drop(a);

        assert!(matches!(read_frame(&mut b).await, Err(FrameError::Json(_))));
        let next = read_frame(&mut b).await.unwrap().unwrap();
        assert_eq!(next["ok"], true);
    }

    #[tokio::test]
    async fn oversized_length_is_refused() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&u32::MAX.to_be_bytes()).await.unwrap();
        assert!(matches!(read_frame(&mut b).await, Err(FrameError::TooLarge(_))));
    }

    #[tokio::test]
    async fn stream_connection_round_trip() {
        let (a, b) = tokio::io::duplex(4096);
        let mut left = Connection::from_stream(a, "left");
        let mut right = Connection::from_stream(b, "right");

        left.sender.send(json!({ "type": "notify", "message": "ping" })).unwrap();
        let got = right.inbound.recv().await.unwrap();
        assert_eq!(got["message"], "ping");

        right.sender.send(json!({ "type": "notify", "message": "pong" })).unwrap();
        let got = left.inbound.recv().await.unwrap();
        assert_eq!(got["message"], "pong");
    }

    #[tokio::test]
    async fn oversized_outbound_frame_is_skipped() {
        let (a, b) = tokio::io::duplex(4096);
        let left = Connection::from_stream(a, "left");
        let mut right = Connection::from_stream(b, "right");

        let huge = "x".repeat(MAX_FRAME_LEN + 1);
        left.sender.send(json!({ "type": "notify", "message": huge })).unwrap();
        left.sender.send(json!({ "type": "notify", "message": "after" })).unwrap();

        let got = right.inbound.recv().await.unwrap();
        assert_eq!(got["message"], "after");
        assert!(!left.sender.is_closed());
    }

    #[tokio::test]
    async fn memory_pair_reports_peer_gone() {
        let (left, right) = Connection::memory_pair();
        let Connection { sender, mut inbound } = right;
        drop(left);
        assert!(inbound.recv().await.is_none());
        assert!(sender.send(json!({})).is_err());
    }
}
