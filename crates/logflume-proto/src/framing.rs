//! Length-delimited message framing over reliable byte streams.
//!
//! Every wire message travels as one `u32`-length-prefixed frame carrying a
//! protobuf encoding. The ingestion stream is long-lived and bidirectional
//! (batches up, acks down), so [`split`] turns one TCP connection into an
//! independently owned read half and write half; the config channel uses a
//! single [`MessageStream`] for its request/response pair.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use prost::Message;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, FramedRead, FramedWrite, LengthDelimitedCodec};

/// Transport-level failure while sending or receiving a frame.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("transport i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed frame: {0}")]
    Decode(#[from] prost::DecodeError),
}

/// Bidirectional framed channel for request/response exchanges.
pub struct MessageStream<T> {
    inner: Framed<T, LengthDelimitedCodec>,
}

impl<T: AsyncRead + AsyncWrite + Unpin> MessageStream<T> {
    pub fn new(io: T) -> Self {
        Self {
            inner: Framed::new(io, LengthDelimitedCodec::new()),
        }
    }

    pub async fn send<M: Message>(&mut self, message: &M) -> Result<(), WireError> {
        self.inner.send(Bytes::from(message.encode_to_vec())).await?;
        Ok(())
    }

    /// Receives the next message, or `None` when the peer closed cleanly.
    pub async fn recv<M: Message + Default>(&mut self) -> Result<Option<M>, WireError> {
        match self.inner.next().await {
            Some(frame) => Ok(Some(M::decode(frame?.freeze())?)),
            None => Ok(None),
        }
    }
}

/// Write half of a split connection.
pub struct MessageSink<W> {
    inner: FramedWrite<W, LengthDelimitedCodec>,
}

impl<W: AsyncWrite + Unpin> MessageSink<W> {
    pub fn new(io: W) -> Self {
        Self {
            inner: FramedWrite::new(io, LengthDelimitedCodec::new()),
        }
    }

    pub async fn send<M: Message>(&mut self, message: &M) -> Result<(), WireError> {
        self.inner.send(Bytes::from(message.encode_to_vec())).await?;
        Ok(())
    }

    /// Flushes buffered frames and closes the write direction.
    pub async fn close(&mut self) -> Result<(), WireError> {
        self.inner.close().await?;
        Ok(())
    }
}

/// Read half of a split connection.
pub struct MessageSource<R> {
    inner: FramedRead<R, LengthDelimitedCodec>,
}

impl<R: AsyncRead + Unpin> MessageSource<R> {
    pub fn new(io: R) -> Self {
        Self {
            inner: FramedRead::new(io, LengthDelimitedCodec::new()),
        }
    }

    /// Receives the next message, or `None` when the peer closed cleanly.
    pub async fn recv<M: Message + Default>(&mut self) -> Result<Option<M>, WireError> {
        match self.inner.next().await {
            Some(frame) => Ok(Some(M::decode(frame?.freeze())?)),
            None => Ok(None),
        }
    }
}

/// Splits one TCP connection into independently owned framed halves, so a
/// writer task and an ack-reader task can run concurrently.
pub fn split(
    stream: TcpStream,
) -> (MessageSource<OwnedReadHalf>, MessageSink<OwnedWriteHalf>) {
    let (read, write) = stream.into_split();
    (MessageSource::new(read), MessageSink::new(write))
}
