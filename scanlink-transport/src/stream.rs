//! Link over any tokio byte stream

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tracing::{debug, trace};

use crate::{error::*, Link, LinkReader, LinkWriter};

const READ_CAPACITY: usize = 2048;

/// Link backed by a bidirectional byte stream (TCP socket, duplex pipe, serial port)
pub struct StreamLink<S> {
    stream: S,
    label: String,
}

impl<S> StreamLink<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    pub fn new(stream: S, label: impl Into<String>) -> Self {
        Self {
            stream,
            label: label.into(),
        }
    }
}

impl<S> Link for StreamLink<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    fn split(self: Box<Self>) -> (Box<dyn LinkReader>, Box<dyn LinkWriter>) {
        let (read, write) = tokio::io::split(self.stream);
        (
            Box::new(StreamReader {
                inner: read,
                label: self.label.clone(),
            }),
            Box::new(StreamWriter {
                inner: Some(write),
                label: self.label,
            }),
        )
    }
}

struct StreamReader<S> {
    inner: ReadHalf<S>,
    label: String,
}

#[async_trait]
impl<S> LinkReader for StreamReader<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    async fn read(&mut self) -> Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(READ_CAPACITY);

        let n = self.inner.read_buf(&mut buf).await?;

        if n == 0 {
            debug!("{}: closed by remote", self.label);
            return Err(Error::ConnectionClosed);
        }

        trace!("{}: received {} bytes: {:02X?}", self.label, n, &buf[..n.min(16)]);

        Ok(buf)
    }
}

struct StreamWriter<S> {
    inner: Option<WriteHalf<S>>,
    label: String,
}

#[async_trait]
impl<S> LinkWriter for StreamWriter<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let inner = self.inner.as_mut().ok_or(Error::NotConnected)?;

        trace!(
            "{}: sending {} bytes: {:02X?}",
            self.label,
            data.len(),
            &data[..data.len().min(16)]
        );

        inner.write_all(data).await?;
        inner.flush().await?;

        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut inner) = self.inner.take() {
            debug!("{}: closing", self.label);

            // Graceful shutdown
            let _ = inner.shutdown().await;
        }
        Ok(())
    }
}
