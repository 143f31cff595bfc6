//! The write end of a response and its paired body stream.
//!
//! A [`ResponseSink`] is handed to the [`FileRequester`](crate::requester::FileRequester), which
//! writes the file contents into it at some later point. The matching [`ResponseBody`] is a
//! [`Stream`] that the HTTP layer turns into the response body.
//!
//! Terminating a sink consumes it: [`ResponseSink::close`] ends the body stream normally, and
//! [`ResponseSink::fail`] ends it with an error item. Dropping a sink also ends the stream, which
//! happens when the receiving side went away mid-write.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use thiserror::Error;
use tokio::sync::mpsc;

/// Number of chunks buffered between a sink and its body before writes wait for the reader.
const SINK_BUFFER: usize = 16;

/// Why a response could not be served.
///
/// These errors are per request. The same read error is delivered to every request that joined
/// the failed read, which is why the I/O errors are shared.
#[derive(Debug, Clone, Error)]
pub enum ServeError {
    /// Reading the file from disk failed.
    #[error("failed to read file")]
    Read(#[source] Arc<io::Error>),
    /// The gzip stream for this response could not be produced.
    #[error("failed to compress response")]
    Compression(#[source] Arc<io::Error>),
    /// The request was waiting for a retry when the requester shut down.
    #[error("request cancelled during shutdown")]
    Cancelled,
}

impl ServeError {
    pub fn read(err: io::Error) -> Self {
        Self::Read(Arc::new(err))
    }

    pub fn compression(err: io::Error) -> Self {
        Self::Compression(Arc::new(err))
    }
}

/// The [`ResponseBody`] for this sink was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("response body was dropped")]
pub struct BodyDropped;

/// Creates a connected sink and body.
pub fn channel() -> (ResponseSink, ResponseBody) {
    let (tx, rx) = mpsc::channel(SINK_BUFFER);
    (ResponseSink { tx }, ResponseBody { rx })
}

/// Incrementally written destination of a response.
#[derive(Debug)]
pub struct ResponseSink {
    tx: mpsc::Sender<Result<Bytes, ServeError>>,
}

impl ResponseSink {
    /// Appends a chunk to the response, waiting while the body is not being read.
    pub async fn write(&mut self, chunk: Bytes) -> Result<(), BodyDropped> {
        self.tx.send(Ok(chunk)).await.map_err(|_| BodyDropped)
    }

    /// Ends the response successfully.
    pub fn close(self) {}

    /// Ends the response with `error`.
    ///
    /// The error is the last item the body yields. If the body is already gone the error is
    /// dropped silently.
    pub async fn fail(self, error: ServeError) {
        self.tx.send(Err(error)).await.ok();
    }

    /// Returns `true` once the body has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Readable side of a [`ResponseSink`].
#[derive(Debug)]
pub struct ResponseBody {
    rx: mpsc::Receiver<Result<Bytes, ServeError>>,
}

impl ResponseBody {
    /// Reads the whole body into memory.
    ///
    /// Returns the first error the sink failed with.
    pub async fn collect(mut self) -> Result<Bytes, ServeError> {
        let mut buf = Vec::new();
        while let Some(chunk) = self.rx.recv().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.into())
    }
}

impl Stream for ResponseBody {
    type Item = Result<Bytes, ServeError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    #[tokio::test]
    async fn test_close_ends_stream() {
        let (mut sink, body) = channel();
        sink.write(Bytes::from_static(b"hello ")).await.unwrap();
        sink.write(Bytes::from_static(b"world")).await.unwrap();
        sink.close();

        assert_eq!(body.collect().await.unwrap(), "hello world");
    }

    #[tokio::test]
    async fn test_fail_yields_error() {
        let (mut sink, mut body) = channel();
        sink.write(Bytes::from_static(b"partial")).await.unwrap();
        sink.fail(ServeError::Cancelled).await;

        assert_eq!(body.next().await.unwrap().unwrap(), "partial");
        assert!(matches!(body.next().await, Some(Err(ServeError::Cancelled))));
        assert!(body.next().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_body() {
        let (mut sink, body) = channel();
        drop(body);

        assert!(sink.is_closed());
        assert_eq!(sink.write(Bytes::new()).await, Err(BodyDropped));
    }
}
