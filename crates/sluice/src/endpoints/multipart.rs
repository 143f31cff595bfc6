//! Helper utilities to handle HTTP multipart bodies.

use std::pin::Pin;
use std::task::{Context, Poll};

use axum::extract::multipart::Field;
use bytes::Bytes;
use futures::prelude::*;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;

use super::ResponseError;

/// Newtype around axum's multipart [`Field`].
///
/// [`StreamReader`] needs a [`Stream`] of `Result<T, std::io::Error>`, so the multipart error is
/// wrapped into an I/O error here.
struct MultipartField<'a> {
    inner: Field<'a>,
}

impl Stream for MultipartField<'_> {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner)
            .poll_next(cx)
            .map_err(std::io::Error::other)
    }
}

/// Streams a multipart body to a file, returning the number of bytes written.
pub async fn stream_multipart_file(field: Field<'_>, file: &mut File) -> Result<u64, ResponseError> {
    let mut field_reader = StreamReader::new(MultipartField { inner: field });
    let written = tokio::io::copy(&mut field_reader, file).await?;
    file.flush().await?;
    Ok(written)
}
