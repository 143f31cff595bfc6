use std::io;
use std::path::Path;

use bytes::Bytes;
use futures::future::BoxFuture;

/// Where a [`FileRequester`](super::FileRequester) reads file contents from.
///
/// The requester guarantees that there is at most one outstanding `read` per path, as long as
/// the path is spelled the same way.
pub trait FileSource: Send + Sync + 'static {
    /// Reads the complete contents of `path`.
    fn read(&self, path: &Path) -> BoxFuture<'static, io::Result<Bytes>>;
}

/// Reads files from the local filesystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct FsSource;

impl FileSource for FsSource {
    fn read(&self, path: &Path) -> BoxFuture<'static, io::Result<Bytes>> {
        let path = path.to_owned();
        Box::pin(async move { tokio::fs::read(path).await.map(Bytes::from) })
    }
}
