use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use futures::{StreamExt, stream};
use percent_encoding::percent_decode_str;
use sluice_service::metric;
use sluice_service::sink;

use crate::service::FileService;

use super::ResponseError;

/// Maps a request path to a file path relative to the served directories.
///
/// The root and any path whose last segment has no extension map to the top level
/// `index.html`, so client side routes all land on the app. Returns `None` for paths that would
/// leave the served directory.
fn normalize_path(uri_path: &str) -> Option<PathBuf> {
    let decoded = percent_decode_str(uri_path).decode_utf8().ok()?;

    let has_extension = decoded
        .rsplit('/')
        .next()
        .is_some_and(|last| last.contains('.'));
    if !has_extension {
        return Some(PathBuf::from("index.html"));
    }

    let mut path = PathBuf::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return None,
            s if s.contains(['\\', '\0']) => return None,
            s => path.push(s),
        }
    }

    Some(path)
}

/// Finds the first root containing `relative` as a regular file.
async fn resolve(roots: &[&Path], relative: &Path) -> Option<(PathBuf, Metadata)> {
    for root in roots {
        let path = root.join(relative);
        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => return Some((path, metadata)),
            _ => continue,
        }
    }
    None
}

/// Milliseconds since the epoch, as sent in `last-modified`.
fn epoch_millis(time: SystemTime) -> Option<u128> {
    time.duration_since(UNIX_EPOCH)
        .ok()
        .map(|duration| duration.as_millis())
}

fn if_modified_since(headers: &HeaderMap) -> Option<u128> {
    headers
        .get(header::IF_MODIFIED_SINCE)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

pub async fn serve_file(
    State(service): State<FileService>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, ResponseError> {
    if method != Method::GET && method != Method::HEAD {
        return Ok(StatusCode::METHOD_NOT_ALLOWED.into_response());
    }

    let config = service.config();
    let Some(relative) = normalize_path(uri.path()) else {
        tracing::debug!(path = uri.path(), "rejected request path");
        return Ok(StatusCode::NOT_FOUND.into_response());
    };
    let roots = [config.static_dir.as_path(), config.data_dir.as_path()];
    let Some((path, metadata)) = resolve(&roots, &relative).await else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };
    let modified = metadata.modified()?;

    let mut response = Response::builder();

    if config.router.enable_cache {
        if let Some(stamp) = epoch_millis(modified) {
            if if_modified_since(&headers) == Some(stamp) {
                metric!(counter("files.not_modified") += 1);
                return Ok(StatusCode::NOT_MODIFIED.into_response());
            }
            response = response.header(header::LAST_MODIFIED, stamp.to_string());
        }
    }

    let compress = relative
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| config.router.gzip_suffix.iter().any(|s| s == ext));
    if compress {
        response = response.header(header::CONTENT_ENCODING, "gzip");
    }

    let mime = mime_guess::from_path(&relative).first_or_octet_stream();
    response = response.header(header::CONTENT_TYPE, mime.as_ref());

    if method == Method::HEAD {
        return Ok(response.body(Body::empty())?);
    }

    let (sink, mut body) = sink::channel();
    service.requester().request(&path, sink, modified, compress);

    // a failed read surfaces before any bytes, so it can still become a proper error response
    let first = match body.next().await {
        Some(Err(err)) => return Err(err.into()),
        first => first,
    };
    let body = stream::iter(first).chain(body);

    Ok(response.body(Body::from_stream(body))?)
}
