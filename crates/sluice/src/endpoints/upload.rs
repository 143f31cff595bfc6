use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use axum::extract::{Multipart, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use sluice_service::metric;
use tokio::fs::File;
use uuid::Uuid;

use crate::service::FileService;

use super::ResponseError;
use super::multipart::stream_multipart_file;

/// Where the contents of an uploaded file ended up.
#[derive(Debug)]
enum StoredUpload {
    Disk { path: PathBuf, size: u64 },
    Memory { size: usize },
}

/// Strips any directories from a client supplied file name.
///
/// Browsers may send full paths, with either separator. Returns `None` if nothing usable is left.
fn sanitize_file_name(name: &str) -> Option<&str> {
    let name = name.rsplit(['/', '\\']).next()?.trim();
    match name {
        "" | "." | ".." => None,
        name if name.contains('\0') => None,
        name => Some(name),
    }
}

async fn store_file(
    field: axum::extract::multipart::Field<'_>,
    file_name: &str,
    cache_dir: Option<&Path>,
) -> Result<StoredUpload, ResponseError> {
    match cache_dir {
        Some(cache_dir) => {
            let path = cache_dir.join(format!("{}.{file_name}", Uuid::new_v4()));
            let mut file = File::create(&path).await?;
            let size = stream_multipart_file(field, &mut file).await?;
            Ok(StoredUpload::Disk { path, size })
        }
        None => {
            let bytes = field.bytes().await?;
            Ok(StoredUpload::Memory { size: bytes.len() })
        }
    }
}

pub async fn handle_upload(
    State(service): State<FileService>,
    mut multipart: Multipart,
) -> Result<Response, ResponseError> {
    let cache_dir = service.config().cache_dir.as_deref();
    let mut files = BTreeMap::new();
    let mut fields = BTreeMap::new();

    while let Some(field) = multipart.next_field().await? {
        let Some(raw_name) = field.file_name().map(str::to_owned) else {
            let name = field.name().unwrap_or_default().to_owned();
            fields.insert(name, field.text().await?);
            continue;
        };

        let file_name = sanitize_file_name(&raw_name)
            .ok_or((StatusCode::BAD_REQUEST, "invalid file name"))?
            .to_owned();
        let stored = store_file(field, &file_name, cache_dir).await?;
        metric!(counter("uploads.files") += 1);
        files.insert(file_name, stored);
    }

    tracing::info!(?files, ?fields, "received upload");

    Ok((
        StatusCode::SEE_OTHER,
        [(header::LOCATION, "/"), (header::CONNECTION, "close")],
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use reqwest::redirect::Policy;
    use reqwest::{Client, StatusCode, multipart};
    use sluice_service::config::Config;

    use super::*;
    use crate::endpoints::create_app;

    fn client() -> Client {
        Client::builder().redirect(Policy::none()).build().unwrap()
    }

    fn server(config: Config) -> sluice_test::Server {
        sluice_test::Server::new(create_app(FileService::create(config).unwrap()))
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("report.pdf"), Some("report.pdf"));
        assert_eq!(sanitize_file_name("../../etc/passwd"), Some("passwd"));
        assert_eq!(sanitize_file_name("C:\\Users\\me\\photo.jpg"), Some("photo.jpg"));
        assert_eq!(sanitize_file_name("uploads/"), None);
        assert_eq!(sanitize_file_name(".."), None);
        assert_eq!(sanitize_file_name(""), None);
    }

    #[tokio::test]
    async fn test_upload_to_disk() {
        sluice_test::setup();
        let root = sluice_test::tempdir();
        let server = server(Config {
            static_dir: root.path().join("static"),
            data_dir: root.path().join("data"),
            cache_dir: Some(root.path().join("cache")),
            ..Default::default()
        });

        let form = multipart::Form::new()
            .part(
                "file",
                multipart::Part::bytes(b"hello upload".to_vec()).file_name("../notes.txt"),
            )
            .text("comment", "first upload");

        let response = client()
            .post(server.url("/api/upload"))
            .multipart(form)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()["location"], "/");

        let stored: Vec<_> = std::fs::read_dir(root.path().join("cache"))
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(stored.len(), 1);
        let name = stored[0].file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with(".notes.txt"), "{name}");
        assert_eq!(std::fs::read(&stored[0]).unwrap(), b"hello upload");
    }

    #[tokio::test]
    async fn test_upload_to_memory() {
        sluice_test::setup();
        let root = sluice_test::tempdir();
        let server = server(Config {
            static_dir: root.path().join("static"),
            data_dir: root.path().join("data"),
            cache_dir: None,
            ..Default::default()
        });

        let form = multipart::Form::new().part(
            "file",
            multipart::Part::bytes(vec![0u8; 1024]).file_name("zeros.bin"),
        );

        let response = client()
            .post(server.url("/api/upload"))
            .multipart(form)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn test_upload_too_large() {
        sluice_test::setup();
        let root = sluice_test::tempdir();
        let server = server(Config {
            static_dir: root.path().join("static"),
            data_dir: root.path().join("data"),
            cache_dir: None,
            max_upload_size: 16,
            ..Default::default()
        });

        let form = multipart::Form::new().part(
            "file",
            multipart::Part::bytes(vec![0u8; 1024]).file_name("zeros.bin"),
        );

        let response = client()
            .post(server.url("/api/upload"))
            .multipart(form)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
