use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use sluice_service::config::Config;
use sluice_service::requester::FileRequester;

/// Shared state of all request handlers.
///
/// This is a cheap handle around the configuration and the [`FileRequester`].
#[derive(Clone, Debug)]
pub struct FileService {
    config: Arc<Config>,
    requester: FileRequester,
}

impl FileService {
    /// Creates the service, making sure all configured directories exist.
    pub fn create(config: Config) -> Result<Self> {
        let requester = FileRequester::new(config.requester.clone())
            .context("invalid requester configuration")?;
        Self::with_requester(config, requester)
    }

    /// Creates the service around an existing requester.
    pub fn with_requester(config: Config, requester: FileRequester) -> Result<Self> {
        ensure_dirs(&config)?;

        Ok(Self {
            config: Arc::new(config),
            requester,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn requester(&self) -> &FileRequester {
        &self.requester
    }

    /// Fails all deferred requests and removes the upload directory if configured to.
    pub async fn shutdown(&self) -> Result<()> {
        self.requester.shutdown().await;

        if self.config.clear_cache {
            if let Some(ref cache_dir) = self.config.cache_dir {
                tracing::info!(path = %cache_dir.display(), "clearing upload directory");
                remove_dir(cache_dir)?;
            }
        }
        Ok(())
    }
}

fn ensure_dirs(config: &Config) -> Result<()> {
    let dirs = [Some(&config.static_dir), Some(&config.data_dir), config.cache_dir.as_ref()];
    for dir in dirs.into_iter().flatten() {
        if !dir.exists() {
            tracing::info!(path = %dir.display(), "creating directory");
        }
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create directory {}", dir.display()))?;
    }
    Ok(())
}

fn remove_dir(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err)
            .with_context(|| format!("failed to remove directory {}", dir.display())),
        _ => Ok(()),
    }
}

/// Removes all uploaded files, leaving an empty upload directory behind.
pub fn cleanup(config: &Config) -> Result<()> {
    let Some(ref cache_dir) = config.cache_dir else {
        tracing::info!("no upload directory configured, nothing to clean up");
        return Ok(());
    };

    tracing::info!(path = %cache_dir.display(), "cleaning up uploads");
    remove_dir(cache_dir)?;
    fs::create_dir_all(cache_dir)
        .with_context(|| format!("failed to create directory {}", cache_dir.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(root: &Path) -> Config {
        Config {
            static_dir: root.join("static"),
            data_dir: root.join("data"),
            cache_dir: Some(root.join("cache")),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_creates_dirs() {
        let root = sluice_test::tempdir();
        FileService::create(config(root.path())).unwrap();

        assert!(root.path().join("static").is_dir());
        assert!(root.path().join("data").is_dir());
        assert!(root.path().join("cache").is_dir());
    }

    #[tokio::test]
    async fn test_rejects_zero_fanout() {
        let root = sluice_test::tempdir();
        let mut config = config(root.path());
        config.requester.max_fanout = 0;
        assert!(FileService::create(config).is_err());
    }

    #[tokio::test]
    async fn test_shutdown_clears_uploads() {
        let root = sluice_test::tempdir();
        let mut config = config(root.path());
        config.clear_cache = true;
        let service = FileService::create(config).unwrap();
        sluice_test::write_file(root.path().join("cache/upload.txt"), b"upload");

        service.shutdown().await.unwrap();
        assert!(!root.path().join("cache").exists());
        assert!(root.path().join("static").exists());
    }

    #[tokio::test]
    async fn test_shutdown_keeps_uploads() {
        let root = sluice_test::tempdir();
        let service = FileService::create(config(root.path())).unwrap();
        sluice_test::write_file(root.path().join("cache/upload.txt"), b"upload");

        service.shutdown().await.unwrap();
        assert!(root.path().join("cache/upload.txt").exists());
    }

    #[test]
    fn test_cleanup() {
        let root = sluice_test::tempdir();
        let config = config(root.path());
        sluice_test::write_file(root.path().join("cache/upload.txt"), b"upload");

        cleanup(&config).unwrap();
        assert!(root.path().join("cache").is_dir());
        assert!(!root.path().join("cache/upload.txt").exists());
    }
}
