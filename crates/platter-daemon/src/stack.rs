//! Assemble the served filesystems from configuration.

use std::sync::Arc;

use anyhow::{Context, Result};
use platter_cas::{CafsStore, DiskStore};
use platter_config::{log_cache_info, Backend, CacheMode, Config, TransferConfig};
use platter_fs::{
    CacheFs, CafsCacheFs, CafsFs, ChunkOptions, ChunkedRemoteFs, FileSystem, LocalFs, MultiFs,
    PathRewrite,
};
use platter_ipc::{ObjectClient, PeerClient};

use crate::server::{Registry, ServerOptions};

pub fn chunk_options(transfer: &TransferConfig) -> ChunkOptions {
    ChunkOptions {
        chunk_size: transfer.chunk_size,
        read_timeout: transfer.read_timeout(),
        wait_timeout: transfer.wait_timeout(),
    }
}

pub fn server_options(config: &Config) -> ServerOptions {
    ServerOptions {
        request_timeout: config.server.request_timeout(),
        write_timeout: config.server.write_timeout(),
    }
}

/// Client for the configured remote backend, if any.
pub async fn build_client(config: &Config) -> Result<Option<Arc<dyn ObjectClient>>> {
    let remote = &config.remote;
    match remote.backend {
        Backend::None => Ok(None),
        Backend::Peer => {
            let addr = remote
                .addr
                .clone()
                .context("remote.addr is required for the peer backend")?;
            let client: Arc<dyn ObjectClient> = Arc::new(
                PeerClient::new(addr)
                    .with_label(remote.label.clone())
                    .with_timeout(config.transfer.connect_timeout()),
            );
            Ok(Some(client))
        }
        Backend::Bucket => bucket_client(config).await,
    }
}

#[cfg(feature = "s3")]
async fn bucket_client(config: &Config) -> Result<Option<Arc<dyn ObjectClient>>> {
    use platter_ipc::bucket::BucketClient;

    let remote = &config.remote;
    let bucket = remote
        .bucket
        .clone()
        .context("remote.bucket is required for the bucket backend")?;
    let client: Arc<dyn ObjectClient> = Arc::new(
        BucketClient::from_env(bucket, remote.endpoint.clone(), remote.region.clone())
            .await
            .with_prefix(remote.prefix.clone()),
    );
    Ok(Some(client))
}

#[cfg(not(feature = "s3"))]
async fn bucket_client(_config: &Config) -> Result<Option<Arc<dyn ObjectClient>>> {
    anyhow::bail!("remote.backend = \"bucket\" needs platterd built with the `s3` feature")
}

/// The stack served under the default label:
/// local library first, then the cache over the remote backend.
///
/// Without a remote, a CAFS cache root is served as is, so a peer can
/// dedup against it.
pub async fn build_default_stack(config: &Config) -> Result<MultiFs> {
    let storage = &config.storage;
    let mut stack = MultiFs::default();

    if let Some(library) = &storage.library {
        let local = LocalFs::open_dir(library)
            .with_context(|| format!("Failed to open library {}", library.display()))?;
        stack.push(Arc::new(local));
    }

    let cache_root = storage.cache_root.display().to_string();
    let client = build_client(config).await?;
    match (client, storage.cache_mode) {
        (Some(client), mode) => {
            let remote: Arc<dyn FileSystem> = Arc::new(ChunkedRemoteFs::new(
                client,
                chunk_options(&config.transfer),
            ));
            let cache: Arc<dyn FileSystem> = match mode {
                CacheMode::Plain => Arc::new(CacheFs::new(
                    remote,
                    DiskStore::new(&storage.cache_root)
                        .with_context(|| format!("Failed to open cache {cache_root}"))?,
                )),
                CacheMode::Cafs => Arc::new(CafsCacheFs::new(
                    remote,
                    CafsStore::open(&storage.cache_root)
                        .with_context(|| format!("Failed to open CAFS cache {cache_root}"))?,
                )),
            };
            log_cache_info!(
                "Cache ready",
                root = cache_root.as_str(),
                mode = cache_mode_name(mode)
            );
            stack.push(cache);
        }
        (None, CacheMode::Cafs) => {
            let cafs = CafsStore::open(&storage.cache_root)
                .with_context(|| format!("Failed to open CAFS store {cache_root}"))?;
            log_cache_info!("Serving CAFS store", root = cache_root.as_str());
            stack.push(Arc::new(CafsFs::new(cafs)));
        }
        (None, CacheMode::Plain) => {}
    }

    Ok(stack)
}

fn cache_mode_name(mode: CacheMode) -> &'static str {
    match mode {
        CacheMode::Plain => "plain",
        CacheMode::Cafs => "cafs",
    }
}

/// Default stack plus one rewritten view per configured mount.
pub async fn build_registry(config: &Config) -> Result<Registry> {
    let stack: Arc<dyn FileSystem> = Arc::new(build_default_stack(config).await?);
    let mut registry = Registry::with_default(Arc::clone(&stack));

    for (label, mount) in &config.server.mounts {
        let view = PathRewrite::new(Arc::clone(&stack))
            .with_trim_prefix(mount.trim_prefix.clone())
            .with_add_prefix(mount.add_prefix.clone());
        registry.insert(label.clone(), Arc::new(view));
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use platter_config::MountConfig;
    use platter_fs::read_all;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_library_and_mounts() {
        let library = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        std::fs::create_dir_all(library.path().join("artwork")).unwrap();
        std::fs::write(library.path().join("artwork/cover.jpg"), b"jpeg").unwrap();

        let mut config = Config::default();
        config.storage.library = Some(library.path().to_path_buf());
        config.storage.cache_root = cache.path().to_path_buf();
        config.server.mounts.insert(
            "artwork".to_string(),
            MountConfig {
                trim_prefix: String::new(),
                add_prefix: "artwork/".to_string(),
            },
        );

        let registry = build_registry(&config).await.unwrap();
        assert_eq!(registry.labels(), vec!["", "artwork"]);

        let art = registry.get("artwork").unwrap();
        let file = art.open("cover.jpg").await.unwrap();
        assert_eq!(read_all(file.as_ref()).await.unwrap(), b"jpeg");
    }

    #[tokio::test]
    async fn test_cafs_root_served_without_remote() {
        let root = TempDir::new().unwrap();
        let cafs = CafsStore::open(root.path()).unwrap();
        let hash = cafs.put("a.flac", b"flac").unwrap();
        drop(cafs);

        let mut config = Config::default();
        config.storage.cache_root = root.path().to_path_buf();
        config.storage.cache_mode = CacheMode::Cafs;

        let stack = build_default_stack(&config).await.unwrap();
        assert_eq!(stack.len(), 1);
        let file = stack.open("a.flac").await.unwrap();
        assert_eq!(file.stat().await.unwrap().name, hash.to_hex());
    }

    #[cfg(not(feature = "s3"))]
    #[tokio::test]
    async fn test_bucket_backend_needs_feature() {
        let mut config = Config::default();
        config.remote.backend = Backend::Bucket;
        config.remote.bucket = Some("media".to_string());
        assert!(build_client(&config).await.is_err());
    }
}
