//! Peer protocol over real TCP connections.

use std::sync::Arc;
use std::time::Duration;

use platter_cas::{CafsStore, ContentHash, DiskStore};
use platter_daemon::{Registry, Server, ServerOptions};
use platter_fs::memory::MemoryFs;
use platter_fs::{
    read_all, CacheFs, CafsCacheFs, CafsFs, ChunkOptions, ChunkedRemoteFs, FileSystem, LocalFs,
};
use platter_ipc::{ObjectClient, PeerClient, RemoteError, Response, Status};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct Running {
    addr: String,
    stop: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Running {
    async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.await.unwrap();
        }
    }
}

async fn start(registry: Registry) -> Running {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (tx, rx) = oneshot::channel::<()>();
    let server = Server::new(
        registry,
        ServerOptions {
            request_timeout: Some(Duration::from_secs(5)),
            write_timeout: Some(Duration::from_secs(5)),
        },
    );
    let handle = tokio::spawn(async move {
        server
            .serve(listener, async {
                let _ = rx.await;
            })
            .await
            .unwrap();
    });
    Running {
        addr,
        stop: Some(tx),
        handle: Some(handle),
    }
}

fn library() -> (TempDir, Registry) {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir_all(temp.path().join("artist/album")).unwrap();
    std::fs::write(temp.path().join("artist/album/01.flac"), b"\nfLaC payload").unwrap();
    let local: Arc<dyn FileSystem> = Arc::new(LocalFs::open_dir(temp.path()).unwrap());
    (temp, Registry::with_default(local))
}

fn status_of(err: RemoteError) -> Status {
    match err {
        RemoteError::Status { status, .. } => status,
        other => panic!("expected a status error, got {other}"),
    }
}

#[tokio::test]
async fn test_ok_transfers_exact_payload() {
    let (_temp, registry) = library();
    let server = start(registry).await;

    let mut object = PeerClient::new(&server.addr)
        .fetch("artist/album/01.flac")
        .await
        .unwrap();
    assert_eq!(object.size, 13);
    assert_eq!(object.name, "01.flac");

    let mut payload = Vec::new();
    object.stream.read_to_end(&mut payload).await.unwrap();
    assert_eq!(payload, b"\nfLaC payload");

    server.stop().await;
}

#[tokio::test]
async fn test_wire_format_is_line_then_payload() {
    let (_temp, registry) = library();
    let server = start(registry).await;

    let mut stream = TcpStream::connect(&server.addr).await.unwrap();
    stream
        .write_all(b"{\"Path\":\"artist/album/01.flac\",\"Label\":\"\"}\n")
        .await
        .unwrap();

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    let response: Response = serde_json::from_str(line.trim_end_matches('\n')).unwrap();
    assert_eq!(response.status, Status::Ok);
    assert_eq!(response.size, 13);

    // Server closes after exactly Size bytes
    let mut rest = Vec::new();
    reader.read_to_end(&mut rest).await.unwrap();
    assert_eq!(rest, b"\nfLaC payload");

    server.stop().await;
}

#[tokio::test]
async fn test_error_statuses() {
    let (temp, mut registry) = library();
    registry.insert("artwork", Arc::new(LocalFs::open_dir(temp.path()).unwrap()));
    let server = start(registry).await;

    let unknown = PeerClient::new(&server.addr).with_label("lyrics");
    let err = unknown.fetch("artist/album/01.flac").await.unwrap_err();
    assert!(err.to_string().contains("LF"), "{err}");
    assert_eq!(status_of(err), Status::LabelNotFound);

    let client = PeerClient::new(&server.addr);
    assert_eq!(
        status_of(client.fetch("artist/album").await.unwrap_err()),
        Status::IsDirectory
    );
    assert_eq!(
        status_of(client.fetch("artist/missing.flac").await.unwrap_err()),
        Status::NotFound
    );
    assert_eq!(
        status_of(client.fetch("../outside").await.unwrap_err()),
        Status::InvalidPath
    );

    let artwork = PeerClient::new(&server.addr).with_label("artwork");
    assert!(artwork.fetch("artist/album/01.flac").await.is_ok());

    server.stop().await;
}

#[tokio::test]
async fn test_refusal_sends_no_payload() {
    let (_temp, registry) = library();
    let server = start(registry).await;

    let mut stream = TcpStream::connect(&server.addr).await.unwrap();
    stream
        .write_all(b"{\"Path\":\"x\",\"Label\":\"nope\"}\n")
        .await
        .unwrap();
    let mut all = Vec::new();
    stream.read_to_end(&mut all).await.unwrap();

    assert_eq!(all.last(), Some(&b'\n'));
    assert_eq!(all.iter().filter(|b| **b == b'\n').count(), 1);
    let response: Response = serde_json::from_slice(&all[..all.len() - 1]).unwrap();
    assert_eq!(response.status, Status::LabelNotFound);

    server.stop().await;
}

#[tokio::test]
async fn test_open_failure_maps_to_path_error() {
    let mem = Arc::new(MemoryFs::new());
    mem.fail(
        "broken",
        platter_fs::FsError::Timeout("disk asleep".to_string()),
    );
    let server = start(Registry::with_default(mem)).await;

    let err = PeerClient::new(&server.addr).fetch("broken").await.unwrap_err();
    assert_eq!(status_of(err), Status::PathError);

    server.stop().await;
}

#[tokio::test]
async fn test_stat_failure_maps_to_file_error() {
    let mem = Arc::new(MemoryFs::new());
    mem.fail_stat(
        "corrupt.flac",
        platter_fs::FsError::Timeout("disk asleep".to_string()),
    );
    let server = start(Registry::with_default(mem)).await;

    let err = PeerClient::new(&server.addr)
        .fetch("corrupt.flac")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("FE"), "{err}");
    assert_eq!(status_of(err), Status::FileError);

    server.stop().await;
}

#[tokio::test]
async fn test_peer_fetch_through_chunked_cache() {
    let (_temp, registry) = library();
    let server = start(registry).await;
    let cache_dir = TempDir::new().unwrap();

    let client: Arc<dyn ObjectClient> = Arc::new(PeerClient::new(&server.addr));
    let remote = Arc::new(ChunkedRemoteFs::new(
        client,
        ChunkOptions {
            chunk_size: 4,
            ..ChunkOptions::default()
        },
    ));
    let cache = CacheFs::new(remote, DiskStore::new(cache_dir.path()).unwrap());

    let file = cache.open("artist/album/01.flac").await.unwrap();
    assert_eq!(read_all(file.as_ref()).await.unwrap(), b"\nfLaC payload");
    drop(file);

    let reports = cache.wait_fills().await;
    assert!(reports.iter().all(|r| r.result.is_ok()));
    server.stop().await;

    // Served from the mirror with the peer gone
    let file = cache.open("artist/album/01.flac").await.unwrap();
    assert_eq!(read_all(file.as_ref()).await.unwrap(), b"\nfLaC payload");
}

#[tokio::test]
async fn test_cafs_peer_enables_dedup_downstream() {
    let origin_dir = TempDir::new().unwrap();
    let origin = CafsFs::new(CafsStore::open(origin_dir.path()).unwrap());
    let master = b"one master, many paths".to_vec();
    let hash: ContentHash = origin.write("2001/track.flac", master.clone()).await.unwrap();
    origin.link("compilation/track.flac", hash).await.unwrap();
    let server = start(Registry::with_default(Arc::new(origin))).await;

    let cache_dir = TempDir::new().unwrap();
    let client: Arc<dyn ObjectClient> = Arc::new(PeerClient::new(&server.addr));
    let remote = Arc::new(ChunkedRemoteFs::new(client, ChunkOptions::default()));
    let cache = CafsCacheFs::new(remote, CafsStore::open(cache_dir.path()).unwrap());

    let file = cache.open("2001/track.flac").await.unwrap();
    assert_eq!(read_all(file.as_ref()).await.unwrap(), master);
    drop(file);
    cache.wait_fills().await;

    let file = cache.open("compilation/track.flac").await.unwrap();
    assert_eq!(file.stat().await.unwrap().name, hash.to_hex());
    assert!(cache.wait_fills().await.is_empty());

    let stats = cache.store().stats().unwrap();
    assert_eq!(stats.paths, 2);
    assert_eq!(stats.blobs, 1);

    server.stop().await;
}
