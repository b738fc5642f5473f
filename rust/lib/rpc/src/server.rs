//! gRPC server exposing a [`Backend`] as `lobby.BucketService`.
//!
//! This is what a plugin process runs. Backend calls are synchronous, so every
//! handler moves its work onto tokio's blocking pool.

use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use lobby_bucket::{Backend, BucketError};
use thiserror::Error;
use tokio::net::{TcpListener, UnixListener};
use tokio_stream::wrappers::{TcpListenerStream, UnixListenerStream};
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info};

use crate::proto::{self, bucket_service_server::BucketServiceServer};
use crate::status::status_from_error;

#[derive(Error, Debug)]
pub enum ServeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

/// Serves one backend to remote clients. Bucket names in requests are passed
/// through to [`Backend::bucket`] untouched.
#[derive(Clone)]
pub struct BucketServer {
    backend: Arc<dyn Backend>,
}

impl BucketServer {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub fn into_service(self) -> BucketServiceServer<Self> {
        BucketServiceServer::new(self)
    }

    /// Serve on an already bound TCP listener until `shutdown` resolves.
    pub async fn serve_with_listener<F>(self, listener: TcpListener, shutdown: F) -> Result<(), ServeError>
    where
        F: Future<Output = ()> + Send,
    {
        info!("bucket service listening on {}", listener.local_addr()?);

        Server::builder()
            .add_service(self.into_service())
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
            .await?;
        Ok(())
    }

    pub async fn serve_tcp<F>(self, addr: SocketAddr, shutdown: F) -> Result<(), ServeError>
    where
        F: Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind(addr).await?;
        self.serve_with_listener(listener, shutdown).await
    }

    /// Serve on a listener from [`bind_unix`] until `shutdown` resolves.
    pub async fn serve_unix_listener<F>(self, listener: UnixListener, shutdown: F) -> Result<(), ServeError>
    where
        F: Future<Output = ()> + Send,
    {
        Server::builder()
            .add_service(self.into_service())
            .serve_with_incoming_shutdown(UnixListenerStream::new(listener), shutdown)
            .await?;
        Ok(())
    }

    /// Bind `path` and serve until `shutdown` resolves. The socket file is
    /// removed afterwards.
    pub async fn serve_unix<F>(self, path: &Path, shutdown: F) -> Result<(), ServeError>
    where
        F: Future<Output = ()> + Send,
    {
        let listener = bind_unix(path)?;
        let result = self.serve_unix_listener(listener, shutdown).await;
        let _ = std::fs::remove_file(path);
        result
    }
}

/// Bind a Unix socket, replacing a stale socket file and restricting it to
/// the owner. Must be called within a tokio runtime.
pub fn bind_unix(path: &Path) -> std::io::Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let listener = UnixListener::bind(path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    info!("bucket service listening on {}", path.display());
    Ok(listener)
}

/// Default socket path for a plugin named `name` under `dir`.
pub fn socket_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.sock", name))
}

async fn blocking<T, F>(f: F) -> Result<T, Status>
where
    F: FnOnce() -> Result<T, BucketError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Status::internal(format!("backend task failed: {}", e)))?
        .map_err(status_from_error)
}

type ItemStream = Pin<Box<dyn Stream<Item = Result<proto::Item, Status>> + Send>>;

#[tonic::async_trait]
impl proto::bucket_service_server::BucketService for BucketServer {
    async fn put(&self, request: Request<Streaming<proto::NewItem>>) -> Result<Response<proto::Empty>, Status> {
        let mut stream = request.into_inner();

        // Items are applied in arrival order; the ack follows the last one.
        while let Some(message) = stream.message().await? {
            let item = message
                .item
                .ok_or_else(|| Status::invalid_argument("put message without item"))?;
            let backend = Arc::clone(&self.backend);
            let name = message.bucket;
            debug!(bucket = %name, key = %item.key, "put");

            blocking(move || {
                backend.bucket(&name)?.put(&item.key, &item.value)?;
                Ok(())
            })
            .await?;
        }

        Ok(Response::new(proto::Empty {}))
    }

    async fn get(&self, request: Request<proto::Key>) -> Result<Response<proto::Item>, Status> {
        let proto::Key { bucket, key } = request.into_inner();
        let backend = Arc::clone(&self.backend);
        debug!(%bucket, %key, "get");

        let item = blocking(move || backend.bucket(&bucket)?.get(&key)).await?;
        Ok(Response::new(proto::Item {
            key: item.key,
            value: item.value,
        }))
    }

    async fn delete(&self, request: Request<proto::Key>) -> Result<Response<proto::Empty>, Status> {
        let proto::Key { bucket, key } = request.into_inner();
        let backend = Arc::clone(&self.backend);
        debug!(%bucket, %key, "delete");

        blocking(move || backend.bucket(&bucket)?.delete(&key)).await?;
        Ok(Response::new(proto::Empty {}))
    }

    type ListStream = ItemStream;

    async fn list(&self, request: Request<proto::Page>) -> Result<Response<Self::ListStream>, Status> {
        let proto::Page { bucket, page, per_page } = request.into_inner();
        let page = u32::try_from(page).map_err(|_| Status::invalid_argument(format!("negative page: {}", page)))?;
        let per_page = u32::try_from(per_page)
            .map_err(|_| Status::invalid_argument(format!("negative per_page: {}", per_page)))?;
        let backend = Arc::clone(&self.backend);
        debug!(%bucket, page, per_page, "list");

        let items = blocking(move || backend.bucket(&bucket)?.page(page, per_page)).await?;
        let stream = futures::stream::iter(items.into_iter().map(|item| {
            Ok(proto::Item {
                key: item.key,
                value: item.value,
            })
        }));
        Ok(Response::new(Box::pin(stream) as Self::ListStream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lobby_bucket::MemoryBackend;
    use proto::bucket_service_server::BucketService;

    fn server() -> BucketServer {
        BucketServer::new(Arc::new(MemoryBackend::new()))
    }

    #[tokio::test]
    async fn get_missing_key_is_not_found() {
        let status = server()
            .get(Request::new(proto::Key {
                bucket: "a".into(),
                key: "nope".into(),
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::NotFound);
    }

    #[tokio::test]
    async fn delete_missing_key_succeeds() {
        let res = server()
            .delete(Request::new(proto::Key {
                bucket: "a".into(),
                key: "nope".into(),
            }))
            .await;
        assert!(res.is_ok());
    }

    #[tokio::test]
    async fn negative_page_is_rejected() {
        let res = server()
            .list(Request::new(proto::Page {
                bucket: "a".into(),
                page: -1,
                per_page: 10,
            }))
            .await;
        match res {
            Err(status) => assert_eq!(status.code(), tonic::Code::InvalidArgument),
            Ok(_) => panic!("negative page accepted"),
        }
    }

    #[tokio::test]
    async fn list_streams_one_page() {
        use futures::StreamExt;

        let backend = Arc::new(MemoryBackend::new());
        let bucket = backend.bucket("a").unwrap();
        for key in ["c", "a", "b"] {
            bucket.put(key, key.as_bytes()).unwrap();
        }

        let response = BucketServer::new(backend)
            .list(Request::new(proto::Page {
                bucket: "a".into(),
                page: 1,
                per_page: 2,
            }))
            .await
            .unwrap();
        let keys: Vec<String> = response
            .into_inner()
            .map(|item| item.unwrap().key)
            .collect()
            .await;
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn socket_path_uses_plugin_name() {
        assert_eq!(
            socket_path(Path::new("/run/lobby"), "redb"),
            PathBuf::from("/run/lobby/redb.sock")
        );
    }
}
