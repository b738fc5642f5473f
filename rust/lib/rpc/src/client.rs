//! Remote backend adapter.
//!
//! [`RpcBackend`] implements [`Backend`] by forwarding every bucket call to a
//! plugin process serving `lobby.BucketService`. Each call is one RPC and
//! blocks the calling thread until the server answers or the deadline fires.
//!
//! The adapter runs its RPCs on a private tokio runtime, so its methods must
//! not be called from inside an async task: use `spawn_blocking` there.
//!
//! A Put whose acknowledgement never arrives (deadline, severed connection)
//! fails with `BucketError::Transport` even though the server may have applied
//! it. The adapter never retries.

use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use hyper_util::rt::TokioIo;
use lobby_bucket::{Backend, Bucket, BucketError, Item};
use tokio::net::UnixStream;
use tokio::runtime::Runtime;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;
use tracing::{debug, info};

use crate::proto::{self, bucket_service_client::BucketServiceClient};
use crate::status::error_from_status;

/// Connection settings for an [`RpcBackend`].
#[derive(Debug, Clone, Default)]
pub struct RpcOptions {
    /// Limit on establishing the connection.
    pub connect_timeout: Option<Duration>,
    /// Default deadline applied to every call. Buckets can override it either
    /// way with [`RpcBucket::with_deadline`].
    pub request_timeout: Option<Duration>,
}

/// State shared by a backend and every bucket it hands out.
struct Connection {
    addr: String,
    runtime: Option<Runtime>,
    /// `None` once the backend is closed.
    client: RwLock<Option<BucketServiceClient<Channel>>>,
}

impl Connection {
    fn is_closed(&self) -> bool {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Run one RPC to completion on the private runtime. All status
    /// translation happens here.
    fn call<T, F, Fut>(&self, op: &'static str, deadline: Option<Duration>, f: F) -> Result<T, BucketError>
    where
        F: FnOnce(BucketServiceClient<Channel>) -> Fut,
        Fut: Future<Output = Result<T, tonic::Status>>,
    {
        let client = self
            .client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| BucketError::Closed(self.addr.clone()))?;
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| BucketError::Closed(self.addr.clone()))?;

        debug!(addr = %self.addr, op, "rpc call");
        let result = runtime.block_on(async move {
            let fut = f(client);
            match deadline {
                Some(limit) => match tokio::time::timeout(limit, fut).await {
                    Ok(result) => result.map_err(error_from_status),
                    Err(_) => Err(BucketError::Transport(format!(
                        "deadline of {:?} exceeded",
                        limit
                    ))),
                },
                None => fut.await.map_err(error_from_status),
            }
        });

        if let Err(e) = &result {
            debug!(addr = %self.addr, op, error = %e, "rpc call failed");
        }
        result
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // May run inside another runtime's task; never block here.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Backend proxied to a plugin process over gRPC.
pub struct RpcBackend {
    conn: Arc<Connection>,
    request_timeout: Option<Duration>,
}

impl RpcBackend {
    /// Prepare a backend for the plugin listening at `addr`.
    ///
    /// `addr` is `host:port`, an `http://` or `https://` URI, or a Unix socket
    /// given as `unix:/path` or an absolute path. The connection is opened on
    /// the first call and shared by all buckets; concurrent calls are
    /// multiplexed over it.
    pub fn connect(addr: &str, options: RpcOptions) -> Result<Self, BucketError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("lobby-rpc")
            .enable_all()
            .build()
            .map_err(|e| BucketError::Transport(format!("failed to start rpc runtime: {}", e)))?;

        let channel = {
            let _guard = runtime.enter();
            open_channel(addr, &options)?
        };
        info!(addr, "rpc backend ready");

        Ok(Self {
            conn: Arc::new(Connection {
                addr: addr.to_string(),
                runtime: Some(runtime),
                client: RwLock::new(Some(BucketServiceClient::new(channel))),
            }),
            request_timeout: options.request_timeout,
        })
    }

    pub fn addr(&self) -> &str {
        &self.conn.addr
    }

    /// Concrete bucket handle, for callers that want per-handle deadlines.
    pub fn rpc_bucket(&self, name: &str) -> Result<RpcBucket, BucketError> {
        if self.conn.is_closed() {
            return Err(BucketError::Closed(self.conn.addr.clone()));
        }
        Ok(RpcBucket {
            name: name.to_string(),
            conn: Arc::clone(&self.conn),
            deadline: self.request_timeout,
        })
    }
}

impl Backend for RpcBackend {
    fn bucket(&self, name: &str) -> Result<Box<dyn Bucket>, BucketError> {
        Ok(Box::new(self.rpc_bucket(name)?))
    }

    fn bucket_with_deadline(&self, name: &str, deadline: Duration) -> Result<Box<dyn Bucket>, BucketError> {
        Ok(Box::new(self.rpc_bucket(name)?.with_deadline(deadline)))
    }

    fn close(&self) -> Result<(), BucketError> {
        let mut client = self
            .conn
            .client
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if client.take().is_some() {
            info!(addr = %self.conn.addr, "rpc backend closed");
        }
        Ok(())
    }
}

fn open_channel(addr: &str, options: &RpcOptions) -> Result<Channel, BucketError> {
    let socket = addr
        .strip_prefix("unix:")
        .or_else(|| addr.starts_with('/').then_some(addr));

    // The authority is ignored for Unix sockets but the URI must parse.
    let uri = match socket {
        Some(_) => "http://[::]:50051".to_string(),
        None if addr.contains("://") => addr.to_string(),
        None => format!("http://{}", addr),
    };

    let mut endpoint = Endpoint::from_shared(uri)
        .map_err(|e| BucketError::InvalidArgument(format!("invalid address {:?}: {}", addr, e)))?;
    if let Some(timeout) = options.connect_timeout {
        endpoint = endpoint.connect_timeout(timeout);
    }

    let channel = match socket {
        Some(path) => {
            let path = PathBuf::from(path);
            endpoint.connect_with_connector_lazy(service_fn(move |_: Uri| {
                let path = path.clone();
                async move { Ok::<_, std::io::Error>(TokioIo::new(UnixStream::connect(path).await?)) }
            }))
        }
        None => endpoint.connect_lazy(),
    };
    Ok(channel)
}

fn request<T>(message: T, deadline: Option<Duration>) -> tonic::Request<T> {
    let mut request = tonic::Request::new(message);
    if let Some(limit) = deadline {
        request.set_timeout(limit);
    }
    request
}

/// Bucket living in a plugin process. Holds no server-side session: every
/// method is one independent RPC.
#[derive(Clone)]
pub struct RpcBucket {
    name: String,
    conn: Arc<Connection>,
    deadline: Option<Duration>,
}

impl RpcBucket {
    /// Abort calls on this handle that take longer than `deadline`.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Bucket for RpcBucket {
    fn put(&self, key: &str, value: &[u8]) -> Result<Item, BucketError> {
        let message = proto::NewItem {
            bucket: self.name.clone(),
            item: Some(proto::Item {
                key: key.to_string(),
                value: value.to_vec(),
            }),
        };
        let deadline = self.deadline;

        // One message, then end of input; the ack arrives after the stream
        // closes.
        self.conn.call("put", deadline, move |mut client| async move {
            let stream = futures::stream::iter(vec![message]);
            client.put(request(stream, deadline)).await
        })?;

        Ok(Item::new(key, value))
    }

    fn get(&self, key: &str) -> Result<Item, BucketError> {
        let message = proto::Key {
            bucket: self.name.clone(),
            key: key.to_string(),
        };
        let deadline = self.deadline;

        let item = self
            .conn
            .call("get", deadline, move |mut client| async move {
                client.get(request(message, deadline)).await
            })?
            .into_inner();

        Ok(Item::new(item.key, item.value))
    }

    fn delete(&self, key: &str) -> Result<(), BucketError> {
        let message = proto::Key {
            bucket: self.name.clone(),
            key: key.to_string(),
        };
        let deadline = self.deadline;

        self.conn.call("delete", deadline, move |mut client| async move {
            client.delete(request(message, deadline)).await
        })?;
        Ok(())
    }

    fn page(&self, page: u32, per_page: u32) -> Result<Vec<Item>, BucketError> {
        let message = proto::Page {
            bucket: self.name.clone(),
            page: i32::try_from(page).unwrap_or(i32::MAX),
            per_page: i32::try_from(per_page).unwrap_or(i32::MAX),
        };
        let deadline = self.deadline;
        let limit = per_page as usize;

        // Drain the stream before returning; never keep more than a page.
        self.conn.call("list", deadline, move |mut client| async move {
            let mut stream = client.list(request(message, deadline)).await?.into_inner();
            let mut items = Vec::new();
            while items.len() < limit {
                match stream.message().await? {
                    Some(item) => items.push(Item::new(item.key, item.value)),
                    None => break,
                }
            }
            Ok::<_, tonic::Status>(items)
        })
    }

    fn close(&self) -> Result<(), BucketError> {
        Ok(())
    }
}
