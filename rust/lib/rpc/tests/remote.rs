//! End-to-end tests: an in-process plugin server on its own runtime, reached
//! through `RpcBackend`.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use lobby_bucket::{Backend, Bucket, BucketError, Item, MemoryBackend, Registry};
use lobby_rpc::{bind_unix, BucketServer, RpcBackend, RpcOptions};
use tokio::net::TcpListener;
use tokio::runtime::Runtime;

struct Plugin {
    runtime: Option<Runtime>,
    addr: String,
}

fn plugin_runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

impl Plugin {
    fn tcp(backend: Arc<dyn Backend>) -> Self {
        let runtime = plugin_runtime();
        let listener = runtime.block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        runtime.spawn(BucketServer::new(backend).serve_with_listener(listener, futures::future::pending()));
        Self {
            runtime: Some(runtime),
            addr,
        }
    }

    fn unix(backend: Arc<dyn Backend>, path: &std::path::Path) -> Self {
        let runtime = plugin_runtime();
        let listener = {
            let _guard = runtime.enter();
            bind_unix(path).unwrap()
        };
        runtime.spawn(BucketServer::new(backend).serve_unix_listener(listener, futures::future::pending()));
        Self {
            runtime: Some(runtime),
            addr: format!("unix:{}", path.display()),
        }
    }

    fn connect(&self) -> RpcBackend {
        self.connect_with(Duration::from_secs(5))
    }

    fn connect_with(&self, request_timeout: Duration) -> RpcBackend {
        RpcBackend::connect(
            &self.addr,
            RpcOptions {
                connect_timeout: Some(Duration::from_secs(2)),
                request_timeout: Some(request_timeout),
            },
        )
        .unwrap()
    }

    /// Simulates the plugin process dying: every connection is dropped.
    fn kill(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl Drop for Plugin {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Delays every bucket call.
struct Slow {
    inner: MemoryBackend,
    delay: Duration,
}

struct SlowBucket {
    inner: Box<dyn Bucket>,
    delay: Duration,
}

impl Backend for Slow {
    fn bucket(&self, name: &str) -> Result<Box<dyn Bucket>, BucketError> {
        Ok(Box::new(SlowBucket {
            inner: self.inner.bucket(name)?,
            delay: self.delay,
        }))
    }

    fn close(&self) -> Result<(), BucketError> {
        self.inner.close()
    }
}

impl Bucket for SlowBucket {
    fn put(&self, key: &str, value: &[u8]) -> Result<Item, BucketError> {
        thread::sleep(self.delay);
        self.inner.put(key, value)
    }

    fn get(&self, key: &str) -> Result<Item, BucketError> {
        thread::sleep(self.delay);
        self.inner.get(key)
    }

    fn delete(&self, key: &str) -> Result<(), BucketError> {
        thread::sleep(self.delay);
        self.inner.delete(key)
    }

    fn page(&self, page: u32, per_page: u32) -> Result<Vec<Item>, BucketError> {
        thread::sleep(self.delay);
        self.inner.page(page, per_page)
    }

    fn close(&self) -> Result<(), BucketError> {
        self.inner.close()
    }
}

fn slow(delay: Duration) -> Arc<dyn Backend> {
    Arc::new(Slow {
        inner: MemoryBackend::new(),
        delay,
    })
}

#[test]
fn put_get_delete_round_trip() {
    let plugin = Plugin::tcp(Arc::new(MemoryBackend::new()));
    let backend = plugin.connect();
    let bucket = backend.bucket("a").unwrap();

    let item = bucket.put("k1", b"v1").unwrap();
    assert_eq!(item, Item::new("k1", "v1"));
    assert_eq!(bucket.get("k1").unwrap(), Item::new("k1", "v1"));

    bucket.put("k1", b"v2").unwrap();
    assert_eq!(bucket.get("k1").unwrap().value, b"v2");

    bucket.delete("k1").unwrap();
    assert_eq!(
        bucket.get("k1").unwrap_err(),
        BucketError::KeyNotFound("k1".into())
    );
    // Deleting again is not an error.
    bucket.delete("k1").unwrap();
}

#[test]
fn empty_value_is_kept() {
    let plugin = Plugin::tcp(Arc::new(MemoryBackend::new()));
    let backend = plugin.connect();
    let bucket = backend.bucket("a").unwrap();

    bucket.put("k", b"").unwrap();
    assert_eq!(bucket.get("k").unwrap(), Item::new("k", Vec::<u8>::new()));
}

#[test]
fn pages_are_ordered_and_bounded() {
    let plugin = Plugin::tcp(Arc::new(MemoryBackend::new()));
    let backend = plugin.connect();
    let bucket = backend.bucket("a").unwrap();

    for key in ["d", "b", "e", "a", "c"] {
        bucket.put(key, key.as_bytes()).unwrap();
    }

    let keys = |page, per_page| -> Vec<String> {
        bucket
            .page(page, per_page)
            .unwrap()
            .into_iter()
            .map(|item| item.key)
            .collect()
    };
    assert_eq!(keys(1, 2), vec!["a", "b"]);
    assert_eq!(keys(2, 2), vec!["c", "d"]);
    assert_eq!(keys(3, 2), vec!["e"]);
    assert!(keys(4, 2).is_empty());
    assert!(keys(0, 2).is_empty());
    assert!(keys(1, 0).is_empty());
    assert_eq!(keys(1, 100).len(), 5);
}

#[test]
fn buckets_are_isolated_across_the_wire() {
    let plugin = Plugin::tcp(Arc::new(MemoryBackend::new()));
    let backend = plugin.connect();

    backend.bucket("a").unwrap().put("k", b"from-a").unwrap();
    assert!(matches!(
        backend.bucket("b").unwrap().get("k"),
        Err(BucketError::KeyNotFound(_))
    ));
}

#[test]
fn registry_routes_to_remote_and_local_backends() {
    let served = Arc::new(MemoryBackend::new());
    let plugin = Plugin::tcp(served.clone());
    let local = Arc::new(MemoryBackend::new());

    let registry = Registry::new();
    registry.register_backend("remote", Arc::new(plugin.connect()));
    registry.register_backend("local", local.clone());
    registry.create("remote", "r").unwrap();
    registry.create("local", "l").unwrap();

    registry.bucket("r").unwrap().put("k", b"remote").unwrap();
    registry.bucket("l").unwrap().put("k", b"local").unwrap();

    assert_eq!(served.bucket("r").unwrap().get("k").unwrap().value, b"remote");
    assert_eq!(local.bucket("l").unwrap().get("k").unwrap().value, b"local");
    assert!(matches!(
        local.bucket("r").unwrap().get("k"),
        Err(BucketError::KeyNotFound(_))
    ));

    registry.close().unwrap();
}

#[test]
fn missing_remote_bucket_is_a_remote_failure() {
    // A plugin fronting a registry only knows bound names.
    let plugin = Plugin::tcp(Arc::new(Registry::new()));
    let backend = plugin.connect();

    match backend.bucket("nope").unwrap().get("k") {
        Err(BucketError::Remote { code, message }) => {
            assert_eq!(code, "FailedPrecondition");
            assert!(message.contains("nope"));
        }
        other => panic!("expected remote failure, got {:?}", other),
    }
}

#[test]
fn empty_key_is_rejected_by_the_server() {
    let plugin = Plugin::tcp(Arc::new(MemoryBackend::new()));
    let backend = plugin.connect();

    match backend.bucket("a").unwrap().put("", b"v") {
        Err(BucketError::Remote { code, .. }) => assert_eq!(code, "InvalidArgument"),
        other => panic!("expected remote failure, got {:?}", other),
    }
}

#[test]
fn deadline_is_a_transport_failure() {
    let plugin = Plugin::tcp(slow(Duration::from_millis(800)));
    let backend = plugin.connect();
    let bucket = backend
        .rpc_bucket("a")
        .unwrap()
        .with_deadline(Duration::from_millis(100));

    let err = bucket.get("k").unwrap_err();
    assert!(err.is_transport(), "{:?}", err);
    assert!(!err.is_domain());
}

#[test]
fn put_past_deadline_is_a_transport_failure() {
    let plugin = Plugin::tcp(slow(Duration::from_millis(800)));
    let backend = plugin.connect();
    let bucket = backend
        .rpc_bucket("a")
        .unwrap()
        .with_deadline(Duration::from_millis(100));

    // The server may still apply it; the caller only learns the ack is lost.
    let err = bucket.put("k", b"v").unwrap_err();
    assert!(err.is_transport(), "{:?}", err);
}

#[test]
fn handle_deadline_can_exceed_the_default() {
    let plugin = Plugin::tcp(slow(Duration::from_millis(600)));
    let backend = plugin.connect_with(Duration::from_millis(200));

    let patient = backend
        .rpc_bucket("a")
        .unwrap()
        .with_deadline(Duration::from_secs(5));
    patient.put("k", b"v").unwrap();
    assert_eq!(patient.get("k").unwrap().value, b"v");

    let err = backend.bucket("a").unwrap().get("k").unwrap_err();
    assert!(err.is_transport(), "{:?}", err);
}

#[test]
fn registry_hands_out_buckets_with_deadlines() {
    let plugin = Plugin::tcp(slow(Duration::from_millis(600)));
    let registry = Registry::new();
    registry.register_backend("remote", Arc::new(plugin.connect()));
    registry.create("remote", "r").unwrap();

    let hasty = registry
        .bucket_with_deadline("r", Duration::from_millis(100))
        .unwrap();
    assert!(hasty.get("k").unwrap_err().is_transport());

    registry.bucket("r").unwrap().put("k", b"v").unwrap();
    assert_eq!(registry.bucket("r").unwrap().get("k").unwrap().value, b"v");
}

#[test]
fn unreachable_plugin_is_a_transport_failure() {
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().to_string()
    };
    let backend = RpcBackend::connect(
        &addr,
        RpcOptions {
            connect_timeout: Some(Duration::from_secs(1)),
            request_timeout: Some(Duration::from_secs(2)),
        },
    )
    .unwrap();

    let bucket = backend.bucket("a").unwrap();
    assert!(bucket.get("k").unwrap_err().is_transport());
    assert!(bucket.put("k", b"v").unwrap_err().is_transport());
}

#[test]
fn severed_connection_leaves_registry_intact() {
    let mut plugin = Plugin::tcp(slow(Duration::from_secs(2)));
    let local = Arc::new(MemoryBackend::new());

    let registry = Arc::new(Registry::new());
    registry.register_backend("remote", Arc::new(plugin.connect()));
    registry.register_backend("local", local);
    registry.create("remote", "r").unwrap();
    registry.create("local", "l").unwrap();

    let caller = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || registry.bucket("r").unwrap().put("k", b"v"))
    };
    thread::sleep(Duration::from_millis(300));
    plugin.kill();

    let err = caller.join().unwrap().unwrap_err();
    assert!(err.is_transport(), "{:?}", err);

    let mut bindings = registry.buckets();
    bindings.sort();
    assert_eq!(
        bindings,
        vec![
            ("l".to_string(), "local".to_string()),
            ("r".to_string(), "remote".to_string()),
        ]
    );
    registry.bucket("l").unwrap().put("k", b"still works").unwrap();
    assert!(registry.bucket("r").unwrap().get("k").unwrap_err().is_transport());
}

#[test]
fn closed_backend_rejects_calls() {
    let plugin = Plugin::tcp(Arc::new(MemoryBackend::new()));
    let backend = plugin.connect();
    let bucket = backend.bucket("a").unwrap();
    bucket.put("k", b"v").unwrap();

    backend.close().unwrap();
    backend.close().unwrap();

    assert!(matches!(bucket.get("k"), Err(BucketError::Closed(_))));
    assert!(matches!(backend.bucket("a"), Err(BucketError::Closed(_))));
}

#[test]
fn concurrent_callers_share_one_backend() {
    let served = Arc::new(MemoryBackend::new());
    let plugin = Plugin::tcp(served.clone());
    let backend = Arc::new(plugin.connect());

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let backend = Arc::clone(&backend);
            thread::spawn(move || {
                let bucket = backend.bucket("shared").unwrap();
                for i in 0..20 {
                    let key = format!("t{}-{:02}", t, i);
                    bucket.put(&key, key.as_bytes()).unwrap();
                    assert_eq!(bucket.get(&key).unwrap().value, key.as_bytes());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let all = backend.bucket("shared").unwrap().page(1, 1000).unwrap();
    assert_eq!(all.len(), 160);
    assert!(all.windows(2).all(|w| w[0].key < w[1].key));
    assert_eq!(served.bucket("shared").unwrap().page(1, 1000).unwrap(), all);
}

#[test]
fn unix_socket_round_trip() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("sockets").join("mem.sock");
    let plugin = Plugin::unix(Arc::new(MemoryBackend::new()), &path);
    assert!(path.exists());

    let backend = plugin.connect();
    let bucket = backend.bucket("a").unwrap();
    bucket.put("k", b"over uds").unwrap();
    assert_eq!(bucket.get("k").unwrap().value, b"over uds");
}
