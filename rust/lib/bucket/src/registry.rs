use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::BucketError;
use crate::traits::{Backend, Bucket};

/// BindingStore persists bucket -> backend bindings across restarts.
pub trait BindingStore: Send + Sync {
    /// All stored bindings as `(bucket, backend)` pairs.
    fn load(&self) -> Result<Vec<(String, String)>, BucketError>;

    /// Record a new binding.
    fn save(&self, bucket: &str, backend: &str) -> Result<(), BucketError>;
}

#[derive(Default)]
struct Tables {
    backends: HashMap<String, Arc<dyn Backend>>,
    /// bucket name -> backend name
    buckets: HashMap<String, String>,
}

/// Registry routes bucket names to the backend that owns them.
///
/// Both maps live behind one lock, so a reader sees a binding either fully
/// recorded or not at all. Backend calls are made after the lock is released.
///
/// ```ignore
/// let registry = Registry::new();
/// registry.register_backend("mem", Arc::new(MemoryBackend::new()));
/// registry.create("mem", "a")?;
/// let bucket = registry.bucket("a")?;
/// bucket.put("k1", b"v1")?;
/// registry.close()?;
/// ```
#[derive(Default)]
pub struct Registry {
    tables: RwLock<Tables>,
    bindings: Option<Box<dyn BindingStore>>,
}

impl Registry {
    /// Create an empty registry whose bindings live in memory only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry backed by `store`, loading the bindings it holds.
    pub fn with_bindings(store: Box<dyn BindingStore>) -> Result<Self, BucketError> {
        let mut tables = Tables::default();
        for (bucket, backend) in store.load()? {
            tables.buckets.insert(bucket, backend);
        }
        info!("registry loaded {} bucket bindings", tables.buckets.len());

        Ok(Self {
            tables: RwLock::new(tables),
            bindings: Some(store),
        })
    }

    /// Bind `name` to `backend`. Re-registering a name replaces the previous
    /// backend, which is handed back to the caller to close if needed.
    pub fn register_backend(
        &self,
        name: &str,
        backend: Arc<dyn Backend>,
    ) -> Option<Arc<dyn Backend>> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let previous = tables.backends.insert(name.to_string(), backend);
        if previous.is_some() {
            warn!(backend = name, "backend re-registered, previous binding replaced");
        } else {
            info!(backend = name, "backend registered");
        }
        previous
    }

    /// Create a bucket on the backend registered as `backend_name`.
    pub fn create(&self, backend_name: &str, bucket_name: &str) -> Result<(), BucketError> {
        if bucket_name.is_empty() {
            return Err(BucketError::InvalidArgument("empty bucket name".to_string()));
        }

        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        if !tables.backends.contains_key(backend_name) {
            return Err(BucketError::BackendNotFound(backend_name.to_string()));
        }
        if tables.buckets.contains_key(bucket_name) {
            return Err(BucketError::BucketAlreadyExists(bucket_name.to_string()));
        }

        if let Some(store) = &self.bindings {
            store.save(bucket_name, backend_name)?;
        }
        tables
            .buckets
            .insert(bucket_name.to_string(), backend_name.to_string());

        info!(bucket = bucket_name, backend = backend_name, "bucket created");
        Ok(())
    }

    fn owner(&self, name: &str) -> Result<Arc<dyn Backend>, BucketError> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        let backend_name = tables
            .buckets
            .get(name)
            .ok_or_else(|| BucketError::BucketNotFound(name.to_string()))?;
        tables
            .backends
            .get(backend_name)
            .cloned()
            .ok_or_else(|| BucketError::BackendNotFound(backend_name.clone()))
    }

    /// Fetch a bucket directly from its backend.
    pub fn bucket(&self, name: &str) -> Result<Box<dyn Bucket>, BucketError> {
        let backend = self.owner(name)?;
        debug!(bucket = name, "resolving bucket");
        backend.bucket(name)
    }

    /// Fetch a bucket whose calls give up after `deadline` when its backend
    /// is remote.
    pub fn bucket_with_deadline(&self, name: &str, deadline: Duration) -> Result<Box<dyn Bucket>, BucketError> {
        let backend = self.owner(name)?;
        debug!(bucket = name, ?deadline, "resolving bucket");
        backend.bucket_with_deadline(name, deadline)
    }

    /// Names of the registered backends, sorted.
    pub fn backends(&self) -> Vec<String> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<_> = tables.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Bucket bindings as `(bucket, backend)` pairs, sorted by bucket.
    pub fn buckets(&self) -> Vec<(String, String)> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        let mut bindings: Vec<_> = tables
            .buckets
            .iter()
            .map(|(bucket, backend)| (bucket.clone(), backend.clone()))
            .collect();
        bindings.sort();
        bindings
    }

    /// Close every registered backend. All backends are attempted; the first
    /// failure is returned.
    pub fn close(&self) -> Result<(), BucketError> {
        let backends: Vec<(String, Arc<dyn Backend>)> = {
            let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
            tables
                .backends
                .iter()
                .map(|(name, backend)| (name.clone(), Arc::clone(backend)))
                .collect()
        };

        let mut first_err = None;
        for (name, backend) in backends {
            match backend.close() {
                Ok(()) => debug!(backend = %name, "backend closed"),
                Err(e) => {
                    warn!(backend = %name, error = %e, "failed to close backend");
                    first_err.get_or_insert(e);
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// A registry is itself a backend: it resolves bucket names to the owning
/// backend, which lets it be served to remote clients.
impl Backend for Registry {
    fn bucket(&self, name: &str) -> Result<Box<dyn Bucket>, BucketError> {
        Registry::bucket(self, name)
    }

    fn bucket_with_deadline(&self, name: &str, deadline: Duration) -> Result<Box<dyn Bucket>, BucketError> {
        Registry::bucket_with_deadline(self, name, deadline)
    }

    fn close(&self) -> Result<(), BucketError> {
        Registry::close(self)
    }
}
