use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::error::BucketError;
use crate::traits::{check_key, page_bounds, Backend, Bucket, Item};

type Items = Arc<RwLock<BTreeMap<String, Vec<u8>>>>;

/// MemoryBackend keeps every bucket in a process-local sorted map.
///
/// Buckets are created on first use and shared by every handle that resolves
/// the same name. Nothing survives the process.
#[derive(Default)]
pub struct MemoryBackend {
    buckets: RwLock<HashMap<String, Items>>,
    closed: Arc<AtomicBool>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buckets created so far.
    pub fn bucket_count(&self) -> usize {
        self.buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Backend for MemoryBackend {
    fn bucket(&self, name: &str) -> Result<Box<dyn Bucket>, BucketError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BucketError::Closed("memory backend".to_string()));
        }

        let existing = self
            .buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned();
        let items = match existing {
            Some(items) => items,
            None => {
                let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
                buckets
                    .entry(name.to_string())
                    .or_insert_with(|| {
                        debug!(bucket = name, "memory backend: new bucket");
                        Items::default()
                    })
                    .clone()
            }
        };

        Ok(Box::new(MemoryBucket {
            name: name.to_string(),
            items,
            backend_closed: Arc::clone(&self.closed),
            closed: AtomicBool::new(false),
        }))
    }

    fn close(&self) -> Result<(), BucketError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.buckets
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
        }
        Ok(())
    }
}

/// Handle on one bucket of a [`MemoryBackend`].
pub struct MemoryBucket {
    name: String,
    items: Items,
    backend_closed: Arc<AtomicBool>,
    closed: AtomicBool,
}

impl MemoryBucket {
    fn ensure_open(&self) -> Result<(), BucketError> {
        if self.closed.load(Ordering::Acquire) || self.backend_closed.load(Ordering::Acquire) {
            return Err(BucketError::Closed(self.name.clone()));
        }
        Ok(())
    }
}

impl Bucket for MemoryBucket {
    fn put(&self, key: &str, value: &[u8]) -> Result<Item, BucketError> {
        self.ensure_open()?;
        check_key(key)?;
        self.items
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_vec());
        Ok(Item::new(key, value))
    }

    fn get(&self, key: &str) -> Result<Item, BucketError> {
        self.ensure_open()?;
        let items = self.items.read().unwrap_or_else(PoisonError::into_inner);
        match items.get(key) {
            Some(value) => Ok(Item::new(key, value.clone())),
            None => Err(BucketError::KeyNotFound(key.to_string())),
        }
    }

    fn delete(&self, key: &str) -> Result<(), BucketError> {
        self.ensure_open()?;
        self.items
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }

    fn page(&self, page: u32, per_page: u32) -> Result<Vec<Item>, BucketError> {
        self.ensure_open()?;
        let Some((skip, take)) = page_bounds(page, per_page) else {
            return Ok(Vec::new());
        };
        let items = self.items.read().unwrap_or_else(PoisonError::into_inner);
        Ok(items
            .iter()
            .skip(skip)
            .take(take)
            .map(|(k, v)| Item::new(k.clone(), v.clone()))
            .collect())
    }

    fn close(&self) -> Result<(), BucketError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(backend: &MemoryBackend, name: &str, n: usize) -> Box<dyn Bucket> {
        let bucket = backend.bucket(name).unwrap();
        for i in 0..n {
            bucket
                .put(&format!("key:{:02}", i), format!("v{}", i).as_bytes())
                .unwrap();
        }
        bucket
    }

    #[test]
    fn put_get_delete() {
        let backend = MemoryBackend::new();
        let bucket = backend.bucket("a").unwrap();

        let item = bucket.put("k1", b"v1").unwrap();
        assert_eq!(item, Item::new("k1", b"v1".to_vec()));
        assert_eq!(bucket.get("k1").unwrap(), item);

        bucket.delete("k1").unwrap();
        assert_eq!(
            bucket.get("k1"),
            Err(BucketError::KeyNotFound("k1".to_string()))
        );
    }

    #[test]
    fn delete_missing_key_succeeds() {
        let backend = MemoryBackend::new();
        let bucket = backend.bucket("a").unwrap();
        bucket.delete("never-written").unwrap();
    }

    #[test]
    fn empty_value_is_kept() {
        let backend = MemoryBackend::new();
        let bucket = backend.bucket("a").unwrap();
        bucket.put("k", b"").unwrap();
        assert_eq!(bucket.get("k").unwrap().value, Vec::<u8>::new());
    }

    #[test]
    fn empty_key_rejected() {
        let backend = MemoryBackend::new();
        let bucket = backend.bucket("a").unwrap();
        assert!(matches!(
            bucket.put("", b"v"),
            Err(BucketError::InvalidArgument(_))
        ));
    }

    #[test]
    fn handles_share_bucket_contents() {
        let backend = MemoryBackend::new();
        let first = backend.bucket("shared").unwrap();
        let second = backend.bucket("shared").unwrap();
        let other = backend.bucket("other").unwrap();

        first.put("k", b"v").unwrap();
        assert_eq!(second.get("k").unwrap().value, b"v".to_vec());
        assert!(other.get("k").is_err());
        assert_eq!(backend.bucket_count(), 2);
    }

    #[test]
    fn pages_are_ordered_and_bounded() {
        let backend = MemoryBackend::new();
        let bucket = filled(&backend, "a", 7);

        let first = bucket.page(1, 3).unwrap();
        let keys: Vec<_> = first.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, vec!["key:00", "key:01", "key:02"]);

        let last = bucket.page(3, 3).unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].key, "key:06");

        assert!(bucket.page(4, 3).unwrap().is_empty());
        assert!(bucket.page(0, 3).unwrap().is_empty());
        assert!(bucket.page(1, 0).unwrap().is_empty());
        assert!(bucket.page(u32::MAX, u32::MAX).unwrap().is_empty());
    }

    #[test]
    fn closed_bucket_rejects_calls() {
        let backend = MemoryBackend::new();
        let bucket = backend.bucket("a").unwrap();
        bucket.close().unwrap();
        bucket.close().unwrap();
        assert!(matches!(bucket.get("k"), Err(BucketError::Closed(_))));

        // Other handles on the same bucket are unaffected.
        let again = backend.bucket("a").unwrap();
        again.put("k", b"v").unwrap();
    }

    #[test]
    fn close_is_idempotent() {
        let backend = MemoryBackend::new();
        let bucket = backend.bucket("a").unwrap();
        backend.close().unwrap();
        backend.close().unwrap();

        assert!(matches!(backend.bucket("a"), Err(BucketError::Closed(_))));
        assert!(matches!(bucket.put("k", b"v"), Err(BucketError::Closed(_))));
    }
}
