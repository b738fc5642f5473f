use std::time::Duration;

use crate::error::BucketError;

/// An Item is a key value pair saved in a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub key: String,
    pub value: Vec<u8>,
}

impl Item {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Bucket manages a named collection of items inside one backend.
///
/// Every call blocks until the backend answers. Implementations must be safe to
/// share between threads: several callers may use the same handle at once.
pub trait Bucket: Send + Sync {
    /// Create or overwrite the item at `key`. Returns the stored item, which may
    /// differ from the input if the backend normalizes it.
    fn put(&self, key: &str, value: &[u8]) -> Result<Item, BucketError>;

    /// Exact-key lookup. Returns `BucketError::KeyNotFound` if absent.
    fn get(&self, key: &str) -> Result<Item, BucketError>;

    /// Delete an item. Deleting a missing key succeeds.
    fn delete(&self, key: &str) -> Result<(), BucketError>;

    /// Return page `page` (1-indexed) of the items ordered by key, at most
    /// `per_page` long. Page 0, a zero page size or a page past the end yield an
    /// empty vector.
    fn page(&self, page: u32, per_page: u32) -> Result<Vec<Item>, BucketError>;

    /// Release bucket-scoped resources. Calling it twice is fine.
    fn close(&self) -> Result<(), BucketError>;
}

/// Backend produces buckets. It owns the underlying store or connection.
pub trait Backend: Send + Sync {
    /// Resolve the bucket called `name`, creating it lazily if needed.
    fn bucket(&self, name: &str) -> Result<Box<dyn Bucket>, BucketError>;

    /// Like [`Backend::bucket`], but calls on the returned handle give up after
    /// `deadline`. Backends that answer in-process ignore it.
    fn bucket_with_deadline(&self, name: &str, deadline: Duration) -> Result<Box<dyn Bucket>, BucketError> {
        let _ = deadline;
        self.bucket(name)
    }

    /// Release the store or connection. Buckets obtained earlier stop working.
    /// Calling it twice is fine.
    fn close(&self) -> Result<(), BucketError>;
}

/// Skip/take bounds for a 1-indexed page, or `None` when the page is empty by
/// definition.
pub fn page_bounds(page: u32, per_page: u32) -> Option<(usize, usize)> {
    if page == 0 || per_page == 0 {
        return None;
    }
    let skip = (page as usize - 1).checked_mul(per_page as usize)?;
    Some((skip, per_page as usize))
}

pub(crate) fn check_key(key: &str) -> Result<(), BucketError> {
    if key.is_empty() {
        return Err(BucketError::InvalidArgument("empty key".to_string()));
    }
    Ok(())
}
