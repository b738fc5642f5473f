//! Bucket storage contract.
//!
//! A [`Bucket`] is a named collection of [`Item`]s. A [`Backend`] hands out
//! buckets from one store, either in-process ([`MemoryBackend`],
//! [`RedbBackend`]) or in a plugin process reached over the network. The
//! [`Registry`] maps backend names and bucket names to live backends.

pub mod error;
pub mod memory;
pub mod redb;
pub mod registry;
pub mod traits;

pub use error::{BucketError, Result};
pub use memory::MemoryBackend;
pub use self::redb::{RedbBackend, RedbBindings};
pub use registry::{BindingStore, Registry};
pub use traits::{page_bounds, Backend, Bucket, Item};
