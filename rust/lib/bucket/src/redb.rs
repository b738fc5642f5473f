use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use redb::{Database, ReadableTable, TableDefinition, TableError};
use tracing::{debug, info};

use crate::error::BucketError;
use crate::registry::BindingStore;
use crate::traits::{check_key, page_bounds, Backend, Bucket, Item};

const BINDINGS: TableDefinition<&str, &str> = TableDefinition::new("bindings");

fn storage_err<E: Into<redb::Error>>(e: E) -> BucketError {
    BucketError::Storage(e.into().to_string())
}

/// Shared handle to the database. `None` once the backend is closed.
type Db = Arc<RwLock<Option<Database>>>;

/// RedbBackend is a Backend backed by redb, a pure-Rust embedded key-value
/// database. Each bucket is a table of `&str -> &[u8]` in a single file.
pub struct RedbBackend {
    db: Db,
}

impl RedbBackend {
    /// Open or create a redb database at the given path.
    pub fn open(path: &Path) -> Result<Self, BucketError> {
        let db = Database::create(path).map_err(storage_err)?;
        info!("redb backend opened at {}", path.display());
        Ok(Self {
            db: Arc::new(RwLock::new(Some(db))),
        })
    }
}

impl Backend for RedbBackend {
    fn bucket(&self, name: &str) -> Result<Box<dyn Bucket>, BucketError> {
        if name.is_empty() {
            return Err(BucketError::InvalidArgument("empty bucket name".to_string()));
        }

        // The table is created by the first write; readers treat a missing
        // table as empty.
        with_db(&self.db, name, |_| Ok(()))?;
        debug!(bucket = name, "redb backend: bucket ready");

        Ok(Box::new(RedbBucket {
            name: name.to_string(),
            db: Arc::clone(&self.db),
            closed: AtomicBool::new(false),
        }))
    }

    fn close(&self) -> Result<(), BucketError> {
        let mut db = self.db.write().unwrap_or_else(PoisonError::into_inner);
        if db.take().is_some() {
            info!("redb backend closed");
        }
        Ok(())
    }
}

fn table(name: &str) -> TableDefinition<'_, &'static str, &'static [u8]> {
    TableDefinition::new(name)
}

fn with_db<T>(
    db: &Db,
    name: &str,
    f: impl FnOnce(&Database) -> Result<T, BucketError>,
) -> Result<T, BucketError> {
    let guard = db.read().unwrap_or_else(PoisonError::into_inner);
    match guard.as_ref() {
        Some(db) => f(db),
        None => Err(BucketError::Closed(name.to_string())),
    }
}

/// Handle on one table of a [`RedbBackend`].
pub struct RedbBucket {
    name: String,
    db: Db,
    closed: AtomicBool,
}

impl RedbBucket {
    fn with_db<T>(&self, f: impl FnOnce(&Database) -> Result<T, BucketError>) -> Result<T, BucketError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BucketError::Closed(self.name.clone()));
        }
        with_db(&self.db, &self.name, f)
    }
}

impl Bucket for RedbBucket {
    fn put(&self, key: &str, value: &[u8]) -> Result<Item, BucketError> {
        check_key(key)?;
        self.with_db(|db| {
            let write_txn = db.begin_write().map_err(storage_err)?;
            {
                let mut table = write_txn
                    .open_table(table(&self.name))
                    .map_err(storage_err)?;
                table.insert(key, value).map_err(storage_err)?;
            }
            write_txn.commit().map_err(storage_err)?;
            Ok(Item::new(key, value))
        })
    }

    fn get(&self, key: &str) -> Result<Item, BucketError> {
        self.with_db(|db| {
            let read_txn = db.begin_read().map_err(storage_err)?;
            let table = match read_txn.open_table(table(&self.name)) {
                Ok(table) => table,
                Err(TableError::TableDoesNotExist(_)) => {
                    return Err(BucketError::KeyNotFound(key.to_string()))
                }
                Err(e) => return Err(storage_err(e)),
            };

            match table.get(key).map_err(storage_err)? {
                Some(val) => Ok(Item::new(key, val.value().to_vec())),
                None => Err(BucketError::KeyNotFound(key.to_string())),
            }
        })
    }

    fn delete(&self, key: &str) -> Result<(), BucketError> {
        self.with_db(|db| {
            let write_txn = db.begin_write().map_err(storage_err)?;
            {
                let mut table = write_txn
                    .open_table(table(&self.name))
                    .map_err(storage_err)?;
                table.remove(key).map_err(storage_err)?;
            }
            write_txn.commit().map_err(storage_err)
        })
    }

    fn page(&self, page: u32, per_page: u32) -> Result<Vec<Item>, BucketError> {
        let Some((skip, take)) = page_bounds(page, per_page) else {
            return self.with_db(|_| Ok(Vec::new()));
        };
        self.with_db(|db| {
            let read_txn = db.begin_read().map_err(storage_err)?;
            let table = match read_txn.open_table(table(&self.name)) {
                Ok(table) => table,
                Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
                Err(e) => return Err(storage_err(e)),
            };

            let mut items = Vec::new();
            for entry in table.iter().map_err(storage_err)?.skip(skip).take(take) {
                let (key, value) = entry.map_err(storage_err)?;
                items.push(Item::new(key.value(), value.value().to_vec()));
            }
            Ok(items)
        })
    }

    fn close(&self) -> Result<(), BucketError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// RedbBindings persists registry bucket bindings (bucket -> backend) in a
/// redb file so they survive restarts.
pub struct RedbBindings {
    db: Database,
}

impl RedbBindings {
    pub fn open(path: &Path) -> Result<Self, BucketError> {
        let db = Database::create(path).map_err(storage_err)?;

        let write_txn = db.begin_write().map_err(storage_err)?;
        {
            let _table = write_txn.open_table(BINDINGS).map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)?;

        Ok(Self { db })
    }
}

impl BindingStore for RedbBindings {
    fn load(&self) -> Result<Vec<(String, String)>, BucketError> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let table = read_txn.open_table(BINDINGS).map_err(storage_err)?;

        let mut bindings = Vec::new();
        for entry in table.iter().map_err(storage_err)? {
            let (bucket, backend) = entry.map_err(storage_err)?;
            bindings.push((bucket.value().to_string(), backend.value().to_string()));
        }
        Ok(bindings)
    }

    fn save(&self, bucket: &str, backend: &str) -> Result<(), BucketError> {
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = write_txn.open_table(BINDINGS).map_err(storage_err)?;
            table.insert(bucket, backend).map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)
    }
}
