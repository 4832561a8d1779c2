//! RocksDB storage for the allocation ledger
//!
//! Persists subnets, per-address ledger rows and the external records the
//! provisioning flow touches. Uses an optimistic-transaction database so every
//! state transition is a compare-and-swap: rows read with
//! [`LedgerTxn`] are validated at commit and a concurrent writer makes the
//! later commit fail with [`StorageError::Conflict`].
//!
//! # Architecture
//!
//! - **subnets**: subnet id -> subnet row
//! - **addresses**: subnet id ++ address -> ledger row (ascending scan order)
//! - **indexes**: address -> owning subnet, service -> bound address
//! - **entities**: routers, plans, customer services, sync records
//! - **meta**: id sequences
//!
//! # Examples
//!
//! ```no_run
//! use ripam_db::{LedgerStore, Sequence, StorageError};
//! use ripam_core::{Router, RouterId, RouterStatus};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = LedgerStore::open("./data/ripam")?;
//!
//! let router = Router {
//!     id: RouterId(store.next_id(Sequence::Router)?),
//!     name: "core-1".to_string(),
//!     status: RouterStatus::Online,
//! };
//! store.atomically(|tx| tx.put_entity(&router))?;
//!
//! let stored: Option<Router> = store.entity(router.id.0)?;
//! assert!(stored.is_some());
//! # let _ = StorageError::NotFound(String::new());
//! # Ok(())
//! # }
//! ```

use ripam_core::{Address, RipamError, ServiceId, Subnet, SubnetId};
use rocksdb::{
    BlockBasedOptions, ColumnFamily, Direction, ErrorKind, IteratorMode, OptimisticTransactionDB,
    Options,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

mod entity;
mod keys;
mod txn;

pub use entity::Entity;
pub use txn::LedgerTxn;

use keys::*;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// Database operation failed
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Serialization failed
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Data not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid data format
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Optimistic transaction lost a race
    #[error("Write conflict: {0}")]
    Conflict(String),

    /// Address row already present
    #[error("Address {0} already exists")]
    Duplicate(Ipv4Addr),
}

impl From<rocksdb::Error> for StorageError {
    fn from(err: rocksdb::Error) -> Self {
        match err.kind() {
            ErrorKind::Busy | ErrorKind::TryAgain => StorageError::Conflict(err.to_string()),
            _ => StorageError::DatabaseError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::SerializationError(err.to_string())
    }
}

impl From<StorageError> for RipamError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::DatabaseError(msg) | StorageError::InvalidData(msg) => {
                RipamError::Database(msg)
            }
            StorageError::SerializationError(msg) => RipamError::Serialization(msg),
            StorageError::NotFound(msg) => RipamError::NotFound(msg),
            StorageError::Conflict(msg) => RipamError::Conflict(msg),
            StorageError::Duplicate(ip) => {
                RipamError::NotAvailable(format!("{} already exists in the ledger", ip))
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Id sequences kept in the meta column family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sequence {
    Subnet,
    Address,
    Router,
    Plan,
    Service,
}

impl Sequence {
    const COUNT: usize = 5;
    const ALL: [Sequence; Sequence::COUNT] = [
        Sequence::Subnet,
        Sequence::Address,
        Sequence::Router,
        Sequence::Plan,
        Sequence::Service,
    ];

    fn meta_key(self) -> &'static [u8] {
        match self {
            Sequence::Subnet => b"seq:subnet",
            Sequence::Address => b"seq:address",
            Sequence::Router => b"seq:router",
            Sequence::Plan => b"seq:plan",
            Sequence::Service => b"seq:service",
        }
    }
}

/// Persistent allocation ledger storage
///
/// Constructed explicitly and shared behind an `Arc`; dropping the last handle
/// closes the database.
pub struct LedgerStore {
    db: Arc<OptimisticTransactionDB>,
    sequences: Mutex<[u64; Sequence::COUNT]>,
}

impl LedgerStore {
    /// Open or create a ledger database
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the database directory
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        // Configure compression
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        // Configure block cache (64MB)
        let mut block_opts = BlockBasedOptions::default();
        block_opts.set_block_cache(&rocksdb::Cache::new_lru_cache(64 * 1024 * 1024));
        opts.set_block_based_table_factory(&block_opts);

        let db: OptimisticTransactionDB = OptimisticTransactionDB::open_cf(&opts, path, ALL_CFS)?;

        let mut sequences = [0u64; Sequence::COUNT];
        {
            let meta = db
                .cf_handle(CF_META)
                .ok_or_else(|| StorageError::DatabaseError("Column family meta not found".into()))?;
            for seq in Sequence::ALL {
                if let Some(bytes) = db.get_cf(meta, seq.meta_key())? {
                    sequences[seq as usize] = decode_u64(&bytes)?;
                }
            }
        }

        tracing::debug!(?sequences, "opened ledger store");

        Ok(Self {
            db: Arc::new(db),
            sequences: Mutex::new(sequences),
        })
    }

    /// Allocate a single id
    pub fn next_id(&self, seq: Sequence) -> Result<u64> {
        self.reserve_ids(seq, 1)
    }

    /// Allocate `count` consecutive ids, returning the first
    pub fn reserve_ids(&self, seq: Sequence, count: u64) -> Result<u64> {
        let mut sequences = self
            .sequences
            .lock()
            .map_err(|_| StorageError::DatabaseError("sequence lock poisoned".into()))?;
        let first = sequences[seq as usize] + 1;
        let last = sequences[seq as usize] + count;

        self.db
            .put_cf(self.cf(CF_META)?, seq.meta_key(), last.to_be_bytes())?;
        sequences[seq as usize] = last;

        Ok(first)
    }

    /// Run `f` inside an optimistic transaction and commit it
    ///
    /// Returning `Err` from `f` discards every write. A commit that loses a
    /// race against another transaction returns [`StorageError::Conflict`].
    pub fn atomically<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&LedgerTxn<'_>) -> std::result::Result<T, E>,
        E: From<StorageError>,
    {
        let tx = LedgerTxn::new(self, self.db.transaction());
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Get a subnet row
    pub fn subnet(&self, id: SubnetId) -> Result<Option<Subnet>> {
        self.get_json(CF_SUBNETS, &subnet_key(id))
    }

    /// All subnets in id order
    pub fn subnets(&self) -> Result<Vec<Subnet>> {
        let cf = self.cf(CF_SUBNETS)?;
        collect_prefixed(self.db.iterator_cf(cf, IteratorMode::Start), &[])
    }

    /// Find an address row by value
    pub fn address(&self, ip: Ipv4Addr) -> Result<Option<Address>> {
        match self.get_raw(CF_INDEXES, &ip_index_key(ip))? {
            Some(subnet) => {
                let subnet = SubnetId(decode_u64(&subnet)?);
                self.get_json(CF_ADDRESSES, &address_key(subnet, ip))
            }
            None => Ok(None),
        }
    }

    /// Every address row of a subnet, ascending
    pub fn addresses_in(&self, subnet: SubnetId) -> Result<Vec<Address>> {
        let prefix = subnet_key(subnet);
        let cf = self.cf(CF_ADDRESSES)?;
        collect_prefixed(
            self.db
                .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward)),
            &prefix,
        )
    }

    /// Whether any address row exists for the subnet
    pub fn has_addresses(&self, subnet: SubnetId) -> Result<bool> {
        let prefix = subnet_key(subnet);
        let cf = self.cf(CF_ADDRESSES)?;
        let mut iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));
        match iter.next() {
            Some(item) => {
                let (key, _) = item?;
                Ok(key.starts_with(&prefix))
            }
            None => Ok(false),
        }
    }

    /// Lowest available address of a subnet at or above `from`
    pub fn first_available(
        &self,
        subnet: SubnetId,
        from: Option<Ipv4Addr>,
    ) -> Result<Option<Address>> {
        let prefix = subnet_key(subnet);
        let start = address_key(subnet, from.unwrap_or(Ipv4Addr::UNSPECIFIED));
        let cf = self.cf(CF_ADDRESSES)?;

        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&start, Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let address: Address = serde_json::from_slice(&value)?;
            if address.is_available() {
                return Ok(Some(address));
            }
        }

        Ok(None)
    }

    /// Address currently bound to a service
    pub fn service_address(&self, service: ServiceId) -> Result<Option<Ipv4Addr>> {
        self.get_raw(CF_INDEXES, &service_index_key(service))?
            .map(|bytes| decode_ipv4(&bytes))
            .transpose()
    }

    /// Get an entity record by id
    pub fn entity<E: Entity>(&self, id: u64) -> Result<Option<E>> {
        self.get_json(CF_ENTITIES, &tagged_key(E::TAG, id))
    }

    /// All entities of one kind in id order
    pub fn entities<E: Entity>(&self) -> Result<Vec<E>> {
        let prefix = [E::TAG];
        let cf = self.cf(CF_ENTITIES)?;
        collect_prefixed(
            self.db
                .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward)),
            &prefix,
        )
    }

    fn get_raw(&self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get_cf(self.cf(cf)?, key)?)
    }

    fn get_json<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        match self.get_raw(cf, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Get column family handle
    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::DatabaseError(format!("Column family {} not found", name)))
    }
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Decode values while keys start with `prefix`
pub(crate) fn collect_prefixed<T, I>(iter: I, prefix: &[u8]) -> Result<Vec<T>>
where
    T: DeserializeOwned,
    I: Iterator<Item = std::result::Result<(Box<[u8]>, Box<[u8]>), rocksdb::Error>>,
{
    let mut out = Vec::new();
    for item in iter {
        let (key, value) = item?;
        if !key.starts_with(prefix) {
            break;
        }
        out.push(serde_json::from_slice(&value)?);
    }
    Ok(out)
}
