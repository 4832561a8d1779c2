//! Typed access inside an optimistic transaction
//!
//! Point reads go through `get_for_update`, so any row this transaction read
//! and another transaction wrote in the meantime fails the commit.

use crate::keys::*;
use crate::{collect_prefixed, encode, Entity, LedgerStore, Result, StorageError};
use ripam_core::{Address, CustomerId, ServiceId, Subnet, SubnetId};
use rocksdb::{Direction, IteratorMode, OptimisticTransactionDB, Transaction};
use serde::de::DeserializeOwned;
use std::net::Ipv4Addr;

pub struct LedgerTxn<'a> {
    store: &'a LedgerStore,
    txn: Transaction<'a, OptimisticTransactionDB>,
}

impl<'a> LedgerTxn<'a> {
    pub(crate) fn new(store: &'a LedgerStore, txn: Transaction<'a, OptimisticTransactionDB>) -> Self {
        Self { store, txn }
    }

    pub(crate) fn commit(self) -> Result<()> {
        Ok(self.txn.commit()?)
    }

    pub fn subnet(&self, id: SubnetId) -> Result<Option<Subnet>> {
        self.get_json(CF_SUBNETS, &subnet_key(id))
    }

    pub fn put_subnet(&self, subnet: &Subnet) -> Result<()> {
        self.put(CF_SUBNETS, &subnet_key(subnet.id), &encode(subnet)?)
    }

    pub fn delete_subnet(&self, id: SubnetId) -> Result<()> {
        self.delete(CF_SUBNETS, &subnet_key(id))
    }

    /// Read an address row (and its index entry) for update
    pub fn address(&self, ip: Ipv4Addr) -> Result<Option<Address>> {
        match self.get(CF_INDEXES, &ip_index_key(ip))? {
            Some(subnet) => {
                let subnet = SubnetId(decode_u64(&subnet)?);
                self.get_json(CF_ADDRESSES, &address_key(subnet, ip))
            }
            None => Ok(None),
        }
    }

    /// Overwrite an existing address row
    pub fn put_address(&self, address: &Address) -> Result<()> {
        self.put(
            CF_ADDRESSES,
            &address_key(address.subnet_id, address.address),
            &encode(address)?,
        )
    }

    /// Insert a new address row, failing if the address exists anywhere
    pub fn insert_address(&self, address: &Address) -> Result<()> {
        let index = ip_index_key(address.address);
        if self.get(CF_INDEXES, &index)?.is_some() {
            return Err(StorageError::Duplicate(address.address));
        }
        self.put(CF_INDEXES, &index, &address.subnet_id.0.to_be_bytes())?;
        self.put_address(address)
    }

    /// Delete an address row and its index entry
    pub fn remove_address(&self, address: &Address) -> Result<()> {
        self.delete(CF_ADDRESSES, &address_key(address.subnet_id, address.address))?;
        self.delete(CF_INDEXES, &ip_index_key(address.address))
    }

    /// Every address row of a subnet as seen by this transaction
    pub fn addresses_in(&self, subnet: SubnetId) -> Result<Vec<Address>> {
        let prefix = subnet_key(subnet);
        let cf = self.store.cf(CF_ADDRESSES)?;
        collect_prefixed(
            self.txn
                .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward)),
            &prefix,
        )
    }

    pub fn service_address(&self, service: ServiceId) -> Result<Option<Ipv4Addr>> {
        self.get(CF_INDEXES, &service_index_key(service))?
            .map(|bytes| decode_ipv4(&bytes))
            .transpose()
    }

    pub fn bind_service(&self, service: ServiceId, ip: Ipv4Addr) -> Result<()> {
        self.put(CF_INDEXES, &service_index_key(service), &ip.octets())
    }

    pub fn unbind_service(&self, service: ServiceId) -> Result<()> {
        self.delete(CF_INDEXES, &service_index_key(service))
    }

    /// The service last recorded as the customer's live one, read for update
    pub fn live_service(&self, customer: CustomerId) -> Result<Option<ServiceId>> {
        self.get(CF_INDEXES, &customer_index_key(customer))?
            .map(|bytes| decode_u64(&bytes).map(ServiceId))
            .transpose()
    }

    pub fn set_live_service(&self, customer: CustomerId, service: ServiceId) -> Result<()> {
        self.put(CF_INDEXES, &customer_index_key(customer), &service.0.to_be_bytes())
    }

    pub fn clear_live_service(&self, customer: CustomerId) -> Result<()> {
        self.delete(CF_INDEXES, &customer_index_key(customer))
    }

    pub fn entity<E: Entity>(&self, id: u64) -> Result<Option<E>> {
        self.get_json(CF_ENTITIES, &tagged_key(E::TAG, id))
    }

    pub fn put_entity<E: Entity>(&self, entity: &E) -> Result<()> {
        self.put(
            CF_ENTITIES,
            &tagged_key(E::TAG, entity.entity_id()),
            &encode(entity)?,
        )
    }

    pub fn delete_entity<E: Entity>(&self, id: u64) -> Result<()> {
        self.delete(CF_ENTITIES, &tagged_key(E::TAG, id))
    }

    fn get(&self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.txn.get_for_update_cf(self.store.cf(cf)?, key, true)?)
    }

    fn get_json<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        match self.get(cf, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put(&self, cf: &str, key: &[u8], value: &[u8]) -> Result<()> {
        Ok(self.txn.put_cf(self.store.cf(cf)?, key, value)?)
    }

    fn delete(&self, cf: &str, key: &[u8]) -> Result<()> {
        Ok(self.txn.delete_cf(self.store.cf(cf)?, key)?)
    }
}
