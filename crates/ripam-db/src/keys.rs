//! Column families and big-endian key layouts
//!
//! Keys are big-endian so RocksDB's byte ordering matches numeric ordering:
//! scanning a subnet's address prefix yields addresses in ascending order.

use crate::{Result, StorageError};
use ripam_core::{CustomerId, ServiceId, SubnetId};
use std::net::Ipv4Addr;

/// subnet id -> Subnet
pub(crate) const CF_SUBNETS: &str = "subnets";
/// subnet id ++ ipv4 -> Address
pub(crate) const CF_ADDRESSES: &str = "addresses";
/// 'i' ++ ipv4 -> subnet id, 's' ++ service id -> ipv4,
/// 'u' ++ customer id -> live service id
pub(crate) const CF_INDEXES: &str = "indexes";
/// tag ++ id -> routers, plans, services, sync records
pub(crate) const CF_ENTITIES: &str = "entities";
/// sequence high-water marks
pub(crate) const CF_META: &str = "meta";

pub(crate) const ALL_CFS: [&str; 5] = [CF_SUBNETS, CF_ADDRESSES, CF_INDEXES, CF_ENTITIES, CF_META];

const IP_INDEX_TAG: u8 = b'i';
const SERVICE_INDEX_TAG: u8 = b's';
const CUSTOMER_INDEX_TAG: u8 = b'u';

pub(crate) fn subnet_key(id: SubnetId) -> [u8; 8] {
    id.0.to_be_bytes()
}

pub(crate) fn address_key(subnet: SubnetId, ip: Ipv4Addr) -> [u8; 12] {
    let mut key = [0u8; 12];
    key[..8].copy_from_slice(&subnet.0.to_be_bytes());
    key[8..].copy_from_slice(&ip.octets());
    key
}

pub(crate) fn ip_index_key(ip: Ipv4Addr) -> [u8; 5] {
    let mut key = [IP_INDEX_TAG; 5];
    key[1..].copy_from_slice(&ip.octets());
    key
}

pub(crate) fn service_index_key(service: ServiceId) -> [u8; 9] {
    tagged_key(SERVICE_INDEX_TAG, service.0)
}

pub(crate) fn customer_index_key(customer: CustomerId) -> [u8; 9] {
    tagged_key(CUSTOMER_INDEX_TAG, customer.0)
}

pub(crate) fn tagged_key(tag: u8, id: u64) -> [u8; 9] {
    let mut key = [tag; 9];
    key[1..].copy_from_slice(&id.to_be_bytes());
    key
}

pub(crate) fn decode_u64(bytes: &[u8]) -> Result<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StorageError::InvalidData(format!("expected 8 bytes, got {}", bytes.len())))?;
    Ok(u64::from_be_bytes(raw))
}

pub(crate) fn decode_ipv4(bytes: &[u8]) -> Result<Ipv4Addr> {
    let raw: [u8; 4] = bytes
        .try_into()
        .map_err(|_| StorageError::InvalidData(format!("expected 4 bytes, got {}", bytes.len())))?;
    Ok(Ipv4Addr::from(raw))
}
