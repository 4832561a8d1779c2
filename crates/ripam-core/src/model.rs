//! Records shared by the ledger, the storage engine and the API

use chrono::{DateTime, Utc};
use ripam_cidr::{Cidr, Relation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                $name(value)
            }
        }
    };
}

id_type!(
    /// Subnet identifier
    SubnetId,
    "subnet"
);
id_type!(
    /// Address row identifier
    AddressId,
    "addr"
);
id_type!(
    /// Router/device identifier
    RouterId,
    "router"
);
id_type!(
    /// Customer identifier (owned by the billing domain)
    CustomerId,
    "customer"
);
id_type!(
    /// Customer service identifier
    ServiceId,
    "service"
);
id_type!(
    /// Service plan identifier
    PlanId,
    "plan"
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubnetStatus {
    #[default]
    Active,
    Inactive,
}

/// A CIDR block owned by one router
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: SubnetId,
    pub cidr: Cidr,
    pub router_id: RouterId,
    pub gateway: Option<Ipv4Addr>,
    pub vlan_id: Option<u16>,
    pub name: String,
    pub status: SubnetStatus,
    /// Addresses committed by generation so far
    pub generated_count: u64,
    /// Cached utilization, recomputed from address rows
    pub used_count: u64,
    pub reserved_count: u64,
    pub available_count: u64,
    pub created_at: DateTime<Utc>,
}

impl Subnet {
    /// Whether generation stopped before covering every usable host
    pub fn is_partially_generated(&self) -> bool {
        self.generated_count > 0 && self.generated_count < self.cidr.usable_hosts()
    }
}

/// Operator input for a new subnet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSubnet {
    pub cidr: String,
    pub router_id: RouterId,
    #[serde(default)]
    pub gateway: Option<Ipv4Addr>,
    #[serde(default)]
    pub vlan_id: Option<u16>,
    pub name: String,
}

/// Partial update of a subnet; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubnetUpdate {
    pub cidr: Option<String>,
    pub name: Option<String>,
    pub gateway: Option<Ipv4Addr>,
    pub vlan_id: Option<u16>,
    pub status: Option<SubnetStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressStatus {
    Available,
    Assigned,
    Reserved,
}

impl fmt::Display for AddressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AddressStatus::Available => "available",
            AddressStatus::Assigned => "assigned",
            AddressStatus::Reserved => "reserved",
        };
        f.write_str(s)
    }
}

/// One host address in the allocation ledger
///
/// `service_id` is set if and only if `status` is [`AddressStatus::Assigned`];
/// the transition methods below are the only writers of those fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub id: AddressId,
    pub address: Ipv4Addr,
    pub subnet_id: SubnetId,
    pub status: AddressStatus,
    pub service_id: Option<ServiceId>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl Address {
    pub fn new(id: AddressId, address: Ipv4Addr, subnet_id: SubnetId) -> Self {
        Self {
            id,
            address,
            subnet_id,
            status: AddressStatus::Available,
            service_id: None,
            assigned_at: None,
            last_synced_at: None,
            notes: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == AddressStatus::Available
    }

    pub fn assign_to(&mut self, service_id: ServiceId, now: DateTime<Utc>) {
        self.status = AddressStatus::Assigned;
        self.service_id = Some(service_id);
        self.assigned_at = Some(now);
    }

    pub fn reserve(&mut self, notes: Option<String>) {
        self.status = AddressStatus::Reserved;
        self.service_id = None;
        self.assigned_at = None;
        self.notes = notes;
    }

    /// Return the address to the pool
    pub fn release(&mut self) {
        self.status = AddressStatus::Available;
        self.service_id = None;
        self.assigned_at = None;
        self.last_synced_at = None;
        self.notes = None;
    }

    pub fn is_consistent(&self) -> bool {
        (self.status == AddressStatus::Assigned) == self.service_id.is_some()
    }
}

/// Typed filter for address listings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddressFilter {
    pub status: Option<AddressStatus>,
    pub subnet_id: Option<SubnetId>,
    pub customer_id: Option<CustomerId>,
    pub router_id: Option<RouterId>,
}

/// Cached per-subnet counters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Utilization {
    pub subnet_id: SubnetId,
    pub total: u64,
    pub used: u64,
    pub reserved: u64,
    pub available: u64,
    pub percent: f64,
}

/// An existing subnet that conflicts with a candidate block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlapConflict {
    pub id: SubnetId,
    pub cidr: Cidr,
    pub name: String,
    pub router_id: RouterId,
    /// How the candidate relates to this subnet
    pub relation: Relation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouterStatus {
    #[default]
    Online,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Router {
    pub id: RouterId,
    pub name: String,
    pub status: RouterStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePlan {
    pub id: PlanId,
    pub name: String,
    pub download_mbps: Option<u32>,
    pub upload_mbps: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Pending,
    Active,
    Suspended,
    Terminated,
}

impl ServiceStatus {
    /// Counts against the one-service-per-customer policy
    pub fn is_live(&self) -> bool {
        !matches!(self, ServiceStatus::Terminated)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationMode {
    Dynamic,
    Static,
}

/// Customer service record; `ip_address` mirrors the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerService {
    pub id: ServiceId,
    pub customer_id: CustomerId,
    pub plan_id: PlanId,
    pub router_id: RouterId,
    pub status: ServiceStatus,
    pub allocation_mode: AllocationMode,
    pub ip_address: Option<Ipv4Addr>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Synced,
    Failed,
}

/// Router configuration push awaiting the external sync job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub service_id: ServiceId,
    pub router_id: RouterId,
    pub status: SyncStatus,
    pub created_at: DateTime<Utc>,
}
