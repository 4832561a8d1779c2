//! Allocation ledger and provisioning coordinator for RIPAM
//!
//! [`AllocationLedger`] owns subnets and their per-address rows:
//! - subnet create/update/delete gated by overlap detection
//! - batched address generation with resumable partial runs
//! - compare-and-swap assign, release, reserve and unreserve
//! - utilization recomputed from address rows after every change
//!
//! [`ProvisioningCoordinator`] drives the customer-service flow on top of it,
//! and [`Directory`] registers the routers and plans that flow consumes.
//!
//! # Examples
//!
//! ```no_run
//! use ripam_cidr::GenerationPolicy;
//! use ripam_core::{NewSubnet, RouterStatus};
//! use ripam_db::LedgerStore;
//! use ripam_ledger::{AllocationLedger, Directory};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(LedgerStore::open("./data/ripam")?);
//! let directory = Directory::new(store.clone());
//! let ledger = AllocationLedger::new(store, GenerationPolicy::default(), 500);
//!
//! let router = directory.add_router("core-1", RouterStatus::Online)?;
//! let subnet = ledger.create_subnet(NewSubnet {
//!     cidr: "192.168.1.0/24".to_string(),
//!     router_id: router.id,
//!     gateway: None,
//!     vlan_id: Some(100),
//!     name: "residential".to_string(),
//! })?;
//! let report = ledger.generate(subnet.id)?;
//! assert_eq!(report.count, 254);
//! # Ok(())
//! # }
//! ```

use ripam_cidr::GenerationPolicy;
use ripam_core::config::Config;
use ripam_db::LedgerStore;
use std::sync::Arc;

mod addresses;
mod coordinator;
mod directory;
mod generate;
mod subnets;

pub use coordinator::{ProvisionRequest, Provisioned, ProvisioningCoordinator, ServiceDetail};
pub use directory::Directory;
pub use generate::GenerationReport;
pub use subnets::MAX_OVERLAP_REPORT;

/// Subnets and the address rows they own
pub struct AllocationLedger {
    store: Arc<LedgerStore>,
    policy: GenerationPolicy,
    batch_size: usize,
}

impl AllocationLedger {
    /// Create a ledger over an open store
    ///
    /// # Arguments
    ///
    /// * `store` - Shared storage handle
    /// * `policy` - Prefix and host-count limits for generation
    /// * `batch_size` - Address rows per generation transaction
    pub fn new(store: Arc<LedgerStore>, policy: GenerationPolicy, batch_size: usize) -> Self {
        Self {
            store,
            policy,
            batch_size: batch_size.max(1),
        }
    }

    pub fn from_config(store: Arc<LedgerStore>, config: &Config) -> Self {
        Self::new(store, config.policy, config.batch_size)
    }

    pub fn store(&self) -> &Arc<LedgerStore> {
        &self.store
    }

    pub fn policy(&self) -> &GenerationPolicy {
        &self.policy
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use ripam_core::{NewSubnet, Router, RouterStatus, Subnet};
    use tempfile::TempDir;

    pub struct Fixture {
        pub ledger: Arc<AllocationLedger>,
        pub directory: Directory,
        pub router: Router,
        _temp: TempDir,
    }

    impl Fixture {
        pub fn new() -> Self {
            Self::with_batch_size(500)
        }

        pub fn with_batch_size(batch_size: usize) -> Self {
            let temp = TempDir::new().unwrap();
            let store = Arc::new(LedgerStore::open(temp.path()).unwrap());
            let directory = Directory::new(store.clone());
            let router = directory.add_router("edge-1", RouterStatus::Online).unwrap();
            let ledger = Arc::new(AllocationLedger::new(
                store,
                GenerationPolicy::default(),
                batch_size,
            ));
            Self {
                ledger,
                directory,
                router,
                _temp: temp,
            }
        }

        pub fn subnet(&self, cidr: &str) -> Subnet {
            self.ledger
                .create_subnet(NewSubnet {
                    cidr: cidr.to_string(),
                    router_id: self.router.id,
                    gateway: None,
                    vlan_id: None,
                    name: format!("net {}", cidr),
                })
                .unwrap()
        }

        pub fn generated(&self, cidr: &str) -> Subnet {
            let subnet = self.subnet(cidr);
            self.ledger.generate(subnet.id).unwrap().subnet
        }
    }
}
