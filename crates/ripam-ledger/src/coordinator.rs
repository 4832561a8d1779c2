//! Customer service provisioning on top of the ledger
//!
//! Provisioning creates a pending service, binds an address through the
//! ledger and queues a sync record for the external router-configuration
//! pusher. Lifecycle changes (activate, suspend, terminate, reactivate) keep
//! the service status and its address binding in step.

use crate::{AllocationLedger, Directory};
use chrono::Utc;
use ripam_core::config::Config;
use ripam_core::{
    Address, AllocationMode, CustomerId, CustomerService, PlanId, Result, RipamError, RouterId,
    RouterStatus, ServiceId, ServiceStatus, SubnetId, SyncRecord, SyncStatus,
};
use ripam_db::Sequence;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, info, warn};

const INSERT_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionRequest {
    pub customer_id: CustomerId,
    pub plan_id: PlanId,
    pub router_id: RouterId,
    pub mode: AllocationMode,
    /// Required for static mode
    #[serde(default)]
    pub address: Option<Ipv4Addr>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Provisioned {
    pub service: CustomerService,
    pub address: Address,
    pub sync: SyncRecord,
}

/// A service with its router-sync state
#[derive(Debug, Clone, Serialize)]
pub struct ServiceDetail {
    pub service: CustomerService,
    pub sync: Option<SyncRecord>,
}

pub struct ProvisioningCoordinator {
    ledger: Arc<AllocationLedger>,
    directory: Directory,
    one_active_service_per_customer: bool,
}

impl ProvisioningCoordinator {
    pub fn new(ledger: Arc<AllocationLedger>, one_active_service_per_customer: bool) -> Self {
        let directory = Directory::new(ledger.store().clone());
        Self {
            ledger,
            directory,
            one_active_service_per_customer,
        }
    }

    pub fn from_config(ledger: Arc<AllocationLedger>, config: &Config) -> Self {
        Self::new(ledger, config.one_active_service_per_customer)
    }

    pub fn ledger(&self) -> &Arc<AllocationLedger> {
        &self.ledger
    }

    /// Create a service for a customer and bind it an address
    ///
    /// If the address cannot be bound the new service record is removed
    /// again, so a failed request leaves nothing behind.
    pub fn provision(&self, request: ProvisionRequest) -> Result<Provisioned> {
        self.directory.plan(request.plan_id)?;
        self.require_online(request.router_id)?;

        let static_target = match (request.mode, request.address) {
            (AllocationMode::Static, Some(ip)) => {
                Some((ip, self.owning_subnet(ip, request.router_id)?))
            }
            (AllocationMode::Static, None) => {
                return Err(RipamError::InvalidRequest(
                    "static allocation requires an address".into(),
                ))
            }
            (AllocationMode::Dynamic, Some(_)) => {
                return Err(RipamError::InvalidRequest(
                    "an address is only accepted for static allocation".into(),
                ))
            }
            (AllocationMode::Dynamic, None) => None,
        };

        let store = self.ledger.store();
        let service = CustomerService {
            id: ServiceId(store.next_id(Sequence::Service)?),
            customer_id: request.customer_id,
            plan_id: request.plan_id,
            router_id: request.router_id,
            status: ServiceStatus::Pending,
            allocation_mode: request.mode,
            ip_address: None,
            created_at: Utc::now(),
        };
        self.insert_service(&service)?;

        let assigned = match static_target {
            Some((ip, subnet)) => self.ledger.assign(service.id, Some(subnet), Some(ip)),
            None => self.ledger.assign_in_router(service.id, request.router_id),
        };
        let address = match assigned {
            Ok(address) => address,
            Err(err) => {
                warn!(service = %service.id, customer = %service.customer_id, error = %err, "provisioning failed, removing service");
                if let Err(cleanup) = store.atomically(|tx| {
                    tx.delete_entity::<CustomerService>(service.id.0)?;
                    if tx.live_service(service.customer_id)? == Some(service.id) {
                        tx.clear_live_service(service.customer_id)?;
                    }
                    Ok::<_, RipamError>(())
                }) {
                    warn!(service = %service.id, error = %cleanup, "could not remove service");
                }
                return Err(err);
            }
        };

        let sync = SyncRecord {
            service_id: service.id,
            router_id: service.router_id,
            status: SyncStatus::Pending,
            created_at: Utc::now(),
        };
        store.atomically(|tx| tx.put_entity(&sync))?;
        let service = self.directory.service(service.id)?;

        info!(
            service = %service.id,
            customer = %service.customer_id,
            address = %address.address,
            mode = ?service.allocation_mode,
            "provisioned service"
        );
        Ok(Provisioned {
            service,
            address,
            sync,
        })
    }

    pub fn service(&self, id: ServiceId) -> Result<ServiceDetail> {
        Ok(ServiceDetail {
            service: self.directory.service(id)?,
            sync: self.directory.sync_record(id)?,
        })
    }

    /// Record the router push outcome for a service
    ///
    /// A successful push also stamps `last_synced_at` on the address the
    /// service holds.
    pub fn record_sync(&self, id: ServiceId, status: SyncStatus) -> Result<ServiceDetail> {
        if status == SyncStatus::Pending {
            return Err(RipamError::InvalidRequest(
                "a sync outcome is either synced or failed".into(),
            ));
        }
        let sync = self.directory.complete_sync(id, status)?;
        if status == SyncStatus::Synced {
            if let Some(ip) = self.ledger.store().service_address(id)? {
                self.ledger.mark_synced(ip)?;
            }
        }
        info!(service = %id, status = ?status, "recorded router sync");
        Ok(ServiceDetail {
            service: self.directory.service(id)?,
            sync: Some(sync),
        })
    }

    /// Pending to active
    pub fn activate(&self, id: ServiceId) -> Result<CustomerService> {
        self.transition(id, ServiceStatus::Active, &[ServiceStatus::Pending])
    }

    /// Suspend a pending or active service, optionally freeing its address
    pub fn suspend(&self, id: ServiceId, release_ip: bool) -> Result<CustomerService> {
        let service = self.directory.service(id)?;
        let from = [ServiceStatus::Pending, ServiceStatus::Active];
        ensure_from(&service, ServiceStatus::Suspended, &from)?;

        if release_ip && service.ip_address.is_some() {
            self.ledger.release_by_service(id)?;
        }
        self.transition(id, ServiceStatus::Suspended, &from)
    }

    /// Free the address and end the service; terminating twice is a no-op
    pub fn terminate(&self, id: ServiceId) -> Result<CustomerService> {
        let service = self.directory.service(id)?;
        if service.status == ServiceStatus::Terminated {
            return Ok(service);
        }

        self.ledger.release_by_service(id)?;
        self.transition(
            id,
            ServiceStatus::Terminated,
            &[
                ServiceStatus::Pending,
                ServiceStatus::Active,
                ServiceStatus::Suspended,
            ],
        )
    }

    /// Suspended to active, rebinding an address if suspension released it
    pub fn reactivate(&self, id: ServiceId) -> Result<CustomerService> {
        let service = self.directory.service(id)?;
        ensure_from(&service, ServiceStatus::Active, &[ServiceStatus::Suspended])?;

        if self.ledger.store().service_address(id)?.is_none() {
            self.require_online(service.router_id)?;
            self.ledger.assign_in_router(id, service.router_id)?;
        }
        self.transition(id, ServiceStatus::Active, &[ServiceStatus::Suspended])
    }

    fn transition(
        &self,
        id: ServiceId,
        to: ServiceStatus,
        from: &[ServiceStatus],
    ) -> Result<CustomerService> {
        let service = self.ledger.store().atomically(|tx| {
            let mut service: CustomerService = tx
                .entity(id.0)?
                .ok_or_else(|| RipamError::NotFound(id.to_string()))?;
            ensure_from(&service, to, from)?;
            service.status = to;
            tx.put_entity(&service)?;
            if !to.is_live() && tx.live_service(service.customer_id)? == Some(id) {
                tx.clear_live_service(service.customer_id)?;
            }
            Ok::<_, RipamError>(service)
        })?;

        info!(service = %id, status = ?to, "service status changed");
        Ok(service)
    }

    /// Store a new service, enforcing the one-live-service policy
    ///
    /// The customer's live-service key is read for update in the same
    /// transaction, so two concurrent provisions for one customer cannot both
    /// commit. The loser retries and then sees the winner.
    fn insert_service(&self, service: &CustomerService) -> Result<()> {
        let customer = service.customer_id;
        for attempt in 1..=INSERT_ATTEMPTS {
            let result = self.ledger.store().atomically(|tx| {
                if self.one_active_service_per_customer {
                    let recorded = match tx.live_service(customer)? {
                        Some(id) => tx.entity::<CustomerService>(id.0)?,
                        None => None,
                    };
                    let live = recorded.is_some_and(|other| other.status.is_live())
                        || self
                            .directory
                            .services_for(customer)?
                            .iter()
                            .any(|other| other.status.is_live());
                    if live {
                        return Err(RipamError::ActiveServiceExists(customer));
                    }
                    tx.set_live_service(customer, service.id)?;
                }
                tx.put_entity(service)?;
                Ok(())
            });

            match result {
                Err(RipamError::Conflict(reason)) => {
                    debug!(customer = %customer, attempt, %reason, "service insert raced, retrying");
                }
                other => return other,
            }
        }

        Err(RipamError::Conflict(format!(
            "services of {} changed during {} attempts",
            customer, INSERT_ATTEMPTS
        )))
    }

    fn require_online(&self, id: RouterId) -> Result<()> {
        let router = self.directory.router(id)?;
        if router.status != RouterStatus::Online {
            return Err(RipamError::RouterOffline(id));
        }
        Ok(())
    }

    /// The owning subnet of `ip`, which must be one of the router's
    fn owning_subnet(&self, ip: Ipv4Addr, router: RouterId) -> Result<SubnetId> {
        let row = self.ledger.get_address(ip)?;
        let subnet = self.ledger.get_subnet(row.subnet_id)?;
        if subnet.router_id != router {
            return Err(RipamError::NotAvailable(format!(
                "{} is not in a subnet of {}",
                ip, router
            )));
        }
        Ok(subnet.id)
    }
}

fn ensure_from(
    service: &CustomerService,
    to: ServiceStatus,
    from: &[ServiceStatus],
) -> Result<()> {
    if from.contains(&service.status) {
        Ok(())
    } else {
        Err(RipamError::InvalidRequest(format!(
            "{} cannot move from {:?} to {:?}",
            service.id, service.status, to
        )))
    }
}
