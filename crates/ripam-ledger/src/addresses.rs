//! Address state transitions
//!
//! Every transition reads the address row for update and writes it back in
//! one optimistic transaction. When two requests race for the same row the
//! later commit fails; a dynamic assignment then moves on to the next
//! candidate, a specific one reports the address as unavailable.

use crate::AllocationLedger;
use chrono::Utc;
use ripam_core::{
    Address, AddressFilter, AddressStatus, CustomerService, Result, RipamError, RouterId,
    ServiceId, ServiceStatus, Subnet, SubnetId, SubnetStatus,
};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use tracing::{debug, info};

/// Outcome of one compare-and-swap attempt on an address row
enum Claim {
    Claimed(Address),
    /// Row was taken, or another commit touched it first
    Lost,
}

impl AllocationLedger {
    /// Bind an address to a service
    ///
    /// With `address` the exact row is claimed (and must belong to `subnet`
    /// when one is given). Without it the lowest available address of
    /// `subnet` is taken.
    pub fn assign(
        &self,
        service: ServiceId,
        subnet: Option<SubnetId>,
        address: Option<Ipv4Addr>,
    ) -> Result<Address> {
        let assigned = match address {
            Some(ip) => match self.try_claim(service, ip, subnet)? {
                Claim::Claimed(row) => row,
                Claim::Lost => {
                    return Err(RipamError::NotAvailable(format!(
                        "{} is not available",
                        ip
                    )))
                }
            },
            None => {
                let subnet = subnet.ok_or_else(|| {
                    RipamError::InvalidRequest(
                        "subnet_id is required when no address is given".into(),
                    )
                })?;
                let subnet = self.get_subnet(subnet)?;
                self.claim_lowest(service, std::slice::from_ref(&subnet))?
            }
        };

        self.settle(assigned.subnet_id);
        info!(service = %service, address = %assigned.address, subnet = %assigned.subnet_id, "assigned address");
        Ok(assigned)
    }

    /// Dynamic assignment across a router's active subnets, in id order
    pub fn assign_in_router(&self, service: ServiceId, router: RouterId) -> Result<Address> {
        let subnets: Vec<Subnet> = self
            .list_subnets(Some(router))?
            .into_iter()
            .filter(|subnet| subnet.status == SubnetStatus::Active)
            .collect();
        if subnets.is_empty() {
            return Err(RipamError::PoolExhausted(format!(
                "{} has no active subnets",
                router
            )));
        }

        let assigned = self.claim_lowest(service, &subnets)?;
        self.settle(assigned.subnet_id);
        info!(service = %service, address = %assigned.address, router = %router, "assigned address");
        Ok(assigned)
    }

    /// Release whatever address the service holds
    ///
    /// Returns `None` when the service already holds nothing, so a repeated
    /// release succeeds the same way a repeated `release_address` does.
    pub fn release_by_service(&self, service: ServiceId) -> Result<Option<Address>> {
        if self.store.entity::<CustomerService>(service.0)?.is_none() {
            return Err(RipamError::NotFound(format!("{}", service)));
        }
        match self.store.service_address(service)? {
            Some(ip) => self.release_address(ip).map(Some),
            None => {
                debug!(service = %service, "service holds no address");
                Ok(None)
            }
        }
    }

    /// Return an assigned address to the pool
    ///
    /// Releasing an available or reserved address changes nothing.
    pub fn release_address(&self, ip: Ipv4Addr) -> Result<Address> {
        let (row, released) = self.store.atomically(|tx| {
            let mut row = tx
                .address(ip)?
                .ok_or_else(|| RipamError::NotFound(format!("address {}", ip)))?;
            if row.status != AddressStatus::Assigned {
                return Ok((row, false));
            }

            if let Some(service) = row.service_id {
                tx.unbind_service(service)?;
                if let Some(mut record) = tx.entity::<CustomerService>(service.0)? {
                    record.ip_address = None;
                    tx.put_entity(&record)?;
                }
            }
            row.release();
            tx.put_address(&row)?;
            Ok::<_, RipamError>((row, true))
        })?;

        if released {
            self.settle(row.subnet_id);
            info!(address = %ip, subnet = %row.subnet_id, "released address");
        } else {
            debug!(address = %ip, status = %row.status, "release skipped");
        }
        Ok(row)
    }

    /// Hold an available address out of the pool
    pub fn reserve(&self, ip: Ipv4Addr, notes: Option<String>) -> Result<Address> {
        let (row, changed) = self.store.atomically(|tx| {
            let mut row = tx
                .address(ip)?
                .ok_or_else(|| RipamError::NotFound(format!("address {}", ip)))?;
            match row.status {
                AddressStatus::Reserved => Ok((row, false)),
                AddressStatus::Assigned => Err(RipamError::NotAvailable(format!(
                    "{} is assigned and cannot be reserved",
                    ip
                ))),
                AddressStatus::Available => {
                    row.reserve(notes);
                    tx.put_address(&row)?;
                    Ok((row, true))
                }
            }
        })?;

        if changed {
            self.settle(row.subnet_id);
            info!(address = %ip, "reserved address");
        }
        Ok(row)
    }

    /// Return a reserved address to the pool
    pub fn unreserve(&self, ip: Ipv4Addr) -> Result<Address> {
        let (row, changed) = self.store.atomically(|tx| {
            let mut row = tx
                .address(ip)?
                .ok_or_else(|| RipamError::NotFound(format!("address {}", ip)))?;
            match row.status {
                AddressStatus::Available => Ok((row, false)),
                AddressStatus::Assigned => Err(RipamError::NotAvailable(format!(
                    "{} is assigned; release it instead",
                    ip
                ))),
                AddressStatus::Reserved => {
                    row.release();
                    tx.put_address(&row)?;
                    Ok((row, true))
                }
            }
        })?;

        if changed {
            self.settle(row.subnet_id);
            info!(address = %ip, "unreserved address");
        }
        Ok(row)
    }

    /// Record that router state was reconciled for an assigned address
    pub fn mark_synced(&self, ip: Ipv4Addr) -> Result<Address> {
        let now = Utc::now();
        self.store.atomically(|tx| {
            let mut row = tx
                .address(ip)?
                .ok_or_else(|| RipamError::NotFound(format!("address {}", ip)))?;
            if row.status != AddressStatus::Assigned {
                return Err(RipamError::InvalidRequest(format!(
                    "{} is {}; only assigned addresses are synced",
                    ip, row.status
                )));
            }
            row.last_synced_at = Some(now);
            tx.put_address(&row)?;
            Ok(row)
        })
    }

    pub fn get_address(&self, ip: Ipv4Addr) -> Result<Address> {
        self.store
            .address(ip)?
            .ok_or_else(|| RipamError::NotFound(format!("address {}", ip)))
    }

    /// Address rows matching every set field of `filter`
    pub fn list_addresses(&self, filter: &AddressFilter) -> Result<Vec<Address>> {
        let services: Option<HashSet<ServiceId>> = match filter.customer_id {
            Some(customer) => Some(
                self.store
                    .entities::<CustomerService>()?
                    .into_iter()
                    .filter(|service| service.customer_id == customer)
                    .map(|service| service.id)
                    .collect(),
            ),
            None => None,
        };

        let subnets = self.store.subnets()?.into_iter().filter(|subnet| {
            filter.subnet_id.map_or(true, |id| subnet.id == id)
                && filter.router_id.map_or(true, |id| subnet.router_id == id)
        });

        let mut out = Vec::new();
        for subnet in subnets {
            out.extend(self.store.addresses_in(subnet.id)?.into_iter().filter(|row| {
                filter.status.map_or(true, |status| row.status == status)
                    && services.as_ref().map_or(true, |ids| {
                        row.service_id.map_or(false, |id| ids.contains(&id))
                    })
            }));
        }

        debug!(?filter, matched = out.len(), "listed addresses");
        Ok(out)
    }

    /// Take the lowest available row across `subnets`, in order
    fn claim_lowest(&self, service: ServiceId, subnets: &[Subnet]) -> Result<Address> {
        for subnet in subnets {
            let mut from = None;
            while let Some(candidate) = self.store.first_available(subnet.id, from)? {
                match self.try_claim(service, candidate.address, Some(subnet.id))? {
                    Claim::Claimed(row) => return Ok(row),
                    Claim::Lost => {
                        debug!(service = %service, address = %candidate.address, "lost race, trying next address");
                        match u32::from(candidate.address).checked_add(1) {
                            Some(next) => from = Some(Ipv4Addr::from(next)),
                            None => break,
                        }
                    }
                }
            }
        }

        let scope = match subnets {
            [only] => only.id.to_string(),
            _ => format!("{} subnets", subnets.len()),
        };
        Err(RipamError::PoolExhausted(format!(
            "no available address in {}",
            scope
        )))
    }

    fn try_claim(
        &self,
        service: ServiceId,
        ip: Ipv4Addr,
        subnet: Option<SubnetId>,
    ) -> Result<Claim> {
        let now = Utc::now();
        let result = self.store.atomically(|tx| {
            let mut record: CustomerService = tx
                .entity(service.0)?
                .ok_or_else(|| RipamError::NotFound(service.to_string()))?;
            if record.status == ServiceStatus::Terminated {
                return Err(RipamError::InvalidRequest(format!(
                    "{} is terminated",
                    service
                )));
            }
            if let Some(held) = tx.service_address(service)? {
                return Err(RipamError::NotAvailable(format!(
                    "{} already holds {}",
                    service, held
                )));
            }

            let mut row = tx
                .address(ip)?
                .ok_or_else(|| RipamError::NotFound(format!("address {}", ip)))?;
            if let Some(subnet) = subnet {
                if row.subnet_id != subnet {
                    return Err(RipamError::NotAvailable(format!(
                        "{} does not belong to {}",
                        ip, subnet
                    )));
                }
            }
            if !row.is_available() {
                return Ok(Claim::Lost);
            }

            row.assign_to(service, now);
            tx.put_address(&row)?;
            tx.bind_service(service, ip)?;
            record.ip_address = Some(ip);
            tx.put_entity(&record)?;
            Ok(Claim::Claimed(row))
        });

        match result {
            Err(RipamError::Conflict(reason)) => {
                debug!(address = %ip, %reason, "address claim conflicted");
                Ok(Claim::Lost)
            }
            other => other,
        }
    }
}
