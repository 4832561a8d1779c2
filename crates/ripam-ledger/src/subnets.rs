//! Subnet lifecycle, overlap gating and utilization

use crate::generate::GATEWAY_NOTE;
use crate::AllocationLedger;
use chrono::Utc;
use ripam_cidr::Cidr;
use ripam_core::{
    AddressStatus, NewSubnet, OverlapConflict, Result, RipamError, Router, RouterId, Subnet,
    SubnetId, SubnetStatus, SubnetUpdate, Utilization,
};
use ripam_db::{LedgerTxn, Sequence};
use std::net::Ipv4Addr;
use tracing::{debug, info, warn};

/// Conflicts reported per overlap check
pub const MAX_OVERLAP_REPORT: usize = 5;

const REFRESH_ATTEMPTS: usize = 16;

impl AllocationLedger {
    /// Existing subnets that intersect `candidate`, in subnet id order
    ///
    /// Stops after [`MAX_OVERLAP_REPORT`] conflicts. `exclude` skips one
    /// subnet, so a CIDR edit does not collide with itself.
    pub fn find_overlaps(
        &self,
        candidate: &Cidr,
        exclude: Option<SubnetId>,
    ) -> Result<Vec<OverlapConflict>> {
        let conflicts: Vec<OverlapConflict> = self
            .store
            .subnets()?
            .into_iter()
            .filter(|subnet| Some(subnet.id) != exclude)
            .filter(|subnet| candidate.overlaps(&subnet.cidr))
            .take(MAX_OVERLAP_REPORT)
            .map(|subnet| OverlapConflict {
                id: subnet.id,
                relation: candidate.relation(&subnet.cidr),
                cidr: subnet.cidr,
                name: subnet.name,
                router_id: subnet.router_id,
            })
            .collect();

        debug!(%candidate, conflicts = conflicts.len(), "overlap scan");
        Ok(conflicts)
    }

    pub fn create_subnet(&self, new: NewSubnet) -> Result<Subnet> {
        let cidr = Cidr::parse(new.cidr.trim())?;
        let name = required_name(&new.name)?;

        self.store
            .entity::<Router>(new.router_id.0)?
            .ok_or_else(|| RipamError::NotFound(new.router_id.to_string()))?;
        check_gateway(&cidr, new.gateway)?;
        self.reject_overlaps(&cidr, None)?;

        let subnet = Subnet {
            id: SubnetId(self.store.next_id(Sequence::Subnet)?),
            cidr,
            router_id: new.router_id,
            gateway: new.gateway,
            vlan_id: new.vlan_id,
            name,
            status: SubnetStatus::Active,
            generated_count: 0,
            used_count: 0,
            reserved_count: 0,
            available_count: 0,
            created_at: Utc::now(),
        };
        self.store.atomically(|tx| tx.put_subnet(&subnet))?;

        info!(subnet = %subnet.id, cidr = %subnet.cidr, router = %subnet.router_id, "created subnet");
        Ok(subnet)
    }

    /// Apply a partial update
    ///
    /// The CIDR can only change while the subnet owns no address rows.
    pub fn update_subnet(&self, id: SubnetId, update: SubnetUpdate) -> Result<Subnet> {
        let mut subnet = self.get_subnet(id)?;

        if let Some(raw) = update.cidr.as_deref() {
            let cidr = Cidr::parse(raw.trim())?;
            if cidr != subnet.cidr {
                if self.store.has_addresses(id)? {
                    return Err(RipamError::HasDependents(format!(
                        "{} already has generated addresses; its CIDR cannot change",
                        id
                    )));
                }
                self.reject_overlaps(&cidr, Some(id))?;
                subnet.cidr = cidr;
            }
        }
        if let Some(name) = update.name.as_deref() {
            subnet.name = required_name(name)?;
        }
        if update.gateway.is_some() {
            subnet.gateway = update.gateway;
        }
        if update.vlan_id.is_some() {
            subnet.vlan_id = update.vlan_id;
        }
        if let Some(status) = update.status {
            subnet.status = status;
        }
        check_gateway(&subnet.cidr, subnet.gateway)?;

        let (updated, gateway_moved) = self.store.atomically(|tx| {
            let current = tx
                .subnet(id)?
                .ok_or_else(|| RipamError::NotFound(id.to_string()))?;
            if current.cidr != subnet.cidr && current.generated_count > 0 {
                return Err(RipamError::HasDependents(format!(
                    "{} already has generated addresses; its CIDR cannot change",
                    id
                )));
            }
            let updated = Subnet {
                generated_count: current.generated_count,
                used_count: current.used_count,
                reserved_count: current.reserved_count,
                available_count: current.available_count,
                ..subnet
            };
            let gateway_moved = updated.gateway != current.gateway;
            if let Some(gateway) = updated.gateway.filter(|_| gateway_moved) {
                reserve_gateway(tx, gateway)?;
            }
            tx.put_subnet(&updated)?;
            Ok((updated, gateway_moved))
        })?;
        if gateway_moved {
            self.settle(id);
        }

        info!(subnet = %id, cidr = %updated.cidr, "updated subnet");
        Ok(updated)
    }

    /// Delete a subnet and cascade its address rows
    ///
    /// Refused with `HasDependents` while any address is assigned.
    pub fn delete_subnet(&self, id: SubnetId) -> Result<Subnet> {
        let (subnet, removed) = self.store.atomically(|tx| {
            let subnet = tx
                .subnet(id)?
                .ok_or_else(|| RipamError::NotFound(id.to_string()))?;
            // The scan is not conflict-tracked; re-read every row for update
            // so an assignment committed after the scan fails this commit.
            let mut rows = Vec::new();
            for scanned in tx.addresses_in(id)? {
                if let Some(row) = tx.address(scanned.address)? {
                    rows.push(row);
                }
            }

            let assigned = rows
                .iter()
                .filter(|row| row.status == AddressStatus::Assigned)
                .count();
            if assigned > 0 {
                return Err(RipamError::HasDependents(format!(
                    "{} has {} assigned address(es)",
                    id, assigned
                )));
            }

            for row in &rows {
                tx.remove_address(row)?;
            }
            tx.delete_subnet(id)?;
            Ok((subnet, rows.len()))
        })?;

        info!(subnet = %id, cidr = %subnet.cidr, removed, "deleted subnet");
        Ok(subnet)
    }

    pub fn get_subnet(&self, id: SubnetId) -> Result<Subnet> {
        self.store
            .subnet(id)?
            .ok_or_else(|| RipamError::NotFound(id.to_string()))
    }

    /// All subnets in id order, optionally only one router's
    pub fn list_subnets(&self, router: Option<RouterId>) -> Result<Vec<Subnet>> {
        let mut subnets = self.store.subnets()?;
        if let Some(router) = router {
            subnets.retain(|subnet| subnet.router_id == router);
        }
        Ok(subnets)
    }

    /// Utilization counted directly from the subnet's address rows
    pub fn utilization(&self, id: SubnetId) -> Result<Utilization> {
        self.get_subnet(id)?;
        let counts = Counts::of(self.store.addresses_in(id)?.iter().map(|row| row.status));
        Ok(counts.utilization(id))
    }

    /// Recount the cached counters on the subnet row
    ///
    /// The subnet row is read for update, so two concurrent refreshes cannot
    /// leave a count that misses the later commit.
    pub(crate) fn refresh_utilization(&self, id: SubnetId) -> Result<Subnet> {
        for attempt in 1..=REFRESH_ATTEMPTS {
            let result = self.store.atomically(|tx| {
                let mut subnet = tx
                    .subnet(id)?
                    .ok_or_else(|| RipamError::NotFound(id.to_string()))?;
                let counts = Counts::of(tx.addresses_in(id)?.iter().map(|row| row.status));
                subnet.used_count = counts.assigned;
                subnet.reserved_count = counts.reserved;
                subnet.available_count = counts.available;
                tx.put_subnet(&subnet)?;
                Ok::<_, RipamError>(subnet)
            });

            match result {
                Err(RipamError::Conflict(reason)) => {
                    debug!(subnet = %id, attempt, %reason, "utilization refresh raced, retrying");
                }
                other => return other,
            }
        }

        warn!(subnet = %id, "utilization refresh kept conflicting");
        Err(RipamError::Conflict(format!(
            "utilization of {} changed during {} refresh attempts",
            id, REFRESH_ATTEMPTS
        )))
    }

    /// Refresh after a committed transition; the transition stands either way
    pub(crate) fn settle(&self, id: SubnetId) {
        if let Err(err) = self.refresh_utilization(id) {
            warn!(subnet = %id, error = %err, "utilization left stale until the next change");
        }
    }

    fn reject_overlaps(&self, cidr: &Cidr, exclude: Option<SubnetId>) -> Result<()> {
        let conflicts = self.find_overlaps(cidr, exclude)?;
        if conflicts.is_empty() {
            Ok(())
        } else {
            warn!(%cidr, conflicts = conflicts.len(), "rejected overlapping subnet");
            Err(RipamError::OverlapConflict(conflicts))
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Counts {
    pub available: u64,
    pub assigned: u64,
    pub reserved: u64,
}

impl Counts {
    pub(crate) fn of(statuses: impl Iterator<Item = AddressStatus>) -> Self {
        statuses.fold(Counts::default(), |mut counts, status| {
            match status {
                AddressStatus::Available => counts.available += 1,
                AddressStatus::Assigned => counts.assigned += 1,
                AddressStatus::Reserved => counts.reserved += 1,
            }
            counts
        })
    }

    fn total(&self) -> u64 {
        self.available + self.assigned + self.reserved
    }

    fn utilization(&self, subnet_id: SubnetId) -> Utilization {
        let total = self.total();
        let percent = if total == 0 {
            0.0
        } else {
            self.assigned as f64 / total as f64 * 100.0
        };
        Utilization {
            subnet_id,
            total,
            used: self.assigned,
            reserved: self.reserved,
            available: self.available,
            percent,
        }
    }
}

fn required_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(RipamError::InvalidRequest("subnet name is required".into()));
    }
    Ok(name.to_string())
}

/// Hold a generated gateway row out of the pool
fn reserve_gateway(tx: &LedgerTxn<'_>, gateway: Ipv4Addr) -> Result<()> {
    let Some(mut row) = tx.address(gateway)? else {
        return Ok(());
    };
    match row.status {
        AddressStatus::Reserved => Ok(()),
        AddressStatus::Assigned => Err(RipamError::NotAvailable(format!(
            "{} is assigned and cannot become the gateway",
            gateway
        ))),
        AddressStatus::Available => {
            row.reserve(Some(GATEWAY_NOTE.into()));
            Ok(tx.put_address(&row)?)
        }
    }
}

fn check_gateway(cidr: &Cidr, gateway: Option<Ipv4Addr>) -> Result<()> {
    match gateway {
        Some(gateway) if !cidr.is_usable(gateway) => Err(RipamError::InvalidRequest(format!(
            "gateway {} is not a usable host of {}",
            gateway, cidr
        ))),
        _ => Ok(()),
    }
}
