//! Bulk population of a subnet's address rows

use crate::AllocationLedger;
use ripam_core::{Address, AddressId, Result, RipamError, Subnet, SubnetId};
use ripam_db::Sequence;
use serde::Serialize;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use tracing::{debug, info, warn};

/// Note on the reserved row of a subnet's gateway
pub(crate) const GATEWAY_NOTE: &str = "gateway";

/// Outcome of a generation run
#[derive(Debug, Clone, Serialize)]
pub struct GenerationReport {
    /// Rows inserted by this run
    pub count: u64,
    pub batches: usize,
    /// Subnet with refreshed counters
    pub subnet: Subnet,
}

impl AllocationLedger {
    /// Insert one available row per usable host of the subnet
    ///
    /// The gateway, when the subnet has one, is inserted as reserved. Each
    /// batch commits in its own transaction. A failing batch stops the run
    /// with `PartialGeneration`; the committed rows stay and are recorded in
    /// `generated_count`, and [`AllocationLedger::resume_generation`] fills
    /// in the rest.
    pub fn generate(&self, id: SubnetId) -> Result<GenerationReport> {
        let subnet = self.get_subnet(id)?;
        let expected = self.policy.check(&subnet.cidr)?;

        if subnet.generated_count > 0 || self.store.has_addresses(id)? {
            return Err(RipamError::AlreadyGenerated(id));
        }

        debug!(subnet = %id, cidr = %subnet.cidr, expected, batch_size = self.batch_size, "generating addresses");
        match self.insert_batches(&subnet, subnet.cidr.hosts().batches(self.batch_size), expected, 0) {
            // a concurrent run committed its first batch before ours
            Err(RipamError::Conflict(_) | RipamError::NotAvailable(_))
                if self.get_subnet(id)?.generated_count > 0 =>
            {
                Err(RipamError::AlreadyGenerated(id))
            }
            other => other,
        }
    }

    /// Insert only the host rows a previous partial run did not commit
    pub fn resume_generation(&self, id: SubnetId) -> Result<GenerationReport> {
        let subnet = self.get_subnet(id)?;
        let expected = self.policy.check(&subnet.cidr)?;

        let existing: HashSet<Ipv4Addr> = self
            .store
            .addresses_in(id)?
            .into_iter()
            .map(|row| row.address)
            .collect();
        if existing.len() as u64 >= expected {
            return Err(RipamError::AlreadyGenerated(id));
        }

        let missing: Vec<Ipv4Addr> = subnet
            .cidr
            .hosts()
            .filter(|ip| !existing.contains(ip))
            .collect();
        info!(subnet = %id, present = existing.len(), missing = missing.len(), "resuming generation");

        let batches = missing.chunks(self.batch_size).map(|chunk| chunk.to_vec());
        self.insert_batches(&subnet, batches, expected, existing.len() as u64)
    }

    fn insert_batches<I>(
        &self,
        subnet: &Subnet,
        batches: I,
        expected: u64,
        already: u64,
    ) -> Result<GenerationReport>
    where
        I: Iterator<Item = Vec<Ipv4Addr>>,
    {
        let mut count = 0u64;
        let mut done = 0usize;

        for batch in batches {
            let fresh = already + count == 0;
            if let Err(err) = self.insert_batch(subnet.id, &batch, fresh) {
                let committed = already + count;
                if committed == 0 {
                    return Err(err);
                }

                warn!(subnet = %subnet.id, committed, expected, error = %err, "address generation stopped");
                if let Err(refresh) = self.refresh_utilization(subnet.id) {
                    warn!(subnet = %subnet.id, error = %refresh, "could not refresh utilization");
                }
                return Err(RipamError::PartialGeneration {
                    committed,
                    expected,
                    reason: err.to_string(),
                });
            }

            count += batch.len() as u64;
            done += 1;
            debug!(subnet = %subnet.id, batch = done, committed = already + count, "batch committed");
        }

        let subnet = self.refresh_utilization(subnet.id)?;
        info!(subnet = %subnet.id, cidr = %subnet.cidr, count, batches = done, "generated addresses");

        Ok(GenerationReport {
            count,
            batches: done,
            subnet,
        })
    }

    /// Commit one batch; a `fresh` batch also claims the subnet, failing with
    /// `AlreadyGenerated` if another run got there first
    fn insert_batch(&self, id: SubnetId, batch: &[Ipv4Addr], fresh: bool) -> Result<()> {
        let first = self
            .store
            .reserve_ids(Sequence::Address, batch.len() as u64)?;

        self.store.atomically(|tx| {
            let mut subnet = tx
                .subnet(id)?
                .ok_or_else(|| RipamError::NotFound(id.to_string()))?;
            if fresh && subnet.generated_count > 0 {
                return Err(RipamError::AlreadyGenerated(id));
            }
            for (offset, ip) in batch.iter().enumerate() {
                let mut row = Address::new(AddressId(first + offset as u64), *ip, id);
                if subnet.gateway == Some(*ip) {
                    row.reserve(Some(GATEWAY_NOTE.into()));
                }
                tx.insert_address(&row)?;
            }
            subnet.generated_count += batch.len() as u64;
            tx.put_subnet(&subnet)?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Fixture;
    use ripam_core::AddressStatus;

    #[test]
    fn test_generate_slash_24() {
        let fx = Fixture::new();
        let subnet = fx.subnet("192.168.1.0/24");

        let report = fx.ledger.generate(subnet.id).unwrap();
        assert_eq!(report.count, 254);
        assert_eq!(report.batches, 1);
        assert_eq!(report.subnet.generated_count, 254);
        assert_eq!(report.subnet.available_count, 254);
        assert_eq!(report.subnet.used_count, 0);

        let rows = fx.ledger.store().addresses_in(subnet.id).unwrap();
        assert_eq!(rows.first().unwrap().address, Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(rows.last().unwrap().address, Ipv4Addr::new(192, 168, 1, 254));
        assert!(rows.iter().all(|row| row.status == AddressStatus::Available));
    }

    #[test]
    fn test_generate_in_batches() {
        let fx = Fixture::with_batch_size(100);
        let subnet = fx.subnet("10.1.0.0/23");

        let report = fx.ledger.generate(subnet.id).unwrap();
        assert_eq!(report.count, 510);
        assert_eq!(report.batches, 6);
    }

    #[test]
    fn test_generate_twice_fails() {
        let fx = Fixture::new();
        let subnet = fx.generated("10.0.0.0/29");

        let err = fx.ledger.generate(subnet.id).unwrap_err();
        assert!(matches!(err, RipamError::AlreadyGenerated(id) if id == subnet.id));
        assert_eq!(fx.ledger.store().addresses_in(subnet.id).unwrap().len(), 6);
    }

    #[test]
    fn test_generate_enforces_policy() {
        let fx = Fixture::new();
        let wide = fx.subnet("172.16.0.0/12");
        let err = fx.ledger.generate(wide.id).unwrap_err();
        assert!(matches!(err, RipamError::SubnetTooLarge(_)));

        let host = fx.subnet("10.9.9.9/32");
        let err = fx.ledger.generate(host.id).unwrap_err();
        assert!(matches!(err, RipamError::InvalidCidr { .. }));
        assert!(!fx.ledger.store().has_addresses(host.id).unwrap());
    }

    #[test]
    fn test_gateway_is_reserved() {
        let fx = Fixture::new();
        let subnet = fx
            .ledger
            .create_subnet(ripam_core::NewSubnet {
                cidr: "10.0.0.0/29".into(),
                router_id: fx.router.id,
                gateway: Some(Ipv4Addr::new(10, 0, 0, 1)),
                vlan_id: None,
                name: "lan".into(),
            })
            .unwrap();

        let report = fx.ledger.generate(subnet.id).unwrap();
        assert_eq!(report.count, 6);
        assert_eq!(report.subnet.reserved_count, 1);
        assert_eq!(report.subnet.available_count, 5);

        let gateway = fx.ledger.get_address(Ipv4Addr::new(10, 0, 0, 1)).unwrap();
        assert_eq!(gateway.status, AddressStatus::Reserved);
        assert_eq!(gateway.notes.as_deref(), Some(GATEWAY_NOTE));
    }

    #[test]
    fn test_concurrent_generate_single_winner() {
        let fx = Fixture::with_batch_size(50);
        let subnet = fx.subnet("10.4.0.0/24");

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ledger = fx.ledger.clone();
                std::thread::spawn(move || ledger.generate(subnet.id))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            assert!(
                matches!(err, RipamError::AlreadyGenerated(id) if *id == subnet.id),
                "unexpected error: {:?}",
                err
            );
        }
        assert_eq!(fx.ledger.store().addresses_in(subnet.id).unwrap().len(), 254);
        assert_eq!(fx.ledger.get_subnet(subnet.id).unwrap().generated_count, 254);
    }

    #[test]
    fn test_resume_without_gap_is_rejected() {
        let fx = Fixture::new();
        let subnet = fx.generated("10.0.0.0/30");
        let err = fx.ledger.resume_generation(subnet.id).unwrap_err();
        assert!(matches!(err, RipamError::AlreadyGenerated(_)));
    }
}
