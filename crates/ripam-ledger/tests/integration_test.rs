use chrono::Utc;
use ripam_cidr::GenerationPolicy;
use ripam_core::{
    Address, AddressId, AddressStatus, AllocationMode, CustomerId, CustomerService, NewSubnet,
    PlanId, RipamError, RouterStatus, ServiceId, ServiceStatus, Subnet, SubnetId,
};
use ripam_db::{LedgerStore, Sequence};
use ripam_ledger::{AllocationLedger, Directory};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

struct Harness {
    ledger: Arc<AllocationLedger>,
    directory: Directory,
    _temp: TempDir,
}

fn harness(batch_size: usize) -> Harness {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let store = Arc::new(LedgerStore::open(temp.path()).expect("Failed to open store"));
    Harness {
        ledger: Arc::new(AllocationLedger::new(
            store.clone(),
            GenerationPolicy::default(),
            batch_size,
        )),
        directory: Directory::new(store),
        _temp: temp,
    }
}

fn subnet(h: &Harness, cidr: &str) -> Subnet {
    let router = h
        .directory
        .add_router("bng-1", RouterStatus::Online)
        .expect("router");
    h.ledger
        .create_subnet(NewSubnet {
            cidr: cidr.to_string(),
            router_id: router.id,
            gateway: None,
            vlan_id: None,
            name: format!("pool {}", cidr),
        })
        .expect("subnet")
}

fn service(h: &Harness, customer: u64) -> ServiceId {
    let store = h.ledger.store();
    let record = CustomerService {
        id: ServiceId(store.next_id(Sequence::Service).unwrap()),
        customer_id: CustomerId(customer),
        plan_id: PlanId(1),
        router_id: ripam_core::RouterId(1),
        status: ServiceStatus::Active,
        allocation_mode: AllocationMode::Dynamic,
        ip_address: None,
        created_at: Utc::now(),
    };
    store.atomically(|tx| tx.put_entity(&record)).unwrap();
    record.id
}

#[test]
fn test_end_to_end_slash_24() {
    let h = harness(500);
    let net = subnet(&h, "192.168.1.0/24");

    let report = h.ledger.generate(net.id).unwrap();
    assert_eq!(report.count, 254);
    assert_eq!(report.subnet.available_count, 254);

    let s1 = service(&h, 1);
    let row = h.ledger.assign(s1, Some(net.id), None).unwrap();
    assert_eq!(row.address, Ipv4Addr::new(192, 168, 1, 1));
    assert_eq!(row.status, AddressStatus::Assigned);
    assert_eq!(row.service_id, Some(s1));
    assert_eq!(h.ledger.get_subnet(net.id).unwrap().used_count, 1);

    let released = h.ledger.release_by_service(s1).unwrap().unwrap();
    assert_eq!(released.status, AddressStatus::Available);
    assert_eq!(h.ledger.get_subnet(net.id).unwrap().used_count, 0);
    assert_eq!(h.ledger.get_subnet(net.id).unwrap().available_count, 254);

    // second release of the same address succeeds without changes
    let again = h.ledger.release_address(released.address).unwrap();
    assert_eq!(again.status, AddressStatus::Available);
}

#[test]
fn test_single_free_address_race() {
    let h = harness(500);
    let net = subnet(&h, "10.20.0.0/30");
    h.ledger.generate(net.id).unwrap();
    h.ledger.reserve(Ipv4Addr::new(10, 20, 0, 2), None).unwrap();

    let services: Vec<ServiceId> = (1..=8).map(|c| service(&h, c)).collect();
    let handles: Vec<_> = services
        .into_iter()
        .map(|svc| {
            let ledger = h.ledger.clone();
            thread::spawn(move || ledger.assign(svc, Some(net.id), None))
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    for result in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(
            matches!(result, RipamError::PoolExhausted(_) | RipamError::NotAvailable(_)),
            "unexpected error: {:?}",
            result
        );
    }
}

#[test]
fn test_concurrent_assign_never_duplicates() {
    let h = harness(500);
    let net = subnet(&h, "10.30.0.0/26");
    h.ledger.generate(net.id).unwrap();

    let services: Vec<ServiceId> = (1..=40).map(|c| service(&h, c)).collect();
    let handles: Vec<_> = services
        .chunks(10)
        .map(|chunk| {
            let ledger = h.ledger.clone();
            let chunk = chunk.to_vec();
            thread::spawn(move || {
                chunk
                    .into_iter()
                    .map(|svc| ledger.assign(svc, Some(net.id), None).unwrap())
                    .collect::<Vec<Address>>()
            })
        })
        .collect();

    let assigned: Vec<Address> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    let distinct: HashSet<Ipv4Addr> = assigned.iter().map(|a| a.address).collect();
    assert_eq!(assigned.len(), 40);
    assert_eq!(distinct.len(), 40);

    let usage = h.ledger.utilization(net.id).unwrap();
    assert_eq!(usage.used, 40);
    assert_eq!(usage.available, 22);
    assert!(h
        .ledger
        .list_addresses(&Default::default())
        .unwrap()
        .iter()
        .all(|row| row.is_consistent()));
}

#[test]
fn test_overlap_checks() {
    let h = harness(500);
    subnet(&h, "10.0.0.0/25");

    let candidate = "10.0.0.0/24".parse().unwrap();
    assert_eq!(h.ledger.find_overlaps(&candidate, None).unwrap().len(), 1);

    let disjoint = "10.0.1.0/24".parse().unwrap();
    assert!(h.ledger.find_overlaps(&disjoint, None).unwrap().is_empty());
}

#[test]
fn test_partial_generation_and_resume() {
    let h = harness(100);
    let net = subnet(&h, "10.1.0.0/23");

    // a stray row for one of the subnet's hosts makes the third batch fail
    let stray = Address::new(AddressId(900_000), Ipv4Addr::new(10, 1, 1, 10), SubnetId(999));
    h.ledger
        .store()
        .atomically(|tx| tx.insert_address(&stray))
        .unwrap();

    let err = h.ledger.generate(net.id).unwrap_err();
    match err {
        RipamError::PartialGeneration {
            committed,
            expected,
            ..
        } => {
            assert_eq!(committed, 200);
            assert_eq!(expected, 510);
        }
        other => panic!("unexpected error: {:?}", other),
    }

    let partial = h.ledger.get_subnet(net.id).unwrap();
    assert_eq!(partial.generated_count, 200);
    assert_eq!(partial.available_count, 200);
    assert!(partial.is_partially_generated());
    assert!(matches!(
        h.ledger.generate(net.id),
        Err(RipamError::AlreadyGenerated(_))
    ));

    h.ledger
        .store()
        .atomically(|tx| tx.remove_address(&stray))
        .unwrap();

    let report = h.ledger.resume_generation(net.id).unwrap();
    assert_eq!(report.count, 310);
    assert_eq!(report.batches, 4);
    assert_eq!(report.subnet.generated_count, 510);
    assert_eq!(report.subnet.available_count, 510);
    assert!(!report.subnet.is_partially_generated());

    let rows = h.ledger.store().addresses_in(net.id).unwrap();
    assert_eq!(rows.len(), 510);
    assert!(rows.windows(2).all(|w| w[0].address < w[1].address));
}

#[test]
fn test_store_survives_reopen() {
    let temp = TempDir::new().unwrap();
    let ip;
    {
        let store = Arc::new(LedgerStore::open(temp.path()).unwrap());
        let h = Harness {
            ledger: Arc::new(AllocationLedger::new(
                store.clone(),
                GenerationPolicy::default(),
                500,
            )),
            directory: Directory::new(store),
            _temp: TempDir::new().unwrap(),
        };
        let net = subnet(&h, "172.16.5.0/28");
        h.ledger.generate(net.id).unwrap();
        ip = h.ledger.assign(service(&h, 1), Some(net.id), None).unwrap().address;
    }

    let store = Arc::new(LedgerStore::open(temp.path()).unwrap());
    let ledger = AllocationLedger::new(store, GenerationPolicy::default(), 500);
    let row = ledger.get_address(ip).unwrap();
    assert_eq!(row.status, AddressStatus::Assigned);
    assert_eq!(ledger.list_subnets(None).unwrap()[0].used_count, 1);
}

#[test]
fn test_delete_races_assign() {
    for round in 0..20u8 {
        let h = harness(500);
        let net = subnet(&h, &format!("10.30.{}.0/29", round));
        h.ledger.generate(net.id).unwrap();
        let svc = service(&h, 1);
        let ip = Ipv4Addr::new(10, 30, round, 2);

        let deleter = {
            let ledger = h.ledger.clone();
            thread::spawn(move || ledger.delete_subnet(net.id))
        };
        let assigner = {
            let ledger = h.ledger.clone();
            thread::spawn(move || ledger.assign(svc, Some(net.id), Some(ip)))
        };
        let deleted = deleter.join().unwrap();
        let assigned = assigner.join().unwrap();

        // exactly one side wins, and a deleted subnet never leaves a bound service
        assert!(
            deleted.is_ok() != assigned.is_ok(),
            "round {}: delete {:?}, assign {:?}",
            round,
            deleted.as_ref().err(),
            assigned.as_ref().err()
        );
        let store = h.ledger.store();
        let bound = store.service_address(svc).unwrap();
        if deleted.is_ok() {
            assert!(bound.is_none());
            assert!(store.address(ip).unwrap().is_none());
            let record: CustomerService = store.entity(svc.0).unwrap().unwrap();
            assert!(record.ip_address.is_none());
        } else {
            assert_eq!(bound, Some(ip));
            assert_eq!(
                h.ledger.get_address(ip).unwrap().status,
                AddressStatus::Assigned
            );
        }
    }
}
