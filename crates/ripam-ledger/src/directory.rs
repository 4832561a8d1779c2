//! Routers, service plans and customer-service lookups

use ripam_core::{
    CustomerId, CustomerService, PlanId, Result, RipamError, Router, RouterId, RouterStatus,
    ServiceId, ServicePlan, SyncRecord, SyncStatus,
};
use ripam_db::{LedgerStore, Sequence};
use std::sync::Arc;
use tracing::info;

/// Registry for the records provisioning consumes but does not own
#[derive(Clone)]
pub struct Directory {
    store: Arc<LedgerStore>,
}

impl Directory {
    pub fn new(store: Arc<LedgerStore>) -> Self {
        Self { store }
    }

    pub fn add_router(&self, name: &str, status: RouterStatus) -> Result<Router> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RipamError::InvalidRequest("router name is required".into()));
        }

        let router = Router {
            id: RouterId(self.store.next_id(Sequence::Router)?),
            name: name.to_string(),
            status,
        };
        self.store.atomically(|tx| tx.put_entity(&router))?;

        info!(router = %router.id, name = %router.name, "registered router");
        Ok(router)
    }

    pub fn set_router_status(&self, id: RouterId, status: RouterStatus) -> Result<Router> {
        let router = self.store.atomically(|tx| {
            let mut router: Router = tx
                .entity(id.0)?
                .ok_or_else(|| RipamError::NotFound(id.to_string()))?;
            router.status = status;
            tx.put_entity(&router)?;
            Ok::<_, RipamError>(router)
        })?;

        info!(router = %id, ?status, "router status changed");
        Ok(router)
    }

    pub fn router(&self, id: RouterId) -> Result<Router> {
        self.store
            .entity(id.0)?
            .ok_or_else(|| RipamError::NotFound(id.to_string()))
    }

    pub fn routers(&self) -> Result<Vec<Router>> {
        Ok(self.store.entities()?)
    }

    pub fn add_plan(
        &self,
        name: &str,
        download_mbps: Option<u32>,
        upload_mbps: Option<u32>,
    ) -> Result<ServicePlan> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RipamError::InvalidRequest("plan name is required".into()));
        }

        let plan = ServicePlan {
            id: PlanId(self.store.next_id(Sequence::Plan)?),
            name: name.to_string(),
            download_mbps,
            upload_mbps,
        };
        self.store.atomically(|tx| tx.put_entity(&plan))?;

        info!(plan = %plan.id, name = %plan.name, "registered plan");
        Ok(plan)
    }

    pub fn plan(&self, id: PlanId) -> Result<ServicePlan> {
        self.store
            .entity(id.0)?
            .ok_or_else(|| RipamError::NotFound(id.to_string()))
    }

    pub fn plans(&self) -> Result<Vec<ServicePlan>> {
        Ok(self.store.entities()?)
    }

    pub fn service(&self, id: ServiceId) -> Result<CustomerService> {
        self.store
            .entity(id.0)?
            .ok_or_else(|| RipamError::NotFound(id.to_string()))
    }

    pub fn services_for(&self, customer: CustomerId) -> Result<Vec<CustomerService>> {
        let mut services: Vec<CustomerService> = self.store.entities()?;
        services.retain(|service| service.customer_id == customer);
        Ok(services)
    }

    pub fn sync_record(&self, service: ServiceId) -> Result<Option<SyncRecord>> {
        Ok(self.store.entity(service.0)?)
    }

    /// Record the outcome reported by the router-configuration pusher
    pub fn complete_sync(&self, service: ServiceId, status: SyncStatus) -> Result<SyncRecord> {
        self.store.atomically(|tx| {
            let mut record: SyncRecord = tx
                .entity(service.0)?
                .ok_or_else(|| RipamError::NotFound(format!("sync record for {}", service)))?;
            record.status = status;
            tx.put_entity(&record)?;
            Ok(record)
        })
    }
}
