//! Records kept in the `entities` column family
//!
//! Routers, plans, customer services and sync records share one column
//! family; a one-byte tag per kind keeps their key ranges apart.

use ripam_core::{CustomerService, Router, ServicePlan, SyncRecord};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A record stored in the `entities` column family under `TAG ++ id`
pub trait Entity: Serialize + DeserializeOwned {
    const TAG: u8;

    fn entity_id(&self) -> u64;
}

impl Entity for Router {
    const TAG: u8 = b'r';

    fn entity_id(&self) -> u64 {
        self.id.0
    }
}

impl Entity for ServicePlan {
    const TAG: u8 = b'p';

    fn entity_id(&self) -> u64 {
        self.id.0
    }
}

impl Entity for CustomerService {
    const TAG: u8 = b'c';

    fn entity_id(&self) -> u64 {
        self.id.0
    }
}

// Keyed by the service it belongs to
impl Entity for SyncRecord {
    const TAG: u8 = b'y';

    fn entity_id(&self) -> u64 {
        self.service_id.0
    }
}
