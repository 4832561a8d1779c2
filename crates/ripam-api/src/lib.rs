//! HTTP API for RIPAM
//!
//! JSON endpoints over the allocation ledger and provisioning coordinator.
//! Ledger calls are synchronous RocksDB work and run on the blocking pool.
//!
//! # Examples
//!
//! ```no_run
//! use ripam_core::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     ripam_api::serve(Config::from_env()?).await
//! }
//! ```

use anyhow::Context;
use axum::{
    routing::{get, post, put},
    Router,
};
use ripam_core::config::Config;
use ripam_db::LedgerStore;
use ripam_ledger::{AllocationLedger, Directory, ProvisioningCoordinator};
use std::sync::Arc;
use tokio::net::TcpListener;

mod addresses;
pub mod error;
mod extract;
mod inventory;
mod services;
mod subnets;

use error::ApiError;

/// Shared handles for request handlers
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<AllocationLedger>,
    pub coordinator: Arc<ProvisioningCoordinator>,
    pub directory: Directory,
}

impl AppState {
    pub fn new(store: Arc<LedgerStore>, config: &Config) -> Self {
        let ledger = Arc::new(AllocationLedger::from_config(store.clone(), config));
        let coordinator = Arc::new(ProvisioningCoordinator::from_config(ledger.clone(), config));
        Self {
            ledger,
            coordinator,
            directory: Directory::new(store),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(inventory::health))
        .route("/cidr/validate", post(inventory::validate_cidr))
        .route(
            "/routers",
            get(inventory::list_routers).post(inventory::create_router),
        )
        .route("/routers/{id}/status", put(inventory::set_router_status))
        .route("/plans", get(inventory::list_plans).post(inventory::create_plan))
        .route(
            "/subnets",
            get(subnets::list_subnets).post(subnets::create_subnet),
        )
        .route("/subnets/check-overlap", post(subnets::check_overlap))
        .route(
            "/subnets/{id}",
            get(subnets::get_subnet)
                .put(subnets::update_subnet)
                .delete(subnets::delete_subnet),
        )
        .route("/subnets/{id}/utilization", get(subnets::utilization))
        .route("/subnets/{id}/generate-ips", post(subnets::generate))
        .route("/ip-addresses", get(addresses::list_addresses))
        .route("/ip-addresses/assign", post(addresses::assign))
        .route("/ip-addresses/release", post(addresses::release))
        .route("/ip-addresses/reserve", post(addresses::reserve))
        .route("/ip-addresses/unreserve", post(addresses::unreserve))
        .route("/ip-addresses/mark-synced", post(addresses::mark_synced))
        .route("/services/provision", post(services::provision))
        .route("/services/{id}", get(services::get_service))
        .route("/services/{id}/activate", post(services::activate))
        .route("/services/{id}/suspend", post(services::suspend))
        .route("/services/{id}/terminate", post(services::terminate))
        .route("/services/{id}/reactivate", post(services::reactivate))
        .route("/services/{id}/sync", post(services::record_sync))
        .with_state(state)
}

/// Open the store named by `config` and serve until interrupted
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let store = LedgerStore::open(&config.data_dir)
        .with_context(|| format!("open ledger at {}", config.data_dir.display()))?;
    let app = router(AppState::new(Arc::new(store), &config));

    let tcp_listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("bind to {}", config.bind))?;
    tracing::info!(bind = %config.bind, data_dir = %config.data_dir.display(), "ripam api listening");

    axum::serve(tcp_listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("ripam api stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {err}");
    }
}

/// Run ledger work on the blocking pool
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> ripam_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await??)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct TestApp {
        app: Router,
        _temp: TempDir,
    }

    impl TestApp {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let config = Config::from_map(&HashMap::new()).unwrap();
            let store = Arc::new(LedgerStore::open(temp.path()).unwrap());
            Self {
                app: router(AppState::new(store, &config)),
                _temp: temp,
            }
        }

        async fn call(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
            let builder = Request::builder().method(method).uri(uri);
            let request = match body {
                Some(body) => builder
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };
            self.send(request).await
        }

        async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
            let response = self.app.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, value)
        }

        /// Router, plan and a generated subnet; returns the subnet id
        async fn seed(&self, cidr: &str) -> u64 {
            let (status, router) = self
                .call("POST", "/routers", Some(json!({"name": "bng-1"})))
                .await;
            assert_eq!(status, StatusCode::CREATED);
            let (status, _) = self
                .call("POST", "/plans", Some(json!({"name": "home-100"})))
                .await;
            assert_eq!(status, StatusCode::CREATED);

            let (status, subnet) = self
                .call(
                    "POST",
                    "/subnets",
                    Some(json!({"cidr": cidr, "router_id": router["id"], "name": "pool"})),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED);
            let id = subnet["id"].as_u64().unwrap();

            let (status, _) = self
                .call("POST", &format!("/subnets/{id}/generate-ips"), None)
                .await;
            assert_eq!(status, StatusCode::OK);
            id
        }
    }

    #[tokio::test]
    async fn test_health() {
        let app = TestApp::new();
        let (status, body) = app.call("GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_validate_cidr() {
        let app = TestApp::new();
        let (status, body) = app
            .call("POST", "/cidr/validate", Some(json!({"cidr": "192.168.1.5/24"})))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isValid"], false);
        assert_eq!(body["normalizedCIDR"], "192.168.1.0/24");

        let (_, body) = app
            .call("POST", "/cidr/validate", Some(json!({"cidr": "10.0.0.0/8"})))
            .await;
        assert_eq!(body["isValid"], true);
    }

    #[tokio::test]
    async fn test_subnet_creation_errors() {
        let app = TestApp::new();
        app.seed("10.0.0.0/25").await;

        let (status, body) = app
            .call(
                "POST",
                "/subnets",
                Some(json!({"cidr": "10.0.0.0/24", "router_id": 1, "name": "wide"})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "overlap_conflict");
        assert_eq!(body["conflicts"].as_array().unwrap().len(), 1);

        let (status, body) = app
            .call(
                "POST",
                "/subnets",
                Some(json!({"cidr": "10.9.0.7/24", "router_id": 1, "name": "typo"})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "invalid_cidr");
        assert_eq!(body["suggestion"], "10.9.0.0/24");

        let (status, body) = app.call("GET", "/subnets/42", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "not_found");
    }

    #[tokio::test]
    async fn test_check_overlap() {
        let app = TestApp::new();
        let id = app.seed("10.0.0.0/25").await;

        let (status, body) = app
            .call(
                "POST",
                "/subnets/check-overlap",
                Some(json!({"cidr": "10.0.0.0/24"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["overlaps"], true);
        assert_eq!(body["subnets"][0]["relation"], "contains");

        let (_, body) = app
            .call(
                "POST",
                "/subnets/check-overlap",
                Some(json!({"cidr": "10.0.0.0/25", "excludeId": id})),
            )
            .await;
        assert_eq!(body["overlaps"], false);
    }

    #[tokio::test]
    async fn test_generate_twice() {
        let app = TestApp::new();
        let id = app.seed("192.168.1.0/24").await;

        let (status, body) = app.call("GET", &format!("/subnets/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["available_count"], 254);

        let (status, body) = app
            .call("POST", &format!("/subnets/{id}/generate-ips"), None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "already_generated");
    }

    #[tokio::test]
    async fn test_provision_assign_release() {
        let app = TestApp::new();
        let subnet = app.seed("192.168.1.0/24").await;

        let (status, provisioned) = app
            .call(
                "POST",
                "/services/provision",
                Some(json!({"customer_id": 10, "plan_id": 1, "router_id": 1, "mode": "dynamic"})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(provisioned["address"]["address"], "192.168.1.1");
        assert_eq!(provisioned["service"]["status"], "pending");
        assert_eq!(provisioned["sync"]["status"], "pending");
        let service = provisioned["service"]["id"].as_u64().unwrap();

        let (_, usage) = app
            .call("GET", &format!("/subnets/{subnet}/utilization"), None)
            .await;
        assert_eq!(usage["used"], 1);

        let (status, listed) = app
            .call("GET", "/ip-addresses?status=assigned&customer_id=10", None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let (status, released) = app
            .call(
                "POST",
                "/ip-addresses/release",
                Some(json!({"service_id": service})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(released["status"], "available");

        let (status, nothing) = app
            .call(
                "POST",
                "/ip-addresses/release",
                Some(json!({"service_id": service})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(nothing, Value::Null);

        let (status, again) = app
            .call(
                "POST",
                "/ip-addresses/release",
                Some(json!({"ip_address": "192.168.1.1"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(again["status"], "available");

        let (status, body) = app
            .call(
                "POST",
                "/ip-addresses/assign",
                Some(json!({"service_id": service, "subnet_id": subnet, "ip_address": "192.168.1.20"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["address"], "192.168.1.20");

        let (status, detail) = app.call("GET", &format!("/services/{service}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["service"]["ip_address"], "192.168.1.20");
    }

    #[tokio::test]
    async fn test_release_requires_target() {
        let app = TestApp::new();
        let (status, body) = app
            .call("POST", "/ip-addresses/release", Some(json!({})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "invalid_request");
    }

    #[tokio::test]
    async fn test_service_lifecycle() {
        let app = TestApp::new();
        app.seed("10.0.0.0/29").await;

        let (_, provisioned) = app
            .call(
                "POST",
                "/services/provision",
                Some(json!({"customer_id": 1, "plan_id": 1, "router_id": 1, "mode": "dynamic"})),
            )
            .await;
        let id = provisioned["service"]["id"].as_u64().unwrap();

        let (status, body) = app
            .call(
                "POST",
                "/services/provision",
                Some(json!({"customer_id": 1, "plan_id": 1, "router_id": 1, "mode": "dynamic"})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "active_service_exists");

        let (status, body) = app
            .call("POST", &format!("/services/{id}/activate"), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "active");

        let (status, body) = app
            .call(
                "POST",
                &format!("/services/{id}/suspend"),
                Some(json!({"release_ip": true})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "suspended");
        assert_eq!(body["ip_address"], Value::Null);

        let (status, body) = app
            .call("POST", &format!("/services/{id}/reactivate"), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ip_address"], "10.0.0.1");

        let (status, body) = app
            .call("POST", &format!("/services/{id}/terminate"), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "terminated");
    }

    #[tokio::test]
    async fn test_record_sync() {
        let app = TestApp::new();
        app.seed("10.0.0.0/29").await;
        let (_, provisioned) = app
            .call(
                "POST",
                "/services/provision",
                Some(json!({"customer_id": 1, "plan_id": 1, "router_id": 1, "mode": "dynamic"})),
            )
            .await;
        let id = provisioned["service"]["id"].as_u64().unwrap();

        let (status, detail) = app
            .call(
                "POST",
                &format!("/services/{id}/sync"),
                Some(json!({"status": "synced"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["sync"]["status"], "synced");

        let (_, listed) = app
            .call("GET", "/ip-addresses?status=assigned", None)
            .await;
        assert!(listed[0]["last_synced_at"].is_string());

        let (status, body) = app
            .call(
                "POST",
                &format!("/services/{id}/sync"),
                Some(json!({"status": "pending"})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "invalid_request");
    }

    #[tokio::test]
    async fn test_rejections_are_json() {
        let app = TestApp::new();

        let malformed = Request::builder()
            .method("POST")
            .uri("/subnets")
            .header("content-type", "application/json")
            .body(Body::from("{\"cidr\": "))
            .unwrap();
        let (status, body) = app.send(malformed).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "invalid_request");

        let untyped = Request::builder()
            .method("POST")
            .uri("/cidr/validate")
            .body(Body::from(r#"{"cidr": "10.0.0.0/8"}"#))
            .unwrap();
        let (status, body) = app.send(untyped).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(body["kind"], "invalid_request");

        let (status, body) = app
            .call(
                "POST",
                "/subnets",
                Some(json!({"cidr": "10.0.0.0/24", "router_id": "one", "name": "pool"})),
            )
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["kind"], "invalid_request");

        let (status, body) = app.call("GET", "/subnets?router_id=abc", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "invalid_request");

        let (status, body) = app.call("GET", "/subnets/abc", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "invalid_request");
        assert!(!body["error"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_suspend_without_body() {
        let app = TestApp::new();
        app.seed("10.0.0.0/29").await;
        let (_, provisioned) = app
            .call(
                "POST",
                "/services/provision",
                Some(json!({"customer_id": 1, "plan_id": 1, "router_id": 1, "mode": "dynamic"})),
            )
            .await;
        let id = provisioned["service"]["id"].as_u64().unwrap();
        app.call("POST", &format!("/services/{id}/activate"), None)
            .await;

        let (status, body) = app
            .call("POST", &format!("/services/{id}/suspend"), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "suspended");
        assert_eq!(body["ip_address"], "10.0.0.1");

        let garbled = Request::builder()
            .method("POST")
            .uri(format!("/services/{id}/suspend"))
            .body(Body::from("release"))
            .unwrap();
        let (status, body) = app.send(garbled).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "invalid_request");
    }

    #[tokio::test]
    async fn test_offline_router_blocks_provisioning() {
        let app = TestApp::new();
        app.seed("10.0.0.0/29").await;

        let (status, _) = app
            .call("PUT", "/routers/1/status", Some(json!({"status": "offline"})))
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = app
            .call(
                "POST",
                "/services/provision",
                Some(json!({"customer_id": 1, "plan_id": 1, "router_id": 1, "mode": "dynamic"})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "router_offline");
    }

    #[tokio::test]
    async fn test_delete_subnet_with_assignments() {
        let app = TestApp::new();
        let subnet = app.seed("10.0.0.0/29").await;
        app.call(
            "POST",
            "/services/provision",
            Some(json!({"customer_id": 1, "plan_id": 1, "router_id": 1, "mode": "dynamic"})),
        )
        .await;

        let (status, body) = app
            .call("DELETE", &format!("/subnets/{subnet}"), None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "has_dependents");
    }
}
