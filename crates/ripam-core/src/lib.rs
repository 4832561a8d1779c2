//! Core types for RIPAM (Rust IP Address Manager)
//!
//! This crate provides the foundational types used throughout the RIPAM workspace:
//! - [`Subnet`], [`Address`] and the external records they reference
//! - [`RipamError`] - Error kinds surfaced to API and CLI callers
//! - [`config::Config`] - Environment-driven configuration
//!
//! ```
//! use ripam_core::{AddressStatus, SubnetId};
//!
//! let id = SubnetId(1);
//! assert_eq!(id.to_string(), "subnet-1");
//! assert_eq!(AddressStatus::Available.to_string(), "available");
//! ```

use ripam_cidr::CidrError;
use thiserror::Error;

pub mod config;
pub mod model;

pub use model::*;

/// Error types for RIPAM operations
#[derive(Error, Debug)]
pub enum RipamError {
    /// Malformed CIDR, or host bits set (with the corrected network)
    #[error("Invalid CIDR: {message}")]
    InvalidCidr {
        message: String,
        suggestion: Option<String>,
    },

    /// Block exceeds the generation ceiling
    #[error("Subnet too large: {0}")]
    SubnetTooLarge(String),

    /// Addresses already exist for the subnet
    #[error("Addresses already generated for {0}")]
    AlreadyGenerated(SubnetId),

    /// Candidate block intersects existing subnets
    #[error("CIDR overlaps {} existing subnet(s)", .0.len())]
    OverlapConflict(Vec<OverlapConflict>),

    /// Requested address is not free
    #[error("Address not available: {0}")]
    NotAvailable(String),

    /// No free address left
    #[error("No available address: {0}")]
    PoolExhausted(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Deletion blocked by assigned addresses or live services
    #[error("Has dependents: {0}")]
    HasDependents(String),

    /// Router cannot take new services
    #[error("Router {0} is offline")]
    RouterOffline(RouterId),

    /// One-service-per-customer policy violated
    #[error("Customer {0} already has a live service")]
    ActiveServiceExists(CustomerId),

    /// A generation batch failed after earlier batches were committed
    #[error("Generation stopped after {committed} of {expected} addresses: {reason}")]
    PartialGeneration {
        committed: u64,
        expected: u64,
        reason: String,
    },

    /// Another request changed the same rows first
    #[error("Concurrent modification: {0}")]
    Conflict(String),

    /// Request is malformed or inconsistent
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RipamError {
    /// Stable machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            RipamError::InvalidCidr { .. } => "invalid_cidr",
            RipamError::SubnetTooLarge(_) => "subnet_too_large",
            RipamError::AlreadyGenerated(_) => "already_generated",
            RipamError::OverlapConflict(_) => "overlap_conflict",
            RipamError::NotAvailable(_) => "not_available",
            RipamError::PoolExhausted(_) => "pool_exhausted",
            RipamError::NotFound(_) => "not_found",
            RipamError::HasDependents(_) => "has_dependents",
            RipamError::RouterOffline(_) => "router_offline",
            RipamError::ActiveServiceExists(_) => "active_service_exists",
            RipamError::PartialGeneration { .. } => "partial_generation",
            RipamError::Conflict(_) => "conflict",
            RipamError::InvalidRequest(_) => "invalid_request",
            RipamError::Database(_) => "database",
            RipamError::Serialization(_) => "serialization",
            RipamError::Io(_) => "io",
        }
    }

    /// Whether the caller caused the error (as opposed to the server)
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            RipamError::PartialGeneration { .. }
                | RipamError::Database(_)
                | RipamError::Serialization(_)
                | RipamError::Io(_)
        )
    }
}

impl From<CidrError> for RipamError {
    fn from(err: CidrError) -> Self {
        match err {
            CidrError::HostBitsSet { suggestion, .. } => RipamError::InvalidCidr {
                message: err.to_string(),
                suggestion: Some(suggestion.to_string()),
            },
            CidrError::RangeTooLarge { .. } => RipamError::SubnetTooLarge(err.to_string()),
            other => RipamError::InvalidCidr {
                message: other.to_string(),
                suggestion: None,
            },
        }
    }
}

/// Result type alias for RIPAM operations
pub type Result<T> = std::result::Result<T, RipamError>;
