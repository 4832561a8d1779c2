//! Operator-facing CIDR validation
//!
//! [`validate`] never fails: it reports whether the input is a canonical block
//! and, when host bits are set, surfaces the corrected network so the caller
//! can offer an auto-fix.

use crate::{Cidr, CidrError, Result};
use serde::{Deserialize, Serialize};
use std::net::Ipv6Addr;

/// Outcome of [`validate`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    #[serde(rename = "isValid")]
    pub is_valid: bool,
    /// Canonical block, or the suggested correction when host bits are set
    #[serde(rename = "normalizedCIDR")]
    pub normalized: Option<String>,
    pub error: Option<String>,
}

impl Validation {
    fn valid(normalized: String) -> Self {
        Self {
            is_valid: true,
            normalized: Some(normalized),
            error: None,
        }
    }

    fn invalid(error: String, suggestion: Option<String>) -> Self {
        Self {
            is_valid: false,
            normalized: suggestion,
            error: Some(error),
        }
    }
}

/// Validate a CIDR string
///
/// IPv4 blocks must have no bits set outside the mask. IPv6 blocks are only
/// loosely normalized (host bits are cleared) and are never generated.
///
/// # Examples
///
/// ```
/// use ripam_cidr::validate;
///
/// let ok = validate("10.20.0.0/16");
/// assert!(ok.is_valid);
///
/// let fix = validate("10.20.3.4/16");
/// assert!(!fix.is_valid);
/// assert_eq!(fix.normalized.as_deref(), Some("10.20.0.0/16"));
/// ```
pub fn validate(input: &str) -> Validation {
    if input.contains(':') {
        return match normalize_v6(input) {
            Ok(normalized) => Validation::valid(normalized),
            Err(e) => Validation::invalid(e.to_string(), None),
        };
    }

    match Cidr::parse(input) {
        Ok(cidr) => Validation::valid(cidr.to_string()),
        Err(CidrError::HostBitsSet { given, suggestion }) => {
            let error = CidrError::HostBitsSet { given, suggestion };
            Validation::invalid(error.to_string(), Some(suggestion.to_string()))
        }
        Err(e) => Validation::invalid(e.to_string(), None),
    }
}

/// Normalize an IPv6 block by clearing host bits
pub fn normalize_v6(input: &str) -> Result<String> {
    let (ip_str, prefix_str) = input.trim().split_once('/').ok_or_else(|| {
        CidrError::InvalidNotation("Expected format: xxxx::/prefix".to_string())
    })?;

    let ip: Ipv6Addr = ip_str
        .parse()
        .map_err(|_| CidrError::InvalidIpAddress(ip_str.to_string()))?;
    let prefix_len: u8 = prefix_str
        .parse()
        .map_err(|_| CidrError::InvalidNotation(format!("Invalid prefix: {}", prefix_str)))?;

    if prefix_len > 128 {
        return Err(CidrError::InvalidNotation(format!(
            "Invalid IPv6 prefix length: {} (must be 0-128)",
            prefix_len
        )));
    }

    let mask = if prefix_len == 0 {
        0
    } else {
        u128::MAX << (128 - prefix_len as u32)
    };
    let network = Ipv6Addr::from(u128::from(ip) & mask);

    Ok(format!("{}/{}", network, prefix_len))
}
