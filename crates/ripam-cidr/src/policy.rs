//! Bounds on which blocks may be expanded into address rows

use crate::{Cidr, CidrError, Result};
use serde::{Deserialize, Serialize};

/// Limits applied before a subnet's address space is generated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationPolicy {
    /// Broadest prefix accepted (e.g. 16)
    pub min_prefix: u8,
    /// Narrowest prefix accepted (e.g. 30)
    pub max_prefix: u8,
    /// Ceiling on usable hosts per subnet
    pub max_hosts: u64,
}

impl GenerationPolicy {
    pub const DEFAULT_MIN_PREFIX: u8 = 16;
    pub const DEFAULT_MAX_PREFIX: u8 = 30;
    pub const DEFAULT_MAX_HOSTS: u64 = 10_000;

    /// Check a block against the policy, returning its usable host count
    pub fn check(&self, cidr: &Cidr) -> Result<u64> {
        let prefix = cidr.prefix_len();
        let hosts = cidr.usable_hosts();

        if prefix < self.min_prefix || hosts > self.max_hosts {
            return Err(CidrError::RangeTooLarge {
                prefix,
                hosts,
                limit: self.max_hosts,
            });
        }

        if prefix > self.max_prefix {
            return Err(CidrError::RangeTooSmall {
                prefix,
                narrowest: self.max_prefix,
            });
        }

        Ok(hosts)
    }
}

impl Default for GenerationPolicy {
    fn default() -> Self {
        Self {
            min_prefix: Self::DEFAULT_MIN_PREFIX,
            max_prefix: Self::DEFAULT_MAX_PREFIX,
            max_hosts: Self::DEFAULT_MAX_HOSTS,
        }
    }
}
