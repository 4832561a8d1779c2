//! CIDR operations for subnet provisioning
//!
//! Provides the address arithmetic every other RIPAM crate builds on:
//! - Parse and validate CIDR notation (e.g., "192.168.0.0/24")
//! - Enumerate usable host addresses lazily, in batches
//! - Detect overlap and containment between blocks
//! - Enforce the generation size policy
//!
//! # Examples
//!
//! ```
//! use ripam_cidr::Cidr;
//!
//! let cidr = Cidr::parse("192.168.1.0/24").unwrap();
//! assert_eq!(cidr.prefix_len(), 24);
//! assert_eq!(cidr.network(), 0xC0A80100); // 192.168.1.0
//! assert!(cidr.contains(0xC0A80101)); // 192.168.1.1
//! assert!(!cidr.contains(0xC0A80001)); // 192.168.0.1
//! assert_eq!(cidr.usable_hosts(), 254);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use thiserror::Error;

mod policy;
mod validate;

pub use policy::GenerationPolicy;
pub use validate::{normalize_v6, validate, Validation};

/// CIDR errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CidrError {
    /// Invalid CIDR notation
    #[error("Invalid CIDR notation: {0}")]
    InvalidNotation(String),

    /// Invalid IP address
    #[error("Invalid IP address: {0}")]
    InvalidIpAddress(String),

    /// Invalid prefix length
    #[error("Invalid prefix length: {0} (must be 0-32)")]
    InvalidPrefixLength(u8),

    /// Address has bits set outside the prefix mask
    #[error("Host bits set in {given}; the network address is {suggestion}")]
    HostBitsSet { given: String, suggestion: Cidr },

    /// Range too large to generate
    #[error("CIDR range too large: /{prefix} has {hosts} usable hosts (limit {limit})")]
    RangeTooLarge { prefix: u8, hosts: u64, limit: u64 },

    /// Range too small to generate
    #[error("CIDR range too small: /{prefix} (narrowest allowed is /{narrowest})")]
    RangeTooSmall { prefix: u8, narrowest: u8 },
}

pub type Result<T> = std::result::Result<T, CidrError>;

/// How two CIDR blocks relate to each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    /// No shared addresses
    Disjoint,
    /// Same block
    Equal,
    /// `self` strictly contains the other block
    Contains,
    /// `self` lies strictly inside the other block
    ContainedBy,
}

/// CIDR block representation
///
/// The network address never has host bits set. Serializes as its canonical
/// string form ("10.0.0.0/24").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cidr {
    /// Network address (base IP)
    network: u32,
    /// Prefix length (0-32)
    prefix_len: u8,
    /// Network mask
    mask: u32,
}

impl Cidr {
    /// Parse CIDR notation string, rejecting host bits
    ///
    /// A block such as "10.0.0.5/24" fails with [`CidrError::HostBitsSet`],
    /// which carries the corrected network so callers can offer it back.
    ///
    /// # Examples
    ///
    /// ```
    /// use ripam_cidr::{Cidr, CidrError};
    ///
    /// let cidr = Cidr::parse("10.0.0.0/8").unwrap();
    /// assert_eq!(cidr.prefix_len(), 8);
    ///
    /// match Cidr::parse("10.0.0.5/24") {
    ///     Err(CidrError::HostBitsSet { suggestion, .. }) => {
    ///         assert_eq!(suggestion.to_string(), "10.0.0.0/24");
    ///     }
    ///     other => panic!("unexpected: {:?}", other),
    /// }
    /// ```
    pub fn parse(cidr: &str) -> Result<Self> {
        let (ip, prefix_len) = Self::split(cidr)?;
        let block = Self::new(ip, prefix_len)?;

        if block.network != ip {
            return Err(CidrError::HostBitsSet {
                given: cidr.trim().to_string(),
                suggestion: block,
            });
        }

        Ok(block)
    }

    fn split(cidr: &str) -> Result<(u32, u8)> {
        let parts: Vec<&str> = cidr.trim().split('/').collect();
        if parts.len() != 2 {
            return Err(CidrError::InvalidNotation(
                "Expected format: x.x.x.x/prefix".to_string(),
            ));
        }

        let ip_str = parts[0];
        let prefix_str = parts[1];

        // Plain decimal only: no sign, no leading zeros
        if !is_decimal(prefix_str) {
            return Err(CidrError::InvalidNotation(format!(
                "Invalid prefix: {:?}",
                prefix_str
            )));
        }
        let prefix_len: u8 = prefix_str
            .parse()
            .map_err(|_| CidrError::InvalidNotation(format!("Invalid prefix: {}", prefix_str)))?;

        if prefix_len > 32 {
            return Err(CidrError::InvalidPrefixLength(prefix_len));
        }

        Ok((parse_ipv4(ip_str)?, prefix_len))
    }

    /// Create new CIDR from network address and prefix length
    ///
    /// Host bits in `network` are cleared.
    ///
    /// # Arguments
    ///
    /// * `network` - Network address as u32
    /// * `prefix_len` - Prefix length (0-32)
    pub fn new(network: u32, prefix_len: u8) -> Result<Self> {
        if prefix_len > 32 {
            return Err(CidrError::InvalidPrefixLength(prefix_len));
        }

        let mask = mask_for(prefix_len);

        Ok(Self {
            network: network & mask,
            prefix_len,
            mask,
        })
    }

    /// Get network address
    pub fn network(&self) -> u32 {
        self.network
    }

    /// Get network address as [`Ipv4Addr`]
    pub fn network_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.network)
    }

    /// Get prefix length
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Get broadcast address
    pub fn broadcast(&self) -> u32 {
        self.network | !self.mask
    }

    /// Get first usable IP (network + 1)
    pub fn first_usable(&self) -> u32 {
        if self.prefix_len >= 31 {
            self.network
        } else {
            self.network + 1
        }
    }

    /// Get last usable IP (broadcast - 1)
    pub fn last_usable(&self) -> u32 {
        if self.prefix_len >= 31 {
            self.broadcast()
        } else {
            self.broadcast() - 1
        }
    }

    /// Get total number of IPs in this CIDR block
    pub fn size(&self) -> u64 {
        1u64 << (32 - self.prefix_len as u32)
    }

    /// Number of assignable hosts (network and broadcast excluded)
    pub fn usable_hosts(&self) -> u64 {
        if self.prefix_len >= 31 {
            self.size()
        } else {
            self.size() - 2
        }
    }

    /// Check if IP address is in this CIDR block
    ///
    /// # Arguments
    ///
    /// * `ip` - IP address as u32
    pub fn contains(&self, ip: u32) -> bool {
        (ip & self.mask) == self.network
    }

    /// Check if an address is a usable host of this block
    pub fn is_usable(&self, ip: Ipv4Addr) -> bool {
        let ip = u32::from(ip);
        ip >= self.first_usable() && ip <= self.last_usable()
    }

    /// Whether the two blocks share at least one address
    pub fn overlaps(&self, other: &Cidr) -> bool {
        self.network <= other.broadcast() && other.network <= self.broadcast()
    }

    /// Classify how `self` relates to `other`
    pub fn relation(&self, other: &Cidr) -> Relation {
        if self == other {
            Relation::Equal
        } else if self.prefix_len < other.prefix_len && self.contains(other.network) {
            Relation::Contains
        } else if other.prefix_len < self.prefix_len && other.contains(self.network) {
            Relation::ContainedBy
        } else {
            Relation::Disjoint
        }
    }

    /// Lazily enumerate usable host addresses in ascending order
    ///
    /// ```
    /// use ripam_cidr::Cidr;
    ///
    /// let cidr = Cidr::parse("192.168.1.0/30").unwrap();
    /// let hosts: Vec<String> = cidr.hosts().map(|ip| ip.to_string()).collect();
    /// assert_eq!(hosts, vec!["192.168.1.1", "192.168.1.2"]);
    /// ```
    pub fn hosts(&self) -> HostRange {
        HostRange {
            next: self.first_usable() as u64,
            end: self.last_usable() as u64,
        }
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network_addr(), self.prefix_len)
    }
}

impl FromStr for Cidr {
    type Err = CidrError;

    fn from_str(s: &str) -> Result<Self> {
        Cidr::parse(s)
    }
}

impl TryFrom<String> for Cidr {
    type Error = CidrError;

    fn try_from(value: String) -> Result<Self> {
        Cidr::parse(&value)
    }
}

impl From<Cidr> for String {
    fn from(cidr: Cidr) -> Self {
        cidr.to_string()
    }
}

/// Parse a dotted-quad IPv4 address to u32
pub fn parse_ipv4(ip: &str) -> Result<u32> {
    let octets: Vec<&str> = ip.trim().split('.').collect();
    if octets.len() != 4 {
        return Err(CidrError::InvalidIpAddress("Expected 4 octets".to_string()));
    }

    let mut result = 0u32;
    for (i, octet_str) in octets.iter().enumerate() {
        if !is_decimal(octet_str) {
            return Err(CidrError::InvalidIpAddress(format!(
                "Invalid octet: {:?}",
                octet_str
            )));
        }
        let octet: u8 = octet_str.parse().map_err(|_| {
            CidrError::InvalidIpAddress(format!("Octet out of range: {}", octet_str))
        })?;
        result |= (octet as u32) << (24 - i * 8);
    }

    Ok(result)
}

/// Non-empty ASCII digits without a leading zero ("0" itself is fine)
fn is_decimal(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) && (s == "0" || !s.starts_with('0'))
}

fn mask_for(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - prefix_len as u32)
    }
}

/// Lazy ascending range of usable host addresses
#[derive(Debug, Clone)]
pub struct HostRange {
    next: u64,
    end: u64,
}

impl HostRange {
    /// Split the remaining hosts into chunks of at most `size` addresses
    pub fn batches(self, size: usize) -> HostBatches {
        HostBatches {
            hosts: self,
            size: size.max(1),
        }
    }
}

impl Iterator for HostRange {
    type Item = Ipv4Addr;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next <= self.end {
            let ip = Ipv4Addr::from(self.next as u32);
            self.next += 1;
            Some(ip)
        } else {
            None
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.end + 1).saturating_sub(self.next) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for HostRange {}

/// Chunked view over a [`HostRange`]
pub struct HostBatches {
    hosts: HostRange,
    size: usize,
}

impl Iterator for HostBatches {
    type Item = Vec<Ipv4Addr>;

    fn next(&mut self) -> Option<Self::Item> {
        let batch: Vec<Ipv4Addr> = self.hosts.by_ref().take(self.size).collect();
        if batch.is_empty() {
            None
        } else {
            Some(batch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cidr() {
        let cidr = Cidr::parse("192.168.1.0/24").unwrap();
        assert_eq!(cidr.network(), 0xC0A80100);
        assert_eq!(cidr.prefix_len(), 24);
    }

    #[test]
    fn test_parse_cidr_slash_8() {
        let cidr = Cidr::parse("10.0.0.0/8").unwrap();
        assert_eq!(cidr.network(), 0x0A000000);
        assert_eq!(cidr.prefix_len(), 8);
    }

    #[test]
    fn test_parse_invalid_cidr() {
        assert!(Cidr::parse("192.168.1.0").is_err());
        assert!(Cidr::parse("192.168.1.0/33").is_err());
        assert!(Cidr::parse("256.0.0.0/24").is_err());
        assert!(Cidr::parse("10.0.0/24").is_err());
        assert!(Cidr::parse("10.0.0.0.0/24").is_err());
        assert!(Cidr::parse("10.0.x.0/24").is_err());
        assert!(Cidr::parse("10.0.0.0/").is_err());
        assert!(Cidr::parse("10.0.0.0/24/1").is_err());
    }

    #[test]
    fn test_parse_rejects_signs_and_leading_zeros() {
        assert!(Cidr::parse("10.0.0.0/+24").is_err());
        assert!(Cidr::parse("10.0.0.0/024").is_err());
        assert!(Cidr::parse("010.0.0.0/8").is_err());
        assert!(Cidr::parse("10.00.0.0/16").is_err());
        assert!(parse_ipv4("+10.0.0.1").is_err());
        assert_eq!(parse_ipv4("10.0.0.0").unwrap(), 0x0A000000);
        assert_eq!(Cidr::parse("0.0.0.0/0").unwrap().prefix_len(), 0);
    }

    #[test]
    fn test_parse_rejects_host_bits() {
        let err = Cidr::parse("192.168.1.77/24").unwrap_err();
        match err {
            CidrError::HostBitsSet { given, suggestion } => {
                assert_eq!(given, "192.168.1.77/24");
                assert_eq!(suggestion.to_string(), "192.168.1.0/24");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_cidr_contains() {
        let cidr = Cidr::parse("192.168.1.0/24").unwrap();
        assert!(cidr.contains(0xC0A80100)); // 192.168.1.0
        assert!(cidr.contains(0xC0A80101)); // 192.168.1.1
        assert!(cidr.contains(0xC0A801FF)); // 192.168.1.255
        assert!(!cidr.contains(0xC0A80001)); // 192.168.0.1
        assert!(!cidr.contains(0xC0A80200)); // 192.168.2.0
    }

    #[test]
    fn test_cidr_broadcast() {
        let cidr = Cidr::parse("192.168.1.0/24").unwrap();
        assert_eq!(cidr.broadcast(), 0xC0A801FF); // 192.168.1.255
    }

    #[test]
    fn test_cidr_usable_range() {
        let cidr = Cidr::parse("192.168.1.0/24").unwrap();
        assert_eq!(cidr.first_usable(), 0xC0A80101); // 192.168.1.1
        assert_eq!(cidr.last_usable(), 0xC0A801FE); // 192.168.1.254
        assert!(cidr.is_usable(Ipv4Addr::new(192, 168, 1, 1)));
        assert!(!cidr.is_usable(Ipv4Addr::new(192, 168, 1, 0)));
        assert!(!cidr.is_usable(Ipv4Addr::new(192, 168, 1, 255)));
    }

    #[test]
    fn test_cidr_size() {
        let cidr24 = Cidr::parse("192.168.1.0/24").unwrap();
        assert_eq!(cidr24.size(), 256);

        let cidr16 = Cidr::parse("192.168.0.0/16").unwrap();
        assert_eq!(cidr16.size(), 65536);

        let cidr0 = Cidr::parse("0.0.0.0/0").unwrap();
        assert_eq!(cidr0.size(), 1u64 << 32);
    }

    #[test]
    fn test_cidr_display() {
        let cidr = Cidr::parse("192.168.1.0/24").unwrap();
        assert_eq!(cidr.to_string(), "192.168.1.0/24");
    }

    #[test]
    fn test_cidr_new_clears_host_bits() {
        let cidr = Cidr::new(0xC0A80142, 24).unwrap();
        assert_eq!(cidr.network(), 0xC0A80100);
        assert_eq!(cidr.prefix_len(), 24);
        assert!(Cidr::new(0, 33).is_err());
    }

    #[test]
    fn test_cidr_slash_32() {
        let cidr = Cidr::parse("192.168.1.1/32").unwrap();
        assert_eq!(cidr.size(), 1);
        assert_eq!(cidr.first_usable(), 0xC0A80101);
        assert_eq!(cidr.last_usable(), 0xC0A80101);
    }

    #[test]
    fn test_hosts_exclude_network_and_broadcast() {
        for prefix in 16..=30u8 {
            let cidr = Cidr::new(0x0A140000, prefix).unwrap();
            let expected = (1u64 << (32 - prefix as u32)) - 2;
            assert_eq!(cidr.usable_hosts(), expected);

            let hosts = cidr.hosts();
            assert_eq!(hosts.len() as u64, expected);

            let mut previous = cidr.network();
            let mut count = 0u64;
            for host in hosts {
                let value = u32::from(host);
                assert!(value > previous, "hosts must ascend");
                assert!(value > cidr.network() && value < cidr.broadcast());
                previous = value;
                count += 1;
            }
            assert_eq!(count, expected, "prefix /{}", prefix);
        }
    }

    #[test]
    fn test_host_batches() {
        let cidr = Cidr::parse("10.0.0.0/22").unwrap(); // 1022 hosts
        let batches: Vec<Vec<Ipv4Addr>> = cidr.hosts().batches(500).collect();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 500);
        assert_eq!(batches[1].len(), 500);
        assert_eq!(batches[2].len(), 22);
        assert_eq!(batches[0][0], Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(batches[2][21], Ipv4Addr::new(10, 0, 3, 254));
    }

    #[test]
    fn test_overlap_containment() {
        let wide = Cidr::parse("10.0.0.0/24").unwrap();
        let narrow = Cidr::parse("10.0.0.0/25").unwrap();
        let upper = Cidr::parse("10.0.0.128/25").unwrap();
        let neighbour = Cidr::parse("10.0.1.0/24").unwrap();

        assert!(wide.overlaps(&narrow));
        assert!(narrow.overlaps(&wide));
        assert!(wide.overlaps(&upper));
        assert!(!narrow.overlaps(&upper));
        assert!(!wide.overlaps(&neighbour));

        assert_eq!(wide.relation(&narrow), Relation::Contains);
        assert_eq!(narrow.relation(&wide), Relation::ContainedBy);
        assert_eq!(wide.relation(&wide), Relation::Equal);
        assert_eq!(wide.relation(&neighbour), Relation::Disjoint);
    }

    #[test]
    fn test_serde_as_string() {
        let cidr = Cidr::parse("172.16.0.0/20").unwrap();
        let json = serde_json::to_string(&cidr).unwrap();
        assert_eq!(json, "\"172.16.0.0/20\"");

        let back: Cidr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cidr);

        assert!(serde_json::from_str::<Cidr>("\"172.16.0.1/20\"").is_err());
    }
}
