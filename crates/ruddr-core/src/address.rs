//! Address types shared by notifiers, updaters and the ledger
//!
//! IPv4 values travel as plain [`Ipv4Addr`] host addresses. IPv6 values
//! travel as an [`Ipv6Prefix`]: dynamic IPv6 assignments change the
//! network prefix, and each updater combines that prefix with the host bits
//! it already knows for every record it manages.

use crate::error::{Error, Result};
use crate::ledger::{BackendRecord, LedgerEntry};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// IP address family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    /// Key used for this family in the ledger file
    pub fn key(self) -> &'static str {
        match self {
            AddressFamily::Ipv4 => "ipv4",
            AddressFamily::Ipv6 => "ipv6",
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::Ipv4 => f.write_str("IPv4"),
            AddressFamily::Ipv6 => f.write_str("IPv6"),
        }
    }
}

/// An IPv6 network prefix, e.g. `2001:db8:1:2::/64`
///
/// Host bits are always zero: constructing a prefix from an address with
/// host bits set masks them off, so `2001:db8::1/64` and `2001:db8::/64`
/// compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv6Prefix {
    network: Ipv6Addr,
    prefix_len: u8,
}

impl Ipv6Prefix {
    /// Create a prefix from any address inside it and a prefix length
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `prefix_len` exceeds 128.
    pub fn new(address: Ipv6Addr, prefix_len: u8) -> Result<Self> {
        if prefix_len > 128 {
            return Err(Error::invalid_input(format!(
                "IPv6 prefix length {} is out of range (0-128)",
                prefix_len
            )));
        }

        let network = Ipv6Addr::from(u128::from(address) & netmask(prefix_len));
        Ok(Self {
            network,
            prefix_len,
        })
    }

    /// The network address (host bits zeroed)
    pub fn network(&self) -> Ipv6Addr {
        self.network
    }

    /// Number of bits in the network prefix
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Keep the host bits of `host` and replace its network bits with this
    /// prefix
    ///
    /// ```
    /// use ruddr_core::Ipv6Prefix;
    /// use std::net::Ipv6Addr;
    ///
    /// let prefix: Ipv6Prefix = "2001:db8:aaaa:bbbb::/64".parse().unwrap();
    /// let host: Ipv6Addr = "fd00::1234:5678".parse().unwrap();
    /// let expected: Ipv6Addr = "2001:db8:aaaa:bbbb::1234:5678".parse().unwrap();
    /// assert_eq!(prefix.replace_prefix(host), expected);
    /// ```
    pub fn replace_prefix(&self, host: Ipv6Addr) -> Ipv6Addr {
        let mask = netmask(self.prefix_len);
        Ipv6Addr::from((u128::from(host) & !mask) | u128::from(self.network))
    }
}

fn netmask(prefix_len: u8) -> u128 {
    if prefix_len == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(prefix_len))
    }
}

impl fmt::Display for Ipv6Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

impl FromStr for Ipv6Prefix {
    type Err = Error;

    /// Parse `addr/len`, or a bare address as a `/128`
    fn from_str(s: &str) -> Result<Self> {
        let (addr, len) = match s.split_once('/') {
            Some((addr, len)) => {
                let len = len.parse::<u8>().map_err(|_| {
                    Error::invalid_input(format!("Invalid IPv6 prefix length in '{}'", s))
                })?;
                (addr, len)
            }
            None => (s, 128),
        };

        let addr = addr
            .parse::<Ipv6Addr>()
            .map_err(|e| Error::invalid_input(format!("Invalid IPv6 address '{}': {}", s, e)))?;

        Self::new(addr, len)
    }
}

impl Serialize for Ipv6Prefix {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Ipv6Prefix {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// An address value belonging to one family
///
/// Implemented for [`Ipv4Addr`] and [`Ipv6Prefix`]. The ledger and the
/// publish engine are written once against this trait instead of once per
/// family.
pub trait FamilyAddress:
    Copy + Eq + fmt::Debug + fmt::Display + FromStr + Send + Sync + 'static
{
    /// The family this address type belongs to
    const FAMILY: AddressFamily;

    /// This family's entry in a ledger record
    fn slot(record: &BackendRecord) -> &Option<LedgerEntry<Self>>;

    /// Mutable access to this family's entry in a ledger record
    fn slot_mut(record: &mut BackendRecord) -> &mut Option<LedgerEntry<Self>>;
}

impl FamilyAddress for Ipv4Addr {
    const FAMILY: AddressFamily = AddressFamily::Ipv4;

    fn slot(record: &BackendRecord) -> &Option<LedgerEntry<Self>> {
        &record.ipv4
    }

    fn slot_mut(record: &mut BackendRecord) -> &mut Option<LedgerEntry<Self>> {
        &mut record.ipv4
    }
}

impl FamilyAddress for Ipv6Prefix {
    const FAMILY: AddressFamily = AddressFamily::Ipv6;

    fn slot(record: &BackendRecord) -> &Option<LedgerEntry<Self>> {
        &record.ipv6
    }

    fn slot_mut(record: &mut BackendRecord) -> &mut Option<LedgerEntry<Self>> {
        &mut record.ipv6
    }
}
