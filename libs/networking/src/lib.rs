//! Networking model for instance VNICs.
//!
//! This library provides helpers for:
//! - IPv4 tenant subnets (parsing, containment, gateway selection)
//! - MAC address parsing
//! - MTU validation
//! - VNIC configuration and host-side interface naming

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use drover_id::{ConcentratorUuid, InstanceUuid, TenantUuid, VnicUuid};
use thiserror::Error;

/// Networking errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// Invalid IP address.
    #[error("invalid IP address: {0}")]
    InvalidAddress(String),

    /// Invalid CIDR prefix.
    #[error("invalid CIDR prefix: {0}")]
    InvalidPrefix(String),

    /// Invalid MAC address.
    #[error("invalid MAC address: {0}")]
    InvalidMac(String),

    /// Invalid MTU value.
    #[error("invalid MTU: {value} (must be between {min} and {max})")]
    InvalidMtu { value: u16, min: u16, max: u16 },

    /// Address does not belong to the subnet it is assigned from.
    #[error("{address} is not a host address in {subnet}")]
    AddressOutsideSubnet { address: Ipv4Addr, subnet: Ipv4Subnet },
}

// ============================================================================
// Subnets
// ============================================================================

/// IPv4 subnet a tenant's instances are addressed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Subnet {
    /// Network address of the subnet.
    pub address: Ipv4Addr,

    /// Prefix length (e.g., 24 for /24).
    pub prefix_len: u8,
}

impl Ipv4Subnet {
    /// Create a new subnet, masking the address to the prefix.
    pub fn new(address: Ipv4Addr, prefix_len: u8) -> Result<Self, NetworkError> {
        if prefix_len > 32 {
            return Err(NetworkError::InvalidPrefix(format!(
                "prefix length {} exceeds 32",
                prefix_len
            )));
        }

        Ok(Self {
            address: mask_ipv4(address, prefix_len),
            prefix_len,
        })
    }

    /// Parse from CIDR notation (e.g., "10.0.0.0/24").
    pub fn from_cidr(s: &str) -> Result<Self, NetworkError> {
        let Some((addr_str, prefix_str)) = s.split_once('/') else {
            return Err(NetworkError::InvalidPrefix(format!(
                "missing '/' in CIDR: {}",
                s
            )));
        };

        let address = Ipv4Addr::from_str(addr_str)
            .map_err(|_| NetworkError::InvalidAddress(addr_str.to_string()))?;

        let prefix_len = prefix_str
            .parse::<u8>()
            .map_err(|_| NetworkError::InvalidPrefix(prefix_str.to_string()))?;

        Self::new(address, prefix_len)
    }

    /// Check if an address is within this subnet.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        mask_ipv4(addr, self.prefix_len) == self.address
    }

    /// Check if an address is usable by a host: inside the subnet and
    /// neither the network nor the broadcast address.
    pub fn is_host(&self, addr: Ipv4Addr) -> bool {
        if !self.contains(addr) {
            return false;
        }
        if self.prefix_len >= 31 {
            return true;
        }
        addr != self.address && addr != self.broadcast()
    }

    /// Broadcast address of the subnet.
    pub fn broadcast(&self) -> Ipv4Addr {
        let bits = u32::from(self.address);
        Ipv4Addr::from(bits | !prefix_mask(self.prefix_len))
    }

    /// The gateway is the first host address of the subnet.
    pub fn gateway(&self) -> Ipv4Addr {
        if self.prefix_len >= 31 {
            return self.address;
        }
        Ipv4Addr::from(u32::from(self.address) + 1)
    }

    /// Number of addresses in this subnet.
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix_len))
    }
}

impl fmt::Display for Ipv4Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

impl FromStr for Ipv4Subnet {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_cidr(s)
    }
}

fn prefix_mask(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix_len))
    }
}

/// Mask an IPv4 address to a prefix length.
fn mask_ipv4(addr: Ipv4Addr, prefix_len: u8) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(addr) & prefix_mask(prefix_len))
}

// ============================================================================
// MAC Addresses
// ============================================================================

/// Ethernet MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Multicast addresses cannot be assigned to an interface.
    pub fn is_unicast(&self) -> bool {
        self.0[0] & 0x01 == 0
    }
}

impl FromStr for MacAddress {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');

        for octet in octets.iter_mut() {
            let part = parts
                .next()
                .filter(|p| p.len() == 2)
                .ok_or_else(|| NetworkError::InvalidMac(s.to_string()))?;
            *octet = u8::from_str_radix(part, 16)
                .map_err(|_| NetworkError::InvalidMac(s.to_string()))?;
        }

        if parts.next().is_some() {
            return Err(NetworkError::InvalidMac(s.to_string()));
        }

        Ok(Self(octets))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

// ============================================================================
// MTU Configuration
// ============================================================================

/// Minimum MTU for IPv4.
pub const MTU_MIN_IPV4: u16 = 576;

/// Maximum MTU for jumbo frames.
pub const MTU_MAX_JUMBO: u16 = 9000;

/// Default MTU for Ethernet.
pub const MTU_DEFAULT_ETHERNET: u16 = 1500;

/// Overhead of the tunnel between a node and the tenant's concentrator.
pub const TUNNEL_OVERHEAD: u16 = 50;

/// Validate an MTU value.
pub fn validate_mtu(mtu: u16) -> Result<u16, NetworkError> {
    if !(MTU_MIN_IPV4..=MTU_MAX_JUMBO).contains(&mtu) {
        return Err(NetworkError::InvalidMtu {
            value: mtu,
            min: MTU_MIN_IPV4,
            max: MTU_MAX_JUMBO,
        });
    }
    Ok(mtu)
}

/// Calculate MTU for encapsulated traffic.
///
/// Returns the inner MTU given an outer MTU and overhead.
pub fn calculate_inner_mtu(outer_mtu: u16, overhead: u16) -> Result<u16, NetworkError> {
    let inner = outer_mtu.saturating_sub(overhead);
    validate_mtu(inner)
}

// ============================================================================
// VNIC Configuration
// ============================================================================

/// Linux interface names are limited to 15 characters (IFNAMSIZ - 1).
pub const MAX_IFACE_NAME_LEN: usize = 15;

/// Everything needed to create the host side of an instance VNIC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VnicConfig {
    pub instance_uuid: InstanceUuid,
    pub vnic_uuid: VnicUuid,
    pub tenant_uuid: TenantUuid,
    pub mac: MacAddress,
    pub ip: Ipv4Addr,
    pub subnet: Ipv4Subnet,
    pub concentrator_uuid: ConcentratorUuid,
    pub concentrator_ip: Ipv4Addr,
    pub mtu: u16,
}

impl VnicConfig {
    /// Validate the parts of a VNIC configuration and assemble it.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        instance_uuid: InstanceUuid,
        vnic_uuid: VnicUuid,
        tenant_uuid: TenantUuid,
        mac: &str,
        ip: Ipv4Addr,
        subnet: &str,
        concentrator_uuid: ConcentratorUuid,
        concentrator_ip: Ipv4Addr,
    ) -> Result<Self, NetworkError> {
        let mac: MacAddress = mac.parse()?;
        if !mac.is_unicast() {
            return Err(NetworkError::InvalidMac(mac.to_string()));
        }

        let subnet: Ipv4Subnet = subnet.parse()?;
        if !subnet.is_host(ip) {
            return Err(NetworkError::AddressOutsideSubnet {
                address: ip,
                subnet,
            });
        }

        Ok(Self {
            instance_uuid,
            vnic_uuid,
            tenant_uuid,
            mac,
            ip,
            subnet,
            concentrator_uuid,
            concentrator_ip,
            mtu: calculate_inner_mtu(MTU_DEFAULT_ETHERNET, TUNNEL_OVERHEAD)?,
        })
    }

    /// Set custom MTU.
    pub fn with_mtu(mut self, mtu: u16) -> Result<Self, NetworkError> {
        self.mtu = validate_mtu(mtu)?;
        Ok(self)
    }

    /// Host-side interface name, unique per VNIC.
    pub fn vnic_name(&self) -> String {
        format!("vnic-{}", self.vnic_uuid.short())
    }

    /// Host-side bridge shared by all VNICs on the same tenant subnet.
    pub fn bridge_name(&self) -> String {
        format!(
            "br-{:08x}{:02x}",
            u32::from(self.subnet.address),
            self.subnet.prefix_len
        )
    }

    /// Gateway the guest routes through.
    pub fn gateway(&self) -> Ipv4Addr {
        self.subnet.gateway()
    }
}
