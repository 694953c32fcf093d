//! CIDR-style address matching via manual bitwise octet masking, the same
//! `seq & mask` idiom used for geometry checks in `strata-ring`, rather than
//! pulling in a dedicated CIDR crate for a handful of comparisons.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum CidrError {
    #[error("invalid address pattern '{0}'")]
    InvalidAddress(String),
    #[error("invalid prefix length in '{0}'")]
    InvalidPrefix(String),
}

#[derive(Debug, Clone, Copy)]
pub struct CidrBlock {
    net: IpAddr,
    prefix: u8,
}

impl CidrBlock {
    pub fn contains(&self, addr: &IpAddr) -> bool {
        match (self.net, addr) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => mask_eq_v4(net, *addr, self.prefix),
            (IpAddr::V6(net), IpAddr::V6(addr)) => mask_eq_v6(net, *addr, self.prefix),
            _ => false,
        }
    }
}

impl FromStr for CidrBlock {
    type Err = CidrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr_part, prefix_part) = match s.split_once('/') {
            Some((a, p)) => (a, Some(p)),
            None => (s, None),
        };
        let net: IpAddr = addr_part
            .parse()
            .map_err(|_| CidrError::InvalidAddress(s.to_string()))?;
        let max_prefix = if net.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix_part {
            Some(p) => p.parse::<u8>().map_err(|_| CidrError::InvalidPrefix(s.to_string()))?,
            None => max_prefix,
        };
        if prefix > max_prefix {
            return Err(CidrError::InvalidPrefix(s.to_string()));
        }
        Ok(Self { net, prefix })
    }
}

fn mask_eq_v4(net: Ipv4Addr, addr: Ipv4Addr, prefix: u8) -> bool {
    let mask: u32 = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
    (u32::from(net) & mask) == (u32::from(addr) & mask)
}

fn mask_eq_v6(net: Ipv6Addr, addr: Ipv6Addr, prefix: u8) -> bool {
    let mask: u128 = if prefix == 0 { 0 } else { u128::MAX << (128 - prefix) };
    (u128::from(net) & mask) == (u128::from(addr) & mask)
}

/// A list of CIDR blocks, any of which constitutes a match.
#[derive(Debug, Clone, Default)]
pub struct AddressList(Vec<CidrBlock>);

impl AddressList {
    pub fn parse(patterns: &[String]) -> Result<Self, CidrError> {
        let blocks = patterns.iter().map(|p| p.parse()).collect::<Result<Vec<_>, _>>()?;
        Ok(Self(blocks))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, addr: IpAddr) -> bool {
        self.0.iter().any(|block| block.contains(&addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_within_prefix() {
        let block: CidrBlock = "10.0.0.0/8".parse().unwrap();
        assert!(block.contains(&"10.3.0.5".parse().unwrap()));
        assert!(!block.contains(&"11.0.0.1".parse().unwrap()));
    }

    #[test]
    fn exact_address_defaults_to_host_prefix() {
        let block: CidrBlock = "192.168.1.1".parse().unwrap();
        assert!(block.contains(&"192.168.1.1".parse().unwrap()));
        assert!(!block.contains(&"192.168.1.2".parse().unwrap()));
    }

    #[test]
    fn address_list_matches_any_block() {
        let list = AddressList::parse(&["10.1.0.0/16".to_string(), "10.2.0.0/16".to_string()]).unwrap();
        assert!(list.matches("10.2.0.5".parse().unwrap()));
        assert!(!list.matches("10.3.0.5".parse().unwrap()));
    }
}
