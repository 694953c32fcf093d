//! Admission policy: the ordered cascade of
//! `matchips`/`rejectips`/per-IP cap/global cap checks, plus the
//! `writeips`/`trustedips`/`limitips` classification used to populate a
//! newly admitted `ClientInfo`.

use std::net::IpAddr;

use strata_config::{IpPolicyConfig, RESERVE};

use crate::cidr::{AddressList, CidrBlock, CidrError};

pub struct LimitEntry {
    cidr: CidrBlock,
    pub pattern: String,
}

pub struct IpPolicy {
    matchips: AddressList,
    rejectips: AddressList,
    writeips: AddressList,
    trustedips: AddressList,
    limitips: Vec<LimitEntry>,
}

/// Outcome of `IpPolicy::evaluate`, carrying the fields a `ClientInfo`
/// needs once the connection is admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admit {
        writeperm: bool,
        trusted: bool,
        limit_pattern: Option<String>,
    },
    Reject,
}

impl IpPolicy {
    pub fn from_config(config: &IpPolicyConfig) -> Result<Self, CidrError> {
        let limitips = config
            .limitips
            .iter()
            .map(|entry| {
                Ok(LimitEntry {
                    cidr: entry.cidr.parse()?,
                    pattern: entry.pattern.clone(),
                })
            })
            .collect::<Result<Vec<_>, CidrError>>()?;
        Ok(Self {
            matchips: AddressList::parse(&config.matchips)?,
            rejectips: AddressList::parse(&config.rejectips)?,
            writeips: AddressList::parse(&config.writeips)?,
            trustedips: AddressList::parse(&config.trustedips)?,
            limitips,
        })
    }

    /// Run the ordered admission cascade:
    /// 1. `matchips` configured and address doesn't match -> reject.
    /// 2. `rejectips` configured and address matches -> reject.
    /// 3. Per-IP cap configured, address not a writer, and its count has
    ///    reached the cap -> reject.
    /// 4. Global cap reached -> admit only a writer within `RESERVE`
    ///    headroom, else reject.
    pub fn evaluate(
        &self,
        addr: IpAddr,
        same_addr_count: u64,
        total_count: u64,
        maxclients: u64,
        maxclients_per_ip: u64,
    ) -> Admission {
        if !self.matchips.is_empty() && !self.matchips.matches(addr) {
            return Admission::Reject;
        }
        if self.rejectips.matches(addr) {
            return Admission::Reject;
        }

        let is_writer = self.writeips.matches(addr);

        if maxclients_per_ip > 0 && !is_writer && same_addr_count >= maxclients_per_ip {
            return Admission::Reject;
        }

        if maxclients > 0 && total_count >= maxclients {
            if !(is_writer && total_count < maxclients + RESERVE) {
                return Admission::Reject;
            }
        }

        let trusted = self.trustedips.matches(addr);
        let limit_pattern = self
            .limitips
            .iter()
            .find(|entry| entry.cidr.contains(&addr))
            .map(|entry| entry.pattern.clone());

        Admission::Admit {
            writeperm: is_writer,
            trusted,
            limit_pattern,
        }
    }
}
