//! VIP allocation from configured IPv4 ranges.
//!
//! Allocation is stateless: every call scans the ranges from the start
//! against the caller-supplied service snapshot, so the result depends only
//! on that snapshot and never on call history. The allocator holds no lock
//! of its own; thread safety is the caller's concern.

use crate::common::{Error, Result};
use crate::types::Service;
use std::collections::HashSet;
use std::net::Ipv4Addr;

/// One inclusive IPv4 address range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Range {
    first: u32,
    last: u32,
}

impl Range {
    /// Parse `a.b.c.d/n` (network and broadcast excluded for n < 31) or an
    /// inclusive `a.b.c.d-e.f.g.h` range.
    fn parse(spec: &str) -> Result<Self> {
        if let Some((start, end)) = spec.split_once('-') {
            let first = parse_addr(start)?;
            let last = parse_addr(end)?;
            if first > last {
                return Err(Error::InvalidRange(format!("{}: start after end", spec)));
            }
            Ok(Self { first, last })
        } else if let Some((base, bits)) = spec.split_once('/') {
            let bits: u32 = bits
                .trim()
                .parse()
                .map_err(|_| Error::InvalidRange(spec.to_string()))?;
            if bits > 32 {
                return Err(Error::InvalidRange(spec.to_string()));
            }
            let base = parse_addr(base)?;
            let mask = if bits == 0 { 0 } else { u32::MAX << (32 - bits) };
            let network = base & mask;
            let broadcast = network | !mask;
            if bits >= 31 {
                Ok(Self {
                    first: network,
                    last: broadcast,
                })
            } else {
                Ok(Self {
                    first: network + 1,
                    last: broadcast - 1,
                })
            }
        } else {
            Err(Error::InvalidRange(spec.to_string()))
        }
    }

    fn iter(&self) -> impl Iterator<Item = Ipv4Addr> {
        let (first, last) = (self.first, self.last);
        (first..=last).map(Ipv4Addr::from)
    }
}

fn parse_addr(s: &str) -> Result<u32> {
    s.trim()
        .parse::<Ipv4Addr>()
        .map(u32::from)
        .map_err(|_| Error::InvalidRange(format!("bad address: {}", s)))
}

pub struct Ipam {
    ranges: Vec<Range>,
}

impl Ipam {
    pub fn new(ranges: &[String]) -> Result<Self> {
        if ranges.is_empty() {
            return Err(Error::InvalidRange("no VIP ranges configured".to_string()));
        }
        let ranges = ranges
            .iter()
            .map(|spec| Range::parse(spec))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { ranges })
    }

    /// Assign the first address in the configured ranges that no service in
    /// `current` already holds, writing it into `svc.host`. Exhausting all
    /// ranges fails with [`Error::NoVipAvailable`].
    pub fn allocate_vip(&self, svc: &mut Service, current: &[Service]) -> Result<()> {
        let assigned: HashSet<&str> = current
            .iter()
            .filter(|s| s.is_allocated())
            .map(|s| s.host.as_str())
            .collect();

        for range in &self.ranges {
            for candidate in range.iter() {
                let host = candidate.to_string();
                if !assigned.contains(host.as_str()) {
                    tracing::debug!("allocated VIP {} for service {}", host, svc.id);
                    svc.host = host;
                    return Ok(());
                }
            }
        }

        Err(Error::NoVipAvailable)
    }

    /// Intentionally a no-op: availability is recomputed from the live
    /// service snapshot on every allocation, so a host becomes allocatable
    /// as soon as its service leaves the snapshot.
    pub fn release_vip(&self, _svc: &Service) -> Result<()> {
        Ok(())
    }
}
