use std::net::{IpAddr, Ipv4Addr};

use crate::cluster::Cluster;
use crate::error::{Error, Result};

// Upper bound on hosts expanded from one IPv4 range.
const MAX_RANGE_HOSTS: u32 = 4096;

/// A parsed plugin `on` selector.
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    Role(String),
    Addresses(Vec<String>),
}

/// Parse a selector without consulting the cluster.
///
/// `role=<r>` or a bare word with no `.`/`:` is a role. Anything else is a
/// comma-separated list of addresses and IPv4 ranges (`10.0.0.2-10.0.0.9`).
pub fn parse_selector(on: &str) -> Result<Selector> {
    let on = on.trim();
    if on.is_empty() {
        return Err(Error::plugin_invalid_selector(on, "selector is empty"));
    }

    match on.split_once('=') {
        Some((key, value)) if key.trim() == "role" => {
            let role = value.trim();
            if role.is_empty() {
                return Err(Error::plugin_invalid_selector(on, "role is empty"));
            }
            return Ok(Selector::Role(role.to_string()));
        }
        Some((key, _)) => {
            return Err(Error::plugin_invalid_selector(
                on,
                format!("unsupported selector key '{}'", key.trim()),
            ))
        }
        None if !on.contains([',', '.', ':']) => return Ok(Selector::Role(on.to_string())),
        None => {}
    }

    let mut ips = Vec::new();
    for item in on.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match item.split_once('-') {
            Some((start, end)) => ips.extend(expand_range(on, start.trim(), end.trim())?),
            None => {
                let ip: IpAddr = item.parse().map_err(|_| {
                    Error::plugin_invalid_selector(on, format!("'{}' is not an IP address", item))
                })?;
                ips.push(ip.to_string());
            }
        }
    }

    if ips.is_empty() {
        return Err(Error::plugin_invalid_selector(on, "selector matched no hosts"));
    }
    Ok(Selector::Addresses(ips))
}

/// Resolve a plugin `on` selector to target IPs. A role with no hosts in
/// `cluster` is an error.
pub fn resolve_selector(on: &str, cluster: &Cluster) -> Result<Vec<String>> {
    match parse_selector(on)? {
        Selector::Role(role) => {
            let ips = cluster.ips_by_role(&role);
            if ips.is_empty() {
                return Err(Error::plugin_invalid_selector(
                    on.trim(),
                    format!("no hosts with role '{}'", role),
                ));
            }
            Ok(ips)
        }
        Selector::Addresses(ips) => Ok(ips),
    }
}

fn expand_range(on: &str, start: &str, end: &str) -> Result<Vec<String>> {
    let parse = |text: &str| {
        text.parse::<Ipv4Addr>().map(u32::from).map_err(|_| {
            Error::plugin_invalid_selector(on, format!("'{}' is not an IPv4 address", text))
        })
    };
    let (first, last) = (parse(start)?, parse(end)?);

    if first > last {
        return Err(Error::plugin_invalid_selector(
            on,
            format!("range start {} is after end {}", start, end),
        ));
    }
    if last - first >= MAX_RANGE_HOSTS {
        return Err(Error::plugin_invalid_selector(
            on,
            format!("range {}-{} exceeds {} hosts", start, end, MAX_RANGE_HOSTS),
        ));
    }

    Ok((first..=last)
        .map(|n| Ipv4Addr::from(n).to_string())
        .collect())
}
