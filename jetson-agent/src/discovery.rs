//! Network discovery and system identification
//!
//! - Primary IP address with interface priority (Ethernet > WiFi > Other)
//! - OS label (L4T release on Jetson boards, distribution name elsewhere)
//! - Hostname

use if_addrs::{get_if_addrs, IfAddr};
use std::net::IpAddr;
use sysinfo::System;
use tracing::{debug, info, warn};

/// Interface type classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InterfaceType {
    Ethernet,
    Wireless,
    Other,
    Loopback,
}

#[derive(Debug, Clone)]
pub struct SystemInfo {
    pub hostname: String,
    pub os: String,
    pub ip: String,
}

impl SystemInfo {
    pub fn discover() -> Self {
        let hostname = gethostname::gethostname().to_string_lossy().to_string();
        let os = os_label();
        let ip = primary_ip().map(|ip| ip.to_string()).unwrap_or_default();
        info!("Discovery complete - Hostname: {}, OS: {}, IP: {}", hostname, os, ip);
        SystemInfo { hostname, os, ip }
    }
}

/// Classify interface type based on name patterns
pub fn classify_interface(name: &str) -> InterfaceType {
    let name_lower = name.to_lowercase();

    if name_lower == "lo" || name_lower.starts_with("lo0") {
        return InterfaceType::Loopback;
    }
    if name_lower.starts_with("wlan") || name_lower.starts_with("wlp") || name_lower.starts_with("wlo") {
        return InterfaceType::Wireless;
    }
    if name_lower.starts_with("eth") || name_lower.starts_with("en") {
        return InterfaceType::Ethernet;
    }
    InterfaceType::Other
}

/// Picks the IPv4 address of the best-ranked interface.
pub fn select_primary(candidates: &[(String, IpAddr)]) -> Option<IpAddr> {
    candidates
        .iter()
        .filter(|(name, ip)| ip.is_ipv4() && classify_interface(name) != InterfaceType::Loopback)
        .min_by_key(|(name, _)| classify_interface(name))
        .map(|(_, ip)| *ip)
}

pub fn primary_ip() -> Option<IpAddr> {
    let addrs = match get_if_addrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            warn!("Failed to enumerate network interfaces: {}", e);
            return None;
        }
    };

    let candidates: Vec<(String, IpAddr)> = addrs
        .into_iter()
        .filter(|a| !a.is_loopback())
        .map(|a| {
            let ip = match a.addr {
                IfAddr::V4(v4) => IpAddr::V4(v4.ip),
                IfAddr::V6(v6) => IpAddr::V6(v6.ip),
            };
            debug!("Found interface: {} ({})", a.name, ip);
            (a.name, ip)
        })
        .collect();

    select_primary(&candidates)
}

/// `/etc/nv_tegra_release` starts with `# R32 (release), REVISION: 4.3, ...`.
pub fn parse_tegra_release(content: &str) -> Option<String> {
    let line = content.lines().next()?.trim_start_matches('#').trim();
    let release = line.split_whitespace().next()?;
    let revision = line
        .split(',')
        .find_map(|part| part.trim().strip_prefix("REVISION:"))
        .map(str::trim);
    Some(match revision {
        Some(rev) => format!("L4T {release}.{rev}"),
        None => format!("L4T {release}"),
    })
}

pub fn os_label() -> String {
    if let Ok(content) = std::fs::read_to_string("/etc/nv_tegra_release") {
        if let Some(label) = parse_tegra_release(&content) {
            return label;
        }
    }
    System::long_os_version().unwrap_or_else(|| std::env::consts::OS.to_string())
}
