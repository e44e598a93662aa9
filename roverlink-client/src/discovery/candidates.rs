use std::collections::HashSet;
use std::net::Ipv4Addr;

use crate::configs::RobotSettings;

/// Trims whitespace and trailing slashes; candidate URLs and stored base
/// URLs are always compared in this form.
pub fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn host_part(url: &str) -> Option<&str> {
    let rest = match url.find("://") {
        Some(idx) => &url[idx + 3..],
        None => url,
    };
    let end = rest.find('/').unwrap_or(rest.len());
    let host = &rest[..end];
    if host.is_empty() { None } else { Some(host) }
}

/// IPv4 host of a URL, if the host is a dotted quad.
pub fn ipv4_host_of(url: &str) -> Option<Ipv4Addr> {
    let host = host_part(url)?;
    let host = host.split(':').next()?;
    host.parse().ok()
}

pub fn port_of(url: &str) -> Option<u16> {
    let host = host_part(url)?;
    let mut parts = host.split(':');
    parts.next()?;
    parts.next()?.parse().ok()
}

pub fn scheme_of(url: &str) -> &str {
    match url.find("://") {
        Some(idx) => &url[..idx],
        None => "http",
    }
}

/// First three octets, the `/24` prefix the sweep is scoped to.
pub fn prefix_of(ip: Ipv4Addr) -> String {
    let [a, b, c, _] = ip.octets();
    format!("{a}.{b}.{c}")
}

fn push_candidate(
    candidates: &mut Vec<String>,
    seen: &mut HashSet<String>,
    host_ip: Ipv4Addr,
    url: String,
) {
    let normalized = normalize_base_url(&url);
    // Self-probe avoidance: the handheld's own address is never a candidate.
    if ipv4_host_of(&normalized) == Some(host_ip) {
        return;
    }
    if seen.insert(normalized.clone()) {
        candidates.push(normalized);
    }
}

/// Produces the prioritized candidate list for one discovery sweep.
///
/// Priority order: the address the robot last reported about itself, then
/// (inside the hotspot subnet) the fixed hotspot address, otherwise the
/// last octets of already-known hosts followed by the remaining `/24`
/// enumeration in ascending order. Protocol and port are reused from the
/// known base URL when there is one, else from the configured defaults.
pub fn build_candidates(
    host_ip: Ipv4Addr,
    known_base_url: Option<&str>,
    known_status_ip: Option<Ipv4Addr>,
    robot: &RobotSettings,
) -> Vec<String> {
    let scheme = known_base_url.map(scheme_of).unwrap_or("http").to_string();
    let port = known_base_url
        .and_then(port_of)
        .or_else(|| port_of(&robot.default_base_url))
        .unwrap_or(robot.api_port);
    let make = |ip: &str| format!("{scheme}://{ip}:{port}");

    let mut candidates = Vec::new();
    let mut seen = HashSet::new();

    if let Some(ip) = known_status_ip {
        push_candidate(
            &mut candidates,
            &mut seen,
            host_ip,
            make(&ip.to_string()),
        );
    }

    let prefix = prefix_of(host_ip);

    // The handheld sitting in the robot's hotspot subnet means the robot is
    // the access point itself; no enumeration needed.
    if prefix == robot.hotspot_prefix {
        push_candidate(
            &mut candidates,
            &mut seen,
            host_ip,
            make(&robot.hotspot_address),
        );
        return candidates;
    }

    // Robots tend to keep their last octet across networks, so known hosts
    // seed the sweep before the brute-force walk.
    let mut priority_octets = Vec::new();
    if let Some(ip) = known_status_ip {
        priority_octets.push(ip.octets()[3]);
    }
    if let Some(ip) = known_base_url.and_then(ipv4_host_of) {
        priority_octets.push(ip.octets()[3]);
    }

    let own_octet = host_ip.octets()[3];
    for octet in priority_octets {
        if octet != own_octet && octet != 0 && octet != 255 {
            push_candidate(
                &mut candidates,
                &mut seen,
                host_ip,
                make(&format!("{prefix}.{octet}")),
            );
        }
    }

    for octet in 1u8..=254 {
        if octet == own_octet {
            continue;
        }
        push_candidate(
            &mut candidates,
            &mut seen,
            host_ip,
            make(&format!("{prefix}.{octet}")),
        );
    }

    candidates
}
