//! Client IP extraction from HTTP headers with trust validation
//!
//! - `none`: the socket address is the client.
//! - `standard`: RFC 7239 `Forwarded`, then `X-Forwarded-For`, walked right to
//!   left past a fixed number of trusted hops or past addresses that fall in
//!   the trusted proxy ranges.
//! - `cloudflare`: `CF-Connecting-IP`.

use axum::http::HeaderMap;
use ipnet::IpNet;
use std::net::IpAddr;
use tracing::warn;

use crate::config::{AnalyticsConfig, TrustedProxyMode};

/// Resolve the client address for a request.
///
/// `socket_addr` is `None` when the connection info is not available
/// (for example under test harnesses); header-derived addresses still apply.
pub fn extract_client_ip(
    headers: &HeaderMap,
    socket_addr: Option<IpAddr>,
    config: &AnalyticsConfig,
) -> Option<IpAddr> {
    if let Some(forced) = config.force_client_ip {
        return Some(forced);
    }

    match config.trusted_proxy_mode {
        TrustedProxyMode::Cloudflare => extract_cloudflare_ip(headers).or_else(|| {
            warn!("CF-Connecting-IP header missing in Cloudflare mode, using socket address");
            socket_addr
        }),
        TrustedProxyMode::Standard => extract_standard_ip(headers, config).or(socket_addr),
        TrustedProxyMode::None => socket_addr,
    }
}

fn extract_cloudflare_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("cf-connecting-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
}

fn extract_standard_ip(headers: &HeaderMap, config: &AnalyticsConfig) -> Option<IpAddr> {
    if let Some(chain) = forwarded_chain(headers) {
        if let Some(ip) = pick_from_chain(&chain, config) {
            return Some(ip);
        }
    }

    let chain = x_forwarded_for_chain(headers)?;
    pick_from_chain(&chain, config)
}

/// `for=` addresses of an RFC 7239 header, in hop order.
fn forwarded_chain(headers: &HeaderMap) -> Option<Vec<IpAddr>> {
    let forwarded = headers.get("forwarded")?.to_str().ok()?;

    let chain: Vec<IpAddr> = forwarded
        .split(',')
        .flat_map(|element| element.split(';'))
        .filter_map(|param| {
            let (key, value) = param.trim().split_once('=')?;
            if !key.eq_ignore_ascii_case("for") {
                return None;
            }
            parse_forwarded_node(value)
        })
        .collect();

    (!chain.is_empty()).then_some(chain)
}

/// Accepts `1.2.3.4`, `1.2.3.4:80`, `"[2001:db8::1]:80"` and bare IPv6.
fn parse_forwarded_node(value: &str) -> Option<IpAddr> {
    let value = value.trim().trim_matches('"');
    if let Some(rest) = value.strip_prefix('[') {
        return rest.split(']').next()?.parse().ok();
    }
    if let Ok(ip) = value.parse::<IpAddr>() {
        return Some(ip);
    }
    // IPv4 with port
    value.rsplit_once(':')?.0.parse().ok()
}

fn x_forwarded_for_chain(headers: &HeaderMap) -> Option<Vec<IpAddr>> {
    let xff = headers.get("x-forwarded-for")?.to_str().ok()?;

    let chain: Vec<IpAddr> = xff
        .split(',')
        .filter_map(|s| s.trim().parse::<IpAddr>().ok())
        .collect();

    (!chain.is_empty()).then_some(chain)
}

fn pick_from_chain(chain: &[IpAddr], config: &AnalyticsConfig) -> Option<IpAddr> {
    if let Some(num_trusted) = config.num_trusted_proxies {
        if chain.len() > num_trusted {
            return Some(chain[chain.len() - num_trusted - 1]);
        }
        // Fewer hops than trusted proxies: the leftmost entry is all we have
        return chain.first().copied();
    }

    if !config.trusted_proxies.is_empty() {
        return chain
            .iter()
            .rev()
            .find(|ip| !is_trusted(**ip, &config.trusted_proxies))
            .or_else(|| chain.first())
            .copied();
    }

    chain.last().copied()
}

fn is_trusted(ip: IpAddr, proxies: &[IpNet]) -> bool {
    proxies.iter().any(|net| net.contains(&ip))
}
