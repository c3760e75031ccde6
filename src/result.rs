//! Assembly of the plugin result from the result of the IPAM plugin.
//!
//! An IPAM plugin answers in the version it likes. The result is first read into the
//! current layout, then attached to the single interface this plugin reports, and
//! finally shaped for the version the runtime asked for.

use std::{net::IpAddr, str::FromStr};

use serde::Deserialize;
use tracing::debug;

use crate::{
    config::NetworkConfig,
    error::Error,
    ipam::IpamResult,
    types::{CNIResult, Dns, Interface, IpConfig, PluginResult, Route},
    version::SchemaVersion,
};

const MISSING_IP_CONFIG: &str = "IPAM plugin returned missing IP configuration";

/// Builds the ADD result for the network `conf` attached in `sandbox`.
///
/// The result has exactly one interface, named after the network, and every IP of
/// the IPAM result points at it. Routes and DNS are copied unchanged.
///
/// # Errors
///
/// - [`Error::DelegateExec`] if the IPAM result cannot be read.
/// - [`Error::InvalidIpamResult`] if it holds no IP or an IP that is not a CIDR address.
/// - [`Error::IncompatibleVersion`] if `conf.cni_version` is not a version.
pub fn normalize(
    raw: IpamResult,
    conf: &NetworkConfig,
    sandbox: &str,
) -> Result<PluginResult, Error> {
    let target = SchemaVersion::from_str(&conf.cni_version)?;
    let mut result = into_current(raw, &conf.cni_version)?;

    if result.ips.is_empty() {
        return Err(Error::InvalidIpamResult(MISSING_IP_CONFIG.to_string()));
    }

    result.interfaces = vec![Interface {
        name: conf.name.clone(),
        mac: None,
        sandbox: Some(sandbox.to_string()),
    }];

    for ip in &mut result.ips {
        let family = ip_family(&ip.address)?;
        debug!(address = %ip.address, gateway = ?ip.gateway, "got IP");
        ip.interface = Some(0);
        ip.version = target.has_ip_version().then(|| family.to_string());
    }
    for route in &result.routes {
        debug!(dst = %route.dst, gw = ?route.gw, "got route");
    }

    Ok(PluginResult {
        cni_version: conf.cni_version.clone(),
        result,
    })
}

/// Reads an IPAM result in the current (0.3.0 and later) layout.
/// A result without `cniVersion` is read as `fallback`.
fn into_current(raw: IpamResult, fallback: &str) -> Result<CNIResult, Error> {
    let declared = raw.cni_version().unwrap_or(fallback).to_string();
    let version = SchemaVersion::from_str(&declared).map_err(|_| {
        Error::DelegateExec(format!(
            "IPAM plugin returned unsupported result version {declared:?}"
        ))
    })?;
    let decode = |e: serde_json::Error| {
        Error::DelegateExec(format!(
            "failed to decode IPAM result version {declared}: {e}"
        ))
    };

    if version.is_legacy() {
        let legacy: LegacyResult = serde_json::from_value(raw.into_raw()).map_err(decode)?;
        Ok(legacy.into())
    } else {
        serde_json::from_value(raw.into_raw()).map_err(decode)
    }
}

fn ip_family(address: &str) -> Result<u8, Error> {
    let (ip, prefix) = address.split_once('/').ok_or_else(|| {
        Error::InvalidIpamResult(format!("IP address {address:?} is not in CIDR notation"))
    })?;
    let ip = IpAddr::from_str(ip)
        .map_err(|e| Error::InvalidIpamResult(format!("invalid IP address {address:?}: {e}")))?;
    let max_prefix = if ip.is_ipv4() { 32 } else { 128 };
    match prefix.parse::<u8>() {
        Ok(len) if len <= max_prefix => Ok(if ip.is_ipv4() { 4 } else { 6 }),
        _ => Err(Error::InvalidIpamResult(format!(
            "invalid prefix length in IP address {address:?}"
        ))),
    }
}

/// Result layout of CNI 0.1.0 and 0.2.0.
#[derive(Debug, Deserialize)]
struct LegacyResult {
    #[serde(default)]
    ip4: Option<LegacyIpConfig>,
    #[serde(default)]
    ip6: Option<LegacyIpConfig>,
    #[serde(default)]
    dns: Option<Dns>,
}

#[derive(Debug, Deserialize)]
struct LegacyIpConfig {
    ip: String,
    #[serde(default)]
    gateway: Option<String>,
    #[serde(default)]
    routes: Vec<Route>,
}

impl From<LegacyResult> for CNIResult {
    fn from(legacy: LegacyResult) -> Self {
        let mut result = Self {
            dns: legacy.dns,
            ..Self::default()
        };
        for (family, conf) in [("4", legacy.ip4), ("6", legacy.ip6)] {
            let Some(conf) = conf else { continue };
            result.ips.push(IpConfig {
                version: Some(family.to_string()),
                interface: None,
                address: conf.ip,
                gateway: conf.gateway,
            });
            result.routes.extend(conf.routes);
        }
        result
    }
}
