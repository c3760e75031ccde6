//! CNI specification types and data structures.
//!
//! This module contains the types the plugin exchanges with the runtime and with
//! its IPAM plugin.
//!
//! # Main Types
//!
//! - [`CmdArgs`] - Invocation context for a CNI operation (from environment and stdin)
//! - [`PluginResult`] - Result printed by a successful ADD
//! - [`CNIResult`] - Version-less body of a result, as returned by IPAM plugins
//! - [`Interface`], [`IpConfig`], [`Route`], [`Dns`] - Components of a result
//!

use std::{io::Read, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{error::Error, util::Env};

pub(crate) const CNI_COMMAND: &str = "CNI_COMMAND";
pub(crate) const CNI_CONTAINERID: &str = "CNI_CONTAINERID";
pub(crate) const CNI_NETNS: &str = "CNI_NETNS";
pub(crate) const CNI_IFNAME: &str = "CNI_IFNAME";
pub(crate) const CNI_ARGS: &str = "CNI_ARGS";
pub(crate) const CNI_PATH: &str = "CNI_PATH";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmd {
    Add,
    Del,
    Check,
    Version,
    /// Unset state when `CNI_COMMAND` is not set.
    UnSet,
}

impl FromStr for Cmd {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADD" => Ok(Self::Add),
            "DEL" => Ok(Self::Del),
            "CHECK" => Ok(Self::Check),
            "VERSION" => Ok(Self::Version),
            "" => Ok(Self::UnSet),
            _ => Err(Error::InvalidEnvValue(format!("unknown CNI_COMMAND: {s}"))),
        }
    }
}

impl From<Cmd> for &str {
    fn from(cmd: Cmd) -> Self {
        match cmd {
            Cmd::Add => "ADD",
            Cmd::Del => "DEL",
            Cmd::Check => "CHECK",
            Cmd::Version => "VERSION",
            Cmd::UnSet => "",
        }
    }
}

impl Cmd {
    pub(crate) fn get_from_env(env: &impl Env) -> Result<Self, Error> {
        Self::from_str(&env.var(CNI_COMMAND).unwrap_or_default())
    }
}

/// `CmdArgs` is the invocation context of a CNI call.
///
/// All fields except for `stdin_data` are given as environment values.
/// `stdin_data` holds the network configuration exactly as the runtime wrote it;
/// it is forwarded to the IPAM plugin byte for byte.
/// Please see <https://github.com/containernetworking/cni/blob/v1.1.0/SPEC.md#parameters>.
#[derive(Debug, Default, Clone)]
pub struct CmdArgs {
    /// Container ID. A unique plaintext identifier for a container, allocated by the runtime.
    container_id: Option<String>,
    /// A reference to the container's "isolation domain".
    /// If using network namespaces, then a path to the network namespace (e.g. /run/netns/nsname).
    netns: Option<PathBuf>,
    /// Name of the interface to create inside the container.
    ifname: Option<String>,
    /// Extra arguments passed in by the user at invocation time. Alphanumeric key-value pairs separated by semicolons.
    #[allow(clippy::struct_field_names)]
    args: Option<String>,
    /// List of paths to search for CNI plugin executables.
    path: Vec<PathBuf>,
    /// Raw network configuration read from stdin.
    stdin_data: Vec<u8>,
}

impl CmdArgs {
    /// Returns the container ID if present.
    #[must_use]
    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    /// Returns the network namespace path if present.
    #[must_use]
    pub const fn netns(&self) -> Option<&PathBuf> {
        self.netns.as_ref()
    }

    /// Returns the interface name if present.
    #[must_use]
    pub fn ifname(&self) -> Option<&str> {
        self.ifname.as_deref()
    }

    /// Returns the extra arguments if present.
    #[must_use]
    pub fn args(&self) -> Option<&str> {
        self.args.as_deref()
    }

    /// Returns the list of CNI plugin paths.
    #[must_use]
    pub fn path(&self) -> &[PathBuf] {
        &self.path
    }

    /// Returns the network configuration bytes exactly as read from stdin.
    #[must_use]
    pub fn stdin_data(&self) -> &[u8] {
        &self.stdin_data
    }

    /// Splits `CNI_ARGS` into key-value pairs.
    /// Entries without `=` are skipped.
    #[must_use]
    pub fn arg_pairs(&self) -> Vec<(&str, &str)> {
        self.args
            .as_deref()
            .unwrap_or_default()
            .split(';')
            .filter_map(|pair| pair.split_once('='))
            .collect()
    }

    /// Returns the value of `key` in `CNI_ARGS`.
    #[must_use]
    pub fn arg(&self, key: &str) -> Option<&str> {
        self.arg_pairs()
            .into_iter()
            .find_map(|(k, v)| (k == key).then_some(v))
    }
}

/// Builder for constructing `CmdArgs` instances.
#[derive(Debug)]
pub struct CmdArgsBuilder<'a, E: Env> {
    env: &'a E,
    inner: CmdArgs,
}

impl<'a, E: Env> CmdArgsBuilder<'a, E> {
    /// Creates a new `CmdArgsBuilder` reading from `env`.
    #[must_use]
    pub fn new(env: &'a E) -> Self {
        Self {
            env,
            inner: CmdArgs::default(),
        }
    }

    /// Reads container ID from the `CNI_CONTAINERID` environment variable.
    #[must_use]
    pub fn container_id(mut self) -> Self {
        self.inner.container_id = self.env.var(CNI_CONTAINERID).filter(|v| !v.is_empty());
        self
    }

    /// Reads network namespace from the `CNI_NETNS` environment variable.
    #[must_use]
    pub fn netns(mut self) -> Self {
        self.inner.netns = self
            .env
            .var(CNI_NETNS)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        self
    }

    /// Reads interface name from the `CNI_IFNAME` environment variable.
    #[must_use]
    pub fn ifname(mut self) -> Self {
        self.inner.ifname = self.env.var(CNI_IFNAME).filter(|v| !v.is_empty());
        self
    }

    /// Reads extra arguments from the `CNI_ARGS` environment variable.
    #[must_use]
    pub fn args(mut self) -> Self {
        self.inner.args = self.env.var(CNI_ARGS).filter(|v| !v.is_empty());
        self
    }

    /// Reads CNI plugin paths from the `CNI_PATH` environment variable.
    #[must_use]
    pub fn path(mut self) -> Self {
        self.inner.path = self
            .env
            .var(CNI_PATH)
            .map(|val| {
                val.split(':')
                    .filter(|p| !p.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default();
        self
    }

    /// Reads the network configuration from `stdin` without interpreting it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IOFailure`] if reading fails.
    pub fn stdin_data(mut self, stdin: &mut dyn Read) -> Result<Self, Error> {
        stdin
            .read_to_end(&mut self.inner.stdin_data)
            .map_err(|e| Error::IOFailure(e.to_string()))?;
        Ok(self)
    }

    /// Validates required fields based on the CNI command.
    ///
    /// # Errors
    ///
    /// Returns an error if required fields are missing for the given command:
    /// - `ADD`/`CHECK` commands require `container_id`, `netns`, `ifname` and `path`
    /// - `DEL` requires the same except `netns`
    pub(crate) fn validate(self, cmd: Cmd) -> Result<Self, Error> {
        let missing = |name: &str| Err(Error::InvalidEnvValue(format!("{name} must be set")));
        match cmd {
            Cmd::Add | Cmd::Del | Cmd::Check => {
                if self.inner.container_id.is_none() {
                    return missing(CNI_CONTAINERID);
                }
                if cmd != Cmd::Del && self.inner.netns.is_none() {
                    return missing(CNI_NETNS);
                }
                if self.inner.ifname.is_none() {
                    return missing(CNI_IFNAME);
                }
                if self.inner.path.is_empty() {
                    return missing(CNI_PATH);
                }
            }
            Cmd::Version | Cmd::UnSet => {
                // These commands don't require container-specific parameters
            }
        }
        Ok(self)
    }

    /// Builds the `CmdArgs` instance.
    #[must_use]
    pub fn build(self) -> CmdArgs {
        self.inner
    }
}

/// Dictionary with IPAM (IP Address Management) specific values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Ipam {
    /// Refers to the filename of the IPAM plugin executable. Must not contain characters disallowed in file paths for the system (e.g. / or \).
    pub r#type: String,
    #[serde(flatten)]
    pub custom: serde_json::Map<String, serde_json::Value>,
}

/// DNS configuration information.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Dns {
    /// List of a priority-ordered list of DNS nameservers that this network is aware of. Each entry in the list is a string containing either an IPv4 or an IPv6 address.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nameservers: Vec<String>,
    /// The local domain used for short hostname lookups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// List of priority ordered search domains for short hostname lookups. Will be preferred over domain by most resolvers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<Vec<String>>,
    /// List of options that can be passed to the resolver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

/// Route created by plugins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Route {
    /// The destination of the route, in CIDR notation.
    pub dst: String,
    /// The next hop address.
    /// If unset, a value in `gateway` in the `ips` array in the CNI Result Type may be used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gw: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advmss: Option<u32>,
    /// The priority of the route, lower is higher.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
    /// The table to add the route to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<u32>,
    /// The scope of the destinations covered by the route prefix (global (0), link (253), host (254)).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<u32>,
}

/// `CNIResult` is the body of the Success result type, without `cniVersion`.
/// IPAM plugins return an abbreviated form of it, usually without `interfaces`.
/// Please see <https://github.com/containernetworking/cni/blob/v1.1.0/SPEC.md#delegated-plugins-ipam>.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CNIResult {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<Interface>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ips: Vec<IpConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<Dns>,
}

/// `PluginResult` is the Success result printed on stdout after ADD.
/// Please see <https://github.com/containernetworking/cni/blob/v1.1.0/SPEC.md#success>.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PluginResult {
    pub cni_version: String,
    #[serde(flatten)]
    pub result: CNIResult,
}

/// The interface created by the attachment, including any host-level interfaces.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Interface {
    /// The name of the interface.
    pub name: String,
    /// The hardware address of the interface.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    /// The isolation domain reference(e.g. path to network namespace) for the interface, or empty if on the host.
    /// For interfaces created inside the container, this should be the value passes via `CNI_NETNS`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<String>,
}

/// IP assigned by the plugin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IpConfig {
    /// Address family, `"4"` or `"6"`. Only part of results before 1.0.0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// the index into the `interfaces` list for a CNI Plugin Result indicating which interface this IP configuration should be applied to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<u32>,
    /// an IP address in CIDR notation.
    pub address: String,
    /// the default gateway for this subnet, if one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
}

/// `ErrorResult` is converted from Error.
/// This is actual data structure of Error CNI Result Type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ErrorResult {
    /// The same value as provided by the configuration.
    #[serde(default)]
    pub(crate) cni_version: String,
    /// A numeric error code.
    pub(crate) code: u32,
    /// A short message characterizing the error.
    #[serde(default)]
    pub(crate) msg: String,
    /// A longer message describing the error.
    #[serde(default)]
    pub(crate) details: String,
}

impl ErrorResult {
    pub(crate) fn new(cni_version: &str, err: &Error) -> Self {
        Self {
            cni_version: cni_version.to_string(),
            code: err.into(),
            msg: err.to_string(),
            details: err.details(),
        }
    }
}

/// An error object printed by an IPAM plugin keeps its code, msg and details.
impl From<ErrorResult> for Error {
    fn from(res: ErrorResult) -> Self {
        Self::Delegate(res.code, res.msg, res.details)
    }
}
