//! Network configuration given to the plugin on stdin.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::Error,
    types::{Dns, Ipam},
};

/// `NetworkConfig` will be given as a JSON serialized data from stdin when plugin is called.
/// Please see <https://github.com/containernetworking/cni/blob/v1.1.0/SPEC.md#section-1-network-configuration-format>.
///
/// Only `cniVersion` and `ipam.type` are required. Everything else the runtime sends is
/// kept in `custom`, but the IPAM plugin is always given the original bytes, never a
/// re-serialized copy of this struct.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    /// Semantic Version 2.0 of CNI specification to which this configuration conforms.
    /// The result is printed in this version.
    pub cni_version: String,
    /// Network name. Used as the name of the interface in the result.
    #[serde(default)]
    pub name: String,
    /// Matches the name of the CNI plugin binary on disk.
    #[serde(default)]
    pub r#type: String,
    /// Dictionary with IPAM (IP Address Management) specific values.
    pub ipam: Ipam,
    /// Dictionary with DNS specific values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<Dns>,
    /// Logging preferences of this plugin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<LogConf>,
    #[serde(flatten)]
    pub custom: Map<String, Value>,
}

/// Logging preferences, given as the `log` object of the network configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct LogConf {
    /// Filter directive such as `debug` or `dummy_cni=trace`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// File the log is appended to in addition to stderr.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl NetworkConfig {
    /// Parses the network configuration.
    ///
    /// # Errors
    ///
    /// - [`Error::FailedToDecode`] if `bytes` is not a JSON document.
    /// - [`Error::InvalidNetworkConfig`] if a required field is absent, empty or has the wrong type.
    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| Error::FailedToDecode(e.to_string()))?;
        let conf: Self =
            serde_json::from_value(value).map_err(|e| Error::InvalidNetworkConfig(e.to_string()))?;

        if conf.cni_version.trim().is_empty() {
            return Err(Error::InvalidNetworkConfig(
                "cniVersion must be set".to_string(),
            ));
        }
        if conf.ipam.r#type.trim().is_empty() {
            return Err(Error::InvalidNetworkConfig(
                "ipam.type must be set".to_string(),
            ));
        }
        Ok(conf)
    }
}
