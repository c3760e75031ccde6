use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use super::error::Error;

/// `PluginInfo` is for supported CNI plugin version information.
/// Please see <https://github.com/containernetworking/cni/blob/v1.1.0/SPEC.md#version>.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInfo {
    pub(crate) cni_version: String,
    pub(crate) supported_versions: Vec<String>,
}

impl PluginInfo {
    #[must_use]
    pub fn new(cni_version: &str, supported_versions: Vec<String>) -> Self {
        Self {
            cni_version: cni_version.to_string(),
            supported_versions,
        }
    }

    /// The primary CNI version of this plugin, used in error results
    /// when the configuration could not be read.
    #[must_use]
    pub fn cni_version(&self) -> &str {
        &self.cni_version
    }
}

impl Default for PluginInfo {
    fn default() -> Self {
        Self {
            cni_version: "1.1.0".to_string(),
            supported_versions: vec![
                "0.3.0".to_string(),
                "0.3.1".to_string(),
                "0.4.0".to_string(),
                "1.0.0".to_string(),
                "1.1.0".to_string(),
            ],
        }
    }
}

impl PluginInfo {
    pub(crate) fn version(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(|e| Error::FailedToDecode(e.to_string()))
    }

    pub(crate) fn about(&self, msg: Option<&str>) -> String {
        let versions = self.supported_versions.join(", ");
        msg.map_or_else(
            || format!("CNI protocol versions supported: {versions}"),
            |msg| format!("{msg}\nCNI protocol versions supported: {versions}"),
        )
    }

    // Version considerations
    pub(crate) fn validate(&self, ver: &str) -> Result<(), Error> {
        if self.cni_version.eq(ver) {
            return Ok(());
        }
        if !self.supported_versions.iter().any(|p| p.eq(ver)) {
            return Err(Error::IncompatibleVersion(format!(
                "{ver} is the incompatible version"
            )));
        }
        Ok(())
    }
}

/// A parsed `major.minor.patch` CNI version.
///
/// A missing minor or patch component reads as zero, so `"1.0"` equals `"1.0.0"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SchemaVersion {
    major: u64,
    minor: u64,
    patch: u64,
}

impl SchemaVersion {
    /// First version whose result type has `ips`, `interfaces` and the per-IP `version` field.
    pub const V0_3_0: Self = Self::new(0, 3, 0);
    /// First version whose result type drops the per-IP `version` field.
    pub const V1_0_0: Self = Self::new(1, 0, 0);

    #[must_use]
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Results below 0.3.0 carry `ip4`/`ip6` objects instead of an `ips` list.
    #[must_use]
    pub fn is_legacy(&self) -> bool {
        *self < Self::V0_3_0
    }

    /// Results from 0.3.0 up to 1.0.0 tag every IP with its address family.
    #[must_use]
    pub fn has_ip_version(&self) -> bool {
        !self.is_legacy() && *self < Self::V1_0_0
    }
}

impl FromStr for SchemaVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::IncompatibleVersion(format!("invalid CNI version: {s:?}"));
        let mut parts = s.trim().split('.');
        let mut next = |required: bool| -> Result<u64, Error> {
            match parts.next() {
                Some(p) => p.parse().map_err(|_| invalid()),
                None if required => Err(invalid()),
                None => Ok(0),
            }
        };
        let version = Self::new(next(true)?, next(false)?, next(false)?);
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(version)
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
