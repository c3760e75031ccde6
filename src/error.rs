//! CNI error types and error handling.
//!
//! This module defines the error types used throughout the plugin, following the
//! [CNI specification error format](https://github.com/containernetworking/cni/blob/v1.1.0/SPEC.md#error).
//!
//! Errors fall into three categories that matter to the command pipeline:
//!
//! - configuration errors, reported before any IPAM plugin is invoked
//!   ([`Error::FailedToDecode`], [`Error::InvalidNetworkConfig`], [`Error::IncompatibleVersion`]),
//! - delegate errors, raised by or while invoking the IPAM plugin
//!   ([`Error::Delegate`], [`Error::DelegateExec`]),
//! - normalize errors, raised when the IPAM plugin succeeded with an unusable result
//!   ([`Error::InvalidIpamResult`]).

use thiserror::Error;

/// Error code used by libcni for failures that have no well-known code.
pub const ERR_INTERNAL: u32 = 999;

/// CNI error types.
///
/// Each variant corresponds to a specific error code and includes a detail message.
/// When the plugin fails, the error is written to stdout as a JSON error result.
/// <https://github.com/containernetworking/cni/blob/v1.1.0/SPEC.md#error>
///
/// # CNI Error Codes
///
/// - 1: Incompatible CNI version
/// - 4: Invalid environment variable
/// - 5: I/O failure
/// - 6: Failed to decode/parse data
/// - 7: Invalid network configuration
/// - 999: Internal failure (IPAM plugin could not be run, or its result is unusable)
/// - any: the code reported by the IPAM plugin itself
#[derive(Debug, Error)]
pub enum Error {
    /// Incompatible CNI version (Error code: 1)
    ///
    /// Returned when the CNI version requested by the runtime is not supported
    /// by the plugin. The detail message should specify which version was requested.
    IncompatibleVersion(String),

    /// Invalid environment variable (Error code: 4)
    ///
    /// Returned when required CNI environment variables (like `CNI_COMMAND`,
    /// `CNI_CONTAINERID`, etc.) are missing or have invalid values.
    InvalidEnvValue(String),

    /// I/O failure (Error code: 5)
    ///
    /// Returned for I/O errors such as failing to read network configuration
    /// from stdin or write results to stdout.
    IOFailure(String),

    /// Failed to decode/parse data (Error code: 6)
    ///
    /// Returned when the network configuration is not well-formed JSON.
    FailedToDecode(String),

    /// Invalid network configuration (Error code: 7)
    ///
    /// Returned when a required field of the network configuration is absent or empty.
    InvalidNetworkConfig(String),

    /// The IPAM plugin reported a failure.
    ///
    /// Carries the code, message and details of the CNI error object the IPAM
    /// plugin printed, unchanged.
    ///
    /// # Arguments
    ///
    /// * First field: Error code reported by the IPAM plugin
    /// * Second field: Short error message
    /// * Third field: Detailed error description
    Delegate(u32, String, String),

    /// The IPAM plugin could not be executed (Error code: 999)
    ///
    /// Returned when the plugin binary is not found in `CNI_PATH`, cannot be spawned,
    /// exits without a readable error object, or prints an unreadable result.
    DelegateExec(String),

    /// The IPAM plugin returned an unusable result (Error code: 999)
    ///
    /// Returned when the IPAM plugin succeeded but its result cannot be turned into
    /// a plugin result, for example because it holds no IP configuration.
    InvalidIpamResult(String),
}

impl Error {
    /// Outputs details
    #[must_use]
    pub fn details(&self) -> String {
        #[allow(clippy::match_same_arms)]
        match self {
            Self::IncompatibleVersion(details) => details.clone(),
            Self::InvalidEnvValue(details) => details.clone(),
            Self::IOFailure(details) => details.clone(),
            Self::FailedToDecode(details) => details.clone(),
            Self::InvalidNetworkConfig(details) => details.clone(),
            Self::Delegate(_, _, details) => details.clone(),
            Self::DelegateExec(details) => details.clone(),
            Self::InvalidIpamResult(details) => details.clone(),
        }
    }

    /// Returns true if the error was raised by or while invoking the IPAM plugin.
    #[must_use]
    pub const fn is_delegate(&self) -> bool {
        matches!(self, Self::Delegate(..) | Self::DelegateExec(_))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IncompatibleVersion(_) => write!(f, "Incompatible CNI version"),
            Self::InvalidEnvValue(_) => {
                write!(f, "Invalid necessary environment variables")
            }
            Self::IOFailure(_) => write!(f, "I/O failure"),
            Self::FailedToDecode(_) => write!(f, "Failed to decode content"),
            Self::InvalidNetworkConfig(_) => write!(f, "Invalid network config"),
            Self::Delegate(_, msg, _) => write!(f, "{msg}"),
            Self::DelegateExec(_) => write!(f, "Failed to execute IPAM plugin"),
            Self::InvalidIpamResult(_) => write!(f, "Invalid IPAM result"),
        }
    }
}

impl From<&Error> for u32 {
    fn from(value: &Error) -> Self {
        match value {
            Error::IncompatibleVersion(_) => 1,
            Error::InvalidEnvValue(_) => 4,
            Error::IOFailure(_) => 5,
            Error::FailedToDecode(_) => 6,
            Error::InvalidNetworkConfig(_) => 7,
            Error::Delegate(code, _, _) => *code,
            Error::DelegateExec(_) | Error::InvalidIpamResult(_) => ERR_INTERNAL,
        }
    }
}
