//! Invocation of the IPAM plugin this plugin delegates address management to.
//!
//! IPAM plugins are ordinary CNI plugins: they are looked up by name in `CNI_PATH`,
//! run with the same `CNI_*` environment and given the same network configuration
//! on stdin. Please see <https://github.com/containernetworking/cni/blob/v1.1.0/SPEC.md#delegated-plugins-ipam>.

use std::{
    io::{ErrorKind, Write},
    path::PathBuf,
    process::{Command, Stdio},
    thread,
};

use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    error::Error,
    types::{
        Cmd, CmdArgs, ErrorResult, CNI_ARGS, CNI_COMMAND, CNI_CONTAINERID, CNI_IFNAME, CNI_NETNS,
        CNI_PATH,
    },
};

/// The result printed by an IPAM plugin after ADD, in whatever version it chose.
#[derive(Debug, Clone, PartialEq)]
pub struct IpamResult {
    raw: Value,
}

impl IpamResult {
    /// Reads the stdout of an IPAM plugin.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DelegateExec`] if `bytes` is not a JSON object.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        let raw: Value = serde_json::from_slice(bytes).map_err(|e| {
            Error::DelegateExec(format!("failed to decode IPAM plugin result: {e}"))
        })?;
        Self::try_from(raw)
    }

    /// The `cniVersion` the IPAM plugin declared, if any.
    #[must_use]
    pub fn cni_version(&self) -> Option<&str> {
        self.raw.get("cniVersion").and_then(Value::as_str)
    }

    #[must_use]
    pub const fn raw(&self) -> &Value {
        &self.raw
    }

    #[must_use]
    pub fn into_raw(self) -> Value {
        self.raw
    }
}

impl TryFrom<Value> for IpamResult {
    type Error = Error;

    fn try_from(raw: Value) -> Result<Self, Self::Error> {
        if !raw.is_object() {
            return Err(Error::DelegateExec(format!(
                "IPAM plugin result must be a JSON object: {raw}"
            )));
        }
        Ok(Self { raw })
    }
}

/// Runs the ADD, DEL and CHECK operations of an IPAM plugin.
///
/// Implementations must hand `args.stdin_data()` to the IPAM plugin unmodified and
/// must not retry: a failure is returned as-is and ends the command.
pub trait Ipam {
    /// Allocates addresses for the container.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Delegate`] with the IPAM plugin's own error, or
    /// [`Error::DelegateExec`] if it could not be run or printed an unreadable result.
    fn exec_add(&self, plugin: &str, args: &CmdArgs) -> Result<IpamResult, Error>;

    /// Releases the addresses of the container.
    ///
    /// # Errors
    ///
    /// Same as [`Ipam::exec_add`].
    fn exec_del(&self, plugin: &str, args: &CmdArgs) -> Result<(), Error>;

    /// Verifies the addresses of the container are still allocated.
    ///
    /// # Errors
    ///
    /// Same as [`Ipam::exec_add`].
    fn exec_check(&self, plugin: &str, args: &CmdArgs) -> Result<(), Error>;
}

/// Runs IPAM plugin executables found in `CNI_PATH`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExecIpam;

impl Ipam for ExecIpam {
    fn exec_add(&self, plugin: &str, args: &CmdArgs) -> Result<IpamResult, Error> {
        let stdout = self.exec(Cmd::Add, plugin, args)?;
        IpamResult::from_slice(&stdout)
    }

    fn exec_del(&self, plugin: &str, args: &CmdArgs) -> Result<(), Error> {
        self.exec(Cmd::Del, plugin, args).map(|_| ())
    }

    fn exec_check(&self, plugin: &str, args: &CmdArgs) -> Result<(), Error> {
        self.exec(Cmd::Check, plugin, args).map(|_| ())
    }
}

impl ExecIpam {
    /// Looks `plugin` up in the `CNI_PATH` directories, first match wins.
    fn find(plugin: &str, paths: &[PathBuf]) -> Result<PathBuf, Error> {
        if plugin.contains(std::path::MAIN_SEPARATOR) {
            return Err(Error::DelegateExec(format!(
                "invalid IPAM plugin name {plugin:?}: must not contain a path separator"
            )));
        }
        paths
            .iter()
            .map(|dir| dir.join(plugin))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| {
                Error::DelegateExec(format!("failed to find plugin {plugin:?} in path {paths:?}"))
            })
    }

    fn exec(&self, cmd: Cmd, plugin: &str, args: &CmdArgs) -> Result<Vec<u8>, Error> {
        let bin = Self::find(plugin, args.path())?;
        let cmd_str: &str = cmd.into();
        debug!(plugin, bin = %bin.display(), command = cmd_str, "executing IPAM plugin");

        let mut command = Command::new(&bin);
        command
            .env(CNI_COMMAND, cmd_str)
            .env(CNI_PATH, join_paths(args.path()))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        set_or_remove(&mut command, CNI_CONTAINERID, args.container_id());
        set_or_remove(
            &mut command,
            CNI_NETNS,
            args.netns().and_then(|p| p.to_str()),
        );
        set_or_remove(&mut command, CNI_IFNAME, args.ifname());
        set_or_remove(&mut command, CNI_ARGS, args.args());

        let mut child = command.spawn().map_err(|e| {
            Error::DelegateExec(format!("failed to run IPAM plugin {}: {e}", bin.display()))
        })?;

        // stdin is fed while stdout and stderr are drained, so neither side can
        // block on a full pipe. A plugin may exit before reading all of stdin;
        // its exit status decides.
        let stdin = child.stdin.take();
        let data = args.stdin_data();
        let (written, output) = thread::scope(|s| {
            let writer = s.spawn(move || {
                stdin
                    .map(|mut stdin| stdin.write_all(data))
                    .transpose()
            });
            let output = child.wait_with_output();
            (writer.join(), output)
        });

        let output = output.map_err(|e| {
            Error::DelegateExec(format!("failed to wait for IPAM plugin {plugin}: {e}"))
        })?;
        let written = written.map_err(|_| {
            Error::DelegateExec(format!(
                "failed to write network configuration to IPAM plugin {plugin}"
            ))
        })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            debug!(plugin, stderr = %stderr.trim(), "IPAM plugin stderr");
        }

        if !output.status.success() {
            return Err(delegate_error(plugin, &output.status, &output.stdout, &stderr));
        }

        match written {
            Err(e) if e.kind() != ErrorKind::BrokenPipe => Err(Error::DelegateExec(format!(
                "failed to write network configuration to IPAM plugin {plugin}: {e}"
            ))),
            _ => Ok(output.stdout),
        }
    }
}

/// Turns the output of a failed IPAM plugin into an error, preferring the
/// CNI error object it printed on stdout.
fn delegate_error(
    plugin: &str,
    status: &std::process::ExitStatus,
    stdout: &[u8],
    stderr: &str,
) -> Error {
    if let Ok(res) = serde_json::from_slice::<ErrorResult>(stdout) {
        return Error::from(res);
    }
    warn!(plugin, %status, "IPAM plugin failed without a CNI error object");
    let stdout = String::from_utf8_lossy(stdout);
    let output = [stderr.trim(), stdout.trim()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("; ");
    Error::DelegateExec(format!("IPAM plugin {plugin} failed ({status}): {output}"))
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.to_string_lossy())
        .collect::<Vec<_>>()
        .join(":")
}

fn set_or_remove(command: &mut Command, key: &str, value: Option<&str>) {
    match value {
        Some(value) => command.env(key, value),
        None => command.env_remove(key),
    };
}
