//! The command lifecycle of the plugin.
//!
//! Every command runs the same fixed pipeline: read the invocation context, parse the
//! network configuration, call the IPAM plugin and, for ADD, build the result. The
//! first failure ends the command and is printed on stdout as a CNI error object.

use std::io::{Read, Write};

use tracing::{debug, error, info, info_span};

use crate::{
    config::NetworkConfig,
    error::Error,
    ipam::{ExecIpam, Ipam},
    log::Logging,
    result::normalize,
    types::{Cmd, CmdArgs, CmdArgsBuilder, ErrorResult, CNI_COMMAND},
    util::{Env, IoTarget, OsEnv},
    version::PluginInfo,
};

const K8S_POD_NAME: &str = "K8S_POD_NAME";
const RUST_LOG: &str = "RUST_LOG";

/// The entry point of the plugin.
///
/// `Plugin` handles all the CNI protocol details:
/// - Reading CNI environment variables and the network configuration from stdin
/// - Version negotiation
/// - Delegating ADD/DEL/CHECK to the IPAM plugin named by `ipam.type`
/// - Writing results and errors to stdout
///
/// # Example
///
/// ```rust,no_run
/// use dummy_cni::{cni::Plugin, ipam::ExecIpam, log::Logging};
///
/// fn main() {
///     let plugin = Plugin::new(ExecIpam)
///         .msg("dummy-cni plugin")
///         .logging(Logging::new().file("/var/log/dummy-cni.log"));
///
///     if plugin.run().is_err() {
///         std::process::exit(1);
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Plugin<D: Ipam = ExecIpam> {
    info: PluginInfo,
    msg: Option<String>,
    ipam: D,
    logging: Logging,
}

impl Default for Plugin<ExecIpam> {
    fn default() -> Self {
        Self::new(ExecIpam)
    }
}

impl<D: Ipam> Plugin<D> {
    /// Creates a new `Plugin` that delegates address management to `ipam`.
    #[must_use]
    pub fn new(ipam: D) -> Self {
        Self {
            info: PluginInfo::default(),
            msg: None,
            ipam,
            logging: Logging::default(),
        }
    }

    /// Replaces the supported CNI versions.
    ///
    /// # Arguments
    ///
    /// * `ver` - The primary CNI version, used in errors printed before the configuration is read
    /// * `versions` - List of all CNI versions the plugin accepts
    #[must_use]
    pub fn versions(mut self, ver: &str, versions: Vec<String>) -> Self {
        self.info = PluginInfo::new(ver, versions);
        self
    }

    /// Sets an optional message shown when the plugin is run without `CNI_COMMAND`.
    #[must_use]
    pub fn msg(mut self, msg: &str) -> Self {
        self.msg = Some(msg.to_string());
        self
    }

    /// Sets where and how commands are logged.
    #[must_use]
    pub fn logging(mut self, logging: Logging) -> Self {
        self.logging = logging;
        self
    }

    /// Runs the command given by `CNI_COMMAND` against the process environment and
    /// standard streams.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the command. Its CNI error object has already
    /// been written to stdout, so the caller only has to exit with a non-zero code.
    pub fn run(&self) -> Result<(), Error> {
        self.run_with(&OsEnv, IoTarget::default())
    }

    pub(crate) fn run_with<E: Env>(&self, env: &E, io: IoTarget) -> Result<(), Error> {
        let IoTarget {
            mut stdin,
            mut stdout,
        } = io;
        let mut cni_version = None;

        match self.exec(env, &mut *stdin, &mut cni_version) {
            Ok(Some(out)) => write_out(&mut *stdout, &out),
            Ok(None) => Ok(()),
            Err(e) => {
                let version = cni_version
                    .as_deref()
                    .unwrap_or_else(|| self.info.cni_version());
                let res = serde_json::to_string(&ErrorResult::new(version, &e))
                    .map_err(|e| Error::FailedToDecode(e.to_string()))?;
                write_out(&mut *stdout, &res)?;
                Err(e)
            }
        }
    }

    /// Runs one command and returns what to print on success.
    /// `cni_version` is set as soon as the configuration declares one.
    ///
    /// Failures of ADD, DEL and CHECK are logged even when they happen before the
    /// configuration is read. The default log preferences apply then.
    fn exec<E: Env>(
        &self,
        env: &E,
        stdin: &mut dyn Read,
        cni_version: &mut Option<String>,
    ) -> Result<Option<String>, Error> {
        let cmd = Cmd::get_from_env(env);
        match cmd {
            Ok(Cmd::Version) => return self.info.version().map(Some),
            Ok(Cmd::UnSet) => return Ok(Some(self.info.about(self.msg.as_deref()))),
            _ => {}
        }

        let prepared =
            cmd.and_then(|cmd| self.prepare(env, cmd, stdin, cni_version).map(|p| (cmd, p)));
        let log_conf = prepared
            .as_ref()
            .ok()
            .and_then(|(_, (_, conf))| conf.log.as_ref());
        let dispatch = self
            .logging
            .dispatch(log_conf, env.var(RUST_LOG).as_deref());

        // Span fields are read from the environment even if validation failed.
        let context = CmdArgsBuilder::new(env).container_id().args().build();
        let pod = context
            .arg(K8S_POD_NAME)
            .map(str::to_string)
            .or_else(|| env.var(K8S_POD_NAME));

        tracing::dispatcher::with_default(&dispatch, || {
            let span = info_span!(
                "cni",
                command = %env.var(CNI_COMMAND).unwrap_or_default(),
                container_id = context.container_id().unwrap_or_default(),
                pod = pod.as_deref().unwrap_or_default()
            );
            let _enter = span.enter();

            let ipam = prepared
                .as_ref()
                .ok()
                .map(|(_, (_, conf))| conf.ipam.r#type.clone())
                .unwrap_or_default();
            let res = prepared.and_then(|(cmd, (args, conf))| self.handle(cmd, &conf, &args));
            if let Err(e) = &res {
                let code = u32::from(e);
                if e.is_delegate() {
                    error!(
                        code,
                        error = %e,
                        details = %e.details(),
                        ipam = %ipam,
                        "IPAM plugin failed"
                    );
                } else {
                    error!(code, error = %e, details = %e.details(), "command failed");
                }
            }
            res
        })
    }

    /// Reads and validates everything ADD, DEL and CHECK need before the IPAM
    /// plugin is called.
    fn prepare<E: Env>(
        &self,
        env: &E,
        cmd: Cmd,
        stdin: &mut dyn Read,
        cni_version: &mut Option<String>,
    ) -> Result<(CmdArgs, NetworkConfig), Error> {
        let args = CmdArgsBuilder::new(env)
            .container_id()
            .netns()
            .ifname()
            .args()
            .path()
            .validate(cmd)?
            .stdin_data(stdin)?
            .build();

        let conf = NetworkConfig::parse(args.stdin_data())?;
        *cni_version = Some(conf.cni_version.clone());
        self.info.validate(&conf.cni_version)?;
        Ok((args, conf))
    }

    fn handle(
        &self,
        cmd: Cmd,
        conf: &NetworkConfig,
        args: &CmdArgs,
    ) -> Result<Option<String>, Error> {
        let plugin = conf.ipam.r#type.as_str();
        debug!(
            network = %conf.name,
            ipam = plugin,
            netns = ?args.netns(),
            ifname = ?args.ifname(),
            args = ?args.args(),
            path = ?args.path(),
            "handling command"
        );

        match cmd {
            Cmd::Add => {
                let raw = self.ipam.exec_add(plugin, args)?;
                let sandbox = args
                    .netns()
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let res = normalize(raw, conf, &sandbox)?;
                info!(ips = res.result.ips.len(), cni_version = %res.cni_version, "attached");
                serde_json::to_string(&res)
                    .map(Some)
                    .map_err(|e| Error::FailedToDecode(e.to_string()))
            }
            Cmd::Del => {
                self.ipam.exec_del(plugin, args)?;
                info!("released");
                Ok(None)
            }
            Cmd::Check => {
                self.ipam.exec_check(plugin, args)?;
                info!("checked");
                Ok(None)
            }
            Cmd::Version | Cmd::UnSet => Ok(None),
        }
    }
}

fn write_out(out: &mut dyn Write, s: &str) -> Result<(), Error> {
    out.write_all(s.as_bytes())
        .and_then(|()| out.flush())
        .map_err(|e| Error::IOFailure(e.to_string()))
}
