//! Diagnostics of the plugin.
//!
//! The runtime owns stdout, so logs go to stderr and, when a file is configured,
//! are appended to that file too. The subscriber is handed out as a
//! [`tracing::Dispatch`] and installed only for the duration of one command.

use std::{
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::{warn, Dispatch};
use tracing_subscriber::{
    fmt::writer::{BoxMakeWriter, MakeWriterExt},
    EnvFilter,
};

use crate::config::LogConf;

/// Default filter directive.
pub const DEFAULT_LEVEL: &str = "info";

/// Builder of the subscriber commands are logged to.
///
/// The filter directive is chosen in this order: `RUST_LOG`, the `log.level` of the
/// network configuration, the level set here. The log file follows the same order
/// without the environment step.
#[derive(Debug, Clone)]
pub struct Logging {
    level: String,
    file: Option<PathBuf>,
    enabled: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: DEFAULT_LEVEL.to_string(),
            file: None,
            enabled: true,
        }
    }
}

impl Logging {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn level(mut self, level: &str) -> Self {
        self.level = level.to_string();
        self
    }

    /// Appends logs to `file`, creating it and its parent directories when needed.
    #[must_use]
    pub fn file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    /// Drops every event.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Builds the subscriber for one command.
    ///
    /// `env_filter` is the value of `RUST_LOG`, if set. A log file that cannot be
    /// opened is reported on stderr and logging continues on stderr alone.
    #[must_use]
    pub fn dispatch(&self, conf: Option<&LogConf>, env_filter: Option<&str>) -> Dispatch {
        if !self.enabled {
            return Dispatch::none();
        }

        let directive = env_filter
            .filter(|v| !v.trim().is_empty())
            .or_else(|| conf.and_then(|c| c.level.as_deref()))
            .unwrap_or(&self.level);
        let file = conf
            .and_then(|c| c.file.as_deref())
            .or(self.file.as_deref());

        match file.map(|path| (path, open(path))) {
            Some((_, Ok(file))) => {
                build(directive, BoxMakeWriter::new(std::io::stderr.and(Arc::new(file))))
            }
            Some((path, Err(e))) => {
                let dispatch = build(directive, BoxMakeWriter::new(std::io::stderr));
                tracing::dispatcher::with_default(&dispatch, || {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to open log file, logging to stderr only"
                    );
                });
                dispatch
            }
            None => build(directive, BoxMakeWriter::new(std::io::stderr)),
        }
    }
}

fn build(directive: &str, writer: BoxMakeWriter) -> Dispatch {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(directive))
        .with_writer(writer)
        .with_ansi(false)
        .finish();
    Dispatch::new(subscriber)
}

fn open(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use std::{fs, path::Path};

    use rstest::rstest;
    use tempfile::TempDir;
    use tracing::{debug, info, trace};

    use super::Logging;
    use crate::config::LogConf;

    fn emit(dispatch: &tracing::Dispatch) {
        tracing::dispatcher::with_default(dispatch, || {
            info!(container_id = "ctr-1", "info event");
            debug!("debug event");
            trace!("trace event");
        });
    }

    fn read(path: &Path) -> String {
        fs::read_to_string(path).unwrap_or_default()
    }

    #[test]
    fn logs_are_appended_to_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/dummy-cni.log");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "previous line\n").unwrap();

        emit(&Logging::new().file(&path).dispatch(None, None));

        let content = read(&path);
        assert!(content.starts_with("previous line\n"), "{content}");
        assert!(content.contains("info event"), "{content}");
        assert!(content.contains("ctr-1"), "{content}");
        assert!(!content.contains("debug event"), "{content}");
    }

    #[test]
    fn missing_parent_directories_are_created() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/dummy-cni.log");

        emit(&Logging::new().file(&path).dispatch(None, None));

        assert!(read(&path).contains("info event"));
    }

    #[rstest]
    #[case(None, None, true, false)]
    #[case(Some("debug"), None, true, true)]
    #[case(Some("debug"), Some("warn"), false, false)]
    #[case(None, Some("trace"), true, true)]
    #[case(Some("warn"), Some(""), false, false)]
    fn level_precedence(
        #[case] conf_level: Option<&str>,
        #[case] env_filter: Option<&str>,
        #[case] has_info: bool,
        #[case] has_debug: bool,
    ) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dummy-cni.log");
        let conf = LogConf {
            level: conf_level.map(str::to_string),
            file: None,
        };

        emit(
            &Logging::new()
                .file(&path)
                .dispatch(Some(&conf), env_filter),
        );

        let content = read(&path);
        assert_eq!(content.contains("info event"), has_info, "{content}");
        assert_eq!(content.contains("debug event"), has_debug, "{content}");
    }

    #[test]
    fn configured_file_wins_over_default_file() {
        let dir = TempDir::new().unwrap();
        let default = dir.path().join("default.log");
        let configured = dir.path().join("configured.log");
        let conf = LogConf {
            level: None,
            file: Some(configured.clone()),
        };

        emit(&Logging::new().file(&default).dispatch(Some(&conf), None));

        assert!(read(&configured).contains("info event"));
        assert!(!default.exists());
    }

    #[test]
    fn unopenable_file_falls_back_to_stderr() {
        let dir = TempDir::new().unwrap();

        // A directory cannot be opened for appending.
        emit(&Logging::new().file(dir.path()).dispatch(None, None));

        assert!(dir.path().is_dir());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn disabled_logging_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dummy-cni.log");

        emit(&Logging::new().file(&path).disabled().dispatch(None, None));

        assert!(!path.exists());
    }
}
