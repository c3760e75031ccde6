use std::{
    collections::HashMap,
    io::{Read, Write},
};

/// Standard streams the plugin talks to the runtime through.
pub(crate) struct IoTarget {
    pub(crate) stdin: Box<dyn Read>,
    pub(crate) stdout: Box<dyn Write>,
}

impl Default for IoTarget {
    fn default() -> Self {
        IoTarget {
            stdin: Box::new(std::io::stdin()),
            stdout: Box::new(std::io::stdout()),
        }
    }
}

/// Source of the `CNI_*` environment values.
pub trait Env {
    /// Returns the raw value of `name`, or `None` if it is not set.
    fn var(&self, name: &str) -> Option<String>;
}

/// The process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsEnv;

impl Env for OsEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl Env for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}
