//! dummy-cni is a CNI plugin that assigns no addresses itself.
//! It hands ADD, DEL and CHECK to the IPAM plugin named by `ipam.type` in the network
//! configuration and reports the addresses that plugin allocated on a single interface.
//!
//! The entrypoint is [`cni::Plugin`].
//!
//! # Quick start
//!
//! ```rust,no_run
//! use dummy_cni::{cni::Plugin, ipam::ExecIpam};
//!
//! fn main() {
//!     if Plugin::new(ExecIpam).run().is_err() {
//!         std::process::exit(1);
//!     }
//! }
//! ```

pub mod cni;
pub mod config;
pub mod error;
pub mod ipam;
pub mod log;
pub mod result;
pub mod types;
mod util;
pub mod version;

pub use util::{Env, OsEnv};
