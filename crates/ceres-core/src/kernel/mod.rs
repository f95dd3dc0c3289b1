//! Kernel sessions.
//!
//! A kernel is an interpreter process speaking a line-delimited JSON
//! protocol on stdio (see [`protocol`]). [`KernelSession`] owns one such
//! process, submits execute requests and drains the events that answer
//! them. How a kernel is started is behind [`KernelLauncher`].

mod launcher;
pub mod protocol;
mod session;

pub use launcher::{KernelConnection, KernelLauncher, KernelProcess, ProcessLauncher};
pub use session::{Drain, KernelSession, KernelState};

/// Python program run by the default kernel.
pub(crate) const PYTHON_BRIDGE: &str = include_str!("python_bridge.py");
