//! Session and execution engine for ceres notebooks.
//!
//! This crate provides:
//! - `KernelSession`: one interpreter process and its message channel
//! - `Document`: ordered cells, a cell index and a kernel session, persisted
//!   as `.ipynb` after every mutation
//! - `DocumentRegistry`: the table of open documents keyed by path
//!
//! # Control flow
//!
//! ```text
//! caller ─► DocumentRegistry::get ─► Document::execute_cell
//!                                        │
//!                                        ├── CellIndex::resolve
//!                                        ├── KernelSession::submit ──► kernel stdin
//!                                        ├── Drain::next ◄──────────── kernel stdout
//!                                        └── JupyterNotebook::write_to_file
//! ```

pub mod config;
pub mod document;
pub mod error;
pub mod kernel;
pub mod paths;
pub mod registry;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{EngineConfig, KernelSpec};
pub use document::{
    Cell, CellId, CellIndex, CellKind, CellSnapshot, CellWithOutput, Document, IdGenerator,
    MAX_ID_ATTEMPTS, RandomIds,
};
pub use error::{Error, ErrorKind, Result};
pub use kernel::{
    Drain, KernelConnection, KernelLauncher, KernelProcess, KernelSession, KernelState,
    ProcessLauncher,
};
pub use registry::{DocumentHandle, DocumentRegistry};

pub use ceres_ipynb::Output;
