//! weft-lib: multi-repository dependency synchronization.
//!
//! A workspace is a module whose `MODULE` manifest names other modules by URL
//! and requested version. This crate discovers the full transitive module set,
//! resolves each module's competing version requests through commit ancestry,
//! and brings every working copy under `DEPS/` to its resolved version:
//!
//! - `vcs`: the uniform backend operations, for git and Jujutsu
//! - `manifest`: reading and writing `MODULE` files
//! - `graph`: the dependency graph of one run
//! - `resolve`: ancestry-based version resolution
//! - `sync`: the concurrent synchronizer tying it together
//! - `workspace`: locating the workspace and the directories weft manages

pub mod consts;
pub mod graph;
pub mod manifest;
pub mod module;
pub mod resolve;
pub mod sync;
pub mod vcs;
pub mod workspace;

#[cfg(any(test, feature = "test-support"))]
pub mod util;
