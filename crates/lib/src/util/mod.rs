//! Shared test utilities.

pub mod testutil;
