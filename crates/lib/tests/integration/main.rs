//! Integration tests for weft-lib.

mod common;
mod git_tests;
mod sync_tests;
