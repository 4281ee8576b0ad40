//! Integration tests for tether
//!
//! These tests drive real sessions through the runner host and the binary.

#[path = "../common/mod.rs"]
pub mod common;

pub mod cli;
pub mod local_run;
pub mod session_protocol;
