//! Weft CLI - command-line driver for woven Go builds
//!
//! Parses `weft` invocations and dispatches them to the session, rule and
//! interceptor layers of `weft-core`.

pub mod commands;

pub use commands::{cli, config_from_matches, run, WeftCommand};
