//! `askpipe` crate (library surface).
//!
//! The entrypoint for end users is the `askpipe` binary. The library exposes the
//! configuration and terminal rendering it is built from, and re-exports the core
//! pipeline types.

pub use askpipe_core as core;

pub mod config;
pub mod render;
pub mod repl;
