//! Core relay pipeline: webhook event in, bounded media artifacts out.
//!
//! This crate is framework-agnostic. The messaging platform and the content
//! sources live behind ports (traits) implemented in adapter crates.

pub mod assemble;
pub mod command;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod fetch;
pub mod logging;
pub mod messaging;
pub mod pipeline;
pub mod scratch;
pub mod store;

pub use errors::{Error, Result};
