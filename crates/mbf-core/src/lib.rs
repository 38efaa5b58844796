//! Core runtime for a multi-tenant Telegram bot fleet.
//!
//! This crate is framework-agnostic. The chat transport, persistence and
//! business handlers live behind ports (traits) implemented in adapter crates.

pub mod config;
pub mod domain;
pub mod errors;
pub mod fleet;
pub mod logging;
pub mod notify;
pub mod ports;
pub mod source;
pub mod utils;

pub use errors::{Error, Result};
