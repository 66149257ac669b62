//! # audedup common library
//!
//! Shared code for the audedup worker and connector:
//! - Record store schema and queries (jobs, tracks, unknown files)
//! - Classification event types and the in-process `EventBus`
//! - TOML bootstrap configuration
//! - Common error type

pub mod config;
pub mod db;
pub mod error;
pub mod events;

pub use error::{Error, Result};
