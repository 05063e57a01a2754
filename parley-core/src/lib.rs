//! Core types for parley
//!
//! This crate provides the session data model, configuration, logging
//! setup and error type shared by the other parley crates.

pub mod config;
pub mod error;
pub mod logging;
pub mod session;
pub mod utils;

pub use error::{Error, Result};
