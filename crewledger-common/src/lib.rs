//! # CrewLedger Common Library
//!
//! Shared code for the CrewLedger server and its command-line tools:
//! - Database schema, migrations and row models
//! - Configuration loading
//! - Phone number and contact helpers
//! - Common error type

pub mod config;
pub mod db;
pub mod error;
pub mod phone;

pub use error::{Error, Result};
