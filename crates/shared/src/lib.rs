//! Vendhub Shared Types
//!
//! This crate contains types shared across the Vendhub platform.

pub mod types;

pub use types::*;
