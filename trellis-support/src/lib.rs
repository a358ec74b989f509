//! # Trellis Support
//!
//! Shared utilities for the Trellis container crates.
//!
//! This crate provides:
//! - Text rendering for error messages

pub mod rendering;
