//! # duet-common
//!
//! Shared configuration, error handling, and identifiers used across all Duet crates.
//! No matchmaking logic lives here.

pub mod config;
pub mod error;
pub mod id;
