//! Shared domain types used across all Teller crates.
//!
//! This crate has no async or network dependencies; it defines the data
//! model (messages, conversations, pending actions), the per-request
//! execution context, token accounting, configuration, and the shared
//! error type.

pub mod config;
pub mod context;
pub mod conversation;
pub mod error;
pub mod message;
pub mod pending;
pub mod usage;

pub use error::{Error, Result};
