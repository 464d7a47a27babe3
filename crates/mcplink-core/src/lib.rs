//! # mcplink-core
//!
//! Core types shared across the mcplink workspace.
//!
//! This crate provides:
//! - Conversation message primitives (used for sampling requests)
//! - Layered configuration loading
//! - Common error types

pub mod config;
pub mod error;
pub mod message;

pub use config::Config;
pub use error::{Error, ProviderError, Result};
pub use message::{Message, Role};
