//! Shared types for the SerialCode workspace: errors, streaming fragments,
//! conversation items, model capabilities and configuration.

pub mod capability;
pub mod config;
pub mod error;
pub mod stream;
pub mod tool;
