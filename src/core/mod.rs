//! Core types & traits: protocol messages, tool provider contract, errors.

pub mod content;
pub mod error;
pub mod mcp;
pub mod tool;
