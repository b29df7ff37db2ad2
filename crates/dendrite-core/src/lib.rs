//! Core dendrite library (session runtime, history, MCP lifecycle, usage).

pub mod config;
pub mod core;
pub mod models;
