//! Core module: UI-agnostic session runtime.
//!
//! This module contains:
//! - `history`: Ordered, invariant-preserving conversation log
//! - `engine`: Step-sequence contract for the model engine
//! - `confirm`: Per-tool confirmation gate with session-scoped memo
//! - `mcp`: Lifecycle wrapper for MCP tool-server subprocesses
//! - `agent`: Request orchestration over the engine's step sequence
//! - `usage`: Per-model token/cost accounting
//! - `interrupt`: Signal handling for cooperative cancellation
//! - `session`: Mutable per-session state
//! - `dump`: Human-readable conversation dumps

pub mod agent;
pub mod confirm;
pub mod dump;
pub mod engine;
pub mod history;
pub mod interrupt;
pub mod mcp;
pub mod session;
pub mod usage;
