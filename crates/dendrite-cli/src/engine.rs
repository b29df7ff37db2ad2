//! Engine backend selection.

use std::sync::Arc;

use anyhow::Result;
use dendrite_core::config::Config;
use dendrite_core::core::engine::{EchoEngine, Engine};

/// Builds the engine named in the configuration.
pub fn build(config: &Config) -> Result<Arc<dyn Engine>> {
    match config.engine.as_str() {
        "echo" => Ok(Arc::new(EchoEngine)),
        other => anyhow::bail!("Unknown engine \"{other}\" (supported: echo)"),
    }
}
