//! Lifecycle wrapper around MCP tool-server subprocesses.
//!
//! Servers are configured externally (command, arguments, environment) and
//! started lazily by `acquire`. Both `acquire` and `release` are idempotent
//! so the orchestrator can bracket every request with them without tracking
//! whether a previous request already started the pool. Subprocess stderr is
//! discarded to keep interactive output clean.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::process::Stdio;

use anyhow::{Context, Result, bail};
use rmcp::ServiceExt;
use rmcp::model::CallToolRequestParams;
use rmcp::service::{RoleClient, RunningService};
use rmcp::transport::child_process::TokioChildProcess;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::core::confirm::DeniedError;
use crate::core::engine::ConfirmAction;

/// Opaque launch record for one tool server, as read from configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct McpServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// A tool advertised by a running server.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub server: String,
    pub name: String,
    pub description: Option<String>,
}

impl ToolInfo {
    /// Display name used in narration and prompts.
    pub fn display_name(&self) -> String {
        format!("{}:{}", self.server, self.name)
    }
}

struct RunningServer {
    name: String,
    service: RunningService<RoleClient, ()>,
    tools: Vec<ToolInfo>,
}

/// Start/stop wrapper for the configured tool-server pool.
///
/// Inactive state is `None`; an empty pool that has been acquired is
/// `Some(vec![])`, which keeps double-acquire detection uniform.
pub struct McpLifecycle {
    configs: Vec<(String, McpServerConfig)>,
    active: Mutex<Option<Vec<RunningServer>>>,
}

impl McpLifecycle {
    pub fn new(configs: Vec<(String, McpServerConfig)>) -> Self {
        Self {
            configs,
            active: Mutex::new(None),
        }
    }

    pub async fn is_active(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// True if any tool server is configured at all.
    pub fn is_configured(&self) -> bool {
        !self.configs.is_empty()
    }

    /// Starts every configured server. No-op if already active.
    ///
    /// A server that fails to start or to list its tools is skipped with a
    /// warning; the remaining servers still come up.
    pub async fn acquire(&self) -> Result<()> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            return Ok(());
        }

        let mut servers = Vec::new();
        for (name, config) in &self.configs {
            match start_server(name, config).await {
                Ok(server) => {
                    tracing::info!(server = name.as_str(), tools = server.tools.len(), "started tool server");
                    servers.push(server);
                }
                Err(err) => {
                    tracing::warn!(server = name.as_str(), error = %err, "skipping tool server");
                }
            }
        }

        *active = Some(servers);
        Ok(())
    }

    /// Stops all servers and resets to inactive. No-op if never acquired.
    pub async fn release(&self) {
        let servers = self.active.lock().await.take();
        let Some(servers) = servers else {
            return;
        };
        for server in servers {
            let name = server.name;
            if let Err(err) = server.service.cancel().await {
                tracing::warn!(server = name.as_str(), error = %err, "error stopping tool server");
            } else {
                tracing::info!(server = name.as_str(), "stopped tool server");
            }
        }
    }

    /// Tools advertised by every running server.
    pub async fn tools(&self) -> Vec<ToolInfo> {
        let active = self.active.lock().await;
        active
            .as_deref()
            .unwrap_or_default()
            .iter()
            .flat_map(|s| s.tools.iter().cloned())
            .collect()
    }

    /// Forwards one tool call to the server advertising `tool_name`.
    ///
    /// Every forwarded call passes through `confirm` first, regardless of the
    /// session's global confirmation toggle. A denial is surfaced as
    /// [`DeniedError`] so the caller treats it as a cancellation.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        args: Map<String, Value>,
        confirm: &dyn ConfirmAction,
    ) -> Result<String> {
        let args_value = Value::Object(args.clone());
        if !confirm.confirm(tool_name, &args_value, true).await {
            return Err(DeniedError {
                tool_name: tool_name.to_string(),
            }
            .into());
        }

        let active = self.active.lock().await;
        let Some(servers) = active.as_deref() else {
            bail!("tool servers are not running");
        };
        let server = servers
            .iter()
            .find(|s| s.tools.iter().any(|t| t.name == tool_name))
            .with_context(|| format!("no tool server provides '{tool_name}'"))?;

        let result = server
            .service
            .call_tool(CallToolRequestParams::new(Cow::Owned(tool_name.to_string())).with_arguments(args))
            .await
            .with_context(|| format!("tool call '{tool_name}' failed"))?;

        serde_json::to_string(&result).context("failed to serialize tool result")
    }
}

async fn start_server(name: &str, config: &McpServerConfig) -> Result<RunningServer> {
    let mut command = Command::new(&config.command);
    command.args(&config.args).envs(&config.env);

    let (transport, _stderr) = TokioChildProcess::builder(command)
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("failed to spawn tool server '{name}'"))?;

    let service = ()
        .serve(transport)
        .await
        .with_context(|| format!("failed to initialize tool server '{name}'"))?;

    let tools = service
        .list_all_tools()
        .await
        .with_context(|| format!("failed to list tools for '{name}'"))?
        .into_iter()
        .map(|tool| ToolInfo {
            server: name.to_string(),
            name: tool.name.to_string(),
            description: tool.description.map(|d| d.to_string()),
        })
        .collect();

    Ok(RunningServer {
        name: name.to_string(),
        service,
        tools,
    })
}

/// True if the error chain signals that the tool-server transport went away.
///
/// The protocol reports a torn-down channel as a connection-closed error;
/// during an interrupt that is an expected consequence of killing the
/// subprocess, so callers normalize it into the cancellation path.
pub fn is_transport_closed(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        let text = cause.to_string().to_lowercase();
        text.contains("connection closed") || text.contains("transport closed")
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::anyhow;
    use futures_util::future::BoxFuture;

    use super::*;

    struct ScriptedConfirm {
        allow: bool,
        calls: AtomicUsize,
    }

    impl ScriptedConfirm {
        fn new(allow: bool) -> Self {
            Self {
                allow,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl ConfirmAction for ScriptedConfirm {
        fn confirm(&self, _tool: &str, _args: &Value, remote: bool) -> BoxFuture<'_, bool> {
            assert!(remote, "lifecycle calls are always remote");
            self.calls.fetch_add(1, Ordering::SeqCst);
            let allow = self.allow;
            Box::pin(async move { allow })
        }
    }

    #[tokio::test]
    async fn test_acquire_and_release_are_idempotent() {
        let lifecycle = McpLifecycle::new(Vec::new());
        assert!(!lifecycle.is_active().await);

        lifecycle.acquire().await.unwrap();
        assert!(lifecycle.is_active().await);
        // Second acquire without a release is a no-op.
        lifecycle.acquire().await.unwrap();
        assert!(lifecycle.is_active().await);

        lifecycle.release().await;
        assert!(!lifecycle.is_active().await);
        lifecycle.release().await;
        assert!(!lifecycle.is_active().await);
    }

    #[tokio::test]
    async fn test_release_before_acquire_is_noop() {
        let lifecycle = McpLifecycle::new(Vec::new());
        lifecycle.release().await;
        assert!(!lifecycle.is_active().await);
    }

    #[tokio::test]
    async fn test_repeated_cycles() {
        let lifecycle = McpLifecycle::new(Vec::new());
        for _ in 0..3 {
            lifecycle.acquire().await.unwrap();
            assert!(lifecycle.is_active().await);
            lifecycle.release().await;
            assert!(!lifecycle.is_active().await);
        }
    }

    #[tokio::test]
    async fn test_call_tool_denial_precedes_server_lookup() {
        // No server is acquired; the denial must win before the "not
        // running" check can even be reached.
        let lifecycle = McpLifecycle::new(Vec::new());
        let confirm = ScriptedConfirm::new(false);

        let err = lifecycle
            .call_tool("write_file", Map::new(), &confirm)
            .await
            .unwrap_err();

        let denied = err.downcast_ref::<DeniedError>().unwrap();
        assert_eq!(denied.tool_name, "write_file");
        assert_eq!(confirm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_call_tool_requires_active_pool() {
        let lifecycle = McpLifecycle::new(Vec::new());
        let confirm = ScriptedConfirm::new(true);

        let err = lifecycle
            .call_tool("read_file", Map::new(), &confirm)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("not running"));
        assert_eq!(confirm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_call_tool_unknown_tool_on_empty_pool() {
        let lifecycle = McpLifecycle::new(Vec::new());
        lifecycle.acquire().await.unwrap();

        let confirm = ScriptedConfirm::new(true);
        let err = lifecycle
            .call_tool("missing_tool", Map::new(), &confirm)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("missing_tool"));
        lifecycle.release().await;
    }

    #[test]
    fn test_is_configured() {
        assert!(!McpLifecycle::new(Vec::new()).is_configured());
        let config = McpServerConfig {
            command: "mcp-files".to_string(),
            args: Vec::new(),
            env: BTreeMap::new(),
        };
        assert!(McpLifecycle::new(vec![("files".to_string(), config)]).is_configured());
    }

    #[test]
    fn test_transport_closed_detection() {
        assert!(is_transport_closed(&anyhow!("Connection closed")));
        assert!(is_transport_closed(
            &anyhow!("io error").context("transport closed unexpectedly")
        ));
        assert!(!is_transport_closed(&anyhow!("tool call failed")));
    }

    #[test]
    fn test_tool_display_name() {
        let tool = ToolInfo {
            server: "files".to_string(),
            name: "read".to_string(),
            description: None,
        };
        assert_eq!(tool.display_name(), "files:read");
    }
}
