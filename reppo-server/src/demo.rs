//! Demonstration worker toolboxes
//!
//! The `reppo-worker` binary serves one of these profiles over stdio so the
//! orchestrator can be exercised end to end without external MCP servers.

use async_trait::async_trait;
use clap::ValueEnum;
use rand::Rng;
use reppo_mcp::protocol::{CallToolResult, ServerInfo, Tool};
use reppo_mcp::server::ToolHandler;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Which toolbox a demo worker serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DemoProfile {
    /// `add`
    Adder,
    /// `generate_random`
    Random,
    /// `sleep`, `echo`, `fail`, `crash`
    Sleeper,
}

impl DemoProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            DemoProfile::Adder => "adder",
            DemoProfile::Random => "random",
            DemoProfile::Sleeper => "sleeper",
        }
    }
}

impl std::fmt::Display for DemoProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tool handler for a demo profile
#[derive(Debug, Clone)]
pub struct DemoToolbox {
    profile: DemoProfile,
}

impl DemoToolbox {
    pub fn new(profile: DemoProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> DemoProfile {
        self.profile
    }

    /// Integer inputs give an integer sum; anything else is added as floats
    fn add(arguments: &Value) -> CallToolResult {
        let (a, b) = (&arguments["a"], &arguments["b"]);
        if let Some(sum) = a
            .as_i64()
            .zip(b.as_i64())
            .and_then(|(a, b)| a.checked_add(b))
        {
            return CallToolResult::success(json!({ "result": sum }));
        }
        match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => CallToolResult::success(json!({ "result": a + b })),
            _ => CallToolResult::error("Both 'a' and 'b' must be numbers"),
        }
    }

    fn generate_random(arguments: &Value) -> CallToolResult {
        let minimum = arguments.get("minimum").and_then(Value::as_i64).unwrap_or(0);
        let maximum = arguments
            .get("maximum")
            .and_then(Value::as_i64)
            .unwrap_or(100);
        if minimum > maximum {
            return CallToolResult::error(format!(
                "minimum ({}) must not exceed maximum ({})",
                minimum, maximum
            ));
        }
        let value = rand::thread_rng().gen_range(minimum..=maximum);
        CallToolResult::success(json!({ "result": value }))
    }

    async fn sleep(arguments: &Value) -> CallToolResult {
        let ms = arguments["ms"].as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        CallToolResult::success(json!({ "slept_ms": ms }))
    }
}

#[async_trait]
impl ToolHandler for DemoToolbox {
    fn server_info(&self) -> ServerInfo {
        ServerInfo {
            name: format!("reppo-worker-{}", self.profile),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    fn instructions(&self) -> Option<String> {
        let text = match self.profile {
            DemoProfile::Adder => "Adds two numbers",
            DemoProfile::Random => "Generates random integers in a range",
            DemoProfile::Sleeper => "Test worker with slow, failing and crashing tools",
        };
        Some(text.to_string())
    }

    async fn list_tools(&self) -> Vec<Tool> {
        match self.profile {
            DemoProfile::Adder => vec![Tool::new(
                "add",
                "Add two numbers",
                json!({
                    "type": "object",
                    "properties": {
                        "a": {"type": "number"},
                        "b": {"type": "number"}
                    },
                    "required": ["a", "b"]
                }),
            )],
            DemoProfile::Random => vec![Tool::new(
                "generate_random",
                "Generate a random integer between minimum and maximum inclusive",
                json!({
                    "type": "object",
                    "properties": {
                        "minimum": {"type": "integer", "default": 0},
                        "maximum": {"type": "integer", "default": 100}
                    }
                }),
            )],
            DemoProfile::Sleeper => vec![
                Tool::new(
                    "sleep",
                    "Sleep for the given number of milliseconds",
                    json!({
                        "type": "object",
                        "properties": {"ms": {"type": "integer"}},
                        "required": ["ms"]
                    }),
                ),
                Tool::new(
                    "echo",
                    "Return the given value",
                    json!({"type": "object", "properties": {"value": {}}}),
                ),
                Tool::new(
                    "fail",
                    "Report a tool error with the given message",
                    json!({"type": "object", "properties": {"message": {"type": "string"}}}),
                ),
                Tool::new(
                    "crash",
                    "Exit the worker process immediately",
                    json!({"type": "object"}),
                ),
            ],
        }
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> CallToolResult {
        debug!(profile = %self.profile, "Calling {}", name);
        match (self.profile, name) {
            (DemoProfile::Adder, "add") => Self::add(&arguments),
            (DemoProfile::Random, "generate_random") => Self::generate_random(&arguments),
            (DemoProfile::Sleeper, "sleep") => Self::sleep(&arguments).await,
            (DemoProfile::Sleeper, "echo") => CallToolResult::success(json!({
                "value": arguments.get("value").cloned().unwrap_or(Value::Null)
            })),
            (DemoProfile::Sleeper, "fail") => {
                let message = arguments["message"].as_str().unwrap_or("requested failure");
                CallToolResult::error(message)
            }
            (DemoProfile::Sleeper, "crash") => {
                warn!("Crash requested, exiting");
                std::process::exit(3);
            }
            (_, other) => CallToolResult::error(format!("Unknown tool: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_adder() {
        let toolbox = DemoToolbox::new(DemoProfile::Adder);
        let result = toolbox.call_tool("add", json!({"a": 2, "b": 3.5})).await;
        assert!(!result.is_error());
        assert_eq!(result.structured_content, Some(json!({"result": 5.5})));

        let result = toolbox.call_tool("add", json!({"a": 2, "b": 3})).await;
        assert_eq!(result.structured_content, Some(json!({"result": 5})));
        assert!(result.structured_content.unwrap()["result"].is_i64());

        let result = toolbox.call_tool("add", json!({"a": i64::MAX, "b": 1})).await;
        assert!(!result.is_error());
        assert!(result.structured_content.unwrap()["result"].is_f64());

        let result = toolbox.call_tool("add", json!({"a": "two"})).await;
        assert!(result.is_error());
    }

    #[tokio::test]
    async fn test_random_in_range() {
        let toolbox = DemoToolbox::new(DemoProfile::Random);
        for _ in 0..20 {
            let result = toolbox
                .call_tool("generate_random", json!({"minimum": 5, "maximum": 7}))
                .await;
            let value = result.structured_content.unwrap()["result"].as_i64().unwrap();
            assert!((5..=7).contains(&value));
        }

        let result = toolbox
            .call_tool("generate_random", json!({"minimum": 9, "maximum": 1}))
            .await;
        assert!(result.is_error());
    }

    #[tokio::test]
    async fn test_profiles_do_not_share_tools() {
        let toolbox = DemoToolbox::new(DemoProfile::Adder);
        assert!(toolbox.call_tool("sleep", json!({"ms": 1})).await.is_error());
        assert_eq!(toolbox.server_info().name, "reppo-worker-adder");

        let sleeper = DemoToolbox::new(DemoProfile::Sleeper);
        let names: Vec<_> = sleeper
            .list_tools()
            .await
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["sleep", "echo", "fail", "crash"]);
    }

    #[tokio::test]
    async fn test_fail_reports_message() {
        let toolbox = DemoToolbox::new(DemoProfile::Sleeper);
        let result = toolbox
            .call_tool("fail", json!({"message": "disk full"}))
            .await;
        assert!(result.is_error());
        assert_eq!(result.content[0].text.as_deref(), Some("disk full"));
    }
}
