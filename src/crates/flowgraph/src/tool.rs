//! Tool invocation layer.
//!
//! A [`Tool`] is a named async function with a declared parameter list.
//! Models address tools in one of two encodings, both normalized here:
//!
//! 1. **Positional string**: the raw string becomes `{"input": "..."}`.
//! 2. **Tag block**: `<path>data.csv</path><rows>10</rows>`; each value is
//!    coerced by trying, in order: JSON array/object, integer, float,
//!    boolean, else string.
//!
//! Unknown parameters are dropped with a warning; missing required
//! parameters fail with [`ToolError::BadArgs`]. Dispatch applies a per-call
//! timeout and the run's cancellation token, and converts **every** failure
//! into a textual tool result; a broken tool never aborts an agent loop.

use regex::Regex;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

static OPEN_TAG_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([A-Za-z_][A-Za-z0-9_]*)>").unwrap());

#[derive(Debug, Error, Clone)]
pub enum ToolError {
    #[error("tool '{0}' not found")]
    NotFound(String),

    #[error("bad arguments for '{tool}': {error}")]
    BadArgs { tool: String, error: String },

    #[error("tool '{tool}' timed out after {timeout_secs}s")]
    Timeout { tool: String, timeout_secs: u64 },

    #[error("tool '{tool}' was cancelled")]
    Cancelled { tool: String },

    #[error("tool '{tool}' failed: {error}")]
    ExecutionFailed { tool: String, error: String },
}

pub type ToolFuture = Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send>>;
pub type ToolExecutor = Arc<dyn Fn(Value) -> ToolFuture + Send + Sync>;

/// One declared parameter of a tool.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub required: bool,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
        }
    }
}

pub struct Tool {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
    pub executor: ToolExecutor,
}

impl Tool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        params: Vec<ParamSpec>,
        executor: ToolExecutor,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params,
            executor,
        }
    }

    /// Normalize raw model-provided arguments against this tool's parameter
    /// list.
    pub fn normalize_args(&self, raw: &Value) -> Result<Value, ToolError> {
        let mut args = match raw {
            Value::String(s) => {
                if looks_like_tag_block(s) {
                    parse_tag_block(s)
                } else {
                    let mut map = Map::new();
                    map.insert("input".to_string(), json!(s));
                    map
                }
            }
            Value::Object(map) => map.clone(),
            other => {
                let mut map = Map::new();
                map.insert("input".to_string(), other.clone());
                map
            }
        };

        let declared: Vec<&str> = self.params.iter().map(|p| p.name.as_str()).collect();
        let unknown: Vec<String> = args
            .keys()
            .filter(|k| !declared.contains(&k.as_str()))
            .cloned()
            .collect();
        for key in unknown {
            tracing::warn!(tool = %self.name, param = %key, "ignoring unknown tool parameter");
            args.remove(&key);
        }

        for param in self.params.iter().filter(|p| p.required) {
            if !args.contains_key(&param.name) {
                return Err(ToolError::BadArgs {
                    tool: self.name.clone(),
                    error: format!("missing required parameter '{}'", param.name),
                });
            }
        }
        Ok(Value::Object(args))
    }
}

fn looks_like_tag_block(s: &str) -> bool {
    OPEN_TAG_REGEX
        .captures(s)
        .map(|c| s.contains(&format!("</{}>", &c[1])))
        .unwrap_or(false)
}

/// Parse `<k>v</k>` pairs into a JSON object, coercing each value.
fn parse_tag_block(s: &str) -> Map<String, Value> {
    let mut out = Map::new();
    let mut pos = 0;
    while let Some(caps) = OPEN_TAG_REGEX.captures_at(s, pos) {
        let open = caps.get(0).unwrap();
        let key = caps.get(1).unwrap().as_str();
        let close_tag = format!("</{key}>");
        match s[open.end()..].find(&close_tag) {
            Some(rel) => {
                let value = &s[open.end()..open.end() + rel];
                out.insert(key.to_string(), coerce_value(value.trim()));
                pos = open.end() + rel + close_tag.len();
            }
            None => {
                pos = open.end();
            }
        }
    }
    out
}

/// Coercion ladder: JSON array/object, integer, float, boolean, string.
fn coerce_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
            return v;
        }
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return json!(i);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        return json!(f);
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "true" => return json!(true),
        "false" => return json!(false),
        _ => {}
    }
    json!(trimmed)
}

/// Named tool collection with uniform dispatch.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<Tool>>,
    /// Per-call deadline. Default 120 s.
    call_timeout: Duration,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            call_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn register(&mut self, tool: Tool) {
        self.tools.insert(tool.name.clone(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Render `name: description` lines for prompt construction.
    pub fn catalogue(&self) -> String {
        let mut lines: Vec<String> = self
            .tools
            .values()
            .map(|t| format!("{}: {}", t.name, t.description))
            .collect();
        lines.sort();
        lines.join("\n")
    }

    /// Invoke a tool, converting every failure into result text.
    pub async fn dispatch(&self, name: &str, raw_args: &Value, cancel: &CancellationToken) -> String {
        let tool = match self.get(name) {
            Some(tool) => tool,
            None => {
                return format!(
                    "Error: tool '{}' not found. Available tools: {}",
                    name,
                    self.names().join(", ")
                )
            }
        };

        let args = match tool.normalize_args(raw_args) {
            Ok(args) => args,
            Err(e) => return format!("Error: {e}"),
        };

        let fut = (tool.executor)(args);
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(ToolError::Cancelled { tool: name.to_string() }),
            res = tokio::time::timeout(self.call_timeout, fut) => match res {
                Ok(inner) => inner,
                Err(_) => Err(ToolError::Timeout {
                    tool: name.to_string(),
                    timeout_secs: self.call_timeout.as_secs(),
                }),
            },
        };

        match result {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(tool = %name, error = %e, "tool call failed");
                format!("Error: {e}")
            }
        }
    }
}

/// Box an async closure into a [`ToolExecutor`].
pub fn tool_fn<F, Fut>(f: F) -> ToolExecutor
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, ToolError>> + Send + 'static,
{
    Arc::new(move |args| Box::pin(f(args)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_tool() -> Tool {
        Tool::new(
            "echo",
            "echo the input back",
            vec![ParamSpec::required("input")],
            tool_fn(|args| async move { Ok(args["input"].to_string()) }),
        )
    }

    #[test]
    fn positional_string_becomes_input() {
        let tool = echo_tool();
        let args = tool.normalize_args(&json!("hello")).unwrap();
        assert_eq!(args["input"], json!("hello"));
    }

    #[test]
    fn tag_block_parses_and_coerces() {
        let tool = Tool::new(
            "read",
            "read rows",
            vec![
                ParamSpec::required("path"),
                ParamSpec::optional("rows"),
                ParamSpec::optional("strict"),
                ParamSpec::optional("columns"),
            ],
            tool_fn(|_| async { Ok(String::new()) }),
        );
        let raw = json!("<path>data.csv</path><rows>10</rows><strict>True</strict><columns>[\"a\",\"b\"]</columns>");
        let args = tool.normalize_args(&raw).unwrap();
        assert_eq!(args["path"], json!("data.csv"));
        assert_eq!(args["rows"], json!(10));
        assert_eq!(args["strict"], json!(true));
        assert_eq!(args["columns"], json!(["a", "b"]));
    }

    #[test]
    fn unknown_params_dropped_missing_required_fails() {
        let tool = echo_tool();
        let args = tool
            .normalize_args(&json!({"input": "x", "bogus": 1}))
            .unwrap();
        assert!(args.get("bogus").is_none());

        let err = tool.normalize_args(&json!({"bogus": 1})).unwrap_err();
        assert!(matches!(err, ToolError::BadArgs { .. }));
    }

    #[test]
    fn float_coercion() {
        assert_eq!(coerce_value("2.5"), json!(2.5));
        assert_eq!(coerce_value("plain text"), json!("plain text"));
    }

    #[tokio::test]
    async fn dispatch_returns_text_on_success() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool());
        let out = registry
            .dispatch("echo", &json!("hi"), &CancellationToken::new())
            .await;
        assert_eq!(out, "\"hi\"");
    }

    #[tokio::test]
    async fn dispatch_converts_missing_tool_to_text() {
        let registry = ToolRegistry::new();
        let out = registry
            .dispatch("nope", &json!("hi"), &CancellationToken::new())
            .await;
        assert!(out.starts_with("Error: tool 'nope' not found"));
    }

    #[tokio::test]
    async fn dispatch_times_out_to_text() {
        let mut registry = ToolRegistry::new().with_call_timeout(Duration::from_millis(20));
        registry.register(Tool::new(
            "sleepy",
            "sleeps",
            vec![],
            tool_fn(|_| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Ok("done".to_string())
            }),
        ));
        let out = registry
            .dispatch("sleepy", &json!(""), &CancellationToken::new())
            .await;
        assert!(out.contains("timed out"));
    }
}
