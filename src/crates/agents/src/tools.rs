//! Tool surfaces handed to the pipeline agents.
//!
//! Sandbox tools close over the session's persistent sandbox and the run's
//! cancellation token; search tools close over whatever search backend the
//! deployment injected. Everything returns plain text; shaping and error
//! flattening already happened in the sandbox layer.

use flowgraph::tool::{tool_fn, ParamSpec, Tool, ToolRegistry};
use futures::future::BoxFuture;
use sandbox::PersistentSandbox;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Injected search backend: query in, rendered results out.
pub type SearchFn = Arc<dyn Fn(String) -> BoxFuture<'static, String> + Send + Sync>;

fn op_text((ok, payload): (bool, String)) -> String {
    if ok {
        payload
    } else {
        format!("Error: {payload}")
    }
}

/// Code execution, package install, and file tools over the sandbox.
pub fn sandbox_tools(
    sandbox: Arc<PersistentSandbox>,
    cancel: CancellationToken,
) -> Vec<Tool> {
    let mut tools = Vec::new();

    {
        let sandbox = Arc::clone(&sandbox);
        let cancel = cancel.clone();
        tools.push(Tool::new(
            "execute_code",
            "run python code in the persistent sandbox; state carries over between calls",
            vec![ParamSpec::required("code"), ParamSpec::optional("timeout")],
            tool_fn(move |args| {
                let sandbox = Arc::clone(&sandbox);
                let cancel = cancel.clone();
                async move {
                    let code = args["code"].as_str().unwrap_or_default().to_string();
                    let timeout = args["timeout"].as_u64().map(Duration::from_secs);
                    Ok(op_text(sandbox.execute_code(&code, timeout, &cancel).await))
                }
            }),
        ));
    }

    {
        let sandbox = Arc::clone(&sandbox);
        let cancel = cancel.clone();
        tools.push(Tool::new(
            "pip_install",
            "install python packages into the sandbox",
            vec![ParamSpec::required("packages")],
            tool_fn(move |args| {
                let sandbox = Arc::clone(&sandbox);
                let cancel = cancel.clone();
                async move {
                    let packages: Vec<String> = match &args["packages"] {
                        serde_json::Value::Array(items) => items
                            .iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect(),
                        serde_json::Value::String(s) => {
                            s.split_whitespace().map(str::to_string).collect()
                        }
                        _ => Vec::new(),
                    };
                    Ok(op_text(sandbox.pip_install(&packages, &cancel).await))
                }
            }),
        ));
    }

    {
        let sandbox = Arc::clone(&sandbox);
        let cancel = cancel.clone();
        tools.push(Tool::new(
            "list_files",
            "list files in a sandbox directory",
            vec![ParamSpec::optional("path")],
            tool_fn(move |args| {
                let sandbox = Arc::clone(&sandbox);
                let cancel = cancel.clone();
                async move {
                    let path = args["path"].as_str().unwrap_or(".").to_string();
                    Ok(op_text(sandbox.list_files(&path, &cancel).await))
                }
            }),
        ));
    }

    {
        let sandbox = Arc::clone(&sandbox);
        let cancel = cancel.clone();
        tools.push(Tool::new(
            "read_file",
            "read a text file from the sandbox",
            vec![ParamSpec::required("path")],
            tool_fn(move |args| {
                let sandbox = Arc::clone(&sandbox);
                let cancel = cancel.clone();
                async move {
                    let path = args["path"].as_str().unwrap_or_default().to_string();
                    Ok(op_text(sandbox.read_file(&path, &cancel).await))
                }
            }),
        ));
    }

    {
        let sandbox = Arc::clone(&sandbox);
        let cancel = cancel.clone();
        tools.push(Tool::new(
            "write_file",
            "write a text file into the sandbox",
            vec![ParamSpec::required("path"), ParamSpec::required("content")],
            tool_fn(move |args| {
                let sandbox = Arc::clone(&sandbox);
                let cancel = cancel.clone();
                async move {
                    let path = args["path"].as_str().unwrap_or_default().to_string();
                    let content = args["content"].as_str().unwrap_or_default().to_string();
                    Ok(op_text(sandbox.write_file(&path, &content, &cancel).await))
                }
            }),
        ));
    }

    {
        let sandbox = Arc::clone(&sandbox);
        let cancel = cancel.clone();
        tools.push(Tool::new(
            "describe_data",
            "profile a CSV file: shape, columns, dtypes, null counts",
            vec![ParamSpec::required("path")],
            tool_fn(move |args| {
                let sandbox = Arc::clone(&sandbox);
                let cancel = cancel.clone();
                async move {
                    let path = args["path"].as_str().unwrap_or_default().to_string();
                    Ok(op_text(sandbox.describe_data(&path, &cancel).await))
                }
            }),
        ));
    }

    {
        let cancel = cancel.clone();
        tools.push(Tool::new(
            "shell",
            "run a shell command in the sandbox (git, ls, ...)",
            vec![ParamSpec::required("cmd")],
            tool_fn(move |args| {
                let sandbox = Arc::clone(&sandbox);
                let cancel = cancel.clone();
                async move {
                    let cmd = args["cmd"].as_str().unwrap_or_default().to_string();
                    Ok(op_text(sandbox.exec(&cmd, &cancel).await))
                }
            }),
        ));
    }

    tools
}

/// Web, wikipedia, and arxiv search over one injected backend. Without a
/// backend the tools answer with a diagnostic instead of failing the loop.
pub fn search_tools(search: Option<SearchFn>) -> Vec<Tool> {
    let sources = [
        ("web_search", "search the web"),
        ("wikipedia_search", "search wikipedia"),
        ("arxiv_search", "search arxiv preprints"),
    ];
    sources
        .iter()
        .map(|(name, description)| {
            let search = search.clone();
            let source = name.trim_end_matches("_search").to_string();
            Tool::new(
                *name,
                *description,
                vec![ParamSpec::required("query")],
                tool_fn(move |args| {
                    let search = search.clone();
                    let source = source.clone();
                    async move {
                        let query = args["query"].as_str().unwrap_or_default().to_string();
                        match search {
                            Some(backend) => Ok(backend(format!("{source}: {query}")).await),
                            None => Ok("search backend not configured".to_string()),
                        }
                    }
                }),
            )
        })
        .collect()
}

/// Bundle tools into a registry.
pub fn registry_of(tools: Vec<Tool>) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool);
    }
    Arc::new(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandbox::testing::MockSandboxClient;
    use sandbox::SandboxLimits;
    use serde_json::json;
    use store::MemoryStore;

    fn test_sandbox() -> Arc<PersistentSandbox> {
        Arc::new(PersistentSandbox::new(
            "u",
            "img",
            vec![],
            Arc::new(MockSandboxClient::new()),
            Arc::new(MemoryStore::new()),
            SandboxLimits::default(),
        ))
    }

    #[tokio::test]
    async fn execute_code_tool_dispatches() {
        let registry = registry_of(sandbox_tools(test_sandbox(), CancellationToken::new()));
        let out = registry
            .dispatch(
                "execute_code",
                &json!({"code": "print(1)"}),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(out, "ok");
    }

    #[tokio::test]
    async fn pip_install_accepts_string_or_array() {
        let registry = registry_of(sandbox_tools(test_sandbox(), CancellationToken::new()));
        let out = registry
            .dispatch(
                "pip_install",
                &json!({"packages": ["pandas", "numpy"]}),
                &CancellationToken::new(),
            )
            .await;
        assert!(out.contains("install complete") || !out.starts_with("Error"));
    }

    #[tokio::test]
    async fn search_without_backend_degrades() {
        let registry = registry_of(search_tools(None));
        let out = registry
            .dispatch("web_search", &json!({"query": "rust"}), &CancellationToken::new())
            .await;
        assert_eq!(out, "search backend not configured");
    }

    #[tokio::test]
    async fn search_backend_receives_source_prefix() {
        let backend: SearchFn = Arc::new(|q| Box::pin(async move { format!("results for {q}") }));
        let registry = registry_of(search_tools(Some(backend)));
        let out = registry
            .dispatch(
                "arxiv_search",
                &json!({"query": "transformers"}),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(out, "results for arxiv: transformers");
    }
}
