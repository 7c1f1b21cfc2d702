//! The data-science pipeline: eight cooperating roles around a typed state,
//! with a human approval gate on the hypothesis and a quality-review retry
//! loop after every specialist.
//!
//! ```text
//!  START -> hypothesis -> human_choice -> process -+-> coder --------+
//!              ^              |            ^ |     +-> visualization +--> quality_review
//!              +---- REVISE --+            | |     +-> search -------+        |
//!                                          | |     +-> report -------+   pass | fail
//!                                          | +<------- note_taker <-----------+--> back to sender
//!                                          +--- FINISH --> refiner -> cleanup -> END
//! ```

pub mod nodes;
pub mod prompts;
pub mod state;

use flowgraph::{ChatModel, Graph, Message, SubgraphSpec};
use sandbox::PersistentSandbox;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::tools::SearchFn;

pub use nodes::{classify_feedback, Feedback};
pub use state::{agent_type, SUBGRAPH_NAME};

use state::*;

/// Live stream hook: captured messages go here as nodes produce them.
pub type Emitter = Option<mpsc::Sender<Message>>;

/// Per-role model table with a shared default.
#[derive(Clone)]
pub struct RoleModels {
    default: Arc<dyn ChatModel>,
    overrides: HashMap<String, Arc<dyn ChatModel>>,
}

impl RoleModels {
    pub fn uniform(model: Arc<dyn ChatModel>) -> Self {
        Self {
            default: model,
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, role: impl Into<String>, model: Arc<dyn ChatModel>) -> Self {
        self.overrides.insert(role.into(), model);
        self
    }

    pub fn for_role(&self, role: &str) -> Arc<dyn ChatModel> {
        self.overrides
            .get(role)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default))
    }
}

#[derive(Debug, Clone)]
pub struct PipelineLimits {
    pub max_agent_iters: usize,
    pub max_fix: usize,
    /// Quality-review retries per specialist before forcing the note taker.
    pub max_qa_retries: i64,
    /// Consecutive unroutable process decisions before forcing the refiner.
    pub max_process_self_loops: i64,
}

impl Default for PipelineLimits {
    fn default() -> Self {
        Self {
            max_agent_iters: 15,
            max_fix: 3,
            max_qa_retries: 2,
            max_process_self_loops: 3,
        }
    }
}

#[derive(Clone)]
pub struct DataScienceDeps {
    pub models: RoleModels,
    pub sandbox: Option<Arc<PersistentSandbox>>,
    pub search: Option<SearchFn>,
    pub emitter: Emitter,
    pub limits: PipelineLimits,
}

impl DataScienceDeps {
    pub fn new(models: RoleModels) -> Self {
        Self {
            models,
            sandbox: None,
            search: None,
            emitter: None,
            limits: PipelineLimits::default(),
        }
    }

    pub fn with_sandbox(mut self, sandbox: Arc<PersistentSandbox>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn with_search(mut self, search: SearchFn) -> Self {
        self.search = Some(search);
        self
    }

    pub fn with_emitter(mut self, emitter: mpsc::Sender<Message>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn with_limits(mut self, limits: PipelineLimits) -> Self {
        self.limits = limits;
        self
    }
}

fn decision_of(state: &Value) -> &str {
    state[F_DECISION].as_str().unwrap_or_default()
}

/// Where the process supervisor's decision leads. Unroutable decisions loop
/// back to the supervisor until the self-loop guard forces the refiner;
/// three identical decisions in a row force it as well.
fn process_router(state: &Value, limits: &PipelineLimits) -> String {
    if state[F_REPEATS].as_i64().unwrap_or(0) >= 2 {
        return REFINER.to_string();
    }
    match decision_of(state) {
        "FINISH" => REFINER.to_string(),
        "Coder" => CODER.to_string(),
        "Visualization" => VISUALIZATION.to_string(),
        "Search" => SEARCH.to_string(),
        "Report" => REPORT.to_string(),
        _ => {
            if state[F_SELF_LOOPS].as_i64().unwrap_or(0) >= limits.max_process_self_loops {
                REFINER.to_string()
            } else {
                PROCESS.to_string()
            }
        }
    }
}

/// Transitions out of the quality gate are driven solely by its structured
/// decision, the retry counter, and the outage short-circuit.
fn review_router(state: &Value, limits: &PipelineLimits) -> String {
    if state[F_OUTAGES].as_i64().unwrap_or(0) >= 2 {
        return REFINER.to_string();
    }
    if state[F_REVIEW]["passed"].as_bool().unwrap_or(true) {
        return NOTE.to_string();
    }
    let retries = state[F_QA_RETRIES].as_i64().unwrap_or(0);
    let sender = state[F_SENDER].as_str().unwrap_or_default();
    let is_specialist = [CODER, VISUALIZATION, SEARCH, REPORT].contains(&sender);
    if retries <= limits.max_qa_retries && is_specialist {
        sender.to_string()
    } else {
        NOTE.to_string()
    }
}

pub fn build_graph(deps: DataScienceDeps) -> flowgraph::Result<Graph> {
    let limits = deps.limits.clone();
    let mut graph = Graph::new(schema());

    graph.add_node(HYPOTHESIS, nodes::hypothesis_node(deps.clone()));
    graph.add_node(HUMAN_CHOICE, nodes::human_choice_node(deps.clone()));
    graph.add_node(PROCESS, nodes::process_node(deps.clone()));
    graph.add_node(CODER, nodes::coder_node(deps.clone()));
    graph.add_node(VISUALIZATION, nodes::visualization_node(deps.clone()));
    graph.add_node(SEARCH, nodes::search_node(deps.clone()));
    graph.add_node(REPORT, nodes::report_node(deps.clone()));
    graph.add_node(QUALITY_REVIEW, nodes::quality_review_node(deps.clone()));
    graph.add_node(NOTE, nodes::note_node(deps.clone()));
    graph.add_node(REFINER, nodes::refiner_node(deps.clone()));
    graph.add_node(CLEANUP, nodes::cleanup_node(deps));

    graph.add_edge(flowgraph::START, HYPOTHESIS);
    graph.add_edge(HYPOTHESIS, HUMAN_CHOICE);

    graph.add_conditional_edge(
        HUMAN_CHOICE,
        Arc::new(|state: &Value| {
            let wants_revision = state[F_MODIFICATIONS]
                .as_str()
                .map(|s| !s.is_empty())
                .unwrap_or(false);
            if wants_revision {
                HYPOTHESIS.to_string()
            } else {
                PROCESS.to_string()
            }
        }),
        HashMap::from([
            ("revise".to_string(), HYPOTHESIS.to_string()),
            ("approve".to_string(), PROCESS.to_string()),
        ]),
    );

    {
        let limits = limits.clone();
        graph.add_conditional_edge(
            PROCESS,
            Arc::new(move |state: &Value| process_router(state, &limits)),
            HashMap::from([
                ("coder".to_string(), CODER.to_string()),
                ("visualization".to_string(), VISUALIZATION.to_string()),
                ("search".to_string(), SEARCH.to_string()),
                ("report".to_string(), REPORT.to_string()),
                ("finish".to_string(), REFINER.to_string()),
                ("loop".to_string(), PROCESS.to_string()),
            ]),
        );
    }

    for specialist in [CODER, VISUALIZATION, SEARCH, REPORT] {
        graph.add_edge(specialist, QUALITY_REVIEW);
    }

    graph.add_conditional_edge(
        QUALITY_REVIEW,
        Arc::new(move |state: &Value| review_router(state, &limits)),
        HashMap::from([
            ("pass".to_string(), NOTE.to_string()),
            ("retry_coder".to_string(), CODER.to_string()),
            ("retry_visualization".to_string(), VISUALIZATION.to_string()),
            ("retry_search".to_string(), SEARCH.to_string()),
            ("retry_report".to_string(), REPORT.to_string()),
            ("short_circuit".to_string(), REFINER.to_string()),
        ]),
    );

    graph.add_edge(NOTE, PROCESS);
    graph.add_edge(REFINER, CLEANUP);
    graph.add_edge(CLEANUP, flowgraph::END);

    Ok(graph)
}

/// The registry entry the planner routes to.
pub fn build_subgraph(deps: DataScienceDeps) -> flowgraph::Result<SubgraphSpec> {
    let graph = build_graph(deps)?;
    Ok(SubgraphSpec {
        name: SUBGRAPH_NAME.to_string(),
        description:
            "multi-agent analysis of the referenced CSV files: hypothesis, sandboxed code \
             execution, visualization, research, and a written report"
                .to_string(),
        graph: Arc::new(graph.compile()?),
        input_mapper: Arc::new(state::input_mapper),
        output_mapper: Arc::new(state::output_mapper),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockChatModel;
    use flowgraph::{RunOptions, RunOutcome, SubgraphOutcome, SubgraphRequest, ToolCall};
    use sandbox::testing::MockSandboxClient;
    use sandbox::{SandboxError, SandboxLimits};
    use serde_json::json;
    use store::MemoryStore;

    fn deps_with(model: Arc<MockChatModel>) -> DataScienceDeps {
        DataScienceDeps::new(RoleModels::uniform(model)).with_limits(PipelineLimits {
            max_fix: 0,
            ..PipelineLimits::default()
        })
    }

    fn agent_types(state: &Value) -> Vec<String> {
        flowgraph::messages::messages_from_state(state, F_INTERNAL)
            .iter()
            .skip(1) // the user's request
            .filter_map(|m| m.agent_type().map(str::to_string))
            .collect()
    }

    async fn run_to_interrupt(
        spec: &SubgraphSpec,
        opts: &RunOptions,
    ) -> flowgraph::InterruptSnapshot {
        let request = SubgraphRequest::new("Analyze sales.csv trends")
            .with_context(json!({"directory_content": ["sales.csv"]}));
        match spec.invoke(&request, opts).await.unwrap() {
            SubgraphOutcome::Interrupted(snapshot) => snapshot,
            SubgraphOutcome::Message(m) => panic!("expected hypothesis interrupt, got {m:?}"),
        }
    }

    // CSV happy path: hypothesis, approval, one coder round, finish.
    #[tokio::test]
    async fn happy_path_visits_roles_in_order() {
        let model = Arc::new(MockChatModel::replying([
            "Sales rise in summer months.",
            r#"{"decision": "Coder", "task": "compute the monthly trend"}"#,
            "Computed the monthly trend; it rises.",
            r#"{"passed": true, "reason": "trend computed correctly"}"#,
            "Noted: trend computed.",
            r#"{"decision": "FINISH", "task": ""}"#,
            "Final analysis: sales trend rises in summer.",
        ]));
        let spec = build_subgraph(deps_with(model)).unwrap();
        let opts = RunOptions::new("run-ds-1");

        let snapshot = run_to_interrupt(&spec, &opts).await;
        assert_eq!(snapshot.paused_at, HUMAN_CHOICE);
        assert_eq!(snapshot.payload["hypothesis"], json!("Sales rise in summer months."));

        let outcome = spec.resume(snapshot, json!("looks good"), &opts).await.unwrap();
        let message = match outcome {
            SubgraphOutcome::Message(m) => m,
            SubgraphOutcome::Interrupted(_) => panic!("unexpected second interrupt"),
        };
        assert_eq!(message.agent_type(), Some("data_science_end"));
        assert_eq!(message.content, "Final analysis: sales trend rises in summer.");
    }

    #[tokio::test]
    async fn revision_loops_back_to_hypothesis() {
        let model = Arc::new(MockChatModel::replying([
            "Sales rise in summer.",
            "Sales rise in summer, adjusted for seasonality.",
            r#"{"decision": "FINISH", "task": ""}"#,
            "Final: seasonal trend confirmed.",
        ]));
        let spec = build_subgraph(deps_with(model)).unwrap();
        let opts = RunOptions::new("run-ds-2");

        let first = run_to_interrupt(&spec, &opts).await;
        // a question revises; the pipeline returns to the hypothesis agent
        let second = match spec
            .resume(first, json!("could you adjust for seasonality?"), &opts)
            .await
            .unwrap()
        {
            SubgraphOutcome::Interrupted(snapshot) => snapshot,
            SubgraphOutcome::Message(m) => panic!("expected second interrupt, got {m:?}"),
        };
        assert_eq!(
            second.state[F_HYPOTHESIS],
            json!("Sales rise in summer, adjusted for seasonality.")
        );

        let outcome = spec.resume(second, json!(""), &opts).await.unwrap();
        assert!(matches!(outcome, SubgraphOutcome::Message(_)));
    }

    // Failed review routes back to the same specialist once, then passes.
    #[tokio::test]
    async fn quality_review_retries_the_specialist() {
        let model = Arc::new(MockChatModel::replying([
            "Hypothesis.",
            r#"{"decision": "Coder", "task": "load the data"}"#,
            "I loaded it wrong.",
            r#"{"passed": false, "reason": "runtime error"}"#,
            "I loaded it correctly this time.",
            r#"{"passed": true, "reason": "fixed"}"#,
            "Noted.",
            r#"{"decision": "FINISH", "task": ""}"#,
            "Final answer.",
        ]));
        let spec = build_subgraph(deps_with(model)).unwrap();
        let opts = RunOptions::new("run-ds-3");

        let snapshot = run_to_interrupt(&spec, &opts).await;
        let outcome = spec.resume(snapshot, json!(""), &opts).await.unwrap();
        let message = match outcome {
            SubgraphOutcome::Message(m) => m,
            _ => panic!("expected completion"),
        };
        assert_eq!(message.content, "Final answer.");
    }

    #[tokio::test]
    async fn unroutable_decisions_force_the_refiner() {
        let model = Arc::new(MockChatModel::replying([
            "Hypothesis.",
            "not json at all",
            "still not json",
            "nope",
            "Partial summary despite no plan.",
        ]));
        let spec = build_subgraph(deps_with(model)).unwrap();
        let opts = RunOptions::new("run-ds-4");

        let snapshot = run_to_interrupt(&spec, &opts).await;
        let outcome = spec.resume(snapshot, json!(""), &opts).await.unwrap();
        let message = match outcome {
            SubgraphOutcome::Message(m) => m,
            _ => panic!("expected completion"),
        };
        assert_eq!(message.content, "Partial summary despite no plan.");
    }

    // Two sandbox outages short-circuit to the refiner with a warning.
    #[tokio::test]
    async fn sandbox_outage_short_circuits() {
        let client = Arc::new(MockSandboxClient::new());
        client.script_exec_code(Err(SandboxError::SandboxGone));
        client.script_exec_code(Err(SandboxError::SandboxGone));
        let sb = Arc::new(sandbox::PersistentSandbox::new(
            "u",
            "img",
            vec![],
            client,
            Arc::new(MemoryStore::new()),
            SandboxLimits::default(),
        ));

        let model = Arc::new(MockChatModel::new());
        model.push_reply(Message::ai("Hypothesis."));
        model.push_reply(Message::ai(r#"{"decision": "Coder", "task": "run analysis"}"#));
        // first coder visit: tool call fails, agent reports it
        model.push_reply(
            Message::ai("").with_tool_calls(vec![ToolCall::new("execute_code", json!({"code": "run()"}))]),
        );
        model.push_reply(Message::ai("The sandbox did not respond."));
        model.push_reply(Message::ai(r#"{"passed": false, "reason": "nothing ran"}"#));
        // retry: fails again
        model.push_reply(
            Message::ai("").with_tool_calls(vec![ToolCall::new("execute_code", json!({"code": "run()"}))]),
        );
        model.push_reply(Message::ai("Still no sandbox."));
        model.push_reply(Message::ai(r#"{"passed": false, "reason": "still nothing"}"#));
        // short-circuit: refiner
        model.push_reply(Message::ai("Apologies, the sandbox was unavailable; here is what we have."));

        let deps = deps_with(model).with_sandbox(sb);
        let spec = build_subgraph(deps).unwrap();
        let opts = RunOptions::new("run-ds-5");

        let snapshot = run_to_interrupt(&spec, &opts).await;
        let outcome = spec.resume(snapshot, json!(""), &opts).await.unwrap();
        let message = match outcome {
            SubgraphOutcome::Message(m) => m,
            _ => panic!("expected completion"),
        };
        assert!(message.content.contains("Apologies"));
    }

    #[tokio::test]
    async fn happy_path_records_role_sequence() {
        let model = Arc::new(MockChatModel::replying([
            "Hypothesis.",
            r#"{"decision": "Coder", "task": "t"}"#,
            "coded",
            r#"{"passed": true, "reason": "ok"}"#,
            "noted",
            r#"{"decision": "FINISH", "task": ""}"#,
            "final",
        ]));
        let graph = build_graph(deps_with(model)).unwrap().compile().unwrap();
        let opts = RunOptions::new("run-ds-6");
        let request = SubgraphRequest::new("analyze").with_context(json!({}));
        let initial = state::input_mapper(&request);

        let snapshot = match graph.run(initial, &opts).await.unwrap() {
            RunOutcome::Interrupted(s) => s,
            RunOutcome::Complete(_) => panic!("expected interrupt"),
        };
        let state = match graph.resume(snapshot, json!(""), &opts).await.unwrap() {
            RunOutcome::Complete(state) => state,
            RunOutcome::Interrupted(_) => panic!("unexpected interrupt"),
        };

        assert_eq!(
            agent_types(&state),
            vec![
                "data_science_hypothesis_agent",
                "data_science_human_choice",
                "data_science_process_agent",
                "data_science_code_agent",
                "data_science_quality_review_agent",
                "data_science_note_agent",
                "data_science_process_agent",
                "data_science_refiner_agent",
            ]
        );
        assert_eq!(state[F_SENDER], json!(REFINER));
    }
}
