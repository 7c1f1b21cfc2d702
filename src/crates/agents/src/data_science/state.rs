//! State schema, field names, and I/O mappers for the data-science
//! pipeline.

use flowgraph::state::{AppendReducer, ConcatReducer, OverwriteReducer, StateSchema, SumReducer};
use flowgraph::{Message, SubgraphRequest};
use serde_json::{json, Value};

// Node names. The agent identity on the wire is `data_science_<node>`.
pub const HYPOTHESIS: &str = "hypothesis_agent";
pub const HUMAN_CHOICE: &str = "human_choice";
pub const PROCESS: &str = "process_agent";
pub const CODER: &str = "code_agent";
pub const VISUALIZATION: &str = "visualization_agent";
pub const SEARCH: &str = "search_agent";
pub const REPORT: &str = "report_agent";
pub const QUALITY_REVIEW: &str = "quality_review_agent";
pub const NOTE: &str = "note_agent";
pub const REFINER: &str = "refiner_agent";
pub const CLEANUP: &str = "cleanup";

pub const SUBGRAPH_NAME: &str = "data_science";

pub fn agent_type(node: &str) -> String {
    format!("{SUBGRAPH_NAME}_{node}")
}

// State fields.
pub const F_INTERNAL: &str = "internal_messages";
pub const F_MESSAGES: &str = "messages";
pub const F_SENDER: &str = "sender";
pub const F_HYPOTHESIS: &str = "hypothesis";
pub const F_DECISION: &str = "process_decision";
pub const F_TASK: &str = "task";
pub const F_MODIFICATIONS: &str = "modification_areas";
pub const F_REVIEW: &str = "quality_review";
pub const F_VIS_STATE: &str = "visualization_state";
pub const F_SEARCH_STATE: &str = "searcher_state";
pub const F_CODE_STATE: &str = "code_state";
pub const F_REPORT_STATE: &str = "report_state";
pub const F_QA_RETRIES: &str = "agent_quality_review_retries";
pub const F_COMPLETED: &str = "completed_tasks";
// Loop guards, maintained by the process node itself (replace semantics).
pub const F_SELF_LOOPS: &str = "process_self_loops";
pub const F_REPEATS: &str = "process_repeats";
// Consecutive sandbox outage count; specialists reset it on success.
pub const F_OUTAGES: &str = "sandbox_outages";
// Filenames visible to the pipeline, set by the input mapper.
pub const F_DIRECTORY: &str = "directory_content";

pub fn schema() -> StateSchema {
    StateSchema::new()
        .with_field(F_INTERNAL, Box::new(AppendReducer))
        .with_field(F_MESSAGES, Box::new(OverwriteReducer))
        .with_field(F_SENDER, Box::new(OverwriteReducer))
        .with_field(F_HYPOTHESIS, Box::new(OverwriteReducer))
        .with_field(F_DECISION, Box::new(OverwriteReducer))
        .with_field(F_TASK, Box::new(OverwriteReducer))
        .with_field(F_MODIFICATIONS, Box::new(OverwriteReducer))
        .with_field(F_REVIEW, Box::new(OverwriteReducer))
        .with_field(F_VIS_STATE, Box::new(ConcatReducer::spaced()))
        .with_field(F_SEARCH_STATE, Box::new(ConcatReducer::spaced()))
        .with_field(F_CODE_STATE, Box::new(ConcatReducer::spaced()))
        .with_field(F_REPORT_STATE, Box::new(ConcatReducer::spaced()))
        .with_field(F_QA_RETRIES, Box::new(SumReducer))
        .with_field(F_COMPLETED, Box::new(AppendReducer))
        .with_field(F_SELF_LOOPS, Box::new(OverwriteReducer))
        .with_field(F_REPEATS, Box::new(OverwriteReducer))
        .with_field(F_OUTAGES, Box::new(OverwriteReducer))
        .with_field(F_DIRECTORY, Box::new(OverwriteReducer))
}

/// Request -> initial pipeline state.
pub fn input_mapper(request: &SubgraphRequest) -> Value {
    let mut human = Message::human(request.text.clone());
    human.ensure_id();
    let directory = request
        .context
        .get("directory_content")
        .cloned()
        .unwrap_or_else(|| json!([]));
    json!({
        F_INTERNAL: [human],
        F_MESSAGES: [],
        F_SENDER: "",
        F_HYPOTHESIS: "",
        F_DECISION: Value::Null,
        F_TASK: "",
        F_MODIFICATIONS: "",
        F_REVIEW: "",
        F_VIS_STATE: "",
        F_SEARCH_STATE: "",
        F_CODE_STATE: "",
        F_REPORT_STATE: "",
        F_QA_RETRIES: 0,
        F_COMPLETED: [],
        F_SELF_LOOPS: 0,
        F_REPEATS: 0,
        F_OUTAGES: 0,
        F_DIRECTORY: directory,
    })
}

/// Final state -> the message handed upstream (the registry tags it
/// `data_science_end`).
pub fn output_mapper(state: &Value) -> Message {
    flowgraph::messages::messages_from_state(state, F_INTERNAL)
        .last()
        .cloned()
        .unwrap_or_else(|| Message::ai("The analysis produced no output."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_mapper_initializes_every_field() {
        let request = SubgraphRequest::new("Analyze sales.csv trends")
            .with_context(json!({"directory_content": ["sales.csv"]}));
        let state = input_mapper(&request);
        assert_eq!(state[F_INTERNAL][0]["content"], json!("Analyze sales.csv trends"));
        assert!(state[F_INTERNAL][0]["id"].is_string());
        assert_eq!(state[F_HYPOTHESIS], json!(""));
        assert_eq!(state[F_DECISION], Value::Null);
        assert_eq!(state[F_QA_RETRIES], json!(0));
        assert_eq!(state[F_DIRECTORY], json!(["sales.csv"]));
    }

    #[test]
    fn output_mapper_takes_last_internal_message() {
        let state = json!({
            F_INTERNAL: [
                Message::human("q").with_id("1"),
                Message::ai("final report").with_id("2"),
            ]
        });
        assert_eq!(output_mapper(&state).content, "final report");
    }

    #[test]
    fn scratch_states_concatenate() {
        let schema = schema();
        let mut state = json!({F_CODE_STATE: ""});
        schema
            .apply(&mut state, &json!({F_CODE_STATE: "wrote load.py"}))
            .unwrap();
        schema
            .apply(&mut state, &json!({F_CODE_STATE: "ran analysis"}))
            .unwrap();
        assert_eq!(state[F_CODE_STATE], json!("wrote load.py ran analysis"));
    }
}
