//! Node implementations for the data-science pipeline.
//!
//! Every node follows the same shape: build the role's agent over the
//! session model (wrapped in capture interceptors), run it on the internal
//! transcript, emit the captured batch to the live stream, and return a
//! partial state update. Failures stay in-band; a broken agent writes its
//! error message into state and the routers decide what happens next.

use flowgraph::messages::{messages_from_state, KW_ERROR_TYPE, KW_FILES, Message};
use flowgraph::{node_fn, NodeContext, NodeExecutor, NodeOutput};
use sandbox::SANDBOX_UNAVAILABLE;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::capture::{CaptureBuffer, CaptureInterceptor};
use crate::runtime::Agent;
use crate::tools::{registry_of, sandbox_tools, search_tools};

use super::prompts;
use super::state::*;
use super::{DataScienceDeps, Emitter};

/// HumanChoice classification of interrupt replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feedback {
    Approve,
    Revise,
}

/// Empty input approves. A question mark or any hedging keyword revises;
/// everything else approves.
pub fn classify_feedback(text: &str) -> Feedback {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Feedback::Approve;
    }
    if trimmed.contains('?') {
        return Feedback::Revise;
    }
    let lowered = trimmed.to_lowercase();
    const REVISE_MARKERS: [&str; 5] = ["can", "could", "what about", "but", "however"];
    if REVISE_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return Feedback::Revise;
    }
    Feedback::Approve
}

async fn emit(emitter: &Emitter, messages: &[Message]) {
    if let Some(tx) = emitter {
        for message in messages {
            // A full channel applies backpressure here; a closed one means
            // the session is gone and the run will be cancelled shortly.
            let _ = tx.send(message.clone()).await;
        }
    }
}

struct RoleRun {
    agent: Agent,
    buffer: Arc<CaptureBuffer>,
}

fn role_agent(deps: &DataScienceDeps, node: &str, prompt: &str, tools: Vec<flowgraph::tool::Tool>) -> RoleRun {
    let identity = agent_type(node);
    let buffer = CaptureBuffer::new();
    let (primary, fixing) =
        CaptureInterceptor::pair(deps.models.for_role(node), &identity, buffer.clone());
    let agent = Agent::new(node, identity.clone(), primary, fixing)
        .with_system_prompt(prompt)
        .with_tools(registry_of(tools))
        .with_capture(buffer.clone())
        .with_limits(deps.limits.max_agent_iters, deps.limits.max_fix);
    RoleRun { agent, buffer }
}

fn transcript_of(state: &Value) -> Vec<Message> {
    messages_from_state(state, F_INTERNAL)
}

fn task_context(state: &Value) -> String {
    format!(
        "Hypothesis: {}\nAssigned task: {}",
        state[F_HYPOTHESIS].as_str().unwrap_or_default(),
        state[F_TASK].as_str().unwrap_or_default(),
    )
}

fn captured_has_outage(captured: &[Message]) -> bool {
    captured
        .iter()
        .any(|m| m.role == flowgraph::MessageRole::Tool && m.content.contains(SANDBOX_UNAVAILABLE))
}

pub fn hypothesis_node(deps: DataScienceDeps) -> NodeExecutor {
    node_fn(move |state: Value, ctx: NodeContext| {
        let deps = deps.clone();
        async move {
            let mut tools = search_tools(deps.search.clone());
            if let Some(sb) = &deps.sandbox {
                tools.extend(
                    sandbox_tools(Arc::clone(sb), ctx.cancel.clone())
                        .into_iter()
                        .filter(|t| ["read_file", "describe_data", "list_files"].contains(&t.name.as_str())),
                );
            }
            let directory = state[F_DIRECTORY].clone();
            let prompt = format!(
                "{}\n\nAvailable data files: {}",
                prompts::HYPOTHESIS,
                directory
            );
            let run = role_agent(&deps, HYPOTHESIS, &prompt, tools);
            let reply = run.agent.run(transcript_of(&state), &ctx.cancel).await;
            let captured = run.buffer.drain();
            emit(&deps.emitter, &captured).await;

            Ok(NodeOutput::Update(json!({
                F_HYPOTHESIS: reply.content,
                F_INTERNAL: [reply],
                F_MESSAGES: captured,
                F_SENDER: HYPOTHESIS,
            })))
        }
    })
}

pub fn human_choice_node(deps: DataScienceDeps) -> NodeExecutor {
    node_fn(move |state: Value, ctx: NodeContext| {
        let deps = deps.clone();
        async move {
            let reply = match ctx.resume_input {
                Some(input) => input,
                None => {
                    return Ok(NodeOutput::Interrupt(json!({
                        "question": "Here is the proposed hypothesis. Reply with feedback, or with nothing to approve.",
                        "hypothesis": state[F_HYPOTHESIS],
                    })));
                }
            };

            let text = reply.as_str().unwrap_or_default().to_string();
            let decision = classify_feedback(&text);
            let modification_areas = match decision {
                Feedback::Approve => String::new(),
                Feedback::Revise => text.clone(),
            };

            let mut record = Message::human(if text.is_empty() { "(approved)".to_string() } else { text })
                .with_agent_type(agent_type(HUMAN_CHOICE))
                .with_timestamp();
            record.ensure_id();
            emit(&deps.emitter, std::slice::from_ref(&record)).await;

            Ok(NodeOutput::Update(json!({
                F_MODIFICATIONS: modification_areas,
                F_INTERNAL: [record.clone()],
                F_MESSAGES: [record],
                F_SENDER: HUMAN_CHOICE,
            })))
        }
    })
}

pub fn process_node(deps: DataScienceDeps) -> NodeExecutor {
    node_fn(move |state: Value, ctx: NodeContext| {
        let deps = deps.clone();
        async move {
            let run = role_agent(&deps, PROCESS, prompts::PROCESS, Vec::new());
            let mut transcript = transcript_of(&state);
            transcript.push(Message::human(format!(
                "Hypothesis: {}\nCompleted tasks so far: {}",
                state[F_HYPOTHESIS].as_str().unwrap_or_default(),
                state[F_COMPLETED],
            )));

            let (decision, task, reply) = match run
                .agent
                .run_structured(transcript, prompts::PROCESS_SCHEMA, &ctx.cancel)
                .await
            {
                Ok((value, reply)) => (
                    value["decision"].as_str().unwrap_or_default().to_string(),
                    value["task"].as_str().unwrap_or_default().to_string(),
                    reply,
                ),
                Err(e) => {
                    tracing::warn!(error = %e, "process decision unparseable, looping");
                    let mut reply = Message::ai("process decision unavailable")
                        .with_agent_type(agent_type(PROCESS));
                    reply.ensure_id();
                    (String::new(), String::new(), reply)
                }
            };

            let known = ["Coder", "Visualization", "Search", "Report", "FINISH", "Process"];
            let is_routable = known.contains(&decision.as_str());

            let prior_decision = state[F_DECISION].as_str().unwrap_or_default();
            let prior_task = state[F_TASK].as_str().unwrap_or_default();
            let repeats = if is_routable && decision == prior_decision && task == prior_task {
                state[F_REPEATS].as_i64().unwrap_or(0) + 1
            } else {
                0
            };
            let self_loops = if is_routable && decision != "Process" {
                0
            } else {
                state[F_SELF_LOOPS].as_i64().unwrap_or(0) + 1
            };

            let captured = run.buffer.drain();
            emit(&deps.emitter, &captured).await;

            Ok(NodeOutput::Update(json!({
                F_DECISION: decision,
                F_TASK: task,
                F_SENDER: PROCESS,
                F_REPEATS: repeats,
                F_SELF_LOOPS: self_loops,
                F_INTERNAL: [reply],
                F_MESSAGES: captured,
            })))
        }
    })
}

/// Shared body of the four specialists; `scratch_field` is where the role
/// accumulates its summary.
fn specialist_node(
    deps: DataScienceDeps,
    node: &'static str,
    prompt: &'static str,
    scratch_field: &'static str,
    tool_names: &'static [&'static str],
) -> NodeExecutor {
    node_fn(move |state: Value, ctx: NodeContext| {
        let deps = deps.clone();
        async move {
            let mut tools = Vec::new();
            if tool_names.iter().any(|n| n.ends_with("_search")) {
                tools.extend(search_tools(deps.search.clone()));
            }
            if let Some(sb) = &deps.sandbox {
                tools.extend(
                    sandbox_tools(Arc::clone(sb), ctx.cancel.clone())
                        .into_iter()
                        .filter(|t| tool_names.contains(&t.name.as_str())),
                );
            }

            let mut run = role_agent(&deps, node, prompt, tools);
            if node == SEARCH {
                // fan out concurrent queries; the other specialists stay
                // strictly sequential
                run.agent = run.agent.with_parallel_tools();
            }
            let mut transcript = transcript_of(&state);
            transcript.push(Message::human(task_context(&state)));
            let reply = run.agent.run(transcript, &ctx.cancel).await;
            let captured = run.buffer.drain();
            emit(&deps.emitter, &captured).await;

            let outage = captured_has_outage(&captured);
            let outages = if outage {
                state[F_OUTAGES].as_i64().unwrap_or(0) + 1
            } else {
                0
            };
            let task = state[F_TASK].as_str().unwrap_or_default().to_string();

            Ok(NodeOutput::Update(json!({
                scratch_field: reply.content,
                F_INTERNAL: [reply],
                F_MESSAGES: captured,
                F_SENDER: node,
                F_COMPLETED: [task],
                F_OUTAGES: outages,
            })))
        }
    })
}

pub fn coder_node(deps: DataScienceDeps) -> NodeExecutor {
    specialist_node(
        deps,
        CODER,
        prompts::CODER,
        F_CODE_STATE,
        &["execute_code", "pip_install", "list_files", "describe_data"],
    )
}

pub fn visualization_node(deps: DataScienceDeps) -> NodeExecutor {
    specialist_node(
        deps,
        VISUALIZATION,
        prompts::VISUALIZATION,
        F_VIS_STATE,
        &["execute_code", "list_files"],
    )
}

pub fn search_node(deps: DataScienceDeps) -> NodeExecutor {
    specialist_node(
        deps,
        SEARCH,
        prompts::SEARCH,
        F_SEARCH_STATE,
        &["web_search", "wikipedia_search", "arxiv_search"],
    )
}

pub fn report_node(deps: DataScienceDeps) -> NodeExecutor {
    specialist_node(
        deps,
        REPORT,
        prompts::REPORT,
        F_REPORT_STATE,
        &["write_file", "read_file", "list_files"],
    )
}

pub fn quality_review_node(deps: DataScienceDeps) -> NodeExecutor {
    node_fn(move |state: Value, ctx: NodeContext| {
        let deps = deps.clone();
        async move {
            let run = role_agent(&deps, QUALITY_REVIEW, prompts::QUALITY_REVIEW, Vec::new());
            let sender = state[F_SENDER].as_str().unwrap_or_default().to_string();
            let last_output = transcript_of(&state)
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            let transcript = vec![Message::human(format!(
                "Specialist: {sender}\nTask: {}\nOutput:\n{last_output}",
                state[F_TASK].as_str().unwrap_or_default(),
            ))];

            let (passed, reason, reply) = match run
                .agent
                .run_structured(transcript, prompts::REVIEW_SCHEMA, &ctx.cancel)
                .await
            {
                Ok((value, reply)) => (
                    value["passed"].as_bool().unwrap_or(true),
                    value["reason"].as_str().unwrap_or_default().to_string(),
                    reply,
                ),
                // Never stall the pipeline on an unreviewable review.
                Err(e) => {
                    tracing::warn!(error = %e, "quality review unparseable, defaulting to pass");
                    let mut reply = Message::ai("review unavailable")
                        .with_agent_type(agent_type(QUALITY_REVIEW))
                        .with_kwarg("review_defaulted", json!(true));
                    reply.ensure_id();
                    (true, "review_unavailable".to_string(), reply)
                }
            };

            let captured = run.buffer.drain();
            emit(&deps.emitter, &captured).await;

            Ok(NodeOutput::Update(json!({
                F_REVIEW: {"passed": passed, "reason": reason},
                F_QA_RETRIES: if passed { 0 } else { 1 },
                F_INTERNAL: [reply],
                F_MESSAGES: captured,
            })))
        }
    })
}

pub fn note_node(deps: DataScienceDeps) -> NodeExecutor {
    node_fn(move |state: Value, ctx: NodeContext| {
        let deps = deps.clone();
        async move {
            let run = role_agent(&deps, NOTE, prompts::NOTE, Vec::new());
            let reply = run.agent.run(transcript_of(&state), &ctx.cancel).await;
            let captured = run.buffer.drain();
            emit(&deps.emitter, &captured).await;

            Ok(NodeOutput::Update(json!({
                F_INTERNAL: [reply],
                F_MESSAGES: captured,
                F_SENDER: NOTE,
            })))
        }
    })
}

pub fn refiner_node(deps: DataScienceDeps) -> NodeExecutor {
    node_fn(move |state: Value, ctx: NodeContext| {
        let deps = deps.clone();
        async move {
            let outage = state[F_OUTAGES].as_i64().unwrap_or(0) >= 2;
            let mut prompt = prompts::REFINER.to_string();
            if outage {
                prompt.push_str("\n\n");
                prompt.push_str(prompts::REFINER_OUTAGE_NOTE);
            }

            let run = role_agent(&deps, REFINER, &prompt, Vec::new());
            let mut transcript = transcript_of(&state);
            transcript.push(Message::human(format!(
                "Hypothesis: {}\nCode results: {}\nVisualizations: {}\nResearch: {}\nReport draft: {}",
                state[F_HYPOTHESIS].as_str().unwrap_or_default(),
                state[F_CODE_STATE].as_str().unwrap_or_default(),
                state[F_VIS_STATE].as_str().unwrap_or_default(),
                state[F_SEARCH_STATE].as_str().unwrap_or_default(),
                state[F_REPORT_STATE].as_str().unwrap_or_default(),
            )));
            let mut reply = run.agent.run(transcript, &ctx.cancel).await;

            // Attach everything the run produced in the sandbox.
            if let Some(sb) = &deps.sandbox {
                let (ok, listing) = sb.get_all_files_recursive(".", &ctx.cancel).await;
                if ok && !listing.is_empty() {
                    let files: Vec<String> = listing.lines().map(str::to_string).collect();
                    reply = reply.with_kwarg(KW_FILES, json!(files));
                }
            }

            let captured = run.buffer.drain();
            emit(&deps.emitter, &captured).await;

            let mut batch = captured.clone();
            let mut internal = Vec::new();
            if outage {
                let mut warning = Message::ai(
                    "The execution sandbox became unavailable; these results are partial.",
                )
                .with_agent_type(agent_type(REFINER))
                .with_kwarg(KW_ERROR_TYPE, json!("sandbox_unavailable"))
                .with_timestamp();
                warning.ensure_id();
                emit(&deps.emitter, std::slice::from_ref(&warning)).await;
                batch.push(warning.clone());
                internal.push(warning);
            }
            internal.push(reply.clone());

            Ok(NodeOutput::Update(json!({
                F_REPORT_STATE: reply.content,
                F_INTERNAL: internal,
                F_MESSAGES: batch,
                F_SENDER: REFINER,
            })))
        }
    })
}

/// Removes scratch artifacts from the sandbox working directory. The
/// binding itself lives until session cleanup. A failure here never fails
/// the run; it is emitted as a tagged warning.
pub fn cleanup_node(deps: DataScienceDeps) -> NodeExecutor {
    node_fn(move |_state: Value, ctx: NodeContext| {
        let deps = deps.clone();
        async move {
            if let Some(sb) = &deps.sandbox {
                let (ok, payload) = sb
                    .exec("rm -rf __pycache__ .ipynb_checkpoints", &ctx.cancel)
                    .await;
                if !ok {
                    tracing::warn!(payload = %payload, "pipeline cleanup failed");
                    let mut warning = Message::ai(format!("Cleanup warning: {payload}"))
                        .with_agent_type(agent_type(CLEANUP))
                        .with_kwarg(KW_ERROR_TYPE, json!("cleanup_failed"))
                        .with_timestamp();
                    warning.ensure_id();
                    emit(&deps.emitter, std::slice::from_ref(&warning)).await;
                    return Ok(NodeOutput::Update(json!({ F_MESSAGES: [warning] })));
                }
            }
            Ok(NodeOutput::Update(json!({ F_MESSAGES: [] })))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_feedback_approves() {
        assert_eq!(classify_feedback(""), Feedback::Approve);
        assert_eq!(classify_feedback("   "), Feedback::Approve);
    }

    #[test]
    fn questions_and_hedges_revise() {
        assert_eq!(classify_feedback("is this right?"), Feedback::Revise);
        assert_eq!(classify_feedback("could you add seasonality"), Feedback::Revise);
        assert_eq!(classify_feedback("What about outliers"), Feedback::Revise);
        assert_eq!(classify_feedback("fine, but check 2023"), Feedback::Revise);
        assert_eq!(classify_feedback("However I prefer monthly"), Feedback::Revise);
        assert_eq!(classify_feedback("you can proceed"), Feedback::Revise);
    }

    #[test]
    fn plain_approval_approves() {
        assert_eq!(classify_feedback("looks good"), Feedback::Approve);
        assert_eq!(classify_feedback("go ahead"), Feedback::Approve);
    }
}
