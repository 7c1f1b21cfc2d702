//! Per-request orchestration: resolve referenced files, assemble the
//! subgraph catalogue and system prompt, run the planner, drive the chosen
//! subgraph, and stream everything back through the session.
//!
//! Every request terminates on the wire with either a `done` or an `error`
//! frame, whatever happens in between.

use agents::data_science::{self, DataScienceDeps, RoleModels};
use agents::{Planner, RouteOutcome, SearchFn};
use flowgraph::messages::KW_USAGE;
use flowgraph::{
    ChatModel, GraphError, Message, RunOptions, SubgraphOutcome, SubgraphRegistry, SubgraphRequest,
    UsageMetadata,
};
use llm::{ProviderRegistry, ROLE_PLANNER};
use sandbox::{PersistentSandbox, SandboxManager};
use serde_json::json;
use std::sync::Arc;
use store::{KvSnapshotStore, KvStore};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Settings;
use crate::protocol::{DocRef, ServerFrame};
use crate::session::{RunHandle, Session, SessionManager};

/// Builds a chat model for `(provider_id, role)`; `None` when the provider
/// is unknown. Tests inject scripted models here.
pub type ModelFactory =
    Arc<dyn Fn(&str, &str) -> Option<Arc<dyn ChatModel>> + Send + Sync>;

pub fn provider_model_factory(registry: ProviderRegistry) -> ModelFactory {
    Arc::new(move |provider, role| registry.build(provider, role).ok())
}

pub struct Orchestrator {
    pub sessions: Arc<SessionManager>,
    store: Arc<dyn KvStore>,
    sandboxes: Arc<SandboxManager>,
    settings: Arc<Settings>,
    models: ModelFactory,
    /// Peer subgraphs (deep-research, simple sandbox, ...) registered at
    /// startup. The data-science pipeline is built per request instead: it
    /// closes over the session's sandbox and live stream.
    peers: SubgraphRegistry,
    snapshots: Arc<KvSnapshotStore>,
    search: Option<SearchFn>,
}

impl Orchestrator {
    pub fn new(
        sessions: Arc<SessionManager>,
        settings: Arc<Settings>,
        models: ModelFactory,
        peers: SubgraphRegistry,
        search: Option<SearchFn>,
    ) -> Self {
        let store = sessions.store();
        let sandboxes = sessions.sandboxes();
        let snapshots = Arc::new(KvSnapshotStore::new(Arc::clone(&store)));
        Self {
            sessions,
            store,
            sandboxes,
            settings,
            models,
            peers,
            snapshots,
            search,
        }
    }

    pub fn store(&self) -> Arc<dyn KvStore> {
        Arc::clone(&self.store)
    }

    pub fn settings(&self) -> Arc<Settings> {
        Arc::clone(&self.settings)
    }

    fn data_science_enabled(&self, csv_docs: &[DocRef]) -> bool {
        match self.settings.enable_data_science {
            Some(flag) => flag && !csv_docs.is_empty(),
            None => !csv_docs.is_empty(),
        }
    }

    fn system_prompt(&self, indexed: &[DocRef], directory: &[String]) -> String {
        let mut prompt = format!(
            "You are manta, an assistant orchestrating specialist workflows.\n\
             Today's date is {}.",
            chrono::Utc::now().format("%Y-%m-%d"),
        );
        if !indexed.is_empty() {
            let names: Vec<&str> = indexed.iter().map(|d| d.filename.as_str()).collect();
            prompt.push_str(&format!(
                "\nThe user has indexed documents available for retrieval: {}.",
                names.join(", ")
            ));
        }
        if !directory.is_empty() {
            prompt.push_str(&format!(
                "\nThe user has attached data files: {}.",
                directory.join(", ")
            ));
        }
        prompt.push_str(
            "\nNever author or run code inline; code always runs inside a sandboxed subgraph.",
        );
        prompt
    }

    async fn emit(&self, session: &Session, frame: ServerFrame) -> bool {
        session
            .emit(frame, self.settings.emit_backpressure_timeout())
            .await
    }

    /// Dedup-gated user-visible message: persisted, then streamed with the
    /// session's cumulative usage attached.
    async fn emit_message(&self, session: &Session, request_id: &str, message: &Message) {
        let mut message = message.clone();
        let id = message.ensure_id().to_string();
        match self
            .store
            .is_message_new(&session.user_id, &session.conversation_id, &id)
            .await
        {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                tracing::warn!(error = %e, "dedup check failed, emitting anyway");
            }
        }
        if let Err(e) = self
            .store
            .put_message(&session.user_id, &session.conversation_id, &message)
            .await
        {
            tracing::warn!(error = %e, "failed to persist message");
        }
        let usage = session.usage();
        self.emit(session, ServerFrame::message(request_id, &message, usage))
            .await;
    }

    async fn clear_run(&self, session: &Session) {
        *session.run.lock().await = None;
    }

    /// Entry point for a `request` frame. Runs inline; the socket layer
    /// spawns it.
    pub async fn handle_request(
        self: &Arc<Self>,
        session: Arc<Session>,
        request_id: String,
        text: String,
        doc_ids: Vec<DocRef>,
        provider: Option<String>,
    ) {
        // one cooperative run per session
        {
            let mut run = session.run.lock().await;
            if run.is_some() {
                drop(run);
                self.emit(
                    &session,
                    ServerFrame::error(
                        &request_id,
                        "planner_end",
                        "A request is already running for this conversation.",
                        "run_active",
                    ),
                )
                .await;
                return;
            }
            let cancel = CancellationToken::new();
            *run = Some(RunHandle {
                run_id: format!("run-{}", Uuid::new_v4()),
                request_id: request_id.clone(),
                subgraph: None,
                cancel,
                pending_interrupt: None,
            });
        }

        // persist the user's message (id derived from the request)
        let mut user_message = Message::human(text.clone())
            .with_id(format!("{request_id}-user"))
            .with_agent_type("user")
            .with_timestamp();
        user_message.ensure_id();
        if let Err(e) = self
            .store
            .put_message(&session.user_id, &session.conversation_id, &user_message)
            .await
        {
            tracing::warn!(error = %e, "failed to persist user message");
        }

        let indexed: Vec<DocRef> = doc_ids.iter().filter(|d| d.indexed).cloned().collect();
        let csv_docs: Vec<DocRef> = doc_ids.iter().filter(|d| d.is_csv()).cloned().collect();
        let directory: Vec<String> = csv_docs.iter().map(|d| d.filename.clone()).collect();

        let ds_enabled = self.data_science_enabled(&csv_docs);
        let sandbox = if ds_enabled {
            Some(self.sandboxes.get_or_create(
                &session.user_id,
                &session.conversation_id,
                &self.settings.sandbox_snapshot,
                csv_docs.iter().map(|d| d.id.clone()).collect(),
            ))
        } else {
            None
        };

        let mut catalogue: Vec<(String, String)> = self
            .peers
            .names()
            .iter()
            .filter_map(|name| self.peers.get(name))
            .map(|spec| (spec.name.clone(), spec.description.clone()))
            .collect();
        if ds_enabled {
            catalogue.push((
                data_science::SUBGRAPH_NAME.to_string(),
                "multi-agent analysis of the referenced CSV files".to_string(),
            ));
        }

        let provider_id = provider.unwrap_or_else(|| self.settings.default_provider.clone());
        let planner_model = match (self.models)(&provider_id, ROLE_PLANNER) {
            Some(model) => model,
            None => {
                self.emit(
                    &session,
                    ServerFrame::error(
                        &request_id,
                        "planner_end",
                        &format!("Unknown provider '{provider_id}'."),
                        "unknown_provider",
                    ),
                )
                .await;
                self.clear_run(&session).await;
                return;
            }
        };

        let cancel = match session.run.lock().await.as_ref() {
            Some(run) => run.cancel.clone(),
            None => return,
        };

        let planner = Planner::new(planner_model);
        let system_prompt = self.system_prompt(&indexed, &directory);
        let route = planner.route(&system_prompt, &text, &catalogue, &cancel).await;

        session.add_usage(&route.usage);
        for captured in &route.captured {
            self.emit(&session, ServerFrame::think(&request_id, captured))
                .await;
        }

        match route.outcome {
            RouteOutcome::Answer(message) | RouteOutcome::Unavailable(message) => {
                let agent_type = message.agent_type().unwrap_or("planner_end").to_string();
                self.emit_message(&session, &request_id, &message).await;
                self.emit(&session, ServerFrame::done(&request_id, &agent_type))
                    .await;
                self.clear_run(&session).await;
            }
            RouteOutcome::Delegate { subgraph, notice } => {
                self.emit(&session, ServerFrame::think(&request_id, &notice))
                    .await;
                {
                    let mut run = session.run.lock().await;
                    if let Some(handle) = run.as_mut() {
                        handle.subgraph = Some(subgraph.clone());
                    }
                }
                let request = SubgraphRequest::new(text).with_context(
                    json!({"directory_content": directory, "provider": provider_id.clone()}),
                );
                self.drive_subgraph(
                    Arc::clone(&session),
                    request_id,
                    subgraph,
                    provider_id,
                    sandbox,
                    SubgraphDrive::Invoke(request),
                )
                .await;
            }
        }
    }

    /// `interrupt_reply` frame: resume the paused subgraph run.
    pub async fn handle_interrupt_reply(
        self: &Arc<Self>,
        session: Arc<Session>,
        request_id: String,
        text: String,
    ) {
        let (run_id, subgraph) = {
            let mut run = session.run.lock().await;
            match run.as_mut() {
                Some(handle) if handle.pending_interrupt.is_some() => {
                    handle.pending_interrupt = None;
                    (handle.run_id.clone(), handle.subgraph.clone())
                }
                _ => {
                    drop(run);
                    self.emit(
                        &session,
                        ServerFrame::error(
                            &request_id,
                            "planner_end",
                            "No run is awaiting input.",
                            "no_pending_interrupt",
                        ),
                    )
                    .await;
                    return;
                }
            }
        };

        let Some(subgraph) = subgraph else {
            self.clear_run(&session).await;
            return;
        };

        use flowgraph::SnapshotStore;
        let snapshot = match self.snapshots.take(&run_id).await {
            Ok(Some(snapshot)) => snapshot,
            _ => {
                self.emit(
                    &session,
                    ServerFrame::error(
                        &request_id,
                        "planner_end",
                        "The paused run could not be restored.",
                        "interrupt_lost",
                    ),
                )
                .await;
                self.clear_run(&session).await;
                return;
            }
        };

        let sandbox = self
            .sandboxes
            .get(&session.user_id, &session.conversation_id);
        let provider_id = self.settings.default_provider.clone();
        self.drive_subgraph(
            session,
            request_id,
            subgraph,
            provider_id,
            sandbox,
            SubgraphDrive::Resume {
                snapshot,
                input: json!(text),
            },
        )
        .await;
    }

    /// `cancel` frame: abort the active run.
    pub async fn handle_cancel(self: &Arc<Self>, session: Arc<Session>, request_id: String) {
        let cancelled = {
            let run = session.run.lock().await;
            match run.as_ref() {
                Some(handle) => {
                    handle.cancel.cancel();
                    true
                }
                None => false,
            }
        };
        if cancelled {
            self.emit(
                &session,
                ServerFrame::error(&request_id, "planner_end", "Request cancelled.", "cancelled"),
            )
            .await;
            self.clear_run(&session).await;
        }
    }

    fn build_subgraph_spec(
        &self,
        name: &str,
        provider_id: &str,
        sandbox: Option<Arc<PersistentSandbox>>,
        emitter: mpsc::Sender<Message>,
    ) -> Option<Arc<flowgraph::SubgraphSpec>> {
        if name == data_science::SUBGRAPH_NAME {
            let model = (self.models)(provider_id, llm::ROLE_DEFAULT)?;
            let mut deps = DataScienceDeps::new(RoleModels::uniform(model))
                .with_limits(self.settings.pipeline_limits())
                .with_emitter(emitter);
            if let Some(sandbox) = sandbox {
                deps = deps.with_sandbox(sandbox);
            }
            if let Some(search) = &self.search {
                deps = deps.with_search(Arc::clone(search));
            }
            data_science::build_subgraph(deps).ok().map(Arc::new)
        } else {
            self.peers.get(name)
        }
    }

    async fn drive_subgraph(
        self: &Arc<Self>,
        session: Arc<Session>,
        request_id: String,
        subgraph: String,
        provider_id: String,
        sandbox: Option<Arc<PersistentSandbox>>,
        drive: SubgraphDrive,
    ) {
        let (emit_tx, mut emit_rx) = mpsc::channel::<Message>(self.settings.emit_channel_capacity);

        // Bridge captured pipeline messages onto the socket as think frames,
        // tallying any usage they carry.
        let forwarder = {
            let orchestrator = Arc::clone(self);
            let session = Arc::clone(&session);
            let request_id = request_id.clone();
            tokio::spawn(async move {
                while let Some(message) = emit_rx.recv().await {
                    if let Some(usage) = message
                        .additional_kwargs
                        .get(KW_USAGE)
                        .and_then(|v| serde_json::from_value::<UsageMetadata>(v.clone()).ok())
                    {
                        session.add_usage(&usage);
                    }
                    orchestrator
                        .emit(&session, ServerFrame::think(&request_id, &message))
                        .await;
                }
            })
        };

        let spec = match self.build_subgraph_spec(&subgraph, &provider_id, sandbox, emit_tx) {
            Some(spec) => spec,
            None => {
                self.emit(
                    &session,
                    ServerFrame::error(
                        &request_id,
                        "planner_end",
                        &format!(
                            "I am not able to route to the {subgraph} subgraph as it is not available"
                        ),
                        "non_existent_subgraph",
                    ),
                )
                .await;
                self.clear_run(&session).await;
                return;
            }
        };

        let (run_id, cancel) = match session.run.lock().await.as_ref() {
            Some(handle) => (handle.run_id.clone(), handle.cancel.clone()),
            None => return,
        };

        let opts = RunOptions::new(run_id.clone())
            .with_node_timeout(self.settings.node_timeout())
            .with_cancel(cancel)
            .with_snapshots(Arc::clone(&self.snapshots) as Arc<dyn flowgraph::SnapshotStore>);

        let outcome = match drive {
            SubgraphDrive::Invoke(request) => spec.invoke(&request, &opts).await,
            SubgraphDrive::Resume { snapshot, input } => spec.resume(snapshot, input, &opts).await,
        };

        drop(spec);
        forwarder.await.ok();

        match outcome {
            Ok(SubgraphOutcome::Message(message)) => {
                let agent_type = message
                    .agent_type()
                    .unwrap_or("planner_end")
                    .to_string();
                self.emit_message(&session, &request_id, &message).await;
                self.emit(&session, ServerFrame::done(&request_id, &agent_type))
                    .await;
                self.clear_run(&session).await;
            }
            Ok(SubgraphOutcome::Interrupted(snapshot)) => {
                let agent_type = format!("{subgraph}_{}", snapshot.paused_at);
                let frame = ServerFrame::interrupt(&request_id, &agent_type, &snapshot.payload);
                {
                    let mut run = session.run.lock().await;
                    if let Some(handle) = run.as_mut() {
                        handle.pending_interrupt = Some(frame.clone());
                    }
                }
                self.emit(&session, frame).await;
            }
            Err(GraphError::Cancelled) => {
                // the cancel handler already told the client
                self.clear_run(&session).await;
            }
            Err(e) => {
                tracing::error!(error = %e, run_id = %run_id, "run failed");
                let (content, error_type) = describe_fatal(&e);
                self.emit(
                    &session,
                    ServerFrame::error(&request_id, &format!("{subgraph}_end"), content, error_type),
                )
                .await;
                self.clear_run(&session).await;
            }
        }
    }
}

enum SubgraphDrive {
    Invoke(SubgraphRequest),
    Resume {
        snapshot: flowgraph::InterruptSnapshot,
        input: serde_json::Value,
    },
}

/// Map fatal engine errors to the user-facing class, never a stack trace.
fn describe_fatal(error: &GraphError) -> (&'static str, &'static str) {
    match error {
        GraphError::UnknownNode { .. } | GraphError::InvalidGraph(_) => {
            ("We couldn't route your request.", "engine_error")
        }
        GraphError::NodeTimeout { .. } => ("We lost the worker handling your request.", "node_timeout"),
        GraphError::StepLimit(_) => ("The workflow did not converge.", "engine_error"),
        _ => ("Something went wrong while running your request.", "engine_error"),
    }
}
