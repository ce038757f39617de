use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::commands::{CommandAction, CommandRegistry, Dispatch, KeyInput};
use crate::config::Config;
use crate::permission::{
    IngestOutcome, PermissionArbiter, PermissionFileChannel, PermissionRequest,
    PermissionResponse, ResponseChannel, ReviewApplication, SafetyReviewer,
};
use crate::state::{ReconcilerUpdate, StreamReconciler};
use crate::transport::{EventStream, ReadyInfo, Transport};
use crate::wire::{normalize, CanonicalEvent};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Inactive,
    Starting,
    Active,
}

/// A structured question from the assistant, held until the host answers
/// it over the stream channel.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingQuestion {
    pub request_id: String,
    pub questions: Value,
}

/// Sequences session operations over a [`Transport`]. One logical
/// operation at a time; an operation's event stream is drained to its
/// terminal event (or idle timeout) before the next input is accepted.
pub struct SessionController<T: Transport> {
    transport: T,
    config: Config,
    state: SessionState,
    reconciler: StreamReconciler,
    arbiter: PermissionArbiter,
    reviewer: SafetyReviewer,
    commands: CommandRegistry,
    file_channel: Option<PermissionFileChannel>,
    working_dir: PathBuf,
    original_session_id: Option<String>,
    updates: Option<mpsc::UnboundedSender<ReconcilerUpdate>>,
    session_error: Option<String>,
    review_reason: Option<String>,
    pending_question: Option<PendingQuestion>,
}

impl<T: Transport> SessionController<T> {
    pub fn new(transport: T, config: Config) -> Self {
        let reconciler = StreamReconciler::new(config.show_thinking);
        let arbiter = PermissionArbiter::new(config.permission_mode);
        let reviewer = SafetyReviewer::new(
            config.api_key.clone(),
            Duration::from_millis(config.review_timeout_ms),
        );
        let working_dir = config.working_dir.clone();
        Self {
            transport,
            config,
            state: SessionState::Inactive,
            reconciler,
            arbiter,
            reviewer,
            commands: CommandRegistry::with_defaults(),
            file_channel: None,
            working_dir,
            original_session_id: None,
            updates: None,
            session_error: None,
            review_reason: None,
            pending_question: None,
        }
    }

    pub fn set_update_channel(&mut self, tx: mpsc::UnboundedSender<ReconcilerUpdate>) {
        self.updates = Some(tx);
    }

    pub fn use_file_channel(&mut self, channel: PermissionFileChannel) {
        self.file_channel = Some(channel);
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn reconciler(&self) -> &StreamReconciler {
        &self.reconciler
    }

    pub fn session_error(&self) -> Option<&str> {
        self.session_error.as_deref()
    }

    pub fn pending_permission(&self) -> Option<&PermissionRequest> {
        self.arbiter.pending()
    }

    pub fn review_reason(&self) -> Option<&str> {
        self.review_reason.as_deref()
    }

    pub fn pending_question(&self) -> Option<&PendingQuestion> {
        self.pending_question.as_ref()
    }

    /// Answer the held question. Returns false when none was pending.
    pub fn answer_question(&mut self, answers: Value) -> Result<bool> {
        let Some(question) = self.pending_question.take() else {
            return Ok(false);
        };
        let message = serde_json::json!({
            "type": "control_response",
            "request_id": question.request_id,
            "answers": answers,
        });
        self.transport
            .send_control(&message)
            .context("failed to send question answer")?;
        Ok(true)
    }

    pub fn original_session_id(&self) -> Option<&str> {
        self.original_session_id.as_deref()
    }

    /// Launch the backing process and wait for its ready report, bounded
    /// by the configured start timeout.
    pub async fn start(&mut self) -> Result<ReadyInfo> {
        if self.state == SessionState::Active {
            bail!("session already active");
        }
        self.state = SessionState::Starting;
        self.session_error = None;

        let timeout = Duration::from_millis(self.config.start_timeout_ms);
        let started = tokio::time::timeout(timeout, self.transport.start(&self.working_dir)).await;
        let ready = match started {
            Ok(Ok(ready)) => ready,
            Ok(Err(error)) => {
                self.state = SessionState::Inactive;
                let message = format!("Failed to start session: {error:#}");
                self.session_error = Some(message.clone());
                bail!(message);
            }
            Err(_) => {
                self.state = SessionState::Inactive;
                let message = format!(
                    "Session start timed out after {} ms",
                    self.config.start_timeout_ms
                );
                self.session_error = Some(message.clone());
                bail!(message);
            }
        };

        self.state = SessionState::Active;
        let session = self.reconciler.session_mut();
        session.session_id = ready.session_id.clone();
        session.model = ready.model.clone();
        session.tools = ready.tools;
        if self.original_session_id.is_none() && !ready.session_id.is_empty() {
            self.original_session_id = Some(ready.session_id.clone());
        }
        if self.file_channel.is_none() && !ready.session_id.is_empty() {
            self.file_channel = Some(PermissionFileChannel::new(&ready.session_id));
        }
        Ok(ready)
    }

    pub async fn handle_input(&mut self, input: &str) -> Result<()> {
        match self.commands.dispatch_text(input) {
            Dispatch::Command(action) => self.handle_action(action).await,
            Dispatch::Shell(command) => self.run_shell(&command).await,
            Dispatch::Forward(text) | Dispatch::Prompt(text) => self.send(&text).await,
        }
    }

    pub async fn handle_key(&mut self, input: &KeyInput) -> Result<bool> {
        match self.commands.dispatch_key(input) {
            Some(action) => {
                self.handle_action(action).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn handle_action(&mut self, action: CommandAction) -> Result<()> {
        match action {
            CommandAction::Clear => self.clear().await,
            CommandAction::Interrupt => self.interrupt().await,
            CommandAction::Resume => self.resume().await,
            CommandAction::ToggleThinking => {
                let enabled = !self.reconciler.show_thinking();
                self.reconciler.set_show_thinking(enabled);
                Ok(())
            }
        }
    }

    pub async fn send(&mut self, text: &str) -> Result<()> {
        if self.state != SessionState::Active {
            bail!("no active session");
        }
        if self.reconciler.is_loading() {
            bail!("a response is still streaming");
        }

        self.reconciler.push_user_message(text.to_string());
        self.reconciler.begin_turn();

        let stream = match self.transport.send_message(text).await {
            Ok(stream) => stream,
            Err(error) => {
                let message = format!("Failed to send message: {error:#}");
                self.reconciler.set_error(message.clone());
                self.reconciler
                    .finish_streaming(false, self.updates.as_ref());
                bail!(message);
            }
        };
        self.drive_stream(stream).await
    }

    pub async fn clear(&mut self) -> Result<()> {
        if self.state != SessionState::Active {
            bail!("no active session");
        }
        if self.reconciler.is_loading() {
            bail!("cannot clear while a response is streaming");
        }

        self.transport
            .clear()
            .await
            .context("failed to clear session")?;

        self.arbiter.reset();
        self.review_reason = None;
        self.pending_question = None;
        self.reconciler.fade_all_messages();
        self.reconciler.push_divider();
        self.reconciler.reset_context_to_base();
        Ok(())
    }

    /// The turn is finalized as interrupted even when the backend call
    /// fails.
    pub async fn interrupt(&mut self) -> Result<()> {
        if !self.reconciler.is_loading() {
            return Ok(());
        }
        self.reconciler.stop_accepting();
        let result = self.transport.interrupt().await;
        self.reconciler.finish_streaming(true, self.updates.as_ref());
        result.context("interrupt request failed")
    }

    pub async fn resume(&mut self) -> Result<()> {
        let Some(session_id) = self.original_session_id.clone() else {
            bail!("no original session to resume");
        };
        let stream = self
            .transport
            .resume(&session_id)
            .await
            .context("failed to resume session")?;
        self.reconciler.begin_turn();
        self.drive_stream(stream).await
    }

    pub async fn run_shell(&mut self, command: &str) -> Result<()> {
        if self.state != SessionState::Active {
            bail!("no active session");
        }
        self.reconciler.push_user_message(format!("!{command}"));
        let stream = self
            .transport
            .run_external_command(command)
            .await
            .context("failed to run shell command")?;
        self.reconciler.begin_turn();
        self.drive_stream(stream).await
    }

    // Idle periods trigger a permission poll; too many in a row for the
    // current phase abort the turn.
    async fn drive_stream(&mut self, mut stream: EventStream) -> Result<()> {
        let mut idle: u32 = 0;
        loop {
            let timeout = self.reconciler.phase().timeout();
            match tokio::time::timeout(timeout, stream.next()).await {
                Ok(Some(Ok(raw))) => {
                    idle = 0;
                    let event = normalize(&raw);
                    if let Some(request) = PermissionRequest::from_event(&event) {
                        self.handle_permission(request).await?;
                        continue;
                    }
                    if let CanonicalEvent::AskUserQuestion {
                        request_id,
                        questions,
                    } = &event
                    {
                        self.pending_question = Some(PendingQuestion {
                            request_id: request_id.clone(),
                            questions: questions.clone(),
                        });
                    }
                    let terminal = event.is_terminal();
                    self.reconciler.apply(&event, self.updates.as_ref());
                    if terminal {
                        break;
                    }
                }
                Ok(Some(Err(error))) => {
                    let message = format!("Stream error: {error:#}");
                    self.reconciler.set_error(message.clone());
                    self.reconciler
                        .finish_streaming(false, self.updates.as_ref());
                    bail!(message);
                }
                Ok(None) => {
                    if self.reconciler.is_loading() {
                        self.reconciler
                            .finish_streaming(false, self.updates.as_ref());
                    }
                    break;
                }
                Err(_) => {
                    idle += 1;
                    self.poll_permission_channel().await?;
                    if idle >= self.reconciler.phase().max_idle() {
                        let message = "Response timed out".to_string();
                        self.reconciler.set_error(message.clone());
                        self.reconciler
                            .finish_streaming(false, self.updates.as_ref());
                        bail!(message);
                    }
                }
            }
        }
        Ok(())
    }

    pub async fn poll_permission_channel(&mut self) -> Result<()> {
        if let Some(raw) = self.transport.poll_permission().await? {
            self.ingest_permission_raw(&raw).await?;
        }
        Ok(())
    }

    /// Polled file-channel payloads carry no `type` tag; one is injected
    /// so they normalize like stream requests.
    pub async fn ingest_permission_raw(&mut self, raw: &Value) -> Result<()> {
        let mut value = raw.clone();
        if let Value::Object(map) = &mut value {
            map.entry("type")
                .or_insert_with(|| Value::String("permission_request".to_string()));
        }
        if let Some(request) = PermissionRequest::from_event(&normalize(&value)) {
            self.handle_permission(request).await?;
        }
        Ok(())
    }

    async fn handle_permission(&mut self, request: PermissionRequest) -> Result<()> {
        match self.arbiter.ingest(request) {
            IngestOutcome::AutoApproved(response) => self.send_response(response),
            IngestOutcome::ReviewPending(ticket) => {
                let Some(review_request) = self
                    .arbiter
                    .pending()
                    .map(PermissionRequest::to_review_request)
                else {
                    return Ok(());
                };
                let verdict = self.reviewer.review(&review_request).await;
                match self.arbiter.apply_review(&ticket, &verdict) {
                    ReviewApplication::AutoApproved(response) => self.send_response(response),
                    ReviewApplication::DialogRequired { reason } => {
                        self.review_reason = Some(reason);
                        Ok(())
                    }
                    ReviewApplication::Stale => Ok(()),
                }
            }
            IngestOutcome::DialogRequired | IngestOutcome::Dropped => Ok(()),
        }
    }

    pub fn allow_pending(&mut self, remember: bool) -> Result<bool> {
        self.review_reason = None;
        match self.arbiter.allow(remember) {
            Some(response) => {
                self.send_response(response)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn deny_pending(&mut self, message: Option<String>) -> Result<bool> {
        self.review_reason = None;
        match self.arbiter.deny(message) {
            Some(response) => {
                self.send_response(response)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn send_response(&mut self, response: PermissionResponse) -> Result<()> {
        match response.channel() {
            ResponseChannel::Stream => self
                .transport
                .send_control(&response.control_message())
                .context("failed to send permission response"),
            ResponseChannel::File => {
                let Some(channel) = self.file_channel.as_ref() else {
                    bail!("no permission file channel for this session");
                };
                channel.write_response(response.allow, response.message.as_deref())
            }
        }
    }
}
