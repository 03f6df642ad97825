//! Streaming session processor.
//!
//! Consumes the newline-delimited generation stream, accumulates content
//! and generated files, forwards incremental events to the caller, and
//! guarantees usage-based billing is deducted exactly once per session
//! despite multiple completion signals and network failure.

use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::types::{is_terminal_sentinel, GenerateRequest};
use crate::api::{ApiClient, ChatExchange, StreamEvent, TokenUsage};
use crate::context::ContextPort;
use crate::error::StreamError;
use crate::progress::FileState;

use super::billing::{BillingPort, BillingStatus, DeductionGuard};
use super::complexity::{classify_instruction, model_for};

/// Cancellation handle shared between the caller and the read loop.
///
/// Triggering it aborts the pending read on the next suspension point,
/// which is the sole cancellation point in the whole pipeline.
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the handle has been cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender dropped without cancelling; never resolves.
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Incremental notifications forwarded to the caller during a session.
#[derive(Debug, Clone)]
pub enum ProcessorEvent {
    Connected,
    Progress {
        percent: Option<u8>,
        message: Option<String>,
    },
    Delta(String),
    /// Per-file detection states, for the phase tracker.
    FileStates(HashMap<String, FileState>),
    ToolActivity(String),
    Completed,
    Failed(String),
    CancelledByUser,
}

/// Mutable state of one generation session.
#[derive(Debug)]
pub struct GenerationSession {
    pub id: String,
    pub model: String,
    pub accumulated: String,
    pub files: HashMap<String, String>,
    pub usage: Option<TokenUsage>,
    /// Advances once, on the first successful deduction.
    pub deduction_processed: bool,
    pub billing: BillingStatus,
}

impl GenerationSession {
    fn new(model: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            model,
            accumulated: String::new(),
            files: HashMap::new(),
            usage: None,
            deduction_processed: false,
            billing: BillingStatus::Skipped("no usage record".into()),
        }
    }

    fn into_result(self) -> FinalResult {
        FinalResult {
            session_id: self.id,
            model: self.model,
            content: self.accumulated,
            files: self.files,
            usage: self.usage,
            billing: self.billing,
        }
    }
}

/// Final outcome of a completed session.
#[derive(Debug)]
pub struct FinalResult {
    pub session_id: String,
    pub model: String,
    pub content: String,
    pub files: HashMap<String, String>,
    pub usage: Option<TokenUsage>,
    pub billing: BillingStatus,
}

/// Options for one submission.
#[derive(Debug, Default)]
pub struct SubmitOptions {
    /// Explicit model override; otherwise complexity-based selection.
    pub model: Option<String>,
    pub project_id: Option<String>,
}

/// Orchestrates one generation stream at a time.
///
/// Collaborators are injected at construction: the billing port and the
/// billing-context provider are narrow interfaces so the processor never
/// reaches for ambient state.
pub struct GenerationProcessor {
    api: ApiClient,
    base_url: String,
    access_token: String,
    billing: Arc<dyn BillingPort>,
    context: Arc<dyn ContextPort>,
    guard: DeductionGuard,
}

impl GenerationProcessor {
    pub fn new(
        base_url: String,
        access_token: String,
        billing: Arc<dyn BillingPort>,
        context: Arc<dyn ContextPort>,
    ) -> Self {
        Self {
            api: ApiClient::new(None),
            base_url,
            access_token,
            billing,
            context,
            guard: DeductionGuard::new(),
        }
    }

    /// Submit an instruction plus filtered prior context and consume the
    /// resulting stream to completion.
    ///
    /// Billing failure never hides a successful generation: the result is
    /// returned with a `Failed` billing status instead.
    pub async fn submit<F>(
        &mut self,
        instruction: &str,
        chat_history: Vec<ChatExchange>,
        opts: SubmitOptions,
        cancel: CancelHandle,
        mut on_event: F,
    ) -> Result<FinalResult, StreamError>
    where
        F: FnMut(ProcessorEvent),
    {
        let complexity = classify_instruction(instruction);
        let model = opts
            .model
            .unwrap_or_else(|| model_for(complexity).to_string());
        info!(
            complexity = complexity.as_str(),
            model,
            session = self.api.session_id(),
            "Submitting generation request"
        );

        let mut session = GenerationSession::new(model.clone());
        let request = GenerateRequest {
            message: instruction.to_string(),
            chat_history,
            model: Some(model),
            project_id: opts.project_id,
            session_id: session.id.clone(),
        };

        let response = self
            .api
            .open_stream(&self.base_url, &self.access_token, &request)
            .await
            .map_err(|e| StreamError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(StreamError::Network(format!(
                "backend returned {}: {}",
                status, text
            )));
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // Usage captured before cancellation may still be
                    // billed; nothing else is.
                    if session.usage.is_some() {
                        self.attempt_deduction(&mut session, false, "generation-cancelled")
                            .await;
                    }
                    on_event(ProcessorEvent::CancelledByUser);
                    return Err(StreamError::Cancelled);
                }
                chunk = stream.next() => {
                    match chunk {
                        Some(Ok(bytes)) => {
                            buffer.push_str(&String::from_utf8_lossy(&bytes));
                            while let Some(pos) = buffer.find('\n') {
                                let record = buffer[..pos].trim().to_string();
                                buffer.drain(..=pos);
                                self.handle_record(&mut session, &record, &mut on_event)
                                    .await?;
                            }
                        }
                        Some(Err(e)) => {
                            return Err(StreamError::Network(format!(
                                "stream read failed: {}",
                                e
                            )));
                        }
                        None => break,
                    }
                }
            }
        }

        let tail = buffer.trim().to_string();
        if !tail.is_empty() {
            self.handle_record(&mut session, &tail, &mut on_event)
                .await?;
        }

        // Natural stream end: last deduction point, estimation allowed.
        self.attempt_deduction(&mut session, true, "generation")
            .await;

        Ok(session.into_result())
    }

    /// Process one raw record from the stream. Malformed records are
    /// logged and skipped; the stream continues.
    async fn handle_record<F>(
        &mut self,
        session: &mut GenerationSession,
        record: &str,
        on_event: &mut F,
    ) -> Result<(), StreamError>
    where
        F: FnMut(ProcessorEvent),
    {
        if record.is_empty() {
            return Ok(());
        }

        if is_terminal_sentinel(record) {
            // Safety net in case the complete event's usage was dropped
            // in transit.
            self.attempt_deduction(session, true, "generation").await;
            return Ok(());
        }

        let event = match serde_json::from_str::<StreamEvent>(record) {
            Ok(event) => event,
            Err(e) => {
                // Protocol errors are non-fatal: log and keep reading.
                let err = StreamError::Protocol(e.to_string());
                warn!(error = %err, "Skipping malformed stream record");
                return Ok(());
            }
        };

        match event {
            StreamEvent::Connected { .. } => on_event(ProcessorEvent::Connected),
            StreamEvent::Progress {
                progress,
                message,
                files,
            } => {
                on_event(ProcessorEvent::Progress {
                    percent: progress,
                    message,
                });
                if let Some(states) = files {
                    on_event(ProcessorEvent::FileStates(parse_file_states(&states)));
                }
            }
            StreamEvent::ContentDelta { content } => {
                if let Some(delta) = content {
                    session.accumulated.push_str(&delta);
                    on_event(ProcessorEvent::Delta(delta));
                }
            }
            StreamEvent::Complete {
                files,
                usage,
                session_data,
            } => {
                if let Some(files) = files {
                    session.files = files;
                }
                if let Some(usage) = usage {
                    session.usage = Some(usage);
                }
                if let Some(meta) = session_data {
                    if let Some(id) = meta.id {
                        session.id = id;
                    }
                    if let Some(model) = meta.model {
                        session.model = model;
                    }
                }
                self.attempt_deduction(session, false, "generation").await;
                on_event(ProcessorEvent::Completed);
            }
            StreamEvent::Error { message } => {
                let reason = message.unwrap_or_else(|| "backend reported an error".to_string());
                on_event(ProcessorEvent::Failed(reason.clone()));
                return Err(StreamError::Network(reason));
            }
            StreamEvent::ToolUseStart { message, files }
            | StreamEvent::ToolExecuting { message, files }
            | StreamEvent::ToolResult { message, files } => {
                if let Some(text) = message {
                    on_event(ProcessorEvent::ToolActivity(text));
                }
                if let Some(states) = files {
                    on_event(ProcessorEvent::FileStates(parse_file_states(&states)));
                }
            }
        }

        Ok(())
    }

    /// Attempt the billing deduction, at most once per session.
    ///
    /// Deduction is skipped (not failed) when the billing context is
    /// incomplete or no usage is available. A failed attempt releases the
    /// guard key so a later attempt point in the same session may retry.
    async fn attempt_deduction(
        &mut self,
        session: &mut GenerationSession,
        allow_estimate: bool,
        operation: &str,
    ) {
        if session.deduction_processed {
            return;
        }

        let Some(ctx) = self.context.billing_context() else {
            debug!("Billing context unavailable; deduction skipped");
            session.billing = BillingStatus::Skipped("billing context unavailable".into());
            return;
        };

        let usage = match session.usage {
            Some(usage) => usage,
            None if allow_estimate && !session.accumulated.is_empty() => {
                let estimated =
                    TokenUsage::estimate_from_chars(session.accumulated.chars().count());
                warn!(
                    total_tokens = estimated.total_tokens,
                    "Backend omitted usage record; billing estimated usage"
                );
                session.usage = Some(estimated);
                estimated
            }
            None => return,
        };

        let key = DeductionGuard::key(&ctx, usage.total_tokens, &session.model, chrono::Utc::now());
        if !self.guard.begin(&key) {
            return;
        }

        let response = self
            .billing
            .deduct(&ctx, usage, &session.model, operation)
            .await;

        if response.success {
            session.deduction_processed = true;
            session.billing = BillingStatus::Deducted {
                units: response.units_deducted,
                remaining_balance: response.remaining_balance,
            };
            info!(
                total_tokens = usage.total_tokens,
                units = ?response.units_deducted,
                cost = ?response.dollar_cost,
                "Usage deducted"
            );
        } else {
            self.guard.release(&key);
            let reason = response
                .error
                .unwrap_or_else(|| "deduction rejected".to_string());
            warn!(
                error = %reason,
                "Billing deduction failed; generation result is still delivered"
            );
            session.billing = BillingStatus::Failed(reason);
        }
    }
}

fn parse_file_states(raw: &HashMap<String, String>) -> HashMap<String, FileState> {
    let mut states = HashMap::new();
    for (path, value) in raw {
        match FileState::parse(value) {
            Some(state) => {
                states.insert(path.clone(), state);
            }
            None => debug!(%path, %value, "Ignoring unknown file state"),
        }
    }
    states
}
