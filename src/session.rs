use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{ChatError, Result};
use crate::memory::ConversationMemory;
use crate::models::{CompletionRequest, CompletionResponse, ExchangeRecord};
use crate::prompt::PromptAssembler;
use crate::retriever::Retriever;
use crate::sink::PresentationSink;
use crate::stream::{self, LineStream};
use crate::transport::{CompletionTransport, TransportResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Sending,
    Streaming,
    Failed,
}

/// Drives one conversation: prompt assembly, the streaming request, fragment
/// delivery, and memory updates.
///
/// Every operation takes `&mut self`, so a controller never has two exchanges
/// in flight. Memory only changes after an exchange completes successfully.
pub struct SessionController {
    transport: Arc<dyn CompletionTransport>,
    retriever: Arc<dyn Retriever>,
    assembler: PromptAssembler,
    memory: ConversationMemory,
    exchanges: Vec<ExchangeRecord>,
    state: SessionState,
    model: String,
    temperature: f64,
}

impl SessionController {
    pub fn new(
        transport: Arc<dyn CompletionTransport>,
        retriever: Arc<dyn Retriever>,
        assembler: PromptAssembler,
        model: impl Into<String>,
        temperature: f64,
    ) -> Self {
        Self {
            transport,
            retriever,
            assembler,
            memory: ConversationMemory::new(),
            exchanges: Vec::new(),
            state: SessionState::Idle,
            model: model.into(),
            temperature,
        }
    }

    pub fn from_config(
        cfg: &Config,
        transport: Arc<dyn CompletionTransport>,
        retriever: Arc<dyn Retriever>,
    ) -> Self {
        Self::new(
            transport,
            retriever,
            PromptAssembler::new(cfg.session.system_prompt.clone(), cfg.session.memory_window),
            cfg.completion.model.clone(),
            cfg.completion.temperature,
        )
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub fn exchanges(&self) -> &[ExchangeRecord] {
        &self.exchanges
    }

    pub fn clear_memory(&mut self) {
        info!(entries = self.memory.len(), "Clearing conversation memory");
        self.memory.clear();
    }

    /// Submit user input as a streaming exchange.
    pub async fn send(&mut self, text: &str, sink: &mut dyn PresentationSink) -> ExchangeRecord {
        self.send_with_cancel(text, sink, &CancellationToken::new())
            .await
    }

    /// Like [`send`](Self::send), but stops as soon as `cancel` fires. The
    /// response body is dropped and nothing is committed to memory.
    pub async fn send_with_cancel(
        &mut self,
        text: &str,
        sink: &mut dyn PresentationSink,
        cancel: &CancellationToken,
    ) -> ExchangeRecord {
        let record = ExchangeRecord::new(text);
        let id = record.id;
        info!(exchange = %id, "Starting exchange");
        self.exchanges.push(record);
        let index = self.exchanges.len() - 1;
        self.state = SessionState::Sending;

        let mut guard = InFlight::new(self, Some(index));
        let outcome = guard
            .session
            .stream_exchange(index, text, sink, cancel)
            .await;
        guard.armed = false;
        let session = &mut *guard.session;

        let record = &mut session.exchanges[index];
        record.in_flight = false;
        match outcome {
            Ok(full_text) => {
                session.memory.append(text, &full_text);
                session.state = SessionState::Idle;
                info!(exchange = %id, chars = full_text.len(), "Exchange completed");
                sink.on_complete(&full_text);
            }
            Err(e) => {
                let description = e.to_string();
                warn!(exchange = %id, "Exchange failed: {}", description);
                record.error = Some(description.clone());
                session.state = SessionState::Failed;
                sink.on_error(&description);
            }
        }
        record.clone()
    }

    /// Drop the given exchange from the log and resubmit its input as a
    /// brand-new exchange. `None` if no such exchange exists.
    pub async fn retry(
        &mut self,
        exchange_id: Uuid,
        sink: &mut dyn PresentationSink,
    ) -> Option<ExchangeRecord> {
        let pos = self.exchanges.iter().position(|r| r.id == exchange_id)?;
        let previous = self.exchanges.remove(pos);
        info!(exchange = %exchange_id, "Retrying exchange");
        Some(self.send(&previous.input, sink).await)
    }

    /// Retry the most recent failed exchange, if any.
    pub async fn retry_last_failed(
        &mut self,
        sink: &mut dyn PresentationSink,
    ) -> Option<ExchangeRecord> {
        let id = self.exchanges.iter().rev().find(|r| r.is_failed())?.id;
        self.retry(id, sink).await
    }

    /// Non-streaming exchange. Returns the whole response text and commits
    /// it to memory on success.
    pub async fn complete(&mut self, text: &str) -> Result<String> {
        self.state = SessionState::Sending;

        let mut guard = InFlight::new(self, None);
        let request = guard.session.build_request(text, false).await;
        let outcome = match guard.session.transport.send(&request).await {
            Ok(TransportResponse::Completion(response)) => Ok(completion_text(response)),
            Ok(TransportResponse::Stream(lines)) => collect_text(lines).await,
            Err(e) => Err(e),
        };
        guard.armed = false;
        let session = &mut *guard.session;

        match outcome {
            Ok(response_text) => {
                session.memory.append(text, &response_text);
                session.state = SessionState::Idle;
                Ok(response_text)
            }
            Err(e) => {
                warn!("Completion failed: {}", e);
                session.state = SessionState::Failed;
                Err(e)
            }
        }
    }

    async fn build_request(&self, text: &str, stream: bool) -> CompletionRequest {
        let messages = self
            .assembler
            .assemble(text, &self.memory, self.retriever.as_ref())
            .await;
        CompletionRequest {
            model: self.model.clone(),
            temperature: self.temperature,
            messages,
            stream,
        }
    }

    async fn stream_exchange(
        &mut self,
        index: usize,
        text: &str,
        sink: &mut dyn PresentationSink,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let request = self.build_request(text, true).await;

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChatError::Cancelled),
            response = self.transport.send(&request) => response?,
        };

        let lines = match response {
            TransportResponse::Stream(lines) => lines,
            TransportResponse::Completion(response) => {
                // Server ignored the stream flag; deliver the body as one fragment.
                let full_text = completion_text(response);
                self.state = SessionState::Streaming;
                self.exchanges[index].response.push_str(&full_text);
                if !full_text.is_empty() {
                    sink.on_fragment(&full_text);
                }
                return Ok(full_text);
            }
        };

        self.state = SessionState::Streaming;
        let mut fragments = stream::decode(lines);
        let mut accumulated = String::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Exchange cancelled mid-stream");
                    return Err(ChatError::Cancelled);
                }
                next = fragments.next() => next,
            };

            match next {
                Some(Ok(fragment)) => {
                    let record = &mut self.exchanges[index];
                    if fragment.finish_reason.is_some() {
                        record.finish_reason = fragment.finish_reason;
                    }
                    if fragment.text.is_empty() {
                        continue;
                    }
                    accumulated.push_str(&fragment.text);
                    record.response.push_str(&fragment.text);
                    sink.on_fragment(&fragment.text);
                }
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }

        Ok(accumulated)
    }
}

/// Marks the running exchange as cancelled if its future is dropped before
/// it settles, so no record stays in flight once the caller lets go.
struct InFlight<'a> {
    session: &'a mut SessionController,
    exchange: Option<usize>,
    armed: bool,
}

impl<'a> InFlight<'a> {
    fn new(session: &'a mut SessionController, exchange: Option<usize>) -> Self {
        Self {
            session,
            exchange,
            armed: true,
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(record) = self.exchange.and_then(|i| self.session.exchanges.get_mut(i)) {
            debug!(exchange = %record.id, "Exchange dropped before completion");
            record.in_flight = false;
            record.error = Some(ChatError::Cancelled.to_string());
        }
        self.session.state = SessionState::Failed;
    }
}

fn completion_text(response: CompletionResponse) -> String {
    if let Some(usage) = response.usage {
        debug!(
            prompt_tokens = ?usage.prompt_tokens,
            completion_tokens = ?usage.completion_tokens,
            total_tokens = ?usage.total_tokens,
            "Completion usage"
        );
    }
    response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .unwrap_or_default()
}

async fn collect_text(lines: LineStream) -> Result<String> {
    let mut fragments = stream::decode(lines);
    let mut text = String::new();
    while let Some(fragment) = fragments.next().await {
        text.push_str(&fragment?.text);
    }
    Ok(text)
}
