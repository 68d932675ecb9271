use crate::client::ProxyClient;
use crate::error::ApiError;
use crate::protocol::{ChatEvent, CompletionRequest, Orchestrator, StreamUnit};
use crate::sse::{StreamSink, decode_stream};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<ChatEvent>>,
}

impl ChatMessage {
    fn user(content: String) -> Self {
        Self {
            role: Role::User,
            content,
            timestamp: Utc::now(),
            events: None,
        }
    }

    fn assistant(content: String, events: Vec<ChatEvent>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            timestamp: Utc::now(),
            events: Some(events),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub description: Option<String>,
}

/// Scratch state of the one stream in flight.
#[derive(Debug, Default, Clone)]
pub struct StreamingAccumulator {
    pub content: String,
    pub events: Vec<ChatEvent>,
}

#[derive(Default)]
struct ChatState {
    org_id: Option<String>,
    instance_id: Option<String>,
    orchestrators: Vec<Orchestrator>,
    messages: Vec<ChatMessage>,
    conversation_id: Option<String>,
    // `Some` exactly while a stream is in flight.
    stream: Option<StreamingAccumulator>,
    cancel: Option<CancellationToken>,
    notifications: Vec<Notification>,
}

impl ChatState {
    fn notify(&mut self, level: NotificationLevel, title: &str, description: Option<String>) {
        self.notifications.push(Notification {
            level,
            title: title.to_string(),
            description,
        });
    }
}

/// One chat conversation against a selected orchestrator.
///
/// Only one send may stream at a time; a second send while streaming is
/// rejected with [`ApiError::Busy`].
pub struct ChatSession {
    client: ProxyClient,
    state: Mutex<ChatState>,
    units: broadcast::Sender<StreamUnit>,
}

impl ChatSession {
    pub fn new(client: ProxyClient) -> Self {
        let (units, _) = broadcast::channel(256);
        Self {
            client,
            state: Mutex::new(ChatState::default()),
            units,
        }
    }

    pub fn set_org(&self, org_id: impl Into<String>) {
        self.lock().org_id = Some(org_id.into());
    }

    pub fn select_instance(&self, instance_id: impl Into<String>) {
        self.lock().instance_id = Some(instance_id.into());
    }

    pub fn selected_instance(&self) -> Option<String> {
        self.lock().instance_id.clone()
    }

    /// Live view of decoded units for whoever renders the stream.
    pub fn subscribe(&self) -> broadcast::Receiver<StreamUnit> {
        self.units.subscribe()
    }

    pub async fn load_orchestrators(&self) -> Result<Vec<Orchestrator>, ApiError> {
        let Some(org_id) = self.lock().org_id.clone() else {
            return Ok(Vec::new());
        };

        match self.client.orchestrators(&org_id).await {
            Ok(orchestrators) => {
                self.lock().orchestrators = orchestrators.clone();
                Ok(orchestrators)
            }
            Err(err) => {
                self.lock().notify(
                    NotificationLevel::Error,
                    "Failed to load orchestrators",
                    Some(err.description()),
                );
                Err(err)
            }
        }
    }

    /// Sends `message` and streams the reply into the transcript.
    ///
    /// The user message is appended immediately. The assistant message is
    /// appended once, after the stream ends successfully. Every exit path
    /// clears the accumulator.
    pub async fn send(&self, message: impl Into<String>) -> Result<(), ApiError> {
        let message = message.into();
        let (org_id, request, cancel) = {
            let mut state = self.lock();
            let (Some(org_id), Some(instance_id)) = (state.org_id.clone(), state.instance_id.clone())
            else {
                state.notify(NotificationLevel::Warning, "Select an orchestrator first", None);
                return Err(ApiError::Validation(
                    "select an orchestrator first".to_string(),
                ));
            };
            if state.stream.is_some() {
                state.notify(
                    NotificationLevel::Warning,
                    "Wait for the current reply to finish",
                    None,
                );
                return Err(ApiError::Busy);
            }

            state.messages.push(ChatMessage::user(message.clone()));
            state.stream = Some(StreamingAccumulator::default());
            let cancel = CancellationToken::new();
            state.cancel = Some(cancel.clone());

            let request = CompletionRequest {
                instance_id,
                message,
                conversation_id: state.conversation_id.clone(),
            };
            (org_id, request, cancel)
        };

        let guard = StreamGuard {
            session: self,
            armed: true,
        };
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ApiError::Cancelled),
            result = self.run_stream(&org_id, &request) => result,
        };
        guard.finish(&outcome);
        outcome
    }

    /// Aborts the in-flight stream, if any. Nothing is appended for it.
    pub fn cancel(&self) -> bool {
        match self.lock().cancel.take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Resets the transcript and conversation, cancelling any stream still
    /// in flight.
    pub fn clear(&self) {
        let mut state = self.lock();
        if let Some(token) = state.cancel.take() {
            token.cancel();
        }
        state.messages.clear();
        state.conversation_id = None;
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.lock().messages.clone()
    }

    pub fn conversation_id(&self) -> Option<String> {
        self.lock().conversation_id.clone()
    }

    pub fn is_streaming(&self) -> bool {
        self.lock().stream.is_some()
    }

    /// Snapshot of the in-flight accumulator; `None` when idle.
    pub fn current_stream(&self) -> Option<StreamingAccumulator> {
        self.lock().stream.clone()
    }

    pub fn orchestrators(&self) -> Vec<Orchestrator> {
        self.lock().orchestrators.clone()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.lock().notifications.clone()
    }

    pub fn take_notifications(&self) -> Vec<Notification> {
        std::mem::take(&mut self.lock().notifications)
    }

    async fn run_stream(&self, org_id: &str, request: &CompletionRequest) -> Result<(), ApiError> {
        let bytes = self.client.open_completion_stream(org_id, request).await?;
        let mut sink = SessionSink { session: self };
        decode_stream(bytes, &mut sink).await
    }

    fn lock(&self) -> MutexGuard<'_, ChatState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Resets the streaming state if `send` is dropped before it finishes.
struct StreamGuard<'a> {
    session: &'a ChatSession,
    armed: bool,
}

impl StreamGuard<'_> {
    fn finish(mut self, outcome: &Result<(), ApiError>) {
        self.armed = false;
        let mut state = self.session.lock();
        let accumulator = state.stream.take().unwrap_or_default();
        state.cancel = None;

        match outcome {
            Ok(()) => {
                debug!(
                    chars = accumulator.content.len(),
                    events = accumulator.events.len(),
                    "reply complete"
                );
                state
                    .messages
                    .push(ChatMessage::assistant(accumulator.content, accumulator.events));
            }
            Err(ApiError::Cancelled) => {
                state.notify(NotificationLevel::Info, "Reply cancelled", None);
            }
            Err(err) => {
                warn!(error = %err, "chat stream failed");
                state.notify(NotificationLevel::Error, "Chat error", Some(err.description()));
            }
        }
    }
}

impl Drop for StreamGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.session.lock();
        state.stream = None;
        state.cancel = None;
    }
}

struct SessionSink<'a> {
    session: &'a ChatSession,
}

impl SessionSink<'_> {
    fn broadcast(&self, unit: StreamUnit) {
        // No subscribers is fine.
        let _ = self.session.units.send(unit);
    }
}

impl StreamSink for SessionSink<'_> {
    fn on_content(&mut self, chunk: String) {
        if let Some(stream) = self.session.lock().stream.as_mut() {
            stream.content.push_str(&chunk);
        }
        self.broadcast(StreamUnit::Content(chunk));
    }

    fn on_event(&mut self, event: ChatEvent) {
        if let Some(stream) = self.session.lock().stream.as_mut() {
            stream.events.push(event.clone());
        }
        self.broadcast(StreamUnit::Event(event));
    }

    fn on_session_id(&mut self, id: String) {
        {
            let mut state = self.session.lock();
            match state.conversation_id.as_deref() {
                None => state.conversation_id = Some(id.clone()),
                Some(current) if current != id => {
                    debug!(current, announced = %id, "keeping existing conversation id");
                }
                Some(_) => {}
            }
        }
        self.broadcast(StreamUnit::SessionId(id));
    }
}
