//! Conversation controller for one task view.
//!
//! [`Conversation`] is the pure state: the transcript plus the rules for
//! submitting a turn and folding transport events. [`RunSession`] binds it to
//! a live [`RunTransport`] after loading the task's history.

use shared_types::{ChatMessage, Task};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::api::ApiClient;
use crate::error::Result;
use crate::reconcile::{reconcile, Transcript};
use crate::rehydrate::rehydrate;
use crate::transport::{run_endpoint, ReconnectPolicy, RunTransport, SendOutcome, TransportEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Input was blank after trimming
    Ignored,
    Sent,
    /// Appended locally but the socket was not open
    Dropped,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conversation {
    transcript: Transcript,
}

impl Conversation {
    pub fn new(history: Vec<ChatMessage>) -> Self {
        Self {
            transcript: Transcript::new(history),
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn generating(&self) -> bool {
        self.transcript.generating
    }

    /// Validate and append a user turn. Returns the text to put on the wire.
    ///
    /// The turn is appended even while a reply is streaming; a turn whose
    /// finish frame carried no main content leaves `generating` set.
    pub fn begin_submit(&mut self, input: &str) -> std::result::Result<String, SubmitOutcome> {
        let text = input.trim();
        if text.is_empty() {
            return Err(SubmitOutcome::Ignored);
        }
        self.transcript.push_user(text);
        Ok(text.to_string())
    }

    pub fn note_dropped(&mut self) {
        self.transcript
            .push_alert("Not connected; the message was not sent.");
    }

    /// Fold one transport event in; true when the view must be redrawn.
    pub fn apply(&mut self, event: TransportEvent) -> bool {
        match event {
            TransportEvent::Connected => false,
            TransportEvent::Update(update) => {
                let before = self.transcript.clone();
                self.transcript = reconcile(std::mem::take(&mut self.transcript), &update);
                self.transcript != before
            }
            TransportEvent::Disconnected => {
                // A turn cut off by the disconnect never finishes.
                let was_generating = self.transcript.generating;
                self.transcript.generating = false;
                was_generating
            }
            TransportEvent::GaveUp => {
                self.transcript.generating = false;
                self.transcript
                    .push_alert("Connection to the assistant was lost. Reopen the task to retry.");
                true
            }
        }
    }
}

pub struct RunSession {
    task: Task,
    conversation: Conversation,
    transport: RunTransport,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl RunSession {
    /// Load the task, mark its notifications read, rebuild history and connect.
    ///
    /// A state blob that fails to decode is logged and the view starts empty.
    pub async fn start(api: &ApiClient, task_id: &str, policy: ReconnectPolicy) -> Result<Self> {
        let task = api.get_task(task_id).await?;

        let messages = api.list_messages(Some(&task.id)).await?;
        for message in messages.iter().filter(|m| !m.read) {
            if let Err(e) = api.mark_message_read(&message.id).await {
                warn!(message_id = %message.id, error = %e, "failed to mark notification read");
            }
        }

        let history = match task.state.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(state) => rehydrate(state).unwrap_or_else(|e| {
                warn!(task_id = %task.id, error = %e, "could not restore conversation history");
                Vec::new()
            }),
            None => Vec::new(),
        };
        info!(task_id = %task.id, restored = history.len(), "opening task run");

        let url = run_endpoint(api.base_url(), &task.id)?;
        let (transport, events) =
            RunTransport::connect(url, api.token().map(ToString::to_string), policy);

        Ok(Self {
            task,
            conversation: Conversation::new(history),
            transport,
            events,
        })
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn transcript(&self) -> &Transcript {
        self.conversation.transcript()
    }

    pub fn transport(&self) -> &RunTransport {
        &self.transport
    }

    pub fn submit(&mut self, input: &str) -> SubmitOutcome {
        let text = match self.conversation.begin_submit(input) {
            Ok(text) => text,
            Err(outcome) => return outcome,
        };
        match self.transport.send(&text) {
            SendOutcome::Sent => SubmitOutcome::Sent,
            SendOutcome::Dropped => {
                self.conversation.note_dropped();
                SubmitOutcome::Dropped
            }
        }
    }

    /// Next transport event; `None` once the transport has stopped.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    pub fn handle_event(&mut self, event: TransportEvent) -> bool {
        self.conversation.apply(event)
    }

    pub async fn close(self) {
        self.transport.shutdown().await;
    }
}
