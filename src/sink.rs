use tokio::sync::mpsc;
use tracing::debug;

/// Receiver of exchange progress. Called in strict arrival order.
pub trait PresentationSink: Send {
    fn on_fragment(&mut self, text: &str);
    fn on_complete(&mut self, full_text: &str);
    fn on_error(&mut self, description: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Fragment(String),
    Complete(String),
    Error(String),
}

/// Collects events in memory.
impl PresentationSink for Vec<SessionEvent> {
    fn on_fragment(&mut self, text: &str) {
        self.push(SessionEvent::Fragment(text.to_string()));
    }

    fn on_complete(&mut self, full_text: &str) {
        self.push(SessionEvent::Complete(full_text.to_string()));
    }

    fn on_error(&mut self, description: &str) {
        self.push(SessionEvent::Error(description.to_string()));
    }
}

/// Forwards events to another task, e.g. a UI loop.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            debug!("Presentation receiver dropped; discarding event");
        }
    }
}

impl PresentationSink for ChannelSink {
    fn on_fragment(&mut self, text: &str) {
        self.forward(SessionEvent::Fragment(text.to_string()));
    }

    fn on_complete(&mut self, full_text: &str) {
        self.forward(SessionEvent::Complete(full_text.to_string()));
    }

    fn on_error(&mut self, description: &str) {
        self.forward(SessionEvent::Error(description.to_string()));
    }
}
