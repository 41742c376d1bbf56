pub mod config;
pub mod embeddings;
pub mod error;
pub mod memory;
pub mod models;
pub mod prompt;
pub mod retriever;
pub mod session;
pub mod sink;
pub mod stream;
pub mod transport;

use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::retriever::Retriever;
use crate::session::SessionController;
use crate::transport::HttpTransport;

pub use crate::error::ChatError;
pub use crate::models::{ExchangeRecord, Message, Role, RetrievedSnippet, StreamFragment};
pub use crate::session::SessionState;
pub use crate::sink::{ChannelSink, PresentationSink, SessionEvent};

/// Session talking to the configured completion endpoint over HTTP.
pub fn connect(cfg: &Config, retriever: Arc<dyn Retriever>) -> Result<SessionController> {
    let transport = Arc::new(HttpTransport::from_config(&cfg.completion)?);
    tracing::info!(
        model = %cfg.completion.model,
        url = %cfg.completion.api_url,
        "Completion transport ready"
    );
    Ok(SessionController::from_config(cfg, transport, retriever))
}
