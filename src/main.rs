use anyhow::Result;
use colored::Colorize;
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use catalog_chat::config::Config;
use catalog_chat::embeddings::OpenAiEmbedder;
use catalog_chat::retriever::{NoRetrieval, Retriever, VectorIndex};
use catalog_chat::PresentationSink;

/// Prints fragments to stdout as they arrive.
struct TerminalSink;

impl PresentationSink for TerminalSink {
    fn on_fragment(&mut self, text: &str) {
        print!("{text}");
        let _ = std::io::stdout().flush();
    }

    fn on_complete(&mut self, _full_text: &str) {
        println!();
    }

    fn on_error(&mut self, description: &str) {
        println!();
        eprintln!("{} {}", "error:".red().bold(), description);
        eprintln!("{}", "Type /retry to send it again.".dimmed());
    }
}

/// Routes Ctrl-C: cancels the running reply if there is one, otherwise asks
/// the prompt loop to quit.
struct InterruptRouter {
    active: Mutex<Option<CancellationToken>>,
    quit: mpsc::UnboundedSender<()>,
}

impl InterruptRouter {
    fn new(quit: mpsc::UnboundedSender<()>) -> Self {
        Self {
            active: Mutex::new(None),
            quit,
        }
    }

    /// Registers a fresh token for the reply about to run.
    fn begin(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Ok(mut active) = self.active.lock() {
            *active = Some(token.clone());
        }
        token
    }

    fn finish(&self) {
        if let Ok(mut active) = self.active.lock() {
            *active = None;
        }
    }

    fn interrupt(&self) {
        let running = self.active.lock().ok().and_then(|mut active| active.take());
        match running {
            Some(token) => token.cancel(),
            None => {
                let _ = self.quit.send(());
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so streamed text on stdout stays clean
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load();
    let retriever = build_retriever(&config).await;
    let mut session = catalog_chat::connect(&config, retriever)?;
    let mut sink = TerminalSink;

    eprintln!(
        "{}",
        "Commands: /retry, /clear, /quit. Ctrl-C cancels a running reply, or quits at the prompt."
            .dimmed()
    );

    let (quit_tx, mut quit_rx) = mpsc::unbounded_channel();
    let router = Arc::new(InterruptRouter::new(quit_tx));
    {
        let router = Arc::clone(&router);
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                router.interrupt();
            }
        });
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", ">".cyan().bold());
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = quit_rx.recv() => {
                println!();
                None
            }
        };
        let Some(line) = line else {
            break;
        };

        match line.trim() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/clear" => {
                session.clear_memory();
                eprintln!("{}", "Memory cleared.".dimmed());
            }
            "/retry" => {
                let cancel = router.begin();
                let outcome = tokio::select! {
                    retried = session.retry_last_failed(&mut sink) => Some(retried),
                    _ = cancel.cancelled() => None,
                };
                router.finish();
                match outcome {
                    Some(Some(_)) => {}
                    Some(None) => eprintln!("{}", "Nothing to retry.".dimmed()),
                    None => sink.on_error("Request cancelled"),
                }
            }
            text => {
                let cancel = router.begin();
                session.send_with_cancel(text, &mut sink, &cancel).await;
                router.finish();
            }
        }
    }

    tracing::info!("Session closed");
    Ok(())
}

async fn build_retriever(config: &Config) -> Arc<dyn Retriever> {
    let retrieval = &config.retrieval;
    if !retrieval.enabled {
        tracing::info!("Retrieval disabled");
        return Arc::new(NoRetrieval);
    }
    let Some(path) = retrieval.documents_path.as_deref() else {
        tracing::info!("No documents configured - running without retrieval");
        return Arc::new(NoRetrieval);
    };

    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) => {
            tracing::warn!("Failed to read documents from {}: {} - running without retrieval", path, e);
            return Arc::new(NoRetrieval);
        }
    };

    let embedder = OpenAiEmbedder::new(&config.completion.api_key, &retrieval.embedding_model);
    let index = VectorIndex::new(embedder, retrieval.top_k, retrieval.similarity_threshold);

    for (n, document) in contents.lines().filter(|l| !l.trim().is_empty()).enumerate() {
        let metadata = HashMap::from([("source".to_string(), path.to_string())]);
        if let Err(e) = index.add_item(format!("id{}", n + 1), document, metadata).await {
            tracing::warn!("Failed to index document {}: {}", n + 1, e);
        }
    }

    if index.is_empty().await {
        tracing::warn!("No documents indexed - running without retrieval");
        return Arc::new(NoRetrieval);
    }
    tracing::info!("Indexed {} documents from {}", index.len().await, path);
    Arc::new(index)
}
