use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::collections::VecDeque;
use tracing::debug;

use crate::error::{ChatError, Result};
use crate::models::{StreamChunk, StreamFragment};

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";

pub type LineStream = BoxStream<'static, Result<String>>;
pub type FragmentStream = BoxStream<'static, Result<StreamFragment>>;

struct LineSplitter<B> {
    inner: BoxStream<'static, Result<B>>,
    buffer: Vec<u8>,
    ready: VecDeque<String>,
    finished: bool,
}

impl<B> LineSplitter<B> {
    fn drain_complete_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let rest = self.buffer.split_off(pos + 1);
            let line = std::mem::replace(&mut self.buffer, rest);
            self.ready.push_back(to_line(&line));
        }
    }
}

fn to_line(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    text.trim_end_matches(['\n', '\r']).to_string()
}

/// Re-chunks a byte stream into lines. Splitting happens on raw bytes so a
/// multi-byte character spanning two chunks survives intact. A trailing
/// line without a newline is still emitted when the body ends.
pub fn lines<S, B, E>(bytes: S) -> LineStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<ChatError> + 'static,
{
    let splitter = LineSplitter {
        inner: bytes.map(|chunk| chunk.map_err(Into::into)).boxed(),
        buffer: Vec::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    stream::unfold(splitter, |mut st| async move {
        loop {
            if let Some(line) = st.ready.pop_front() {
                return Some((Ok(line), st));
            }
            if st.finished {
                return None;
            }
            match st.inner.next().await {
                Some(Ok(chunk)) => {
                    st.buffer.extend_from_slice(chunk.as_ref());
                    st.drain_complete_lines();
                }
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(e), st));
                }
                None => {
                    st.finished = true;
                    if !st.buffer.is_empty() {
                        let tail = std::mem::take(&mut st.buffer);
                        st.ready.push_back(to_line(&tail));
                    }
                }
            }
        }
    })
    .boxed()
}

/// Incremental decoder for `data: {...}` event lines.
///
/// Holds the running text of one decode session. Lines that are blank, lack
/// the data prefix, carry the done sentinel, or fail to parse yield nothing.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    accumulated: String,
    skipped: usize,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode_line(&mut self, line: &str) -> Option<StreamFragment> {
        let line = line.trim_end();
        let payload = line.strip_prefix(DATA_PREFIX)?.trim();
        if payload.is_empty() || payload == DONE_SENTINEL {
            return None;
        }

        let chunk = match serde_json::from_str::<StreamChunk>(payload) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.skipped += 1;
                debug!("Skipping malformed stream line: {}", e);
                return None;
            }
        };

        let choice = chunk.choices.into_iter().next()?;
        let text = choice.delta.content.unwrap_or_default();
        if text.is_empty() && choice.finish_reason.is_none() {
            return None;
        }

        self.accumulated.push_str(&text);
        Some(StreamFragment {
            text,
            finish_reason: choice.finish_reason,
        })
    }

    /// Everything decoded so far.
    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    /// Number of data lines dropped as malformed.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn into_text(self) -> String {
        self.accumulated
    }
}

/// Lazily decodes a line stream into fragments, in arrival order.
///
/// Ends when the lines end; a failed line read is passed through and ends
/// the stream. Dropping the returned stream drops the underlying body.
pub fn decode(lines: LineStream) -> FragmentStream {
    stream::unfold(
        (lines, StreamDecoder::new(), false),
        |(mut lines, mut decoder, failed)| async move {
            if failed {
                return None;
            }
            loop {
                match lines.next().await {
                    Some(Ok(line)) => {
                        if let Some(fragment) = decoder.decode_line(&line) {
                            return Some((Ok(fragment), (lines, decoder, false)));
                        }
                    }
                    Some(Err(e)) => return Some((Err(e), (lines, decoder, true))),
                    None => {
                        debug!(
                            chars = decoder.accumulated().len(),
                            skipped = decoder.skipped(),
                            "Stream finished"
                        );
                        return None;
                    }
                }
            }
        },
    )
    .boxed()
}
