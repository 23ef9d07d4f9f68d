use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::collections::VecDeque;

use crate::utils::ColloquyError;

/// Splits a byte stream into text lines, buffering across chunk boundaries
///
/// Network reads rarely line up with frame boundaries, so partial lines are
/// held until their newline arrives. A trailing line without a newline is
/// emitted when the source ends. Blank lines are dropped.
pub fn lines<S>(source: S) -> BoxStream<'static, Result<String, ColloquyError>>
where
    S: Stream<Item = Result<Bytes, ColloquyError>> + Send + 'static,
{
    struct State<S> {
        source: S,
        buffer: Vec<u8>,
        ready: VecDeque<String>,
        finished: bool,
    }

    let state = State {
        source: Box::pin(source),
        buffer: Vec::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(line) = state.ready.pop_front() {
                return Some((Ok(line), state));
            }
            if state.finished {
                return None;
            }

            match state.source.next().await {
                Some(Ok(bytes)) => {
                    state.buffer.extend_from_slice(&bytes);
                    while let Some(pos) = state.buffer.iter().position(|b| *b == b'\n') {
                        let raw: Vec<u8> = state.buffer.drain(..=pos).collect();
                        push_line(&mut state.ready, &raw);
                    }
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(e), state));
                }
                None => {
                    state.finished = true;
                    let rest = std::mem::take(&mut state.buffer);
                    push_line(&mut state.ready, &rest);
                }
            }
        }
    })
    .boxed()
}

fn push_line(ready: &mut VecDeque<String>, raw: &[u8]) {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches(['\r', '\n']);
    if !line.trim().is_empty() {
        ready.push_back(line.to_string());
    }
}

/// One decoded frame of a backend's reply
#[derive(Debug, PartialEq)]
pub enum Frame {
    Chunk(String),
    /// The backend's explicit end-of-answer marker
    End,
}

/// Yield the chunks of a framed reply, requiring its end marker
///
/// A source that runs out before [`Frame::End`] was cut off mid-answer and
/// ends with a `Generation` error instead of passing for a complete reply.
pub fn until_end<S>(frames: S, backend: &'static str) -> BoxStream<'static, Result<String, ColloquyError>>
where
    S: Stream<Item = Result<Frame, ColloquyError>> + Send + 'static,
{
    stream::unfold(Some(frames.boxed()), move |state| async move {
        let mut frames = state?;
        match frames.next().await {
            Some(Ok(Frame::Chunk(text))) => Some((Ok(text), Some(frames))),
            Some(Ok(Frame::End)) => None,
            Some(Err(e)) => Some((Err(e), None)),
            None => Some((
                Err(ColloquyError::Generation(format!(
                    "{} reply ended before its completion marker",
                    backend
                ))),
                None,
            )),
        }
    })
    .boxed()
}

/// Extract the payload of an SSE `data:` line
///
/// Returns `None` for comments, event names and other non-data fields.
pub fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}
