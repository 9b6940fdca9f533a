//! Server-sent events line parser shared by the provider clients.
//!
//! Splits an upstream byte stream into lines and yields the payload of every
//! `data:` line. Comments, `event:` and `id:` lines are skipped; provider
//! payloads carry their own type tags.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;

use super::error::LLMError;

/// Stream of raw `data:` payloads.
pub struct SseDataStream<S> {
    inner: S,
    buffer: Vec<u8>,
    finished: bool,
}

impl<S> SseDataStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            finished: false,
        }
    }

    fn take_line(&mut self) -> Option<Vec<u8>> {
        let end = self.buffer.iter().position(|b| *b == b'\n')?;
        Some(self.buffer.drain(..=end).collect())
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim_end_matches(['\r', '\n']);
    line.strip_prefix("data:")
        .map(|data| data.strip_prefix(' ').unwrap_or(data).to_string())
}

impl<S> Stream for SseDataStream<S>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Unpin,
{
    type Item = Result<String, LLMError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            // Lines are split on raw bytes so multi-byte characters survive chunk boundaries
            if let Some(line) = self.take_line() {
                if let Some(data) = data_payload(&line) {
                    return Poll::Ready(Some(Ok(data)));
                }
                continue;
            }

            if self.finished {
                if self.buffer.is_empty() {
                    return Poll::Ready(None);
                }
                let rest = std::mem::take(&mut self.buffer);
                if let Some(data) = data_payload(&rest) {
                    return Poll::Ready(Some(Ok(data)));
                }
                return Poll::Ready(None);
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => self.buffer.extend_from_slice(&bytes),
                Poll::Ready(Some(Err(e))) => {
                    self.finished = true;
                    self.buffer.clear();
                    return Poll::Ready(Some(Err(LLMError::Request(e))));
                }
                Poll::Ready(None) => self.finished = true,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
