//! Streaming relay
//!
//! Upstream chunks are read by a producer task and handed to the caller
//! through a bounded channel, so every chunk is forwarded as soon as it
//! arrives. Each chunk may be rewritten on its own; chunk boundaries are
//! never re-split.

use std::convert::Infallible;

use async_stream::stream;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

use crate::{
    pipeline::citations::{link_bare_urls, substitute_encoded_placeholders, SearchSource},
    proxy::{
        context::RequestContext,
        deadline::{Deadline, DeadlineGuard},
        dispatch::ByteStream,
    },
    routes::metrics::record_upstream_timeout,
};

/// Chunks buffered between the upstream reader and the caller
pub const STREAM_BUFFER_CHUNKS: usize = 16;

/// Per-chunk text rewrite applied while relaying
#[derive(Debug, Clone, Default)]
pub struct ChunkTransform {
    /// Wrap complete bare URLs in markdown links
    pub link_formatting: bool,
    /// Sources for `[citation:N]` placeholders
    pub sources: Option<Vec<SearchSource>>,
}

impl ChunkTransform {
    /// Whether applying this transform can ever change a chunk
    pub fn is_noop(&self) -> bool {
        !self.link_formatting && self.sources.as_ref().map_or(true, Vec::is_empty)
    }

    /// Rewrite one chunk. Non-UTF-8 or unchanged chunks are returned as-is.
    pub fn apply(&self, chunk: Bytes) -> Bytes {
        if self.is_noop() {
            return chunk;
        }
        let Ok(text) = std::str::from_utf8(&chunk) else {
            return chunk;
        };

        let mut current: Option<String> = None;

        if let Some(sources) = self.sources.as_deref().filter(|s| !s.is_empty()) {
            let sub = substitute_encoded_placeholders(text, sources);
            if sub.replaced > 0 {
                current = Some(sub.text.into_owned());
            }
        }

        if self.link_formatting {
            let input = current.as_deref().unwrap_or(text);
            let linked = link_bare_urls(input);
            if let std::borrow::Cow::Owned(linked) = linked {
                current = Some(linked);
            }
        }

        match current {
            Some(text) => Bytes::from(text),
            None => chunk,
        }
    }
}

/// Relay an upstream body to the caller chunk by chunk
///
/// The producer stops when upstream ends, fails, the deadline fires or the
/// caller goes away. Errors after the first byte end the stream cleanly; they
/// are logged but never surfaced as an error body. `guard` is released when
/// the producer finishes.
pub fn relay(
    ctx: RequestContext,
    mut upstream: ByteStream,
    transform: ChunkTransform,
    deadline: Deadline,
    guard: DeadlineGuard,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    let (tx, mut rx) = mpsc::channel::<Bytes>(STREAM_BUFFER_CHUNKS);

    tokio::spawn(async move {
        let _guard = guard;
        let mut chunks = 0usize;
        let mut bytes = 0usize;

        loop {
            tokio::select! {
                biased;
                _ = deadline.expired() => {
                    ctx.log_timeout();
                    record_upstream_timeout(ctx.provider);
                    break;
                }
                _ = tx.closed() => {
                    ctx.log_warning("Caller disconnected during stream");
                    break;
                }
                next = upstream.next() => match next {
                    Some(Ok(chunk)) => {
                        let chunk = transform.apply(chunk);
                        chunks += 1;
                        bytes += chunk.len();
                        if tx.send(chunk).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        ctx.log_error(&format!("Upstream stream error: {}", e));
                        break;
                    }
                    None => break,
                },
            }
        }

        metrics::counter!("courier_stream_chunks_total", "provider" => ctx.provider)
            .increment(chunks as u64);
        ctx.log_stream_ended(chunks, bytes);
    });

    stream! {
        while let Some(chunk) = rx.recv().await {
            yield Ok::<_, Infallible>(chunk);
        }
    }
}
