//! Streaming generation output
//!
//! A [`FragmentStream`] is a lazy, finite, non-restartable sequence of text
//! fragments. It owns whatever holds the transport connection open (for the
//! HTTP adapters, the `reqwest::Response` captured inside the inner stream).
//!
//! The connection is released as soon as any of these happens:
//! - the inner stream ends,
//! - the inner stream yields an error (the stream is fused afterwards),
//! - the consumer drops the stream before it is exhausted.
//!
//! An optional release hook runs exactly once at that point.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::{self, Stream};

use crate::provider::ProviderError;

type Fragments = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;
type ReleaseHook = Box<dyn FnOnce() + Send>;

/// Incremental text output of a streaming generation
pub struct FragmentStream {
    inner: Fragments,
    release: Option<ReleaseHook>,
    finished: bool,
}

impl FragmentStream {
    /// Wrap a stream of fragments
    pub fn new<S>(inner: S) -> Self
    where
        S: Stream<Item = Result<String, ProviderError>> + Send + 'static,
    {
        Self {
            inner: Box::pin(inner),
            release: None,
            finished: false,
        }
    }

    /// A stream over fixed fragments, mostly useful in tests
    pub fn from_fragments<I>(fragments: I) -> Self
    where
        I: IntoIterator<Item = String>,
        I::IntoIter: Send + 'static,
    {
        Self::new(stream::iter(fragments.into_iter().map(Ok)))
    }

    /// Register a hook that runs once when the underlying connection is released
    pub fn on_release<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.release = Some(Box::new(hook));
        self
    }

    /// Whether the stream has ended (exhausted, failed, or released)
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Drain the remaining fragments into one string
    pub async fn collect_text(mut self) -> Result<String, ProviderError> {
        use futures::StreamExt;

        let mut text = String::new();
        while let Some(fragment) = self.next().await {
            text.push_str(&fragment?);
        }
        Ok(text)
    }

    fn release(&mut self) {
        if !self.finished {
            self.finished = true;
            // Dropping the inner stream drops the response it owns.
            self.inner = Box::pin(stream::empty());
        }
        if let Some(hook) = self.release.take() {
            hook();
        }
    }
}

impl Stream for FragmentStream {
    type Item = Result<String, ProviderError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        let polled = this.inner.as_mut().poll_next(cx);
        match polled {
            Poll::Ready(None) => {
                this.release();
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(e))) => {
                this.release();
                Poll::Ready(Some(Err(e)))
            }
            other => other,
        }
    }
}

impl Drop for FragmentStream {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for FragmentStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FragmentStream")
            .field("finished", &self.finished)
            .field("release_pending", &self.release.is_some())
            .finish()
    }
}

/// Splits a chunked byte body into complete lines.
///
/// Partial trailing data is kept until the next chunk (or [`LineBuffer::finish`]).
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Feed a chunk and return every line it completed, without the trailing `\n` / `\r\n`
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            lines.push(line.trim_end_matches('\r').to_string());
        }
        lines
    }

    /// Return whatever is left once the body has ended
    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.pending).trim().to_string();
        self.pending.clear();
        (!rest.is_empty()).then_some(rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Stand-in for a transport connection that records when it is closed
    struct MockConnection {
        closes: Arc<AtomicUsize>,
    }

    impl Drop for MockConnection {
        fn drop(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn connection_backed_stream(closes: Arc<AtomicUsize>) -> FragmentStream {
        let conn = MockConnection { closes };
        let inner = stream::iter(vec!["a", "b", "c", "d"]).map(move |s| {
            let _held = &conn;
            Ok::<_, ProviderError>(s.to_string())
        });
        FragmentStream::new(inner)
    }

    #[tokio::test]
    async fn test_early_drop_closes_connection() {
        let closes = Arc::new(AtomicUsize::new(0));
        let hooks = Arc::new(AtomicUsize::new(0));
        let hook_count = hooks.clone();

        let mut fragments = connection_backed_stream(closes.clone())
            .on_release(move || {
                hook_count.fetch_add(1, Ordering::SeqCst);
            });

        assert_eq!(fragments.next().await.unwrap().unwrap(), "a");
        assert_eq!(closes.load(Ordering::SeqCst), 0);

        drop(fragments);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_releases_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let hooks = Arc::new(AtomicUsize::new(0));
        let hook_count = hooks.clone();

        let mut fragments = connection_backed_stream(closes.clone())
            .on_release(move || {
                hook_count.fetch_add(1, Ordering::SeqCst);
            });

        let mut seen = Vec::new();
        while let Some(fragment) = fragments.next().await {
            seen.push(fragment.unwrap());
        }
        assert_eq!(seen, vec!["a", "b", "c", "d"]);
        assert!(fragments.is_finished());
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        // Not restartable
        assert!(fragments.next().await.is_none());

        drop(fragments);
        assert_eq!(hooks.load(Ordering::SeqCst), 1);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_terminates_stream() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let inner = stream::iter(vec![
            Ok("x".to_string()),
            Err(ProviderError::Network("reset".to_string())),
            Ok("never".to_string()),
        ]);
        let mut fragments = FragmentStream::new(inner).on_release(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(fragments.next().await.unwrap().is_ok());
        assert!(fragments.next().await.unwrap().is_err());
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(fragments.next().await.is_none());
    }

    #[tokio::test]
    async fn test_collect_text() {
        let fragments = FragmentStream::from_fragments(vec!["Hel".to_string(), "lo".to_string()]);
        assert_eq!(fragments.collect_text().await.unwrap(), "Hello");
    }

    #[test]
    fn test_line_buffer_handles_split_chunks() {
        let mut buffer = LineBuffer::default();
        assert!(buffer.push(b"{\"a\":").is_empty());
        assert_eq!(buffer.push(b"1}\r\n{\"b\""), vec!["{\"a\":1}"]);
        assert_eq!(buffer.push(b":2}\n"), vec!["{\"b\":2}"]);
        assert!(buffer.finish().is_none());

        buffer.push(b"tail");
        assert_eq!(buffer.finish().as_deref(), Some("tail"));
    }
}
