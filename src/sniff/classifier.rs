use bytes::{Buf, BytesMut};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

use crate::http::parser::{self, ParseError};
use crate::sniff::{Classification, SniffSettings, closed_error};

/// Wraps a stream and classifies it as HTTP or not from its first line.
///
/// Reads pull up to `read_chunk` bytes from the inner stream into a pending
/// queue, then hand out as much of the queue as the caller asked for. The
/// rest waits for the next read, and the inner stream is not touched again
/// until the queue is empty. Classification looks at a separate, capped copy
/// of the opening bytes, so callers always see exactly what the peer sent.
#[derive(Debug)]
pub struct HttpClassifier<S> {
    inner: S,
    settings: Arc<SniffSettings>,
    /// Received but not yet delivered.
    pending: BytesMut,
    /// Zeroed once and reused for every read from the inner stream.
    scratch: Box<[u8]>,
    /// Opening bytes kept while the first line is still incomplete.
    lookahead: BytesMut,
    classification: Classification,
    closed: bool,
}

impl<S> HttpClassifier<S> {
    pub fn new(inner: S) -> Self {
        Self::with_settings(inner, Arc::new(SniffSettings::default()))
    }

    pub fn with_settings(inner: S, settings: Arc<SniffSettings>) -> Self {
        Self {
            inner,
            scratch: vec![0; settings.read_chunk].into_boxed_slice(),
            settings,
            pending: BytesMut::new(),
            lookahead: BytesMut::new(),
            classification: Classification::Undetermined,
            closed: false,
        }
    }

    pub fn classification(&self) -> Classification {
        self.classification
    }

    pub fn is_http(&self) -> bool {
        self.classification.is_http()
    }

    /// Number of bytes read from the inner stream but not yet delivered.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Feeds freshly received bytes (the head of `pending`) to the classifier.
    fn observe(&mut self, fresh: usize) {
        if self.classification.is_final() {
            return;
        }

        let room = self.settings.max_lookahead - self.lookahead.len();
        let take = fresh.min(room);
        self.lookahead.extend_from_slice(&self.pending[..take]);

        let verdict = match parser::classify(&self.lookahead, &self.settings.methods) {
            Ok(line) => {
                tracing::debug!(
                    method = line.method.as_str(),
                    target = line.target,
                    "Stream classified as HTTP"
                );
                Classification::Http
            }
            Err(ParseError::Incomplete) if self.lookahead.len() < self.settings.max_lookahead => {
                return;
            }
            Err(ParseError::Incomplete) => {
                tracing::debug!(
                    limit = self.settings.max_lookahead,
                    "No request line within lookahead limit"
                );
                Classification::NotApplicable
            }
            Err(e) => {
                tracing::debug!(reason = %e, "Stream is not HTTP");
                Classification::NotApplicable
            }
        };

        self.decide(verdict);
    }

    fn decide(&mut self, verdict: Classification) {
        self.classification = verdict;
        self.lookahead = BytesMut::new();
    }
}

impl<S: AsyncWrite + Unpin> HttpClassifier<S> {
    /// Shuts the inner stream down and refuses any further I/O.
    ///
    /// Calling it again is a no-op.
    pub async fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.pending.clear();
        self.inner.shutdown().await
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for HttpClassifier<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;

        if this.closed {
            return Poll::Ready(Err(closed_error()));
        }
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        if this.pending.is_empty() {
            let mut chunk = ReadBuf::new(&mut this.scratch);
            ready!(Pin::new(&mut this.inner).poll_read(cx, &mut chunk))?;
            let n = chunk.filled().len();
            this.pending.extend_from_slice(chunk.filled());

            if n == 0 {
                // End of stream: nothing more can ever complete the first line.
                if !this.classification.is_final() {
                    this.decide(Classification::NotApplicable);
                }
                return Poll::Ready(Ok(()));
            }

            this.observe(n);
        }

        let take = this.pending.len().min(buf.remaining());
        buf.put_slice(&this.pending[..take]);
        this.pending.advance(take);

        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for HttpClassifier<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.closed {
            return Poll::Ready(Err(closed_error()));
        }
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.closed {
            return Poll::Ready(Err(closed_error()));
        }
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.closed {
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
