use bytes::BytesMut;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::sync::watch;

use crate::http::parser::{self, ParseError};
use crate::sniff::{Extraction, ParamHandle, SniffSettings, closed_error};

/// Pass-through wrapper that extracts one query parameter from the first
/// request line it sees.
///
/// Reads go straight to the inner stream and come back untouched. The
/// opening bytes are copied aside (up to `max_lookahead`) until a
/// CRLF-terminated line is available. That line goes through the same
/// request-line check the classifier uses, and the result is published on a
/// channel owned by this connection. Use [`ParamInterceptor::handle`] to hand
/// the result to whoever routes the connection.
#[derive(Debug)]
pub struct ParamInterceptor<S> {
    inner: S,
    settings: Arc<SniffSettings>,
    lookahead: BytesMut,
    tx: watch::Sender<Extraction>,
    closed: bool,
}

impl<S> ParamInterceptor<S> {
    pub fn new(inner: S) -> Self {
        Self::with_settings(inner, Arc::new(SniffSettings::default()))
    }

    pub fn with_settings(inner: S, settings: Arc<SniffSettings>) -> Self {
        let (tx, _) = watch::channel(Extraction::Pending);
        Self {
            inner,
            settings,
            lookahead: BytesMut::new(),
            tx,
            closed: false,
        }
    }

    /// A receiver for this connection's extraction result.
    pub fn handle(&self) -> ParamHandle {
        ParamHandle::new(self.tx.subscribe())
    }

    pub fn extraction(&self) -> Extraction {
        self.tx.borrow().clone()
    }

    /// The extracted value, if one was found.
    pub fn param(&self) -> Option<String> {
        self.tx.borrow().value().map(str::to_owned)
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    fn observe(&mut self, fresh: &[u8]) {
        if self.tx.borrow().is_resolved() {
            return;
        }

        let room = self.settings.max_lookahead - self.lookahead.len();
        self.lookahead.extend_from_slice(&fresh[..fresh.len().min(room)]);

        let found = parser::classify(&self.lookahead, &self.settings.methods)
            .and_then(|line| parser::extract_query_param(line.target, &self.settings.query_key));

        let outcome = match found {
            Err(ParseError::Incomplete) if self.lookahead.len() < self.settings.max_lookahead => {
                return;
            }
            Err(ParseError::Incomplete) => {
                tracing::debug!(
                    limit = self.settings.max_lookahead,
                    "No request line within lookahead limit"
                );
                Extraction::Absent
            }
            Ok(value) => {
                tracing::debug!(key = %self.settings.query_key, value = %value, "Extracted routing parameter");
                Extraction::Found(value)
            }
            Err(e) => {
                tracing::debug!(key = %self.settings.query_key, reason = %e, "No routing parameter");
                Extraction::Absent
            }
        };

        self.publish(outcome);
    }

    fn publish(&mut self, outcome: Extraction) {
        self.lookahead = BytesMut::new();
        self.tx.send_replace(outcome);
    }
}

impl<S: AsyncWrite + Unpin> ParamInterceptor<S> {
    /// Shuts the inner stream down and refuses any further I/O.
    ///
    /// Calling it again is a no-op. A parameter that was never resolved is
    /// settled as absent.
    pub async fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if !self.tx.borrow().is_resolved() {
            self.publish(Extraction::Absent);
        }
        self.inner.shutdown().await
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for ParamInterceptor<S> {
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

        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        let fresh = &buf.filled()[before..];

        if fresh.is_empty() {
            if !this.tx.borrow().is_resolved() {
                this.publish(Extraction::Absent);
            }
        } else {
            this.observe(fresh);
        }

        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for ParamInterceptor<S> {
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
