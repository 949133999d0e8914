//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// A stream that replays a fixed script of reads, one scripted chunk per
/// `poll_read`, and records everything written to it.
///
/// A chunk larger than the caller's buffer is split, with the remainder
/// delivered by the following read. An exhausted script reads as EOF.
#[derive(Debug, Default)]
pub struct ScriptedStream {
    reads: VecDeque<io::Result<Vec<u8>>>,
    pub written: Vec<u8>,
    pub shutdowns: usize,
    pub reads_served: usize,
}

impl ScriptedStream {
    pub fn new<C: AsRef<[u8]>>(chunks: &[C]) -> Self {
        Self {
            reads: chunks.iter().map(|c| Ok(c.as_ref().to_vec())).collect(),
            ..Default::default()
        }
    }

    pub fn then_error(mut self, kind: io::ErrorKind) -> Self {
        self.reads.push_back(Err(io::Error::new(kind, "scripted failure")));
        self
    }
}

impl AsyncRead for ScriptedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.reads_served += 1;
        match self.reads.pop_front() {
            Some(Ok(mut chunk)) => {
                let take = chunk.len().min(buf.remaining());
                buf.put_slice(&chunk[..take]);
                if take < chunk.len() {
                    let rest = chunk.split_off(take);
                    self.reads.push_front(Ok(rest));
                }
                Poll::Ready(Ok(()))
            }
            Some(Err(e)) => Poll::Ready(Err(e)),
            None => Poll::Ready(Ok(())),
        }
    }
}

impl AsyncWrite for ScriptedStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.written.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.shutdowns += 1;
        Poll::Ready(Ok(()))
    }
}

/// Reads everything from `reader` using reads of at most `size` bytes.
pub async fn read_all_in_steps<R>(reader: &mut R, size: usize) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    use tokio::io::AsyncReadExt;

    let mut out = Vec::new();
    let mut buf = vec![0u8; size];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(out);
        }
        out.extend_from_slice(&buf[..n]);
    }
}
