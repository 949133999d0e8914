//! Transparent stream sniffing.
//!
//! Two shims wrap one accepted connection and watch the bytes flowing out of
//! it, without adding, dropping or reordering any of them:
//!
//! - **`classifier`**: [`HttpClassifier`] decides whether the stream opens with an
//!   HTTP/1.x request line
//! - **`interceptor`**: [`ParamInterceptor`] pulls one named query parameter out of
//!   the request target and publishes it on a per-connection channel
//!
//! They compose by nesting, and the result is still an ordinary
//! `AsyncRead + AsyncWrite` stream:
//!
//! ```no_run
//! use mfproxy::sniff::{Extraction, HttpClassifier, ParamInterceptor, SniffSettings};
//! use std::sync::Arc;
//! use tokio::io::AsyncReadExt;
//!
//! # async fn sniff() -> std::io::Result<()> {
//! let (socket, _client) = tokio::io::duplex(4096);
//! let settings = Arc::new(SniffSettings::default());
//! let classifier = HttpClassifier::with_settings(socket, settings.clone());
//! let mut conn = ParamInterceptor::with_settings(classifier, settings);
//! let mut function = conn.handle();
//!
//! let mut buf = [0u8; 1024];
//! let _n = conn.read(&mut buf).await?;
//! if let Extraction::Found(name) = function.resolved().await {
//!     println!("route to {}", name);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # State machines
//!
//! ```text
//!   classification:  Undetermined ──first line──▶ Http | NotApplicable
//!   extraction:      Pending      ──first line──▶ Found(value) | Absent
//! ```
//!
//! Both transitions happen at most once per connection. Hitting the
//! lookahead cap or end-of-stream before a full line has arrived settles
//! them on the negative side.

pub mod classifier;
pub mod interceptor;

pub use classifier::HttpClassifier;
pub use interceptor::ParamInterceptor;

use std::io;
use tokio::sync::watch;

use crate::http::request::MethodSet;

/// Query key naming the multiplexed function a request is meant for.
pub const DEFAULT_QUERY_KEY: &str = "mfname";

/// Upper bound on bytes held back for request-line detection.
pub const DEFAULT_MAX_LOOKAHEAD: usize = 4096;

/// Size of a single read from the wrapped stream.
pub const DEFAULT_READ_CHUNK: usize = 8192;

/// Knobs shared by both shims. One instance is normally shared through an
/// `Arc` by every connection the proxy accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SniffSettings {
    pub methods: MethodSet,
    pub query_key: String,
    pub max_lookahead: usize,
    pub read_chunk: usize,
}

impl Default for SniffSettings {
    fn default() -> Self {
        Self {
            methods: MethodSet::default(),
            query_key: DEFAULT_QUERY_KEY.to_string(),
            max_lookahead: DEFAULT_MAX_LOOKAHEAD,
            read_chunk: DEFAULT_READ_CHUNK,
        }
    }
}

/// Whether a stream begins with an HTTP/1.x request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Classification {
    /// No complete first line seen yet.
    #[default]
    Undetermined,
    Http,
    NotApplicable,
}

impl Classification {
    pub fn is_http(&self) -> bool {
        *self == Classification::Http
    }

    pub fn is_final(&self) -> bool {
        *self != Classification::Undetermined
    }
}

/// Outcome of looking for the routing parameter on one connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Extraction {
    /// The first line has not been seen yet.
    #[default]
    Pending,
    /// Not HTTP, no query, bad URL, or key missing.
    Absent,
    /// The parameter's value. May be empty (`?mfname=`).
    Found(String),
}

impl Extraction {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Extraction::Pending)
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            Extraction::Found(v) => Some(v),
            _ => None,
        }
    }
}

/// Read side of one connection's extraction channel.
///
/// Handles are cheap to clone and only ever observe the connection whose
/// interceptor created them.
#[derive(Debug, Clone)]
pub struct ParamHandle {
    rx: watch::Receiver<Extraction>,
}

impl ParamHandle {
    pub(crate) fn new(rx: watch::Receiver<Extraction>) -> Self {
        Self { rx }
    }

    /// The state right now, without waiting.
    pub fn current(&self) -> Extraction {
        self.rx.borrow().clone()
    }

    /// Waits until the interceptor has settled on a result.
    ///
    /// If the interceptor is dropped first, the parameter can never arrive
    /// and `Absent` is returned.
    pub async fn resolved(&mut self) -> Extraction {
        let outcome = self
            .rx
            .wait_for(Extraction::is_resolved)
            .await
            .map(|e| e.clone());

        outcome.unwrap_or(Extraction::Absent)
    }
}

pub(crate) fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "stream closed")
}
