//! HTTP request-line recognition.
//!
//! Only the first line of an HTTP/1.x request is ever looked at. Headers,
//! bodies and chunked encoding pass through the proxy untouched.
//!
//! - **`request`**: the canonical method allow-list and the borrowed `RequestLine` view
//! - **`parser`**: line splitting, request-line validation and query-parameter lookup
//!
//! # Example
//!
//! ```
//! use mfproxy::http::parser::{classify, extract_query_param};
//! use mfproxy::http::request::MethodSet;
//!
//! let line = classify(b"GET /svc?mfname=billing&x=1 HTTP/1.1\r\n", &MethodSet::default()).unwrap();
//! assert_eq!(extract_query_param(line.target, "mfname").unwrap(), "billing");
//! ```

pub mod parser;
pub mod request;
