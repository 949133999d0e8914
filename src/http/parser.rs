use crate::http::request::{MethodSet, RequestLine};
use std::fmt;
use url::Url;

/// Base used to resolve origin-form targets such as `/svc?x=1`.
const ORIGIN_BASE: &str = "http://localhost/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Incomplete,
    InvalidRequestLine,
    InvalidMethod,
    InvalidVersion,
    InvalidUrl,
    MissingParameter,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ParseError::Incomplete => "request line incomplete",
            ParseError::InvalidRequestLine => "invalid request line",
            ParseError::InvalidMethod => "unrecognized method",
            ParseError::InvalidVersion => "invalid HTTP version",
            ParseError::InvalidUrl => "invalid request target",
            ParseError::MissingParameter => "query parameter not found",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for ParseError {}

/// Returns the first CRLF-terminated line of `buf` without its terminator,
/// or `None` when no CRLF has arrived yet.
///
/// A bare `\n` does not end the line.
pub fn first_line(buf: &[u8]) -> Option<&[u8]> {
    buf.windows(2)
        .position(|w| w == b"\r\n")
        .map(|end| &buf[..end])
}

/// Parses `METHOD SP TARGET SP VERSION`.
///
/// The line is split on single spaces into at most three tokens, so any
/// extra space ends up in the version token and fails the `HTTP/` check.
pub fn parse_request_line<'a>(
    line: &'a [u8],
    methods: &MethodSet,
) -> Result<RequestLine<'a>, ParseError> {
    let line = std::str::from_utf8(line).map_err(|_| ParseError::InvalidRequestLine)?;

    let mut parts = line.splitn(3, ' ');
    let method_str = parts.next().ok_or(ParseError::InvalidRequestLine)?;
    let target = parts.next().ok_or(ParseError::InvalidRequestLine)?;
    let version = parts.next().ok_or(ParseError::InvalidRequestLine)?;

    let method = methods.lookup(method_str).ok_or(ParseError::InvalidMethod)?;
    if !version.starts_with("HTTP/") {
        return Err(ParseError::InvalidVersion);
    }

    Ok(RequestLine {
        method,
        target,
        version,
    })
}

/// Decides whether `buf` begins with an HTTP/1.x request line.
///
/// `Err(ParseError::Incomplete)` means no CRLF has been seen yet and the
/// caller should look again once more bytes arrive.
pub fn classify<'a>(buf: &'a [u8], methods: &MethodSet) -> Result<RequestLine<'a>, ParseError> {
    let line = first_line(buf).ok_or(ParseError::Incomplete)?;
    parse_request_line(line, methods)
}

/// Pulls the value of `key` out of a request target's query string.
///
/// The first occurrence wins. A key present with an empty value yields
/// `Ok("")`, which is not the same thing as a missing key.
pub fn extract_query_param(target: &str, key: &str) -> Result<String, ParseError> {
    let base = Url::parse(ORIGIN_BASE).map_err(|_| ParseError::InvalidUrl)?;
    let url = Url::options()
        .base_url(Some(&base))
        .parse(target)
        .map_err(|_| ParseError::InvalidUrl)?;

    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
        .ok_or(ParseError::MissingParameter)
}
