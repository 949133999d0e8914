/// HTTP request methods recognized when sniffing a request line.
///
/// Only the method token is ever inspected; nothing here tries to
/// understand the semantics of the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// PATCH - Partial modification of a resource
    PATCH,
}

impl Method {
    /// Parses an HTTP method from a string.
    ///
    /// # Arguments
    ///
    /// * `s` - String representation of the method (case-sensitive, uppercase)
    ///
    /// # Returns
    ///
    /// `Some(Method)` if the string matches a known method, `None` otherwise.
    ///
    /// # Example
    ///
    /// ```
    /// # use mfproxy::http::request::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str("get"), None);
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::GET),
            "POST" => Some(Method::POST),
            "PUT" => Some(Method::PUT),
            "DELETE" => Some(Method::DELETE),
            "HEAD" => Some(Method::HEAD),
            "OPTIONS" => Some(Method::OPTIONS),
            "PATCH" => Some(Method::PATCH),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
        }
    }

    pub const ALL: [Method; 7] = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::HEAD,
        Method::OPTIONS,
        Method::PATCH,
    ];
}

/// The allow-list of methods that mark a stream as HTTP.
///
/// Both sniffing shims consult the same set, so a method accepted by the
/// classifier is always accepted by the parameter extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSet {
    methods: Vec<Method>,
}

impl MethodSet {
    pub fn new(methods: impl IntoIterator<Item = Method>) -> Self {
        let mut set = Vec::new();
        for m in methods {
            if !set.contains(&m) {
                set.push(m);
            }
        }
        Self { methods: set }
    }

    /// Builds a set from method names, failing on the first unknown name.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, String> {
        let methods = names
            .iter()
            .map(|n| Method::from_str(n.as_ref()).ok_or_else(|| n.as_ref().to_string()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(methods))
    }

    /// Looks up an exact method token.
    pub fn lookup(&self, token: &str) -> Option<Method> {
        Method::from_str(token).filter(|m| self.methods.contains(m))
    }

    pub fn contains(&self, method: Method) -> bool {
        self.methods.contains(&method)
    }

    pub fn iter(&self) -> impl Iterator<Item = Method> + '_ {
        self.methods.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl Default for MethodSet {
    fn default() -> Self {
        Self::new(Method::ALL)
    }
}

/// Borrowed view of `METHOD SP REQUEST-TARGET SP HTTP-VERSION`.
///
/// Lives only as long as the bytes it was parsed from; nothing keeps it
/// around after the query parameter has been pulled out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLine<'a> {
    /// The HTTP method (GET, POST, etc.)
    pub method: Method,
    /// The request target (e.g., "/svc?mfname=billing")
    pub target: &'a str,
    /// HTTP version (typically "HTTP/1.1")
    pub version: &'a str,
}
