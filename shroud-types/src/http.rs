//! HTTP-like framing for shroud messages.
//!
//! A frame is a text header block terminated by an empty line, followed by
//! exactly `Content-Length` bytes of body:
//!
//! ```text
//! POST /?k=v HTTP/1.1\r\n
//! Connection: keep-alive\r\n
//! Cookie: session=0f3c...; other=1\r\n
//! Content-Length: 24\r\n
//! \r\n
//! <24 bytes of base64 body>
//! ```
//!
//! `Content-Length`, `Cookie` and `Set-Cookie` are derived fields: they are
//! produced from the body and cookie list when serializing and folded back
//! into them when parsing, so they never appear in `headers`.

use std::fmt;
use std::str::FromStr;

use crate::{SessionId, WireError};

/// The only protocol version we speak.
pub const HTTP_VERSION: &str = "HTTP/1.1";

/// Cookie carrying the session id.
pub const SESSION_COOKIE: &str = "session";

/// Maximum header lines accepted in one block.
pub const MAX_HEADERS: usize = 64;

const CONTENT_LENGTH: &str = "Content-Length";
const CONNECTION: &str = "Connection";
const KEEP_ALIVE: &str = "keep-alive";
const COOKIE: &str = "Cookie";
const SET_COOKIE: &str = "Set-Cookie";

/// Request verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST` (the default for every shroud command)
    #[default]
    Post,
}

impl Method {
    /// Wire spelling of the method.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

impl FromStr for Method {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            other => Err(WireError::UnsupportedMethod(other.to_string())),
        }
    }
}

/// Outcome of a command, carried on the status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// 200
    Ok,
    /// 400 - malformed envelope or payload
    BadRequest,
    /// 401 - unknown or missing session
    Unauthorized,
    /// 404 - target entity, search or transfer no longer exists
    NotFound,
    /// 500 - the handler failed
    InternalServerError,
    /// 503 - capacity exhausted, retry later
    ServiceUnavailable,
}

impl StatusCode {
    /// Numeric status code.
    pub fn code(self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::BadRequest => 400,
            StatusCode::Unauthorized => 401,
            StatusCode::NotFound => 404,
            StatusCode::InternalServerError => 500,
            StatusCode::ServiceUnavailable => 503,
        }
    }

    /// Reason phrase written after the code.
    pub fn reason(self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Unauthorized => "Unauthorized",
            StatusCode::NotFound => "Not Found",
            StatusCode::InternalServerError => "Internal Server Error",
            StatusCode::ServiceUnavailable => "Service Unavailable",
        }
    }

    /// Map a numeric code back to a status.
    pub fn from_code(code: u16) -> Result<Self, WireError> {
        match code {
            200 => Ok(StatusCode::Ok),
            400 => Ok(StatusCode::BadRequest),
            401 => Ok(StatusCode::Unauthorized),
            404 => Ok(StatusCode::NotFound),
            500 => Ok(StatusCode::InternalServerError),
            503 => Ok(StatusCode::ServiceUnavailable),
            other => Err(WireError::UnknownStatus(other)),
        }
    }

    /// True for 200.
    pub fn is_ok(self) -> bool {
        self == StatusCode::Ok
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.reason())
    }
}

/// Location of the body inside a buffer holding a parsed header block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHead {
    /// Offset of the first body byte (header block length including the blank line).
    pub body_offset: usize,
    /// Declared `Content-Length`.
    pub content_length: usize,
}

impl FrameHead {
    /// Total bytes the complete frame occupies.
    pub fn frame_len(&self) -> usize {
        self.body_offset + self.content_length
    }
}

/// A request or response frame.
///
/// The transport reads until [`Frame::parse_head`] succeeds, then keeps
/// reading until `frame_len()` bytes are buffered before attaching the body.
pub trait Frame: Sized + Send {
    /// Parse the header block at the start of `buf`.
    ///
    /// Returns `Ok(None)` when the block is not yet complete.
    fn parse_head(buf: &[u8]) -> Result<Option<(Self, FrameHead)>, WireError>;

    /// Attach the body bytes.
    fn set_body(&mut self, body: Vec<u8>);

    /// Serialize header block and body into one buffer.
    fn to_bytes(&self) -> Vec<u8>;

    /// Parse a complete frame.
    fn from_bytes(buf: &[u8]) -> Result<Self, WireError> {
        let (mut frame, head) = Self::parse_head(buf)?.ok_or(WireError::Incomplete)?;
        let end = head.frame_len();
        if buf.len() < end {
            return Err(WireError::Incomplete);
        }
        frame.set_body(buf[head.body_offset..end].to_vec());
        Ok(frame)
    }
}

// ===== Request =====

/// A request frame.
#[derive(Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Request verb.
    pub method: Method,
    /// Path part of the request target.
    pub resource: String,
    /// Ordered query pairs.
    pub query: Vec<(String, String)>,
    /// Ordered header lines, excluding derived fields.
    pub headers: Vec<(String, String)>,
    /// Ordered cookie pairs, written as one `Cookie:` line.
    pub cookies: Vec<(String, String)>,
    /// Body bytes.
    pub body: Vec<u8>,
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self {
            method: Method::Post,
            resource: "/".to_string(),
            query: Vec::new(),
            headers: vec![(CONNECTION.to_string(), KEEP_ALIVE.to_string())],
            cookies: Vec::new(),
            body: Vec::new(),
        }
    }
}

impl HttpRequest {
    /// `POST /` with `Connection: keep-alive`.
    pub fn new() -> Self {
        Self::default()
    }

    /// A request carrying the session cookie.
    pub fn with_session(session: &SessionId) -> Self {
        let mut request = Self::new();
        request.set_cookie(SESSION_COOKIE, session.as_str());
        request
    }

    /// Replace the body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// The session id from the cookie, if present and non-empty.
    pub fn session(&self) -> Option<SessionId> {
        self.cookie(SESSION_COOKIE)
            .filter(|v| !v.is_empty())
            .map(SessionId::from)
    }

    /// Look up a cookie by exact name.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        lookup(&self.cookies, name, false)
    }

    /// Set or replace a cookie.
    pub fn set_cookie(&mut self, name: &str, value: &str) {
        upsert(&mut self.cookies, name, value, false);
    }

    /// Look up a header, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        lookup(&self.headers, name, true)
    }

    /// Set or replace a header.
    pub fn set_header(&mut self, name: &str, value: &str) {
        upsert(&mut self.headers, name, value, true);
    }

    /// True when the peer asked to keep the connection open.
    pub fn keep_alive(&self) -> bool {
        is_keep_alive(&self.headers)
    }
}

impl Frame for HttpRequest {
    fn parse_head(buf: &[u8]) -> Result<Option<(Self, FrameHead)>, WireError> {
        let mut raw = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Request::new(&mut raw);
        let body_offset = match parsed.parse(buf)? {
            httparse::Status::Partial => return Ok(None),
            httparse::Status::Complete(offset) => offset,
        };

        check_version(parsed.version)?;
        let method = parsed.method.unwrap_or("POST").parse()?;
        let (resource, query) = split_target(parsed.path.unwrap_or("/"));
        let fields = collect_fields(parsed.headers, COOKIE)?;

        let request = HttpRequest {
            method,
            resource,
            query,
            headers: fields.headers,
            cookies: fields.cookies,
            body: Vec::new(),
        };
        let head = FrameHead {
            body_offset,
            content_length: fields.content_length,
        };
        Ok(Some((request, head)))
    }

    fn set_body(&mut self, body: Vec<u8>) {
        self.body = body;
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!(
            "{} {}{} {}\r\n",
            self.method.as_str(),
            self.resource,
            join_query(&self.query),
            HTTP_VERSION
        );
        push_headers(&mut head, &self.headers);
        if !self.cookies.is_empty() {
            let pairs: Vec<String> = self
                .cookies
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            head.push_str(&format!("{}: {}\r\n", COOKIE, pairs.join("; ")));
        }
        finish(head, &self.body)
    }
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("resource", &self.resource)
            .field("query", &self.query)
            .field("headers", &self.headers)
            .field("cookies", &self.cookies)
            .field("body", &format!("[{} bytes]", self.body.len()))
            .finish()
    }
}

// ===== Response =====

/// A response frame.
#[derive(Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status line code.
    pub status: StatusCode,
    /// Ordered header lines, excluding derived fields.
    pub headers: Vec<(String, String)>,
    /// Ordered cookie pairs, one `Set-Cookie:` line each.
    pub cookies: Vec<(String, String)>,
    /// Body bytes.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// A response with the given status and `Connection: keep-alive`.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: vec![(CONNECTION.to_string(), KEEP_ALIVE.to_string())],
            cookies: Vec::new(),
            body: Vec::new(),
        }
    }

    /// `200 OK`.
    pub fn ok() -> Self {
        Self::new(StatusCode::Ok)
    }

    /// `200 OK` that hands the session id to the client.
    pub fn with_session(session: &SessionId) -> Self {
        let mut response = Self::ok();
        response.set_cookie(SESSION_COOKIE, session.as_str());
        response
    }

    /// Replace the body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// The session id set by the router, if any.
    pub fn session(&self) -> Option<SessionId> {
        self.cookie(SESSION_COOKIE)
            .filter(|v| !v.is_empty())
            .map(SessionId::from)
    }

    /// Look up a cookie by exact name.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        lookup(&self.cookies, name, false)
    }

    /// Set or replace a cookie.
    pub fn set_cookie(&mut self, name: &str, value: &str) {
        upsert(&mut self.cookies, name, value, false);
    }

    /// Look up a header, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        lookup(&self.headers, name, true)
    }

    /// True when the peer asked to keep the connection open.
    pub fn keep_alive(&self) -> bool {
        is_keep_alive(&self.headers)
    }
}

impl Frame for HttpResponse {
    fn parse_head(buf: &[u8]) -> Result<Option<(Self, FrameHead)>, WireError> {
        let mut raw = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Response::new(&mut raw);
        let body_offset = match parsed.parse(buf)? {
            httparse::Status::Partial => return Ok(None),
            httparse::Status::Complete(offset) => offset,
        };

        check_version(parsed.version)?;
        let status = StatusCode::from_code(parsed.code.unwrap_or(0))?;
        let fields = collect_fields(parsed.headers, SET_COOKIE)?;

        let response = HttpResponse {
            status,
            headers: fields.headers,
            cookies: fields.cookies,
            body: Vec::new(),
        };
        let head = FrameHead {
            body_offset,
            content_length: fields.content_length,
        };
        Ok(Some((response, head)))
    }

    fn set_body(&mut self, body: Vec<u8>) {
        self.body = body;
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!(
            "{} {} {}\r\n",
            HTTP_VERSION,
            self.status.code(),
            self.status.reason()
        );
        push_headers(&mut head, &self.headers);
        for (name, value) in &self.cookies {
            head.push_str(&format!("{}: {}={}\r\n", SET_COOKIE, name, value));
        }
        finish(head, &self.body)
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("cookies", &self.cookies)
            .field("body", &format!("[{} bytes]", self.body.len()))
            .finish()
    }
}

// ===== Helpers =====

struct Fields {
    headers: Vec<(String, String)>,
    cookies: Vec<(String, String)>,
    content_length: usize,
}

fn check_version(version: Option<u8>) -> Result<(), WireError> {
    match version {
        Some(1) | None => Ok(()),
        Some(other) => Err(WireError::UnsupportedVersion(other)),
    }
}

fn collect_fields(raw: &[httparse::Header<'_>], cookie_name: &str) -> Result<Fields, WireError> {
    let mut fields = Fields {
        headers: Vec::new(),
        cookies: Vec::new(),
        content_length: 0,
    };

    for header in raw {
        let value = std::str::from_utf8(header.value)
            .map_err(|_| WireError::InvalidHeader(header.name.to_string()))?
            .trim();

        if header.name.eq_ignore_ascii_case(CONTENT_LENGTH) {
            fields.content_length = value
                .parse()
                .map_err(|_| WireError::InvalidContentLength(value.to_string()))?;
        } else if header.name.eq_ignore_ascii_case(cookie_name) {
            // Set-Cookie carries one pair followed by attributes.
            let take = if cookie_name == SET_COOKIE { 1 } else { usize::MAX };
            fields.cookies.extend(parse_cookies(value).take(take));
        } else {
            fields
                .headers
                .push((header.name.to_string(), value.to_string()));
        }
    }

    Ok(fields)
}

fn parse_cookies(value: &str) -> impl Iterator<Item = (String, String)> + '_ {
    value.split(';').filter_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            None
        } else {
            Some((name.to_string(), value.trim().to_string()))
        }
    })
}

fn split_target(target: &str) -> (String, Vec<(String, String)>) {
    match target.split_once('?') {
        None => (target.to_string(), Vec::new()),
        Some((resource, query)) => {
            let pairs = query
                .split('&')
                .filter(|p| !p.is_empty())
                .map(|p| match p.split_once('=') {
                    Some((k, v)) => (k.to_string(), v.to_string()),
                    None => (p.to_string(), String::new()),
                })
                .collect();
            (resource.to_string(), pairs)
        }
    }
}

fn join_query(query: &[(String, String)]) -> String {
    if query.is_empty() {
        return String::new();
    }
    let pairs: Vec<String> = query.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("?{}", pairs.join("&"))
}

fn push_headers(head: &mut String, headers: &[(String, String)]) {
    for (name, value) in headers {
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
}

fn finish(mut head: String, body: &[u8]) -> Vec<u8> {
    head.push_str(&format!("{}: {}\r\n\r\n", CONTENT_LENGTH, body.len()));
    let mut bytes = head.into_bytes();
    bytes.extend_from_slice(body);
    bytes
}

fn lookup<'a>(pairs: &'a [(String, String)], name: &str, ignore_case: bool) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| {
            if ignore_case {
                k.eq_ignore_ascii_case(name)
            } else {
                k == name
            }
        })
        .map(|(_, v)| v.as_str())
}

fn upsert(pairs: &mut Vec<(String, String)>, name: &str, value: &str, ignore_case: bool) {
    let existing = pairs.iter_mut().find(|(k, _)| {
        if ignore_case {
            k.eq_ignore_ascii_case(name)
        } else {
            k == name
        }
    });
    match existing {
        Some((_, v)) => *v = value.to_string(),
        None => pairs.push((name.to_string(), value.to_string())),
    }
}

fn is_keep_alive(headers: &[(String, String)]) -> bool {
    lookup(headers, CONNECTION, true)
        .map(|v| v.eq_ignore_ascii_case(KEEP_ALIVE))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // ===== Request framing =====

    #[test]
    fn default_request_is_post_root_keep_alive() {
        let request = HttpRequest::new();
        let text = String::from_utf8(request.to_bytes()).unwrap();
        assert!(text.starts_with("POST / HTTP/1.1\r\n"));
        assert!(text.contains("Connection: keep-alive\r\n"));
        assert!(text.ends_with("Content-Length: 0\r\n\r\n"));
        assert!(request.keep_alive());
    }

    #[test]
    fn request_roundtrip_with_session_query_and_body() {
        let session = SessionId::random();
        let mut request = HttpRequest::with_session(&session).with_body(b"aGVsbG8=".to_vec());
        request.resource = "/relay".to_string();
        request.query = vec![("a".into(), "1".into()), ("b".into(), String::new())];
        request.set_cookie("theme", "dark");
        request.set_header("X-Trace", "abc");

        let bytes = request.to_bytes();
        let parsed = HttpRequest::from_bytes(&bytes).unwrap();

        assert_eq!(parsed, request);
        assert_eq!(parsed.session(), Some(session));
    }

    #[test]
    fn cookies_are_written_on_one_line() {
        let mut request = HttpRequest::new();
        request.set_cookie("session", "abc");
        request.set_cookie("k2", "v2");
        let text = String::from_utf8(request.to_bytes()).unwrap();
        assert!(text.contains("Cookie: session=abc; k2=v2\r\n"));
    }

    #[test]
    fn cookie_lines_from_peer_are_merged() {
        let raw = b"POST / HTTP/1.1\r\nCookie: a=1\r\nCookie: b=2; c=3\r\n\r\n";
        let request = HttpRequest::from_bytes(raw).unwrap();
        assert_eq!(request.cookie("a"), Some("1"));
        assert_eq!(request.cookie("b"), Some("2"));
        assert_eq!(request.cookie("c"), Some("3"));
        assert!(request.headers.is_empty());
        assert!(!request.keep_alive());
    }

    #[test]
    fn partial_head_returns_none() {
        let raw = b"POST / HTTP/1.1\r\nContent-Len";
        assert!(HttpRequest::parse_head(raw).unwrap().is_none());
    }

    #[test]
    fn head_reports_body_offset() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhel";
        let (_, head) = HttpRequest::parse_head(raw).unwrap().unwrap();
        assert_eq!(head.body_offset, raw.len() - 3);
        assert_eq!(head.content_length, 5);
        assert_eq!(head.frame_len(), raw.len() + 2);
    }

    #[test]
    fn incomplete_body_is_rejected() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhel";
        assert!(matches!(
            HttpRequest::from_bytes(raw),
            Err(WireError::Incomplete)
        ));
    }

    #[test]
    fn bad_content_length_is_rejected() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: lots\r\n\r\n";
        assert!(matches!(
            HttpRequest::parse_head(raw),
            Err(WireError::InvalidContentLength(_))
        ));
    }

    #[test]
    fn unknown_method_is_rejected() {
        let raw = b"DELETE / HTTP/1.1\r\n\r\n";
        assert!(matches!(
            HttpRequest::parse_head(raw),
            Err(WireError::UnsupportedMethod(_))
        ));
    }

    #[test]
    fn http_1_0_is_rejected() {
        let raw = b"POST / HTTP/1.0\r\n\r\n";
        assert!(matches!(
            HttpRequest::parse_head(raw),
            Err(WireError::UnsupportedVersion(0))
        ));
    }

    #[test]
    fn empty_session_cookie_is_no_session() {
        let raw = b"POST / HTTP/1.1\r\nCookie: session=\r\n\r\n";
        let request = HttpRequest::from_bytes(raw).unwrap();
        assert!(request.session().is_none());
    }

    // ===== Response framing =====

    #[test]
    fn response_roundtrip_with_set_cookie() {
        let session = SessionId::random();
        let response = HttpResponse::with_session(&session).with_body(b"payload".to_vec());
        let bytes = response.to_bytes();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains(&format!("Set-Cookie: session={}\r\n", session)));

        let parsed = HttpResponse::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, response);
        assert_eq!(parsed.session(), Some(session));
    }

    #[test]
    fn set_cookie_attributes_are_ignored() {
        let raw = b"HTTP/1.1 200 OK\r\nSet-Cookie: session=abc; Path=/; HttpOnly\r\n\r\n";
        let response = HttpResponse::from_bytes(raw).unwrap();
        assert_eq!(response.cookies, vec![("session".to_string(), "abc".to_string())]);
    }

    #[test]
    fn every_status_roundtrips() {
        for status in [
            StatusCode::Ok,
            StatusCode::BadRequest,
            StatusCode::Unauthorized,
            StatusCode::NotFound,
            StatusCode::InternalServerError,
            StatusCode::ServiceUnavailable,
        ] {
            let parsed = HttpResponse::from_bytes(&HttpResponse::new(status).to_bytes()).unwrap();
            assert_eq!(parsed.status, status);
        }
    }

    #[test]
    fn unknown_status_is_rejected() {
        let raw = b"HTTP/1.1 418 I'm a teapot\r\n\r\n";
        assert!(matches!(
            HttpResponse::parse_head(raw),
            Err(WireError::UnknownStatus(418))
        ));
    }

    #[test]
    fn debug_hides_body() {
        let response = HttpResponse::ok().with_body(b"secret".to_vec());
        let debug = format!("{:?}", response);
        assert!(debug.contains("[6 bytes]"));
        assert!(!debug.contains("secret"));
    }

    // ===== Properties =====

    fn token() -> impl Strategy<Value = String> {
        "[A-Za-z][A-Za-z0-9]{0,11}"
    }

    fn pairs() -> impl Strategy<Value = Vec<(String, String)>> {
        prop::collection::vec((token(), "[A-Za-z0-9_.]{0,16}"), 0..4)
    }

    proptest! {
        #[test]
        fn request_framing_roundtrips(
            resource in "/[a-z0-9/]{0,16}",
            query in pairs(),
            headers in prop::collection::vec((token().prop_map(|t| format!("X-{}", t)), "[A-Za-z0-9_.]{1,16}"), 0..4),
            cookies in pairs(),
            body in prop::collection::vec(any::<u8>(), 0..256),
        ) {
            let request = HttpRequest {
                method: Method::Post,
                resource,
                query,
                headers,
                cookies,
                body,
            };
            let parsed = HttpRequest::from_bytes(&request.to_bytes()).unwrap();
            prop_assert_eq!(parsed, request);
        }
    }
}
