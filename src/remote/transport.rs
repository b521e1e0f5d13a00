use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::AUTHORIZATION;
use thiserror::Error;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct HttpRequestSpec {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    /// Response bodies longer than this fail with `BodyTooLarge` instead of being buffered.
    pub max_body_bytes: Option<u64>,
}

impl HttpRequestSpec {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            max_body_bytes: None,
        }
    }

    pub fn with_max_body_bytes(mut self, limit: u64) -> Self {
        self.max_body_bytes = Some(limit);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(self.headers.as_slice(), name)
    }
}

// Authorization values stay out of debug output.
impl fmt::Debug for HttpRequestSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers = self
            .headers
            .iter()
            .map(|(name, value)| {
                if name.eq_ignore_ascii_case(AUTHORIZATION.as_str()) {
                    (name.as_str(), "<redacted>")
                } else {
                    (name.as_str(), value.as_str())
                }
            })
            .collect::<Vec<_>>();
        f.debug_struct("HttpRequestSpec")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &headers)
            .field("body_len", &self.body.as_ref().map(Vec::len))
            .field("max_body_bytes", &self.max_body_bytes)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(self.headers.as_slice(), name)
    }

    pub fn body_text_lossy(&self) -> String {
        String::from_utf8_lossy(self.body.as_slice()).to_string()
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("http client error: {0}")]
    Client(String),
    #[error("response body exceeds {limit} bytes")]
    BodyTooLarge {
        limit: u64,
        /// Length announced by the server, when it sent one.
        declared: Option<u64>,
    },
}

/// Blocking HTTP seam shared by the remote task client and the URL upload variant.
pub trait HttpTransport: Send + Sync + 'static {
    fn execute(&self, request: &HttpRequestSpec) -> Result<HttpReply, TransportError>;
}

impl<T> HttpTransport for Arc<T>
where
    T: HttpTransport + ?Sized,
{
    fn execute(&self, request: &HttpRequestSpec) -> Result<HttpReply, TransportError> {
        (**self).execute(request)
    }
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Client(format!("http client init failed: {e}")))?;
        Ok(Self { client, timeout })
    }
}

impl HttpTransport for ReqwestTransport {
    fn execute(&self, request: &HttpRequestSpec) -> Result<HttpReply, TransportError> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(request.url.as_str()),
            HttpMethod::Head => self.client.head(request.url.as_str()),
            HttpMethod::Post => self.client.post(request.url.as_str()),
        };
        for (name, value) in request.headers.iter() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body.as_ref() {
            builder = builder.body(body.clone());
        }

        let resp = builder.send().map_err(|e| self.classify(e))?;
        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect::<Vec<_>>();
        let body = match request.max_body_bytes {
            Some(limit) => {
                let declared = resp.content_length();
                if declared.is_some_and(|len| len > limit) {
                    return Err(TransportError::BodyTooLarge { limit, declared });
                }
                read_capped(resp, limit).map_err(|e| self.classify_read(e))?
            }
            None => resp.bytes().map_err(|e| self.classify(e))?.to_vec(),
        };
        Ok(HttpReply {
            status,
            headers,
            body,
        })
    }
}

impl ReqwestTransport {
    fn classify(&self, error: reqwest::Error) -> TransportError {
        // reqwest error text carries the URL only, never request headers.
        if error.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else if error.is_connect() {
            TransportError::Connect(error.to_string())
        } else {
            TransportError::Client(error.to_string())
        }
    }

    fn classify_read(&self, error: CappedReadError) -> TransportError {
        match error {
            CappedReadError::TooLarge { limit } => TransportError::BodyTooLarge {
                limit,
                declared: None,
            },
            CappedReadError::Io(e) if e.kind() == io::ErrorKind::TimedOut => {
                TransportError::Timeout(self.timeout)
            }
            CappedReadError::Io(e) => {
                TransportError::Client(format!("reading response body failed: {e}"))
            }
        }
    }
}

#[derive(Debug)]
enum CappedReadError {
    TooLarge { limit: u64 },
    Io(io::Error),
}

/// Reads at most `limit + 1` bytes so an oversized body is detected without buffering it.
fn read_capped(reader: impl Read, limit: u64) -> Result<Vec<u8>, CappedReadError> {
    let mut body = Vec::new();
    reader
        .take(limit.saturating_add(1))
        .read_to_end(&mut body)
        .map_err(CappedReadError::Io)?;
    if body.len() as u64 > limit {
        return Err(CappedReadError::TooLarge { limit });
    }
    Ok(body)
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}
