use std::fmt;

use chrono::Utc;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tracing::{debug, error, info, warn};
use url::Url;

use super::request::{OutpaintingRequest, TaskRequest, TextToImageRequest};
use super::transport::{HttpMethod, HttpReply, HttpRequestSpec, HttpTransport};
use super::wire::{self, OutpaintingBody, TextToImageBody};
use super::{RemoteError, TaskHandle, TaskKind, TaskStatusReport};

pub const DEFAULT_API_BASE: &str = "https://dashscope.aliyuncs.com";
pub const ASYNC_HEADER: &str = "X-DashScope-Async";

const OUTPAINTING_PATH: &str = "/api/v1/services/aigc/image2image/out-painting";
const TEXT_TO_IMAGE_PATH: &str = "/api/v1/services/aigc/text2image/image-synthesis";
// Both task kinds are polled through this one endpoint.
const TASK_STATUS_SEGMENTS: [&str; 3] = ["api", "v1", "tasks"];
const LOGGED_BODY_MAX_CHARS: usize = 512;

/// Provider credential. Never rendered by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoints {
    api_base: String,
}

impl RemoteEndpoints {
    pub fn new(api_base: impl Into<String>) -> Self {
        let api_base = api_base.into();
        let trimmed = api_base.trim().trim_end_matches('/');
        Self {
            api_base: if trimmed.is_empty() {
                String::from(DEFAULT_API_BASE)
            } else {
                trimmed.to_string()
            },
        }
    }

    pub fn api_base(&self) -> &str {
        self.api_base.as_str()
    }

    pub fn outpainting_url(&self) -> String {
        format!("{}{OUTPAINTING_PATH}", self.api_base)
    }

    pub fn text_to_image_url(&self) -> String {
        format!("{}{TEXT_TO_IMAGE_PATH}", self.api_base)
    }

    /// The task id always lands in a single percent-encoded path segment.
    pub fn task_status_url(&self, task_id: &str) -> Result<String, RemoteError> {
        if matches!(task_id, "." | "..") {
            return Err(RemoteError::InvalidTaskId);
        }
        let mut url = Url::parse(self.api_base.as_str()).map_err(|e| {
            RemoteError::InvalidRequest(format!("API base '{}' is not a URL: {e}", self.api_base))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                RemoteError::InvalidRequest(format!(
                    "API base '{}' cannot carry a path",
                    self.api_base
                ))
            })?
            .pop_if_empty()
            .extend(TASK_STATUS_SEGMENTS)
            .push(task_id);
        url.set_query(None);
        url.set_fragment(None);
        Ok(url.into())
    }
}

impl Default for RemoteEndpoints {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE)
    }
}

#[derive(Debug, Clone)]
pub struct RemoteTaskClient<T> {
    transport: T,
    api_key: ApiKey,
    endpoints: RemoteEndpoints,
}

impl<T> RemoteTaskClient<T>
where
    T: HttpTransport,
{
    pub fn new(transport: T, api_key: ApiKey) -> Self {
        Self {
            transport,
            api_key,
            endpoints: RemoteEndpoints::default(),
        }
    }

    pub fn with_endpoints(mut self, endpoints: RemoteEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn endpoints(&self) -> &RemoteEndpoints {
        &self.endpoints
    }

    pub fn create_task(&self, request: &TaskRequest) -> Result<TaskHandle, RemoteError> {
        match request {
            TaskRequest::Outpainting(req) => self.create_outpainting_task(req),
            TaskRequest::TextToImage(req) => self.create_text_to_image_task(req),
        }
    }

    pub fn create_outpainting_task(
        &self,
        request: &OutpaintingRequest,
    ) -> Result<TaskHandle, RemoteError> {
        request.validate()?;
        let body = wire::encode_body(&OutpaintingBody::from(request))?;
        self.submit_create(
            TaskKind::Outpainting,
            self.endpoints.outpainting_url(),
            body,
            "AI outpainting",
        )
    }

    pub fn create_text_to_image_task(
        &self,
        request: &TextToImageRequest,
    ) -> Result<TaskHandle, RemoteError> {
        request.validate()?;
        let body = wire::encode_body(&TextToImageBody::from(request))?;
        self.submit_create(
            TaskKind::TextToImage,
            self.endpoints.text_to_image_url(),
            body,
            "AI text-to-image",
        )
    }

    pub fn get_task_status(&self, task_id: &str) -> Result<TaskStatusReport, RemoteError> {
        let task_id = task_id.trim();
        if task_id.is_empty() {
            return Err(RemoteError::InvalidTaskId);
        }
        let spec = HttpRequestSpec::new(HttpMethod::Get, self.endpoints.task_status_url(task_id)?)
            .with_header(AUTHORIZATION.as_str(), self.api_key.bearer());
        let reply = self.send(&spec, "AI task status query")?;
        let payload = wire::parse_json(reply.body.as_slice())?;
        reject_if_provider_error(&payload, "AI task status query")?;

        let report = wire::status_report(task_id, &payload);
        debug!(task_id = %report.task_id, status = report.status.as_str(), "provider task status read");
        Ok(report)
    }

    fn submit_create(
        &self,
        kind: TaskKind,
        url: String,
        body: Vec<u8>,
        operation: &'static str,
    ) -> Result<TaskHandle, RemoteError> {
        let spec = HttpRequestSpec::new(HttpMethod::Post, url)
            .with_header(AUTHORIZATION.as_str(), self.api_key.bearer())
            // The provider only accepts asynchronous submission for these models.
            .with_header(ASYNC_HEADER, "enable")
            .with_header(CONTENT_TYPE.as_str(), "application/json")
            .with_body(body);
        let reply = self.send(&spec, operation)?;
        let payload = wire::parse_json(reply.body.as_slice())?;
        reject_if_provider_error(&payload, operation)?;

        let task_id = wire::created_task_id(&payload).ok_or_else(|| {
            RemoteError::MalformedResponse(String::from("creation response has no output.task_id"))
        })?;
        let handle = TaskHandle::new(task_id, kind, Utc::now())?;
        info!(task_id = %handle.task_id(), kind = %kind, "provider task created");
        Ok(handle)
    }

    fn send(&self, spec: &HttpRequestSpec, operation: &'static str) -> Result<HttpReply, RemoteError> {
        let reply = self.transport.execute(spec).map_err(|e| {
            error!(operation, error = %e, "provider request did not complete");
            RemoteError::TransportFailure {
                status: None,
                message: format!("{operation} failed: {e}"),
            }
        })?;
        if !reply.is_success() {
            error!(
                operation,
                status = reply.status,
                body = %truncate_text(reply.body_text_lossy().as_str(), LOGGED_BODY_MAX_CHARS),
                "provider request returned non-success status"
            );
            return Err(RemoteError::TransportFailure {
                status: Some(reply.status),
                message: format!("{operation} failed with HTTP {}", reply.status),
            });
        }
        Ok(reply)
    }
}

fn reject_if_provider_error(
    payload: &serde_json::Value,
    operation: &'static str,
) -> Result<(), RemoteError> {
    if let Some((code, message)) = wire::provider_rejection(payload) {
        warn!(operation, code = %code, message = %message, "provider rejected request");
        return Err(RemoteError::RemoteRejected { code, message });
    }
    Ok(())
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut out = value.chars().take(max_chars).collect::<String>();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_debug_is_redacted() {
        let key = ApiKey::new("sk-live-123").expect("key");
        assert_eq!(format!("{key:?}"), "ApiKey(<redacted>)");
        assert!(ApiKey::new("   ").is_none());
    }

    #[test]
    fn endpoints_share_one_status_url_and_trim_trailing_slash() {
        let endpoints = RemoteEndpoints::new("https://dashscope.example.test/");
        assert_eq!(
            endpoints.outpainting_url(),
            "https://dashscope.example.test/api/v1/services/aigc/image2image/out-painting"
        );
        assert_eq!(
            endpoints.text_to_image_url(),
            "https://dashscope.example.test/api/v1/services/aigc/text2image/image-synthesis"
        );
        assert_eq!(
            endpoints.task_status_url("abc").as_deref(),
            Ok("https://dashscope.example.test/api/v1/tasks/abc")
        );
        assert_eq!(RemoteEndpoints::new("  ").api_base(), DEFAULT_API_BASE);
    }

    #[test]
    fn task_id_cannot_escape_the_status_path() {
        let endpoints = RemoteEndpoints::new("https://dashscope.example.test");
        let raw = endpoints
            .task_status_url("a/../../services?x=1#frag")
            .expect("status url");
        let url = Url::parse(raw.as_str()).expect("valid url");

        let segments = url.path_segments().expect("segments").collect::<Vec<_>>();
        assert_eq!(segments.len(), 4, "unexpected path in {raw}");
        assert_eq!(&segments[..3], &["api", "v1", "tasks"]);
        assert!(!segments[3].contains('/'));
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);

        for dots in [".", ".."] {
            assert_eq!(endpoints.task_status_url(dots), Err(RemoteError::InvalidTaskId));
        }
    }

    #[test]
    fn truncate_text_appends_ellipsis() {
        assert_eq!(truncate_text("abcdef", 3), "abc...");
        assert_eq!(truncate_text("abc", 3), "abc");
    }
}
