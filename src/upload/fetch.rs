use std::fs::File;
use std::io::{self, Write};

use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use tracing::{debug, warn};
use url::Url;

use super::{Materialized, UploadPolicy, UploadSource, ValidationError};
use crate::remote::transport::{HttpMethod, HttpRequestSpec, HttpTransport, TransportError};

const ALLOWED_CONTENT_TYPES: [&str; 4] = ["image/jpeg", "image/jpg", "image/png", "image/webp"];
const FALLBACK_FILENAME: &str = "picture";

/// Pictures fetched from a public URL. A HEAD probe screens type and size
/// before the body is downloaded; a failed probe is tolerated.
#[derive(Debug, Clone)]
pub struct UrlPictureUpload<T> {
    transport: T,
    policy: UploadPolicy,
}

impl<T> UrlPictureUpload<T>
where
    T: HttpTransport,
{
    pub fn new(transport: T, policy: UploadPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn with_default_policy(transport: T) -> Self {
        Self::new(transport, UploadPolicy::url_default())
    }

    fn probe(&self, url: &Url) -> Result<(), ValidationError> {
        let spec = HttpRequestSpec::new(HttpMethod::Head, url.as_str());
        let reply = match self.transport.execute(&spec) {
            Ok(reply) if reply.is_success() => reply,
            Ok(reply) => {
                debug!(url = %url, status = reply.status, "HEAD probe not answered; skipping pre-checks");
                return Ok(());
            }
            Err(e) => {
                debug!(url = %url, error = %e, "HEAD probe failed; skipping pre-checks");
                return Ok(());
            }
        };

        if let Some(content_type) = reply.header(CONTENT_TYPE.as_str()) {
            let essence = media_type(content_type);
            if !ALLOWED_CONTENT_TYPES.contains(&essence.as_str()) {
                return Err(ValidationError::UnsupportedType(essence));
            }
        }
        if let Some(length) = reply
            .header(CONTENT_LENGTH.as_str())
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            self.policy.check_size(length)?;
        }
        Ok(())
    }
}

impl<T> UploadSource for UrlPictureUpload<T>
where
    T: HttpTransport,
{
    type Input = str;

    fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    fn validate(&self, input: &str) -> Result<(), ValidationError> {
        let url = parse_picture_url(input)?;
        self.probe(&url)
    }

    fn original_filename(&self, input: &str) -> Result<String, ValidationError> {
        let url = parse_picture_url(input)?;
        let name = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .unwrap_or(FALLBACK_FILENAME);
        Ok(name.to_string())
    }

    fn materialize_to_temp(
        &self,
        input: &str,
        file: &mut File,
    ) -> Result<Materialized, ValidationError> {
        let url = parse_picture_url(input)?;
        let mut spec = HttpRequestSpec::new(HttpMethod::Get, url.as_str());
        if let Some(max_bytes) = self.policy.max_bytes {
            spec = spec.with_max_body_bytes(max_bytes);
        }
        let reply = self.transport.execute(&spec).map_err(|e| match e {
            TransportError::BodyTooLarge { limit, declared } => {
                warn!(url = %url, limit, "picture download exceeds size limit");
                ValidationError::TooLarge {
                    // Without a declared length only the cap overrun is known.
                    size_bytes: declared.unwrap_or(limit.saturating_add(1)),
                    max_bytes: limit,
                }
            }
            other => {
                warn!(url = %url, error = %other, "picture download failed");
                ValidationError::IoFailure(io::Error::other(format!(
                    "picture download failed: {other}"
                )))
            }
        })?;
        if !reply.is_success() {
            warn!(url = %url, status = reply.status, "picture download returned non-success status");
            return Err(ValidationError::IoFailure(io::Error::other(format!(
                "picture download failed with HTTP {}",
                reply.status
            ))));
        }

        // The probe may have been skipped or lied about the length.
        let size_bytes = reply.body.len() as u64;
        self.policy.check_size(size_bytes)?;
        file.write_all(reply.body.as_slice())
            .map_err(ValidationError::IoFailure)?;
        Ok(Materialized {
            size_bytes,
            content_type: reply.header(CONTENT_TYPE.as_str()).map(media_type),
        })
    }
}

fn parse_picture_url(input: &str) -> Result<Url, ValidationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyInput);
    }
    let url = Url::parse(trimmed).map_err(|e| ValidationError::InvalidUrl(format!("{trimmed}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ValidationError::InvalidUrl(format!(
            "unsupported scheme '{other}', expected http or https"
        ))),
    }
}

fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}
