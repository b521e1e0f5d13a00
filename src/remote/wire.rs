//! Provider JSON shapes. Field names here are the provider's and must not change.

use serde::Serialize;
use serde_json::Value;

use super::request::{OutpaintingRequest, TextToImageRequest};
use super::{RemoteError, TaskMetrics, TaskResult, TaskStatus, TaskStatusReport};

#[derive(Debug, Serialize)]
pub(super) struct OutpaintingBody<'a> {
    model: &'a str,
    input: OutpaintingInput<'a>,
    parameters: OutpaintingWireParameters<'a>,
}

#[derive(Debug, Serialize)]
struct OutpaintingInput<'a> {
    image_url: &'a str,
}

#[derive(Debug, Serialize)]
struct OutpaintingWireParameters<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    angle: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_ratio: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    x_scale: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    y_scale: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_offset: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bottom_offset: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    left_offset: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    right_offset: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    best_quality: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit_image_size: Option<bool>,
    add_watermark: bool,
}

impl<'a> From<&'a OutpaintingRequest> for OutpaintingBody<'a> {
    fn from(req: &'a OutpaintingRequest) -> Self {
        let p = req.parameters();
        Self {
            model: req.model(),
            input: OutpaintingInput {
                image_url: req.image_url(),
            },
            parameters: OutpaintingWireParameters {
                angle: p.angle,
                output_ratio: p.output_ratio.as_deref().map(str::trim),
                x_scale: p.x_scale,
                y_scale: p.y_scale,
                top_offset: p.top_offset,
                bottom_offset: p.bottom_offset,
                left_offset: p.left_offset,
                right_offset: p.right_offset,
                best_quality: p.best_quality,
                limit_image_size: p.limit_image_size,
                add_watermark: p.add_watermark,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct TextToImageBody<'a> {
    model: &'a str,
    input: TextToImageInput<'a>,
    parameters: TextToImageParameters,
}

#[derive(Debug, Serialize)]
struct TextToImageInput<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct TextToImageParameters {
    size: String,
    n: u8,
}

impl<'a> From<&'a TextToImageRequest> for TextToImageBody<'a> {
    fn from(req: &'a TextToImageRequest) -> Self {
        Self {
            model: req.model(),
            input: TextToImageInput {
                prompt: req.prompt(),
                negative_prompt: req.negative_prompt(),
            },
            parameters: TextToImageParameters {
                size: req.size().to_string(),
                n: req.image_count(),
            },
        }
    }
}

pub(super) fn encode_body(body: &impl Serialize) -> Result<Vec<u8>, RemoteError> {
    serde_json::to_vec(body)
        .map_err(|e| RemoteError::InvalidRequest(format!("request body encode failed: {e}")))
}

/// Provider bodies are always JSON objects; anything else cannot carry a status.
pub(super) fn parse_json(body: &[u8]) -> Result<Value, RemoteError> {
    let payload = serde_json::from_slice::<Value>(body)
        .map_err(|e| RemoteError::MalformedResponse(format!("response is not valid JSON: {e}")))?;
    if !payload.is_object() {
        return Err(RemoteError::MalformedResponse(format!(
            "response is not a JSON object (got {})",
            json_kind(&payload)
        )));
    }
    Ok(payload)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A 2xx body carrying a non-empty top-level `code` is a provider-level rejection.
pub(super) fn provider_rejection(payload: &Value) -> Option<(String, String)> {
    let code = match payload.get("code")? {
        Value::Null => return None,
        Value::String(s) if s.trim().is_empty() => return None,
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let message = payload
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Some((code, message))
}

pub(super) fn created_task_id(payload: &Value) -> Option<String> {
    payload
        .get("output")
        .and_then(|o| o.get("task_id"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub(super) fn status_report(requested_task_id: &str, payload: &Value) -> TaskStatusReport {
    let output = payload.get("output");
    let field = |name: &str| output.and_then(|o| o.get(name));

    let raw_status = field("task_status")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let status = TaskStatus::from_provider(raw_status.as_str());
    let task_id = field("task_id")
        .and_then(Value::as_str)
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(requested_task_id)
        .to_string();

    let result = match status {
        TaskStatus::Succeeded => {
            let mut image_urls = Vec::new();
            if let Some(url) = field("output_image_url").and_then(Value::as_str) {
                push_url(&mut image_urls, url);
            }
            if let Some(rows) = field("results").and_then(Value::as_array) {
                for row in rows {
                    if let Some(url) = row.get("url").and_then(Value::as_str) {
                        push_url(&mut image_urls, url);
                    }
                }
            }
            Some(TaskResult::Succeeded { image_urls })
        }
        TaskStatus::Failed => {
            let code = field("code")
                .and_then(Value::as_str)
                .filter(|v| !v.trim().is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| raw_status.to_ascii_uppercase());
            let message = field("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| default_failure_message(raw_status.as_str()));
            Some(TaskResult::Failed { code, message })
        }
        TaskStatus::Pending | TaskStatus::Running => None,
    };

    let metrics = field("task_metrics").and_then(Value::as_object).map(|m| {
        let count = |key: &str| m.get(key).and_then(Value::as_u64).unwrap_or(0);
        TaskMetrics {
            total: count("TOTAL"),
            succeeded: count("SUCCEEDED"),
            failed: count("FAILED"),
        }
    });

    TaskStatusReport {
        task_id,
        status,
        result,
        metrics,
    }
}

fn push_url(out: &mut Vec<String>, raw: &str) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

fn default_failure_message(raw_status: &str) -> String {
    match raw_status.to_ascii_uppercase().as_str() {
        "CANCELED" => String::from("task was canceled"),
        "UNKNOWN" => String::from("task does not exist or has expired"),
        _ => String::from("task failed"),
    }
}
