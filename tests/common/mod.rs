#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use picture_ai_backend_core::remote::transport::{
    HttpMethod, HttpReply, HttpRequestSpec, HttpTransport, TransportError,
};
use picture_ai_backend_core::remote::{ApiKey, RemoteEndpoints, RemoteTaskClient};
use serde_json::Value;

pub const TEST_API_KEY: &str = "sk-test-secret";
pub const TEST_API_BASE: &str = "https://dashscope.example.test";

/// Scripted transport. Clones share the recorded requests and the reply queue.
#[derive(Clone, Default)]
pub struct FakeTransport {
    seen: Arc<Mutex<Vec<HttpRequestSpec>>>,
    replies: Arc<Mutex<VecDeque<Result<HttpReply, TransportError>>>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, reply: Result<HttpReply, TransportError>) -> &Self {
        self.replies
            .lock()
            .expect("fake transport mutex poisoned")
            .push_back(reply);
        self
    }

    pub fn push_json(&self, status: u16, body: Value) -> &Self {
        self.push(Ok(HttpReply::new(status, body.to_string())))
    }

    pub fn seen(&self) -> Vec<HttpRequestSpec> {
        self.seen
            .lock()
            .expect("fake transport mutex poisoned")
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.seen
            .lock()
            .expect("fake transport mutex poisoned")
            .len()
    }

    pub fn methods(&self) -> Vec<HttpMethod> {
        self.seen().iter().map(|spec| spec.method).collect()
    }
}

impl HttpTransport for FakeTransport {
    fn execute(&self, request: &HttpRequestSpec) -> Result<HttpReply, TransportError> {
        self.seen
            .lock()
            .expect("fake transport mutex poisoned")
            .push(request.clone());
        let reply = self
            .replies
            .lock()
            .expect("fake transport mutex poisoned")
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Connect(String::from("no scripted reply"))))?;
        match request.max_body_bytes {
            Some(limit) if reply.body.len() as u64 > limit => Err(TransportError::BodyTooLarge {
                limit,
                declared: reply
                    .header("content-length")
                    .and_then(|v| v.trim().parse().ok()),
            }),
            _ => Ok(reply),
        }
    }
}

pub fn test_client(transport: FakeTransport) -> RemoteTaskClient<FakeTransport> {
    RemoteTaskClient::new(transport, ApiKey::new(TEST_API_KEY).expect("test key"))
        .with_endpoints(RemoteEndpoints::new(TEST_API_BASE))
}

pub fn created_body(task_id: &str) -> Value {
    serde_json::json!({
        "output": { "task_id": task_id, "task_status": "PENDING" },
        "request_id": "req-1"
    })
}

pub fn status_body(task_id: &str, task_status: &str) -> Value {
    serde_json::json!({
        "output": { "task_id": task_id, "task_status": task_status },
        "request_id": "req-2"
    })
}
