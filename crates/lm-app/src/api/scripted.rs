//! Scripted transport for tests: replies are matched by method and URL
//! suffix, every request is recorded.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::api::transport::{HttpRequest, HttpResponse, HttpTransport, Method, TransportError};

struct Reply {
    method: Method,
    suffix: String,
    delay: Option<Duration>,
    outcome: Result<HttpResponse, TransportError>,
    /// Kept after use when set
    sticky: bool,
}

#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<Vec<Reply>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, method: Method, suffix: &str, status: u16, body: Value) -> Self {
        self.push(method, suffix, None, Ok(response(status, body)), false)
    }

    pub fn reply_after(
        self,
        method: Method,
        suffix: &str,
        delay: Duration,
        body: Value,
    ) -> Self {
        self.push(method, suffix, Some(delay), Ok(response(200, body)), false)
    }

    pub fn always_after(self, method: Method, suffix: &str, delay: Duration, body: Value) -> Self {
        self.push(method, suffix, Some(delay), Ok(response(200, body)), true)
    }

    pub fn fail(self, method: Method, suffix: &str, error: TransportError) -> Self {
        self.push(method, suffix, None, Err(error), false)
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    fn push(
        self,
        method: Method,
        suffix: &str,
        delay: Option<Duration>,
        outcome: Result<HttpResponse, TransportError>,
        sticky: bool,
    ) -> Self {
        self.replies.lock().push(Reply {
            method,
            suffix: suffix.to_string(),
            delay,
            outcome,
            sticky,
        });
        self
    }
}

fn response(status: u16, body: Value) -> HttpResponse {
    HttpResponse {
        status,
        body: if body.is_null() { String::new() } else { body.to_string() },
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().push(request.clone());

        let (delay, outcome) = {
            let mut replies = self.replies.lock();
            let position = replies
                .iter()
                .position(|r| r.method == request.method && request.url.ends_with(&r.suffix));
            match position {
                Some(index) if replies[index].sticky => {
                    (replies[index].delay, replies[index].outcome.clone())
                }
                Some(index) => {
                    let reply = replies.remove(index);
                    (reply.delay, reply.outcome)
                }
                None => (
                    None,
                    Err(TransportError::Connect(format!(
                        "no scripted reply for {} {}",
                        request.method, request.url
                    ))),
                ),
            }
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        outcome
    }
}
