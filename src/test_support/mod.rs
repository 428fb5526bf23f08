//! In-memory doubles for unit tests: a scripted executor and a recording sleeper.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::transport::{
    HttpResponse, PreparedRequest, RequestExecutor, ResponseBody, Sleeper, TransportError,
};

/// One scripted executor outcome.
#[derive(Debug, Clone)]
pub enum Step {
    /// Respond with a status, headers and body.
    Respond {
        status: u16,
        headers: Vec<(&'static str, String)>,
        body: Vec<u8>,
    },
    /// Respond with a body that fails after yielding `body`.
    BrokenBody { status: u16, body: Vec<u8> },
    /// Fail with a connection error.
    Refused,
    /// Fail with a timeout.
    Timeout,
    /// Fail with an invalid header error.
    InvalidHeader(&'static str),
}

impl Step {
    pub fn ok(body: &str) -> Self {
        Self::Respond {
            status: 200,
            headers: Vec::new(),
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self::Respond {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn respond(status: u16, headers: Vec<(&'static str, String)>, body: Vec<u8>) -> Self {
        Self::Respond {
            status,
            headers,
            body,
        }
    }

    /// A HEAD-style response that only declares a length.
    pub fn length(len: u64) -> Self {
        Self::respond(200, vec![("content-length", len.to_string())], Vec::new())
    }

    pub fn refused() -> Self {
        Self::Refused
    }

    pub fn timeout() -> Self {
        Self::Timeout
    }

    pub fn invalid_header(name: &'static str) -> Self {
        Self::InvalidHeader(name)
    }
}

/// Executor that replays a script and records every request it sees.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    steps: Mutex<VecDeque<Step>>,
    fallback: Option<Step>,
    requests: Mutex<Vec<PreparedRequest>>,
}

impl ScriptedExecutor {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Returns the same step forever.
    pub fn repeating(step: Step) -> Self {
        Self {
            fallback: Some(step),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len()
    }

    pub fn requests(&self) -> Vec<PreparedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl RequestExecutor for ScriptedExecutor {
    async fn execute(&self, request: PreparedRequest) -> Result<HttpResponse, TransportError> {
        let url = request.url.clone();
        let stream = request.stream;
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(request);

        let step = self
            .steps
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front()
            .or_else(|| self.fallback.clone())
            .unwrap_or_else(|| panic!("script exhausted for {url}"));

        match step {
            Step::Respond {
                status,
                headers,
                body,
            } => {
                let mut map = HeaderMap::new();
                for (name, value) in headers {
                    map.insert(
                        HeaderName::from_static(name),
                        HeaderValue::from_str(&value).unwrap_or_else(|_| panic!("bad header {name}")),
                    );
                }
                let body = Bytes::from(body);
                let body = if stream {
                    let chunks: Vec<Result<Bytes, TransportError>> = body
                        .chunks(700)
                        .map(|c| Ok(Bytes::copy_from_slice(c)))
                        .collect();
                    ResponseBody::Stream(futures_util::stream::iter(chunks).boxed())
                } else {
                    ResponseBody::Buffered(body)
                };
                Ok(HttpResponse {
                    status: StatusCode::from_u16(status).unwrap_or(StatusCode::OK),
                    headers: map,
                    url,
                    body,
                })
            }
            Step::BrokenBody { status, body } => {
                let failing_url = url.to_string();
                let chunks: Vec<Result<Bytes, TransportError>> = vec![
                    Ok(Bytes::from(body)),
                    Err(TransportError::body(failing_url, "connection reset")),
                ];
                Ok(HttpResponse {
                    status: StatusCode::from_u16(status).unwrap_or(StatusCode::OK),
                    headers: HeaderMap::new(),
                    url,
                    body: ResponseBody::Stream(futures_util::stream::iter(chunks).boxed()),
                })
            }
            Step::Refused => Err(TransportError::connection(url.as_str(), "connection refused")),
            Step::Timeout => Err(TransportError::timeout(url.as_str())),
            Step::InvalidHeader(name) => Err(TransportError::invalid_header(name)),
        }
    }
}

/// Sleeper that records requested delays and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(duration);
    }
}
