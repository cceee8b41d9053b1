//! In-process stand-in for the console API used by unit tests.
//!
//! Responses are scripted per `(method, path)`: each request pops the next
//! queued response and the last one repeats forever. Unscripted routes
//! answer 404.

use crate::api::{API_ROOT, PatchApiClient};

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri, header::CONTENT_TYPE},
    response::Response,
};
use std::{
    collections::{HashMap, VecDeque},
    net::SocketAddr,
    sync::{Arc, Mutex},
};
use url::Url;

#[derive(Debug, Clone)]
pub(crate) struct MockResponse {
    status: StatusCode,
    headers: Vec<(String, String)>,
    body: String,
}

impl MockResponse {
    pub(crate) fn json(value: serde_json::Value) -> Self {
        Self {
            status: StatusCode::OK,
            headers: vec![("content-type".into(), "application/json".into())],
            body: value.to_string(),
        }
    }

    pub(crate) fn status(code: u16) -> Self {
        Self {
            status: StatusCode::from_u16(code).expect("valid status code"),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub(crate) fn with_status(mut self, code: u16) -> Self {
        self.status = StatusCode::from_u16(code).expect("valid status code");
        self
    }

    pub(crate) fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub body: String,
    pub content_type: Option<String>,
    pub headers: HeaderMap,
}

#[derive(Debug, Default)]
struct MockState {
    routes: HashMap<(Method, String), VecDeque<MockResponse>>,
    requests: Vec<RecordedRequest>,
}

type Shared = Arc<Mutex<MockState>>;

#[derive(Debug, Clone)]
pub(crate) struct MockConsole {
    addr: SocketAddr,
    state: Shared,
}

impl MockConsole {
    pub(crate) async fn start() -> Self {
        let state = Shared::default();
        let app = Router::new().fallback(handle).with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock console");
        let addr = listener.local_addr().expect("mock console address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock console serve");
        });
        Self { addr, state }
    }

    pub(crate) fn base_url(&self) -> Url {
        Url::parse(&format!("http://{}", self.addr)).expect("mock url")
    }

    pub(crate) fn client(&self) -> PatchApiClient {
        PatchApiClient::with_http_client(
            reqwest::Client::new(),
            &self.base_url(),
            None,
        )
        .expect("mock client")
    }

    fn api_path(path: &str) -> String {
        format!("/{API_ROOT}{}", path.trim_start_matches('/'))
    }

    /// Script responses for an API-relative path.
    pub(crate) fn on(
        &self,
        method: Method,
        path: &str,
        responses: impl IntoIterator<Item = MockResponse>,
    ) {
        self.on_raw(method, &Self::api_path(path), responses);
    }

    /// Script responses for an absolute path (outside the console API).
    pub(crate) fn on_raw(
        &self,
        method: Method,
        path: &str,
        responses: impl IntoIterator<Item = MockResponse>,
    ) {
        let mut state = self.state.lock().unwrap();
        state
            .routes
            .entry((method, path.to_string()))
            .or_default()
            .extend(responses);
    }

    pub(crate) fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Requests received on an API-relative path.
    pub(crate) fn requests_to(
        &self,
        method: Method,
        path: &str,
    ) -> Vec<RecordedRequest> {
        self.requests_to_raw(method, &Self::api_path(path))
    }

    pub(crate) fn requests_to_raw(
        &self,
        method: Method,
        path: &str,
    ) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path == path)
            .collect()
    }
}

async fn handle(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Response {
    let mut state = state.lock().unwrap();
    state.requests.push(RecordedRequest {
        method: method.clone(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        body,
        content_type: headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        headers,
    });

    let scripted = state
        .routes
        .get_mut(&(method, uri.path().to_string()))
        .and_then(|queue| {
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            }
        });

    let reply = scripted.unwrap_or_else(|| MockResponse::status(404));
    let mut builder = Response::builder().status(reply.status);
    for (name, value) in &reply.headers {
        builder = builder.header(name, value);
    }
    builder.body(Body::from(reply.body)).expect("mock response")
}
