//! An in-process registry for tests.
//!
//! Responses are registered per path (optionally with a query) and served in
//! order. The last response for a route repeats. Every request is recorded.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri};
use parking_lot::Mutex;

/// A canned response.
#[derive(Debug, Clone)]
pub struct MockResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl MockResponse {
    /// A response with no headers.
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.append(name, value);
        }
        self
    }

    fn build(&self) -> http::Response<hyperdriver::Body> {
        let mut response = http::Response::new(hyperdriver::Body::from(self.body.clone()));
        *response.status_mut() = self.status;
        *response.version_mut() = http::Version::HTTP_11;
        *response.headers_mut() = self.headers.clone();
        response
    }
}

/// A request seen by the mock.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Method.
    pub method: http::Method,
    /// Full URI.
    pub uri: Uri,
    /// Request headers.
    pub headers: HeaderMap,
}

#[derive(Debug, Default)]
struct Routes {
    responses: HashMap<String, VecDeque<MockResponse>>,
    requests: Vec<RecordedRequest>,
}

/// A `tower::Service` standing in for an upstream registry.
#[derive(Debug, Default, Clone)]
pub struct MockService {
    routes: Arc<Mutex<Routes>>,
}

impl MockService {
    /// An empty mock. Unknown routes answer `404`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for `route`, a path with an optional `?query`.
    pub fn add(&self, route: &str, response: MockResponse) {
        self.routes
            .lock()
            .responses
            .entry(route.to_owned())
            .or_default()
            .push_back(response);
    }

    /// Requests served so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.routes.lock().requests.clone()
    }

    /// Requests served so far for `path`, ignoring queries.
    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.uri.path() == path)
            .collect()
    }

    fn respond(&self, method: &http::Method, uri: &Uri, headers: &HeaderMap) -> http::Response<hyperdriver::Body> {
        let mut routes = self.routes.lock();
        routes.requests.push(RecordedRequest {
            method: method.clone(),
            uri: uri.clone(),
            headers: headers.clone(),
        });

        let exact = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_owned())
            .unwrap_or_default();
        let key = if routes.responses.contains_key(&exact) {
            exact
        } else {
            uri.path().to_owned()
        };

        let response = match routes.responses.get_mut(&key) {
            Some(queue) if queue.len() > 1 => queue.pop_front().map(|r| r.build()),
            Some(queue) => queue.front().map(MockResponse::build),
            None => None,
        };
        response.unwrap_or_else(|| {
            tracing::debug!("no mock response for {uri}");
            MockResponse::new(StatusCode::NOT_FOUND, Bytes::new()).build()
        })
    }
}

impl tower::Service<http::Request<hyperdriver::Body>> for MockService {
    type Response = http::Response<hyperdriver::Body>;
    type Error = hyperdriver::client::Error;
    type Future = std::future::Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<hyperdriver::Body>) -> Self::Future {
        std::future::ready(Ok(self.respond(req.method(), req.uri(), req.headers())))
    }
}
