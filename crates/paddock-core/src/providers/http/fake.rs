use super::{HttpRequest, HttpResponse, Transport};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub enum FakeReply {
    Status(u16, String),
    Network(String),
}

impl FakeReply {
    pub fn ok(body: impl Into<String>) -> Self {
        FakeReply::Status(200, body.into())
    }

    pub fn status(code: u16, body: impl Into<String>) -> Self {
        FakeReply::Status(code, body.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        FakeReply::Network(msg.into())
    }
}

struct Route {
    path: String,
    query: Vec<(String, String)>,
    /// Served in order; the last reply repeats once the rest are used up.
    replies: VecDeque<FakeReply>,
}

impl Route {
    fn matches(&self, req: &HttpRequest) -> bool {
        let path = req.url.split('?').next().unwrap_or(&req.url);
        path.ends_with(&self.path) && self.query.iter().all(|q| req.query.contains(q))
    }

    fn next_reply(&mut self) -> FakeReply {
        if self.replies.len() > 1 {
            self.replies.pop_front().unwrap_or(FakeReply::network("empty script"))
        } else {
            self.replies
                .front()
                .cloned()
                .unwrap_or(FakeReply::network("empty script"))
        }
    }
}

/// Scripted in-process transport for offline tests.
///
/// Routes match by URL path suffix plus a subset of query pairs. Later
/// registrations win over earlier ones, so register the generic route first.
/// Unmatched requests get a 404.
#[derive(Default)]
pub struct FakeTransport {
    routes: Mutex<Vec<Route>>,
    calls: Mutex<Vec<HttpRequest>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, path: &str, reply: FakeReply) -> &Self {
        self.script_query(path, &[], vec![reply])
    }

    pub fn on_query(&self, path: &str, query: &[(&str, &str)], reply: FakeReply) -> &Self {
        self.script_query(path, query, vec![reply])
    }

    pub fn script(&self, path: &str, replies: Vec<FakeReply>) -> &Self {
        self.script_query(path, &[], replies)
    }

    pub fn script_query(
        &self,
        path: &str,
        query: &[(&str, &str)],
        replies: Vec<FakeReply>,
    ) -> &Self {
        let route = Route {
            path: path.to_string(),
            query: query
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            replies: replies.into(),
        };
        self.routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(route);
        self
    }

    pub fn calls(&self) -> Vec<HttpRequest> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self, path: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.url.split('?').next().unwrap_or(&c.url).ends_with(path))
            .count()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get(&self, req: &HttpRequest) -> anyhow::Result<HttpResponse> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(req.clone());

        let reply = {
            let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
            routes
                .iter_mut()
                .rev()
                .find(|r| r.matches(req))
                .map(Route::next_reply)
        };

        match reply {
            Some(FakeReply::Status(status, body)) => Ok(HttpResponse { status, body }),
            Some(FakeReply::Network(msg)) => Err(anyhow::anyhow!(msg)),
            None => Ok(HttpResponse {
                status: 404,
                body: format!("no fake route for {}", req.url),
            }),
        }
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}
