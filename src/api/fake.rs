//! In-memory transport for tests.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Url;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::token::PageContext;
use super::transport::{ApiRequest, RawResponse, Transport};

/// Replays queued responses in order and records every request it receives.
///
/// Requests to a stalled path never complete, like a server that accepts the
/// connection and never answers.
#[derive(Default)]
pub struct FakeTransport {
    responses: Mutex<VecDeque<Result<RawResponse>>>,
    requests: Mutex<Vec<ApiRequest>>,
    stalled: Mutex<Vec<String>>,
    page_loads: Mutex<Vec<String>>,
    pub page: PageContext,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cookies(mut self, cookies: &str) -> Self {
        self.page.cookies = Some(cookies.to_string());
        self
    }

    pub fn push_json(&self, status: u16, body: &str) -> &Self {
        self.push(RawResponse {
            status,
            content_type: Some("application/json".into()),
            body: body.as_bytes().to_vec(),
        })
    }

    pub fn push(&self, resp: RawResponse) -> &Self {
        self.responses.lock().unwrap().push_back(Ok(resp));
        self
    }

    pub fn push_network_error(&self, msg: &str) -> &Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(anyhow!(msg.to_string())));
        self
    }

    pub fn stall_path(&self, path: &str) -> &Self {
        self.stalled.lock().unwrap().push(path.to_string());
        self
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Pages whose markup was (re)loaded, in call order.
    pub fn page_loads(&self) -> Vec<String> {
        self.page_loads.lock().unwrap().clone()
    }

    fn is_stalled(&self, path: &str) -> bool {
        self.stalled.lock().unwrap().iter().any(|p| p == path)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, req: ApiRequest) -> Result<RawResponse> {
        let stalled = self.is_stalled(&req.path);
        self.requests.lock().unwrap().push(req);
        if stalled {
            std::future::pending::<()>().await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(anyhow!("no response queued")))
    }

    fn page_context(&self) -> PageContext {
        self.page.clone()
    }

    async fn load_page(&self, path: &str) -> Result<()> {
        if self.is_stalled(path) {
            std::future::pending::<()>().await;
        }
        self.page_loads.lock().unwrap().push(path.to_string());
        Ok(())
    }

    fn resolve_url(&self, path: &str) -> Result<Url> {
        Ok(Url::parse("http://test.local/")?.join(path)?)
    }
}
